//! An in-process document store with the same concurrency contract as the
//! postgres backend. Mostly useful for tests and local tinkering.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use log::*;
use r2d2::ManageConnection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::documents::{HasMeta, Version};
use crate::ids::{Entity, Id};
use crate::persistence::{ConcurrencyError, Storage};

#[derive(Debug, Default)]
struct Inner {
    docs: BTreeMap<String, serde_json::Value>,
    clock: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryManager {
    store: MemoryStore,
}

#[derive(Debug, Error)]
#[error("memory store unavailable")]
pub struct Unreachable;

impl MemoryStore {
    fn lock(&self) -> MutexGuard<Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemoryStore {
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn save<D: Serialize + Entity + HasMeta>(&mut self, doc: &mut D) -> Result<()> {
        let id = doc.meta().id.to_string();
        let mut body = serde_json::to_value(&*doc)?;
        let version;
        {
            let mut inner = self.lock();
            let current = inner
                .docs
                .get(&id)
                .and_then(|stored| stored.get("_version"))
                .and_then(|v| v.as_str())
                .map(|v| v.to_string());
            let expected = if doc.meta().version.is_initial() {
                None
            } else {
                Some(doc.meta().version.as_str().to_string())
            };
            if current != expected {
                warn!(
                    "Save of {} failed; version {:?} is stale",
                    id,
                    doc.meta().version
                );
                return Err(ConcurrencyError.into());
            }
            inner.clock += 1;
            version = format!("{:x}", inner.clock);
            body["_version"] = serde_json::Value::String(version.clone());
            inner.docs.insert(id, body);
        }
        doc.meta_mut().version = Version::from(version);
        Ok(())
    }

    fn load<D: DeserializeOwned + Entity>(&mut self, id: &Id<D>) -> Result<Option<D>> {
        let inner = self.lock();
        let doc = inner
            .docs
            .get(&id.to_string())
            .cloned()
            .map(serde_json::from_value)
            .transpose()?;
        Ok(doc)
    }

    fn delete<D: Entity>(&mut self, id: &Id<D>) -> Result<bool> {
        let mut inner = self.lock();
        Ok(inner.docs.remove(&id.to_string()).is_some())
    }

    fn all<D: DeserializeOwned + Entity>(&mut self) -> Result<Vec<D>> {
        let prefix = format!("{}-", D::PREFIX);
        let inner = self.lock();
        let docs = inner
            .docs
            .iter()
            .filter(|(id, _)| id.starts_with(&prefix))
            .map(|(_, body)| serde_json::from_value(body.clone()))
            .collect::<Result<Vec<D>, _>>()?;
        Ok(docs)
    }
}

impl ManageConnection for MemoryManager {
    type Connection = MemoryStore;
    type Error = Unreachable;

    fn connect(&self) -> Result<MemoryStore, Unreachable> {
        Ok(self.store.clone())
    }

    fn is_valid(&self, _conn: &mut MemoryStore) -> Result<(), Unreachable> {
        Ok(())
    }

    fn has_broken(&self, _conn: &mut MemoryStore) -> bool {
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::documents::DocMeta;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
    struct ADocument {
        #[serde(flatten)]
        meta: DocMeta<ADocument>,
        name: String,
    }

    impl Entity for ADocument {
        const PREFIX: &'static str = "a-doc";
    }

    impl HasMeta for ADocument {
        fn meta(&self) -> &DocMeta<Self> {
            &self.meta
        }
        fn meta_mut(&mut self) -> &mut DocMeta<Self> {
            &mut self.meta
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
    struct AnotherDocument {
        #[serde(flatten)]
        meta: DocMeta<AnotherDocument>,
        name: String,
    }

    impl Entity for AnotherDocument {
        const PREFIX: &'static str = "another-doc";
    }

    impl HasMeta for AnotherDocument {
        fn meta(&self) -> &DocMeta<Self> {
            &self.meta
        }
        fn meta_mut(&mut self) -> &mut DocMeta<Self> {
            &mut self.meta
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::default()
    }

    #[test]
    fn load_missing_returns_none() {
        let mut docs = store();
        let loaded = docs
            .load::<ADocument>(&Id::hashed(&"missing"))
            .expect("load");
        assert_eq!(None, loaded);
    }

    #[test]
    fn save_load_round_trip() {
        let mut docs = store();
        let mut some_doc = ADocument {
            meta: DocMeta::new_with_id(Id::hashed(&"some-doc")),
            name: "Dave".to_string(),
        };

        docs.save(&mut some_doc).expect("save");
        assert!(!some_doc.meta.version.is_initial());

        let loaded = docs.load(&some_doc.meta.id).expect("load");
        assert_eq!(Some(some_doc), loaded);
    }

    #[test]
    fn should_update_on_overwrite() {
        let mut docs = store();
        let mut some_doc = ADocument {
            meta: DocMeta::new_with_id(Id::hashed(&"version-doc")),
            name: "Version 1".to_string(),
        };
        docs.save(&mut some_doc).expect("save 1");
        let first_version = some_doc.meta.version.clone();

        some_doc.name = "Version 2".to_string();
        docs.save(&mut some_doc).expect("save 2");
        assert_ne!(first_version, some_doc.meta.version);

        let loaded = docs.load(&some_doc.meta.id).expect("load");
        assert_eq!(Some(some_doc), loaded);
    }

    #[test]
    fn should_fail_on_overwrite_with_stale_version() {
        let mut docs = store();
        let mut original = ADocument {
            meta: DocMeta::new_with_id(Id::hashed(&"contended")),
            name: "Original".to_string(),
        };
        docs.save(&mut original).expect("save");

        let mut winner = docs
            .load::<ADocument>(&original.meta.id)
            .expect("load")
            .expect("present");
        winner.name = "Winner".to_string();
        docs.save(&mut winner).expect("save winner");

        original.name = "Loser".to_string();
        let err = docs.save(&mut original).expect_err("save loser");
        assert!(
            err.downcast_ref::<ConcurrencyError>().is_some(),
            "expected ConcurrencyError, got {:?}",
            err
        );
    }

    #[test]
    fn should_fail_on_new_document_with_existing_id() {
        let mut docs = store();
        let mut original = ADocument {
            meta: DocMeta::new_with_id(Id::hashed(&"duplicated")),
            name: "Original".to_string(),
        };
        docs.save(&mut original).expect("save");

        let mut imposter = ADocument {
            meta: DocMeta::new_with_id(original.meta.id),
            name: "Imposter".to_string(),
        };
        let err = docs.save(&mut imposter).expect_err("save imposter");
        assert!(
            err.downcast_ref::<ConcurrencyError>().is_some(),
            "expected ConcurrencyError, got {:?}",
            err
        );
    }

    #[test]
    fn delete_returns_whether_present() {
        let mut docs = store();
        let mut doc = ADocument {
            meta: DocMeta::new_with_id(Id::hashed(&"to-delete")),
            name: "Doomed".to_string(),
        };
        docs.save(&mut doc).expect("save");

        assert!(docs.delete(&doc.meta.id).expect("delete"));
        assert!(!docs.delete(&doc.meta.id).expect("delete again"));
        assert_eq!(None, docs.load::<ADocument>(&doc.meta.id).expect("load"));
    }

    #[test]
    fn all_only_returns_matching_prefix() {
        let mut docs = store();
        for name in &["a", "b"] {
            let mut doc = ADocument {
                meta: DocMeta::new_with_id(Id::hashed(name)),
                name: name.to_string(),
            };
            docs.save(&mut doc).expect("save");
        }
        let mut other = AnotherDocument {
            meta: DocMeta::new_with_id(Id::hashed(&"other")),
            name: "other".to_string(),
        };
        docs.save(&mut other).expect("save");

        assert_eq!(2, docs.all::<ADocument>().expect("all").len());
        assert_eq!(1, docs.all::<AnotherDocument>().expect("all").len());
    }

    #[test]
    fn connections_share_the_store() {
        let manager = MemoryManager::default();
        let pool = r2d2::Pool::builder()
            .max_size(2)
            .build(manager)
            .expect("build pool");

        let mut doc = ADocument {
            meta: DocMeta::new_with_id(Id::hashed(&"shared")),
            name: "Shared".to_string(),
        };
        pool.get().expect("conn").save(&mut doc).expect("save");

        let loaded = pool
            .get()
            .expect("conn")
            .load::<ADocument>(&doc.meta.id)
            .expect("load");
        assert_eq!(Some(doc), loaded);
    }
}
