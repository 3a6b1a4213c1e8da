use std::fmt;

use anyhow::Result;
use log::*;
use postgres::{Client, NoTls};
use r2d2::ManageConnection;
use r2d2_postgres::PostgresConnectionManager;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::documents::{HasMeta, Version};
use crate::ids::{Entity, Id};

const SETUP_SQL: &str = include_str!("persistence.sql");
const INSERT_SQL: &str = "INSERT INTO documents (id, body) \
     SELECT $1, jsonb_set($2::jsonb, '{_version}', to_jsonb(to_hex(txid_current()))) \
     WHERE NOT EXISTS (SELECT 1 FROM documents d WHERE d.id = $1)";
const UPDATE_SQL: &str = "UPDATE documents \
     SET body = jsonb_set($2::jsonb, '{_version}', to_jsonb(to_hex(txid_current()))) \
     WHERE id = $1 AND body -> '_version' = $2::jsonb -> '_version'";
const CURRENT_VERSION_SQL: &str = "SELECT to_hex(txid_current())";
const LOAD_SQL: &str = "SELECT body FROM documents WHERE id = $1";
const DELETE_SQL: &str = "DELETE FROM documents WHERE id = $1";
const ALL_SQL: &str = "SELECT body FROM documents WHERE id LIKE $1 ORDER BY id";

/// A document write raced with another writer; the in-memory copy is stale.
#[derive(Debug, Clone, Error)]
#[error("stale version")]
pub struct ConcurrencyError;

/// A store of json documents, keyed by their prefixed id and guarded by the
/// version recorded inside each body.
pub trait Storage {
    fn setup(&mut self) -> Result<()>;
    /// Inserts when the document's version is still initial, otherwise
    /// updates guarded by the stored version. On success the fresh version
    /// is written back into the document's metadata.
    fn save<D: Serialize + Entity + HasMeta>(&mut self, doc: &mut D) -> Result<()>;
    fn load<D: DeserializeOwned + Entity>(&mut self, id: &Id<D>) -> Result<Option<D>>;
    /// Returns false when no such document existed.
    fn delete<D: Entity>(&mut self, id: &Id<D>) -> Result<bool>;
    /// Every stored document of the given entity type.
    fn all<D: DeserializeOwned + Entity>(&mut self) -> Result<Vec<D>>;
}

pub struct Documents {
    client: Client,
}

impl fmt::Debug for Documents {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Documents").finish()
    }
}

impl Documents {
    pub fn wrap(client: Client) -> Self {
        Documents { client }
    }

    pub fn get_mut(&mut self) -> &mut Client {
        &mut self.client
    }
}

impl Storage for Documents {
    fn setup(&mut self) -> Result<()> {
        self.client.batch_execute(SETUP_SQL)?;
        Ok(())
    }

    fn save<D: Serialize + Entity + HasMeta>(&mut self, doc: &mut D) -> Result<()> {
        let id = doc.meta().id.to_string();
        let body = serde_json::to_value(&*doc)?;
        let mut t = self.client.transaction()?;
        let sql = if doc.meta().version.is_initial() {
            INSERT_SQL
        } else {
            UPDATE_SQL
        };
        let nrows = t.execute(sql, &[&id, &body])?;
        if nrows != 1 {
            warn!(
                "Save of {} failed; version {:?} is stale",
                id,
                doc.meta().version
            );
            return Err(ConcurrencyError.into());
        }
        let version: String = t.query_one(CURRENT_VERSION_SQL, &[])?.get(0);
        t.commit()?;
        doc.meta_mut().version = Version::from(version);
        trace!("Saved document {}", id);
        Ok(())
    }

    fn load<D: DeserializeOwned + Entity>(&mut self, id: &Id<D>) -> Result<Option<D>> {
        let row = self.client.query_opt(LOAD_SQL, &[&id.to_string()])?;
        let doc = row
            .map(|r| serde_json::from_value(r.get::<_, serde_json::Value>(0)))
            .transpose()?;
        Ok(doc)
    }

    fn delete<D: Entity>(&mut self, id: &Id<D>) -> Result<bool> {
        let nrows = self.client.execute(DELETE_SQL, &[&id.to_string()])?;
        Ok(nrows > 0)
    }

    fn all<D: DeserializeOwned + Entity>(&mut self) -> Result<Vec<D>> {
        let pattern = format!("{}-%", D::PREFIX);
        let rows = self.client.query(ALL_SQL, &[&pattern])?;
        let docs = rows
            .into_iter()
            .map(|r| serde_json::from_value(r.get::<_, serde_json::Value>(0)))
            .collect::<Result<Vec<D>, _>>()?;
        Ok(docs)
    }
}

#[derive(Debug)]
pub struct DocumentConnectionManager {
    inner: PostgresConnectionManager<NoTls>,
}

impl DocumentConnectionManager {
    pub fn new(inner: PostgresConnectionManager<NoTls>) -> Self {
        DocumentConnectionManager { inner }
    }
}

impl ManageConnection for DocumentConnectionManager {
    type Connection = Documents;
    type Error = postgres::Error;

    fn connect(&self) -> Result<Documents, postgres::Error> {
        Ok(Documents::wrap(self.inner.connect()?))
    }

    fn is_valid(&self, conn: &mut Documents) -> Result<(), postgres::Error> {
        self.inner.is_valid(conn.get_mut())
    }

    fn has_broken(&self, conn: &mut Documents) -> bool {
        self.inner.has_broken(conn.get_mut())
    }
}
