use anyhow::Result;
use chrono::Utc;
use log::*;
use r2d2::{self, Pool};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use infra::documents::DocMeta;
use infra::ids::Id;
use infra::persistence::Storage;

use crate::services::{Commandable, Queryable, Request};

mod models;

pub use models::{InventoryCategory, InventoryItem, RestockEntry, StockStatus};

#[derive(Debug, Clone, Error)]
pub enum InventoryError {
    #[error("inventory item not found")]
    NotFound,
    #[error("an inventory item named {0:?} already exists")]
    DuplicateName(String),
    #[error("quantity must be positive")]
    InvalidQuantity,
    #[error("stock levels cannot be negative")]
    InvalidStock,
}

#[derive(Debug)]
pub struct Inventory<M: r2d2::ManageConnection> {
    db: Pool<M>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInventoryItem {
    pub name: String,
    pub category: InventoryCategory,
    pub unit: String,
    pub current_stock: f64,
    pub min_stock: f64,
    pub unit_cost: i64,
    #[serde(default)]
    pub supplier: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InventoryItemPatch {
    pub name: Option<String>,
    pub category: Option<InventoryCategory>,
    pub unit: Option<String>,
    pub current_stock: Option<f64>,
    pub min_stock: Option<f64>,
    pub unit_cost: Option<i64>,
    pub supplier: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpdateInventoryItem {
    pub id: Id<InventoryItem>,
    pub patch: InventoryItemPatch,
}

#[derive(Debug, Clone)]
pub struct DeleteInventoryItem {
    pub id: Id<InventoryItem>,
}

#[derive(Debug, Clone)]
pub struct GetInventoryItem {
    pub id: Id<InventoryItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListInventory {
    pub category: Option<InventoryCategory>,
    pub status: Option<StockStatus>,
    #[serde(rename = "q")]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Restock {
    pub quantity: f64,
    pub unit_cost: i64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(skip)]
    pub id: Id<InventoryItem>,
}

#[derive(Debug, Clone, Copy)]
pub struct NeedsRestock;

#[derive(Debug, Clone, Copy)]
pub struct InventorySummary;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total_items: u64,
    pub sufficient: u64,
    pub low: u64,
    pub critical: u64,
    pub out: u64,
    /// Total stock value on hand, in centavos.
    pub total_value: i64,
}

impl Request for CreateInventoryItem {
    type Resp = InventoryItem;
}
impl Request for UpdateInventoryItem {
    type Resp = InventoryItem;
}
impl Request for DeleteInventoryItem {
    type Resp = ();
}
impl Request for GetInventoryItem {
    type Resp = InventoryItem;
}
impl Request for ListInventory {
    type Resp = Vec<InventoryItem>;
}
impl Request for Restock {
    type Resp = InventoryItem;
}
impl Request for NeedsRestock {
    type Resp = Vec<InventoryItem>;
}
impl Request for InventorySummary {
    type Resp = Summary;
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Inventory<M> {
    pub fn new(db: Pool<M>) -> Self {
        Inventory { db }
    }

    fn load_item(docs: &mut D, id: &Id<InventoryItem>) -> Result<InventoryItem> {
        Ok(docs.load(id)?.ok_or(InventoryError::NotFound)?)
    }

    fn check_name_free(docs: &mut D, name: &str, but: Option<&Id<InventoryItem>>) -> Result<()> {
        let taken = docs
            .all::<InventoryItem>()?
            .into_iter()
            .filter(|item| Some(&item.meta.id) != but)
            .any(|item| item.name.eq_ignore_ascii_case(name));
        if taken {
            return Err(InventoryError::DuplicateName(name.to_string()).into());
        }
        Ok(())
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<CreateInventoryItem> for Inventory<M>
{
    fn execute(&self, req: CreateInventoryItem) -> Result<InventoryItem> {
        if req.current_stock < 0.0 || req.min_stock < 0.0 {
            return Err(InventoryError::InvalidStock.into());
        }
        let mut docs = self.db.get()?;
        Self::check_name_free(&mut docs, &req.name, None)?;

        let now = Utc::now();
        let mut item = InventoryItem {
            meta: DocMeta::new_with_id(thread_rng().gen()),
            name: req.name,
            category: req.category,
            unit: req.unit,
            current_stock: req.current_stock,
            min_stock: req.min_stock,
            unit_cost: req.unit_cost,
            supplier: req.supplier,
            status: StockStatus::Out,
            restock_history: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        item.refresh_status();
        docs.save(&mut item)?;
        info!("Stocked new inventory item {}: {}", item.meta.id, item.name);
        Ok(item)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<UpdateInventoryItem> for Inventory<M>
{
    fn execute(&self, req: UpdateInventoryItem) -> Result<InventoryItem> {
        let UpdateInventoryItem { id, patch } = req;
        let mut docs = self.db.get()?;
        let mut item = Self::load_item(&mut docs, &id)?;

        if let Some(name) = patch.name {
            if !name.eq_ignore_ascii_case(&item.name) {
                Self::check_name_free(&mut docs, &name, Some(&id))?;
            }
            item.name = name;
        }
        if let Some(category) = patch.category {
            item.category = category;
        }
        if let Some(unit) = patch.unit {
            item.unit = unit;
        }
        if let Some(stock) = patch.current_stock {
            if stock < 0.0 {
                return Err(InventoryError::InvalidStock.into());
            }
            item.current_stock = stock;
        }
        if let Some(min) = patch.min_stock {
            if min < 0.0 {
                return Err(InventoryError::InvalidStock.into());
            }
            item.min_stock = min;
        }
        if let Some(cost) = patch.unit_cost {
            item.unit_cost = cost;
        }
        if let Some(supplier) = patch.supplier {
            item.supplier = Some(supplier);
        }
        item.refresh_status();
        item.updated_at = Utc::now();
        docs.save(&mut item)?;
        Ok(item)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<DeleteInventoryItem> for Inventory<M>
{
    fn execute(&self, req: DeleteInventoryItem) -> Result<()> {
        let mut docs = self.db.get()?;
        if !docs.delete(&req.id)? {
            return Err(InventoryError::NotFound.into());
        }
        info!("Deleted inventory item {}", req.id);
        Ok(())
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<Restock> for Inventory<M>
{
    fn execute(&self, req: Restock) -> Result<InventoryItem> {
        if req.quantity <= 0.0 {
            return Err(InventoryError::InvalidQuantity.into());
        }
        let mut docs = self.db.get()?;
        let mut item = Self::load_item(&mut docs, &req.id)?;
        item.restock(RestockEntry {
            quantity: req.quantity,
            unit_cost: req.unit_cost,
            notes: req.notes,
            at: Utc::now(),
        });
        item.updated_at = Utc::now();
        docs.save(&mut item)?;
        info!(
            "Restocked {} by {} {}; now {}",
            item.name, req.quantity, item.unit, item.current_stock
        );
        Ok(item)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<GetInventoryItem> for Inventory<M>
{
    fn query(&self, req: GetInventoryItem) -> Result<InventoryItem> {
        let mut docs = self.db.get()?;
        Self::load_item(&mut docs, &req.id)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<ListInventory> for Inventory<M>
{
    fn query(&self, req: ListInventory) -> Result<Vec<InventoryItem>> {
        let mut docs = self.db.get()?;
        let needle = req.search.as_deref().map(|s| s.to_lowercase());
        let mut items = docs
            .all::<InventoryItem>()?
            .into_iter()
            .filter(|item| req.category.map_or(true, |c| item.category == c))
            .filter(|item| req.status.map_or(true, |s| item.status == s))
            .filter(|item| {
                needle
                    .as_deref()
                    .map_or(true, |q| item.name.to_lowercase().contains(q))
            })
            .collect::<Vec<_>>();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<NeedsRestock> for Inventory<M>
{
    fn query(&self, _req: NeedsRestock) -> Result<Vec<InventoryItem>> {
        let mut docs = self.db.get()?;
        let mut items = docs
            .all::<InventoryItem>()?
            .into_iter()
            .filter(|item| item.needs_restock())
            .collect::<Vec<_>>();
        items.sort_by_key(|item| item.status);
        Ok(items)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<InventorySummary> for Inventory<M>
{
    fn query(&self, _req: InventorySummary) -> Result<Summary> {
        let mut docs = self.db.get()?;
        let mut summary = Summary::default();
        for item in docs.all::<InventoryItem>()? {
            summary.total_items += 1;
            summary.total_value += item.stock_value();
            match item.status {
                StockStatus::Sufficient => summary.sufficient += 1,
                StockStatus::Low => summary.low += 1,
                StockStatus::Critical => summary.critical += 1,
                StockStatus::Out => summary.out += 1,
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::junk_drawer;
    use infra::memory::MemoryManager;

    fn inventory() -> Inventory<MemoryManager> {
        Inventory::new(junk_drawer::pool())
    }

    fn chicken() -> CreateInventoryItem {
        CreateInventoryItem {
            name: "Chicken Breast".to_string(),
            category: InventoryCategory::Meat,
            unit: "kg".to_string(),
            current_stock: 20.0,
            min_stock: 10.0,
            unit_cost: 18_000,
            supplier: Some("Magnolia".to_string()),
        }
    }

    #[test]
    fn create_computes_status_and_persists() {
        let inventory = inventory();
        let item = inventory.execute(chicken()).expect("create");
        assert_eq!(StockStatus::Sufficient, item.status);

        let loaded = inventory
            .query(GetInventoryItem { id: item.meta.id })
            .expect("get");
        assert_eq!(item, loaded);
    }

    #[test]
    fn create_rejects_duplicate_names() {
        let inventory = inventory();
        inventory.execute(chicken()).expect("create");

        let mut dup = chicken();
        dup.name = "CHICKEN BREAST".to_string();
        let err = inventory.execute(dup).expect_err("duplicate");
        assert!(matches!(
            err.downcast_ref::<InventoryError>(),
            Some(InventoryError::DuplicateName(_))
        ));
    }

    #[test]
    fn create_rejects_negative_stock() {
        let inventory = inventory();
        let mut req = chicken();
        req.current_stock = -1.0;
        let err = inventory.execute(req).expect_err("negative");
        assert!(matches!(
            err.downcast_ref::<InventoryError>(),
            Some(InventoryError::InvalidStock)
        ));
    }

    #[test]
    fn update_recomputes_status() {
        let inventory = inventory();
        let item = inventory.execute(chicken()).expect("create");

        let updated = inventory
            .execute(UpdateInventoryItem {
                id: item.meta.id,
                patch: InventoryItemPatch {
                    current_stock: Some(2.0),
                    ..Default::default()
                },
            })
            .expect("update");
        assert_eq!(StockStatus::Critical, updated.status);
    }

    #[test]
    fn delete_then_get_reports_not_found() {
        let inventory = inventory();
        let item = inventory.execute(chicken()).expect("create");

        inventory
            .execute(DeleteInventoryItem { id: item.meta.id })
            .expect("delete");

        let err = inventory
            .query(GetInventoryItem { id: item.meta.id })
            .expect_err("gone");
        assert!(matches!(
            err.downcast_ref::<InventoryError>(),
            Some(InventoryError::NotFound)
        ));
    }

    #[test]
    fn restock_appends_history() {
        let inventory = inventory();
        let mut req = chicken();
        req.current_stock = 0.0;
        let item = inventory.execute(req).expect("create");
        assert_eq!(StockStatus::Out, item.status);

        let restocked = inventory
            .execute(Restock {
                id: item.meta.id,
                quantity: 15.0,
                unit_cost: 17_000,
                notes: Some("weekly delivery".to_string()),
            })
            .expect("restock");
        assert_eq!(15.0, restocked.current_stock);
        assert_eq!(StockStatus::Sufficient, restocked.status);
        assert_eq!(1, restocked.restock_history.len());
    }

    #[test]
    fn restock_rejects_nonpositive_quantity() {
        let inventory = inventory();
        let item = inventory.execute(chicken()).expect("create");

        let err = inventory
            .execute(Restock {
                id: item.meta.id,
                quantity: 0.0,
                unit_cost: 17_000,
                notes: None,
            })
            .expect_err("zero quantity");
        assert!(matches!(
            err.downcast_ref::<InventoryError>(),
            Some(InventoryError::InvalidQuantity)
        ));
    }

    #[test]
    fn list_filters_combine() {
        let inventory = inventory();
        inventory.execute(chicken()).expect("create");
        inventory
            .execute(CreateInventoryItem {
                name: "Jasmine Rice".to_string(),
                category: InventoryCategory::RiceGrains,
                unit: "kg".to_string(),
                current_stock: 3.0,
                min_stock: 25.0,
                unit_cost: 5_500,
                supplier: None,
            })
            .expect("create");

        let meat = inventory
            .query(ListInventory {
                category: Some(InventoryCategory::Meat),
                ..Default::default()
            })
            .expect("by category");
        assert_eq!(vec!["Chicken Breast"], names(&meat));

        let critical = inventory
            .query(ListInventory {
                status: Some(StockStatus::Critical),
                ..Default::default()
            })
            .expect("by status");
        assert_eq!(vec!["Jasmine Rice"], names(&critical));

        let searched = inventory
            .query(ListInventory {
                search: Some("rice".to_string()),
                ..Default::default()
            })
            .expect("by search");
        assert_eq!(vec!["Jasmine Rice"], names(&searched));
    }

    #[test]
    fn needs_restock_returns_low_and_worse() {
        let inventory = inventory();
        inventory.execute(chicken()).expect("create");
        inventory
            .execute(CreateInventoryItem {
                name: "Cooking Oil".to_string(),
                category: InventoryCategory::Condiments,
                unit: "L".to_string(),
                current_stock: 4.0,
                min_stock: 10.0,
                unit_cost: 9_000,
                supplier: None,
            })
            .expect("create");

        let needed = inventory.query(NeedsRestock).expect("needs restock");
        assert_eq!(vec!["Cooking Oil"], names(&needed));
    }

    #[test]
    fn summary_counts_statuses_and_value() {
        let inventory = inventory();
        inventory.execute(chicken()).expect("create");
        inventory
            .execute(CreateInventoryItem {
                name: "Calamansi".to_string(),
                category: InventoryCategory::Vegetables,
                unit: "kg".to_string(),
                current_stock: 0.0,
                min_stock: 5.0,
                unit_cost: 8_000,
                supplier: None,
            })
            .expect("create");

        let summary = inventory.query(InventorySummary).expect("summary");
        assert_eq!(
            Summary {
                total_items: 2,
                sufficient: 1,
                low: 0,
                critical: 0,
                out: 1,
                total_value: 360_000,
            },
            summary
        );
    }

    fn names(items: &[InventoryItem]) -> Vec<&str> {
        items.iter().map(|item| item.name.as_str()).collect()
    }
}
