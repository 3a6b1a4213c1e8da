use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use log::*;
use r2d2::{self, Pool};
use rand::prelude::*;
use serde::Deserialize;
use thiserror::Error;

use infra::documents::DocMeta;
use infra::ids::Id;
use infra::persistence::Storage;

use crate::inventory::{InventoryItem, StockStatus};
use crate::services::{Commandable, Queryable, Request};

mod models;

pub use models::{MenuCategory, MenuItem, MenuItemStatus, PosProduct};

const DEFAULT_MENU: &[(&str, &str, i64, MenuCategory)] = &[
    (
        "Tapsilog",
        "Beef tapa, garlic rice, fried egg",
        15_000,
        MenuCategory::RiceMeals,
    ),
    (
        "Chicken Adobo",
        "Braised in soy and vinegar, with rice",
        16_000,
        MenuCategory::RiceMeals,
    ),
    (
        "Sizzling Sisig",
        "Chopped pork on a hot plate",
        19_500,
        MenuCategory::Sizzling,
    ),
    ("Iced Tea", "House blend, 16oz", 4_500, MenuCategory::Drinks),
    ("Halo-Halo", "Shaved ice, mixed sweets", 12_000, MenuCategory::Desserts),
    ("Extra Rice", "", 2_500, MenuCategory::AddOns),
];

#[derive(Debug, Clone, Error)]
pub enum MenuError {
    #[error("menu item not found")]
    NotFound,
    #[error("a menu item named {0:?} already exists")]
    DuplicateName(String),
    #[error("price must be positive")]
    InvalidPrice,
}

#[derive(Debug)]
pub struct MenuItems<M: r2d2::ManageConnection> {
    db: Pool<M>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMenuItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: i64,
    pub category: MenuCategory,
    #[serde(default)]
    pub inventory_id: Option<Id<InventoryItem>>,
    #[serde(default)]
    pub status: Option<MenuItemStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MenuItemPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub category: Option<MenuCategory>,
    /// Absent leaves the link alone; an explicit `null` clears it.
    #[serde(default, deserialize_with = "double_option")]
    pub inventory_id: Option<Option<Id<InventoryItem>>>,
}

fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    serde::Deserialize::deserialize(de).map(Some)
}

#[derive(Debug, Clone)]
pub struct UpdateMenuItem {
    pub id: Id<MenuItem>,
    pub patch: MenuItemPatch,
}

#[derive(Debug, Clone)]
pub struct SetMenuItemStatus {
    pub id: Id<MenuItem>,
    pub status: MenuItemStatus,
}

#[derive(Debug, Clone)]
pub struct DeleteMenuItem {
    pub id: Id<MenuItem>,
}

#[derive(Debug, Clone)]
pub struct GetMenuItem {
    pub id: Id<MenuItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListMenu {
    pub category: Option<MenuCategory>,
    pub status: Option<MenuItemStatus>,
    #[serde(rename = "q")]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ListCategories;

/// Available items with stock flags, for the staff ordering screen.
#[derive(Debug, Clone, Copy)]
pub struct ListPosProducts;

impl Request for CreateMenuItem {
    type Resp = MenuItem;
}
impl Request for UpdateMenuItem {
    type Resp = MenuItem;
}
impl Request for SetMenuItemStatus {
    type Resp = MenuItem;
}
impl Request for DeleteMenuItem {
    type Resp = ();
}
impl Request for GetMenuItem {
    type Resp = MenuItem;
}
impl Request for ListMenu {
    type Resp = Vec<MenuItem>;
}
impl Request for ListCategories {
    type Resp = Vec<String>;
}
impl Request for ListPosProducts {
    type Resp = Vec<PosProduct>;
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> MenuItems<M> {
    pub fn new(db: Pool<M>) -> Self {
        MenuItems { db }
    }

    /// Seeds the default menu on an empty store.
    pub fn setup(&self) -> Result<()> {
        let mut docs = self.db.get()?;
        if !docs.all::<MenuItem>()?.is_empty() {
            debug!("Menu already populated");
            return Ok(());
        }
        info!("Seeding default menu");
        for &(name, description, price, category) in DEFAULT_MENU {
            let now = Utc::now();
            let mut item = MenuItem {
                meta: DocMeta::new_with_id(Id::hashed(&name)),
                name: name.to_string(),
                description: description.to_string(),
                price,
                category,
                status: MenuItemStatus::Available,
                inventory_id: None,
                created_at: now,
                updated_at: now,
            };
            docs.save(&mut item)?;
        }
        Ok(())
    }

    fn load_item(docs: &mut D, id: &Id<MenuItem>) -> Result<MenuItem> {
        Ok(docs.load(id)?.ok_or(MenuError::NotFound)?)
    }

    fn check_name_free(docs: &mut D, name: &str, but: Option<&Id<MenuItem>>) -> Result<()> {
        let taken = docs
            .all::<MenuItem>()?
            .into_iter()
            .filter(|item| Some(&item.meta.id) != but)
            .any(|item| item.name.eq_ignore_ascii_case(name));
        if taken {
            return Err(MenuError::DuplicateName(name.to_string()).into());
        }
        Ok(())
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<CreateMenuItem> for MenuItems<M>
{
    fn execute(&self, req: CreateMenuItem) -> Result<MenuItem> {
        if req.price <= 0 {
            return Err(MenuError::InvalidPrice.into());
        }
        let mut docs = self.db.get()?;
        Self::check_name_free(&mut docs, &req.name, None)?;

        let now = Utc::now();
        let mut item = MenuItem {
            meta: DocMeta::new_with_id(thread_rng().gen()),
            name: req.name,
            description: req.description,
            price: req.price,
            category: req.category,
            status: req.status.unwrap_or(MenuItemStatus::Available),
            inventory_id: req.inventory_id,
            created_at: now,
            updated_at: now,
        };
        docs.save(&mut item)?;
        info!("Added menu item {}: {}", item.meta.id, item.name);
        Ok(item)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<UpdateMenuItem> for MenuItems<M>
{
    fn execute(&self, req: UpdateMenuItem) -> Result<MenuItem> {
        let UpdateMenuItem { id, patch } = req;
        let mut docs = self.db.get()?;
        let mut item = Self::load_item(&mut docs, &id)?;

        if let Some(name) = patch.name {
            if !name.eq_ignore_ascii_case(&item.name) {
                Self::check_name_free(&mut docs, &name, Some(&id))?;
            }
            item.name = name;
        }
        if let Some(description) = patch.description {
            item.description = description;
        }
        if let Some(price) = patch.price {
            if price <= 0 {
                return Err(MenuError::InvalidPrice.into());
            }
            item.price = price;
        }
        if let Some(category) = patch.category {
            item.category = category;
        }
        if let Some(link) = patch.inventory_id {
            item.inventory_id = link;
        }
        item.updated_at = Utc::now();
        docs.save(&mut item)?;
        Ok(item)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<SetMenuItemStatus> for MenuItems<M>
{
    fn execute(&self, req: SetMenuItemStatus) -> Result<MenuItem> {
        let mut docs = self.db.get()?;
        let mut item = Self::load_item(&mut docs, &req.id)?;
        item.status = req.status;
        item.updated_at = Utc::now();
        docs.save(&mut item)?;
        Ok(item)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<DeleteMenuItem> for MenuItems<M>
{
    fn execute(&self, req: DeleteMenuItem) -> Result<()> {
        let mut docs = self.db.get()?;
        if !docs.delete(&req.id)? {
            return Err(MenuError::NotFound.into());
        }
        info!("Removed menu item {}", req.id);
        Ok(())
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<GetMenuItem> for MenuItems<M>
{
    fn query(&self, req: GetMenuItem) -> Result<MenuItem> {
        let mut docs = self.db.get()?;
        Self::load_item(&mut docs, &req.id)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<ListMenu>
    for MenuItems<M>
{
    fn query(&self, req: ListMenu) -> Result<Vec<MenuItem>> {
        let mut docs = self.db.get()?;
        let needle = req.search.as_deref().map(|s| s.to_lowercase());
        let mut items = docs
            .all::<MenuItem>()?
            .into_iter()
            .filter(|item| req.category.map_or(true, |c| item.category == c))
            .filter(|item| req.status.map_or(true, |s| item.status == s))
            .filter(|item| {
                needle.as_deref().map_or(true, |q| {
                    item.name.to_lowercase().contains(q)
                        || item.description.to_lowercase().contains(q)
                })
            })
            .collect::<Vec<_>>();
        items.sort_by(|a, b| (a.category, &a.name).cmp(&(b.category, &b.name)));
        Ok(items)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<ListCategories> for MenuItems<M>
{
    fn query(&self, _req: ListCategories) -> Result<Vec<String>> {
        Ok(MenuCategory::ALL
            .iter()
            .map(|c| c.as_str().to_string())
            .collect())
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<ListPosProducts> for MenuItems<M>
{
    fn query(&self, _req: ListPosProducts) -> Result<Vec<PosProduct>> {
        let mut docs = self.db.get()?;
        let stock = docs
            .all::<InventoryItem>()?
            .into_iter()
            .map(|item| (item.meta.id, item.status))
            .collect::<HashMap<_, _>>();

        let mut products = docs
            .all::<MenuItem>()?
            .into_iter()
            .filter(|item| item.status == MenuItemStatus::Available)
            .map(|item| {
                let status = item.inventory_id.as_ref().and_then(|id| stock.get(id));
                PosProduct {
                    is_low_stock: status
                        .map_or(false, |&s| s > StockStatus::Out && s <= StockStatus::Low),
                    is_out_of_stock: status.map_or(false, |&s| s == StockStatus::Out),
                    item,
                }
            })
            .collect::<Vec<_>>();
        products.sort_by(|a, b| (a.item.category, &a.item.name).cmp(&(b.item.category, &b.item.name)));
        Ok(products)
    }
}
