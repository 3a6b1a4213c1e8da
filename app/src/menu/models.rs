use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id};

use crate::inventory::InventoryItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MenuCategory {
    #[serde(rename = "Rice Meals")]
    RiceMeals,
    Sizzling,
    Drinks,
    Desserts,
    Sides,
    #[serde(rename = "Add-ons")]
    AddOns,
}

impl MenuCategory {
    pub const ALL: [MenuCategory; 6] = [
        MenuCategory::RiceMeals,
        MenuCategory::Sizzling,
        MenuCategory::Drinks,
        MenuCategory::Desserts,
        MenuCategory::Sides,
        MenuCategory::AddOns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MenuCategory::RiceMeals => "Rice Meals",
            MenuCategory::Sizzling => "Sizzling",
            MenuCategory::Drinks => "Drinks",
            MenuCategory::Desserts => "Desserts",
            MenuCategory::Sides => "Sides",
            MenuCategory::AddOns => "Add-ons",
        }
    }
}

impl std::fmt::Display for MenuCategory {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MenuItemStatus {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    #[serde(flatten)]
    pub meta: DocMeta<MenuItem>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Price in centavos.
    pub price: i64,
    pub category: MenuCategory,
    pub status: MenuItemStatus,
    /// When set, sales of this item draw down the linked stock.
    #[serde(default)]
    pub inventory_id: Option<Id<InventoryItem>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for MenuItem {
    const PREFIX: &'static str = "menu-item";
}

impl HasMeta for MenuItem {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

/// A menu item as the staff ordering screen sees it, with stock flags folded
/// in from the linked inventory item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PosProduct {
    #[serde(flatten)]
    pub item: MenuItem,
    pub is_low_stock: bool,
    pub is_out_of_stock: bool,
}
