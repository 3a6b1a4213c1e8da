use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InventoryCategory {
    Meat,
    Vegetables,
    #[serde(rename = "Rice & Grains")]
    RiceGrains,
    Condiments,
    Beverages,
    Packaging,
    Other,
}

impl InventoryCategory {
    pub const ALL: [InventoryCategory; 7] = [
        InventoryCategory::Meat,
        InventoryCategory::Vegetables,
        InventoryCategory::RiceGrains,
        InventoryCategory::Condiments,
        InventoryCategory::Beverages,
        InventoryCategory::Packaging,
        InventoryCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryCategory::Meat => "Meat",
            InventoryCategory::Vegetables => "Vegetables",
            InventoryCategory::RiceGrains => "Rice & Grains",
            InventoryCategory::Condiments => "Condiments",
            InventoryCategory::Beverages => "Beverages",
            InventoryCategory::Packaging => "Packaging",
            InventoryCategory::Other => "Other",
        }
    }
}

impl std::fmt::Display for InventoryCategory {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{}", self.as_str())
    }
}

/// Derived from current vs minimum stock; never set directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockStatus {
    Out,
    Critical,
    Low,
    Sufficient,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Out => "out",
            StockStatus::Critical => "critical",
            StockStatus::Low => "low",
            StockStatus::Sufficient => "sufficient",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestockEntry {
    pub quantity: f64,
    pub unit_cost: i64,
    #[serde(default)]
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    #[serde(flatten)]
    pub meta: DocMeta<InventoryItem>,
    pub name: String,
    pub category: InventoryCategory,
    /// Unit of measure, e.g. "kg" or "pcs".
    pub unit: String,
    pub current_stock: f64,
    pub min_stock: f64,
    /// Cost per unit, in centavos.
    pub unit_cost: i64,
    #[serde(default)]
    pub supplier: Option<String>,
    pub status: StockStatus,
    #[serde(default)]
    pub restock_history: Vec<RestockEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for InventoryItem {
    const PREFIX: &'static str = "inventory-item";
}

impl HasMeta for InventoryItem {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

impl InventoryItem {
    pub fn derived_status(&self) -> StockStatus {
        if self.current_stock <= 0.0 {
            StockStatus::Out
        } else if self.current_stock <= self.min_stock * 0.3 {
            StockStatus::Critical
        } else if self.current_stock <= self.min_stock * 0.7 {
            StockStatus::Low
        } else {
            StockStatus::Sufficient
        }
    }

    pub fn refresh_status(&mut self) {
        self.status = self.derived_status();
    }

    /// Removes stock for a sale, bottoming out at zero, and reports the
    /// resulting status.
    pub fn consume(&mut self, quantity: f64) -> StockStatus {
        self.current_stock = (self.current_stock - quantity).max(0.0);
        self.refresh_status();
        self.status
    }

    pub fn restock(&mut self, entry: RestockEntry) {
        self.current_stock += entry.quantity;
        self.restock_history.push(entry);
        self.refresh_status();
    }

    pub fn needs_restock(&self) -> bool {
        self.status <= StockStatus::Low
    }

    /// Value of the stock on hand, in centavos.
    pub fn stock_value(&self) -> i64 {
        (self.current_stock * self.unit_cost as f64).round() as i64
    }
}
