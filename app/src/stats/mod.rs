use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use chrono::Utc;
use log::*;
use r2d2::{self, Pool};
use serde::Serialize;

use infra::ids::Id;
use infra::persistence::{ConcurrencyError, Storage};

use crate::inventory::{InventoryItem, StockStatus};
use crate::menu::{MenuCategory, MenuItem};
use crate::orders::{Order, OrderStatus};
use crate::services::{Queryable, Request};

mod models;

pub use models::{DailyStats, InventorySnapshot, PaymentBreakdown};

const MAX_SAVE_ATTEMPTS: usize = 5;
const TOP_PRODUCTS: usize = 10;
const RECENT_ORDERS: usize = 10;

/// Folds a placed order into its day's stats document, retrying through the
/// version guard when another writer gets there first.
pub fn record_order<D: Storage>(
    docs: &mut D,
    order: &Order,
    categories: &HashMap<Id<MenuItem>, MenuCategory>,
) -> Result<DailyStats> {
    let day = order.created_at.date_naive();
    let id = DailyStats::id_for(day);
    for _ in 0..MAX_SAVE_ATTEMPTS {
        let mut stats = docs
            .load::<DailyStats>(&id)?
            .unwrap_or_else(|| DailyStats::new(day));
        stats.apply(order, categories);
        match docs.save(&mut stats) {
            Ok(()) => {
                debug!("Recorded order {} into {}", order.order_number, id);
                return Ok(stats);
            }
            Err(e) if e.is::<ConcurrencyError>() => continue,
            Err(e) => return Err(e),
        }
    }
    Err(ConcurrencyError.into())
}

/// Folds a cancelled order back out of its day's stats document. A missing
/// document means there is nothing to unwind.
pub fn retract_order<D: Storage>(
    docs: &mut D,
    order: &Order,
    categories: &HashMap<Id<MenuItem>, MenuCategory>,
) -> Result<()> {
    let day = order.created_at.date_naive();
    let id = DailyStats::id_for(day);
    for _ in 0..MAX_SAVE_ATTEMPTS {
        let mut stats = match docs.load::<DailyStats>(&id)? {
            Some(stats) => stats,
            None => return Ok(()),
        };
        stats.retract(order, categories);
        match docs.save(&mut stats) {
            Ok(()) => {
                debug!("Retracted order {} from {}", order.order_number, id);
                return Ok(());
            }
            Err(e) if e.is::<ConcurrencyError>() => continue,
            Err(e) => return Err(e),
        }
    }
    Err(ConcurrencyError.into())
}

/// Recomputes today's inventory snapshot from the stock on hand.
pub fn refresh_inventory<D: Storage>(docs: &mut D) -> Result<DailyStats> {
    let snapshot = snapshot_inventory(docs)?;
    let day = Utc::now().date_naive();
    let id = DailyStats::id_for(day);
    for _ in 0..MAX_SAVE_ATTEMPTS {
        let mut stats = docs
            .load::<DailyStats>(&id)?
            .unwrap_or_else(|| DailyStats::new(day));
        stats.inventory = snapshot;
        stats.updated_at = Utc::now();
        match docs.save(&mut stats) {
            Ok(()) => return Ok(stats),
            Err(e) if e.is::<ConcurrencyError>() => continue,
            Err(e) => return Err(e),
        }
    }
    Err(ConcurrencyError.into())
}

fn snapshot_inventory<D: Storage>(docs: &mut D) -> Result<InventorySnapshot> {
    let mut snapshot = InventorySnapshot::default();
    for item in docs.all::<InventoryItem>()? {
        match item.status {
            StockStatus::Out => snapshot.out += 1,
            StockStatus::Critical | StockStatus::Low => snapshot.low += 1,
            StockStatus::Sufficient => {}
        }
        snapshot.total_value += item.stock_value();
    }
    Ok(snapshot)
}

#[derive(Debug)]
pub struct Stats<M: r2d2::ManageConnection> {
    db: Pool<M>,
}

#[derive(Debug, Clone, Copy)]
pub struct DashboardStats;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductSales {
    pub name: String,
    pub quantity: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub total_orders: u64,
    /// Revenue across all non-cancelled orders, in centavos.
    pub total_revenue: i64,
    pub orders_today: u64,
    pub revenue_today: i64,
    pub dine_in_today: u64,
    pub take_out_today: u64,
    pub cash_today: PaymentBreakdown,
    pub gcash_today: PaymentBreakdown,
    pub category_revenue_today: BTreeMap<String, i64>,
    pub top_products: Vec<ProductSales>,
    pub low_stock: u64,
    pub out_of_stock: u64,
    pub recent_orders: Vec<Order>,
}

impl Request for DashboardStats {
    type Resp = Dashboard;
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Stats<M> {
    pub fn new(db: Pool<M>) -> Self {
        Stats { db }
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Queryable<DashboardStats> for Stats<M>
{
    fn query(&self, _req: DashboardStats) -> Result<Dashboard> {
        let mut docs = self.db.get()?;

        let mut orders = docs.all::<Order>()?;
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let live = orders
            .iter()
            .filter(|o| o.status != OrderStatus::Cancelled)
            .collect::<Vec<_>>();
        let total_orders = live.len() as u64;
        let total_revenue = live.iter().map(|o| o.total).sum();

        let today = docs
            .load::<DailyStats>(&DailyStats::id_for(Utc::now().date_naive()))?
            .unwrap_or_else(|| DailyStats::new(Utc::now().date_naive()));

        let mut sales: BTreeMap<String, u64> = BTreeMap::new();
        for day in docs.all::<DailyStats>()? {
            for (name, quantity) in day.product_sales {
                *sales.entry(name).or_default() += quantity;
            }
        }
        let mut top_products = sales
            .into_iter()
            .map(|(name, quantity)| ProductSales { name, quantity })
            .collect::<Vec<_>>();
        top_products.sort_by(|a, b| b.quantity.cmp(&a.quantity).then(a.name.cmp(&b.name)));
        top_products.truncate(TOP_PRODUCTS);

        let stock = snapshot_inventory(&mut *docs)?;
        let out_of_stock = stock.out;
        let low_stock = stock.low;

        orders.truncate(RECENT_ORDERS);

        Ok(Dashboard {
            total_orders,
            total_revenue,
            orders_today: today.orders,
            revenue_today: today.revenue,
            dine_in_today: today.dine_in,
            take_out_today: today.take_out,
            cash_today: today.cash,
            gcash_today: today.gcash,
            category_revenue_today: today.category_revenue,
            top_products,
            low_stock,
            out_of_stock,
            recent_orders: orders,
        })
    }
}
