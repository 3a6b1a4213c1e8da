use std::collections::HashMap;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use log::*;
use r2d2::{self, Pool};
use rand::prelude::*;
use serde::Deserialize;
use thiserror::Error;

use infra::documents::DocMeta;
use infra::ids::Id;
use infra::persistence::{ConcurrencyError, Storage};

use crate::events::{EventHub, Notice};
use crate::inventory::InventoryItem;
use crate::menu::{MenuCategory, MenuItem};
use crate::services::{Commandable, Queryable, Request};
use crate::stats;

mod models;

pub use models::{
    format_order_number, Counter, LineItem, Order, OrderStatus, OrderType, Payment, PaymentMethod,
    PaymentStatus,
};

/// Attempts before giving up on a contended counter or stock document.
const MAX_SAVE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Error)]
pub enum OrderError {
    #[error("an order needs at least one item")]
    EmptyOrder,
    #[error("line quantities must be positive")]
    ZeroQuantity,
    #[error("order totals must be positive")]
    InvalidTotals,
    #[error("subtotal and tax must add up to the total")]
    TotalMismatch,
    #[error("amount paid does not cover the total")]
    InsufficientPayment,
    #[error("order not found")]
    NotFound,
    #[error("order is already closed")]
    AlreadyClosed,
    #[error("could not allocate an order number")]
    SequenceContention,
}

#[derive(Debug)]
pub struct Orders<M: r2d2::ManageConnection> {
    db: Pool<M>,
    events: EventHub,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineItemDraft {
    #[serde(default)]
    pub menu_item_id: Option<Id<MenuItem>>,
    pub name: String,
    pub price: i64,
    pub quantity: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrder {
    pub items: Vec<LineItemDraft>,
    pub subtotal: i64,
    pub tax: i64,
    pub total: i64,
    pub payment_method: PaymentMethod,
    pub amount_paid: i64,
    pub order_type: OrderType,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GetOrder {
    pub id: Id<Order>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListOrders {
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub today: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SetOrderStatus {
    pub id: Id<Order>,
    pub status: OrderStatus,
}

#[derive(Debug, Clone)]
pub struct CancelOrder {
    pub id: Id<Order>,
}

impl Request for PlaceOrder {
    type Resp = Order;
}
impl Request for GetOrder {
    type Resp = Order;
}
impl Request for ListOrders {
    type Resp = Vec<Order>;
}
impl Request for SetOrderStatus {
    type Resp = Order;
}
impl Request for CancelOrder {
    type Resp = Order;
}

impl PlaceOrder {
    fn validate(&self) -> Result<(), OrderError> {
        if self.items.is_empty() {
            return Err(OrderError::EmptyOrder);
        }
        if self.items.iter().any(|l| l.quantity == 0) {
            return Err(OrderError::ZeroQuantity);
        }
        if self.total <= 0 || self.subtotal < 0 || self.tax < 0 {
            return Err(OrderError::InvalidTotals);
        }
        if self.subtotal + self.tax != self.total {
            return Err(OrderError::TotalMismatch);
        }
        if self.amount_paid < self.total {
            return Err(OrderError::InsufficientPayment);
        }
        Ok(())
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Orders<M> {
    pub fn new(db: Pool<M>, events: EventHub) -> Self {
        Orders { db, events }
    }

    fn load_order(docs: &mut D, id: &Id<Order>) -> Result<Order> {
        Ok(docs.load(id)?.ok_or(OrderError::NotFound)?)
    }

    /// Post-payment bookkeeping: stock draw-down, then stats. Failures here
    /// leave the placed order standing.
    fn order_side_effects(&self, docs: &mut D, order: &Order) -> Result<()> {
        let mut categories: HashMap<Id<MenuItem>, MenuCategory> = HashMap::new();
        for line in &order.items {
            let menu_item_id = match line.menu_item_id {
                Some(id) => id,
                None => continue,
            };
            let item: MenuItem = match docs.load(&menu_item_id)? {
                Some(item) => item,
                None => {
                    warn!("Order {} sold unknown item {}", order.order_number, menu_item_id);
                    continue;
                }
            };
            categories.insert(menu_item_id, item.category);
            if let Some(inventory_id) = item.inventory_id {
                self.draw_down(docs, &inventory_id, f64::from(line.quantity))?;
            }
        }
        stats::record_order(docs, order, &categories)?;
        stats::refresh_inventory(docs)?;
        self.events.publish(Notice::stats_update());
        Ok(())
    }

    /// Folds a cancelled order back out of the daily stats.
    fn unwind_stats(&self, docs: &mut D, order: &Order) -> Result<()> {
        let mut categories: HashMap<Id<MenuItem>, MenuCategory> = HashMap::new();
        for line in &order.items {
            if let Some(menu_item_id) = line.menu_item_id {
                if let Some(item) = docs.load::<MenuItem>(&menu_item_id)? {
                    categories.insert(menu_item_id, item.category);
                }
            }
        }
        stats::retract_order(docs, order, &categories)
    }

    fn draw_down(&self, docs: &mut D, id: &Id<InventoryItem>, quantity: f64) -> Result<()> {
        for _ in 0..MAX_SAVE_ATTEMPTS {
            let mut item = match docs.load::<InventoryItem>(id)? {
                Some(item) => item,
                None => return Ok(()),
            };
            let status = item.consume(quantity);
            item.updated_at = Utc::now();
            match docs.save(&mut item) {
                Ok(()) => {
                    if item.needs_restock() {
                        warn!("{} is {} after sale", item.name, status.as_str());
                        self.events.publish(Notice::low_stock(
                            &item.name,
                            item.current_stock,
                            status.as_str(),
                        ));
                    }
                    return Ok(());
                }
                Err(e) if e.is::<ConcurrencyError>() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(ConcurrencyError.into())
    }
}

fn next_order_number<D: Storage>(docs: &mut D, day: NaiveDate) -> Result<String> {
    let id = Counter::id_for(day);
    for _ in 0..MAX_SAVE_ATTEMPTS {
        let mut counter = docs.load::<Counter>(&id)?.unwrap_or_else(|| Counter::new(day));
        let seq = counter.advance();
        match docs.save(&mut counter) {
            Ok(()) => return Ok(format_order_number(day, seq)),
            Err(e) if e.is::<ConcurrencyError>() => continue,
            Err(e) => return Err(e),
        }
    }
    Err(OrderError::SequenceContention.into())
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<PlaceOrder> for Orders<M>
{
    fn execute(&self, req: PlaceOrder) -> Result<Order> {
        req.validate()?;
        let mut docs = self.db.get()?;
        let now = Utc::now();
        let order_number = next_order_number(&mut *docs, now.date_naive())?;

        let items = req
            .items
            .into_iter()
            .map(|l| LineItem {
                menu_item_id: l.menu_item_id,
                name: l.name,
                price: l.price,
                quantity: l.quantity,
            })
            .collect::<Vec<_>>();

        let mut order = Order {
            meta: DocMeta::new_with_id(thread_rng().gen()),
            order_number,
            items,
            subtotal: req.subtotal,
            tax: req.tax,
            total: req.total,
            payment: Payment {
                method: req.payment_method,
                amount_paid: req.amount_paid,
                change: req.amount_paid - req.total,
                status: PaymentStatus::Completed,
            },
            order_type: req.order_type,
            status: OrderStatus::Pending,
            notes: req.notes,
            customer_name: req.customer_name,
            created_at: now,
            updated_at: now,
        };
        docs.save(&mut order)?;
        info!("Placed order {} for {}", order.order_number, order.total);

        if let Err(e) = self.order_side_effects(&mut *docs, &order) {
            warn!(
                "Order {} bookkeeping incomplete: {:?}",
                order.order_number, e
            );
        }
        self.events.publish(Notice::new_order(
            &order.order_number,
            order.total,
            order.order_type.as_str(),
        ));
        Ok(order)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<SetOrderStatus> for Orders<M>
{
    fn execute(&self, req: SetOrderStatus) -> Result<Order> {
        let mut docs = self.db.get()?;
        let mut order = Self::load_order(&mut docs, &req.id)?;
        if order.status.is_closed() {
            return Err(OrderError::AlreadyClosed.into());
        }
        order.status = req.status;
        order.updated_at = Utc::now();
        docs.save(&mut order)?;
        info!("Order {} is now {:?}", order.order_number, order.status);
        if order.status == OrderStatus::Cancelled {
            if let Err(e) = self.unwind_stats(&mut docs, &order) {
                warn!(
                    "Order {} cancellation bookkeeping incomplete: {:?}",
                    order.order_number, e
                );
            } else {
                self.events.publish(Notice::stats_update());
            }
        }
        Ok(order)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static>
    Commandable<CancelOrder> for Orders<M>
{
    fn execute(&self, req: CancelOrder) -> Result<Order> {
        Commandable::<SetOrderStatus>::execute(
            self,
            SetOrderStatus {
                id: req.id,
                status: OrderStatus::Cancelled,
            },
        )
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<GetOrder>
    for Orders<M>
{
    fn query(&self, req: GetOrder) -> Result<Order> {
        let mut docs = self.db.get()?;
        Self::load_order(&mut docs, &req.id)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Queryable<ListOrders>
    for Orders<M>
{
    fn query(&self, req: ListOrders) -> Result<Vec<Order>> {
        let mut docs = self.db.get()?;
        let today = Utc::now().date_naive();
        let mut orders = docs
            .all::<Order>()?
            .into_iter()
            .filter(|o| req.status.map_or(true, |s| o.status == s))
            .filter(|o| !req.today || o.created_at.date_naive() == today)
            .collect::<Vec<_>>();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = req.limit {
            orders.truncate(limit);
        }
        Ok(orders)
    }
}
