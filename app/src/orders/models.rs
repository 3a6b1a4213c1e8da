use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id};

use crate::menu::MenuItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Gcash,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Gcash => "gcash",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    DineIn,
    TakeOut,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::DineIn => "dine_in",
            OrderType::TakeOut => "take_out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Preparing,
    Ready,
    Served,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Closed orders cannot change status any further.
    pub fn is_closed(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Menu items can be deleted after the fact, so each line snapshots the
    /// name and price it was sold at.
    #[serde(default)]
    pub menu_item_id: Option<Id<MenuItem>>,
    pub name: String,
    /// Unit price in centavos.
    pub price: i64,
    pub quantity: u32,
}

impl LineItem {
    pub fn line_total(&self) -> i64 {
        self.price * i64::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub method: PaymentMethod,
    pub amount_paid: i64,
    pub change: i64,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(flatten)]
    pub meta: DocMeta<Order>,
    pub order_number: String,
    pub items: Vec<LineItem>,
    pub subtotal: i64,
    pub tax: i64,
    pub total: i64,
    pub payment: Payment,
    pub order_type: OrderType,
    pub status: OrderStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Order {
    const PREFIX: &'static str = "order";
}

impl HasMeta for Order {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

impl Order {
    pub fn items_sold(&self) -> u64 {
        self.items.iter().map(|l| u64::from(l.quantity)).sum()
    }
}

/// Per-day order number sequence; advanced under the store's version guard
/// so concurrent orders never share a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    #[serde(flatten)]
    pub meta: DocMeta<Counter>,
    pub day: NaiveDate,
    pub next: u32,
}

impl Entity for Counter {
    const PREFIX: &'static str = "counter";
}

impl HasMeta for Counter {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

impl Counter {
    pub fn id_for(day: NaiveDate) -> infra::ids::Id<Counter> {
        infra::ids::Id::hashed(&format!("order-counter/{}", day))
    }

    pub fn new(day: NaiveDate) -> Self {
        Counter {
            meta: DocMeta::new_with_id(Self::id_for(day)),
            day,
            next: 1,
        }
    }

    /// Takes the next sequence number for the day.
    pub fn advance(&mut self) -> u32 {
        let seq = self.next;
        self.next += 1;
        seq
    }
}

pub fn format_order_number(day: NaiveDate, seq: u32) -> String {
    format!("ORD-{}-{:03}", day.format("%Y%m%d"), seq)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn order_numbers_embed_date_and_padded_sequence() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 9).expect("date");
        assert_eq!("ORD-20240309-001", format_order_number(day, 1));
        assert_eq!("ORD-20240309-042", format_order_number(day, 42));
        assert_eq!("ORD-20240309-1234", format_order_number(day, 1234));
    }

    #[test]
    fn counter_advances_sequentially() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 9).expect("date");
        let mut counter = Counter::new(day);
        assert_eq!(1, counter.advance());
        assert_eq!(2, counter.advance());
        assert_eq!(3, counter.next);
    }

    #[test]
    fn counters_for_different_days_have_different_ids() {
        let a = Counter::id_for(NaiveDate::from_ymd_opt(2024, 3, 9).expect("date"));
        let b = Counter::id_for(NaiveDate::from_ymd_opt(2024, 3, 10).expect("date"));
        assert_ne!(a, b);
    }

    #[test]
    fn closed_statuses() {
        assert!(OrderStatus::Completed.is_closed());
        assert!(OrderStatus::Cancelled.is_closed());
        assert!(!OrderStatus::Ready.is_closed());
    }

    #[test]
    fn line_totals_multiply_out() {
        let line = LineItem {
            menu_item_id: None,
            name: "Extra Rice".to_string(),
            price: 2_500,
            quantity: 3,
        };
        assert_eq!(7_500, line.line_total());
    }
}
