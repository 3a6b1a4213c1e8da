//! Live notification fan-out for the admin dashboard.
//!
//! Delivery is best-effort: no subscribers, slow subscribers, and lagged
//! subscribers all just drop notices. Nothing is persisted or retried.

use log::*;
use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    Connected {
        message: String,
    },
    NewOrder {
        data: NewOrderData,
        message: String,
    },
    LowStockAlert {
        data: LowStockData,
        message: String,
    },
    StatsUpdate {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewOrderData {
    pub order_number: String,
    pub total: i64,
    pub order_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LowStockData {
    pub name: String,
    pub current_stock: f64,
    pub status: String,
}

impl Notice {
    pub fn connected() -> Self {
        Notice::Connected {
            message: "Connected to live updates".to_string(),
        }
    }

    pub fn new_order(order_number: &str, total: i64, order_type: &str) -> Self {
        Notice::NewOrder {
            data: NewOrderData {
                order_number: order_number.to_string(),
                total,
                order_type: order_type.to_string(),
            },
            message: format!("New order {}", order_number),
        }
    }

    pub fn low_stock(name: &str, current_stock: f64, status: &str) -> Self {
        Notice::LowStockAlert {
            data: LowStockData {
                name: name.to_string(),
                current_stock,
                status: status.to_string(),
            },
            message: format!("{} is running low", name),
        }
    }

    pub fn stats_update() -> Self {
        Notice::StatsUpdate {
            message: "Sales stats changed".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<Notice>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        EventHub { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn publish(&self, notice: Notice) {
        match self.tx.send(notice) {
            Ok(n) => debug!("Notified {} subscribers", n),
            Err(_) => trace!("No subscribers; notice dropped"),
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
