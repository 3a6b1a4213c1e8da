use anyhow::{Context, Result};
use log::*;
use r2d2::{ManageConnection, Pool};

use infra::persistence::Storage;

pub mod api;
pub mod config;
pub mod events;
pub mod inventory;
pub mod menu;
pub mod orders;
pub mod services;
pub mod stats;
pub mod users;

#[cfg(test)]
mod test;

/// The whole kitchen: a document store pool plus the notice hub, handing out
/// per-concern services that share both.
#[derive(Debug)]
pub struct Kusina<M: ManageConnection> {
    db: Pool<M>,
    events: events::EventHub,
}

impl<M: ManageConnection> Clone for Kusina<M> {
    fn clone(&self) -> Self {
        Kusina {
            db: self.db.clone(),
            events: self.events.clone(),
        }
    }
}

impl<M: ManageConnection<Connection = D>, D: Storage + Send + 'static> Kusina<M> {
    pub fn new(db: Pool<M>) -> Self {
        Kusina {
            db,
            events: events::EventHub::new(),
        }
    }

    /// Creates the documents table, seeds the menu, and bootstraps the
    /// default accounts. Safe to run repeatedly.
    pub fn setup(&self) -> Result<()> {
        debug!("Init schema");
        self.db.get()?.setup().context("setup persistence")?;
        self.menu().setup().context("seed menu")?;
        self.users().setup().context("bootstrap users")?;
        info!("Setup complete");
        Ok(())
    }

    pub fn menu(&self) -> menu::MenuItems<M> {
        menu::MenuItems::new(self.db.clone())
    }

    pub fn inventory(&self) -> inventory::Inventory<M> {
        inventory::Inventory::new(self.db.clone())
    }

    pub fn orders(&self) -> orders::Orders<M> {
        orders::Orders::new(self.db.clone(), self.events.clone())
    }

    pub fn users(&self) -> users::Users<M> {
        users::Users::new(self.db.clone())
    }

    pub fn stats(&self) -> stats::Stats<M> {
        stats::Stats::new(self.db.clone())
    }

    pub fn events(&self) -> &events::EventHub {
        &self.events
    }

    pub fn router(&self) -> axum::Router {
        info!("Booting kusina");
        api::routes(self.clone())
    }
}
