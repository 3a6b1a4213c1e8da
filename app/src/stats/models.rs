use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id};

use crate::menu::{MenuCategory, MenuItem};
use crate::orders::{Order, OrderType, PaymentMethod};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentBreakdown {
    pub count: u64,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    /// Items at low or critical stock (but not yet out).
    pub low: u64,
    pub out: u64,
    /// Stock value on hand, in centavos.
    pub total_value: i64,
}

/// Per-day sales aggregate, folded forward on each order. Derived data: the
/// orders themselves stay authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    #[serde(flatten)]
    pub meta: DocMeta<DailyStats>,
    pub day: NaiveDate,
    pub orders: u64,
    pub revenue: i64,
    pub items_sold: u64,
    pub dine_in: u64,
    pub take_out: u64,
    pub cash: PaymentBreakdown,
    pub gcash: PaymentBreakdown,
    /// Revenue by menu category name.
    #[serde(default)]
    pub category_revenue: BTreeMap<String, i64>,
    /// Units sold by item name.
    #[serde(default)]
    pub product_sales: BTreeMap<String, u64>,
    #[serde(default)]
    pub inventory: InventorySnapshot,
    pub updated_at: DateTime<Utc>,
}

impl Entity for DailyStats {
    const PREFIX: &'static str = "daily-stats";
}

impl HasMeta for DailyStats {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

impl DailyStats {
    pub fn id_for(day: NaiveDate) -> Id<DailyStats> {
        Id::hashed(&format!("daily-stats/{}", day))
    }

    pub fn new(day: NaiveDate) -> Self {
        DailyStats {
            meta: DocMeta::new_with_id(Self::id_for(day)),
            day,
            orders: 0,
            revenue: 0,
            items_sold: 0,
            dine_in: 0,
            take_out: 0,
            cash: PaymentBreakdown::default(),
            gcash: PaymentBreakdown::default(),
            category_revenue: BTreeMap::new(),
            product_sales: BTreeMap::new(),
            inventory: InventorySnapshot::default(),
            updated_at: Utc::now(),
        }
    }

    /// Folds one order into the day's totals. `categories` maps the order's
    /// menu items to their category, for revenue attribution; lines that
    /// cannot be attributed still count towards the overall numbers.
    pub fn apply(&mut self, order: &Order, categories: &HashMap<Id<MenuItem>, MenuCategory>) {
        self.orders += 1;
        self.revenue += order.total;
        self.items_sold += order.items_sold();
        match order.order_type {
            OrderType::DineIn => self.dine_in += 1,
            OrderType::TakeOut => self.take_out += 1,
        }
        let payment = match order.payment.method {
            PaymentMethod::Cash => &mut self.cash,
            PaymentMethod::Gcash => &mut self.gcash,
        };
        payment.count += 1;
        payment.amount += order.total;

        for line in &order.items {
            *self.product_sales.entry(line.name.clone()).or_default() +=
                u64::from(line.quantity);
            if let Some(category) = line.menu_item_id.as_ref().and_then(|id| categories.get(id)) {
                *self
                    .category_revenue
                    .entry(category.as_str().to_string())
                    .or_default() += line.line_total();
            }
        }
        self.updated_at = Utc::now();
    }

    /// Undoes [`apply`](Self::apply) for a cancelled order. Counts saturate
    /// at zero in case the original fold never landed.
    pub fn retract(&mut self, order: &Order, categories: &HashMap<Id<MenuItem>, MenuCategory>) {
        self.orders = self.orders.saturating_sub(1);
        self.revenue -= order.total;
        self.items_sold = self.items_sold.saturating_sub(order.items_sold());
        match order.order_type {
            OrderType::DineIn => self.dine_in = self.dine_in.saturating_sub(1),
            OrderType::TakeOut => self.take_out = self.take_out.saturating_sub(1),
        }
        let payment = match order.payment.method {
            PaymentMethod::Cash => &mut self.cash,
            PaymentMethod::Gcash => &mut self.gcash,
        };
        payment.count = payment.count.saturating_sub(1);
        payment.amount -= order.total;

        for line in &order.items {
            if let Some(sold) = self.product_sales.get_mut(&line.name) {
                *sold = sold.saturating_sub(u64::from(line.quantity));
            }
            if let Some(category) = line.menu_item_id.as_ref().and_then(|id| categories.get(id)) {
                if let Some(revenue) = self.category_revenue.get_mut(category.as_str()) {
                    *revenue -= line.line_total();
                }
            }
        }
        self.product_sales.retain(|_, sold| *sold > 0);
        self.category_revenue.retain(|_, revenue| *revenue != 0);
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::orders::{LineItem, OrderStatus, Payment, PaymentStatus};
    use maplit::hashmap;

    fn an_order(total: i64, method: PaymentMethod, order_type: OrderType) -> Order {
        Order {
            meta: DocMeta::new_with_id(rand::random()),
            order_number: "ORD-20240309-001".to_string(),
            items: vec![LineItem {
                menu_item_id: Some(Id::hashed(&"adobo")),
                name: "Chicken Adobo".to_string(),
                price: total,
                quantity: 1,
            }],
            subtotal: total,
            tax: 0,
            total,
            payment: Payment {
                method,
                amount_paid: total,
                change: 0,
                status: PaymentStatus::Completed,
            },
            order_type,
            status: OrderStatus::Pending,
            notes: None,
            customer_name: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn apply_folds_in_totals_and_splits() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 9).expect("date");
        let mut stats = DailyStats::new(day);
        let categories = hashmap! {
            Id::hashed(&"adobo") => MenuCategory::RiceMeals,
        };

        stats.apply(
            &an_order(16_000, PaymentMethod::Cash, OrderType::DineIn),
            &categories,
        );
        stats.apply(
            &an_order(4_500, PaymentMethod::Gcash, OrderType::TakeOut),
            &categories,
        );

        assert_eq!(2, stats.orders);
        assert_eq!(20_500, stats.revenue);
        assert_eq!(2, stats.items_sold);
        assert_eq!(1, stats.dine_in);
        assert_eq!(1, stats.take_out);
        assert_eq!(
            PaymentBreakdown {
                count: 1,
                amount: 16_000
            },
            stats.cash
        );
        assert_eq!(
            PaymentBreakdown {
                count: 1,
                amount: 4_500
            },
            stats.gcash
        );
        assert_eq!(Some(&20_500), stats.category_revenue.get("Rice Meals"));
        assert_eq!(Some(&2), stats.product_sales.get("Chicken Adobo"));
    }

    #[test]
    fn unattributed_lines_still_count() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 9).expect("date");
        let mut stats = DailyStats::new(day);

        let mut order = an_order(16_000, PaymentMethod::Cash, OrderType::DineIn);
        order.items[0].menu_item_id = None;
        stats.apply(&order, &HashMap::new());

        assert_eq!(1, stats.orders);
        assert_eq!(16_000, stats.revenue);
        assert!(stats.category_revenue.is_empty());
        assert_eq!(Some(&1), stats.product_sales.get("Chicken Adobo"));
    }

    #[test]
    fn retract_undoes_a_fold() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 9).expect("date");
        let mut stats = DailyStats::new(day);
        let categories = hashmap! {
            Id::hashed(&"adobo") => MenuCategory::RiceMeals,
        };

        let kept = an_order(16_000, PaymentMethod::Cash, OrderType::DineIn);
        let cancelled = an_order(4_500, PaymentMethod::Gcash, OrderType::TakeOut);
        stats.apply(&kept, &categories);
        stats.apply(&cancelled, &categories);
        stats.retract(&cancelled, &categories);

        assert_eq!(1, stats.orders);
        assert_eq!(16_000, stats.revenue);
        assert_eq!(1, stats.items_sold);
        assert_eq!(0, stats.take_out);
        assert_eq!(PaymentBreakdown::default(), stats.gcash);
        assert_eq!(Some(&16_000), stats.category_revenue.get("Rice Meals"));
        assert_eq!(Some(&1), stats.product_sales.get("Chicken Adobo"));
    }

    #[test]
    fn retract_without_a_fold_saturates_at_zero() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 9).expect("date");
        let mut stats = DailyStats::new(day);

        stats.retract(
            &an_order(16_000, PaymentMethod::Cash, OrderType::DineIn),
            &HashMap::new(),
        );

        assert_eq!(0, stats.orders);
        assert_eq!(-16_000, stats.revenue);
        assert_eq!(0, stats.items_sold);
        assert!(stats.product_sales.is_empty());
    }

    #[test]
    fn ids_are_stable_per_day() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 9).expect("date");
        assert_eq!(DailyStats::id_for(day), DailyStats::id_for(day));
        let other = NaiveDate::from_ymd_opt(2024, 3, 10).expect("date");
        assert_ne!(DailyStats::id_for(day), DailyStats::id_for(other));
    }
}
