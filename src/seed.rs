//! Deterministic sample orders for demos and tests.

use crate::order::{
    Channel, Customer, CustomerProfile, Geo, LineItem, Money, OrderBody, OrderRecord, OrderStatus,
    Risk, TimelineEntry,
};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

pub const COUNTRIES: [&str; 5] = ["US", "DE", "FR", "GB", "PL"];
pub const SEGMENTS: [&str; 3] = ["retail", "smb", "enterprise"];
/// How far back generated orders reach
pub const HISTORY_DAYS: i64 = 180;

const CUSTOMERS: u32 = 200;
const SKU_CATALOG: u32 = 40;

fn currency(country: &str) -> &'static str {
    match country {
        "US" => "USD",
        "GB" => "GBP",
        "PL" => "PLN",
        _ => "EUR",
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn generate_item(rng: &mut StdRng) -> LineItem {
    let sku = format!("SKU-{:03}", rng.gen_range(1..=SKU_CATALOG));
    let unit_price = round_cents(rng.gen_range(5.0..250.0));
    let discount = rng.gen_range(0.0..0.2);
    LineItem {
        sku,
        quantity: rng.gen_range(1..=5),
        unit_price,
        net_unit_price: round_cents(unit_price * (1.0 - discount)),
    }
}

fn generate_order(rng: &mut StdRng, index: usize, now: DateTime<Utc>) -> OrderRecord {
    let customer = rng.gen_range(1..=CUSTOMERS);
    let country = COUNTRIES.choose(rng).copied().unwrap_or("US");
    let segment = SEGMENTS.choose(rng).copied().unwrap_or("retail");
    let status = OrderStatus::ALL.choose(rng).copied().unwrap_or(OrderStatus::New);
    let channel = Channel::ALL.choose(rng).copied().unwrap_or(Channel::Web);

    let age = Duration::seconds(rng.gen_range(0..HISTORY_DAYS * 24 * 60 * 60));
    let created_at = now - age;

    let items: Vec<LineItem> = (0..rng.gen_range(1..=4))
        .map(|_| generate_item(rng))
        .collect();
    let amount = round_cents(
        items
            .iter()
            .map(|item| f64::from(item.quantity) * item.unit_price)
            .sum(),
    );

    let (status_changed_at, timeline) = if status == OrderStatus::New {
        (None, Vec::new())
    } else {
        let changed_at = created_at + Duration::minutes(rng.gen_range(5..=2 * 24 * 60));
        (
            Some(changed_at),
            vec![TimelineEntry {
                at: changed_at,
                status,
                source: crate::repository::orders::SYSTEM_SOURCE.to_string(),
            }],
        )
    };

    OrderRecord {
        order_id: format!("ORD-{:06}", index + 1),
        customer: Customer {
            id: format!("CUST-{:04}", customer),
            profile: CustomerProfile {
                segment: segment.to_string(),
                geo: Geo {
                    country: country.to_string(),
                },
            },
        },
        order: OrderBody {
            created_at,
            status,
            channel,
            items,
            total: Money {
                amount,
                currency: currency(country).to_string(),
            },
            status_changed_at,
            timeline,
            notes: Vec::new(),
        },
        risk: Risk {
            score: rng.gen_range(1..=100),
        },
    }
}

/// `count` orders created within the last 180 days before `now`.
/// The same `seed` always yields the same orders.
pub fn generate_orders(count: usize, seed: u64, now: DateTime<Utc>) -> Vec<OrderRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count).map(|i| generate_order(&mut rng, i, now)).collect()
}
