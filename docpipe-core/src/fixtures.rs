// src/fixtures.rs
// Synthetic order/config dataset generator for tests and benchmarks

use crate::doc;
use crate::document::Document;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const ORDERS_COLLECTION: &str = "orders";
pub const CONFIGS_COLLECTION: &str = "product_configs";

const STATUSES: [&str; 3] = ["PENDING", "PROCESSING", "CANCELLED"];
const PRODUCT_NAMES: [&str; 5] = [
    "Product A",
    "Product B",
    "Product C",
    "Product D",
    "Product E",
];

/// Dataset shape knobs
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    /// Number of order documents
    pub orders: usize,
    /// Number of product configurations (and distinct product ids)
    pub products: usize,
    /// Seed for reproducible datasets; `None` seeds from the OS
    pub seed: Option<u64>,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        FixtureConfig {
            orders: 50,
            products: 5,
            seed: None,
        }
    }
}

/// Generate the orders and product_configs collections.
///
/// Every configuration is enabled with a validity window of
/// `now - 10 days ..= now + 10 days`, and order dates are drawn
/// uniformly from that same window, so match selectivity is governed by
/// status and price rather than dates. Product names are drawn
/// independently of product ids: one name can span several ids and
/// vice versa, which exercises grouping across join keys.
pub fn load_fixtures(
    now: DateTime<Utc>,
    config: &FixtureConfig,
) -> (Vec<Document>, Vec<Document>) {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let start_date = now - Duration::days(10);
    let end_date = now + Duration::days(10);
    let window_secs = (end_date - start_date).num_seconds();

    let mut configs = Vec::with_capacity(config.products);
    for i in 0..config.products {
        configs.push(doc! {
            "productId" => format!("PROD{}", i),
            "configName" => format!("Config{}", i),
            "configValue" => format!("Value{}", i),
            "startDate" => start_date,
            "endDate" => end_date,
            "enabled" => true
        });
    }

    let mut orders = Vec::with_capacity(config.orders);
    for i in 0..config.orders {
        let product_id = format!("PROD{}", rng.random_range(0..config.products));
        let product_name = PRODUCT_NAMES[rng.random_range(0..PRODUCT_NAMES.len())];
        let price = rng.random_range(10.0..110.0);
        let quantity = rng.random_range(1..=10) as i64;
        let order_date = start_date + Duration::seconds(rng.random_range(0..window_secs));
        let status = STATUSES[rng.random_range(0..STATUSES.len())];

        orders.push(doc! {
            "productId" => product_id,
            "orderNumber" => format!("ORD{}", i),
            "orderDate" => order_date,
            "productName" => product_name,
            "productCategory" => format!("Category{}", rng.random_range(0..5)),
            "price" => price,
            "quantity" => quantity,
            "status" => status
        });
    }

    (orders, configs)
}
