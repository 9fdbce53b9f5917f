// Copyright 2025
// Licensed under the Elastic License v2.0

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio_postgres::{Client, Transaction};
use tracing::{debug, info};

const SEED_CUSTOMERS: i64 = 50;
const SEED_PRODUCTS: i64 = 30;
const MAX_ITEMS_PER_ORDER: i64 = 3;
const MIN_PRICE_CENTS: i64 = 99;

pub const STATUSES: &[&str] = &["created", "paid", "shipped", "delivered", "cancelled"];

const CATEGORIES: &[&str] = &["fitness", "tech", "home", "food"];

const FIRST_NAMES: &[&str] = &[
    "Ada", "Grace", "Alan", "Edsger", "Barbara", "Donald", "Margaret", "Ken", "Radia", "Linus",
];

const LAST_NAMES: &[&str] = &[
    "Lovelace", "Hopper", "Turing", "Dijkstra", "Liskov", "Knuth", "Hamilton", "Thompson",
    "Perlman", "Torvalds",
];

const PRODUCT_NAMES: &[&str] = &[
    "Widget",
    "Gadget",
    "Doohickey",
    "Thingamajig",
    "Gizmo",
    "Contraption",
];

/// One unit of generated traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateOrder,
    UpdateOrderStatus,
    UpdateProductPrice,
}

impl Action {
    /// Maps a roll in `0.0..1.0` to an action: 70% orders, 20% status, 10% price.
    pub fn from_roll(roll: f64) -> Self {
        if roll < 0.70 {
            Action::CreateOrder
        } else if roll < 0.90 {
            Action::UpdateOrderStatus
        } else {
            Action::UpdateProductPrice
        }
    }
}

/// New price after applying `delta`, never below the floor
pub fn adjusted_price(price_cents: i64, delta: i64) -> i64 {
    (price_cents + delta).max(MIN_PRICE_CENTS)
}

pub struct TrafficGenerator {
    client: Client,
    rng: StdRng,
}

impl TrafficGenerator {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            rng: StdRng::from_entropy(),
        }
    }

    /// Inserts reference customers and products when fewer than the seed counts exist
    pub async fn seed(&mut self) -> Result<()> {
        let tx = self.client.transaction().await?;

        let customers: i64 = tx.query_one("SELECT count(*) FROM customers", &[]).await?.get(0);
        if customers < SEED_CUSTOMERS {
            for _ in 0..SEED_CUSTOMERS {
                let first = FIRST_NAMES.choose(&mut self.rng).copied().unwrap_or("Ada");
                let last = LAST_NAMES.choose(&mut self.rng).copied().unwrap_or("Lovelace");
                let tag: u32 = self.rng.gen_range(0..1_000_000);
                let email = format!(
                    "{}.{}{}@example.com",
                    first.to_lowercase(),
                    last.to_lowercase(),
                    tag
                );
                tx.execute(
                    "INSERT INTO customers (email, full_name, created_at, updated_at) \
                     VALUES ($1, $2, now(), now()) ON CONFLICT (email) DO NOTHING",
                    &[&email, &format!("{} {}", first, last)],
                )
                .await?;
            }
        }

        let products: i64 = tx.query_one("SELECT count(*) FROM products", &[]).await?.get(0);
        if products < SEED_PRODUCTS {
            for _ in 0..SEED_PRODUCTS {
                let sku = format!("SKU-{:05}", self.rng.gen_range(0..100_000));
                let name = PRODUCT_NAMES.choose(&mut self.rng).copied().unwrap_or("Widget");
                let category = CATEGORIES.choose(&mut self.rng).copied().unwrap_or("home");
                let price: i64 = self.rng.gen_range(199..=19_999);
                tx.execute(
                    "INSERT INTO products (sku, product_name, category, price_cents, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4::bigint, now(), now()) ON CONFLICT (sku) DO NOTHING",
                    &[&sku, &name, &category, &price],
                )
                .await?;
            }
        }

        tx.commit().await.context("Failed to commit seed data")?;
        info!(
            "Reference data ready ({} customers, {} products before seeding)",
            customers, products
        );
        Ok(())
    }

    /// Performs one random action in its own transaction
    pub async fn step(&mut self) -> Result<Action> {
        let action = Action::from_roll(self.rng.gen::<f64>());
        let delta = self.rng.gen_range(-200..=500);
        let status = STATUSES.choose(&mut self.rng).copied().unwrap_or("created");
        let quantities: Vec<i64> = (0..MAX_ITEMS_PER_ORDER)
            .map(|_| self.rng.gen_range(1..=3))
            .collect();

        let tx = self.client.transaction().await?;
        match action {
            Action::CreateOrder => create_order(&tx, &quantities).await?,
            Action::UpdateOrderStatus => update_order_status(&tx, status).await?,
            Action::UpdateProductPrice => update_product_price(&tx, delta).await?,
        }
        tx.commit().await?;

        debug!("Generated {:?}", action);
        Ok(action)
    }
}

async fn create_order(tx: &Transaction<'_>, quantities: &[i64]) -> Result<()> {
    let Some(customer) = tx
        .query_opt(
            "SELECT customer_id::bigint FROM customers ORDER BY random() LIMIT 1",
            &[],
        )
        .await?
    else {
        return Ok(());
    };
    let customer_id: i64 = customer.get(0);

    let picks = tx
        .query(
            "SELECT product_id::bigint, price_cents::bigint FROM products ORDER BY random() LIMIT $1::bigint",
            &[&MAX_ITEMS_PER_ORDER],
        )
        .await?;

    let items: Vec<(i64, i64, i64)> = picks
        .iter()
        .zip(quantities)
        .map(|(row, qty)| (row.get(0), *qty, row.get(1)))
        .collect();
    let total: i64 = items.iter().map(|(_, qty, price)| qty * price).sum();

    let order_id: i64 = tx
        .query_one(
            "INSERT INTO orders (customer_id, status, total_cents, currency, created_at, updated_at) \
             VALUES ($1::bigint, 'created', $2::bigint, 'GBP', now(), now()) \
             RETURNING order_id::bigint",
            &[&customer_id, &total],
        )
        .await?
        .get(0);

    for (product_id, qty, price) in &items {
        tx.execute(
            "INSERT INTO order_items (order_id, product_id, quantity, unit_price_cents, created_at, updated_at) \
             VALUES ($1::bigint, $2::bigint, $3::bigint, $4::bigint, now(), now())",
            &[&order_id, product_id, qty, price],
        )
        .await?;
    }

    Ok(())
}

async fn update_order_status(tx: &Transaction<'_>, new_status: &str) -> Result<()> {
    let Some(row) = tx
        .query_opt(
            "SELECT order_id::bigint, status FROM orders ORDER BY random() LIMIT 1",
            &[],
        )
        .await?
    else {
        return Ok(());
    };

    let order_id: i64 = row.get(0);
    let status: String = row.get(1);
    if status == new_status {
        return Ok(());
    }

    tx.execute(
        "UPDATE orders SET status = $1, updated_at = now() WHERE order_id = $2::bigint",
        &[&new_status, &order_id],
    )
    .await?;
    Ok(())
}

async fn update_product_price(tx: &Transaction<'_>, delta: i64) -> Result<()> {
    let Some(row) = tx
        .query_opt(
            "SELECT product_id::bigint, price_cents::bigint FROM products ORDER BY random() LIMIT 1",
            &[],
        )
        .await?
    else {
        return Ok(());
    };

    let product_id: i64 = row.get(0);
    let price: i64 = row.get(1);

    tx.execute(
        "UPDATE products SET price_cents = $1::bigint, updated_at = now() WHERE product_id = $2::bigint",
        &[&adjusted_price(price, delta), &product_id],
    )
    .await?;
    Ok(())
}
