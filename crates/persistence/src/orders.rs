//! Customer and order persistence.

use async_trait::async_trait;
use chrono::Utc;
use scylla::batch::Batch;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{PersistenceError, StoreClient};

/// Order header row. Immutable once inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub restaurant_id: String,
    pub customer_id: Uuid,
    pub call_id: String,
    pub status: String,
    pub total_amount: f64,
}

/// Order line item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub order_id: Uuid,
    pub item_name: String,
    pub quantity: u32,
    pub unit_price: f64,
    /// Free-form notes bag; `{}` when the cart entry had no notes.
    pub customizations: serde_json::Value,
}

/// Store for the order completion pipeline.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Upsert a customer keyed by phone number, updating the name on
    /// conflict. Returns the stable customer id.
    async fn upsert_customer(&self, phone: &str, name: &str) -> Result<Uuid, PersistenceError>;

    async fn insert_order(&self, order: &Order) -> Result<(), PersistenceError>;

    /// Insert all line items of one order as a single batch.
    async fn insert_order_items(&self, items: &[OrderItem]) -> Result<(), PersistenceError>;
}

/// ScyllaDB-backed order store
#[derive(Clone)]
pub struct ScyllaOrderStore {
    client: StoreClient,
}

impl ScyllaOrderStore {
    pub fn new(client: StoreClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OrderStore for ScyllaOrderStore {
    async fn upsert_customer(&self, phone: &str, name: &str) -> Result<Uuid, PersistenceError> {
        if phone.is_empty() {
            return Err(PersistenceError::InvalidArgument(
                "phone must not be empty".to_string(),
            ));
        }

        let select = format!(
            "SELECT id FROM {}.customers WHERE phone_number = ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(select, (phone,))
            .await?;

        let existing = result
            .rows
            .and_then(|rows| rows.into_iter().next())
            .map(|row| {
                row.into_typed::<(Uuid,)>()
                    .map(|(id,)| id)
                    .map_err(|e| PersistenceError::Permanent(format!("bad customer row: {e}")))
            })
            .transpose()?;

        if let Some(id) = existing {
            let update = format!(
                "UPDATE {}.customers SET name = ? WHERE phone_number = ?",
                self.client.keyspace()
            );
            self.client
                .session()
                .query_unpaged(update, (name, phone))
                .await?;
            tracing::debug!(phone = %phone, "Customer name refreshed");
            return Ok(id);
        }

        let id = Uuid::new_v4();
        let insert = format!(
            "INSERT INTO {}.customers (phone_number, id, name, created_at) VALUES (?, ?, ?, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(insert, (phone, id, name, Utc::now().timestamp_millis()))
            .await?;

        tracing::info!(phone = %phone, customer_id = %id, "Customer created");
        Ok(id)
    }

    async fn insert_order(&self, order: &Order) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.orders (order_id, restaurant_id, customer_id, call_id, status, total_amount, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    order.id,
                    order.restaurant_id.as_str(),
                    order.customer_id,
                    order.call_id.as_str(),
                    order.status.as_str(),
                    order.total_amount,
                    Utc::now().timestamp_millis(),
                ),
            )
            .await?;

        tracing::info!(
            order_id = %order.id,
            call_id = %order.call_id,
            total = order.total_amount,
            "Order created"
        );
        Ok(())
    }

    async fn insert_order_items(&self, items: &[OrderItem]) -> Result<(), PersistenceError> {
        if items.is_empty() {
            return Ok(());
        }

        let query = format!(
            "INSERT INTO {}.order_items (order_id, item_index, item_name, quantity, unit_price, customizations)
             VALUES (?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        let mut batch = Batch::default();
        let mut values = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            batch.append_statement(query.as_str());
            values.push((
                item.order_id,
                index as i32,
                item.item_name.clone(),
                item.quantity as i32,
                item.unit_price,
                item.customizations.to_string(),
            ));
        }

        self.client.session().batch(&batch, values).await?;

        tracing::info!(count = items.len(), "Order items inserted");
        Ok(())
    }
}
