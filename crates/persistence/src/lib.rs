//! Store layer for the voice ordering gateway.
//!
//! Thin typed wrappers over four tables: `calls`, `customers`, `orders`, and
//! `order_items`. Each table group is a trait with a ScyllaDB implementation
//! and an in-memory twin for tests and database-less development.

pub mod calls;
pub mod client;
pub mod error;
pub mod memory;
pub mod orders;
pub mod retry;
pub mod schema;

pub use calls::{CallRow, CallStatus, CallStore, ScyllaCallStore};
pub use client::{StoreClient, StoreConfig};
pub use error::PersistenceError;
pub use memory::{InMemoryStore, StoredCall, StoredCustomer};
pub use orders::{Order, OrderItem, OrderStore, ScyllaOrderStore};
pub use retry::RetryPolicy;

/// Connect to the database and build both stores.
pub async fn init(config: StoreConfig) -> Result<StoreLayer, PersistenceError> {
    let client = StoreClient::connect(config).await?;
    client.ensure_schema().await?;

    Ok(StoreLayer {
        calls: ScyllaCallStore::new(client.clone()),
        orders: ScyllaOrderStore::new(client),
    })
}

/// Combined store layer.
pub struct StoreLayer {
    pub calls: ScyllaCallStore,
    pub orders: ScyllaOrderStore,
}
