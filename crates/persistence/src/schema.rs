//! Store schema creation.
//!
//! Timestamps are stored as epoch milliseconds (BIGINT) so rows round-trip
//! without driver-side type coercion.

use crate::error::PersistenceError;
use scylla::Session;

/// Create the keyspace if it doesn't exist
pub async fn create_keyspace(
    session: &Session,
    keyspace: &str,
    replication_factor: u8,
) -> Result<(), PersistenceError> {
    let query = format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        keyspace, replication_factor
    );

    session
        .query_unpaged(query, &[])
        .await
        .map_err(|e| PersistenceError::Permanent(format!("Failed to create keyspace: {}", e)))?;

    Ok(())
}

/// Create all required tables
pub async fn create_tables(session: &Session, keyspace: &str) -> Result<(), PersistenceError> {
    let calls_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.calls (
            call_id TEXT,
            id UUID,
            stream_id TEXT,
            caller_phone TEXT,
            restaurant_phone TEXT,
            status TEXT,
            started_at BIGINT,
            ended_at BIGINT,
            duration_seconds INT,
            failure_reason TEXT,
            PRIMARY KEY (call_id)
        )
    "#,
        keyspace
    );

    session
        .query_unpaged(calls_table, &[])
        .await
        .map_err(|e| PersistenceError::Permanent(format!("Failed to create calls table: {}", e)))?;

    let customers_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.customers (
            phone_number TEXT,
            id UUID,
            name TEXT,
            created_at BIGINT,
            PRIMARY KEY (phone_number)
        )
    "#,
        keyspace
    );

    session
        .query_unpaged(customers_table, &[])
        .await
        .map_err(|e| {
            PersistenceError::Permanent(format!("Failed to create customers table: {}", e))
        })?;

    let orders_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.orders (
            order_id UUID,
            restaurant_id TEXT,
            customer_id UUID,
            call_id TEXT,
            status TEXT,
            total_amount DOUBLE,
            created_at BIGINT,
            PRIMARY KEY (order_id)
        )
    "#,
        keyspace
    );

    session
        .query_unpaged(orders_table, &[])
        .await
        .map_err(|e| {
            PersistenceError::Permanent(format!("Failed to create orders table: {}", e))
        })?;

    let order_items_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.order_items (
            order_id UUID,
            item_index INT,
            item_name TEXT,
            quantity INT,
            unit_price DOUBLE,
            customizations TEXT,
            PRIMARY KEY ((order_id), item_index)
        )
    "#,
        keyspace
    );

    session
        .query_unpaged(order_items_table, &[])
        .await
        .map_err(|e| {
            PersistenceError::Permanent(format!("Failed to create order_items table: {}", e))
        })?;

    tracing::info!("All tables created successfully");
    Ok(())
}
