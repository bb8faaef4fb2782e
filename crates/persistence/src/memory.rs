//! In-memory store.
//!
//! Backs tests and the no-database development mode. Mirrors the semantics of
//! the ScyllaDB stores, including the phone-keyed customer upsert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use crate::calls::{CallRow, CallStatus, CallStore};
use crate::orders::{Order, OrderItem, OrderStore};
use crate::PersistenceError;

/// Stored call row, with the full status write history for assertions.
#[derive(Debug, Clone)]
pub struct StoredCall {
    pub id: Uuid,
    pub stream_id: String,
    pub caller_phone: String,
    pub restaurant_phone: String,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub failure_reason: Option<String>,
    pub status_writes: Vec<CallStatus>,
}

#[derive(Debug, Clone)]
pub struct StoredCustomer {
    pub id: Uuid,
    pub name: String,
}

#[derive(Default)]
struct Inner {
    calls: HashMap<String, StoredCall>,
    customers: HashMap<String, StoredCustomer>,
    orders: Vec<Order>,
    order_items: Vec<OrderItem>,
}

/// In-memory implementation of both store traits.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call(&self, call_id: &str) -> Option<StoredCall> {
        self.inner.read().calls.get(call_id).cloned()
    }

    pub fn customer(&self, phone: &str) -> Option<StoredCustomer> {
        self.inner.read().customers.get(phone).cloned()
    }

    pub fn customer_count(&self) -> usize {
        self.inner.read().customers.len()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.inner.read().orders.clone()
    }

    pub fn items_for(&self, order_id: Uuid) -> Vec<OrderItem> {
        self.inner
            .read()
            .order_items
            .iter()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CallStore for InMemoryStore {
    async fn create_call(
        &self,
        call_id: &str,
        stream_id: &str,
        caller_phone: &str,
        restaurant_phone: &str,
    ) -> Result<CallRow, PersistenceError> {
        for (field, value) in [
            ("call_id", call_id),
            ("stream_id", stream_id),
            ("caller_phone", caller_phone),
            ("restaurant_phone", restaurant_phone),
        ] {
            if value.is_empty() {
                return Err(PersistenceError::InvalidArgument(format!(
                    "{field} must not be empty"
                )));
            }
        }

        let row = CallRow {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
        };
        self.inner.write().calls.insert(
            call_id.to_string(),
            StoredCall {
                id: row.id,
                stream_id: stream_id.to_string(),
                caller_phone: caller_phone.to_string(),
                restaurant_phone: restaurant_phone.to_string(),
                status: CallStatus::InProgress,
                started_at: row.started_at,
                ended_at: None,
                duration_seconds: None,
                failure_reason: None,
                status_writes: Vec::new(),
            },
        );
        Ok(row)
    }

    async fn complete_call(
        &self,
        call_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let mut inner = self.inner.write();
        let call = inner
            .calls
            .get_mut(call_id)
            .ok_or_else(|| PersistenceError::NotFound(format!("call {call_id}")))?;
        let now = Utc::now();
        call.status = CallStatus::Completed;
        call.status_writes.push(CallStatus::Completed);
        call.ended_at = Some(now);
        call.duration_seconds = Some((now - started_at).num_seconds().max(0));
        Ok(())
    }

    async fn escalate_call(&self, call_id: &str) -> Result<(), PersistenceError> {
        let mut inner = self.inner.write();
        let call = inner
            .calls
            .get_mut(call_id)
            .ok_or_else(|| PersistenceError::NotFound(format!("call {call_id}")))?;
        call.status = CallStatus::Escalated;
        call.status_writes.push(CallStatus::Escalated);
        call.ended_at = Some(Utc::now());
        Ok(())
    }

    async fn fail_call(
        &self,
        call_id: &str,
        reason: Option<&str>,
    ) -> Result<(), PersistenceError> {
        let mut inner = self.inner.write();
        let call = inner
            .calls
            .get_mut(call_id)
            .ok_or_else(|| PersistenceError::NotFound(format!("call {call_id}")))?;
        call.status = CallStatus::Failed;
        call.status_writes.push(CallStatus::Failed);
        call.ended_at = Some(Utc::now());
        call.failure_reason = reason.map(str::to_string);
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn upsert_customer(&self, phone: &str, name: &str) -> Result<Uuid, PersistenceError> {
        if phone.is_empty() {
            return Err(PersistenceError::InvalidArgument(
                "phone must not be empty".to_string(),
            ));
        }

        let mut inner = self.inner.write();
        if let Some(existing) = inner.customers.get_mut(phone) {
            existing.name = name.to_string();
            return Ok(existing.id);
        }

        let id = Uuid::new_v4();
        inner.customers.insert(
            phone.to_string(),
            StoredCustomer {
                id,
                name: name.to_string(),
            },
        );
        Ok(id)
    }

    async fn insert_order(&self, order: &Order) -> Result<(), PersistenceError> {
        // Keyed on order id, like the database insert: re-running an attempt
        // overwrites rather than duplicates.
        let mut inner = self.inner.write();
        if let Some(existing) = inner.orders.iter_mut().find(|o| o.id == order.id) {
            *existing = order.clone();
        } else {
            inner.orders.push(order.clone());
        }
        Ok(())
    }

    async fn insert_order_items(&self, items: &[OrderItem]) -> Result<(), PersistenceError> {
        let mut inner = self.inner.write();
        inner
            .order_items
            .retain(|existing| !items.iter().any(|item| item.order_id == existing.order_id));
        inner.order_items.extend_from_slice(items);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_call_requires_fields() {
        let store = InMemoryStore::new();
        let err = store.create_call("", "MZ1", "+1555", "+1949").await;
        assert!(matches!(err, Err(PersistenceError::InvalidArgument(_))));

        let row = store.create_call("CA1", "MZ1", "+1555", "+1949").await;
        assert!(row.is_ok());
        assert_eq!(store.call("CA1").unwrap().status, CallStatus::InProgress);
    }

    #[tokio::test]
    async fn test_terminal_transitions_record_history() {
        let store = InMemoryStore::new();
        let row = store.create_call("CA1", "MZ1", "+1555", "+1949").await.unwrap();

        store.complete_call("CA1", row.started_at).await.unwrap();
        let call = store.call("CA1").unwrap();
        assert_eq!(call.status, CallStatus::Completed);
        assert_eq!(call.status_writes.len(), 1);
        assert!(call.duration_seconds.is_some());
    }

    #[tokio::test]
    async fn test_order_insert_is_idempotent_by_id() {
        let store = InMemoryStore::new();
        let order = Order {
            id: Uuid::new_v4(),
            restaurant_id: "r1".to_string(),
            customer_id: Uuid::new_v4(),
            call_id: "CA1".to_string(),
            status: "confirmed".to_string(),
            total_amount: 12.34,
        };
        let item = OrderItem {
            order_id: order.id,
            item_name: "Idli".to_string(),
            quantity: 1,
            unit_price: 6.99,
            customizations: serde_json::json!({}),
        };

        store.insert_order(&order).await.unwrap();
        store.insert_order(&order).await.unwrap();
        store.insert_order_items(&[item.clone()]).await.unwrap();
        store.insert_order_items(&[item]).await.unwrap();

        assert_eq!(store.orders().len(), 1);
        assert_eq!(store.items_for(order.id).len(), 1);
    }

    #[tokio::test]
    async fn test_customer_upsert_is_stable_by_phone() {
        let store = InMemoryStore::new();
        let first = store.upsert_customer("5551234567", "Ada").await.unwrap();
        let second = store.upsert_customer("5551234567", "Ada L").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.customer_count(), 1);
        assert_eq!(store.customer("5551234567").unwrap().name, "Ada L");
    }
}
