//! Per-call order cart.
//!
//! The cart belongs to exactly one session and is only touched from that
//! session's event loop, so it is a plain struct with no interior locking.

use serde::Serialize;

use crate::menu;

/// One line of the order.
#[derive(Debug, Clone, Serialize)]
pub struct CartItem {
    pub name: String,
    pub quantity: u32,
    /// Authoritative unit price: the menu price when the name is on the menu,
    /// otherwise the price the agent supplied at add time.
    pub unit_price: f64,
    pub notes: String,
}

/// Session-local order state.
#[derive(Debug, Default)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item, or restate an existing one.
    ///
    /// The menu overrides `model_price` whenever the name is on it. Adding a
    /// name already in the cart replaces its quantity and price; notes are
    /// replaced only when the new notes are non-empty, so "make that three"
    /// doesn't erase "extra crispy".
    pub fn add(&mut self, name: &str, quantity: u32, model_price: f64, notes: &str) -> &'static str {
        let unit_price = match menu::price(name) {
            Some(listed) => listed,
            None => {
                tracing::warn!(
                    item = %name,
                    model_price,
                    "price_map_miss: item not on the menu, trusting model price"
                );
                model_price
            }
        };

        if let Some(existing) = self.items.iter_mut().find(|item| item.name == name) {
            existing.quantity = quantity;
            existing.unit_price = unit_price;
            if !notes.is_empty() {
                existing.notes = notes.to_string();
            }
        } else {
            self.items.push(CartItem {
                name: name.to_string(),
                quantity,
                unit_price,
                notes: notes.to_string(),
            });
        }

        "Cart updated successfully."
    }

    /// Drop every entry with the given name.
    pub fn remove(&mut self, name: &str) -> &'static str {
        self.items.retain(|item| item.name != name);
        "Cart updated successfully."
    }

    pub fn subtotal(&self) -> f64 {
        self.items
            .iter()
            .map(|item| f64::from(item.quantity) * item.unit_price)
            .sum()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
