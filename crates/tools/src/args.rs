//! Tool-call envelope and typed arguments.
//!
//! The model issues `{id, name, args}` envelopes over a closed set of tool
//! names. Arguments are validated once, here, at the boundary; the handlers
//! only ever see well-typed values. Unknown fields are tolerated but logged.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// One function call from a model `toolCall` batch.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// One entry of a tool-response batch, returned in call order.
#[derive(Debug, Clone)]
pub struct ToolResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Error)]
pub enum ArgError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CartAction {
    Add,
    Remove,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMenuArgs {
    pub query: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManageOrderArgs {
    pub action: CartAction,
    pub item_name: String,
    pub quantity: Option<u32>,
    pub price: Option<f64>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectCustomerDetailsArgs {
    pub customer_name: String,
    pub phone_number: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteOrderArgs {
    pub customer_name: Option<String>,
    pub phone_number: Option<String>,
}

/// Parsed arguments, one variant per tool.
#[derive(Debug)]
pub enum ToolArgs {
    SearchMenu(SearchMenuArgs),
    ManageOrder(ManageOrderArgs),
    CollectCustomerDetails(CollectCustomerDetailsArgs),
    CompleteOrder(CompleteOrderArgs),
}

impl ToolArgs {
    /// Parse and validate one envelope. Field names follow the declared
    /// camelCase schema.
    pub fn parse(name: &str, args: &Value) -> Result<Self, ArgError> {
        match name {
            "searchMenu" => {
                log_unexpected_fields(name, args, &["query"]);
                Ok(Self::SearchMenu(typed(args)?))
            }
            "manageOrder" => {
                log_unexpected_fields(
                    name,
                    args,
                    &["action", "itemName", "quantity", "price", "notes"],
                );
                Ok(Self::ManageOrder(typed(args)?))
            }
            "collectCustomerDetails" => {
                log_unexpected_fields(name, args, &["customerName", "phoneNumber"]);
                Ok(Self::CollectCustomerDetails(typed(args)?))
            }
            "completeOrder" => {
                log_unexpected_fields(name, args, &["customerName", "phoneNumber"]);
                Ok(Self::CompleteOrder(typed(args)?))
            }
            other => Err(ArgError::UnknownTool(other.to_string())),
        }
    }
}

fn typed<T: for<'de> Deserialize<'de>>(args: &Value) -> Result<T, ArgError> {
    serde_json::from_value(args.clone()).map_err(|e| ArgError::Invalid(e.to_string()))
}

fn log_unexpected_fields(name: &str, args: &Value, known: &[&str]) {
    if let Some(map) = args.as_object() {
        for key in map.keys() {
            if !known.contains(&key.as_str()) {
                tracing::debug!(tool = name, field = %key, "ignoring unexpected tool argument");
            }
        }
    }
}

/// Normalize a spoken phone number to digits; `None` when the result is not a
/// plausible length.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if (10..=15).contains(&digits.len()) {
        Some(digits)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_manage_order_parses_camel_case() {
        let args = ToolArgs::parse(
            "manageOrder",
            &json!({"action": "add", "itemName": "Masala Dosa", "quantity": 2, "price": 11.49}),
        )
        .unwrap();

        match args {
            ToolArgs::ManageOrder(a) => {
                assert_eq!(a.action, CartAction::Add);
                assert_eq!(a.item_name, "Masala Dosa");
                assert_eq!(a.quantity, Some(2));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_missing_required_field_is_invalid() {
        let err = ToolArgs::parse("manageOrder", &json!({"action": "add"}));
        assert!(matches!(err, Err(ArgError::Invalid(_))));
    }

    #[test]
    fn test_negative_quantity_is_invalid() {
        let err = ToolArgs::parse(
            "manageOrder",
            &json!({"action": "add", "itemName": "Idli", "quantity": -1, "price": 6.99}),
        );
        assert!(matches!(err, Err(ArgError::Invalid(_))));
    }

    #[test]
    fn test_unknown_tool() {
        let err = ToolArgs::parse("launchMissiles", &json!({}));
        assert!(matches!(err, Err(ArgError::UnknownTool(_))));
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        let args = ToolArgs::parse(
            "searchMenu",
            &json!({"query": "dosa", "confidence": 0.9}),
        );
        assert!(args.is_ok());
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(
            normalize_phone("(555) 123-4567").as_deref(),
            Some("5551234567")
        );
        assert_eq!(normalize_phone("555"), None);
        assert_eq!(normalize_phone(""), None);
    }
}
