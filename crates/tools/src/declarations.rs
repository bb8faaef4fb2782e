//! Tool declarations advertised to the speech model at session setup.
//!
//! The schema format is the generative service's function-declaration JSON
//! (uppercase type names, camelCase fields). It must stay in lockstep with
//! the typed argument structs in `args`.

use serde_json::{json, Value};

/// Function declarations for the model session setup message.
pub fn function_declarations() -> Value {
    json!([
        {
            "name": "searchMenu",
            "description": "Look up a menu item by name and return its exact name and price. \
                            Use this before quoting any price.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "query": {
                        "type": "STRING",
                        "description": "Item name as the caller said it"
                    }
                }
            }
        },
        {
            "name": "manageOrder",
            "description": "Add an item to the order or remove one. Adding an item that is \
                            already in the order replaces its quantity with the new total.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "action": { "type": "STRING", "enum": ["add", "remove"] },
                    "itemName": { "type": "STRING", "description": "Exact menu item name" },
                    "quantity": { "type": "INTEGER", "description": "Total quantity, at least 1" },
                    "price": { "type": "NUMBER", "description": "Unit price in USD" },
                    "notes": { "type": "STRING", "description": "Preparation notes, if any" }
                },
                "required": ["action", "itemName", "quantity", "price"]
            }
        },
        {
            "name": "collectCustomerDetails",
            "description": "Save the caller's name and phone number for the order.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "customerName": { "type": "STRING" },
                    "phoneNumber": { "type": "STRING" }
                },
                "required": ["customerName", "phoneNumber"]
            }
        },
        {
            "name": "completeOrder",
            "description": "Finalize the order and save it. Call only after the caller has \
                            confirmed the read-back. Returns the order number to read back.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "customerName": { "type": "STRING" },
                    "phoneNumber": { "type": "STRING" }
                }
            }
        }
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declares_the_closed_tool_set() {
        let decls = function_declarations();
        let names: Vec<&str> = decls
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["name"].as_str().unwrap())
            .collect();

        assert_eq!(
            names,
            vec![
                "searchMenu",
                "manageOrder",
                "collectCustomerDetails",
                "completeOrder"
            ]
        );
    }
}
