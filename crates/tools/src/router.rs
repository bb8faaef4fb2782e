//! Tool dispatch.
//!
//! Each session owns one `ToolRouter`. Synchronous tools (menu search, cart
//! mutation, detail collection) resolve inline on the session loop; order
//! completion hands back an `OrderJob` the session runs as a task so teardown
//! can be deferred while the store writes finish.
//!
//! Handler failures never escape: every path produces a shape-compliant
//! response, worst case the generic spoken apology.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use uuid::Uuid;

use voice_order_core::{menu, Cart, CartItem};
use voice_order_persistence::{Order, OrderItem, OrderStore, RetryPolicy};

use crate::args::{
    normalize_phone, CartAction, CompleteOrderArgs, ManageOrderArgs, SearchMenuArgs, ToolArgs,
    ToolCall, ToolResponse,
};

/// Spoken fallback when a tool call cannot be honored.
pub const FALLBACK_REPLY: &str = "Sorry, there was a brief error. Please try again.";

/// Sales tax applied to the order subtotal.
pub const TAX_RATE: f64 = 0.0825;

/// Prefix of human-readable order numbers.
const ORDER_NUMBER_PREFIX: &str = "SB-IRV";

/// Round to whole cents, half away from zero.
pub fn round_to_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Short order number for spoken readback.
pub fn order_number(order_id: &Uuid) -> String {
    let hex = order_id.simple().to_string();
    format!("{}-{}", ORDER_NUMBER_PREFIX, hex[..6].to_uppercase())
}

/// Caller identity stashed by `collectCustomerDetails`.
#[derive(Debug, Clone)]
pub struct CustomerDetails {
    pub name: String,
    pub phone: String,
}

/// Result of a tool dispatch.
pub enum Dispatch {
    /// Response computed inline.
    Ready(ToolResponse),
    /// Order persistence pipeline; the session spawns `job.run()` and fills
    /// the response slot when it settles.
    Order { id: String, name: String, job: OrderJob },
}

/// Settled order pipeline result.
#[derive(Debug)]
pub struct OrderOutcome {
    pub response: Value,
    pub succeeded: bool,
}

/// Per-session tool dispatcher and cart owner.
pub struct ToolRouter {
    cart: Cart,
    customer: Option<CustomerDetails>,
    store: Arc<dyn OrderStore>,
    restaurant_id: String,
    call_id: String,
    retry: RetryPolicy,
}

impl ToolRouter {
    pub fn new(store: Arc<dyn OrderStore>, restaurant_id: String, call_id: String) -> Self {
        Self {
            cart: Cart::new(),
            customer: None,
            store,
            restaurant_id,
            call_id,
            retry: RetryPolicy::new(3, Duration::from_secs(1)),
        }
    }

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    pub fn clear_cart(&mut self) {
        self.cart.clear();
    }

    /// Clear the cart when an order pipeline settled successfully. The cart is
    /// left intact on failure so a human callback still has the order.
    pub fn settle_order(&mut self, outcome: &OrderOutcome) {
        if outcome.succeeded {
            self.cart.clear();
        }
    }

    /// Dispatch one tool call. Never panics or errors into the caller.
    pub fn dispatch(&mut self, call: &ToolCall) -> Dispatch {
        let parsed = match ToolArgs::parse(&call.name, &call.args) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(tool = %call.name, error = %err, "tool call rejected at boundary");
                return Dispatch::Ready(fallback(call));
            }
        };

        match parsed {
            ToolArgs::SearchMenu(args) => Dispatch::Ready(self.search_menu(call, args)),
            ToolArgs::ManageOrder(args) => Dispatch::Ready(self.manage_order(call, args)),
            ToolArgs::CollectCustomerDetails(args) => {
                Dispatch::Ready(self.collect_details(call, args))
            }
            ToolArgs::CompleteOrder(args) => self.complete_order(call, args),
        }
    }

    fn search_menu(&self, call: &ToolCall, args: SearchMenuArgs) -> ToolResponse {
        let response = match menu::search(&args.query) {
            Some((name, price)) => {
                tracing::debug!(query = %args.query, item = name, "menu hit");
                json!({ "itemName": name, "price": price })
            }
            None => {
                tracing::debug!(query = %args.query, "menu miss");
                json!({ "result": format!("'{}' is not on the menu.", args.query) })
            }
        };
        respond(call, response)
    }

    fn manage_order(&mut self, call: &ToolCall, args: ManageOrderArgs) -> ToolResponse {
        match args.action {
            CartAction::Add => {
                let quantity = args.quantity.filter(|&q| q >= 1);
                let price = args.price.filter(|&p| p >= 0.0);
                let (Some(quantity), Some(price)) = (quantity, price) else {
                    tracing::warn!(
                        tool = %call.name,
                        item = %args.item_name,
                        "add rejected: quantity must be >= 1 and price >= 0"
                    );
                    return fallback(call);
                };

                let token = self.cart.add(&args.item_name, quantity, price, &args.notes);
                tracing::info!(
                    call_id = %self.call_id,
                    item = %args.item_name,
                    quantity,
                    cart_items = self.cart.item_count(),
                    subtotal = self.cart.subtotal(),
                    "cart add"
                );
                respond(call, json!({ "result": token }))
            }
            CartAction::Remove => {
                let token = self.cart.remove(&args.item_name);
                tracing::info!(
                    call_id = %self.call_id,
                    item = %args.item_name,
                    cart_items = self.cart.item_count(),
                    "cart remove"
                );
                respond(call, json!({ "result": token }))
            }
        }
    }

    fn collect_details(
        &mut self,
        call: &ToolCall,
        args: crate::args::CollectCustomerDetailsArgs,
    ) -> ToolResponse {
        let Some(phone) = normalize_phone(&args.phone_number) else {
            tracing::warn!(call_id = %self.call_id, "customer phone failed validation");
            return respond(
                call,
                json!({ "result": "That phone number doesn't look right. Could you repeat it?" }),
            );
        };

        self.customer = Some(CustomerDetails {
            name: args.customer_name.trim().to_string(),
            phone,
        });
        tracing::info!(call_id = %self.call_id, "customer details collected");
        respond(call, json!({ "result": "Customer details saved." }))
    }

    fn complete_order(&mut self, call: &ToolCall, args: CompleteOrderArgs) -> Dispatch {
        if self.cart.is_empty() {
            return Dispatch::Ready(respond(
                call,
                json!({ "result": "Error: cart is empty", "orderId": Value::Null }),
            ));
        }

        // Arguments win; fall back to whatever collectCustomerDetails stashed.
        let name = args
            .customer_name
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.customer.as_ref().map(|c| c.name.clone()));
        let phone = args
            .phone_number
            .as_deref()
            .and_then(normalize_phone)
            .or_else(|| self.customer.as_ref().map(|c| c.phone.clone()));

        let (Some(name), Some(phone)) = (name, phone) else {
            tracing::warn!(call_id = %self.call_id, "completeOrder without usable customer details");
            return Dispatch::Ready(fallback(call));
        };

        Dispatch::Order {
            id: call.id.clone(),
            name: call.name.clone(),
            job: OrderJob {
                store: self.store.clone(),
                retry: self.retry,
                restaurant_id: self.restaurant_id.clone(),
                call_id: self.call_id.clone(),
                customer_name: name,
                customer_phone: phone,
                items: self.cart.items().to_vec(),
            },
        }
    }
}

fn respond(call: &ToolCall, response: Value) -> ToolResponse {
    ToolResponse {
        id: call.id.clone(),
        name: call.name.clone(),
        response,
    }
}

fn fallback(call: &ToolCall) -> ToolResponse {
    respond(call, json!({ "result": FALLBACK_REPLY }))
}

/// The order persistence pipeline, snapshotted off the cart so it can run as
/// its own task while the session keeps draining events.
pub struct OrderJob {
    store: Arc<dyn OrderStore>,
    retry: RetryPolicy,
    restaurant_id: String,
    call_id: String,
    customer_name: String,
    customer_phone: String,
    items: Vec<CartItem>,
}

impl OrderJob {
    /// Run the pipeline: customer upsert, order insert, items batch. Every
    /// store error is retryable here; exhaustion yields the spoken apology
    /// with a null order id.
    pub async fn run(self) -> OrderOutcome {
        let subtotal: f64 = self
            .items
            .iter()
            .map(|item| f64::from(item.quantity) * item.unit_price)
            .sum();
        let total = round_to_cents(subtotal * (1.0 + TAX_RATE));

        // One id for the whole pipeline: a retry resumes this logical order
        // instead of minting a second row and orphaning the first attempt's.
        let order_id = Uuid::new_v4();

        let result = self
            .retry
            .run(
                |attempt| {
                    let store = self.store.clone();
                    let restaurant_id = self.restaurant_id.clone();
                    let call_id = self.call_id.clone();
                    let name = self.customer_name.clone();
                    let phone = self.customer_phone.clone();
                    let items = self.items.clone();

                    async move {
                        tracing::debug!(call_id = %call_id, attempt, "order pipeline attempt");

                        let customer_id = store.upsert_customer(&phone, &name).await?;

                        let order = Order {
                            id: order_id,
                            restaurant_id,
                            customer_id,
                            call_id,
                            status: "confirmed".to_string(),
                            total_amount: total,
                        };
                        store.insert_order(&order).await?;

                        let rows: Vec<OrderItem> = items
                            .iter()
                            .map(|item| OrderItem {
                                order_id,
                                item_name: item.name.clone(),
                                quantity: item.quantity,
                                unit_price: item.unit_price,
                                customizations: if item.notes.is_empty() {
                                    json!({})
                                } else {
                                    json!({ "notes": item.notes })
                                },
                            })
                            .collect();
                        store.insert_order_items(&rows).await?;

                        Ok(())
                    }
                },
                |_| true,
            )
            .await;

        match result {
            Ok(()) => {
                let number = order_number(&order_id);
                tracing::info!(
                    call_id = %self.call_id,
                    order_id = %order_id,
                    order_number = %number,
                    total,
                    items = self.items.len(),
                    "order persisted"
                );
                OrderOutcome {
                    succeeded: true,
                    response: json!({
                        "result": format!(
                            "Order confirmed. The order number is {number} and the total is ${total:.2}."
                        ),
                        "orderId": order_id.to_string(),
                        "orderNumber": number,
                        "total": total,
                    }),
                }
            }
            Err(err) => {
                tracing::error!(call_id = %self.call_id, error = %err, "order pipeline exhausted");
                OrderOutcome {
                    succeeded: false,
                    response: json!({
                        "result": "I'm sorry, I couldn't save your order just now. \
                                   A team member will call you back shortly to confirm it.",
                        "orderId": Value::Null,
                    }),
                }
            }
        }
    }
}
