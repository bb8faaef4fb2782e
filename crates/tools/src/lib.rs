//! Tool layer for the voice ordering gateway.
//!
//! The model drives the order dialogue through a closed set of tools; this
//! crate owns the envelope types, boundary validation, the per-session
//! router, and the order persistence pipeline.

pub mod args;
pub mod declarations;
pub mod router;

pub use args::{
    ArgError, CartAction, CollectCustomerDetailsArgs, CompleteOrderArgs, ManageOrderArgs,
    SearchMenuArgs, ToolArgs, ToolCall, ToolResponse,
};
pub use declarations::function_declarations;
pub use router::{
    order_number, round_to_cents, CustomerDetails, Dispatch, OrderJob, OrderOutcome, ToolRouter,
    FALLBACK_REPLY, TAX_RATE,
};
