//! Core domain types for the voice ordering gateway.
//!
//! Audio transcoding between the telephony and model legs, the static menu
//! price table, and the per-call cart. Everything here is synchronous and
//! owned by a single session loop; nothing needs locking.

pub mod audio;
pub mod cart;
pub mod menu;

pub use audio::{model_to_telephony, mulaw_compress, mulaw_expand, telephony_to_model, AudioError};
pub use cart::{Cart, CartItem};
