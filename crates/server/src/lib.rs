//! Voice ordering gateway server.
//!
//! HTTP/TwiML ingress, the telephony media leg, the speech-model leg, and the
//! per-call session orchestrator that bridges them.

pub mod http;
pub mod media;
pub mod model;
pub mod session;
pub mod state;
pub mod transfer;

pub use http::create_router;
pub use session::{SessionDeps, SessionEvent};
pub use state::{AppState, SessionHandle, SessionRegistry};
pub use transfer::{CallTransfer, TelephonyTransfer};

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("media stream error: {0}")]
    Media(String),

    #[error("model session error: {0}")]
    Model(String),

    #[error("transfer failed: {0}")]
    Transfer(String),
}
