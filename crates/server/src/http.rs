//! HTTP ingress.
//!
//! Three endpoints: a health check, the telephony webhook that answers with
//! the stream-connect TwiML document, and the media WebSocket upgrade.

use axum::{
    extract::{Host, State, WebSocketUpgrade},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::media;
use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/twiml", post(twiml))
        .route("/stream", get(stream_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "uptime": state.uptime_secs(),
        "sessions": state.registry.count(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Inbound-call webhook body. The provider posts more fields; only the two
/// phone numbers matter here.
#[derive(Debug, Deserialize)]
struct VoiceWebhook {
    #[serde(rename = "From", default)]
    from: String,
    #[serde(rename = "To", default)]
    to: String,
}

async fn twiml(
    State(state): State<AppState>,
    Host(request_host): Host,
    Form(webhook): Form<VoiceWebhook>,
) -> impl IntoResponse {
    let host = if state.settings.server.public_host.is_empty() {
        request_host
    } else {
        state.settings.server.public_host.clone()
    };

    tracing::info!(caller = %webhook.from, host = %host, "inbound call webhook");

    (
        [(header::CONTENT_TYPE, "application/xml")],
        stream_twiml(&host, &webhook.from, &webhook.to),
    )
}

async fn stream_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| media::handle_stream(socket, state))
}

/// Keep only characters that can appear in a dialable number; everything else
/// would be an XML injection vector inside the parameter values.
fn sanitize_phone(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | ' '))
        .collect()
}

fn stream_twiml(host: &str, caller: &str, restaurant: &str) -> String {
    let caller = sanitize_phone(caller);
    let restaurant = sanitize_phone(restaurant);

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <Response>\n\
         \x20\x20<Connect>\n\
         \x20\x20\x20\x20<Stream url=\"wss://{host}/stream\">\n\
         \x20\x20\x20\x20\x20\x20<Parameter name=\"callerPhone\" value=\"{caller}\"/>\n\
         \x20\x20\x20\x20\x20\x20<Parameter name=\"restaurantPhone\" value=\"{restaurant}\"/>\n\
         \x20\x20\x20\x20</Stream>\n\
         \x20\x20</Connect>\n\
         </Response>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_order_config::Settings;

    #[test]
    fn test_router_creation() {
        let state = AppState::in_memory(Settings::default());
        let _ = create_router(state);
    }

    #[test]
    fn test_sanitize_phone_strips_injection_characters() {
        assert_eq!(sanitize_phone("+1 (555) 123-4567"), "+1 (555) 123-4567");
        assert_eq!(
            sanitize_phone("+1555\"/><Stream url=\"wss://evil\"/>"),
            "+1555"
        );
    }

    #[test]
    fn test_stream_twiml_document() {
        let xml = stream_twiml("gateway.example.com", "+15551234567", "+19495550100");

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<Stream url=\"wss://gateway.example.com/stream\">"));
        assert!(xml.contains("<Parameter name=\"callerPhone\" value=\"+15551234567\"/>"));
        assert!(xml.contains("<Parameter name=\"restaurantPhone\" value=\"+19495550100\"/>"));
    }
}
