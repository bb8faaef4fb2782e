//! Telephony media leg.
//!
//! One WebSocket per call, carrying a framed JSON vocabulary: lifecycle
//! events inbound (`start`, `stop`), base64 µ-law audio both ways, and a
//! `clear` frame outbound to flush queued caller-directed audio on barge-in.
//!
//! Malformed frames are discarded without ending the leg; only socket close
//! or error drives the session into its terminal path.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::session::{self, SessionDeps, SessionEvent};
use crate::state::AppState;

/// Inbound frame vocabulary from the telephony provider.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    Connected,
    Start { start: StreamStart },
    Media { media: MediaPayload },
    Dtmf { dtmf: DtmfPayload },
    Stop,
    #[serde(other)]
    Unknown,
}

/// `start` event body: the call's identity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    pub call_sid: String,
    pub stream_sid: String,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
}

#[derive(Debug, Deserialize)]
pub struct DtmfPayload {
    pub digit: String,
}

/// Outbound frame vocabulary toward the telephony provider.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyFrame {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaOut,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Serialize)]
pub struct MediaOut {
    pub payload: String,
}

impl TelephonyFrame {
    /// Audio frame toward the caller; `mulaw` is raw µ-law bytes.
    pub fn media(stream_sid: &str, mulaw: &[u8]) -> Self {
        Self::Media {
            stream_sid: stream_sid.to_string(),
            media: MediaOut {
                payload: BASE64.encode(mulaw),
            },
        }
    }

    /// Flush any queued caller-directed audio.
    pub fn clear(stream_sid: &str) -> Self {
        Self::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }
}

/// Handle one media WebSocket: spawn the session actor and its writer, then
/// pump inbound frames into the session until the socket ends.
pub async fn handle_stream(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();

    let (frame_tx, frame_rx) = mpsc::channel::<TelephonyFrame>(64);
    let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(256);

    tokio::spawn(write_frames(sink, frame_rx));
    tokio::spawn(session::run(
        SessionDeps::production(&state),
        event_rx,
        event_tx.clone(),
        frame_tx,
    ));

    tracing::debug!("media stream opened");

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let event = match serde_json::from_str::<TelephonyEvent>(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::debug!(error = %e, "discarding malformed media frame");
                        continue;
                    }
                };

                let session_event = match event {
                    TelephonyEvent::Start { start } => Some(SessionEvent::MediaStart(start)),
                    TelephonyEvent::Media { media } => match BASE64.decode(&media.payload) {
                        Ok(bytes) => Some(SessionEvent::MediaAudio(bytes)),
                        Err(e) => {
                            tracing::debug!(error = %e, "discarding undecodable media payload");
                            None
                        }
                    },
                    TelephonyEvent::Stop => Some(SessionEvent::MediaStop),
                    TelephonyEvent::Dtmf { dtmf } => {
                        tracing::debug!(digit = %dtmf.digit, "ignoring dtmf");
                        None
                    }
                    TelephonyEvent::Connected => {
                        tracing::debug!("media stream connected");
                        None
                    }
                    TelephonyEvent::Unknown => {
                        tracing::debug!("ignoring unknown media event");
                        None
                    }
                };

                if let Some(event) = session_event {
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => {
                let _ = event_tx.send(SessionEvent::MediaClosed { error: false }).await;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "media socket error");
                let _ = event_tx.send(SessionEvent::MediaClosed { error: true }).await;
                return;
            }
        }
    }

    let _ = event_tx.send(SessionEvent::MediaClosed { error: false }).await;
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<TelephonyFrame>,
) {
    while let Some(frame) = frames.recv().await {
        let json = serde_json::to_string(&frame).unwrap();
        if let Err(e) = sink.send(Message::Text(json)).await {
            // Keep draining so the session never blocks on a dead socket.
            tracing::warn!(error = %e, "skipping outbound media frame, socket not open");
        }
    }
}
