//! Speech-model leg.
//!
//! A bidirectional WebSocket session with the generative speech service:
//! linear PCM out, wideband audio + transcript + tool calls back. The leg
//! feeds parsed events into the owning session's loop and drains a command
//! channel for writes, so the session never touches the socket.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use voice_order_config::{prompts, Settings};
use voice_order_core::menu;
use voice_order_tools::{function_declarations, ToolCall, ToolResponse};

use crate::session::SessionEvent;

/// Empirical: sending client content immediately after the open handshake
/// can trip an abnormal close inside the service; the greeting waits this
/// long after the socket opens.
const PRE_GREETING_DELAY: Duration = Duration::from_millis(500);

/// Abnormal closes before the greeting get this many reconnects, spaced by
/// `RECONNECT_DELAY`. Also an empirical workaround for the same open race.
const RECONNECT_ATTEMPTS: u32 = 2;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Parsed inbound message parts, in wire order.
#[derive(Debug)]
pub enum ModelEvent {
    /// Socket open, setup sent.
    Open,
    /// Wideband PCM fragment of model speech.
    Audio(Vec<u8>),
    /// Output transcription fragment.
    Transcription(String),
    /// The model is cancelling its current turn (caller barge-in).
    Interrupted,
    /// End of the current model turn.
    TurnComplete,
    /// Tool calls to dispatch, in batch order.
    ToolCalls(Vec<ToolCall>),
    /// The leg is gone. `abnormal` means the peer closed or errored; a close
    /// we commanded is not abnormal.
    Closed { abnormal: bool },
}

/// Session-to-leg commands.
#[derive(Debug)]
pub enum ModelCommand {
    /// Caller audio, 16-bit PCM at 16 kHz.
    Audio(Vec<u8>),
    /// Responses to a prior tool-call batch, in the same order.
    ToolResponses(Vec<ToolResponse>),
    Close,
}

/// Spawn the leg task and hand back its command channel.
pub fn connect(settings: Arc<Settings>, events: mpsc::Sender<SessionEvent>) -> mpsc::Sender<ModelCommand> {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    tokio::spawn(run(settings, events, cmd_rx));
    cmd_tx
}

enum LegEnd {
    /// The session commanded a close (or dropped the command channel).
    Commanded,
    /// Connect failed, or the peer closed/errored.
    Abnormal,
}

async fn run(
    settings: Arc<Settings>,
    events: mpsc::Sender<SessionEvent>,
    mut commands: mpsc::Receiver<ModelCommand>,
) {
    let url = format!("{}?key={}", settings.model.endpoint, settings.model.api_key);
    let mut reconnects_left = RECONNECT_ATTEMPTS;
    let mut greeting_sent = false;

    loop {
        match serve_connection(&url, &settings, &events, &mut commands, &mut greeting_sent).await {
            LegEnd::Commanded => {
                let _ = events
                    .send(SessionEvent::Model(ModelEvent::Closed { abnormal: false }))
                    .await;
                return;
            }
            LegEnd::Abnormal => {
                if !greeting_sent && reconnects_left > 0 {
                    reconnects_left -= 1;
                    tracing::warn!(
                        reconnects_left,
                        "model session closed before greeting, reconnecting"
                    );
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
                let _ = events
                    .send(SessionEvent::Model(ModelEvent::Closed { abnormal: true }))
                    .await;
                return;
            }
        }
    }
}

async fn serve_connection(
    url: &str,
    settings: &Settings,
    events: &mpsc::Sender<SessionEvent>,
    commands: &mut mpsc::Receiver<ModelCommand>,
    greeting_sent: &mut bool,
) -> LegEnd {
    let (mut ws, _) = match connect_async(url).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(error = %e, "model connect failed");
            return LegEnd::Abnormal;
        }
    };

    let setup = setup_message(settings);
    if ws.send(WsMessage::Text(setup.to_string())).await.is_err() {
        tracing::warn!("model setup send failed");
        return LegEnd::Abnormal;
    }

    tracing::info!(model = %settings.model.model_id, "model session open");
    let _ = events.send(SessionEvent::Model(ModelEvent::Open)).await;

    let greeting_timer = tokio::time::sleep(PRE_GREETING_DELAY);
    tokio::pin!(greeting_timer);

    loop {
        tokio::select! {
            _ = &mut greeting_timer, if !*greeting_sent => {
                if ws.send(WsMessage::Text(greeting_message().to_string())).await.is_ok() {
                    *greeting_sent = true;
                    tracing::debug!("greeting injected");
                } else {
                    tracing::warn!("greeting send failed");
                }
            }

            command = commands.recv() => match command {
                Some(ModelCommand::Audio(pcm)) => {
                    let msg = audio_message(&pcm);
                    if ws.send(WsMessage::Text(msg.to_string())).await.is_err() {
                        tracing::debug!("dropping caller audio, model socket unwritable");
                    }
                }
                Some(ModelCommand::ToolResponses(batch)) => {
                    tracing::info!(count = batch.len(), "sending tool responses");
                    let msg = tool_response_message(&batch);
                    if ws.send(WsMessage::Text(msg.to_string())).await.is_err() {
                        tracing::warn!("tool response send failed");
                    }
                }
                Some(ModelCommand::Close) | None => {
                    let _ = ws.close(None).await;
                    return LegEnd::Commanded;
                }
            },

            incoming = ws.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    forward_server_message(&text, events).await;
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    // The service frames its JSON as binary messages.
                    match String::from_utf8(data) {
                        Ok(text) => forward_server_message(&text, events).await,
                        Err(_) => tracing::debug!("discarding non-utf8 model frame"),
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    tracing::info!(frame = ?frame, "model socket closed by peer");
                    return LegEnd::Abnormal;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "model socket error");
                    return LegEnd::Abnormal;
                }
                None => {
                    tracing::info!("model socket ended");
                    return LegEnd::Abnormal;
                }
            },
        }
    }
}

/// Parse one server message and forward its parts in wire order. Any subset
/// of the vocabulary may be present in a single message.
async fn forward_server_message(text: &str, events: &mpsc::Sender<SessionEvent>) {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "discarding malformed model frame");
            return;
        }
    };

    if value.get("setupComplete").is_some() {
        tracing::debug!("model setup complete");
    }

    if let Some(content) = value.get("serverContent") {
        if let Some(parts) = content.pointer("/modelTurn/parts").and_then(Value::as_array) {
            for part in parts {
                if let Some(data) = part.pointer("/inlineData/data").and_then(Value::as_str) {
                    match BASE64.decode(data) {
                        Ok(audio) => {
                            let _ = events
                                .send(SessionEvent::Model(ModelEvent::Audio(audio)))
                                .await;
                        }
                        Err(e) => tracing::debug!(error = %e, "discarding undecodable model audio"),
                    }
                }
            }
        }

        if let Some(text) = content
            .pointer("/outputTranscription/text")
            .and_then(Value::as_str)
        {
            let _ = events
                .send(SessionEvent::Model(ModelEvent::Transcription(
                    text.to_string(),
                )))
                .await;
        }

        if content.get("interrupted").and_then(Value::as_bool) == Some(true) {
            let _ = events
                .send(SessionEvent::Model(ModelEvent::Interrupted))
                .await;
        }

        if content.get("turnComplete").and_then(Value::as_bool) == Some(true) {
            let _ = events
                .send(SessionEvent::Model(ModelEvent::TurnComplete))
                .await;
        }
    }

    if let Some(calls) = value.pointer("/toolCall/functionCalls").and_then(Value::as_array) {
        let batch: Vec<ToolCall> = calls
            .iter()
            .map(|call| ToolCall {
                id: call.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                name: call.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                args: call.get("args").cloned().unwrap_or_else(|| json!({})),
            })
            .collect();

        if !batch.is_empty() {
            tracing::info!(count = batch.len(), "tool call batch received");
            let _ = events
                .send(SessionEvent::Model(ModelEvent::ToolCalls(batch)))
                .await;
        }
    }
}

/// Connect-time session configuration: audio-only output, the restaurant's
/// system instruction, the tool surface, both transcriptions, and a VAD
/// tuned for telephony noise.
fn setup_message(settings: &Settings) -> Value {
    json!({
        "setup": {
            "model": settings.model.model_id,
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": settings.model.voice }
                    }
                }
            },
            "systemInstruction": {
                "parts": [{
                    "text": prompts::system_instruction(&settings.restaurant.name, &menu::menu_text())
                }]
            },
            "tools": [{ "functionDeclarations": function_declarations() }],
            "inputAudioTranscription": {},
            "outputAudioTranscription": {},
            "realtimeInputConfig": {
                "automaticActivityDetection": {
                    "startOfSpeechSensitivity": "START_SENSITIVITY_HIGH",
                    "endOfSpeechSensitivity": "END_SENSITIVITY_LOW",
                    "prefixPaddingMs": 200,
                    "silenceDurationMs": 600
                }
            }
        }
    })
}

fn greeting_message() -> Value {
    json!({
        "clientContent": {
            "turns": [{
                "role": "user",
                "parts": [{ "text": prompts::GREETING_TRIGGER }]
            }],
            "turnComplete": true
        }
    })
}

fn audio_message(pcm: &[u8]) -> Value {
    json!({
        "realtimeInput": {
            "audio": {
                "mimeType": "audio/pcm;rate=16000",
                "data": BASE64.encode(pcm)
            }
        }
    })
}

fn tool_response_message(batch: &[ToolResponse]) -> Value {
    let responses: Vec<Value> = batch
        .iter()
        .map(|response| {
            json!({
                "id": response.id,
                "name": response.name,
                "response": response.response,
            })
        })
        .collect();

    json!({ "toolResponse": { "functionResponses": responses } })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_message_configuration() {
        let settings = Settings::default();
        let setup = setup_message(&settings);

        assert_eq!(
            setup["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        let vad = &setup["setup"]["realtimeInputConfig"]["automaticActivityDetection"];
        assert_eq!(vad["startOfSpeechSensitivity"], "START_SENSITIVITY_HIGH");
        assert_eq!(vad["endOfSpeechSensitivity"], "END_SENSITIVITY_LOW");
        assert_eq!(vad["prefixPaddingMs"], 200);
        assert_eq!(vad["silenceDurationMs"], 600);
        assert!(setup["setup"]["tools"][0]["functionDeclarations"].is_array());
        assert!(setup["setup"].get("inputAudioTranscription").is_some());
        assert!(setup["setup"].get("outputAudioTranscription").is_some());
    }

    #[test]
    fn test_audio_message_encodes_base64() {
        let msg = audio_message(&[0x01, 0x02]);
        assert_eq!(msg["realtimeInput"]["audio"]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(
            msg["realtimeInput"]["audio"]["data"],
            BASE64.encode([0x01, 0x02])
        );
    }

    #[test]
    fn test_tool_response_message_preserves_order() {
        let batch = vec![
            ToolResponse {
                id: "a".into(),
                name: "manageOrder".into(),
                response: json!({"result": "ok"}),
            },
            ToolResponse {
                id: "b".into(),
                name: "completeOrder".into(),
                response: json!({"orderId": null}),
            },
        ];
        let msg = tool_response_message(&batch);
        let responses = msg["toolResponse"]["functionResponses"].as_array().unwrap();
        assert_eq!(responses[0]["id"], "a");
        assert_eq!(responses[1]["id"], "b");
    }

    #[tokio::test]
    async fn test_forward_server_message_orders_parts() {
        let (tx, mut rx) = mpsc::channel(16);
        let message = json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [{ "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": BASE64.encode([0u8, 1u8]) } }]
                },
                "outputTranscription": { "text": "Hello" },
                "turnComplete": true
            }
        })
        .to_string();

        forward_server_message(&message, &tx).await;

        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::Model(ModelEvent::Audio(bytes))) if bytes == vec![0u8, 1u8]
        ));
        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::Model(ModelEvent::Transcription(text))) if text == "Hello"
        ));
        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::Model(ModelEvent::TurnComplete))
        ));
    }

    #[tokio::test]
    async fn test_forward_tool_calls() {
        let (tx, mut rx) = mpsc::channel(16);
        let message = json!({
            "toolCall": {
                "functionCalls": [
                    { "id": "fc1", "name": "manageOrder", "args": {"action": "add"} },
                    { "id": "fc2", "name": "completeOrder" }
                ]
            }
        })
        .to_string();

        forward_server_message(&message, &tx).await;

        match rx.recv().await {
            Some(SessionEvent::Model(ModelEvent::ToolCalls(batch))) => {
                assert_eq!(batch.len(), 2);
                assert_eq!(batch[0].id, "fc1");
                assert_eq!(batch[1].name, "completeOrder");
                assert_eq!(batch[1].args, json!({}));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_model_frame_is_discarded() {
        let (tx, mut rx) = mpsc::channel(4);
        forward_server_message("not json", &tx).await;
        drop(tx);
        assert!(rx.recv().await.is_none());
    }
}
