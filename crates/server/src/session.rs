//! Per-call session orchestrator.
//!
//! One actor per live call. Everything that can touch call state (media
//! frames, media lifecycle, model events, timers, external shutdown) is
//! multiplexed onto a single mailbox and handled in arrival order, so the
//! cart, transcript, and lifecycle flags never need locking and there is no
//! check-then-act race between the two legs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::mpsc;

use voice_order_config::{prompts, Settings};
use voice_order_core::audio;
use voice_order_persistence::{CallStore, OrderStore};
use voice_order_tools::{Dispatch, OrderOutcome, ToolResponse, ToolRouter, FALLBACK_REPLY};

use crate::media::{StreamStart, TelephonyFrame};
use crate::model::{self, ModelCommand, ModelEvent};
use crate::state::{AppState, SessionHandle, SessionRegistry};
use crate::transfer::{CallTransfer, TelephonyTransfer};

/// How long a media-side hangup waits for an in-flight order pipeline before
/// the session tears down anyway.
const ORDER_TEARDOWN_GRACE: Duration = Duration::from_secs(8);

/// How long the agent gets to read the order number back after a successful
/// completion before the session ends the call.
const FAREWELL_DELAY: Duration = Duration::from_secs(22);

/// Everything that can enter the session mailbox.
#[derive(Debug)]
pub enum SessionEvent {
    MediaStart(StreamStart),
    /// Decoded µ-law bytes from the caller.
    MediaAudio(Vec<u8>),
    MediaStop,
    MediaClosed { error: bool },
    Model(ModelEvent),
    /// The spawned order pipeline settled.
    OrderSettled {
        id: String,
        name: String,
        outcome: OrderOutcome,
    },
    FarewellElapsed,
    TeardownDeadline,
    Shutdown,
}

/// Builds a model leg for a session. Swapped for a channel stub in tests.
pub type ModelConnector =
    Arc<dyn Fn(mpsc::Sender<SessionEvent>) -> mpsc::Sender<ModelCommand> + Send + Sync>;

/// Session collaborators, injected so the orchestrator is testable without
/// sockets.
pub struct SessionDeps {
    pub settings: Arc<Settings>,
    pub calls: Arc<dyn CallStore>,
    pub orders: Arc<dyn OrderStore>,
    pub registry: Arc<SessionRegistry>,
    pub transfer: Arc<dyn CallTransfer>,
    pub connect_model: ModelConnector,
}

impl SessionDeps {
    pub fn production(state: &AppState) -> Self {
        let settings = state.settings.clone();
        let connector_settings = settings.clone();
        Self {
            settings,
            calls: state.calls.clone(),
            orders: state.orders.clone(),
            registry: state.registry.clone(),
            transfer: Arc::new(TelephonyTransfer::new(&state.settings)),
            connect_model: Arc::new(move |events| {
                model::connect(connector_settings.clone(), events)
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Connecting,
    Speaking,
    Listening,
    Terminating,
    Closed,
}

/// A tool-call batch whose completeOrder slot is still settling.
struct PendingBatch {
    responses: Vec<Option<ToolResponse>>,
    slot: usize,
}

struct Session {
    deps: SessionDeps,
    self_tx: mpsc::Sender<SessionEvent>,
    media_tx: mpsc::Sender<TelephonyFrame>,
    model_tx: Option<mpsc::Sender<ModelCommand>>,
    router: Option<ToolRouter>,

    phase: Phase,
    call_sid: String,
    stream_sid: String,
    started_at: DateTime<Utc>,

    /// Accumulated model speech transcript; never reset during the session.
    transcript: String,

    model_open: bool,
    agent_speaking: bool,
    /// Fragments of a cancelled turn keep arriving after `interrupted`; this
    /// stays set until the turn formally completes so they get dropped.
    interrupted_turn: bool,
    was_interrupted: bool,
    tool_call_in_progress: bool,
    order_in_progress: bool,
    transfer_triggered: bool,
    farewell_armed: bool,

    pending_batch: Option<PendingBatch>,
    terminal_applied: bool,
    error_pending: bool,
    error_reason: Option<&'static str>,

    frames_in: u64,
    frames_out: u64,
}

/// Run one session to completion. `events` is the mailbox; `self_tx` is the
/// same channel's sender, kept for timers and spawned pipelines.
pub async fn run(
    deps: SessionDeps,
    mut events: mpsc::Receiver<SessionEvent>,
    self_tx: mpsc::Sender<SessionEvent>,
    media_tx: mpsc::Sender<TelephonyFrame>,
) {
    let mut session = Session {
        deps,
        self_tx,
        media_tx,
        model_tx: None,
        router: None,
        phase: Phase::Init,
        call_sid: String::new(),
        stream_sid: String::new(),
        started_at: Utc::now(),
        transcript: String::new(),
        model_open: false,
        agent_speaking: false,
        interrupted_turn: false,
        was_interrupted: false,
        tool_call_in_progress: false,
        order_in_progress: false,
        transfer_triggered: false,
        farewell_armed: false,
        pending_batch: None,
        terminal_applied: false,
        error_pending: false,
        error_reason: None,
        frames_in: 0,
        frames_out: 0,
    };

    while let Some(event) = events.recv().await {
        session.handle(event).await;
        if session.phase == Phase::Closed {
            break;
        }
    }
}

impl Session {
    async fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::MediaStart(start) => self.on_start(start).await,
            SessionEvent::MediaAudio(frame) => self.on_caller_audio(frame).await,
            SessionEvent::MediaStop => self.on_media_end(false).await,
            SessionEvent::MediaClosed { error } => self.on_media_end(error).await,
            SessionEvent::Model(event) => self.on_model_event(event).await,
            SessionEvent::OrderSettled { id, name, outcome } => {
                self.on_order_settled(id, name, outcome).await
            }
            SessionEvent::FarewellElapsed => {
                if self.phase != Phase::Closed {
                    tracing::info!(call_sid = %self.call_sid, "farewell window elapsed");
                    self.teardown(false).await;
                }
            }
            SessionEvent::TeardownDeadline => {
                if self.phase != Phase::Closed {
                    tracing::warn!(call_sid = %self.call_sid, "teardown grace expired");
                    self.teardown(self.error_pending).await;
                }
            }
            SessionEvent::Shutdown => {
                tracing::info!(call_sid = %self.call_sid, "shutdown requested");
                self.teardown(false).await;
            }
        }
    }

    async fn on_start(&mut self, start: StreamStart) {
        if self.phase != Phase::Init {
            tracing::debug!("duplicate start event ignored");
            return;
        }

        let caller_phone = start
            .custom_parameters
            .get("callerPhone")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        let restaurant_phone = start
            .custom_parameters
            .get("restaurantPhone")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());

        self.call_sid = start.call_sid;
        self.stream_sid = start.stream_sid;
        self.phase = Phase::Connecting;

        self.deps.registry.insert(
            &self.call_sid,
            SessionHandle {
                events: self.self_tx.clone(),
            },
        );

        match self
            .deps
            .calls
            .create_call(&self.call_sid, &self.stream_sid, &caller_phone, &restaurant_phone)
            .await
        {
            Ok(row) => self.started_at = row.started_at,
            Err(e) => {
                // Non-fatal: the phone call proceeds without its record.
                tracing::warn!(call_sid = %self.call_sid, error = %e, "call record create failed");
            }
        }

        self.router = Some(ToolRouter::new(
            self.deps.orders.clone(),
            self.deps.settings.restaurant.id.clone(),
            self.call_sid.clone(),
        ));
        self.model_tx = Some((self.deps.connect_model)(self.self_tx.clone()));

        tracing::info!(
            call_sid = %self.call_sid,
            stream_sid = %self.stream_sid,
            caller_phone = %caller_phone,
            "session started"
        );
    }

    fn is_active(&self) -> bool {
        self.model_open && !matches!(self.phase, Phase::Terminating | Phase::Closed)
    }

    async fn on_caller_audio(&mut self, frame: Vec<u8>) {
        if self.phase == Phase::Init {
            // Race tolerance: media can beat start on the wire.
            tracing::debug!("dropping media before start");
            return;
        }

        self.frames_in += 1;

        if !self.is_active() {
            return;
        }
        if self.tool_call_in_progress {
            // Realtime input interleaved with a tool response is a protocol
            // violation on the model side.
            tracing::trace!("gating caller media during tool call");
            return;
        }

        let Some(model_tx) = &self.model_tx else {
            return;
        };

        match audio::telephony_to_model(&frame) {
            Ok(pcm) => {
                let _ = model_tx.send(ModelCommand::Audio(pcm)).await;
            }
            Err(e) => tracing::debug!(error = %e, "skipping bad caller frame"),
        }
    }

    async fn on_model_event(&mut self, event: ModelEvent) {
        match event {
            ModelEvent::Open => {
                self.model_open = true;
                if self.phase == Phase::Connecting {
                    self.phase = Phase::Speaking;
                }
            }
            ModelEvent::Audio(pcm) => self.on_model_audio(pcm).await,
            ModelEvent::Transcription(text) => {
                self.transcript.push_str(&text);
            }
            ModelEvent::Interrupted => {
                tracing::debug!(call_sid = %self.call_sid, "caller barge-in, cancelling agent turn");
                self.agent_speaking = false;
                self.interrupted_turn = true;
                self.was_interrupted = true;
                let _ = self
                    .media_tx
                    .send(TelephonyFrame::clear(&self.stream_sid))
                    .await;
            }
            ModelEvent::TurnComplete => {
                self.agent_speaking = false;
                self.interrupted_turn = false;
                // A completed turn supersedes any cancelled one; tool calls
                // after this point are acknowledged normally again.
                self.was_interrupted = false;
                if self.phase == Phase::Speaking {
                    self.phase = Phase::Listening;
                }
                self.check_transfer_phrase().await;
            }
            ModelEvent::ToolCalls(calls) => self.on_tool_calls(calls).await,
            ModelEvent::Closed { abnormal } => {
                if abnormal && !matches!(self.phase, Phase::Terminating | Phase::Closed) {
                    tracing::warn!(call_sid = %self.call_sid, "model session lost");
                    self.error_reason = Some("model session closed");
                    self.teardown(true).await;
                } else if abnormal {
                    self.error_pending = true;
                }
            }
        }
    }

    async fn on_model_audio(&mut self, pcm: Vec<u8>) {
        if self.interrupted_turn {
            tracing::trace!("dropping model audio from cancelled turn");
            return;
        }
        if !self.agent_speaking {
            self.agent_speaking = true;
            self.phase = Phase::Speaking;
        }

        match audio::model_to_telephony(&pcm) {
            Ok(mulaw) => {
                let frame = TelephonyFrame::media(&self.stream_sid, &mulaw);
                if self.media_tx.send(frame).await.is_ok() {
                    self.frames_out += 1;
                }
            }
            Err(e) => tracing::debug!(error = %e, "skipping bad model frame"),
        }
    }

    /// Scan the accumulated transcript for the transfer phrase; latch and
    /// fire the transfer on first sight. A REST failure rolls the latch back
    /// so a later turn can retry and a normal terminal can still apply.
    async fn check_transfer_phrase(&mut self) {
        if self.transfer_triggered || !self.transcript.contains(prompts::TRANSFER_PHRASE) {
            return;
        }

        self.transfer_triggered = true;
        if let Err(e) = self.deps.transfer.transfer(&self.call_sid).await {
            tracing::warn!(call_sid = %self.call_sid, error = %e, "transfer failed, latch rolled back");
            self.transfer_triggered = false;
        } else {
            tracing::info!(call_sid = %self.call_sid, "call transferred to a human");
        }
    }

    async fn on_tool_calls(&mut self, calls: Vec<voice_order_tools::ToolCall>) {
        if calls.is_empty() {
            return;
        }
        let Some(router) = self.router.as_mut() else {
            tracing::warn!("tool call before session start, ignoring");
            return;
        };

        self.tool_call_in_progress = true;

        let mut responses: Vec<Option<ToolResponse>> = Vec::with_capacity(calls.len());
        let mut slot: Option<usize> = None;

        for (index, call) in calls.iter().enumerate() {
            match router.dispatch(call) {
                Dispatch::Ready(response) => responses.push(Some(response)),
                Dispatch::Order { id, name, job } => {
                    if self.order_in_progress || slot.is_some() {
                        tracing::warn!("order pipeline already running, rejecting duplicate");
                        responses.push(Some(ToolResponse {
                            id,
                            name,
                            response: json!({ "result": FALLBACK_REPLY }),
                        }));
                        continue;
                    }

                    slot = Some(index);
                    responses.push(None);
                    self.order_in_progress = true;

                    let tx = self.self_tx.clone();
                    tokio::spawn(async move {
                        let outcome = job.run().await;
                        let _ = tx
                            .send(SessionEvent::OrderSettled { id, name, outcome })
                            .await;
                    });
                }
            }
        }

        match slot {
            Some(slot) => self.pending_batch = Some(PendingBatch { responses, slot }),
            None => {
                let batch = responses.into_iter().flatten().collect();
                self.send_tool_responses(batch).await;
            }
        }
    }

    async fn on_order_settled(&mut self, id: String, name: String, outcome: OrderOutcome) {
        self.order_in_progress = false;

        if let Some(router) = self.router.as_mut() {
            router.settle_order(&outcome);
        }
        if outcome.succeeded && self.phase != Phase::Terminating {
            self.arm_farewell();
        }

        let response = ToolResponse {
            id,
            name,
            response: outcome.response,
        };

        if let Some(mut batch) = self.pending_batch.take() {
            batch.responses[batch.slot] = Some(response);
            let batch = batch.responses.into_iter().flatten().collect();
            self.send_tool_responses(batch).await;
        }

        if self.phase == Phase::Terminating {
            self.teardown(self.error_pending).await;
        }
    }

    /// Acknowledge a tool-call batch, in call order, unless the turn that
    /// issued it was cancelled by barge-in: acknowledging a cancelled turn
    /// closes the model session with a protocol error.
    async fn send_tool_responses(&mut self, batch: Vec<ToolResponse>) {
        if self.was_interrupted {
            tracing::info!(
                call_sid = %self.call_sid,
                count = batch.len(),
                "skipping tool response for cancelled turn"
            );
            self.was_interrupted = false;
            self.tool_call_in_progress = false;
            return;
        }

        if let Some(model_tx) = &self.model_tx {
            let _ = model_tx.send(ModelCommand::ToolResponses(batch)).await;
        }
        self.tool_call_in_progress = false;
    }

    fn arm_farewell(&mut self) {
        if self.farewell_armed {
            return;
        }
        self.farewell_armed = true;

        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(FAREWELL_DELAY).await;
            let _ = tx.send(SessionEvent::FarewellElapsed).await;
        });
    }

    async fn on_media_end(&mut self, error: bool) {
        if self.phase == Phase::Closed {
            return;
        }
        if error {
            self.error_pending = true;
            self.error_reason = Some("media stream error");
        }

        if self.order_in_progress {
            tracing::info!(
                call_sid = %self.call_sid,
                "caller gone mid-order, deferring teardown for the pipeline"
            );
            self.phase = Phase::Terminating;
            let tx = self.self_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(ORDER_TEARDOWN_GRACE).await;
                let _ = tx.send(SessionEvent::TeardownDeadline).await;
            });
        } else {
            self.teardown(error).await;
        }
    }

    async fn teardown(&mut self, error: bool) {
        if self.phase == Phase::Closed {
            return;
        }
        self.phase = Phase::Terminating;

        if let Some(model_tx) = self.model_tx.take() {
            let _ = model_tx.send(ModelCommand::Close).await;
        }

        if !self.terminal_applied && !self.call_sid.is_empty() {
            self.terminal_applied = true;
            let result = if self.transfer_triggered {
                self.deps.calls.escalate_call(&self.call_sid).await
            } else if error || self.error_pending {
                self.deps.calls.fail_call(&self.call_sid, self.error_reason).await
            } else {
                self.deps
                    .calls
                    .complete_call(&self.call_sid, self.started_at)
                    .await
            };
            if let Err(e) = result {
                // The call already ended; nothing to do but log it.
                tracing::warn!(call_sid = %self.call_sid, error = %e, "terminal status write failed");
            }
        }

        if let Some(router) = self.router.as_mut() {
            router.clear_cart();
        }
        if !self.call_sid.is_empty() {
            self.deps.registry.remove(&self.call_sid);
        }

        tracing::info!(
            call_sid = %self.call_sid,
            frames_in = self.frames_in,
            frames_out = self.frames_out,
            transferred = self.transfer_triggered,
            "session closed"
        );
        self.phase = Phase::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::timeout;
    use voice_order_core::{mulaw_compress, mulaw_expand};
    use voice_order_persistence::{CallStatus, InMemoryStore, Order, OrderItem, PersistenceError};
    use voice_order_tools::ToolCall;
    use crate::ServerError;

    const TICK: Duration = Duration::from_millis(50);

    #[derive(Default)]
    struct RecordingTransfer {
        count: AtomicUsize,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl CallTransfer for RecordingTransfer {
        async fn transfer(&self, _call_id: &str) -> Result<(), ServerError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(ServerError::Transfer("rest endpoint down".to_string()));
            }
            Ok(())
        }
    }

    /// Order store that sleeps before the order insert, to hold the pipeline
    /// open across a hangup.
    struct SlowStore {
        inner: Arc<InMemoryStore>,
        delay: Duration,
    }

    #[async_trait]
    impl OrderStore for SlowStore {
        async fn upsert_customer(&self, phone: &str, name: &str) -> Result<uuid::Uuid, PersistenceError> {
            self.inner.upsert_customer(phone, name).await
        }

        async fn insert_order(&self, order: &Order) -> Result<(), PersistenceError> {
            tokio::time::sleep(self.delay).await;
            self.inner.insert_order(order).await
        }

        async fn insert_order_items(&self, items: &[OrderItem]) -> Result<(), PersistenceError> {
            self.inner.insert_order_items(items).await
        }
    }

    struct Harness {
        events: mpsc::Sender<SessionEvent>,
        media_rx: mpsc::Receiver<TelephonyFrame>,
        model_rx: mpsc::Receiver<ModelCommand>,
        store: Arc<InMemoryStore>,
        registry: Arc<SessionRegistry>,
        transfer: Arc<RecordingTransfer>,
    }

    fn build_harness(store: Arc<InMemoryStore>, orders: Arc<dyn OrderStore>) -> Harness {
        let registry = Arc::new(SessionRegistry::new());
        let transfer = Arc::new(RecordingTransfer::default());

        let (model_tx, model_rx) = mpsc::channel(64);
        let connector: ModelConnector = Arc::new(move |_| model_tx.clone());

        let (event_tx, event_rx) = mpsc::channel(256);
        let (media_tx, media_rx) = mpsc::channel(64);

        let deps = SessionDeps {
            settings: Arc::new(Settings::default()),
            calls: store.clone(),
            orders,
            registry: registry.clone(),
            transfer: transfer.clone(),
            connect_model: connector,
        };

        tokio::spawn(run(deps, event_rx, event_tx.clone(), media_tx));

        Harness {
            events: event_tx,
            media_rx,
            model_rx,
            store,
            registry,
            transfer,
        }
    }

    fn start_harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        build_harness(store.clone(), store)
    }

    impl Harness {
        async fn send(&self, event: SessionEvent) {
            self.events.send(event).await.expect("session gone");
        }

        async fn start_call(&self) {
            let mut params = HashMap::new();
            params.insert("callerPhone".to_string(), "+15551234567".to_string());
            params.insert("restaurantPhone".to_string(), "+19495550100".to_string());
            self.send(SessionEvent::MediaStart(StreamStart {
                call_sid: "CA1".to_string(),
                stream_sid: "MZ1".to_string(),
                custom_parameters: params,
            }))
            .await;
            self.send(SessionEvent::Model(ModelEvent::Open)).await;
        }

        async fn expect_media_frame(&mut self) -> TelephonyFrame {
            timeout(Duration::from_secs(10), self.media_rx.recv())
                .await
                .expect("no media frame")
                .expect("media channel closed")
        }

        async fn expect_model_command(&mut self) -> ModelCommand {
            timeout(Duration::from_secs(10), self.model_rx.recv())
                .await
                .expect("no model command")
                .expect("model channel closed")
        }

        async fn expect_no_model_command(&mut self) {
            assert!(
                timeout(TICK, self.model_rx.recv()).await.is_err(),
                "unexpected model command"
            );
        }

        async fn wait_closed(&self) {
            timeout(Duration::from_secs(60), async {
                while self.registry.count() > 0 {
                    tokio::time::sleep(TICK).await;
                }
            })
            .await
            .expect("session never closed");
        }
    }

    fn model_pcm() -> Vec<u8> {
        // Six 24kHz samples, two telephony bytes after decimation.
        [1000i16, 1200, 900, -500, -800, -100]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect()
    }

    fn caller_mulaw() -> Vec<u8> {
        vec![mulaw_compress(500); 160]
    }

    fn tool_call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: format!("fc-{name}"),
            name: name.to_string(),
            args,
        }
    }

    fn add_call(item: &str, qty: u32, price: f64) -> ToolCall {
        tool_call(
            "manageOrder",
            json!({"action": "add", "itemName": item, "quantity": qty, "price": price}),
        )
    }

    fn complete_call() -> ToolCall {
        tool_call(
            "completeOrder",
            json!({"customerName": "Ada", "phoneNumber": "5551234567"}),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_before_start_is_dropped() {
        let mut harness = start_harness();
        harness.send(SessionEvent::MediaAudio(caller_mulaw())).await;
        harness.expect_no_model_command().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_parameters_records_unknown_phones() {
        let harness = start_harness();
        harness
            .send(SessionEvent::MediaStart(StreamStart {
                call_sid: "CA1".to_string(),
                stream_sid: "MZ1".to_string(),
                custom_parameters: HashMap::new(),
            }))
            .await;
        tokio::time::sleep(TICK).await;

        let call = harness.store.call("CA1").expect("call record missing");
        assert_eq!(call.caller_phone, "unknown");
        assert_eq!(call.restaurant_phone, "unknown");
        assert_eq!(call.status, CallStatus::InProgress);
        assert_eq!(harness.registry.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_audio_forwarded_to_model() {
        let mut harness = start_harness();
        harness.start_call().await;

        harness.send(SessionEvent::MediaAudio(caller_mulaw())).await;
        match harness.expect_model_command().await {
            ModelCommand::Audio(pcm) => {
                assert_eq!(pcm.len(), caller_mulaw().len() * 4);
                let first = i16::from_le_bytes([pcm[0], pcm[1]]);
                assert_eq!(first, mulaw_expand(mulaw_compress(500)));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_audio_gated_while_tool_call_pending() {
        let store = Arc::new(InMemoryStore::new());
        let slow = Arc::new(SlowStore {
            inner: store.clone(),
            delay: Duration::from_secs(2),
        });
        let mut harness = build_harness(store, slow);
        harness.start_call().await;

        harness
            .send(SessionEvent::Model(ModelEvent::ToolCalls(vec![add_call(
                "Idli", 1, 6.99,
            )])))
            .await;
        let _ = harness.expect_model_command().await;

        // completeOrder holds the tool-call window open until it settles;
        // caller media must not reach the model in that window.
        harness
            .send(SessionEvent::Model(ModelEvent::ToolCalls(vec![
                complete_call(),
            ])))
            .await;
        harness.send(SessionEvent::MediaAudio(caller_mulaw())).await;
        harness.expect_no_model_command().await;

        // Pipeline settles, batch goes out, media flows again.
        match harness.expect_model_command().await {
            ModelCommand::ToolResponses(batch) => assert_eq!(batch.len(), 1),
            other => panic!("unexpected command: {other:?}"),
        }
        harness.send(SessionEvent::MediaAudio(caller_mulaw())).await;
        assert!(matches!(
            harness.expect_model_command().await,
            ModelCommand::Audio(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_barge_in_drops_audio_and_skips_tool_response() {
        let mut harness = start_harness();
        harness.start_call().await;

        // Agent speaks: audio flows to the caller.
        harness
            .send(SessionEvent::Model(ModelEvent::Audio(model_pcm())))
            .await;
        match harness.expect_media_frame().await {
            TelephonyFrame::Media { stream_sid, .. } => assert_eq!(stream_sid, "MZ1"),
            other => panic!("unexpected frame: {other:?}"),
        }

        // Barge-in: a clear frame goes out, buffered fragments are dropped.
        harness
            .send(SessionEvent::Model(ModelEvent::Interrupted))
            .await;
        match harness.expect_media_frame().await {
            TelephonyFrame::Clear { stream_sid } => assert_eq!(stream_sid, "MZ1"),
            other => panic!("unexpected frame: {other:?}"),
        }
        harness
            .send(SessionEvent::Model(ModelEvent::Audio(model_pcm())))
            .await;
        assert!(
            timeout(TICK, harness.media_rx.recv()).await.is_err(),
            "audio from cancelled turn was forwarded"
        );

        // A tool call landing before the next turnComplete is not acknowledged.
        harness
            .send(SessionEvent::Model(ModelEvent::ToolCalls(vec![add_call(
                "Idli", 1, 6.99,
            )])))
            .await;
        harness.expect_no_model_command().await;

        // After turnComplete, acknowledgements resume.
        harness
            .send(SessionEvent::Model(ModelEvent::TurnComplete))
            .await;
        harness
            .send(SessionEvent::Model(ModelEvent::ToolCalls(vec![add_call(
                "Medu Vada", 1, 6.99,
            )])))
            .await;
        match harness.expect_model_command().await {
            ModelCommand::ToolResponses(batch) => assert_eq!(batch.len(), 1),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_phrase_fires_once_and_escalates() {
        let mut harness = start_harness();
        harness.start_call().await;

        harness
            .send(SessionEvent::Model(ModelEvent::Transcription(
                "Let me connect you to a team member. TRANSFER_TO_HUMAN".to_string(),
            )))
            .await;
        harness
            .send(SessionEvent::Model(ModelEvent::TurnComplete))
            .await;
        // The phrase stays in the accumulated transcript; it must not fire again.
        harness
            .send(SessionEvent::Model(ModelEvent::TurnComplete))
            .await;
        tokio::time::sleep(TICK).await;
        assert_eq!(harness.transfer.count.load(Ordering::SeqCst), 1);

        harness.send(SessionEvent::MediaStop).await;
        harness.wait_closed().await;

        let call = harness.store.call("CA1").unwrap();
        assert_eq!(call.status, CallStatus::Escalated);
        assert_eq!(call.status_writes.len(), 1);
        match harness.expect_model_command().await {
            ModelCommand::Close => {}
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_failure_rolls_back_latch() {
        let mut harness = start_harness();
        harness.start_call().await;
        harness.transfer.fail_next.store(true, Ordering::SeqCst);

        harness
            .send(SessionEvent::Model(ModelEvent::Transcription(
                "TRANSFER_TO_HUMAN".to_string(),
            )))
            .await;
        harness
            .send(SessionEvent::Model(ModelEvent::TurnComplete))
            .await;
        // First attempt failed; the next completed turn retries.
        harness
            .send(SessionEvent::Model(ModelEvent::TurnComplete))
            .await;
        tokio::time::sleep(TICK).await;
        assert_eq!(harness.transfer.count.load(Ordering::SeqCst), 2);

        harness.send(SessionEvent::MediaStop).await;
        harness.wait_closed().await;
        assert_eq!(
            harness.store.call("CA1").unwrap().status,
            CallStatus::Escalated
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_flow_batches_and_farewell() {
        let mut harness = start_harness();
        harness.start_call().await;

        harness
            .send(SessionEvent::Model(ModelEvent::ToolCalls(vec![
                add_call("Masala Dosa", 1, 11.49),
                add_call("Mango Lassi", 1, 6.49),
            ])))
            .await;
        let _ = harness.expect_model_command().await;

        harness
            .send(SessionEvent::Model(ModelEvent::ToolCalls(vec![
                complete_call(),
            ])))
            .await;

        match harness.expect_model_command().await {
            ModelCommand::ToolResponses(batch) => {
                assert_eq!(batch.len(), 1);
                assert_eq!(batch[0].response["total"], 19.47);
                assert!(batch[0].response["orderNumber"]
                    .as_str()
                    .unwrap()
                    .starts_with("SB-IRV-"));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let orders = harness.store.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].total_amount, 19.47);
        assert_eq!(harness.store.items_for(orders[0].id).len(), 2);
        assert_eq!(harness.store.customer_count(), 1);

        // The farewell timer ends the session on its own.
        harness.wait_closed().await;
        let call = harness.store.call("CA1").unwrap();
        assert_eq!(call.status, CallStatus::Completed);
        assert_eq!(call.status_writes.len(), 1);
        assert!(call.duration_seconds.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_batch_keeps_call_order() {
        let mut harness = start_harness();
        harness.start_call().await;

        harness
            .send(SessionEvent::Model(ModelEvent::ToolCalls(vec![
                add_call("Masala Dosa", 1, 11.49),
                complete_call(),
            ])))
            .await;

        match harness.expect_model_command().await {
            ModelCommand::ToolResponses(batch) => {
                assert_eq!(batch.len(), 2);
                assert_eq!(batch[0].name, "manageOrder");
                assert_eq!(batch[1].name, "completeOrder");
                assert!(batch[1].response["orderId"].is_string());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hangup_mid_order_defers_teardown() {
        let store = Arc::new(InMemoryStore::new());
        let slow = Arc::new(SlowStore {
            inner: store.clone(),
            delay: Duration::from_secs(2),
        });
        let mut harness = build_harness(store.clone(), slow);
        harness.start_call().await;

        harness
            .send(SessionEvent::Model(ModelEvent::ToolCalls(vec![add_call(
                "Masala Dosa",
                1,
                11.49,
            )])))
            .await;
        let _ = harness.expect_model_command().await;

        harness
            .send(SessionEvent::Model(ModelEvent::ToolCalls(vec![
                complete_call(),
            ])))
            .await;
        // Caller hangs up while the pipeline is still writing.
        harness
            .send(SessionEvent::MediaClosed { error: false })
            .await;

        harness.wait_closed().await;
        assert_eq!(store.orders().len(), 1, "pipeline writes were lost");
        let call = harness.store.call("CA1").unwrap();
        assert_eq!(call.status_writes.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_status_written_exactly_once() {
        let mut harness = start_harness();
        harness.start_call().await;

        harness.send(SessionEvent::MediaStop).await;
        harness.wait_closed().await;

        let call = harness.store.call("CA1").unwrap();
        assert_eq!(call.status, CallStatus::Completed);
        assert_eq!(call.status_writes.len(), 1);
        assert_eq!(harness.registry.count(), 0);
        match harness.expect_model_command().await {
            ModelCommand::Close => {}
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_loss_fails_the_call() {
        let harness = start_harness();
        harness.start_call().await;

        harness
            .send(SessionEvent::Model(ModelEvent::Closed { abnormal: true }))
            .await;
        harness.wait_closed().await;

        let call = harness.store.call("CA1").unwrap();
        assert_eq!(call.status, CallStatus::Failed);
        assert_eq!(call.failure_reason.as_deref(), Some("model session closed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_error_fails_the_call() {
        let harness = start_harness();
        harness.start_call().await;

        harness.send(SessionEvent::MediaClosed { error: true }).await;
        harness.wait_closed().await;

        let call = harness.store.call("CA1").unwrap();
        assert_eq!(call.status, CallStatus::Failed);
        assert_eq!(call.failure_reason.as_deref(), Some("media stream error"));
    }
}
