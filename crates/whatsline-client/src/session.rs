//! Session runtime: the event loop binding transport, lifecycle, pipelines
//! and the store together, plus the public [`Session`] handle.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use whatsline_core::{
    channel::{EventBus, EventStream},
    error::{ClientError, DisconnectReason},
    identity::{chat_kind, is_broadcast, strip_device_suffix},
    retry::ReconnectBackoff,
    store::{HistoryQuery, MessageStore},
    types::{
        CallInfo, CanonicalMessage, Contact, HistorySyncSummary, SessionEvent, SessionStatus,
    },
};

use crate::{
    config::SessionConfig,
    directory::ContactDirectory,
    lifecycle::SessionStateMachine,
    normalize::EventNormalizer,
    resolver::IdentityResolver,
    transport::{ConnectionState, ConnectionUpdate, Transport, TransportEvent},
};

const TRANSPORT_EVENT_BUFFER: usize = 256;
const PIPELINE_BUFFER: usize = 64;

/// Handle to one live session.
///
/// Cheap to clone-ish pieces are shared; dropping every handle does not stop
/// the runtime, call [`Session::shutdown`] for that.
pub struct Session {
    transport: Arc<dyn Transport>,
    store: Arc<dyn MessageStore>,
    bus: EventBus,
    status_rx: watch::Receiver<SessionStatus>,
    manual: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Session {
    /// Bring up a session over the given transport and store.
    ///
    /// Connects the transport and spawns the runtime loop; returns once the
    /// engine accepted the event channel (the channel itself may still be
    /// handshaking).
    pub async fn start(
        transport: Arc<dyn Transport>,
        store: Arc<dyn MessageStore>,
        config: SessionConfig,
    ) -> Result<Self, ClientError> {
        let bus = EventBus::new(config.event_buffer);
        let (status_tx, status_rx) = watch::channel(SessionStatus::Init);
        let manual = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let resolver = Arc::new(IdentityResolver::new(transport.clone()));
        let directory = Arc::new(ContactDirectory::new(transport.clone()));
        let normalizer = Arc::new(EventNormalizer::new(
            transport.clone(),
            resolver.clone(),
            directory.clone(),
            store.clone(),
        ));

        let (event_tx, event_rx) = mpsc::channel(TRANSPORT_EVENT_BUFFER);
        let mut runtime = SessionRuntime {
            transport: transport.clone(),
            store: store.clone(),
            normalizer,
            directory,
            resolver,
            bus: bus.clone(),
            machine: SessionStateMachine::default(),
            backoff: ReconnectBackoff::new(config.retry_base_delay_ms, config.retry_max_delay_ms),
            config,
            status_tx,
            manual: manual.clone(),
            cancel: cancel.clone(),
            heartbeat: None,
            pipelines: HashMap::new(),
            history_chats: HashSet::new(),
            history_messages: 0,
        };

        runtime.connecting();
        transport.connect(event_tx.clone()).await?;
        tokio::spawn(async move { runtime.run(event_rx, event_tx).await });

        Ok(Self {
            transport,
            store,
            bus,
            status_rx,
            manual,
            cancel,
        })
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> EventStream {
        self.bus.subscribe()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> SessionStatus {
        *self.status_rx.borrow()
    }

    /// Close the channel without discarding credentials. No auto-reconnect.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.manual.store(true, Ordering::SeqCst);
        self.transport.close().await
    }

    /// Close the channel and discard credentials.
    pub async fn logout(&self) -> Result<(), ClientError> {
        self.manual.store(true, Ordering::SeqCst);
        self.transport.logout().await
    }

    /// Stop the runtime loop and close the channel.
    pub async fn shutdown(&self) {
        self.manual.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        if let Err(err) = self.transport.close().await {
            debug!(error = %err, "transport close during shutdown failed");
        }
    }

    /// Download the attachment of a media message on demand.
    pub async fn download_media(&self, message: &CanonicalMessage) -> Result<Vec<u8>, ClientError> {
        if self.status() != SessionStatus::Connected {
            return Err(ClientError::not_connected("download_media"));
        }
        let media = message.media.as_ref().ok_or_else(|| {
            ClientError::new(
                whatsline_core::ErrorCategory::Internal,
                "no_media_content",
                format!("message '{}' carries no media descriptor", message.id),
            )
        })?;
        self.transport.download_media(&media.fetch_ref).await
    }

    /// Reject an incoming call previously surfaced as [`SessionEvent::Call`].
    pub async fn reject_call(&self, call: &CallInfo) -> Result<(), ClientError> {
        if self.status() != SessionStatus::Connected {
            return Err(ClientError::not_connected("reject_call"));
        }
        self.transport.reject_call(&call.id, &call.from).await
    }

    /// Query persisted history for one chat, oldest first.
    pub async fn history(
        &self,
        chat_id: &str,
        query: HistoryQuery,
    ) -> Result<Vec<CanonicalMessage>, ClientError> {
        self.store.query(chat_id, query).await
    }
}

struct SessionRuntime {
    transport: Arc<dyn Transport>,
    store: Arc<dyn MessageStore>,
    normalizer: Arc<EventNormalizer>,
    directory: Arc<ContactDirectory>,
    resolver: Arc<IdentityResolver>,
    bus: EventBus,
    machine: SessionStateMachine,
    backoff: ReconnectBackoff,
    config: SessionConfig,
    status_tx: watch::Sender<SessionStatus>,
    manual: Arc<AtomicBool>,
    cancel: CancellationToken,
    heartbeat: Option<CancellationToken>,
    pipelines: HashMap<String, mpsc::Sender<Value>>,
    history_chats: HashSet<String>,
    history_messages: usize,
}

impl SessionRuntime {
    async fn run(
        &mut self,
        mut events: mpsc::Receiver<TransportEvent>,
        event_tx: mpsc::Sender<TransportEvent>,
    ) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if !self.handle_event(event, &event_tx).await {
                        break;
                    }
                }
            }
        }
        self.stop_heartbeat();
        info!("session runtime stopped");
    }

    /// Returns `false` when the session reached a terminal state.
    async fn handle_event(
        &mut self,
        event: TransportEvent,
        event_tx: &mpsc::Sender<TransportEvent>,
    ) -> bool {
        match event {
            TransportEvent::CredentialsUpdate => {
                debug!("transport persisted refreshed credentials");
                true
            }
            TransportEvent::Connection(update) => self.handle_connection(update, event_tx).await,
            TransportEvent::MessageUpsert { envelopes } => {
                for envelope in envelopes {
                    self.dispatch_envelope(envelope).await;
                }
                true
            }
            TransportEvent::MessageUpdate(raw) => {
                self.emit(SessionEvent::MessageUpdate(raw));
                true
            }
            TransportEvent::MessageDelete(raw) => {
                self.emit(SessionEvent::MessageDeleted(raw));
                true
            }
            TransportEvent::MessageReaction(raw) => {
                self.emit(SessionEvent::MessageReaction(raw));
                true
            }
            TransportEvent::Call(raw) => {
                match call_info_of(&raw) {
                    Some(call) => self.emit(SessionEvent::Call(call)),
                    None => debug!("call event without id/from, ignored"),
                }
                true
            }
            TransportEvent::GroupUpdate(raw) => {
                self.emit(SessionEvent::GroupUpdate(raw));
                true
            }
            TransportEvent::GroupParticipantsUpdate(raw) => {
                self.emit(SessionEvent::GroupParticipantsUpdate(raw));
                true
            }
            TransportEvent::PresenceUpdate(raw) => {
                self.emit(SessionEvent::PresenceUpdate(raw));
                true
            }
            TransportEvent::ContactsUpdate(records) => {
                for record in records {
                    self.ingest_contact(&record).await;
                }
                true
            }
            TransportEvent::BlocklistUpdate(raw) => {
                self.emit(SessionEvent::BlocklistUpdate(raw));
                true
            }
            TransportEvent::ChatUpdate(raw) => {
                self.emit(SessionEvent::ChatUpdate(raw));
                true
            }
            TransportEvent::ChatDelete(raw) => {
                self.emit(SessionEvent::ChatDeleted(raw));
                true
            }
            TransportEvent::Notification(raw) => {
                self.emit(SessionEvent::Notification(raw));
                true
            }
            TransportEvent::HistorySync {
                contacts,
                envelopes,
                progress_done,
            } => {
                self.ingest_history(contacts, envelopes, progress_done).await;
                true
            }
        }
    }

    async fn handle_connection(
        &mut self,
        update: ConnectionUpdate,
        event_tx: &mpsc::Sender<TransportEvent>,
    ) -> bool {
        if let Some(code) = update.pairing_code {
            match self.machine.on_pairing_code() {
                Ok((attempt, events)) => {
                    self.emit_all(events);
                    self.emit(SessionEvent::PairingRequired { code, attempt });
                }
                Err(err) => warn!(error = %err, "pairing code in unexpected state"),
            }
        }

        match update.connection {
            Some(ConnectionState::Connecting) => {
                match self.machine.on_connecting() {
                    Ok(events) => self.emit_all(events),
                    Err(err) => warn!(error = %err, "connecting in unexpected state"),
                }
                true
            }
            Some(ConnectionState::Open) => {
                self.on_open().await;
                true
            }
            Some(ConnectionState::Close) => {
                self.on_close(update.status_code, update.details, event_tx)
                    .await
            }
            None => true,
        }
    }

    async fn on_open(&mut self) {
        let (paired, events) = match self.machine.on_open() {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "open in unexpected state");
                return;
            }
        };
        self.backoff.reset();
        if paired {
            self.emit(SessionEvent::PairingSucceeded);
        }
        self.emit_all(events);

        let user = match self.transport.own_id().await {
            Some(own_id) => {
                let stable = strip_device_suffix(&own_id);
                self.directory.resolve(&stable, None).await
            }
            None => Contact::bare("", chat_kind("")),
        };
        info!(user = %user.id, "session connected");
        self.emit(SessionEvent::Connected { user });

        if self.config.mark_online_on_connect
            && let Err(err) = self.transport.mark_online().await
        {
            debug!(error = %err, "mark-online after open failed");
        }
        self.start_heartbeat();
    }

    /// Returns `false` when the close is terminal for the runtime.
    async fn on_close(
        &mut self,
        status_code: Option<u16>,
        details: String,
        event_tx: &mpsc::Sender<TransportEvent>,
    ) -> bool {
        self.stop_heartbeat();
        let manual = self.manual.swap(false, Ordering::SeqCst);
        let (reason, events) = match self.machine.on_close(status_code, manual) {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "close in unexpected state");
                return true;
            }
        };
        self.emit_all(events);

        // A protocol-mandated restart reconnects without surfacing a
        // disconnect to subscribers.
        if reason != DisconnectReason::RestartRequired {
            self.emit(SessionEvent::Disconnected {
                reason,
                status_code,
                details,
            });
        }

        match reason {
            DisconnectReason::LoggedOut => {
                if let Err(err) = self.transport.logout().await {
                    warn!(error = %err, "credential purge after logout failed");
                }
                false
            }
            DisconnectReason::Manual | DisconnectReason::PairingExhausted => false,
            DisconnectReason::RestartRequired | DisconnectReason::ServiceUnavailable => {
                self.reconnect(event_tx).await
            }
            DisconnectReason::ConnectionError => {
                if self.config.auto_reconnect {
                    self.reconnect(event_tx).await
                } else {
                    false
                }
            }
        }
    }

    /// Reconnect with backoff until the engine accepts the channel again.
    /// Returns `false` only when cancelled.
    async fn reconnect(&mut self, event_tx: &mpsc::Sender<TransportEvent>) -> bool {
        loop {
            let (attempt, delay) = self.backoff.next_delay();
            debug!(attempt, ?delay, "reconnecting");
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.machine.on_connecting() {
                Ok(events) => self.emit_all(events),
                Err(err) => {
                    warn!(error = %err, "reconnect in unexpected state");
                    return false;
                }
            }
            match self.transport.connect(event_tx.clone()).await {
                Ok(()) => return true,
                Err(err) => {
                    warn!(error = %err, "reconnect attempt failed");
                    self.emit(SessionEvent::Error {
                        code: err.code.clone(),
                        message: err.message.clone(),
                    });
                    // Close the machine back down so the next iteration may
                    // enter connecting again.
                    if let Ok((_, events)) = self.machine.on_close(None, false) {
                        self.emit_all(events);
                    }
                }
            }
        }
    }

    fn start_heartbeat(&mut self) {
        self.stop_heartbeat();
        let token = self.cancel.child_token();
        let transport = self.transport.clone();
        let period = Duration::from_secs(self.config.heartbeat_interval_secs);
        let child = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = transport.send_presence_ping().await {
                            debug!(error = %err, "presence ping failed");
                        }
                    }
                }
            }
        });
        self.heartbeat = Some(token);
    }

    fn stop_heartbeat(&mut self) {
        if let Some(token) = self.heartbeat.take() {
            token.cancel();
        }
    }

    /// Route one raw message envelope to its chat pipeline.
    ///
    /// One task per chat keeps processing within a chat ordered while
    /// different chats normalize in parallel.
    async fn dispatch_envelope(&mut self, raw: Value) {
        let Some(chat_id) = raw
            .pointer("/key/remoteJid")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
        else {
            warn!("message envelope without chat id dropped");
            self.emit(SessionEvent::Error {
                code: "envelope_missing_chat".to_owned(),
                message: "message envelope carries no chat id".to_owned(),
            });
            return;
        };

        if is_broadcast(&chat_id) {
            self.emit(SessionEvent::BroadcastMessage(raw));
            return;
        }

        // Device-suffixed or alternate spellings of one chat must share a
        // pipeline, or ordering within the chat is lost.
        let chat_key = match self.resolver.resolve(&chat_id).await {
            Ok(stable) => stable,
            Err(err) => {
                debug!(chat = %chat_id, error = %err, "pipeline keyed by stripped chat id");
                strip_device_suffix(&chat_id)
            }
        };

        let sender = match self.pipelines.get(&chat_key) {
            Some(sender) => sender.clone(),
            None => {
                let (tx, rx) = mpsc::channel(PIPELINE_BUFFER);
                tokio::spawn(chat_pipeline(
                    chat_key.clone(),
                    rx,
                    self.normalizer.clone(),
                    self.store.clone(),
                    self.bus.clone(),
                ));
                self.pipelines.insert(chat_key, tx.clone());
                tx
            }
        };
        if sender.send(raw).await.is_err() {
            warn!("chat pipeline task is gone, envelope dropped");
        }
    }

    async fn ingest_contact(&mut self, record: &Value) {
        let Some(id) = record.get("id").and_then(Value::as_str) else {
            return;
        };
        let stable = strip_device_suffix(id);
        let mut contact = match self.directory.get_cached(&stable).await {
            Some(existing) => existing,
            None => Contact::bare(&stable, chat_kind(&stable)),
        };
        if let Some(name) = record
            .get("notify")
            .or_else(|| record.get("name"))
            .and_then(Value::as_str)
        {
            contact.name = Some(name.to_owned());
        }
        if let Some(lid) = record.get("lid").and_then(Value::as_str) {
            let lid = strip_device_suffix(lid);
            self.resolver.seed(&lid, &stable).await;
            contact.lid = Some(lid);
        }
        self.directory.upsert(contact.clone()).await;
        self.emit(SessionEvent::ContactUpdate(contact));
    }

    async fn ingest_history(
        &mut self,
        contacts: Vec<Value>,
        envelopes: Vec<Value>,
        progress_done: bool,
    ) {
        for record in &contacts {
            self.ingest_contact(record).await;
        }
        // History replays in order already, so it is ingested inline rather
        // than through the per-chat pipelines.
        for envelope in envelopes {
            match self.normalizer.normalize(&envelope).await {
                Ok(Some(message)) => match self.store.append(&message).await {
                    Ok(true) => {
                        self.history_chats.insert(message.chat_id.clone());
                        self.history_messages += 1;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        error!(error = %err, chat = %message.chat_id, "history append failed");
                        self.emit(SessionEvent::Error {
                            code: err.code.clone(),
                            message: err.message.clone(),
                        });
                    }
                },
                Ok(None) => {}
                Err(err) => debug!(error = %err, "history envelope skipped"),
            }
        }
        if progress_done {
            let summary = HistorySyncSummary {
                chats: self.history_chats.len(),
                messages: self.history_messages,
            };
            self.history_chats.clear();
            self.history_messages = 0;
            info!(chats = summary.chats, messages = summary.messages, "history sync finished");
            self.emit(SessionEvent::HistorySyncDone(summary));
        }
    }

    fn connecting(&mut self) {
        if let Ok(events) = self.machine.on_connecting() {
            self.emit_all(events);
        }
    }

    fn emit_all(&self, events: Vec<SessionEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let SessionEvent::StatusChanged { status } = &event {
            let _ = self.status_tx.send(*status);
        }
        self.bus.emit(event);
    }
}

/// Serialized processing for one chat: normalize, persist, then emit.
async fn chat_pipeline(
    chat_id: String,
    mut envelopes: mpsc::Receiver<Value>,
    normalizer: Arc<EventNormalizer>,
    store: Arc<dyn MessageStore>,
    bus: EventBus,
) {
    while let Some(raw) = envelopes.recv().await {
        let message = match normalizer.normalize(&raw).await {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(err) => {
                warn!(chat = %chat_id, error = %err, "envelope rejected by normalizer");
                bus.emit(SessionEvent::Error {
                    code: err.code.clone(),
                    message: err.message.clone(),
                });
                continue;
            }
        };

        // Persist before emitting so a subscriber reacting to the event can
        // already read the record. A store fault is surfaced but does not
        // suppress the message event.
        if let Err(err) = store.append(&message).await {
            error!(chat = %chat_id, error = %err, "message append failed");
            bus.emit(SessionEvent::Error {
                code: err.code.clone(),
                message: err.message.clone(),
            });
        }
        let event = if message.from_me {
            SessionEvent::MessageSent(message)
        } else {
            SessionEvent::MessageReceived(message)
        };
        bus.emit(event);
    }
}

/// Pull the fields a call descriptor needs out of a raw call payload.
fn call_info_of(raw: &Value) -> Option<CallInfo> {
    let id = raw.get("id").and_then(Value::as_str)?.to_owned();
    let from = raw
        .get("from")
        .or_else(|| raw.get("chatId"))
        .and_then(Value::as_str)?;
    Some(CallInfo {
        id,
        from: strip_device_suffix(from),
        is_video: raw
            .get("isVideo")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        is_group: raw
            .get("isGroup")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        status: raw
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("offer")
            .to_owned(),
        timestamp_ms: raw
            .get("date")
            .or_else(|| raw.get("timestamp"))
            .and_then(Value::as_u64)
            .map(|secs| secs.saturating_mul(1_000))
            .unwrap_or(0),
    })
}
