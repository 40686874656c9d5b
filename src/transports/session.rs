// ABOUTME: Client session registry: lifecycle, outbound ordering, reverse requests
// ABOUTME: Sessions are in-process; multi-worker deployments need sticky routing
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Sessions
//!
//! One [`Session`] per connected client, keyed by an opaque id. Server-to-
//! client traffic (responses on streaming transports, notifications, reverse
//! requests like `elicitation/create`) flows through a single per-session
//! channel, which is what guarantees emission-order delivery.
//!
//! Each session owns a root cancellation token; per-request tokens derive
//! from it so a disconnect cancels every in-flight pipeline.

use crate::cancellation::CancellationToken;
use crate::errors::{AppError, AppResult};
use crate::jsonrpc::JsonRpcRequest;
use crate::metrics::MetricsRegistry;
use crate::permissions::IdentityContext;
use crate::plugins::{ElicitationRequest, ElicitationResponse, ElicitationTransport};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// MCP session state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created; only `initialize`/`ping` are accepted
    New,
    /// `initialize` answered; waiting for the initialized notification
    Initializing,
    /// Fully open
    Ready,
    /// Torn down
    Closed,
}

/// One connected client
pub struct Session {
    /// Opaque session id
    pub id: String,
    /// Authenticated caller
    pub identity: IdentityContext,
    /// Virtual server binding; set from a scoped path or initialize params
    server_id: StdMutex<Option<Uuid>>,
    /// Negotiated protocol version
    pub protocol_version: Mutex<String>,
    phase: Mutex<SessionPhase>,
    /// Ordered outbound channel toward the client
    outbound_tx: mpsc::UnboundedSender<Value>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    /// Resource URIs this session subscribed to
    subscriptions: Mutex<HashSet<String>>,
    /// Root of this session's cancellation tree
    pub cancel_root: CancellationToken,
    /// Per-request cancellation tokens keyed by serialized request id
    request_tokens: DashMap<String, CancellationToken>,
    /// Server-initiated requests awaiting a client response
    pending_reverse: DashMap<String, oneshot::Sender<Value>>,
    last_seen: StdMutex<Instant>,
}

impl Session {
    fn new(
        identity: IdentityContext,
        server_id: Option<Uuid>,
        parent_cancel: &CancellationToken,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            id: Uuid::new_v4().to_string(),
            identity,
            server_id: StdMutex::new(server_id),
            protocol_version: Mutex::new(String::new()),
            phase: Mutex::new(SessionPhase::New),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            subscriptions: Mutex::new(HashSet::new()),
            cancel_root: parent_cancel.child(),
            request_tokens: DashMap::new(),
            pending_reverse: DashMap::new(),
            last_seen: StdMutex::new(Instant::now()),
        }
    }

    /// The virtual server this session is scoped to, if any
    #[must_use]
    pub fn server_scope(&self) -> Option<Uuid> {
        self.server_id.lock().ok().and_then(|guard| *guard)
    }

    /// Bind the session to a virtual server (initialize params may name one)
    pub fn bind_server(&self, server_id: Uuid) {
        if let Ok(mut guard) = self.server_id.lock() {
            guard.get_or_insert(server_id);
        }
    }

    /// Current phase
    pub async fn phase(&self) -> SessionPhase {
        *self.phase.lock().await
    }

    /// Advance the state machine
    pub async fn set_phase(&self, phase: SessionPhase) {
        *self.phase.lock().await = phase;
    }

    /// Mark activity for idle-eviction accounting
    pub fn touch(&self) {
        if let Ok(mut last) = self.last_seen.lock() {
            *last = Instant::now();
        }
    }

    fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .map_or(Duration::ZERO, |last| last.elapsed())
    }

    /// Queue an outbound frame; ordering is the channel's FIFO order
    pub fn push_outbound(&self, frame: Value) {
        if self.outbound_tx.send(frame).is_err() {
            debug!(session = %self.id, "Outbound push after channel close");
        }
    }

    /// Take the outbound receiver; each session has exactly one consumer
    /// (its streaming transport)
    pub async fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<Value>> {
        self.outbound_rx.lock().await.take()
    }

    /// Derive and track a cancellation token for a request id
    pub fn begin_request(&self, request_id: &Value) -> CancellationToken {
        let token = self.cancel_root.child();
        self.request_tokens
            .insert(request_id.to_string(), token.clone());
        token
    }

    /// Drop tracking for a finished request
    pub fn finish_request(&self, request_id: &Value) {
        self.request_tokens.remove(&request_id.to_string());
    }

    /// Handle `$/cancelRequest` for a request id
    pub fn cancel_request(&self, request_id: &Value) {
        if let Some((_, token)) = self.request_tokens.remove(&request_id.to_string()) {
            debug!(session = %self.id, request_id = %request_id, "Request cancelled by client");
            token.cancel();
        }
    }

    /// Subscribe to a resource URI
    pub async fn subscribe(&self, uri: &str) {
        self.subscriptions.lock().await.insert(uri.to_owned());
    }

    /// Unsubscribe from a resource URI
    pub async fn unsubscribe(&self, uri: &str) {
        self.subscriptions.lock().await.remove(uri);
    }

    async fn is_subscribed(&self, uri: &str) -> bool {
        self.subscriptions.lock().await.contains(uri)
    }

    /// Send a server-initiated request and await the client's response.
    /// Used for `elicitation/create` and `sampling/createMessage`.
    ///
    /// # Errors
    /// Returns `Timeout` when the client does not answer within `timeout`.
    pub async fn reverse_request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> AppResult<Value> {
        let id = format!("srv-{}", Uuid::new_v4());
        let (tx, rx) = oneshot::channel();
        self.pending_reverse.insert(id.clone(), tx);

        let request = JsonRpcRequest::new(json!(id), method, Some(params));
        self.push_outbound(serde_json::to_value(&request)?);

        let result = tokio::time::timeout(timeout, rx).await;
        self.pending_reverse.remove(&id);
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(AppError::cancelled("Session closed during reverse request")),
            Err(_) => Err(AppError::timeout(format!(
                "Client did not answer {method} in time"
            ))),
        }
    }

    /// Route a client response frame to its pending reverse request.
    /// Returns true when the frame matched one.
    pub fn complete_reverse(&self, id: &Value, result: Value) -> bool {
        let Some(key) = id.as_str() else {
            return false;
        };
        match self.pending_reverse.remove(key) {
            Some((_, tx)) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Tear the session down: cancel every in-flight request and close the
    /// outbound channel
    pub async fn close(&self) {
        self.set_phase(SessionPhase::Closed).await;
        self.cancel_root.cancel();
        self.pending_reverse.clear();
    }
}

#[async_trait::async_trait]
impl ElicitationTransport for Session {
    async fn elicit(
        &self,
        request: &ElicitationRequest,
        timeout: Duration,
    ) -> AppResult<ElicitationResponse> {
        let params = json!({
            "message": request.message,
            "requestedSchema": request.schema,
        });
        let result = self
            .reverse_request("elicitation/create", params, timeout)
            .await?;

        let action = result
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("cancel");
        Ok(match action {
            "accept" => ElicitationResponse::Accept {
                data: result.get("content").cloned().unwrap_or(Value::Null),
            },
            "decline" => ElicitationResponse::Decline,
            _ => ElicitationResponse::Cancel,
        })
    }
}

/// Registry of live sessions
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    idle_timeout: Duration,
    metrics: Arc<MetricsRegistry>,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    /// Build the registry
    #[must_use]
    pub fn new(
        idle_timeout: Duration,
        metrics: Arc<MetricsRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_timeout,
            metrics,
            shutdown,
        }
    }

    /// Open a session
    #[must_use]
    pub fn create(&self, identity: IdentityContext, server_id: Option<Uuid>) -> Arc<Session> {
        let session = Arc::new(Session::new(identity, server_id, &self.shutdown));
        self.metrics.session_opened();
        info!(session = %session.id, server = ?server_id, "Session opened");
        self.sessions.insert(session.id.clone(), session.clone());
        session
    }

    /// Look up a live session
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| s.clone())
    }

    /// Close and remove a session
    pub async fn close(&self, id: &str) {
        if let Some((_, session)) = self.sessions.remove(id) {
            session.close().await;
            self.metrics.session_closed();
            info!(session = %id, "Session closed");
        }
    }

    /// Push `notifications/resources/updated` to every session subscribed to
    /// `uri`, in each session's emission order
    pub async fn notify_resource_updated(&self, uri: &str) {
        let note = JsonRpcRequest::notification(
            "notifications/resources/updated",
            Some(json!({ "uri": uri })),
        );
        let Ok(frame) = serde_json::to_value(&note) else {
            return;
        };
        for entry in &self.sessions {
            if entry.value().is_subscribed(uri).await {
                entry.value().push_outbound(frame.clone());
            }
        }
    }

    /// Idle-eviction loop; exits on shutdown
    pub async fn run_eviction_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let doomed: Vec<String> = self
                        .sessions
                        .iter()
                        .filter(|s| s.value().idle_for() > self.idle_timeout)
                        .map(|s| s.key().clone())
                        .collect();
                    for id in doomed {
                        warn!(session = %id, "Evicting idle session");
                        self.close(&id).await;
                    }
                }
                () = self.shutdown.cancelled() => return,
            }
        }
    }

    /// Number of open sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are open
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::models::TokenScope;
    use std::collections::HashMap;

    fn identity() -> IdentityContext {
        IdentityContext {
            email: "a@example.com".to_owned(),
            is_platform_admin: false,
            teams: HashMap::new(),
            jti: "jti".to_owned(),
            token_scope: TokenScope::All,
            token_scope_ref: None,
        }
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new(
            Duration::from_secs(3600),
            Arc::new(MetricsRegistry::new()),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn outbound_preserves_emission_order() {
        let registry = registry();
        let session = registry.create(identity(), None);
        let mut rx = session.take_outbound().await.unwrap();

        for i in 0..10 {
            session.push_outbound(json!({"seq": i}));
        }
        for i in 0..10 {
            assert_eq!(rx.recv().await.unwrap()["seq"], json!(i));
        }
    }

    #[tokio::test]
    async fn close_cancels_in_flight_requests() {
        let registry = registry();
        let session = registry.create(identity(), None);
        let token = session.begin_request(&json!(1));
        assert!(!token.is_cancelled());

        registry.close(&session.id).await;
        assert!(token.is_cancelled());
        assert!(registry.get(&session.id).is_none());
    }

    #[tokio::test]
    async fn cancel_request_targets_one_id() {
        let registry = registry();
        let session = registry.create(identity(), None);
        let first = session.begin_request(&json!(1));
        let second = session.begin_request(&json!(2));

        session.cancel_request(&json!(1));
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[tokio::test]
    async fn reverse_request_round_trip() {
        let registry = registry();
        let session = registry.create(identity(), None);
        let mut rx = session.take_outbound().await.unwrap();

        let session_for_reply = session.clone();
        let responder = tokio::spawn(async move {
            let frame = rx.recv().await.unwrap();
            let id = frame["id"].clone();
            session_for_reply.complete_reverse(&id, json!({"action": "accept", "content": {}}));
        });

        let result = session
            .reverse_request("elicitation/create", json!({}), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result["action"], "accept");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn resource_notifications_reach_subscribers_only() {
        let registry = registry();
        let subscribed = registry.create(identity(), None);
        let other = registry.create(identity(), None);
        subscribed.subscribe("file:///a.txt").await;

        let mut sub_rx = subscribed.take_outbound().await.unwrap();
        let mut other_rx = other.take_outbound().await.unwrap();

        registry.notify_resource_updated("file:///a.txt").await;

        let frame = sub_rx.recv().await.unwrap();
        assert_eq!(frame["method"], "notifications/resources/updated");
        assert!(other_rx.try_recv().is_err());
    }
}
