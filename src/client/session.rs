//! Client-side crisis session controller.
//!
//! A per-participant state machine that owns the local ordered message
//! list, tracks connection status, retries failed sends with bounded
//! exponential backoff, reconnects after connection loss, and securely
//! wipes all session content on close. It talks to the server through the
//! `MessageTransport` trait so the state machine is testable in isolation
//! from WebSocket code.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::common::time::get_timestamp_millis;
use crate::protocol::{MessageStatus, SenderClass, WireMessage};

use super::error::{DeliveryFailure, SessionError};
use super::retention::{storage_key, RetentionStore};

/// Connection status of a client session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    /// Terminal: reconnect attempts exhausted, explicit user action required
    ReconnectFailed,
}

/// A message as held locally by one session controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalMessage {
    pub id: String,
    pub text: String,
    pub sender: SenderClass,
    /// Unix timestamp in milliseconds (UTC)
    pub timestamp: i64,
    pub status: MessageStatus,
}

/// Payload handed to the transport for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub text: String,
    /// Room owner to address; `None` means the sender's own room
    pub target_user_id: Option<String>,
}

/// Transport abstraction between the session controller and the wire
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Deliver one chat message to the server
    async fn deliver(&self, message: OutboundMessage) -> Result<(), DeliveryFailure>;

    /// Re-establish the underlying connection
    async fn reconnect(&self) -> Result<(), DeliveryFailure>;
}

/// Session configuration with production defaults
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub case_id: String,
    pub participant_id: String,
    /// Retained local history older than this is discarded on start
    pub max_storage_time: Duration,
    /// Grace delay between closing a session and its secure cleanup
    pub auto_cleanup_delay: Duration,
    /// Maximum delivery attempts per failed message
    pub max_retries: u32,
    /// Maximum reconnection attempts before the terminal failed state
    pub max_reconnect_attempts: u32,
    pub retry_base_delay: Duration,
    pub reconnect_base_delay: Duration,
    /// Cap applied to every backoff wait
    pub reconnect_max_delay: Duration,
}

impl SessionConfig {
    pub fn new(case_id: impl Into<String>, participant_id: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            participant_id: participant_id.into(),
            max_storage_time: Duration::from_secs(60 * 60),
            auto_cleanup_delay: Duration::from_secs(5 * 60),
            max_retries: 3,
            max_reconnect_attempts: 5,
            retry_base_delay: Duration::from_secs(1),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
        }
    }
}

/// Point-in-time view of the session for rendering
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub messages: Vec<LocalMessage>,
    pub status: ConnectionStatus,
    pub error: Option<String>,
    pub session_active: bool,
    pub message_count: usize,
    pub unsent_count: usize,
    pub last_message_time: Option<i64>,
}

struct UnsentEntry {
    message: LocalMessage,
    target_user_id: Option<String>,
}

struct SessionInner {
    messages: Vec<LocalMessage>,
    unsent: HashMap<String, UnsentEntry>,
    /// Ids in the order they entered the unsent map; retries re-drive in
    /// this order after a reconnect
    unsent_order: Vec<String>,
    status: ConnectionStatus,
    reconnect_attempts: u32,
    session_active: bool,
    last_error: Option<String>,
}

impl SessionInner {
    fn set_message_status(&mut self, message_id: &str, status: MessageStatus) {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == message_id) {
            message.status = status;
        }
    }
}

/// Compute the wait before retry/reconnect attempt `attempt` (1-based).
///
/// Exponential (`base * 2^attempt`) and capped, so successive waits are
/// non-decreasing up to the cap.
pub fn backoff_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(16));
    base.saturating_mul(factor).min(cap)
}

/// The client session controller
pub struct CrisisSession<T: MessageTransport> {
    config: SessionConfig,
    transport: Arc<T>,
    retention: Arc<RetentionStore>,
    inner: Mutex<SessionInner>,
    cleanup_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<T: MessageTransport + 'static> CrisisSession<T> {
    pub fn new(
        config: SessionConfig,
        transport: Arc<T>,
        retention: Arc<RetentionStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            transport,
            retention,
            inner: Mutex::new(SessionInner {
                messages: Vec::new(),
                unsent: HashMap::new(),
                unsent_order: Vec::new(),
                status: ConnectionStatus::Idle,
                reconnect_attempts: 0,
                session_active: false,
                last_error: None,
            }),
            cleanup_task: std::sync::Mutex::new(None),
        })
    }

    /// Open the session: load retained history younger than the retention
    /// window (stale entries discarded) and mark the session connected.
    pub async fn start(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.status = ConnectionStatus::Connecting;
        }

        let key = storage_key(&self.config.case_id);
        let now = get_timestamp_millis();
        let cutoff = self.config.max_storage_time.as_millis() as i64;
        let retained = self.retention.load(&key);
        let total = retained.len();
        let fresh: Vec<LocalMessage> = retained
            .into_iter()
            .filter(|m| now - m.timestamp < cutoff)
            .collect();
        if total > fresh.len() {
            tracing::debug!(
                "Discarded {} stale retained message(s) for case '{}'",
                total - fresh.len(),
                self.config.case_id
            );
        }

        let mut inner = self.inner.lock().await;
        inner.messages = fresh;
        inner.status = ConnectionStatus::Connected;
        inner.session_active = true;
        inner.reconnect_attempts = 0;
        inner.last_error = None;
    }

    /// Send a message, optimistically appending it as `Sending`.
    ///
    /// Rejected outright once the session has been closed or wiped, so no
    /// content can land in a torn-down session. On delivery failure the
    /// message is marked `Failed` and registered for retry; the returned
    /// message reflects the final status.
    pub async fn send_message(
        &self,
        text: &str,
        sender: SenderClass,
        target_user_id: Option<&str>,
    ) -> Result<LocalMessage, SessionError> {
        let trimmed = text.trim();
        let message = {
            let mut inner = self.inner.lock().await;
            if !inner.session_active {
                return Err(SessionError::SessionClosed);
            }
            if trimmed.is_empty() {
                inner.last_error = Some("Message text cannot be empty".to_string());
                return Err(SessionError::EmptyMessage);
            }

            let message = LocalMessage {
                id: Uuid::new_v4().to_string(),
                text: trimmed.to_string(),
                sender,
                timestamp: get_timestamp_millis(),
                status: MessageStatus::Sending,
            };
            inner.messages.push(message.clone());
            inner.last_error = None;
            self.persist(&inner);
            message
        };

        let outbound = OutboundMessage {
            text: message.text.clone(),
            target_user_id: target_user_id.map(str::to_string),
        };

        match self.transport.deliver(outbound.clone()).await {
            Ok(()) => {
                let mut inner = self.inner.lock().await;
                inner.set_message_status(&message.id, MessageStatus::Sent);
                self.persist(&inner);
                Ok(LocalMessage {
                    status: MessageStatus::Sent,
                    ..message
                })
            }
            Err(e) => {
                tracing::warn!("Failed to send message '{}': {}", message.id, e);
                let mut inner = self.inner.lock().await;
                inner.set_message_status(&message.id, MessageStatus::Failed);
                let failed = LocalMessage {
                    status: MessageStatus::Failed,
                    ..message
                };
                inner.unsent.insert(
                    failed.id.clone(),
                    UnsentEntry {
                        message: failed.clone(),
                        target_user_id: outbound.target_user_id,
                    },
                );
                inner.unsent_order.push(failed.id.clone());
                inner.last_error = Some(format!("Message not sent: {}", e));
                self.persist(&inner);
                Ok(failed)
            }
        }
    }

    /// Record a message received from the room broadcast
    pub async fn receive_message(&self, wire: &WireMessage) {
        let mut inner = self.inner.lock().await;
        inner.messages.push(LocalMessage {
            id: wire.id.clone(),
            text: wire.text.clone(),
            sender: wire.sender,
            timestamp: wire.timestamp,
            status: MessageStatus::Sent,
        });
        self.persist(&inner);
    }

    /// Retry a failed message, up to the configured attempt cap.
    ///
    /// Each failed attempt waits exponentially longer (capped) before the
    /// next. The entry keeps its `Failed` status while attempts are in
    /// flight, so the unsent queue always mirrors the failed messages.
    /// Exhausting the cap leaves the message `Failed` and returns a
    /// terminal error; the message is never silently dropped.
    pub async fn retry_message(&self, message_id: &str) -> Result<(), SessionError> {
        let outbound = {
            let mut inner = self.inner.lock().await;
            match inner.unsent.get(message_id) {
                Some(entry) => OutboundMessage {
                    text: entry.message.text.clone(),
                    target_user_id: entry.target_user_id.clone(),
                },
                None => {
                    inner.last_error =
                        Some(format!("Message {} not found in unsent queue", message_id));
                    return Err(SessionError::UnknownMessage(message_id.to_string()));
                }
            }
        };

        let max_retries = self.config.max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;

            match self.transport.deliver(outbound.clone()).await {
                Ok(()) => {
                    let mut inner = self.inner.lock().await;
                    inner.set_message_status(message_id, MessageStatus::Sent);
                    inner.unsent.remove(message_id);
                    inner.unsent_order.retain(|id| id != message_id);
                    inner.last_error = None;
                    self.persist(&inner);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        "Retry {}/{} for message '{}' failed: {}",
                        attempt,
                        max_retries,
                        message_id,
                        e
                    );
                    if attempt >= max_retries {
                        let mut inner = self.inner.lock().await;
                        inner.last_error = Some(format!("Failed to resend message: {}", e));
                        self.persist(&inner);
                        return Err(SessionError::RetriesExhausted {
                            message_id: message_id.to_string(),
                            attempts: max_retries,
                        });
                    }
                    tokio::time::sleep(backoff_delay(
                        self.config.retry_base_delay,
                        attempt,
                        self.config.reconnect_max_delay,
                    ))
                    .await;
                }
            }
        }
    }

    /// React to a lost connection: reconnect with capped exponential
    /// backoff, then automatically re-drive every unsent message in the
    /// order it was added. Exhausting the attempt cap leaves the session in
    /// the terminal `ReconnectFailed` state.
    pub async fn handle_connection_loss(&self) -> Result<(), SessionError> {
        {
            let mut inner = self.inner.lock().await;
            inner.status = ConnectionStatus::Disconnected;
            inner.last_error = Some("Connection lost. Attempting to reconnect...".to_string());
        }

        let max_attempts = self.config.max_reconnect_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            {
                let mut inner = self.inner.lock().await;
                inner.status = ConnectionStatus::Reconnecting;
                inner.reconnect_attempts = attempt;
            }
            tokio::time::sleep(backoff_delay(
                self.config.reconnect_base_delay,
                attempt,
                self.config.reconnect_max_delay,
            ))
            .await;

            match self.transport.reconnect().await {
                Ok(()) => {
                    tracing::info!("Reconnected after {} attempt(s)", attempt);
                    let pending = {
                        let mut inner = self.inner.lock().await;
                        inner.status = ConnectionStatus::Connected;
                        inner.last_error = None;
                        inner.unsent_order.clone()
                    };
                    if !pending.is_empty() {
                        tracing::info!("Retrying {} unsent message(s)", pending.len());
                    }
                    for message_id in pending {
                        // A terminal retry failure records its own state
                        let _ = self.retry_message(&message_id).await;
                    }
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Reconnection attempt {}/{} failed: {}", attempt, max_attempts, e);
                    if attempt >= max_attempts {
                        let mut inner = self.inner.lock().await;
                        inner.status = ConnectionStatus::ReconnectFailed;
                        inner.last_error = Some(
                            "Unable to reconnect. Please check your connection and try again."
                                .to_string(),
                        );
                        return Err(SessionError::ReconnectFailed {
                            attempts: max_attempts,
                        });
                    }
                }
            }
        }
    }

    /// Close the session and schedule secure cleanup after the grace delay
    pub async fn close_session(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().await;
            inner.session_active = false;
            inner.status = ConnectionStatus::Idle;
        }

        let delay = self.config.auto_cleanup_delay;
        let session = Arc::clone(self);
        let mut slot = self
            .cleanup_task
            .lock()
            .expect("cleanup task lock poisoned");
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Clear the slot first so cleanup does not abort this very task
            session
                .cleanup_task
                .lock()
                .expect("cleanup task lock poisoned")
                .take();
            session.secure_cleanup().await;
        }));

        tracing::info!("Session closed. Cleanup scheduled in {:?}", delay);
    }

    /// Erase all session content: messages, the unsent queue, pending
    /// timers, and every locally retained artifact keyed by the case id.
    ///
    /// Security-critical: every exit path from a crisis session must reach
    /// this routine so no message content survives on a shared device.
    pub async fn secure_cleanup(&self) {
        if let Some(task) = self
            .cleanup_task
            .lock()
            .expect("cleanup task lock poisoned")
            .take()
        {
            task.abort();
        }

        {
            let mut inner = self.inner.lock().await;
            inner.messages.clear();
            inner.unsent.clear();
            inner.unsent_order.clear();
            inner.status = ConnectionStatus::Idle;
            inner.reconnect_attempts = 0;
            inner.session_active = false;
            inner.last_error = None;
        }

        let removed = self.retention.wipe_matching(&self.config.case_id);
        tracing::info!(
            "Secure cleanup completed for case '{}' ({} retained entry(ies) wiped)",
            self.config.case_id,
            removed
        );
    }

    /// Cancel any scheduled cleanup and wipe immediately
    pub async fn force_cleanup(&self) {
        self.secure_cleanup().await;
    }

    // ---------------- accessors ----------------

    pub async fn status(&self) -> ConnectionStatus {
        self.inner.lock().await.status
    }

    pub async fn messages(&self) -> Vec<LocalMessage> {
        self.inner.lock().await.messages.clone()
    }

    pub async fn unsent_count(&self) -> usize {
        self.inner.lock().await.unsent.len()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.lock().await.last_error.clone()
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.session_active
    }

    /// Point-in-time view for rendering
    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        SessionSnapshot {
            message_count: inner.messages.len(),
            unsent_count: inner.unsent.len(),
            last_message_time: inner.messages.last().map(|m| m.timestamp),
            messages: inner.messages.clone(),
            status: inner.status,
            error: inner.last_error.clone(),
            session_active: inner.session_active,
        }
    }

    /// Persist the current message list to local retention.
    ///
    /// Must be called with the inner lock held so saves cannot interleave.
    fn persist(&self, inner: &SessionInner) {
        self.retention
            .save(&storage_key(&self.config.case_id), inner.messages.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Transport whose second delivery blocks until released, so tests can
    /// observe session state while an attempt is in flight
    struct GatedTransport {
        calls: AtomicUsize,
        entered: Notify,
        release: Notify,
    }

    impl GatedTransport {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                entered: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl MessageTransport for GatedTransport {
        async fn deliver(&self, _message: OutboundMessage) -> Result<(), DeliveryFailure> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(DeliveryFailure::NotConnected);
            }
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }

        async fn reconnect(&self) -> Result<(), DeliveryFailure> {
            Ok(())
        }
    }

    fn test_config() -> SessionConfig {
        let mut config = SessionConfig::new("case-001", "alice");
        config.max_retries = 3;
        config.max_reconnect_attempts = 3;
        config.retry_base_delay = Duration::from_millis(1);
        config.reconnect_base_delay = Duration::from_millis(1);
        config.reconnect_max_delay = Duration::from_millis(8);
        config.auto_cleanup_delay = Duration::from_millis(20);
        config
    }

    fn session_with(
        transport: MockMessageTransport,
        config: SessionConfig,
    ) -> (Arc<CrisisSession<MockMessageTransport>>, Arc<RetentionStore>) {
        let retention = Arc::new(RetentionStore::new());
        let session = CrisisSession::new(config, Arc::new(transport), retention.clone());
        (session, retention)
    }

    #[tokio::test]
    async fn test_start_transitions_to_connected() {
        // given:
        let (session, _retention) = session_with(MockMessageTransport::new(), test_config());

        // when:
        session.start().await;

        // then:
        assert_eq!(session.status().await, ConnectionStatus::Connected);
        assert!(session.is_active().await);
    }

    #[tokio::test]
    async fn test_start_discards_stale_retained_messages() {
        // given: one fresh and one stale retained message
        let retention = Arc::new(RetentionStore::new());
        let now = get_timestamp_millis();
        retention.save(
            &storage_key("case-001"),
            vec![
                LocalMessage {
                    id: "fresh".to_string(),
                    text: "hola".to_string(),
                    sender: SenderClass::User,
                    timestamp: now - 1000,
                    status: MessageStatus::Sent,
                },
                LocalMessage {
                    id: "stale".to_string(),
                    text: "old".to_string(),
                    sender: SenderClass::User,
                    timestamp: now - 2 * 60 * 60 * 1000,
                    status: MessageStatus::Sent,
                },
            ],
        );
        let session = CrisisSession::new(
            test_config(),
            Arc::new(MockMessageTransport::new()),
            retention,
        );

        // when:
        session.start().await;

        // then: only the fresh message survives
        let messages = session.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "fresh");
    }

    #[tokio::test]
    async fn test_send_message_marks_sent_on_success() {
        // given:
        let mut transport = MockMessageTransport::new();
        transport.expect_deliver().times(1).returning(|_| Ok(()));
        let (session, _retention) = session_with(transport, test_config());
        session.start().await;

        // when:
        let message = session
            .send_message("Hola", SenderClass::User, None)
            .await
            .unwrap();

        // then:
        assert_eq!(message.status, MessageStatus::Sent);
        assert_eq!(message.text, "Hola");
        let messages = session.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, MessageStatus::Sent);
        assert_eq!(session.unsent_count().await, 0);
    }

    #[tokio::test]
    async fn test_send_message_rejects_blank_text() {
        // given:
        let (session, _retention) = session_with(MockMessageTransport::new(), test_config());
        session.start().await;

        // when:
        let result = session.send_message("   ", SenderClass::User, None).await;

        // then: rejected, nothing appended, error string exposed
        assert!(matches!(result, Err(SessionError::EmptyMessage)));
        assert!(session.messages().await.is_empty());
        assert!(session.last_error().await.is_some());
    }

    #[tokio::test]
    async fn test_send_message_registers_failure_for_retry() {
        // given: a transport that always fails
        let mut transport = MockMessageTransport::new();
        transport
            .expect_deliver()
            .times(1)
            .returning(|_| Err(DeliveryFailure::NotConnected));
        let (session, _retention) = session_with(transport, test_config());
        session.start().await;

        // when:
        let message = session
            .send_message("Hola", SenderClass::User, None)
            .await
            .unwrap();

        // then: failed, still in the list, and queued for retry
        assert_eq!(message.status, MessageStatus::Failed);
        let messages = session.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, MessageStatus::Failed);
        assert_eq!(session.unsent_count().await, 1);
        assert!(session.last_error().await.unwrap().contains("not sent"));
    }

    #[tokio::test]
    async fn test_retry_message_succeeds_after_transient_failure() {
        // given: delivery fails once, then succeeds on retry
        let mut transport = MockMessageTransport::new();
        let mut seq = Sequence::new();
        transport
            .expect_deliver()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(DeliveryFailure::NotConnected));
        transport
            .expect_deliver()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let (session, _retention) = session_with(transport, test_config());
        session.start().await;
        let failed = session
            .send_message("Hola", SenderClass::User, None)
            .await
            .unwrap();

        // when:
        session.retry_message(&failed.id).await.unwrap();

        // then:
        assert_eq!(session.messages().await[0].status, MessageStatus::Sent);
        assert_eq!(session.unsent_count().await, 0);
        assert!(session.last_error().await.is_none());
    }

    #[tokio::test]
    async fn test_retry_message_exhaustion_is_terminal_but_never_drops() {
        // given: delivery always fails; one initial send plus three retries
        let mut transport = MockMessageTransport::new();
        transport
            .expect_deliver()
            .times(4)
            .returning(|_| Err(DeliveryFailure::NotConnected));
        let (session, _retention) = session_with(transport, test_config());
        session.start().await;
        let failed = session
            .send_message("Hola", SenderClass::User, None)
            .await
            .unwrap();

        // when:
        let result = session.retry_message(&failed.id).await;

        // then: terminal error, message still present as failed
        assert!(matches!(
            result,
            Err(SessionError::RetriesExhausted { attempts: 3, .. })
        ));
        let messages = session.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, MessageStatus::Failed);
        assert_eq!(session.unsent_count().await, 1);
    }

    #[tokio::test]
    async fn test_retry_keeps_message_failed_while_attempt_is_in_flight() {
        // given: one failed message queued for retry, with the retry attempt
        // held open by the transport
        let transport = Arc::new(GatedTransport::new());
        let retention = Arc::new(RetentionStore::new());
        let session = CrisisSession::new(test_config(), transport.clone(), retention);
        session.start().await;
        let failed = session
            .send_message("Hola", SenderClass::User, None)
            .await
            .unwrap();
        assert_eq!(failed.status, MessageStatus::Failed);

        // when: a retry is in flight but not yet resolved
        let retry_session = session.clone();
        let message_id = failed.id.clone();
        let retry = tokio::spawn(async move { retry_session.retry_message(&message_id).await });
        transport.entered.notified().await;

        // then: the snapshot still shows the message as failed while it sits
        // in the unsent queue
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.unsent_count, 1);
        assert_eq!(snapshot.messages[0].status, MessageStatus::Failed);

        // and: once the attempt resolves, the message is sent and dequeued
        transport.release.notify_one();
        retry.await.unwrap().unwrap();
        assert_eq!(session.messages().await[0].status, MessageStatus::Sent);
        assert_eq!(session.unsent_count().await, 0);
    }

    #[tokio::test]
    async fn test_retry_unknown_message_is_rejected() {
        // given:
        let (session, _retention) = session_with(MockMessageTransport::new(), test_config());
        session.start().await;

        // when:
        let result = session.retry_message("no-such-id").await;

        // then:
        assert!(matches!(result, Err(SessionError::UnknownMessage(_))));
        assert!(session.last_error().await.is_some());
    }

    #[tokio::test]
    async fn test_forced_disconnect_mid_send_retries_automatically() {
        // given: the first delivery fails mid-send, reconnect succeeds, the
        // redriven delivery succeeds
        let mut transport = MockMessageTransport::new();
        let mut seq = Sequence::new();
        transport
            .expect_deliver()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(DeliveryFailure::Send("connection dropped".to_string())));
        transport
            .expect_reconnect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        transport
            .expect_deliver()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let (session, _retention) = session_with(transport, test_config());
        session.start().await;
        let failed = session
            .send_message("Hola", SenderClass::User, None)
            .await
            .unwrap();
        assert_eq!(failed.status, MessageStatus::Failed);

        // when: the connection loss is handled
        session.handle_connection_loss().await.unwrap();

        // then: reconnected and the message reached sent without user action
        assert_eq!(session.status().await, ConnectionStatus::Connected);
        assert_eq!(session.messages().await[0].status, MessageStatus::Sent);
        assert_eq!(session.unsent_count().await, 0);
    }

    #[tokio::test]
    async fn test_reconnect_exhaustion_reaches_terminal_state() {
        // given: reconnect never succeeds
        let mut transport = MockMessageTransport::new();
        transport
            .expect_reconnect()
            .times(3)
            .returning(|| Err(DeliveryFailure::Connect("refused".to_string())));
        let (session, _retention) = session_with(transport, test_config());
        session.start().await;

        // when:
        let result = session.handle_connection_loss().await;

        // then: terminal state requiring explicit user action
        assert!(matches!(
            result,
            Err(SessionError::ReconnectFailed { attempts: 3 })
        ));
        assert_eq!(session.status().await, ConnectionStatus::ReconnectFailed);
        assert!(session.last_error().await.unwrap().contains("Unable to reconnect"));
    }

    #[tokio::test]
    async fn test_close_session_schedules_secure_cleanup() {
        // given: a session with one sent message
        let mut transport = MockMessageTransport::new();
        transport.expect_deliver().returning(|_| Ok(()));
        let (session, retention) = session_with(transport, test_config());
        session.start().await;
        session
            .send_message("Hola", SenderClass::User, None)
            .await
            .unwrap();
        assert!(!retention.is_empty());

        // when: closed and the grace delay elapses
        session.close_session().await;
        assert_eq!(session.status().await, ConnectionStatus::Idle);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // then: everything is wiped
        assert!(session.messages().await.is_empty());
        assert_eq!(session.unsent_count().await, 0);
        assert_eq!(session.status().await, ConnectionStatus::Idle);
        assert!(!session.is_active().await);
        assert!(retention.is_empty());
    }

    #[tokio::test]
    async fn test_force_cleanup_cancels_scheduled_cleanup_and_wipes_now() {
        // given: a closed session waiting for its grace delay
        let mut transport = MockMessageTransport::new();
        transport
            .expect_deliver()
            .returning(|_| Err(DeliveryFailure::NotConnected));
        let (session, retention) = session_with(transport, test_config());
        session.start().await;
        session
            .send_message("Hola", SenderClass::User, None)
            .await
            .unwrap();
        session.close_session().await;

        // when: wiped immediately
        session.force_cleanup().await;

        // then: no message content remains anywhere
        assert!(session.messages().await.is_empty());
        assert_eq!(session.unsent_count().await, 0);
        assert!(retention.is_empty());
    }

    #[tokio::test]
    async fn test_send_message_rejected_after_terminal_reconnect_failure_cleanup() {
        // given: reconnect attempts exhausted and the session wiped
        let mut transport = MockMessageTransport::new();
        transport
            .expect_reconnect()
            .times(3)
            .returning(|| Err(DeliveryFailure::Connect("refused".to_string())));
        let (session, retention) = session_with(transport, test_config());
        session.start().await;
        let _ = session.handle_connection_loss().await;
        session.force_cleanup().await;

        // when: another line is sent into the dead session
        let result = session.send_message("Hola", SenderClass::User, None).await;

        // then: rejected, nothing retained
        assert!(matches!(result, Err(SessionError::SessionClosed)));
        assert!(session.messages().await.is_empty());
        assert!(retention.is_empty());
    }

    #[tokio::test]
    async fn test_receive_message_appends_remote_message() {
        // given:
        let (session, _retention) = session_with(MockMessageTransport::new(), test_config());
        session.start().await;
        let wire = WireMessage {
            id: "m1".to_string(),
            case_id: "case-001".to_string(),
            user_id: "vol-1".to_string(),
            text: "estoy aquí".to_string(),
            sender: SenderClass::Support,
            timestamp: 1000,
            status: MessageStatus::Sent,
        };

        // when:
        session.receive_message(&wire).await;

        // then:
        let messages = session.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, SenderClass::Support);
        assert_eq!(messages[0].status, MessageStatus::Sent);
    }

    #[test]
    fn test_backoff_delays_are_non_decreasing_up_to_the_cap() {
        // given:
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(30);

        // when:
        let delays: Vec<Duration> = (1..=8).map(|i| backoff_delay(base, i, cap)).collect();

        // then: monotonic, capped
        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert_eq!(delays[0], Duration::from_secs(2));
        assert_eq!(delays[1], Duration::from_secs(4));
        assert_eq!(*delays.last().unwrap(), cap);
    }

    #[test]
    fn test_backoff_never_overflows_on_large_attempts() {
        // given / when:
        let delay = backoff_delay(Duration::from_secs(1), u32::MAX, Duration::from_secs(30));

        // then:
        assert_eq!(delay, Duration::from_secs(30));
    }
}
