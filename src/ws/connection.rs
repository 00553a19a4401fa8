//! Per-client session: reader, mailbox writer and heartbeat supervisor.
//!
//! A [`Connection`] owns one client's [`DuplexSocket`], a bounded outbound
//! mailbox, a write lock and the liveness timestamp. [`Session::run`] drives
//! it through `Active → Closing → Closed`:
//!
//! - the **reader** task answers heartbeat pings and reports receive errors;
//! - the **writer** task drains the mailbox, logging (not acting on) write
//!   errors;
//! - the **supervisor** (inline in `run`) ends the session on heartbeat
//!   timeout, reader failure, or cancellation.
//!
//! Whichever path ends the session calls [`Connection::teardown`], which is
//! idempotent; `run` then joins both tasks before returning.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::DuplexSocket;
use crate::domain::{ConnectionId, ConnectionRegistry, HubMessage, is_heartbeat_ping};
use crate::error::HubError;

/// Per-session timing and capacity settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle window after which a client without heartbeats is evicted.
    pub heartbeat_timeout: Duration,
    /// Interval at which the supervisor checks liveness.
    pub heartbeat_tick: Duration,
    /// Capacity of the outbound mailbox.
    pub mailbox_capacity: usize,
    /// Upper bound on a single direct write (broadcast, pong, notice).
    pub send_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(30),
            heartbeat_tick: Duration::from_secs(1),
            mailbox_capacity: 800,
            send_timeout: Duration::from_secs(2),
        }
    }
}

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registered and serving.
    Active,
    /// Teardown in progress.
    Closing,
    /// Unregistered, mailbox and socket closed.
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The reader failed to receive (peer gone or transport error).
    ReadFailure,
    /// No heartbeat within the configured window.
    HeartbeatTimeout,
    /// Teardown was requested elsewhere, or the process is shutting down.
    Shutdown,
}

/// Direct broadcast bookkeeping: at most one broadcast write in flight, and
/// the newest price that arrived while it was.
#[derive(Debug, Default)]
struct BroadcastSlot {
    in_flight: bool,
    latest: Option<String>,
}

/// One client connection registered in the hub.
pub struct Connection {
    id: ConnectionId,
    socket: Arc<dyn DuplexSocket>,
    registry: Weak<ConnectionRegistry>,
    config: SessionConfig,
    mailbox: Mutex<Option<mpsc::Sender<String>>>,
    write_lock: tokio::sync::Mutex<()>,
    last_activity: RwLock<Instant>,
    state: Mutex<SessionState>,
    broadcast: Mutex<BroadcastSlot>,
    cancel: CancellationToken,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// A constructed connection plus the receiving end of its mailbox.
///
/// Consumed by [`Session::run`].
#[derive(Debug)]
pub struct Session {
    connection: Arc<Connection>,
    mailbox: mpsc::Receiver<String>,
}

impl Connection {
    /// Builds an unregistered connection.
    ///
    /// The session's cancellation token is a child of `shutdown`, so
    /// cancelling `shutdown` ends every session with [`SessionEnd::Shutdown`].
    #[must_use]
    pub fn new(
        id: ConnectionId,
        socket: Arc<dyn DuplexSocket>,
        registry: &Arc<ConnectionRegistry>,
        config: SessionConfig,
        shutdown: &CancellationToken,
    ) -> Session {
        let (tx, rx) = mpsc::channel(config.mailbox_capacity.max(1));
        let connection = Arc::new(Self {
            id,
            socket,
            registry: Arc::downgrade(registry),
            config,
            mailbox: Mutex::new(Some(tx)),
            write_lock: tokio::sync::Mutex::new(()),
            last_activity: RwLock::new(Instant::now()),
            state: Mutex::new(SessionState::Active),
            broadcast: Mutex::new(BroadcastSlot::default()),
            cancel: shutdown.child_token(),
        });
        Session {
            connection,
            mailbox: rx,
        }
    }

    /// Builds a connection and registers it in `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::DuplicateConnection`] if the id is taken; the
    /// socket is closed in that case.
    pub async fn open(
        id: ConnectionId,
        socket: Arc<dyn DuplexSocket>,
        registry: &Arc<ConnectionRegistry>,
        config: SessionConfig,
        shutdown: &CancellationToken,
    ) -> Result<Session, HubError> {
        let session = Self::new(id, socket, registry, config, shutdown);
        let conn = Arc::clone(&session.connection);
        if let Err(e) = registry.register(Arc::clone(&conn)).await {
            *conn.state.lock() = SessionState::Closed;
            conn.cancel.cancel();
            let _ = conn.socket.close().await;
            return Err(e);
        }
        tracing::info!(conn_id = %conn.id, "connection registered");
        Ok(session)
    }

    /// Returns the connection id.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Returns `true` while the connection is registered and serving.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Time since the last heartbeat (or since construction).
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.read().elapsed()
    }

    fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// Writes a message directly to the socket, bypassing the mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Write`] if the socket rejects the frame.
    pub async fn send_to_client(&self, message: &HubMessage) -> Result<(), HubError> {
        let _guard = self.write_lock.lock().await;
        self.socket.send(message.to_json()).await
    }

    /// [`Connection::send_to_client`] bounded by the configured send timeout.
    ///
    /// Waiting for the write lock counts against the bound, so a stalled
    /// client cannot hold up the caller longer than one timeout.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::SendTimeout`] if the bound elapses, otherwise the
    /// error from the write itself.
    pub async fn send_bounded(&self, message: &HubMessage) -> Result<(), HubError> {
        let timeout = self.config.send_timeout;
        time::timeout(timeout, self.send_to_client(message))
            .await
            .map_err(|_| HubError::SendTimeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })?
    }

    /// Queues a payload for the mailbox writer without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::MailboxFull`] if the mailbox is at capacity (the
    /// payload is dropped) or [`HubError::MailboxClosed`] after teardown.
    pub fn enqueue(&self, payload: impl Into<String>) -> Result<(), HubError> {
        let mailbox = self.mailbox.lock();
        let Some(sender) = mailbox.as_ref() else {
            return Err(HubError::MailboxClosed);
        };
        sender.try_send(payload.into()).map_err(|e| match e {
            TrySendError::Full(_) => HubError::MailboxFull(self.id.clone()),
            TrySendError::Closed(_) => HubError::MailboxClosed,
        })
    }

    /// Offers a price to the direct broadcast path.
    ///
    /// Returns `true` when no broadcast write is in flight: the caller now
    /// owns the write and drains follow-ups with
    /// [`Connection::next_broadcast`]. Otherwise returns `false` and `price`
    /// replaces whatever was still waiting behind the in-flight write.
    pub fn offer_broadcast(&self, price: &str) -> bool {
        let mut slot = self.broadcast.lock();
        if slot.in_flight {
            slot.latest = Some(price.to_string());
            false
        } else {
            slot.in_flight = true;
            true
        }
    }

    /// Takes the newest price offered during the last broadcast write, or
    /// releases the slot when there is none (or the connection is closing).
    pub fn next_broadcast(&self) -> Option<String> {
        let mut slot = self.broadcast.lock();
        let next = slot.latest.take().filter(|_| self.is_active());
        if next.is_none() {
            slot.in_flight = false;
        }
        next
    }

    /// Tears the connection down: unregister, close the mailbox, cancel the
    /// session tasks, close the socket.
    ///
    /// Only the first call does anything; it returns `true`. Later calls
    /// return `false`.
    pub async fn teardown(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state != SessionState::Active {
                return false;
            }
            *state = SessionState::Closing;
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(&self.id).await;
        }
        self.mailbox.lock().take();
        self.cancel.cancel();

        match time::timeout(self.config.send_timeout, self.socket.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(conn_id = %self.id, error = %e, "socket close failed"),
            Err(_) => tracing::debug!(conn_id = %self.id, "socket close timed out"),
        }

        *self.state.lock() = SessionState::Closed;
        tracing::debug!(conn_id = %self.id, "connection torn down");
        true
    }

    /// Heartbeat supervisor loop. Returns once the session must end.
    async fn supervise(&self, failures: &mut mpsc::Receiver<HubError>) -> SessionEnd {
        // interval_at panics on a zero period
        let tick = self.config.heartbeat_tick.max(Duration::from_millis(1));
        let mut ticker = time::interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return SessionEnd::Shutdown,
                failure = failures.recv() => {
                    let reason = failure.map_or_else(|| "reader exited".to_string(), |e| e.to_string());
                    tracing::info!(conn_id = %self.id, reason = %reason, "read failure, closing session");
                    return SessionEnd::ReadFailure;
                }
                _ = ticker.tick() => {
                    let idle = self.idle_for();
                    if idle >= self.config.heartbeat_timeout {
                        let err = HubError::HeartbeatTimeout { elapsed_secs: idle.as_secs() };
                        tracing::info!(conn_id = %self.id, error = %err, "closing silent connection");
                        if let Err(e) = self.send_bounded(&HubMessage::heartbeat_timeout()).await {
                            tracing::debug!(conn_id = %self.id, error = %e, "timeout notice not delivered");
                        }
                        return SessionEnd::HeartbeatTimeout;
                    }
                }
            }
        }
    }
}

impl Session {
    /// Returns the connection driven by this session.
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Runs the session to completion.
    ///
    /// Spawns the reader and mailbox writer, supervises until the session
    /// ends, tears the connection down, then waits for both tasks to stop.
    pub async fn run(self) -> SessionEnd {
        let Self {
            connection: conn,
            mailbox,
        } = self;

        let (failure_tx, mut failure_rx) = mpsc::channel(1);
        let reader = tokio::spawn(read_loop(Arc::clone(&conn), failure_tx));
        let writer = tokio::spawn(write_loop(Arc::clone(&conn), mailbox));

        let end = conn.supervise(&mut failure_rx).await;
        conn.teardown().await;

        for (task, handle) in [("reader", reader), ("writer", writer)] {
            if let Err(e) = handle.await {
                tracing::error!(conn_id = %conn.id, task, error = %e, "session task failed");
            }
        }

        tracing::info!(conn_id = %conn.id, reason = ?end, "session ended");
        end
    }
}

async fn read_loop(conn: Arc<Connection>, failures: mpsc::Sender<HubError>) {
    loop {
        let frame = tokio::select! {
            () = conn.cancel.cancelled() => return,
            frame = conn.socket.receive() => frame,
        };
        match frame {
            Ok(frame) if is_heartbeat_ping(&frame) => {
                conn.touch();
                if let Err(e) = conn.send_bounded(&HubMessage::pong()).await {
                    tracing::warn!(conn_id = %conn.id, error = %e, "pong not delivered");
                }
            }
            Ok(frame) => {
                tracing::trace!(conn_id = %conn.id, len = frame.len(), "ignoring inbound frame");
            }
            Err(e) => {
                if !conn.cancel.is_cancelled() {
                    tracing::warn!(conn_id = %conn.id, error = %e, "receive failed");
                    let _ = failures.try_send(e);
                }
                return;
            }
        }
    }
}

async fn write_loop(conn: Arc<Connection>, mut mailbox: mpsc::Receiver<String>) {
    loop {
        let payload = tokio::select! {
            () = conn.cancel.cancelled() => break,
            payload = mailbox.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };
        if let Err(e) = conn.send_to_client(&HubMessage::success(payload)).await {
            tracing::warn!(conn_id = %conn.id, error = %e, "mailbox write failed");
        }
    }
    mailbox.close();
    tracing::debug!(conn_id = %conn.id, "mailbox writer stopped");
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::MessageCode;
    use crate::ws::mock::{MockSocket, open_mock_session, test_config};

    /// Lets spawned tasks run to idle without moving the paused clock much.
    async fn settle() {
        time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn ping_refreshes_activity_and_yields_one_pong() {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();
        let (session, socket, client) = open_mock_session(&registry, &shutdown).await;
        let conn = Arc::clone(session.connection());
        let handle = tokio::spawn(session.run());

        time::sleep(Duration::from_secs(3)).await;
        assert!(conn.idle_for() >= Duration::from_secs(3));

        let _ = client.send(Ok(b"ping".to_vec()));
        settle().await;

        assert!(conn.idle_for() < Duration::from_millis(10));
        let pongs = socket.sent_with_code(MessageCode::Pong.as_i32());
        assert_eq!(pongs, vec!["pong".to_string()]);
        assert_eq!(socket.sent().len(), 1);

        shutdown.cancel();
        assert!(matches!(handle.await, Ok(SessionEnd::Shutdown)));
    }

    #[tokio::test(start_paused = true)]
    async fn quoted_pings_are_heartbeats_too() {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();
        let (session, socket, client) = open_mock_session(&registry, &shutdown).await;
        let handle = tokio::spawn(session.run());

        let _ = client.send(Ok(b"\"ping\"".to_vec()));
        let _ = client.send(Ok(b"'ping'".to_vec()));
        let _ = client.send(Ok(b"{\"op\":\"subscribe\"}".to_vec()));
        settle().await;

        assert_eq!(socket.sent_with_code(1).len(), 2);
        assert_eq!(socket.sent().len(), 2);

        shutdown.cancel();
        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_is_evicted_within_one_tick_of_timeout() {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();
        let (session, socket, _client) = open_mock_session(&registry, &shutdown).await;
        let conn = Arc::clone(session.connection());
        let started = Instant::now();
        let handle = tokio::spawn(session.run());

        time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(registry.len().await, 1);

        let Ok(end) = handle.await else {
            panic!("session task panicked");
        };
        let elapsed = started.elapsed();
        assert_eq!(end, SessionEnd::HeartbeatTimeout);
        assert!(elapsed >= Duration::from_secs(5), "{elapsed:?}");
        assert!(elapsed <= Duration::from_secs(6), "{elapsed:?}");

        assert!(registry.is_empty().await);
        assert_eq!(conn.state(), SessionState::Closed);
        assert_eq!(socket.close_calls(), 1);
        assert_eq!(
            socket.sent_with_code(MessageCode::Error.as_i32()),
            vec!["heartbeat timeout".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_keep_the_session_alive() {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();
        let (session, _socket, client) = open_mock_session(&registry, &shutdown).await;
        let handle = tokio::spawn(session.run());

        for _ in 0..4 {
            time::sleep(Duration::from_secs(3)).await;
            let _ = client.send(Ok(b"ping".to_vec()));
            settle().await;
        }
        assert_eq!(registry.len().await, 1);

        shutdown.cancel();
        assert!(matches!(handle.await, Ok(SessionEnd::Shutdown)));
        assert!(registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn read_failure_tears_down_and_unregisters() {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();
        let (session, socket, client) = open_mock_session(&registry, &shutdown).await;
        let handle = tokio::spawn(session.run());

        let _ = client.send(Err(HubError::Read("connection reset".to_string())));

        assert!(matches!(handle.await, Ok(SessionEnd::ReadFailure)));
        assert!(registry.is_empty().await);
        assert_eq!(socket.close_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn write_failures_do_not_end_the_session() {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();
        let (session, socket, client) = open_mock_session(&registry, &shutdown).await;
        let conn = Arc::clone(session.connection());
        let handle = tokio::spawn(session.run());

        socket.set_fail_writes(true);
        tokio_test::assert_ok!(conn.enqueue("1.10"));
        assert!(conn.send_bounded(&HubMessage::success("1.11")).await.is_err());
        let _ = client.send(Ok(b"ping".to_vec()));
        settle().await;
        assert!(conn.is_active());
        assert_eq!(registry.len().await, 1);

        socket.set_fail_writes(false);
        tokio_test::assert_ok!(conn.enqueue("1.12"));
        settle().await;
        assert_eq!(socket.sent_with_code(0), vec!["1.12".to_string()]);

        // still subject to the heartbeat window
        let Ok(end) = handle.await else {
            panic!("session task panicked");
        };
        assert_eq!(end, SessionEnd::HeartbeatTimeout);
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();
        let (session, socket, _client) = open_mock_session(&registry, &shutdown).await;
        let conn = Arc::clone(session.connection());

        assert!(conn.teardown().await);
        assert!(!conn.teardown().await);

        assert!(registry.is_empty().await);
        assert_eq!(socket.close_calls(), 1);
        assert_eq!(conn.state(), SessionState::Closed);
        assert_eq!(conn.enqueue("x"), Err(HubError::MailboxClosed));

        // the session still winds down cleanly after an external teardown
        assert_eq!(session.run().await, SessionEnd::Shutdown);
        assert_eq!(socket.close_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_teardowns_close_exactly_once() {
        for _ in 0..50 {
            let registry = Arc::new(ConnectionRegistry::new());
            let shutdown = CancellationToken::new();
            let (session, socket, _client) = open_mock_session(&registry, &shutdown).await;
            let conn = Arc::clone(session.connection());
            let barrier = Arc::new(tokio::sync::Barrier::new(2));

            let contenders: Vec<_> = (0..2)
                .map(|_| {
                    let conn = Arc::clone(&conn);
                    let barrier = Arc::clone(&barrier);
                    tokio::spawn(async move {
                        barrier.wait().await;
                        conn.teardown().await
                    })
                })
                .collect();

            let mut performed = 0;
            for contender in contenders {
                let Ok(did_teardown) = contender.await else {
                    panic!("teardown task panicked");
                };
                performed += usize::from(did_teardown);
            }

            assert_eq!(performed, 1);
            assert_eq!(socket.close_calls(), 1);
            assert!(registry.is_empty().await);
            assert_eq!(conn.state(), SessionState::Closed);
        }
    }

    #[tokio::test]
    async fn joined_teardowns_report_one_winner() {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();
        let (session, socket, _client) = open_mock_session(&registry, &shutdown).await;
        let conn = session.connection();

        let (first, second) = tokio::join!(conn.teardown(), conn.teardown());

        assert!(first ^ second);
        assert_eq!(socket.close_calls(), 1);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn broadcast_slot_keeps_only_the_newest_waiting_price() {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();
        let (session, _socket, _client) = open_mock_session(&registry, &shutdown).await;
        let conn = session.connection();

        assert!(conn.offer_broadcast("1.0"));
        assert!(!conn.offer_broadcast("1.1"));
        assert!(!conn.offer_broadcast("1.2"));

        assert_eq!(conn.next_broadcast(), Some("1.2".to_string()));
        assert_eq!(conn.next_broadcast(), None);
        // slot released
        assert!(conn.offer_broadcast("1.3"));
    }

    #[tokio::test]
    async fn broadcast_slot_discards_waiting_price_after_teardown() {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();
        let (session, _socket, _client) = open_mock_session(&registry, &shutdown).await;
        let conn = session.connection();

        assert!(conn.offer_broadcast("1.0"));
        assert!(!conn.offer_broadcast("1.1"));
        assert!(conn.teardown().await);

        assert_eq!(conn.next_broadcast(), None);
    }

    #[tokio::test]
    async fn full_mailbox_drops_payload() {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();
        let (session, _socket, _client) = open_mock_session(&registry, &shutdown).await;
        let conn = session.connection();

        for i in 0..test_config().mailbox_capacity {
            tokio_test::assert_ok!(conn.enqueue(i.to_string()));
        }
        assert_eq!(
            conn.enqueue("overflow"),
            Err(HubError::MailboxFull(conn.id().clone()))
        );
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected_and_socket_closed() {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();
        let (first, _s1, _c1) = open_mock_session(&registry, &shutdown).await;

        let (socket, _client) = MockSocket::pair();
        let result = Connection::open(
            first.connection().id().clone(),
            Arc::clone(&socket) as Arc<dyn DuplexSocket>,
            &registry,
            test_config(),
            &shutdown,
        )
        .await;

        assert!(matches!(result, Err(HubError::DuplicateConnection(_))));
        assert_eq!(socket.close_calls(), 1);
        assert_eq!(registry.len().await, 1);
    }
}
