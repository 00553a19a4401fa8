//! In-memory [`DuplexSocket`] for session, registry and broadcast tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::DuplexSocket;
use super::connection::{Connection, Session, SessionConfig};
use crate::domain::{ConnectionId, ConnectionRegistry, HubMessage};
use crate::error::HubError;

/// Client-side handle used to push inbound frames into a [`MockSocket`].
pub(crate) type MockClient = mpsc::UnboundedSender<Result<Vec<u8>, HubError>>;

/// Records outbound frames and lets tests inject read/write faults.
#[derive(Debug)]
pub(crate) struct MockSocket {
    inbound: Mutex<mpsc::UnboundedReceiver<Result<Vec<u8>, HubError>>>,
    sent: parking_lot::Mutex<Vec<String>>,
    fail_writes: AtomicBool,
    stall_writes: AtomicBool,
    close_calls: AtomicUsize,
    closed: CancellationToken,
}

impl MockSocket {
    pub(crate) fn pair() -> (Arc<Self>, MockClient) {
        let (tx, rx) = mpsc::unbounded_channel();
        let socket = Arc::new(Self {
            inbound: Mutex::new(rx),
            sent: parking_lot::Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            stall_writes: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            closed: CancellationToken::new(),
        });
        (socket, tx)
    }

    pub(crate) fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_stall_writes(&self, stall: bool) {
        self.stall_writes.store(stall, Ordering::SeqCst);
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn sent(&self) -> Vec<HubMessage> {
        self.sent
            .lock()
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    pub(crate) fn sent_with_code(&self, code: i32) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|m| m.code == code)
            .map(|m| m.data)
            .collect()
    }
}

#[async_trait]
impl DuplexSocket for MockSocket {
    async fn receive(&self) -> Result<Vec<u8>, HubError> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            () = self.closed.cancelled() => Err(HubError::Read("socket closed".to_string())),
            frame = inbound.recv() => frame.unwrap_or_else(|| Err(HubError::Read("closed by peer".to_string()))),
        }
    }

    async fn send(&self, text: String) -> Result<(), HubError> {
        if self.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(HubError::Write("injected write failure".to_string()));
        }
        if self.closed.is_cancelled() {
            return Err(HubError::Write("socket closed".to_string()));
        }
        self.sent.lock().push(text);
        Ok(())
    }

    async fn close(&self) -> Result<(), HubError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.cancel();
        Ok(())
    }
}

/// Short windows so paused-clock tests stay readable.
pub(crate) fn test_config() -> SessionConfig {
    SessionConfig {
        heartbeat_timeout: std::time::Duration::from_secs(5),
        heartbeat_tick: std::time::Duration::from_secs(1),
        mailbox_capacity: 4,
        send_timeout: std::time::Duration::from_millis(500),
    }
}

/// Opens and registers a session over a fresh mock socket.
#[allow(clippy::panic)]
pub(crate) async fn open_mock_session(
    registry: &Arc<ConnectionRegistry>,
    shutdown: &CancellationToken,
) -> (Session, Arc<MockSocket>, MockClient) {
    let (socket, client) = MockSocket::pair();
    let socket_dyn: Arc<dyn DuplexSocket> = Arc::clone(&socket) as Arc<dyn DuplexSocket>;
    let Ok(session) = Connection::open(
        ConnectionId::random(),
        socket_dyn,
        registry,
        test_config(),
        shutdown,
    )
    .await
    else {
        panic!("session should register");
    };
    (session, socket, client)
}
