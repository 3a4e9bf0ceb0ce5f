//! Mock connection for testing
//!
//! Delivers frames into an in-memory channel instead of a socket, so tests
//! can assert exactly what a client would have received. Compiled into the
//! crate (not `cfg(test)`) because downstream crates use it in their own
//! tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::error::ConnectionError;

/// In-memory [`Connection`] that records written frames
pub struct MockConnection {
    addr: String,
    outbox: mpsc::UnboundedSender<Bytes>,
    fail_writes: AtomicBool,
}

impl MockConnection {
    /// Create a mock connection and the receiver its frames arrive on
    pub fn pair(addr: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<Bytes>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            addr: addr.into(),
            outbox,
            fail_writes: AtomicBool::new(false),
        });
        (conn, rx)
    }

    /// Make every subsequent write fail, simulating a dead socket
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn remote_address(&self) -> &str {
        &self.addr
    }

    async fn write(&self, frame: Bytes) -> Result<(), ConnectionError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ConnectionError::WriteFailed("simulated failure".into()));
        }
        self.outbox
            .send(frame)
            .map_err(|_| ConnectionError::Closed)
    }
}
