//! In-memory transports for tests and demos.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use muxrpc::Request;
use muxrpc::Response;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;

use crate::transport;
use crate::transport::Transport;

/// A duplex channel transport using tokio mpsc channels.
///
/// Messages sent via send() appear on the peer's recv() and vice versa.
/// Dropping one end closes the other end's recv().
pub struct DuplexChannelTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl DuplexChannelTransport {
    pub fn new(tx: mpsc::UnboundedSender<Vec<u8>>, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self { tx, rx: AsyncMutex::new(rx) }
    }

    /// Creates a pair of transports connected to each other.
    ///
    /// Messages sent on `a` are received by `b` and vice versa.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (Self::new(tx_a, rx_b), Self::new(tx_b, rx_a))
    }
}

#[async_trait::async_trait]
impl Transport for DuplexChannelTransport {
    fn send(&self, payload: Vec<u8>) -> transport::Result<()> {
        self.tx
            .send(payload)
            .map_err(|_| transport::Error::ConnectionLost("Channel closed".into()))
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}

type Hook = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Records every sent frame and lets a test script the inbound side.
///
/// A hook installed with [`RecordingTransport::on_send`] runs synchronously
/// inside `send`, after the frame is recorded. This is how a test makes a
/// response arrive before the sender gets control back.
pub struct RecordingTransport {
    sent: parking_lot::Mutex<Vec<Vec<u8>>>,
    hook: parking_lot::Mutex<Option<Hook>>,
    failing: AtomicBool,
    inbound_tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    inbound_rx: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sent: parking_lot::Mutex::new(Vec::new()),
            hook: parking_lot::Mutex::new(None),
            failing: AtomicBool::new(false),
            inbound_tx: parking_lot::Mutex::new(Some(tx)),
            inbound_rx: AsyncMutex::new(rx),
        }
    }

    /// Installs a hook called with every successfully sent frame.
    pub fn on_send(&self, hook: impl Fn(&[u8]) + Send + Sync + 'static) {
        *self.hook.lock() = Some(Arc::new(hook));
    }

    /// While set, every `send` fails with `ConnectionLost` and records nothing.
    pub fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Queues a frame for `recv`.
    pub fn inject(&self, frame: Vec<u8>) {
        if let Some(tx) = self.inbound_tx.lock().as_ref() {
            let _ = tx.send(frame);
        }
    }

    /// Closes the inbound side; `recv` returns `None` once queued frames drain.
    pub fn hang_up(&self) {
        self.inbound_tx.lock().take();
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    /// Sent frames decoded as requests. Frames that are not requests are skipped.
    pub fn sent_requests(&self) -> Vec<Request> {
        self.sent().iter().filter_map(|frame| Request::decode(frame).ok()).collect()
    }

    /// Sent frames decoded as responses. Frames that are not responses are skipped.
    ///
    /// A request would otherwise decode as a completion, since it has an id and
    /// neither `result` nor `error`.
    pub fn sent_responses(&self) -> Vec<Response> {
        self.sent()
            .iter()
            .filter(|frame| !is_request(frame))
            .filter_map(|frame| Response::decode(frame).ok())
            .collect()
    }
}

fn is_request(frame: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(frame).is_ok_and(|value| value.get("method").is_some())
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    fn send(&self, payload: Vec<u8>) -> transport::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(transport::Error::ConnectionLost("send refused".into()));
        }

        self.sent.lock().push(payload.clone());

        // Clone out so the hook may send again without deadlocking.
        let hook = self.hook.lock().clone();
        if let Some(hook) = hook {
            hook(&payload);
        }
        Ok(())
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut rx = self.inbound_rx.lock().await;
        Ok(rx.recv().await)
    }
}
