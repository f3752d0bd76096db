use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::message::Message;

/// The internal queue of a sink block.
///
/// `consume` runs on dispatcher tasks and only pushes; the sink's own
/// worker drains with [`Mailbox::next`]. Cancellation wins over backlog:
/// once shutdown is observed, `next` returns `None` even if messages
/// remain queued.
pub struct Mailbox {
    tx: mpsc::UnboundedSender<Message>,
    rx: Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl Mailbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Queue a message for the worker. Never blocks.
    pub fn push(&self, message: Message) {
        let _ = self.tx.send(message);
    }

    /// Wait for the next message or for shutdown, whichever comes first.
    pub async fn next(&self, shutdown: &CancellationToken) -> Option<Message> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            message = rx.recv() => message,
        }
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}
