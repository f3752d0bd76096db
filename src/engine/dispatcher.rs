use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::engine::route::Route;
use crate::message::Message;

/// One unit of work queued on a dispatcher: a message, the label of the
/// port that emitted it, and the route it travels on.
pub struct DispatchRequest {
    pub message: Message,
    pub source: Arc<str>,
    pub route: Arc<Route>,
}

/// A named, serialized work queue with its own task.
///
/// Every route is carried by exactly one dispatcher; all routes sharing a
/// dispatcher share its FIFO, so a slow consumer holds back all traffic on
/// that dispatcher. That is deliberate: back-pressure shows up as queue
/// growth rather than reordering.
pub struct Dispatcher {
    name: String,
    tx: mpsc::UnboundedSender<DispatchRequest>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<DispatchRequest>>>,
}

impl Dispatcher {
    /// The dispatcher serving routes that do not name one. The name is
    /// reserved: configurations cannot request it explicitly.
    pub const DEFAULT_NAME: &'static str = "default";

    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a request. Never blocks the producer; requests arriving after
    /// the run loop has exited are dropped.
    pub fn enqueue(&self, request: DispatchRequest) {
        if self.tx.send(request).is_err() {
            tracing::debug!(dispatcher = %self.name, "request dropped, dispatcher already stopped");
        }
    }

    /// Drain the queue until shutdown is requested, delivering each request
    /// to every destination of its route in declared order.
    ///
    /// Cancellation wins over pending work: requests still queued when
    /// shutdown is observed are discarded. A failing consumer is logged and
    /// never terminates the loop.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut rx = match self.rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                tracing::error!(dispatcher = %self.name, "run() invoked more than once");
                return;
            }
        };

        loop {
            let request = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            for destination in request.route.destinations() {
                // Destinations were checked for the consumer role at build.
                let Some(consumer) = destination.as_consumer() else {
                    continue;
                };
                if let Err(error) = consumer.consume(request.message.clone()).await {
                    tracing::error!(
                        dispatcher = %self.name,
                        block = %destination.name(),
                        source = %request.source,
                        %error,
                        "consumer failed",
                    );
                }
            }
        }
    }
}
