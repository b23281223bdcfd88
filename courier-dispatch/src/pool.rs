//! The worker pool draining the message channel.
//!
//! Every worker owns its transport. A failed send is logged and recorded,
//! the connection is recycled, and the worker moves on to the next message.
//! Workers only stop once the channel is closed and empty.

use std::sync::Arc;

use async_channel::Receiver;
use courier_common::{Signal, internal};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::{
    config::DialPolicy,
    message::QueuedMessage,
    tracker::CompletionTracker,
    transport::{Connector, Transport, dial},
};

/// A message that left the pool without being delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDelivery {
    pub position: usize,
    pub email: String,
    pub name: Option<String>,
    pub error: String,
}

impl FailedDelivery {
    fn new(queued: &QueuedMessage, error: impl ToString) -> Self {
        Self {
            position: queued.position,
            email: queued.message.to.address.clone(),
            name: queued.message.to.name.clone(),
            error: error.to_string(),
        }
    }
}

/// What one worker did over the course of a campaign.
#[derive(Debug, Default)]
pub struct WorkerReport {
    pub delivered: usize,
    pub failed: Vec<FailedDelivery>,
    /// Messages dropped unsent because of a shutdown
    pub abandoned: Vec<FailedDelivery>,
}

pub struct Worker {
    id: usize,
    transport: Option<Box<dyn Transport>>,
    connector: Arc<dyn Connector>,
    dial: DialPolicy,
    receiver: Receiver<QueuedMessage>,
    tracker: CompletionTracker,
    shutdown: broadcast::Receiver<Signal>,
    stopping: bool,
    report: WorkerReport,
}

impl Worker {
    /// A worker starting out with an already open `transport`.
    pub fn new(
        id: usize,
        transport: Box<dyn Transport>,
        connector: Arc<dyn Connector>,
        dial: DialPolicy,
        receiver: Receiver<QueuedMessage>,
        tracker: CompletionTracker,
        shutdown: broadcast::Receiver<Signal>,
    ) -> Self {
        Self {
            id,
            transport: Some(transport),
            connector,
            dial,
            receiver,
            tracker,
            shutdown,
            stopping: false,
            report: WorkerReport::default(),
        }
    }

    pub async fn run(mut self) -> WorkerReport {
        internal!(level = DEBUG, "Worker {} started", self.id);

        while let Ok(queued) = self.receiver.recv().await {
            if self.shutdown_requested() {
                tracing::warn!(
                    worker = self.id,
                    recipient = %queued.message.to.address,
                    position = queued.position,
                    "Campaign interrupted, message not sent"
                );
                self.report
                    .abandoned
                    .push(FailedDelivery::new(&queued, "campaign interrupted"));
            } else {
                self.deliver(&queued).await;
            }

            self.tracker.done();
        }

        self.disconnect().await;

        internal!(
            level = DEBUG,
            "Worker {} stopped: {} delivered, {} failed, {} abandoned",
            self.id,
            self.report.delivered,
            self.report.failed.len(),
            self.report.abandoned.len()
        );
        self.report
    }

    fn shutdown_requested(&mut self) -> bool {
        if !self.stopping {
            self.stopping = matches!(
                self.shutdown.try_recv(),
                Ok(Signal::Shutdown) | Err(TryRecvError::Lagged(_))
            );
        }
        self.stopping
    }

    async fn deliver(&mut self, queued: &QueuedMessage) {
        let recipient = &queued.message.to.address;

        if self.transport.is_none() {
            self.reconnect().await;
        }
        let Some(transport) = self.transport.as_mut() else {
            tracing::warn!(
                worker = self.id,
                recipient = %recipient,
                position = queued.position,
                "Delivery failed: no connection available"
            );
            self.report
                .failed
                .push(FailedDelivery::new(queued, "no connection available"));
            return;
        };

        match transport.send(&queued.message).await {
            Ok(()) => {
                tracing::info!(
                    worker = self.id,
                    recipient = %recipient,
                    position = queued.position,
                    "Delivered"
                );
                self.report.delivered += 1;
            }
            Err(e) => {
                tracing::warn!(
                    worker = self.id,
                    recipient = %recipient,
                    position = queued.position,
                    transient = e.is_transient(),
                    "Delivery failed: {e}"
                );
                self.report.failed.push(FailedDelivery::new(queued, &e));

                self.disconnect().await;
                self.reconnect().await;
            }
        }
    }

    async fn reconnect(&mut self) {
        match dial(self.connector.as_ref(), &self.dial, self.id).await {
            Ok(transport) => self.transport = Some(transport),
            Err(e) => {
                tracing::error!(
                    worker = self.id,
                    server = %self.connector.describe(),
                    "Unable to reconnect: {e}"
                );
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take()
            && let Err(e) = transport.close().await
        {
            internal!(level = DEBUG, "Worker {} close failed: {e}", self.id);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use courier_smtp::Mailbox;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{error::TransportError, message::RenderedMessage};

    /// Records which connection delivered which recipient, failing any
    /// recipient listed in `fail`.
    #[derive(Default)]
    struct Recorder {
        connections: AtomicUsize,
        fail: Vec<String>,
        refuse_connections: bool,
        sent: Mutex<Vec<(usize, String)>>,
        closed: AtomicUsize,
    }

    struct RecordingTransport {
        connection: usize,
        recorder: Arc<Recorder>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&mut self, message: &RenderedMessage) -> Result<(), TransportError> {
            if self.recorder.fail.contains(&message.to.address) {
                return Err(TransportError::NotConnected);
            }
            self.recorder
                .sent
                .lock()
                .unwrap()
                .push((self.connection, message.to.address.clone()));
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.recorder.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct RecordingConnector(Arc<Recorder>);

    #[async_trait]
    impl Connector for RecordingConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
            if self.0.refuse_connections {
                return Err(TransportError::NotConnected);
            }
            let connection = self.0.connections.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(RecordingTransport {
                connection,
                recorder: Arc::clone(&self.0),
            }))
        }

        fn describe(&self) -> String {
            "recorder".to_string()
        }
    }

    fn queued(position: usize) -> QueuedMessage {
        QueuedMessage {
            position,
            message: RenderedMessage {
                to: Mailbox::new(format!("r{position}@example.com")),
                from: Mailbox::new("news@example.com"),
                subject: "Subject".to_string(),
                text: "text".to_string(),
                html: "html".to_string(),
                mailer: "courier/test".to_string(),
            },
        }
    }

    async fn run_worker(recorder: &Arc<Recorder>, messages: usize) -> WorkerReport {
        let connector: Arc<dyn Connector> = Arc::new(RecordingConnector(Arc::clone(recorder)));
        let policy = DialPolicy {
            attempts: 2,
            interval_ms: 1,
        };
        let transport = Box::new(RecordingTransport {
            connection: recorder.connections.fetch_add(1, Ordering::SeqCst),
            recorder: Arc::clone(recorder),
        });

        let (sender, receiver) = async_channel::bounded(messages.max(1));
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let tracker = CompletionTracker::new();

        for position in 0..messages {
            tracker.add();
            sender.send(queued(position)).await.unwrap();
        }
        tracker.finish_production();
        sender.close();

        let report = Worker::new(
            0,
            transport,
            connector,
            policy,
            receiver,
            tracker.clone(),
            shutdown_rx,
        )
        .run()
        .await;

        let snapshot = tracker.wait().await;
        assert_eq!(snapshot.enqueued, snapshot.settled);
        report
    }

    #[tokio::test]
    async fn test_delivers_everything_on_one_connection() {
        let recorder = Arc::new(Recorder::default());
        let report = run_worker(&recorder, 3).await;

        assert_eq!(report.delivered, 3);
        assert!(report.failed.is_empty());
        let sent = recorder.sent.lock().unwrap().clone();
        assert!(sent.iter().all(|(connection, _)| *connection == 0));
        assert_eq!(recorder.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_with_fresh_connection_after_failure() {
        let recorder = Arc::new(Recorder {
            fail: vec!["r1@example.com".to_string()],
            ..Recorder::default()
        });
        let report = run_worker(&recorder, 3).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(
            report.failed,
            vec![FailedDelivery {
                position: 1,
                email: "r1@example.com".to_string(),
                name: None,
                error: "No open connection".to_string(),
            }]
        );

        // The message after the failure goes out on a new connection
        let sent = recorder.sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![
                (0, "r0@example.com".to_string()),
                (1, "r2@example.com".to_string()),
            ]
        );
        // Broken connection plus the final one
        assert_eq!(recorder.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_keeps_draining_when_reconnect_fails() {
        let recorder = Arc::new(Recorder {
            fail: vec!["r0@example.com".to_string()],
            refuse_connections: true,
            ..Recorder::default()
        });
        let report = run_worker(&recorder, 4).await;

        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed.len(), 4);
        assert!(
            report.failed[1..]
                .iter()
                .all(|failure| failure.error == "no connection available")
        );
    }

    #[tokio::test]
    async fn test_abandons_queue_after_shutdown() {
        let recorder = Arc::new(Recorder::default());
        let connector: Arc<dyn Connector> = Arc::new(RecordingConnector(Arc::clone(&recorder)));
        let transport = connector.connect().await.unwrap();

        let (sender, receiver) = async_channel::bounded(4);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let tracker = CompletionTracker::new();
        for position in 0..4 {
            tracker.add();
            sender.send(queued(position)).await.unwrap();
        }
        tracker.finish_production();
        sender.close();
        shutdown_tx.send(Signal::Shutdown).unwrap();

        let report = Worker::new(
            0,
            transport,
            connector,
            DialPolicy::default(),
            receiver,
            tracker.clone(),
            shutdown_rx,
        )
        .run()
        .await;

        assert_eq!(report.delivered, 0);
        assert_eq!(report.abandoned.len(), 4);
        assert_eq!(tracker.snapshot().in_flight, 0);
    }
}
