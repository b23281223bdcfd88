//! Rate limited production of campaign messages.

use std::time::Duration;

use async_channel::Sender;
use courier_common::{Signal, internal};
use tokio::{
    sync::broadcast,
    time::{MissedTickBehavior, interval},
};

use crate::{
    error::RenderError,
    message::QueuedMessage,
    recipient::RecipientRecord,
    render::Renderer,
    tracker::CompletionTracker,
};

/// How production ended.
#[derive(Debug)]
pub enum GeneratorOutcome {
    /// Every recipient was rendered and queued
    Exhausted { generated: usize },
    /// A recipient failed to render, nothing after it was produced
    Aborted {
        generated: usize,
        error: RenderError,
    },
    /// Shutdown was requested before the list ran out
    Interrupted { generated: usize },
}

impl GeneratorOutcome {
    pub const fn generated(&self) -> usize {
        match self {
            Self::Exhausted { generated }
            | Self::Aborted { generated, .. }
            | Self::Interrupted { generated } => *generated,
        }
    }
}

/// Renders recipients in list order and feeds them to the workers, no
/// faster than one message per `period`.
pub struct Generator {
    renderer: Renderer,
    period: Duration,
    tracker: CompletionTracker,
    sender: Sender<QueuedMessage>,
    shutdown: broadcast::Receiver<Signal>,
}

impl Generator {
    pub const fn new(
        renderer: Renderer,
        period: Duration,
        tracker: CompletionTracker,
        sender: Sender<QueuedMessage>,
        shutdown: broadcast::Receiver<Signal>,
    ) -> Self {
        Self {
            renderer,
            period,
            tracker,
            sender,
            shutdown,
        }
    }

    /// Produce messages until the list is exhausted, a recipient fails to
    /// render, or shutdown is requested. Production is marked finished on
    /// the tracker in every case.
    pub async fn run(mut self, recipients: Vec<RecipientRecord>) -> GeneratorOutcome {
        let outcome = self.produce(recipients).await;
        self.tracker.finish_production();

        internal!(
            level = INFO,
            "Generator finished after {} messages",
            outcome.generated()
        );
        outcome
    }

    async fn produce(&mut self, recipients: Vec<RecipientRecord>) -> GeneratorOutcome {
        let mut ticker = interval(self.period);
        // A stall on a full channel must not be followed by a burst
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut generated = 0;

        for (position, recipient) in recipients.into_iter().enumerate() {
            tokio::select! {
                biased;
                () = shutdown_requested(&mut self.shutdown) => {
                    internal!(level = INFO, "Generator received shutdown signal");
                    return GeneratorOutcome::Interrupted { generated };
                }
                _ = ticker.tick() => {}
            }

            let message = match self.renderer.render(position, &recipient) {
                Ok(message) => message,
                Err(error) => {
                    tracing::error!(
                        recipient = %recipient.email,
                        position,
                        "Rendering failed, aborting campaign: {error}"
                    );
                    return GeneratorOutcome::Aborted { generated, error };
                }
            };

            self.tracker.add();
            let queued = QueuedMessage { position, message };

            tokio::select! {
                biased;
                () = shutdown_requested(&mut self.shutdown) => {
                    tracing::warn!(
                        recipient = %recipient.email,
                        position,
                        "Shutdown requested while queueing, message abandoned"
                    );
                    self.tracker.done();
                    return GeneratorOutcome::Interrupted { generated };
                }
                sent = self.sender.send(queued) => {
                    if sent.is_err() {
                        // Only happens if the pool went away underneath us
                        tracing::error!("Message channel closed while campaign was still producing");
                        self.tracker.done();
                        return GeneratorOutcome::Interrupted { generated };
                    }
                }
            }

            generated += 1;
            tracing::debug!(recipient = %recipient.email, position, "Queued message");
        }

        GeneratorOutcome::Exhausted { generated }
    }
}

/// Resolves once a shutdown has been broadcast. A closed broadcast channel
/// means nobody can ask for a shutdown any more, so it never resolves.
pub(crate) async fn shutdown_requested(shutdown: &mut broadcast::Receiver<Signal>) {
    loop {
        match shutdown.recv().await {
            Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
