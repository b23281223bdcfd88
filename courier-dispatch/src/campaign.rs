//! The campaign driver.
//!
//! ```text
//!  recipients ──> Generator ──(bounded channel)──> Worker 0 ──> Transport
//!                    │                         └─> Worker N ──> Transport
//!                    └──────── CompletionTracker <───────┘
//! ```
//!
//! The driver connects every worker before a single message is rendered,
//! waits on the tracker, and only then closes the channel.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use courier_common::{Signal, internal};
use tokio::{
    sync::broadcast,
    task::{JoinError, JoinSet},
};

use crate::{
    config::CampaignConfig,
    error::CampaignError,
    generator::{Generator, GeneratorOutcome},
    message::QueuedMessage,
    pool::{FailedDelivery, Worker, WorkerReport},
    recipient::RecipientRecord,
    render::Renderer,
    tracker::CompletionTracker,
    transport::{Connector, Transport, dial},
};

/// The outcome of a campaign run.
#[derive(Debug, Clone, Default)]
pub struct CampaignReport {
    /// Recipients in the list
    pub recipients: usize,
    /// Messages rendered and queued
    pub generated: usize,
    pub delivered: usize,
    /// Messages whose delivery attempt failed, in list order
    pub failed: Vec<FailedDelivery>,
    /// Messages dropped unsent because of a shutdown, in list order
    pub abandoned: Vec<FailedDelivery>,
    /// Whether a shutdown cut the campaign short
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl CampaignReport {
    /// Every recipient that was queued but not delivered.
    pub fn undelivered(&self) -> impl Iterator<Item = &FailedDelivery> {
        self.failed.iter().chain(&self.abandoned)
    }
}

pub struct Campaign {
    config: Arc<CampaignConfig>,
    connector: Arc<dyn Connector>,
}

impl Campaign {
    pub fn new(config: CampaignConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
        }
    }

    /// Send one message to every recipient.
    ///
    /// Per-message delivery failures don't fail the campaign, they are
    /// listed in the returned report.
    ///
    /// # Errors
    ///
    /// - [`CampaignError::Config`] if the settings or templates are invalid
    /// - [`CampaignError::Startup`] if a worker can't open its transport
    /// - [`CampaignError::Aborted`] if a recipient failed to render, after
    ///   everything queued before it has been dispatched
    /// - [`CampaignError::Join`] if a dispatch task panicked
    pub async fn run(
        &self,
        recipients: Vec<RecipientRecord>,
        shutdown: &broadcast::Sender<Signal>,
    ) -> Result<CampaignReport, CampaignError> {
        let started = Instant::now();
        let config = &self.config;

        config.validate()?;
        let renderer = Renderer::new(config)?;

        internal!(
            level = INFO,
            "Starting campaign {:?}: {} recipients, {} workers, {} msg/s via {}",
            config.subject,
            recipients.len(),
            config.workers,
            config.rate,
            self.connector.describe()
        );

        let transports = self.connect_all().await?;

        let (sender, receiver) = async_channel::bounded(config.channel_capacity);
        let tracker = CompletionTracker::new();

        let mut workers = JoinSet::new();
        for (id, transport) in transports.into_iter().enumerate() {
            workers.spawn(
                Worker::new(
                    id,
                    transport,
                    Arc::clone(&self.connector),
                    config.dial.clone(),
                    receiver.clone(),
                    tracker.clone(),
                    shutdown.subscribe(),
                )
                .run(),
            );
        }
        drop(receiver);

        let recipient_count = recipients.len();
        let mut generator = tokio::spawn(
            Generator::new(
                renderer,
                config.send_interval(),
                tracker.clone(),
                sender.clone(),
                shutdown.subscribe(),
            )
            .run(recipients),
        );

        // Workers only return once the channel is closed, so any worker
        // finishing before that has died holding a message the tracker will
        // never see settle.
        let mut reports = Vec::with_capacity(config.workers);
        let outcome = loop {
            tokio::select! {
                joined = &mut generator => match joined {
                    Ok(outcome) => break outcome,
                    Err(e) => return Err(wind_down(&sender, workers, e).await),
                },
                Some(joined) = workers.join_next() => match joined {
                    Ok(report) => reports.push(report),
                    Err(e) => {
                        generator.abort();
                        return Err(wind_down(&sender, workers, e).await);
                    }
                },
            }
        };

        let settled = loop {
            tokio::select! {
                settled = tracker.wait() => break settled,
                Some(joined) = workers.join_next() => match joined {
                    Ok(report) => reports.push(report),
                    Err(e) => return Err(wind_down(&sender, workers, e).await),
                },
            }
        };
        sender.close();
        internal!(
            level = DEBUG,
            "All {} queued messages settled, channel closed",
            settled.settled
        );

        while let Some(joined) = workers.join_next().await {
            reports.push(joined?);
        }

        let mut report = CampaignReport {
            recipients: recipient_count,
            generated: outcome.generated(),
            interrupted: matches!(outcome, GeneratorOutcome::Interrupted { .. }),
            ..CampaignReport::default()
        };
        for worker in reports {
            report.delivered += worker.delivered;
            report.failed.extend(worker.failed);
            report.abandoned.extend(worker.abandoned);
        }
        report.failed.sort_by_key(|failure| failure.position);
        report.abandoned.sort_by_key(|failure| failure.position);
        report.elapsed = started.elapsed();

        tracing::info!(
            recipients = report.recipients,
            generated = report.generated,
            delivered = report.delivered,
            failed = report.failed.len(),
            abandoned = report.abandoned.len(),
            elapsed = ?report.elapsed,
            "Campaign finished"
        );

        match outcome {
            GeneratorOutcome::Aborted { error, .. } => Err(CampaignError::Aborted {
                source: error,
                report: Box::new(report),
            }),
            GeneratorOutcome::Exhausted { .. } | GeneratorOutcome::Interrupted { .. } => Ok(report),
        }
    }

    /// Open one transport per worker. Nothing is generated unless every
    /// worker has a connection.
    async fn connect_all(&self) -> Result<Vec<Box<dyn Transport>>, CampaignError> {
        let mut transports = Vec::with_capacity(self.config.workers);

        for worker in 0..self.config.workers {
            match dial(self.connector.as_ref(), &self.config.dial, worker).await {
                Ok(transport) => transports.push(transport),
                Err(source) => {
                    tracing::error!(
                        worker,
                        server = %self.connector.describe(),
                        "Unable to connect, campaign not started: {source}"
                    );
                    for mut transport in transports {
                        let _ = transport.close().await;
                    }
                    return Err(CampaignError::Startup {
                        worker,
                        attempts: self.config.dial.attempts,
                        source,
                    });
                }
            }
        }

        Ok(transports)
    }
}

/// Stop a campaign whose generator or worker task died. Whatever is still
/// queued goes to the surviving workers, then the failure is returned.
async fn wind_down(
    sender: &async_channel::Sender<QueuedMessage>,
    mut workers: JoinSet<WorkerReport>,
    error: JoinError,
) -> CampaignError {
    tracing::error!("Dispatch task failed, stopping campaign: {error}");
    sender.close();
    while workers.join_next().await.is_some() {}
    CampaignError::Join(error)
}
