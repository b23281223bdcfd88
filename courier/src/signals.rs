use courier_common::{Signal, internal, tracing};
use tokio::sync::broadcast;

/// Wait for CTRL+C or SIGTERM, then broadcast [`Signal::Shutdown`].
///
/// A second CTRL+C while the campaign winds down returns immediately so the
/// caller can exit without waiting.
///
/// # Errors
///
/// Returns an error if the signal handlers can't be installed, or nobody is
/// listening for the shutdown.
pub async fn shutdown(sender: broadcast::Sender<Signal>) -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = WARN, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = WARN, "Terminate Signal received, shutting down");
        }
    };

    sender
        .send(Signal::Shutdown)
        .map_err(|e| anyhow::anyhow!("Unable to broadcast shutdown: {e}"))?;

    tokio::signal::ctrl_c().await?;
    tracing::warn!("Forcing shutdown");

    Ok(())
}
