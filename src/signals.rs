/// Resolve when the process receives a termination signal (ctrl-c/SIGINT or
/// SIGTERM), so the caller can run the stop sequence and flush the session-end
/// record before exit.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::warn;

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("cannot install SIGTERM handler: {e}; watching ctrl-c only");
            tokio::signal::ctrl_c().await.ok();
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
pub async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
}
