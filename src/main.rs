use mexc_stream_recorder::{
    shutdown_signal, Credentials, RecordSink, RecorderError, SessionConfig, SessionController,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = "config.json";
const LOGS_DIR: &str = "logs";

#[tokio::main]
async fn main() -> Result<(), RecorderError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Missing or malformed credentials are fatal; nothing starts without
    // them. The file takes precedence, MEXC_API_KEY / MEXC_API_SECRET are
    // the fallback.
    let credentials = Credentials::load(CONFIG_FILE).map_err(|e| {
        error!("cannot load credentials from {CONFIG_FILE} or the environment: {e}");
        e
    })?;

    let sink = Arc::new(RecordSink::new(LOGS_DIR)?);
    info!(
        connection_log = %sink.connection_log_path().display(),
        events_log = %sink.events_log_path().display(),
        trades_log = %sink.trades_log_path().display(),
        "record sink ready"
    );

    let controller = SessionController::new(SessionConfig::default(), &credentials, sink)?;

    if let Err(e) = controller.start().await {
        error!("session failed to start: {e}");
        controller.stop();
        return Err(e);
    }

    info!("recording; stop with ctrl-c or SIGTERM");
    shutdown_signal().await;
    info!("shutdown signal received");

    // stop() writes the session_end record before the process exits.
    controller.stop();
    Ok(())
}
