use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancels `cancellation` once the process is asked to stop: SIGTERM from `tally stop`, Ctrl-C
/// for a foreground session, or cancellation from within the process.
pub async fn detect_shutdown(cancellation: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Couldn't listen for SIGTERM {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            cancellation.cancel();
        },
        _ = terminate => {
            info!("Received termination signal");
            cancellation.cancel();
        },
        _ = cancellation.cancelled() => (),
    };
}
