use log::{error, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Exit status reported after an interrupted run (128 + SIGINT)
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Resolve on the first SIGINT (Ctrl+C) or, on Unix, SIGTERM
async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Cancel `token` when a termination signal arrives.
///
/// Cancellation only stops admission of new jobs; running encoders are left
/// to finish. Abort the returned handle once the run is over.
pub fn spawn_interrupt_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = termination_signal() => {
                warn!("Interrupt received: finishing running jobs, starting no new ones");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_exits_when_token_cancelled_elsewhere() {
        let token = CancellationToken::new();
        let handle = spawn_interrupt_listener(token.clone());
        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("listener should stop")
            .unwrap();
    }
}
