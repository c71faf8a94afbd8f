//! Graceful shutdown with a bounded drain
//!
//! Once the shutdown signal fires the server stops accepting connections
//! and in-flight requests get at most `grace` to finish.

use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// Serve `app` until `signal` completes, then drain for at most `grace`
pub async fn serve_with_grace<F>(
    listener: TcpListener,
    app: Router,
    signal: F,
    grace: Duration,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let draining = Arc::new(Notify::new());
    let notifier = draining.clone();

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            tracing::info!(
                grace_ms = grace.as_millis() as u64,
                "Waiting for in-flight requests to complete..."
            );
            notifier.notify_one();
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result,
        _ = async {
            draining.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!(
                grace_ms = grace.as_millis() as u64,
                "Grace period elapsed, dropping open connections"
            );
            Ok(())
        }
    }
}
