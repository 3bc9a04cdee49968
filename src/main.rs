mod config;
mod image_ops;
mod queue;
mod routes;
mod store;
mod utils;

use crate::config::Config;
use crate::image_ops::processing::JpegVariantGenerator;
use crate::queue::WorkerPool;
use crate::queue::worker_pool::PoolHandle;
use crate::routes::{AppState, router};
use crate::store::receipt_files::ReceiptFiles;
use axum::Router;
use log::{error, info};
use std::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::registry;
use tracing_subscriber::util::SubscriberInitExt;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Can't listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Can't listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Serves until `signal` fires, then drains the resize queue whatever way serving ended
async fn serve_then_drain(
    listener: TcpListener,
    app: Router,
    pool_handle: PoolHandle,
    signal: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await;
    if let Err(err) = &served {
        error!("Server failed: {err}");
    }

    info!("Server stopped, waiting for queued resizes");
    pool_handle.shutdown().await;

    served
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=debug", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let files = ReceiptFiles::new(&config.uploads_dir, &config.resized_dir);
    files.create_dirs().await?;

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    let generator = JpegVariantGenerator::new(config.dimensions.clone(), config.jpeg_quality);
    let pool = WorkerPool::new(&config.pool, Arc::new(generator));
    let pool_handle = pool.start();

    let app = router(Arc::new(AppState {
        config,
        files,
        pool,
    }));

    info!("Listening on {}", addr);
    serve_then_drain(listener, app, pool_handle, shutdown_signal()).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ResizeTask;
    use crate::utils::test_utils::test_jpeg_bytes;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn queued_resizes_finish_after_server_stops() {
        let root = tempdir().unwrap();
        let config = Config {
            uploads_dir: root.path().join("uploads"),
            resized_dir: root.path().join("resized"),
            dimensions: "small=0x20".parse().unwrap(),
            ..Config::default()
        };
        let files = ReceiptFiles::new(&config.uploads_dir, &config.resized_dir);
        files.create_dirs().await.unwrap();
        let generator = JpegVariantGenerator::new(config.dimensions.clone(), config.jpeg_quality);
        let pool = WorkerPool::new(&config.pool, Arc::new(generator));

        let artifact = files
            .store_original("user1", "jpg", &test_jpeg_bytes(40, 60))
            .await
            .unwrap();
        assert!(pool.submit(ResizeTask::new(artifact.clone(), files.resized_dir())));
        let pool_handle = pool.start();

        let resized_dir = config.resized_dir.clone();
        let app = router(Arc::new(AppState {
            config,
            files,
            pool,
        }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        serve_then_drain(listener, app, pool_handle, async {})
            .await
            .unwrap();

        let small = resized_dir
            .join("user1")
            .join(format!("{}_small.jpg", artifact.receipt_id));
        assert!(small.exists());
    }
}
