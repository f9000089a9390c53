// ABOUTME: gRPC server setup and lifecycle for the dispatcher
// ABOUTME: Binds the listener, serves WorkflowService, and cancels connections on shutdown

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::info;
use workflowd_proto::server::WorkflowServiceServer;

use crate::dispatcher::Dispatcher;
use crate::service::WorkflowServiceImpl;
use crate::ServeConfig;

/// Run the dispatcher until Ctrl+C or SIGTERM.
pub async fn run(config: ServeConfig) -> Result<()> {
    info!("Starting workflowd dispatcher");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Cluster ID: {}", config.cluster_id);

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    let dispatcher = Dispatcher::new(config.settings);

    info!("Dispatcher listening on {}", listener.local_addr()?);
    serve(listener, dispatcher, shutdown_signal()).await?;

    info!("Server shut down gracefully");
    Ok(())
}

/// Serve on an already bound listener until `shutdown` resolves.
///
/// Connections are cancelled as soon as `shutdown` fires, then the transport
/// drains the finished streams.
pub async fn serve<F>(listener: TcpListener, dispatcher: Arc<Dispatcher>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let service = WorkflowServiceImpl::new(dispatcher.clone());
    let shutdown = async move {
        shutdown.await;
        info!(
            connections = dispatcher.registry().len(),
            "Shutting down, cancelling connections"
        );
        dispatcher.shutdown();
    };

    Server::builder()
        .add_service(WorkflowServiceServer::new(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await
        .context("running gRPC server")?;

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
