//! HTTP surface over the credit pipeline.

pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;

use std::net::SocketAddr;
use tokio::net::TcpListener;
use unempower::config::ApiConfig;

/// Serve until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = create_router(state, config);
    let listener = TcpListener::bind(&config.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "api listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
