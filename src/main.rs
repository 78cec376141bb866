use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod download;
mod error;
mod extractor;
mod format;
mod piped;
mod proxy;
mod retry;
mod video_id;

pub use error::{Error, Result};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
    )
    .init();

  let config = config::Config::from_env()?;
  info!(
    extractor = ?config.extractor,
    containers = ?config.containers,
    max_attempts = config.retry_policy().max_attempts(),
    "starting"
  );

  let app = api::router(api::AppState::from_config(&config));

  info!("Listening on {}", config.addr);

  axum::Server::try_bind(&config.addr)
    .map_err(|e| Error::Server(e.to_string()))?
    .serve(app.into_make_service())
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| Error::Server(e.to_string()))?;

  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    tokio::signal::ctrl_c().await.ok();
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(
      tokio::signal::unix::SignalKind::terminate(),
    ) {
      Ok(mut signal) => {
        signal.recv().await;
      }
      Err(_) => std::future::pending::<()>().await,
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }

  info!("shutting down");
}
