use std::net::SocketAddr;

use futures::future::join_all;
use opentelemetry_sdk::trace::SdkTracerProvider;
use thiserror::Error;

use crate::util::env::{EnvErr, Var};
use crate::util::telemetry;

mod api;
mod constants;
mod db;
mod ledger;
mod util;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Route(#[from] api::server::RouteError),

    #[error(transparent)]
    Std(#[from] Box<dyn std::error::Error>),
}

type Result<T> = core::result::Result<T, RunnerErr>;

/// Exporters registered for this run; flushed on the way out
enum TelemetryGuard {
    Otlp(telemetry::Telemetry),
    Stdout(SdkTracerProvider),
}

impl TelemetryGuard {
    async fn init() -> Result<Self> {
        if var!(Var::OtelExporterEndpoint).await?.is_empty() {
            return Ok(Self::Stdout(telemetry::init_stdout()));
        }

        Ok(Self::Otlp(telemetry::Telemetry::new().await?.register()))
    }

    fn shutdown(self) {
        match self {
            Self::Otlp(registry) => registry.shutdown(),
            Self::Stdout(provider) => {
                if let Err(e) = provider.shutdown() {
                    eprintln!("error during tracing shutdown: {e:?}");
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry_registry = TelemetryGuard::init().await?;

    tracing::info!("starting rewards ledger");

    let (tx_server_ready, rx_server_ready) = tokio::sync::mpsc::unbounded_channel::<SocketAddr>();
    let handles = api::server::start_server(tx_server_ready, rx_server_ready).await?;

    _ = join_all(handles).await;

    telemetry_registry.shutdown();
    Ok(())
}
