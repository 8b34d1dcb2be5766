mod routes;
mod state;

use std::sync::Arc;

use anyhow::Result;
use axum::{routing::post, Router};
use routes::run_pipeline;
use sluice_core::Pipeline;
use sluice_transport::HttpTransport;
use sluice_warehouse::BigQueryWarehouse;
use state::AppState;
use tokio::net::TcpListener;
use tracing::{info, Level};

const DEFAULT_PORT: u16 = 8080;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let port = match std::env::var("PORT") {
        Ok(value) => value.parse()?,
        Err(_) => {
            info!("PORT not set, defaulting to {DEFAULT_PORT}");
            DEFAULT_PORT
        }
    };

    let transport = Arc::new(HttpTransport::new());
    let warehouse = Arc::new(BigQueryWarehouse::new().await?);
    let app_state = Arc::new(AppState {
        pipeline: Arc::new(Pipeline::new(transport, warehouse)),
    });

    let router = Router::new()
        .route("/", post(run_pipeline))
        .with_state(app_state);

    let listener = TcpListener::bind((std::net::Ipv4Addr::UNSPECIFIED, port)).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router.into_make_service()).await?;

    Ok(())
}
