use std::sync::Arc;

use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use insightdb::error::{InsightError, Result};
use insightdb::interface::QueryInterface;
use insightdb::server;
use insightdb::store::{PersistenceMode, RecordStore};

#[derive(Debug, Deserialize)]
struct Settings {
    data_dir: String,
    address: String,
    port: u16,
}

// Settings come from insightdb.json in the working directory, overridable
// through INSIGHTDB_* environment variables.
fn settings() -> Result<Settings> {
    Config::builder()
        .set_default("data_dir", "data")
        .and_then(|b| b.set_default("address", "127.0.0.1"))
        .and_then(|b| b.set_default("port", 4321))
        .map(|b| {
            b.add_source(File::with_name("insightdb").required(false))
                .add_source(Environment::with_prefix("INSIGHTDB"))
        })
        .and_then(|b| b.build())
        .and_then(|c| c.try_deserialize())
        .map_err(|e| InsightError::Config(e.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let settings = settings()?;
    let store = RecordStore::new(PersistenceMode::Directory(settings.data_dir.clone().into()))?;
    let interface = Arc::new(QueryInterface::new(Arc::new(store)));
    let app = server::router(interface);
    let listener = tokio::net::TcpListener::bind((settings.address.as_str(), settings.port)).await?;
    info!(address = %settings.address, port = settings.port, data_dir = %settings.data_dir, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
