//! HTTP query surface. Downstream consumers read reconstructed periods only
//! through here, never from the record files directly.

pub mod routes;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Result;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::{query::QueryService, store::record_store::FsRecordStore};

pub const DEFAULT_PORT: u16 = 4517;

#[derive(Clone)]
pub struct AppState {
    query: Arc<QueryService<FsRecordStore>>,
}

impl AppState {
    pub fn new(record_dir: PathBuf) -> Result<Self> {
        let store = Arc::new(FsRecordStore::new(record_dir)?);
        Ok(Self {
            query: Arc::new(QueryService::new(store)),
        })
    }

    pub fn query(&self) -> &QueryService<FsRecordStore> {
        &self.query
    }
}

pub async fn serve(record_dir: PathBuf, port: u16) -> Result<()> {
    let state = AppState::new(record_dir)?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(routes::router())
        .with_state(state)
        .layer(cors);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("playlog query service listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
