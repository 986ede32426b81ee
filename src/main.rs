mod api;
mod capabilities;
mod config;
mod errors;
mod orchestrator;
mod pipeline;
mod shortcuts;
#[cfg(test)]
mod testing;
mod util;

use std::{collections::HashSet, sync::Arc};

use tracing::{error, info};
use tracing_subscriber::fmt::{format::Writer, time::FormatTime};

use crate::{
    api::AppState,
    errors::Result,
    orchestrator::VideoOrchestrator,
    util::{ArtifactStore, format_local, now_local, spawn_retention},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    let config = config::AppConfig::load()?;

    let store = Arc::new(ArtifactStore::new(&config.storage.root));
    store.ensure_dirs().await?;
    info!(target: "store", root = ?store.root(), "artifact directories ready");

    let orchestrator = Arc::new(VideoOrchestrator::from_config(&config, store.clone())?);
    info!(
        target: "orchestrator",
        shortcuts = orchestrator.shortcuts().len(),
        quality = %config.renderer.quality,
        "orchestrator ready"
    );

    let protected: HashSet<String> = config
        .shortcuts
        .video_files()
        .map(str::to_string)
        .collect();
    if !config.shortcuts.is_empty() {
        info!(target: "retention", protected = protected.len(), "shortcut videos excluded from retention");
    }
    let retention = spawn_retention(store.clone(), &config.retention, protected);

    let state = AppState {
        orchestrator,
        store,
        max_upload_bytes: config.storage.max_upload_bytes,
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        result = api::run_server(config.server.bind_addr, state, &config.server.public_dir) => {
            if let Err(err) = result {
                error!(target: "api", error = ?err, "HTTP server exited");
                return Err(err);
            }
        }
    }

    if let Some(task) = retention {
        task.abort();
    }

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .with_timer(LocalTimer)
        .init();

    info!("tracing initialized");
}

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = now_local();
        write!(w, "{}", format_local(&now, "%Y-%m-%d %H:%M:%S%:z"))
    }
}
