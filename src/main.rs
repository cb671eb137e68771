use std::time::Duration;

use anyhow::Result;
use kcomeback_engine::config::EngineConfig;
use kcomeback_engine::engine::Engine;
use kcomeback_engine::extract::ReqwestCompletionClient;
use kcomeback_engine::model::Whitelist;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("kcomeback_engine=debug".parse()?),
        )
        .init();

    info!("starting kcomeback-engine v{}", env!("CARGO_PKG_VERSION"));

    let config = EngineConfig::load()?;

    let http = reqwest::Client::builder().timeout(config.llm_timeout).build()?;
    let llm_client = ReqwestCompletionClient::new(
        http,
        config.llm_base_url.clone(),
        config.llm_api_key.clone(),
        config.llm_model.clone(),
        config.llm_timeout,
    );

    let mut engine = Engine::new(config, llm_client)?;

    // Whitelist provider is an external collaborator; this demonstration
    // loop seeds a placeholder set so the warm-up loop has something to do.
    let whitelist = Whitelist::from_names(std::env::var("DEMO_WHITELIST").unwrap_or_default().split(',').filter(|s| !s.is_empty()));

    engine.start_scheduler(Duration::from_secs(3600), whitelist.clone());

    info!("engine started, serving until interrupted");
    let cancel = CancellationToken::new();

    if !whitelist.is_empty() {
        let this_month_spec = current_month_spec();
        match engine.releases_for(&[this_month_spec], &whitelist, &cancel).await {
            Ok((releases, stale)) => info!(count = releases.len(), stale, "initial query completed"),
            Err(err) => tracing::warn!(%err, "initial query failed"),
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    Ok(())
}

fn current_month_spec() -> String {
    use chrono::{Datelike, Utc};
    let now = Utc::now();
    let month_name = now.format("%B").to_string().to_lowercase();
    format!("{}-{}", month_name, now.year())
}
