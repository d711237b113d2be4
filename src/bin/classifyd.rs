//! classifyd - incident classification service
//!
//! This daemon:
//! 1. Loads configuration (INCIDENT_CONFIG file + INCIDENT_* overrides)
//! 2. Loads the inference engine once
//! 3. Serves the classification and live-capture API until Ctrl-C

use anyhow::{Context, Result};
use std::sync::{mpsc, Arc};

use incident_classifier::{
    api::{ApiConfig, ApiServer},
    config::ServiceConfig,
    ClassificationPipeline, InferenceEngine, LiveCapture, SourceOpener,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServiceConfig::load()?;
    let engine = Arc::new(InferenceEngine::load(&config.model)?);
    let opener: Arc<dyn SourceOpener> = Arc::new(config.opener());

    let pipeline =
        ClassificationPipeline::new(opener.clone(), engine.clone()).with_stager(config.stager());
    let live = LiveCapture::new(opener, engine, config.live.clone());

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        live_device: config.live_device.clone(),
    };
    let api_handle = ApiServer::new(api_config, pipeline, live).spawn()?;
    log::info!(
        "classifyd running on {} (backend={}, staging={})",
        api_handle.addr,
        config.model.backend,
        config.staging_dir.display()
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("classifyd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
