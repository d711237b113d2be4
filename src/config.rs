use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::infer::{BackendKind, ModelSettings};
use crate::ingest::{CameraSettings, DefaultOpener};
use crate::live::LiveSettings;
use crate::staging::{PayloadStager, DEFAULT_MAX_PAYLOAD_BYTES};

const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_LIVE_DEVICE: &str = "0";
const DEFAULT_STAGING_SUBDIR: &str = "incident-uploads";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ServiceConfigFile {
    api: Option<ApiConfigFile>,
    model: Option<ModelConfigFile>,
    staging: Option<StagingConfigFile>,
    live: Option<LiveConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<String>,
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct StagingConfigFile {
    dir: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct LiveConfigFile {
    device: Option<String>,
    open_attempts: Option<u32>,
    retry_backoff_ms: Option<u64>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Resolved service configuration: file, then environment, then validation.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_addr: String,
    pub model: ModelSettings,
    pub staging_dir: PathBuf,
    pub max_payload_bytes: usize,
    /// Device used by `start_live` when the request names none.
    pub live_device: String,
    pub camera: CameraSettings,
    pub live: LiveSettings,
}

impl ServiceConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("INCIDENT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Result<Self> {
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());

        let model_file = file.model.unwrap_or_default();
        let backend = match model_file.backend.as_deref() {
            Some(name) => name.parse()?,
            None => BackendKind::Stub,
        };
        let model = ModelSettings {
            backend,
            model_path: model_file.path,
        };

        let staging = file.staging.unwrap_or_default();
        let staging_dir = staging
            .dir
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_STAGING_SUBDIR));
        let max_payload_bytes = staging
            .max_payload_bytes
            .unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES);

        let live_file = file.live.unwrap_or_default();
        let camera_defaults = CameraSettings::default();
        let live_defaults = LiveSettings::default();
        let camera = CameraSettings {
            target_fps: live_file.target_fps.unwrap_or(camera_defaults.target_fps),
            width: live_file.width.unwrap_or(camera_defaults.width),
            height: live_file.height.unwrap_or(camera_defaults.height),
        };
        let live = LiveSettings {
            open_attempts: live_file
                .open_attempts
                .unwrap_or(live_defaults.open_attempts),
            retry_backoff: live_file
                .retry_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(live_defaults.retry_backoff),
        };

        Ok(Self {
            api_addr,
            model,
            staging_dir,
            max_payload_bytes,
            live_device: live_file
                .device
                .unwrap_or_else(|| DEFAULT_LIVE_DEVICE.to_string()),
            camera,
            live,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_var("INCIDENT_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(backend) = non_empty_var("INCIDENT_MODEL_BACKEND") {
            self.model.backend = backend
                .parse()
                .context("INCIDENT_MODEL_BACKEND must be 'stub' or 'tract'")?;
        }
        if let Some(path) = non_empty_var("INCIDENT_MODEL_PATH") {
            self.model.model_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = non_empty_var("INCIDENT_STAGING_DIR") {
            self.staging_dir = PathBuf::from(dir);
        }
        if let Some(bytes) = non_empty_var("INCIDENT_MAX_PAYLOAD_BYTES") {
            self.max_payload_bytes = bytes.parse().map_err(|_| {
                anyhow!("INCIDENT_MAX_PAYLOAD_BYTES must be an integer number of bytes")
            })?;
        }
        if let Some(device) = non_empty_var("INCIDENT_LIVE_DEVICE") {
            self.live_device = device;
        }
        if let Some(attempts) = non_empty_var("INCIDENT_LIVE_OPEN_ATTEMPTS") {
            self.live.open_attempts = attempts
                .parse()
                .map_err(|_| anyhow!("INCIDENT_LIVE_OPEN_ATTEMPTS must be a positive integer"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.api_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("api addr '{}' is not a socket address", self.api_addr))?;
        if self.model.backend == BackendKind::Tract && self.model.model_path.is_none() {
            return Err(anyhow!("tract backend requires a model path"));
        }
        if self.max_payload_bytes == 0 {
            return Err(anyhow!("max_payload_bytes must be greater than zero"));
        }
        if self.live.open_attempts == 0 {
            return Err(anyhow!("live open_attempts must be at least 1"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be non-zero"));
        }
        if self.live_device.trim().is_empty() {
            return Err(anyhow!("live device must not be empty"));
        }
        Ok(())
    }

    pub fn stager(&self) -> PayloadStager {
        PayloadStager::new(self.staging_dir.clone(), self.max_payload_bytes)
    }

    pub fn opener(&self) -> DefaultOpener {
        DefaultOpener::new(self.camera.clone())
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}
