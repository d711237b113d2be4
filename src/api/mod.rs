//! HTTP request layer.
//!
//! Endpoints:
//! - `POST /predict`: classify an uploaded video (raw body or multipart `video`
//!   field) → `{"predicted_class", "inference_time"}`
//! - `GET /start_live?device=`: start a live session → `{"acknowledged": true}`
//! - `POST /stop_live?device=`: stop it → the session's `LiveSummary`
//! - `GET /live_predict?device=`: latest live frame result and `running`
//! - `GET /health`
//!
//! A loopback-bound server refuses non-loopback peers.

mod http;

use crate::error::ClassifyError;
use crate::live::{LatestReportSink, LiveCapture, LiveSession, LiveSnapshot};
use crate::pipeline::ClassificationPipeline;
use anyhow::{anyhow, Result};
use http::{read_request, write_response, HttpRequest, RequestError};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Room for multipart framing on top of the payload limit.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Device used when `start_live` names none.
    pub live_device: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            live_device: "0".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting requests and stop every live session.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    pipeline: ClassificationPipeline,
    live: LiveCapture,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, pipeline: ClassificationPipeline, live: LiveCapture) -> Self {
        Self {
            cfg,
            pipeline,
            live,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let max_body = self
            .pipeline
            .stager()
            .max_bytes()
            .saturating_add(MULTIPART_OVERHEAD_BYTES);
        let state = Arc::new(ApiState {
            pipeline: self.pipeline,
            live: self.live,
            live_device: self.cfg.live_device,
            sessions: Mutex::new(HashMap::new()),
            max_body,
        });

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("api-accept".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, &state, shutdown_thread) {
                    log::error!("api stopped: {}", err);
                }
                state.stop_all_sessions();
            })?;
        log::info!("api listening on {}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    state: &Arc<ApiState>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let state = state.clone();
                let spawned = std::thread::Builder::new()
                    .name("api-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &state) {
                            log::warn!("api request rejected: {}", err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("api could not spawn connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &ApiState) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        Response::error(403, "forbidden", "loopback only").write(&mut stream)?;
        return Ok(());
    }

    let request = match read_request(&mut stream, state.max_body) {
        Ok(request) => request,
        Err(RequestError::BodyTooLarge { size, limit }) => {
            Response::error(
                413,
                "payload_too_large",
                format!("{} bytes exceeds limit of {} bytes", size, limit),
            )
            .write(&mut stream)?;
            return Ok(());
        }
        Err(err) => {
            let _ = Response::error(400, "bad_request", err.to_string()).write(&mut stream);
            return Err(err.into());
        }
    };
    log::debug!("{} {} from {}", request.method, request.path, peer);
    route(state, &request).write(&mut stream)?;
    Ok(())
}

fn route(state: &ApiState, request: &HttpRequest) -> Response {
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => Response::json(
            200,
            &json!({ "status": "ok", "backend": state.pipeline.engine().backend_name() }),
        ),
        ("POST", "/predict") => state.predict(request),
        ("GET", "/start_live") => state.start_live(request),
        ("POST", "/stop_live") => state.stop_live(request),
        ("GET", "/live_predict") => state.live_predict(request),
        (_, "/health" | "/predict" | "/start_live" | "/stop_live" | "/live_predict") => {
            Response::error(405, "method_not_allowed", request.method.clone())
        }
        _ => Response::error(404, "not_found", request.path.clone()),
    }
}

struct ActiveLive {
    session: LiveSession,
    latest: LatestReportSink,
}

/// `/live_predict` body: the latest snapshot plus whether the session is still
/// running. A session that ended on its own keeps its last snapshot.
#[derive(Serialize)]
struct LivePrediction {
    #[serde(flatten)]
    snapshot: LiveSnapshot,
    running: bool,
}

struct ApiState {
    pipeline: ClassificationPipeline,
    live: LiveCapture,
    live_device: String,
    sessions: Mutex<HashMap<String, ActiveLive>>,
    max_body: usize,
}

impl ApiState {
    fn predict(&self, request: &HttpRequest) -> Response {
        let payload = match request.video_payload() {
            Ok(Some(payload)) => payload,
            Ok(None) => return Response::error(400, "missing_video", "no video payload"),
            Err(err) => return Response::error(400, "bad_request", err.to_string()),
        };
        match self.pipeline.classify_payload(&payload) {
            Ok(result) => Response::json(200, &result.to_response()),
            Err(err) => Response::from_classify_error(&err),
        }
    }

    fn start_live(&self, request: &HttpRequest) -> Response {
        let device = self.device_for(request);
        let key = self.live.device_key(&device);
        {
            let mut sessions = match self.sessions.lock() {
                Ok(sessions) => sessions,
                Err(_) => return Response::error(500, "internal", "session table poisoned"),
            };
            if let Some(active) = sessions.get(&key) {
                if active.session.is_running() {
                    return Response::from_classify_error(&ClassifyError::DeviceBusy(device));
                }
            }
            // A finished session is replaced; its summary was already logged by the worker.
            sessions.remove(&key);
        }

        // The table is unlocked while the device opens; the capture's device
        // lease rejects a concurrent start on the same device.
        let latest = LatestReportSink::new();
        let session = match self.live.start(&device, Box::new(latest.clone())) {
            Ok(session) => session,
            Err(err) => return Response::from_classify_error(&err),
        };
        match self.sessions.lock() {
            Ok(mut sessions) => {
                sessions.insert(key, ActiveLive { session, latest });
                Response::json(200, &json!({ "acknowledged": true }))
            }
            Err(_) => {
                let _ = session.stop();
                Response::error(500, "internal", "session table poisoned")
            }
        }
    }

    fn stop_live(&self, request: &HttpRequest) -> Response {
        let device = self.device_for(request);
        let key = self.live.device_key(&device);
        let active = match self.sessions.lock() {
            Ok(mut sessions) => sessions.remove(&key),
            Err(_) => return Response::error(500, "internal", "session table poisoned"),
        };
        let Some(active) = active else {
            return Response::error(404, "no_live_session", device);
        };
        match active.session.stop() {
            Ok(summary) => Response::json(200, &summary),
            Err(err) => Response::from_classify_error(&err),
        }
    }

    fn live_predict(&self, request: &HttpRequest) -> Response {
        let device = self.device_for(request);
        let key = self.live.device_key(&device);
        let prediction = self.sessions.lock().ok().and_then(|sessions| {
            let active = sessions.get(&key)?;
            Some(LivePrediction {
                snapshot: active.latest.latest()?,
                running: active.session.is_running(),
            })
        });
        match prediction {
            Some(prediction) => Response::json(200, &prediction),
            None => Response::error(404, "no_live_prediction", device),
        }
    }

    fn device_for(&self, request: &HttpRequest) -> String {
        request
            .query_param("device")
            .unwrap_or_else(|| self.live_device.clone())
    }

    fn stop_all_sessions(&self) {
        let drained: Vec<ActiveLive> = match self.sessions.lock() {
            Ok(mut sessions) => sessions.drain().map(|(_, active)| active).collect(),
            Err(_) => return,
        };
        for active in drained {
            let device = active.session.device().to_string();
            if let Err(err) = active.session.stop() {
                log::warn!("failed to stop live session on {}: {}", device, err);
            }
        }
    }
}

struct Response {
    status: u16,
    body: Vec<u8>,
}

impl Response {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self { status, body },
            Err(err) => Self::error(500, "internal", err.to_string()),
        }
    }

    fn error(status: u16, code: &str, detail: impl Into<String>) -> Self {
        let body = json!({ "error": code, "detail": detail.into() });
        Self {
            status,
            body: body.to_string().into_bytes(),
        }
    }

    fn from_classify_error(err: &ClassifyError) -> Self {
        let (status, code) = match err {
            ClassifyError::SourceUnavailable(_) => (422, "source_unavailable"),
            ClassifyError::PayloadTooLarge { .. } => (413, "payload_too_large"),
            ClassifyError::DeviceBusy(_) => (409, "device_busy"),
            ClassifyError::ModelInvocation(_) => (500, "model_invocation"),
            ClassifyError::InvalidFrame(_) => (500, "invalid_frame"),
            ClassifyError::Staging(_) => (500, "staging"),
            ClassifyError::WorkerPanicked(_) => (500, "internal"),
        };
        if status >= 500 {
            log::error!("request failed: {}", err);
        }
        Self::error(status, code, err.to_string())
    }

    fn write(&self, stream: &mut TcpStream) -> std::io::Result<()> {
        write_response(stream, self.status, "application/json", &self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_errors_map_to_statuses() {
        let cases = [
            (ClassifyError::SourceUnavailable("x".into()), 422),
            (ClassifyError::PayloadTooLarge { size: 2, limit: 1 }, 413),
            (ClassifyError::DeviceBusy("0".into()), 409),
            (ClassifyError::ModelInvocation("x".into()), 500),
        ];
        for (err, status) in cases {
            assert_eq!(Response::from_classify_error(&err).status, status);
        }
    }

    #[test]
    fn error_bodies_carry_a_code() {
        let response = Response::error(404, "not_found", "/nope");
        let value: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(value["error"], "not_found");
        assert_eq!(value["detail"], "/nope");
    }
}
