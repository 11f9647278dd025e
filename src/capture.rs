//! External video-capture subprocess supervision, plus the camera worker's
//! job handler.
//!
//! One capture tool instance per camera id. Stop asks the tool to quit via
//! stdin first (ffmpeg treats `q` as quit) and kills it on timeout.

use std::collections::HashMap;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bus::{self, BusError, JobHandler};
use crate::payload::CamCommand;

/// How long a capture process gets to quit gracefully before being killed.
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Capture tool command line, with `{source}` and `{output}` placeholders.
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    pub command: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            command: "ffmpeg -i {source} -an -vcodec copy -y -v quiet {output}".to_string(),
        }
    }
}

struct Capture {
    filename: String,
    child: Child,
}

/// Manages one capture subprocess per camera id.
pub struct CaptureSupervisor {
    config: CaptureConfig,
    children: HashMap<i64, Capture>,
}

impl CaptureSupervisor {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            children: HashMap::new(),
        }
    }

    fn output_filename(cam_id: i64) -> String {
        format!(
            "video_id_{}_{}.mp4",
            cam_id,
            Local::now().format("%Y-%m-%d_%H-%M-%S")
        )
    }

    /// Launch the capture tool for a camera. No-op if one is already running
    /// for this id.
    pub fn start(&mut self, cam_id: i64, source_uri: &str) -> io::Result<()> {
        if let Some(capture) = self.children.get_mut(&cam_id) {
            if capture.child.try_wait()?.is_none() {
                debug!(cam_id, "capture already running");
                return Ok(());
            }
        }

        let filename = Self::output_filename(cam_id);
        let cmdline = self
            .config
            .command
            .replace("{source}", source_uri)
            .replace("{output}", &filename);

        let mut parts = cmdline.split_whitespace();
        let program = parts.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "empty capture command")
        })?;
        let child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .spawn()?;

        info!(cam_id, command = %cmdline, output = %filename, "capture started");
        self.children.insert(cam_id, Capture { filename, child });
        Ok(())
    }

    /// Stop the capture for a camera: request quit via stdin, wait up to the
    /// stop timeout, then kill. No-op for unknown ids.
    pub async fn stop(&mut self, cam_id: i64) -> io::Result<()> {
        let Some(mut capture) = self.children.remove(&cam_id) else {
            debug!(cam_id, "no capture to stop");
            return Ok(());
        };

        if capture.child.try_wait()?.is_some() {
            info!(cam_id, output = %capture.filename, "capture already exited");
            return Ok(());
        }

        if let Some(mut stdin) = capture.child.stdin.take() {
            let _ = stdin.write_all(b"q").await;
            // dropping stdin closes the pipe
        }

        match tokio::time::timeout(STOP_TIMEOUT, capture.child.wait()).await {
            Ok(status) => {
                status?;
                info!(cam_id, output = %capture.filename, "capture stopped");
            }
            Err(_) => {
                warn!(cam_id, "capture did not quit, killing it");
                capture.child.kill().await?;
            }
        }
        Ok(())
    }

    /// Stop every running capture.
    pub async fn stop_all(&mut self) {
        let ids: Vec<i64> = self.children.keys().copied().collect();
        for cam_id in ids {
            if let Err(e) = self.stop(cam_id).await {
                warn!(cam_id, error = %e, "failed to stop capture");
            }
        }
    }

    /// Number of tracked captures (running or not yet reaped).
    pub fn active_count(&self) -> usize {
        self.children.len()
    }
}

/// Durable-worker handler for camera tasks.
///
/// Start commands arrive round-robin on the shared work queue; stop commands
/// arrive on the fanout control binding so every worker can stop its own
/// subprocess.
pub struct CamTaskHandler {
    supervisor: Mutex<CaptureSupervisor>,
}

impl CamTaskHandler {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            supervisor: Mutex::new(CaptureSupervisor::new(config)),
        }
    }

    /// Stop all captures; called on worker shutdown.
    pub async fn shutdown(&self) {
        self.supervisor.lock().await.stop_all().await;
    }
}

#[async_trait]
impl JobHandler for CamTaskHandler {
    type Job = CamCommand;

    async fn handle(&self, routing_key: &str, command: CamCommand) -> bus::Result<()> {
        let Some(source_uri) = command.source_uri() else {
            warn!(routing_key, cam_id = command.cam_id(), "start task without source, dropping");
            return Ok(());
        };

        self.supervisor
            .lock()
            .await
            .start(command.cam_id(), source_uri)
            .map_err(|e| BusError::Handler(format!("failed to start capture: {}", e)))
    }

    async fn handle_control(&self, _routing_key: &str, command: CamCommand) -> bus::Result<()> {
        self.supervisor
            .lock()
            .await
            .stop(command.cam_id())
            .await
            .map_err(|e| BusError::Handler(format!("failed to stop capture: {}", e)))
    }
}
