//! `camlink` entry point.
//!
//! Drives a set of simulated cameras through the full engine: registration
//! and initialization, a recording start broadcast, a setting broadcast, a
//! status query per camera, and a recording stop broadcast.  Each batch is
//! printed as JSON.
//!
//! # Usage
//!
//! ```text
//! camlink [OPTIONS]
//!
//! Options:
//!   --config <PATH>          TOML config file [default: platform config path]
//!   --cameras <IDS>          Comma-separated camera ids (overrides the file)
//!   --silent <IDS>           Cameras that never answer
//!   --timeout-ms <MS>        Response timeout per attempt
//!   --max-retries <N>        Re-sends after the first attempt
//!   --latency-ms <MS>        Simulated reply latency
//!   --log-level <LEVEL>      Default tracing filter when RUST_LOG is unset
//! ```
//!
//! ```text
//! main()
//!  └─ load AppConfig (file) + CLI overrides
//!  └─ SimulatedTransport   -- one simulated camera per configured id
//!  └─ CameraController     -- per-device queues over the transport
//!  └─ BatchCoordinator     -- fan-out over the controller
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use camlink_core::DeviceId;
use camlink_engine::application::batch::{BatchCoordinator, BatchOperation};
use camlink_engine::application::control::CameraController;
use camlink_engine::application::events::ControlEvent;
use camlink_engine::infrastructure::storage::config::{self, AppConfig, SimulatedCameraEntry};
use camlink_engine::infrastructure::transport::{CameraBehavior, SimulatedTransport};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Multi-camera control demo over simulated cameras.
#[derive(Debug, Parser)]
#[command(name = "camlink", about = "Multi-camera command and batch control engine", version)]
struct Cli {
    /// Configuration file.  Missing files fall back to defaults.
    #[arg(long, env = "CAMLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Comma-separated camera ids to simulate.
    #[arg(long, value_delimiter = ',', env = "CAMLINK_CAMERAS")]
    cameras: Vec<String>,

    /// Comma-separated camera ids that never answer.
    #[arg(long, value_delimiter = ',', env = "CAMLINK_SILENT")]
    silent: Vec<String>,

    /// Response timeout per attempt, in milliseconds.
    #[arg(long, env = "CAMLINK_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Re-sends after the first attempt.
    #[arg(long, env = "CAMLINK_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Simulated reply latency, in milliseconds.
    #[arg(long, env = "CAMLINK_LATENCY_MS")]
    latency_ms: Option<u64>,

    /// Default log filter; `RUST_LOG` takes precedence.
    #[arg(long, env = "CAMLINK_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Loads the config file and applies command-line overrides on top.
    fn into_app_config(self) -> anyhow::Result<AppConfig> {
        let mut cfg = match &self.config {
            Some(path) => config::load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => config::load_config().unwrap_or_else(|e| {
                eprintln!("using default config: {e}");
                AppConfig::default()
            }),
        };

        if !self.cameras.is_empty() {
            cfg.simulator.cameras = self
                .cameras
                .iter()
                .map(|id| SimulatedCameraEntry {
                    id: id.trim().to_string(),
                    behavior: CameraBehavior::Responsive,
                })
                .collect();
        }
        for id in &self.silent {
            let id = id.trim();
            match cfg.simulator.cameras.iter_mut().find(|c| c.id == id) {
                Some(entry) => entry.behavior = CameraBehavior::Silent,
                None => cfg.simulator.cameras.push(SimulatedCameraEntry {
                    id: id.to_string(),
                    behavior: CameraBehavior::Silent,
                }),
            }
        }
        if let Some(ms) = self.timeout_ms {
            cfg.queue.response_timeout_ms = ms;
        }
        if let Some(n) = self.max_retries {
            cfg.queue.max_retries = n;
        }
        if let Some(ms) = self.latency_ms {
            cfg.simulator.latency_ms = ms;
        }
        if let Some(level) = self.log_level {
            cfg.engine.log_level = level;
        }
        Ok(cfg)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Cli::parse().into_app_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.engine.log_level)),
        )
        .init();

    // ── Wiring ────────────────────────────────────────────────────────────────
    let mut transport = SimulatedTransport::new(Duration::from_millis(cfg.simulator.latency_ms));
    if let Some(size) = cfg.simulator.chunk_size {
        transport = transport.with_chunk_size(size);
    }
    for camera in &cfg.simulator.cameras {
        transport.add_camera_with(camera.id.as_str(), camera.behavior.clone());
    }
    let controller = CameraController::new(Arc::new(transport), cfg.to_controller_config());
    let batches = BatchCoordinator::new(controller.clone(), cfg.batch.max_history);

    let mut events = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                ControlEvent::DeviceUnresponsive { device_id } => warn!(device = %device_id, "camera stopped answering"),
                other => info!(device = %other.device_id(), event = other.name(), "control event"),
            }
        }
    });

    let devices: Vec<DeviceId> = cfg
        .simulator
        .cameras
        .iter()
        .map(|c| DeviceId::new(c.id.as_str()))
        .collect();
    info!(cameras = devices.len(), "camlink starting");

    // ── Registration and initialization ───────────────────────────────────────
    for device in &devices {
        controller
            .register_device(device.clone())
            .with_context(|| format!("failed to register {device}"))?;
    }
    if cfg.engine.initialize_on_register {
        // Registration queued the initialization queries; a status round-trip
        // per camera lets them drain before the first broadcast.
        for device in &devices {
            if let Err(e) = controller.query_status(device).await {
                warn!(device = %device, "status query failed: {e}");
            }
        }
    }

    // ── Scripted session ──────────────────────────────────────────────────────
    let started = batches.start_recording_all(&devices).await?;
    print_batch("start recording", &started)?;

    let iso = batches.update_setting_all(&devices, "iso", json!(1600)).await?;
    print_batch("set iso", &iso)?;

    for device in &devices {
        match controller.query_status(device).await {
            Ok(status) => println!("{device}: {}", serde_json::to_string(&status)?),
            Err(e) => println!("{device}: {e}"),
        }
    }

    let stopped = batches.stop_recording_all(&devices).await?;
    print_batch("stop recording", &stopped)?;

    for device in &devices {
        let state = controller.device_state(device)?;
        println!("{}", serde_json::to_string_pretty(&state)?);
    }

    controller.shutdown().await;
    info!("camlink stopped");
    Ok(())
}

fn print_batch(label: &str, op: &BatchOperation) -> anyhow::Result<()> {
    println!(
        "== {label}: {} succeeded, {} failed ({:.0}%)",
        op.succeeded(),
        op.failed(),
        op.progress_percent
    );
    println!("{}", serde_json::to_string_pretty(op)?);
    Ok(())
}
