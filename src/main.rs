use std::collections::HashMap;
use std::future::IntoFuture;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use droidlink::adb::{self, AdbOptions};
use droidlink::device;
use droidlink::state::AppState;
use droidlink::web;

/// How often to look for newly attached adb devices.
const DISCOVERY_INTERVAL: Duration = Duration::from_secs(10);

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Debug,
    #[default]
    Info,
    Error,
    Silent,
}

/// droidlink command line arguments
#[derive(Parser, Debug)]
#[command(name = "droidlink")]
#[command(version, about = "Stream Android devices to browsers over WebRTC", long_about = None)]
struct CliArgs {
    /// Listen address for the HTTP/signaling server
    #[arg(short = 'a', long, value_name = "ADDRESS", default_value = "0.0.0.0:8080")]
    address: String,

    /// Attach only this device serial (default: attach every adb device)
    #[arg(short = 'd', long, value_name = "SERIAL")]
    device: Option<String>,

    /// Adb server host
    #[arg(long, value_name = "HOST", default_value = "127.0.0.1")]
    adb_host: String,

    /// Adb server port
    #[arg(long, value_name = "PORT", default_value_t = 5037)]
    adb_port: u16,

    /// Base local TCP port for agent reverse tunnels
    #[arg(long, value_name = "PORT", default_value_t = adb::DEFAULT_AGENT_PORT)]
    agent_port: u16,

    /// Path of the agent jar pushed to devices
    #[arg(long, value_name = "FILE", default_value = "./assets/scrcpy-server")]
    agent_jar: PathBuf,

    /// Log level (debug, info, error, silent)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level);

    tracing::info!("Starting droidlink v{}", env!("CARGO_PKG_VERSION"));

    let state = AppState::new(AdbOptions {
        server_host: args.adb_host,
        server_port: args.adb_port,
        agent_port: args.agent_port,
        agent_jar: args.agent_jar,
    });

    let app = web::create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&args.address)
        .await
        .with_context(|| format!("failed to listen on {}", args.address))?;
    tracing::info!("Signaling server listening on {}", args.address);

    match args.device {
        Some(serial) => {
            // Fixed-device mode: an agent bootstrap failure is fatal so the
            // exit code reflects it; a stream that ends later is not.
            let mut server = pin!(axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .into_future());
            let attach = pin!(device::attach_device(state.clone(), serial));
            tokio::select! {
                result = &mut server => {
                    result?;
                    return Ok(());
                }
                result = attach => {
                    result?;
                    tracing::info!("device session ended, continuing to serve");
                }
            }
            server.await?;
        }
        None => {
            tokio::spawn(discover_devices(state));
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Poll `adb devices` and attach anything new in the `device` state.
///
/// A session that ends (or fails to set up) leaves the map on the next tick
/// and is retried by re-invocation as long as adb still lists the device.
async fn discover_devices(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(DISCOVERY_INTERVAL);
    let mut attached: HashMap<String, JoinHandle<()>> = HashMap::new();
    loop {
        interval.tick().await;
        attached.retain(|_, handle| !handle.is_finished());

        let devices = match adb::list_devices(&state.adb).await {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!("device discovery failed: {e}");
                continue;
            }
        };
        for info in devices {
            if info.state != "device" || attached.contains_key(&info.serial) {
                continue;
            }
            let state = state.clone();
            let serial = info.serial.clone();
            attached.insert(
                info.serial,
                tokio::spawn(async move {
                    if let Err(e) = device::attach_device(state, serial.clone()).await {
                        tracing::warn!(device = %serial, "device attach failed: {e}");
                    }
                }),
            );
        }
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Shutdown signal received");
    }
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel) {
    let filter = match level {
        LogLevel::Debug => "droidlink=debug,tower_http=debug",
        LogLevel::Info => "droidlink=info,tower_http=info",
        LogLevel::Error => "droidlink=error,tower_http=error",
        LogLevel::Silent => "off",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
