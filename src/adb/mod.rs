//! Minimal adb wrapper
//!
//! Wraps the subset of adb interactions needed to bootstrap the on-device
//! screen-capture agent and channel its two call-back connections: a reverse
//! tunnel from the device-side abstract socket to a local TCP port, a push of
//! the agent jar, and an `app_process` launch. The agent then connects back
//! twice to the local port: first the video stream, second the control
//! socket.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};

/// Default local TCP port the agent connects back to.
pub const DEFAULT_AGENT_PORT: u16 = 27183;

/// Device-side abstract socket the agent listens behind.
pub const AGENT_SOCKET_NAME: &str = "localabstract:scrcpy";

const AGENT_REMOTE_PATH: &str = "/data/local/tmp/scrcpy-server.jar";
const AGENT_VERSION: &str = "3.3.2";

/// How long to wait for the agent to call back before giving up.
const AGENT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(15);

/// Options shared by all adb invocations.
#[derive(Debug, Clone)]
pub struct AdbOptions {
    /// Host of the adb server instance.
    pub server_host: String,
    /// Port of the adb server instance.
    pub server_port: u16,
    /// Base local TCP port for agent reverse tunnels.
    pub agent_port: u16,
    /// Local path of the agent jar pushed to the device.
    pub agent_jar: PathBuf,
}

impl Default for AdbOptions {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 5037,
            agent_port: DEFAULT_AGENT_PORT,
            agent_jar: PathBuf::from("./assets/scrcpy-server"),
        }
    }
}

/// One entry of `adb devices` output.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AdbDeviceInfo {
    pub serial: String,
    pub state: String,
}

/// Both call-back connections established by the agent.
pub struct AgentConnection {
    /// Length-framed H.264 elementary stream, read-only on the host.
    pub video: TcpStream,
    /// Bidirectional control socket.
    pub control: TcpStream,
}

/// Adb interactions scoped to one device serial.
pub struct Device {
    opts: AdbOptions,
    serial: String,
    agent_port: u16,
}

impl Device {
    /// Ensure the adb server is reachable and return a configured handle.
    ///
    /// `agent_port` must be unique per concurrently-attached device so the
    /// two reverse tunnels cannot cross-talk.
    pub async fn new(opts: AdbOptions, serial: &str, agent_port: u16) -> Result<Self> {
        let device = Self {
            opts,
            serial: serial.to_string(),
            agent_port,
        };
        device.run_adb(false, &["start-server"]).await?;
        Ok(device)
    }

    /// Effective local port used for the reverse tunnel.
    pub fn agent_port(&self) -> u16 {
        self.agent_port
    }

    fn base_args(&self, with_serial: bool) -> Vec<String> {
        let mut args = vec![
            "-H".to_string(),
            self.opts.server_host.clone(),
            "-P".to_string(),
            self.opts.server_port.to_string(),
        ];
        if with_serial {
            args.push("-s".to_string());
            args.push(self.serial.clone());
        }
        args
    }

    async fn run_adb(&self, with_serial: bool, extra: &[&str]) -> Result<()> {
        let mut args = self.base_args(with_serial);
        args.extend(extra.iter().map(|s| s.to_string()));

        let output = Command::new("adb")
            .args(&args)
            .output()
            .await
            .map_err(|e| AppError::LinkSetup(format!("spawn adb {}: {e}", extra.join(" "))))?;
        if !output.status.success() {
            return Err(AppError::LinkSetup(format!(
                "adb {} failed: {}",
                extra.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    /// Ask the device to connect `AGENT_SOCKET_NAME` back to our local port.
    pub async fn reverse(&self) -> Result<()> {
        let local = format!("tcp:{}", self.agent_port);
        self.run_adb(true, &["reverse", AGENT_SOCKET_NAME, &local])
            .await
    }

    /// Upload the agent jar into the device's temp directory.
    pub async fn push_agent(&self) -> Result<()> {
        let local = self.opts.agent_jar.to_string_lossy().to_string();
        self.run_adb(true, &["push", &local, AGENT_REMOTE_PATH])
            .await
    }

    /// Launch the agent through `adb shell` and wait for both call-backs.
    pub async fn start_agent(&self) -> Result<AgentConnection> {
        let listener = TcpListener::bind(("127.0.0.1", self.agent_port))
            .await
            .map_err(|e| {
                AppError::LinkSetup(format!("listen on 127.0.0.1:{}: {e}", self.agent_port))
            })?;

        let classpath = format!("CLASSPATH={AGENT_REMOTE_PATH}");
        let mut args = self.base_args(true);
        args.extend(
            [
                "shell",
                classpath.as_str(),
                "app_process",
                "/",
                "com.genymobile.scrcpy.Server",
                AGENT_VERSION,
                "audio=false",
            ]
            .iter()
            .map(|s| s.to_string()),
        );

        let mut child = Command::new("adb")
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| AppError::LinkSetup(format!("start agent: {e}")))?;
        let serial = self.serial.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(device = %serial, %status, "agent shell exited"),
                Err(e) => warn!(device = %serial, "agent shell wait failed: {e}"),
            }
        });

        let video = self.accept_agent(&listener, "video").await?;
        let control = match self.accept_agent(&listener, "control").await {
            Ok(conn) => conn,
            Err(e) => {
                drop(video);
                return Err(e);
            }
        };

        info!(device = %self.serial, port = self.agent_port, "agent connected");
        Ok(AgentConnection { video, control })
    }

    async fn accept_agent(&self, listener: &TcpListener, channel: &str) -> Result<TcpStream> {
        let accepted = tokio::time::timeout(AGENT_ACCEPT_TIMEOUT, listener.accept())
            .await
            .map_err(|_| {
                AppError::LinkSetup(format!("timed out waiting for {channel} connection"))
            })?;
        let (stream, peer) = accepted
            .map_err(|e| AppError::LinkSetup(format!("accept {channel} connection: {e}")))?;
        // Disable Nagle so small control packets and frame boundaries are not
        // coalesced.
        stream
            .set_nodelay(true)
            .map_err(|e| AppError::LinkSetup(format!("set {channel} TCP_NODELAY: {e}")))?;
        debug!(device = %self.serial, %peer, channel, "agent call-back accepted");
        Ok(stream)
    }
}

/// Run `adb devices` and parse the listing.
pub async fn list_devices(opts: &AdbOptions) -> Result<Vec<AdbDeviceInfo>> {
    let server_port = opts.server_port.to_string();
    let output = Command::new("adb")
        .args([
            "-H",
            opts.server_host.as_str(),
            "-P",
            server_port.as_str(),
            "devices",
        ])
        .output()
        .await
        .map_err(|e| AppError::LinkSetup(format!("spawn adb devices: {e}")))?;
    if !output.status.success() {
        return Err(AppError::LinkSetup(format!(
            "adb devices failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(parse_devices_output(&String::from_utf8_lossy(
        &output.stdout,
    )))
}

/// Parse `adb devices` output.
///
/// ```text
/// List of devices attached
/// 192.168.66.102:5555    device
/// emulator-5554          offline
/// ```
fn parse_devices_output(output: &str) -> Vec<AdbDeviceInfo> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(serial), Some(state)) => Some(AdbDeviceInfo {
                    serial: serial.to_string(),
                    state: state.to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}
