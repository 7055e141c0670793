//! Device Bridge Resolution
//!
//! Turns a device selector into a reachable `host:port` address. Directly
//! addressed processes pass through verbatim; USB-attached devices are
//! reached by mapping a local port onto the device's well-known inspection
//! port through `adb forward`.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Well-known port the instrumented process listens on, device-side.
pub const DEVICE_PORT: u16 = 6555;

/// How to reach the process to inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// A directly reachable `host:port`; resolution returns it unchanged.
    Direct(String),
    /// A device attached through the bridge, by serial. A tunnel to `port`
    /// on the device is established and a loopback address returned.
    Device { serial: String, port: u16 },
}

impl DeviceSelector {
    /// Selector for a bridged device using the well-known port.
    pub fn device(serial: impl Into<String>) -> Self {
        DeviceSelector::Device {
            serial: serial.into(),
            port: DEVICE_PORT,
        }
    }
}

/// Errors turning a selector into an address.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("failed to run adb: {0}")]
    AdbUnavailable(String),

    #[error("adb command failed: {0}")]
    CommandFailed(String),

    #[error("unexpected adb reply: '{0}'")]
    UnexpectedReply(String),
}

/// Resolver interface consumed by session orchestration.
///
/// Implementations may perform a port-forwarding side effect when the
/// selector names a bridged device.
#[async_trait]
pub trait BridgeResolver: Send + Sync {
    async fn resolve(&self, selector: &DeviceSelector) -> Result<String, ResolveError>;
}

/// An attached device as reported by the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: String,
    /// Connection state (`device`, `offline`, `unauthorized`, ...)
    pub state: String,
    /// Model name when the bridge reports one
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveForward {
    serial: String,
    local_port: u16,
}

/// Bridge resolver backed by the `adb` binary.
///
/// At most one forward is kept alive per bridge instance: re-resolving a
/// device selector releases the previous mapping before creating the new
/// one, and dropping the bridge releases it best-effort. Direct selectors
/// never touch adb.
pub struct AdbBridge {
    adb_path: String,
    active_forward: Mutex<Option<ActiveForward>>,
}

impl Default for AdbBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl AdbBridge {
    /// Bridge using `adb` from `PATH`.
    pub fn new() -> Self {
        Self::with_adb_path("adb")
    }

    /// Bridge using an explicit adb executable.
    pub fn with_adb_path(adb_path: impl Into<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
            active_forward: Mutex::new(None),
        }
    }

    /// Attached devices, for selector construction.
    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>, ResolveError> {
        let output = self.run_adb(&["devices", "-l"]).await?;
        Ok(parse_device_list(&output))
    }

    /// Release the live forward, if any.
    pub async fn release_forward(&self) -> Result<(), ResolveError> {
        let Some(forward) = self.active_forward.lock().unwrap().take() else {
            return Ok(());
        };
        info!(
            "releasing forward tcp:{} for device {}",
            forward.local_port, forward.serial
        );
        self.run_adb(&[
            "-s",
            &forward.serial,
            "forward",
            "--remove",
            &format!("tcp:{}", forward.local_port),
        ])
        .await?;
        Ok(())
    }

    async fn forward_device_port(
        &self,
        serial: &str,
        remote_port: u16,
    ) -> Result<String, ResolveError> {
        // Stale mappings from a previous session would otherwise accumulate
        // until adb restarts.
        if let Err(e) = self.release_forward().await {
            warn!("failed to release previous forward: {}", e);
        }

        let reply = self
            .run_adb(&[
                "-s",
                serial,
                "forward",
                "tcp:0",
                &format!("tcp:{remote_port}"),
            ])
            .await?;
        let local_port = parse_forward_reply(&reply)?;

        *self.active_forward.lock().unwrap() = Some(ActiveForward {
            serial: serial.to_string(),
            local_port,
        });

        info!("forwarding 127.0.0.1:{local_port} -> {serial}:{remote_port}");
        Ok(format!("127.0.0.1:{local_port}"))
    }

    async fn run_adb(&self, args: &[&str]) -> Result<String, ResolveError> {
        debug!("running {} {}", self.adb_path, args.join(" "));
        let output = Command::new(&self.adb_path)
            .args(args)
            .output()
            .await
            .map_err(|e| ResolveError::AdbUnavailable(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ResolveError::CommandFailed(stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl BridgeResolver for AdbBridge {
    async fn resolve(&self, selector: &DeviceSelector) -> Result<String, ResolveError> {
        match selector {
            DeviceSelector::Direct(address) => Ok(address.clone()),
            DeviceSelector::Device { serial, port } => {
                self.forward_device_port(serial, *port).await
            }
        }
    }
}

impl Drop for AdbBridge {
    fn drop(&mut self) {
        let Some(forward) = self.active_forward.lock().unwrap().take() else {
            return;
        };
        let result = std::process::Command::new(&self.adb_path)
            .args([
                "-s",
                &forward.serial,
                "forward",
                "--remove",
                &format!("tcp:{}", forward.local_port),
            ])
            .status();
        if let Err(e) = result {
            warn!("failed to release forward on drop: {}", e);
        }
    }
}

/// Parse the local port adb prints back for a `forward tcp:0` request.
fn parse_forward_reply(reply: &str) -> Result<u16, ResolveError> {
    reply
        .trim()
        .parse::<u16>()
        .map_err(|_| ResolveError::UnexpectedReply(reply.trim().to_string()))
}

/// Parse `adb devices -l` output.
fn parse_device_list(output: &str) -> Vec<DeviceInfo> {
    output
        .lines()
        .skip(1) // "List of devices attached" header
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let serial = fields.next()?;
            let state = fields.next()?;
            let model = fields
                .find_map(|field| field.strip_prefix("model:"))
                .map(|m| m.replace('_', " "));
            Some(DeviceInfo {
                serial: serial.to_string(),
                state: state.to_string(),
                model,
            })
        })
        .collect()
}
