//! Branch properties: the JSON object a branch is constructed from, its
//! defaults and validation.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, ErrorCode, Result};
use crate::identity::{json_duration, BranchIdentity, BranchNetworkConfig, LocalBranchInfo};
use crate::time::{Duration, Timestamp};

pub const DEFAULT_ADVERTISING_ADDRESS: &str = "ff31::8000:2439";
pub const DEFAULT_ADVERTISING_PORT: u16 = 13531;
pub const DEFAULT_ADVERTISING_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);
pub const MIN_QUEUE_SIZE: usize = 35_000;
pub const MAX_QUEUE_SIZE: usize = 10_000_000;

/// Facts about the running process that feed the defaults.
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub hostname: String,
    pub pid: u32,
}

/// Raw branch properties as found in a configuration document. Every key is
/// optional; unknown keys are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BranchProperties {
    /// Default `<pid>@<hostname>`.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Default `/<name>`.
    #[serde(default)]
    pub path: Option<String>,
    /// Default: the hostname.
    #[serde(default)]
    pub network_name: Option<String>,
    #[serde(default)]
    pub network_password: String,
    #[serde(default = "default_advertising_address")]
    pub advertising_address: String,
    #[serde(default = "default_advertising_port")]
    pub advertising_port: u16,
    #[serde(default = "default_advertising_interval", with = "json_duration")]
    pub advertising_interval: Duration,
    #[serde(default = "default_timeout", with = "json_duration")]
    pub timeout: Duration,
    #[serde(default)]
    pub ghost_mode: bool,
    #[serde(default = "default_queue_size")]
    pub tx_queue_size: usize,
    #[serde(default = "default_queue_size")]
    pub rx_queue_size: usize,
}

fn default_advertising_address() -> String {
    DEFAULT_ADVERTISING_ADDRESS.to_string()
}
fn default_advertising_port() -> u16 {
    DEFAULT_ADVERTISING_PORT
}
fn default_advertising_interval() -> Duration {
    Duration::Finite(DEFAULT_ADVERTISING_INTERVAL)
}
fn default_timeout() -> Duration {
    Duration::Finite(DEFAULT_TIMEOUT)
}
fn default_queue_size() -> usize {
    MIN_QUEUE_SIZE
}

impl Default for BranchProperties {
    fn default() -> Self {
        Self {
            name: None,
            description: String::new(),
            path: None,
            network_name: None,
            network_password: String::new(),
            advertising_address: default_advertising_address(),
            advertising_port: default_advertising_port(),
            advertising_interval: default_advertising_interval(),
            timeout: default_timeout(),
            ghost_mode: false,
            tx_queue_size: default_queue_size(),
            rx_queue_size: default_queue_size(),
        }
    }
}

/// Fully resolved and validated branch settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchConfig {
    pub name: String,
    pub description: String,
    pub path: String,
    pub network_name: String,
    pub network_password: String,
    pub advertising_address: IpAddr,
    pub advertising_port: u16,
    pub advertising_interval: Duration,
    pub timeout: Duration,
    pub ghost_mode: bool,
    pub tx_queue_size: usize,
    pub rx_queue_size: usize,
}

impl BranchConfig {
    /// Resolve properties from a JSON object (`null` means all defaults).
    pub fn from_json(props: &serde_json::Value, host: &HostInfo) -> Result<Self> {
        let props: BranchProperties = if props.is_null() {
            BranchProperties::default()
        } else {
            serde_json::from_value(props.clone())
                .map_err(|e| Error::with_details(ErrorCode::ConfigNotValid, e.to_string()))?
        };
        Self::resolve(props, host)
    }

    pub fn resolve(props: BranchProperties, host: &HostInfo) -> Result<Self> {
        let name = props
            .name
            .unwrap_or_else(|| format!("{}@{}", host.pid, host.hostname));
        if name.is_empty() {
            return Err(invalid("name must not be empty"));
        }
        let path = props.path.unwrap_or_else(|| format!("/{}", name));
        if !path.starts_with('/') {
            return Err(invalid(format!("path \"{}\" must start with /", path)));
        }
        let network_name = props.network_name.unwrap_or_else(|| host.hostname.clone());
        if network_name.is_empty() {
            return Err(invalid("network_name must not be empty"));
        }
        let advertising_address: IpAddr = props.advertising_address.parse().map_err(|_| {
            invalid(format!(
                "advertising_address \"{}\" is not an IP address",
                props.advertising_address
            ))
        })?;
        check_min_duration("advertising_interval", props.advertising_interval)?;
        check_min_duration("timeout", props.timeout)?;
        check_queue_size("tx_queue_size", props.tx_queue_size)?;
        check_queue_size("rx_queue_size", props.rx_queue_size)?;

        Ok(Self {
            name,
            description: props.description,
            path,
            network_name,
            network_password: props.network_password,
            advertising_address,
            advertising_port: props.advertising_port,
            advertising_interval: props.advertising_interval,
            timeout: props.timeout,
            ghost_mode: props.ghost_mode,
            tx_queue_size: props.tx_queue_size,
            rx_queue_size: props.rx_queue_size,
        })
    }

    /// Explicit flag or an infinite advertising interval.
    pub fn is_ghost(&self) -> bool {
        self.ghost_mode || self.advertising_interval.is_infinite()
    }

    /// Build the identity once the TCP server endpoint is known.
    pub fn identity(
        &self,
        uuid: Uuid,
        host: &HostInfo,
        start_time: Timestamp,
        tcp_server_address: String,
        tcp_server_port: u16,
    ) -> BranchIdentity {
        BranchIdentity {
            uuid,
            name: self.name.clone(),
            description: self.description.clone(),
            network_name: self.network_name.clone(),
            path: self.path.clone(),
            hostname: host.hostname.clone(),
            pid: host.pid,
            advertising_interval: self.advertising_interval,
            tcp_server_address,
            tcp_server_port,
            start_time,
            timeout: self.timeout,
            ghost_mode: self.ghost_mode,
        }
    }

    pub fn network(&self) -> BranchNetworkConfig {
        BranchNetworkConfig {
            advertising_address: self.advertising_address.to_string(),
            advertising_port: self.advertising_port,
            tx_queue_size: self.tx_queue_size,
            rx_queue_size: self.rx_queue_size,
        }
    }

    pub fn local_info(&self, identity: BranchIdentity) -> LocalBranchInfo {
        LocalBranchInfo {
            identity,
            network: self.network(),
        }
    }
}

fn invalid(details: impl Into<String>) -> Error {
    Error::with_details(ErrorCode::ConfigNotValid, details)
}

fn check_min_duration(key: &str, d: Duration) -> Result<()> {
    if d.is_below_min_period() {
        return Err(invalid(format!(
            "{} must be at least 1 ms or negative for infinite",
            key
        )));
    }
    Ok(())
}

fn check_queue_size(key: &str, size: usize) -> Result<()> {
    if !(MIN_QUEUE_SIZE..=MAX_QUEUE_SIZE).contains(&size) {
        return Err(invalid(format!(
            "{} must be between {} and {}",
            key, MIN_QUEUE_SIZE, MAX_QUEUE_SIZE
        )));
    }
    Ok(())
}
