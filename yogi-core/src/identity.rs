//! Branch identity: the immutable record a branch publishes about itself, and
//! the JSON shape it takes on the wire and in events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, ErrorCode, Result};
use crate::time::{Duration, Timestamp};

/// Everything a branch tells its peers about itself. Created once at branch
/// construction and never mutated. Remote branches are described by the same
/// record, received during the metadata exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchIdentity {
    pub uuid: Uuid,
    pub name: String,
    pub description: String,
    pub network_name: String,
    pub path: String,
    pub hostname: String,
    pub pid: u32,
    #[serde(with = "json_duration")]
    pub advertising_interval: Duration,
    pub tcp_server_address: String,
    pub tcp_server_port: u16,
    #[serde(with = "json_timestamp")]
    pub start_time: Timestamp,
    #[serde(with = "json_duration")]
    pub timeout: Duration,
    pub ghost_mode: bool,
}

/// Info about a remote branch as reported by events and the registry.
pub type RemoteBranchInfo = BranchIdentity;

impl BranchIdentity {
    /// Ghost branches never advertise and never complete authentication. An
    /// infinite advertising interval implies ghost mode.
    pub fn is_ghost(&self) -> bool {
        self.ghost_mode || self.advertising_interval.is_infinite()
    }

    pub fn to_json(&self) -> serde_json::Value {
        // Plain data with string keys; serialization to Value cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Parse the JSON body of an info message. Intervals and timeouts
    /// shorter than [`Duration::MIN_PERIOD`] are rejected.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let identity: Self = serde_json::from_slice(bytes)
            .map_err(|e| Error::with_details(ErrorCode::DeserializeMsgFailed, e.to_string()))?;
        for (key, d) in [
            ("advertising_interval", identity.advertising_interval),
            ("timeout", identity.timeout),
        ] {
            if d.is_below_min_period() {
                return Err(Error::with_details(
                    ErrorCode::DeserializeMsgFailed,
                    format!("{} of {} is below 1 ms", key, d),
                ));
            }
        }
        Ok(identity)
    }

    pub fn to_json_vec(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Network settings that only the local branch knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchNetworkConfig {
    pub advertising_address: String,
    pub advertising_port: u16,
    pub tx_queue_size: usize,
    pub rx_queue_size: usize,
}

/// What `Branch::info()` reports: the public identity plus local-only settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalBranchInfo {
    #[serde(flatten)]
    pub identity: BranchIdentity,
    #[serde(flatten)]
    pub network: BranchNetworkConfig,
}

impl LocalBranchInfo {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Seconds as a float, `-1` for infinite.
pub mod json_duration {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(d.to_json_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::from_json_secs(secs).map_err(serde::de::Error::custom)
    }
}

/// ISO-8601 string with millisecond precision.
pub mod json_timestamp {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::time::Timestamp;

    pub fn serialize<S: Serializer>(t: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&t.to_iso8601())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Timestamp, D::Error> {
        let s = String::deserialize(d)?;
        Timestamp::parse_iso8601(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
pub(crate) fn sample_identity(name: &str) -> BranchIdentity {
    BranchIdentity {
        uuid: Uuid::new_v4(),
        name: name.to_string(),
        description: "test branch".into(),
        network_name: "testnet".into(),
        path: format!("/{}", name),
        hostname: "host".into(),
        pid: 4242,
        advertising_interval: Duration::from_secs(1),
        tcp_server_address: "127.0.0.1".into(),
        tcp_server_port: 40000,
        start_time: Timestamp::from_nanos_since_epoch(1_524_507_943_511_000_000),
        timeout: Duration::from_millis(3000),
        ghost_mode: false,
    }
}
