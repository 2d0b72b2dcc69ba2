//! Registry of remote branches: connected peers, attempts in flight and
//! branches that must not be contacted again.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, ErrorCode, Result};
use crate::events::fit_buffer;
use crate::identity::{BranchIdentity, RemoteBranchInfo};
use crate::time::Timestamp;

/// State kept for one connected remote branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBranchRecord {
    pub info: RemoteBranchInfo,
    pub endpoint: SocketAddr,
    pub connected_since: Timestamp,
    pub last_seen: Timestamp,
}

impl RemoteBranchRecord {
    pub fn new(info: RemoteBranchInfo, endpoint: SocketAddr) -> Self {
        let now = Timestamp::now();
        Self {
            info,
            endpoint,
            connected_since: now,
            last_seen: now,
        }
    }
}

/// Owned by one branch and handed to its connection manager. At most one
/// record per uuid; the local branch never appears in it.
#[derive(Debug)]
pub struct BranchRegistry {
    local: BranchIdentity,
    connected: HashMap<Uuid, RemoteBranchRecord>,
    discovered: HashSet<Uuid>,
    pending: HashSet<Uuid>,
    blacklist: HashSet<Uuid>,
}

impl BranchRegistry {
    pub fn new(local: BranchIdentity) -> Self {
        Self {
            local,
            connected: HashMap::new(),
            discovered: HashSet::new(),
            pending: HashSet::new(),
            blacklist: HashSet::new(),
        }
    }

    pub fn local(&self) -> &BranchIdentity {
        &self.local
    }

    /// Self, connected, in flight or blacklisted.
    pub fn is_known(&self, uuid: &Uuid) -> bool {
        *uuid == self.local.uuid
            || self.connected.contains_key(uuid)
            || self.pending.contains(uuid)
            || self.blacklist.contains(uuid)
    }

    pub fn is_connected(&self, uuid: &Uuid) -> bool {
        self.connected.contains_key(uuid)
    }

    pub fn is_blacklisted(&self, uuid: &Uuid) -> bool {
        self.blacklist.contains(uuid)
    }

    /// Remember a branch seen through advertising or an inbound connection.
    /// True the first time `uuid` is seen.
    pub fn mark_discovered(&mut self, uuid: Uuid) -> bool {
        uuid != self.local.uuid && self.discovered.insert(uuid)
    }

    /// Forget a branch so that its next advertisement starts over.
    pub fn forget(&mut self, uuid: &Uuid) {
        self.discovered.remove(uuid);
        self.pending.remove(uuid);
    }

    /// Claim an attempt for `uuid`. False if it is already known.
    pub fn begin_attempt(&mut self, uuid: Uuid) -> bool {
        if self.is_known(&uuid) {
            return false;
        }
        self.pending.insert(uuid)
    }

    /// Release the claim of a finished attempt.
    pub fn end_attempt(&mut self, uuid: &Uuid) {
        self.pending.remove(uuid);
    }

    /// Stop contacting `uuid` after a protocol or policy failure.
    pub fn blacklist(&mut self, uuid: Uuid) {
        self.pending.remove(&uuid);
        if self.blacklist.insert(uuid) {
            debug!("[{}] blacklisted {}", self.local.uuid, uuid);
        }
    }

    /// Validation run once a remote branch has authenticated. Checks, in
    /// order: loopback, network name, duplicate name, duplicate path.
    pub fn check_remote(&self, remote: &BranchIdentity) -> Result<()> {
        if remote.uuid == self.local.uuid {
            return Err(ErrorCode::LoopbackConnection.into());
        }
        if remote.network_name != self.local.network_name {
            return Err(Error::with_details(
                ErrorCode::NetNameMismatch,
                format!(
                    "remote network \"{}\", local \"{}\"",
                    remote.network_name, self.local.network_name
                ),
            ));
        }
        let others: Vec<&BranchIdentity> = self
            .connected
            .values()
            .filter(|r| r.info.uuid != remote.uuid)
            .map(|r| &r.info)
            .collect();
        if remote.name == self.local.name || others.iter().any(|o| o.name == remote.name) {
            return Err(Error::with_details(
                ErrorCode::DuplicateBranchName,
                remote.name.clone(),
            ));
        }
        if remote.path == self.local.path || others.iter().any(|o| o.path == remote.path) {
            return Err(Error::with_details(
                ErrorCode::DuplicateBranchPath,
                remote.path.clone(),
            ));
        }
        Ok(())
    }

    /// Register a connected branch. Validation is repeated here since other
    /// connections may have completed while this one was authenticating.
    pub fn insert(&mut self, record: RemoteBranchRecord) -> Result<()> {
        let uuid = record.info.uuid;
        self.pending.remove(&uuid);
        if self.connected.contains_key(&uuid) {
            return Err(Error::with_details(
                ErrorCode::DuplicateBranchName,
                format!("{} is already connected", uuid),
            ));
        }
        self.check_remote(&record.info)?;
        self.connected.insert(uuid, record);
        Ok(())
    }

    pub fn remove(&mut self, uuid: &Uuid) -> Option<RemoteBranchRecord> {
        self.connected.remove(uuid)
    }

    /// Record activity on a connection.
    pub fn touch(&mut self, uuid: &Uuid) {
        if let Some(r) = self.connected.get_mut(uuid) {
            r.last_seen = Timestamp::now();
        }
    }

    pub fn get(&self, uuid: &Uuid) -> Option<&RemoteBranchRecord> {
        self.connected.get(uuid)
    }

    pub fn len(&self) -> usize {
        self.connected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connected.is_empty()
    }

    /// Copy of the connected branches.
    pub fn snapshot(&self) -> HashMap<Uuid, RemoteBranchInfo> {
        self.connected
            .iter()
            .map(|(k, v)| (*k, v.info.clone()))
            .collect()
    }

    /// Connected branches as one JSON object keyed by uuid, bounded by
    /// `buffer_size` (`BufferTooSmall` if it does not fit).
    pub fn connected_json(&self, buffer_size: usize) -> Result<String> {
        let mut map = Map::new();
        for (uuid, rec) in &self.connected {
            map.insert(uuid.to_string(), rec.info.to_json());
        }
        fit_buffer(Value::Object(map).to_string(), buffer_size)
    }

    /// Drop every record, e.g. on shutdown. Returns the removed uuids.
    pub fn clear(&mut self) -> Vec<Uuid> {
        self.pending.clear();
        self.discovered.clear();
        self.connected.drain().map(|(k, _)| k).collect()
    }
}

/// Parse the output of [`BranchRegistry::connected_json`].
pub fn parse_connected_json(json: &str) -> Result<HashMap<Uuid, RemoteBranchInfo>> {
    serde_json::from_str::<HashMap<Uuid, RemoteBranchInfo>>(json)
        .map_err(|e| Error::with_details(ErrorCode::ParsingJsonFailed, e.to_string()))
}
