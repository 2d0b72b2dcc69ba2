//! Branch: a named member of a Yogi network. Advertises itself, connects to
//! the branches it discovers and reports what happens through events.

mod advertising;
mod connection;
mod manager;
mod notifier;

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, UdpSocket};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Configuration;
use crate::context::Context;
use crate::lock;
use yogi_core::registry::parse_connected_json;
use yogi_core::wire::Advertisement;
use yogi_core::{
    BranchConfig, BranchEvents, BranchIdentity, BranchRegistry, Error, ErrorCode, EventOutcome,
    HostInfo, LocalBranchInfo, RemoteBranchInfo, Result, Timestamp,
};

pub use notifier::EventHandler;

/// Initial size of the buffer `connected_branches` serializes into.
const CONNECTED_BRANCHES_BUFFER_HINT: usize = 1024;

/// State shared between the branch handle and its I/O tasks.
pub(crate) struct BranchShared {
    pub(crate) identity: BranchIdentity,
    pub(crate) config: BranchConfig,
    pub(crate) registry: Mutex<BranchRegistry>,
    pub(crate) notifier: notifier::EventNotifier,
    pub(crate) shutdown: watch::Receiver<bool>,
    pub(crate) io: Handle,
}

/// A branch. Keeps its context alive; dropping it closes all connections
/// and cancels a pending event subscription.
pub struct Branch {
    shared: Arc<BranchShared>,
    info: LocalBranchInfo,
    shutdown: watch::Sender<bool>,
    ctx: Context,
}

fn host_info() -> HostInfo {
    HostInfo {
        hostname: whoami::fallible::hostname().unwrap_or_else(|_| "localhost".into()),
        pid: std::process::id(),
    }
}

fn bind_tcp_server(family: &IpAddr) -> Result<TcpListener> {
    let any = match family {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    let listener = std::net::TcpListener::bind(SocketAddr::new(any, 0))
        .map_err(|e| Error::with_details(ErrorCode::BindSocketFailed, e.to_string()))?;
    listener
        .set_nonblocking(true)
        .map_err(|e| Error::with_details(ErrorCode::SetSocketOptionFailed, e.to_string()))?;
    TcpListener::from_std(listener)
        .map_err(|e| Error::with_details(ErrorCode::ListenSocketFailed, e.to_string()))
}

fn to_tokio_udp(socket: std::net::UdpSocket) -> Result<UdpSocket> {
    UdpSocket::from_std(socket)
        .map_err(|e| Error::with_details(ErrorCode::OpenSocketFailed, e.to_string()))
}

impl Branch {
    /// Create a branch from a JSON object of branch properties (`null` for
    /// all defaults) and start advertising, listening and connecting.
    pub fn new(ctx: &Context, props: &serde_json::Value) -> Result<Self> {
        let host = host_info();
        let config = BranchConfig::from_json(props, &host)?;
        let _enter = ctx.io().enter();

        let listener = bind_tcp_server(&config.advertising_address)?;
        let tcp_addr = listener
            .local_addr()
            .map_err(|e| Error::with_details(ErrorCode::ListenSocketFailed, e.to_string()))?;
        let receiver = to_tokio_udp(advertising::open_receiver(
            config.advertising_address,
            config.advertising_port,
        )?)?;
        let sender = if config.is_ghost() {
            None
        } else {
            Some(to_tokio_udp(advertising::open_sender(
                config.advertising_address,
            )?)?)
        };

        let identity = config.identity(
            Uuid::new_v4(),
            &host,
            Timestamp::now(),
            tcp_addr.ip().to_string(),
            tcp_addr.port(),
        );
        let uuid = identity.uuid;
        let info = config.local_info(identity.clone());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(BranchShared {
            registry: Mutex::new(BranchRegistry::new(identity.clone())),
            notifier: notifier::EventNotifier::new(uuid, ctx.poster()),
            identity,
            config,
            shutdown: shutdown_rx.clone(),
            io: ctx.io().clone(),
        });

        ctx.spawn(manager::run_server(
            listener,
            Arc::clone(&shared),
            shutdown_rx.clone(),
        ));
        ctx.spawn(advertising::run_receiver(
            receiver,
            Arc::clone(&shared),
            shutdown_rx.clone(),
        ));
        let adv_dest = SocketAddr::new(shared.config.advertising_address, shared.config.advertising_port);
        match (sender, shared.config.advertising_interval.as_std()) {
            (Some(sender), Some(interval)) => {
                ctx.spawn(advertising::run_sender(
                    sender,
                    adv_dest,
                    Advertisement {
                        uuid,
                        tcp_port: tcp_addr.port(),
                    },
                    interval,
                    shutdown_rx,
                ));
            }
            _ => debug!("[{}] ghost mode, not advertising", uuid),
        }

        info!(
            "[{}] branch {} ({}) started, tcp server {}, advertising on {}",
            uuid, shared.identity.name, shared.identity.path, tcp_addr, adv_dest
        );
        Ok(Self {
            shared,
            info,
            shutdown,
            ctx: ctx.clone(),
        })
    }

    /// Create a branch from a section of a configuration, e.g. `"/branch"`.
    pub fn from_config(ctx: &Context, config: &Configuration, section: &str) -> Result<Self> {
        let props = config.section(section)?;
        Self::new(ctx, &props)
    }

    pub fn uuid(&self) -> Uuid {
        self.shared.identity.uuid
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Identity and local settings of this branch.
    pub fn info(&self) -> LocalBranchInfo {
        self.info.clone()
    }

    /// Wait for the next event matching `mask`. Replaces a pending wait,
    /// which receives `EventOutcome::Canceled`. If the event's JSON payload
    /// needs more than `buffer_size` bytes (terminator included) the handler
    /// gets `EventOutcome::BufferTooSmall` instead.
    pub fn await_event<F>(&self, mask: BranchEvents, buffer_size: usize, handler: F)
    where
        F: FnOnce(EventOutcome) + Send + 'static,
    {
        self.shared
            .notifier
            .subscribe(mask, buffer_size, Box::new(handler));
    }

    /// Cancel the pending wait. False if there was none.
    pub fn cancel_await_event(&self) -> bool {
        self.shared.notifier.cancel()
    }

    /// Snapshot of the connected branches.
    pub fn connected_branches(&self) -> Result<HashMap<Uuid, RemoteBranchInfo>> {
        self.connected_branches_with_hint(CONNECTED_BRANCHES_BUFFER_HINT)
    }

    /// Same as [`Branch::connected_branches`], serializing into a buffer that
    /// starts at `hint` bytes and doubles until the snapshot fits.
    pub fn connected_branches_with_hint(
        &self,
        hint: usize,
    ) -> Result<HashMap<Uuid, RemoteBranchInfo>> {
        let mut size = hint.max(1);
        loop {
            let json = lock(&self.shared.registry).connected_json(size);
            match json {
                Ok(json) => return parse_connected_json(&json),
                Err(e) if e.is(ErrorCode::BufferTooSmall) => size = size.saturating_mul(2),
                Err(e) => return Err(e),
            }
        }
    }

    /// Connect to a branch at a known TCP endpoint without waiting for its
    /// advertisement. Progress is reported through events.
    pub fn connect_to(&self, addr: SocketAddr) {
        debug!("[{}] connecting to {}", self.uuid(), addr);
        manager::spawn_outbound(Arc::clone(&self.shared), addr, None);
    }
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("uuid", &self.shared.identity.uuid)
            .field("name", &self.shared.identity.name)
            .field("path", &self.shared.identity.path)
            .finish()
    }
}

impl Drop for Branch {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        self.shared.notifier.cancel();
        let dropped = lock(&self.shared.registry).clear();
        debug!(
            "[{}] branch destroyed, closed {} connections",
            self.shared.identity.uuid,
            dropped.len()
        );
    }
}
