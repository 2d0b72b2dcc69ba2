//! Connection manager: turns discovered endpoints and inbound sockets into
//! authenticated connections and keeps the registry and subscribers informed.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::connection::{self as conn, with_timeout};
use super::BranchShared;
use crate::lock;
use yogi_core::{
    is_transient, BranchEvent, BranchIdentity, ConnectionProgress, ConnectionState, Error,
    ErrorCode, RemoteBranchRecord,
};

/// An advertisement from another branch arrived.
pub(crate) fn on_advertisement(shared: &Arc<BranchShared>, uuid: Uuid, addr: SocketAddr) {
    let local = &shared.identity;
    let dial = {
        let mut reg = lock(&shared.registry);
        if reg.is_known(&uuid) || !reg.mark_discovered(uuid) {
            return;
        }
        // One connection per pair: the lower uuid dials. Ghosts always dial
        // since nobody dials them.
        let dial = local.is_ghost() || uuid > local.uuid;
        dial && reg.begin_attempt(uuid)
    };
    debug!("[{}] discovered {} at {}", local.uuid, uuid, addr);
    shared.notifier.publish(
        BranchEvent::BranchDiscovered {
            uuid,
            tcp_server_address: addr.ip().to_string(),
            tcp_server_port: addr.port(),
        },
        Ok(()),
    );
    if dial {
        spawn_outbound(Arc::clone(shared), addr, Some(uuid));
    }
}

/// Dial `addr`. `expected` is the uuid from the advertisement, if the
/// endpoint was discovered; its attempt has already been claimed.
pub(crate) fn spawn_outbound(shared: Arc<BranchShared>, addr: SocketAddr, expected: Option<Uuid>) {
    let mut shutdown = shared.shutdown.clone();
    let io = shared.io.clone();
    io.spawn(async move {
        tokio::select! {
            _ = run_outbound(&shared, addr, expected) => {}
            _ = shutdown.changed() => {}
        }
    });
}

/// Which side opened the TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Dialed locally; carries the uuid when the endpoint was advertised.
    Dialed(Option<Uuid>),
    Accepted,
}

async fn run_outbound(shared: &Arc<BranchShared>, addr: SocketAddr, expected: Option<Uuid>) {
    let mut progress = ConnectionProgress::new();
    let connected = match progress.advance(ConnectionState::Connecting) {
        Ok(()) => {
            with_timeout(shared.config.timeout, async {
                TcpStream::connect(addr).await.map_err(|e| {
                    Error::with_details(ErrorCode::ConnectSocketFailed, e.to_string())
                })
            })
            .await
        }
        Err(e) => Err(e),
    };
    match connected {
        Ok(stream) => drive(shared, stream, addr, Origin::Dialed(expected), progress).await,
        Err(e) => match expected {
            Some(uuid) => finish_failed(shared, &mut progress, uuid, e),
            None => warn!("[{}] connecting to {} failed: {}", shared.identity.uuid, addr, e),
        },
    }
}

/// Accept inbound connections until shutdown.
pub(crate) async fn run_server(
    listener: TcpListener,
    shared: Arc<BranchShared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            r = listener.accept() => r,
            _ = shutdown.changed() => break,
        };
        match accepted {
            Ok((stream, addr)) => {
                debug!("[{}] accepted connection from {}", shared.identity.uuid, addr);
                let shared = Arc::clone(&shared);
                let mut shutdown = shutdown.clone();
                let io = shared.io.clone();
                io.spawn(async move {
                    tokio::select! {
                        _ = drive(&shared, stream, addr, Origin::Accepted, ConnectionProgress::new()) => {}
                        _ = shutdown.changed() => {}
                    }
                });
            }
            Err(e) => {
                let e = Error::with_details(ErrorCode::AcceptSocketFailed, e.to_string());
                warn!("[{}] {}", shared.identity.uuid, e);
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
    debug!("[{}] tcp server stopped", shared.identity.uuid);
}

/// Handshake and session of one connection, in either direction.
async fn drive(
    shared: &Arc<BranchShared>,
    mut stream: TcpStream,
    peer: SocketAddr,
    origin: Origin,
    mut progress: ConnectionProgress,
) {
    let local = &shared.identity;
    let timeout = shared.config.timeout;
    let expected = match origin {
        Origin::Dialed(expected) => expected,
        Origin::Accepted => None,
    };
    if let Err(e) = stream.set_nodelay(true) {
        trace!("[{}] TCP_NODELAY for {}: {}", local.uuid, peer, e);
    }

    let remote = match progress.advance(ConnectionState::ExchangingMetadata) {
        Ok(()) => {
            with_timeout(timeout, async {
                conn::send_info(&mut stream, local).await?;
                conn::recv_info(&mut stream).await
            })
            .await
        }
        Err(e) => Err(e),
    }
    .and_then(|remote| match expected {
        Some(uuid) if uuid != remote.uuid => Err(Error::with_details(
            ErrorCode::DeserializeMsgFailed,
            format!("advertised as {}, identifies as {}", uuid, remote.uuid),
        )),
        _ => Ok(remote),
    });
    let remote = match remote {
        Ok(remote) => remote,
        Err(e) => {
            match expected {
                Some(uuid) => {
                    shared.notifier.publish(
                        BranchEvent::BranchQueried { uuid, info: None },
                        Err(e.clone()),
                    );
                    finish_failed(shared, &mut progress, uuid, e);
                }
                None => {
                    debug!("[{}] metadata exchange with {} failed: {}", local.uuid, peer, e);
                    progress.fail(e);
                }
            }
            return;
        }
    };
    let uuid = remote.uuid;

    if uuid == local.uuid {
        // Both halves of a self-connection end up here; the dialing one reports.
        match origin {
            Origin::Dialed(_) => {
                finish_failed(shared, &mut progress, uuid, ErrorCode::LoopbackConnection.into())
            }
            Origin::Accepted => {
                debug!("[{}] dropping loopback connection from {}", local.uuid, peer);
                progress.fail(ErrorCode::LoopbackConnection.into());
            }
        }
        return;
    }
    if expected.is_none() && !claim_unsolicited(shared, &remote, peer) {
        return;
    }

    if let Err(e) = with_timeout(timeout, conn::exchange_acks(&mut stream)).await {
        finish_failed(shared, &mut progress, uuid, e);
        return;
    }
    shared.notifier.publish(
        BranchEvent::BranchQueried {
            uuid,
            info: Some(remote.clone()),
        },
        Ok(()),
    );

    if local.is_ghost() || remote.is_ghost() {
        debug!("[{}] queried {} ({}), ghost mode ends the connection", local.uuid, remote.name, uuid);
        lock(&shared.registry).end_attempt(&uuid);
        return;
    }

    let authenticated = match progress.advance(ConnectionState::Authenticating) {
        Ok(()) => {
            with_timeout(
                timeout,
                conn::authenticate(&mut stream, &shared.config.network_password),
            )
            .await
        }
        Err(e) => Err(e),
    };
    if let Err(e) = authenticated {
        finish_failed(shared, &mut progress, uuid, e);
        return;
    }

    let local_verdict = lock(&shared.registry).insert(RemoteBranchRecord::new(remote.clone(), peer));
    let reserved = local_verdict.is_ok();
    let verdict = with_timeout(timeout, conn::exchange_verdicts(&mut stream, local_verdict))
        .await
        .and_then(|()| progress.advance(ConnectionState::Connected));
    if let Err(e) = verdict {
        if reserved {
            lock(&shared.registry).remove(&uuid);
        }
        finish_failed(shared, &mut progress, uuid, e);
        return;
    }

    info!(
        "[{}] connected to {} ({}) at {}",
        local.uuid, remote.name, uuid, peer
    );
    shared
        .notifier
        .publish(BranchEvent::ConnectFinished { uuid }, Ok(()));
    run_session(shared, stream, &remote).await;
}

/// Claim a connection the local branch did not dial. False if the remote
/// branch is already connected, being connected or blacklisted.
fn claim_unsolicited(shared: &Arc<BranchShared>, remote: &BranchIdentity, peer: SocketAddr) -> bool {
    let (claimed, newly_discovered) = {
        let mut reg = lock(&shared.registry);
        if !reg.begin_attempt(remote.uuid) {
            (false, false)
        } else {
            (true, reg.mark_discovered(remote.uuid))
        }
    };
    if !claimed {
        debug!(
            "[{}] dropping connection from {}: {} already known",
            shared.identity.uuid, peer, remote.uuid
        );
        return false;
    }
    if newly_discovered {
        shared.notifier.publish(
            BranchEvent::BranchDiscovered {
                uuid: remote.uuid,
                tcp_server_address: peer.ip().to_string(),
                tcp_server_port: remote.tcp_server_port,
            },
            Ok(()),
        );
    }
    true
}

async fn run_session(shared: &Arc<BranchShared>, stream: TcpStream, remote: &BranchIdentity) {
    let uuid = remote.uuid;
    let (r, w) = stream.into_split();
    let mut reader = BufReader::with_capacity(shared.config.rx_queue_size, r);
    let mut writer = BufWriter::with_capacity(shared.config.tx_queue_size, w);
    let mut shutdown = shared.shutdown.clone();
    let ended = tokio::select! {
        e = conn::receive_loop(&mut reader, shared.config.timeout, || lock(&shared.registry).touch(&uuid)) => Some(e),
        e = conn::heartbeat_loop(&mut writer, remote.timeout.halved()) => Some(e),
        _ = shutdown.changed() => None,
    };
    let Some(err) = ended else {
        return;
    };
    {
        let mut reg = lock(&shared.registry);
        reg.remove(&uuid);
        reg.forget(&uuid);
    }
    info!(
        "[{}] connection to {} ({}) lost: {}",
        shared.identity.uuid, remote.name, uuid, err
    );
    shared
        .notifier
        .publish(BranchEvent::ConnectionLost { uuid }, Err(err));
}

/// A connection attempt ended before `Connected`. Protocol and policy
/// failures blacklist the remote branch; others allow a retry.
fn finish_failed(
    shared: &Arc<BranchShared>,
    progress: &mut ConnectionProgress,
    uuid: Uuid,
    err: Error,
) {
    let state = progress.state();
    progress.fail(err.clone());
    let local = shared.identity.uuid;
    if uuid != local {
        let mut reg = lock(&shared.registry);
        if is_transient(err.code()) {
            reg.forget(&uuid);
        } else {
            reg.blacklist(uuid);
        }
    }
    warn!("[{}] connection to {} failed while {}: {}", local, uuid, state, err);
    shared
        .notifier
        .publish(BranchEvent::ConnectFinished { uuid }, Err(err));
}
