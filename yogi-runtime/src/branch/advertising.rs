//! Advertising: periodic UDP announcement of the branch's uuid and TCP port,
//! and reception of other branches' announcements.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use super::{manager, BranchShared};
use yogi_core::wire::{self, Advertisement, ADVERTISING_MESSAGE_LEN};
use yogi_core::{Error, ErrorCode, Result};

fn socket_error(code: ErrorCode, e: std::io::Error) -> Error {
    Error::with_details(code, e.to_string())
}

fn unspecified(addr: &IpAddr) -> IpAddr {
    match addr {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// Receiving socket: bound to the advertising port with `SO_REUSEADDR` so
/// several branches on one host can listen, and joined to the group if the
/// address is multicast.
pub(crate) fn open_receiver(group: IpAddr, port: u16) -> Result<std::net::UdpSocket> {
    let domain = match group {
        IpAddr::V4(_) => Domain::IPV4,
        IpAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| socket_error(ErrorCode::OpenSocketFailed, e))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| socket_error(ErrorCode::SetSocketOptionFailed, e))?;
    if group.is_ipv6() {
        socket
            .set_only_v6(true)
            .map_err(|e| socket_error(ErrorCode::SetSocketOptionFailed, e))?;
    }
    let bind = SocketAddr::new(unspecified(&group), port);
    socket
        .bind(&bind.into())
        .map_err(|e| socket_error(ErrorCode::BindSocketFailed, e))?;
    match group {
        IpAddr::V4(g) if g.is_multicast() => socket
            .join_multicast_v4(&g, &Ipv4Addr::UNSPECIFIED)
            .map_err(|e| socket_error(ErrorCode::SetSocketOptionFailed, e))?,
        IpAddr::V6(g) if g.is_multicast() => socket
            .join_multicast_v6(&g, 0)
            .map_err(|e| socket_error(ErrorCode::SetSocketOptionFailed, e))?,
        _ => {}
    }
    socket
        .set_nonblocking(true)
        .map_err(|e| socket_error(ErrorCode::SetSocketOptionFailed, e))?;
    Ok(socket.into())
}

/// Sending socket on an ephemeral port. Multicast loopback stays enabled so
/// branches on the same host see each other.
pub(crate) fn open_sender(group: IpAddr) -> Result<std::net::UdpSocket> {
    let socket = std::net::UdpSocket::bind(SocketAddr::new(unspecified(&group), 0))
        .map_err(|e| socket_error(ErrorCode::BindSocketFailed, e))?;
    let opt = match group {
        IpAddr::V4(_) => socket
            .set_multicast_loop_v4(true)
            .and_then(|_| socket.set_multicast_ttl_v4(1)),
        IpAddr::V6(_) => socket.set_multicast_loop_v6(true),
    };
    opt.and_then(|_| socket.set_nonblocking(true))
        .map_err(|e| socket_error(ErrorCode::SetSocketOptionFailed, e))?;
    Ok(socket)
}

/// Announce the branch every `interval` until shutdown.
pub(crate) async fn run_sender(
    socket: UdpSocket,
    dest: SocketAddr,
    adv: Advertisement,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let message = wire::encode_advertising(&adv);
    let mut ticker = tokio::time::interval(interval);
    let mut failing = false;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        match socket.send_to(&message, dest).await {
            Ok(_) => {
                if failing {
                    debug!("[{}] advertising to {} works again", adv.uuid, dest);
                }
                failing = false;
            }
            Err(e) => {
                if !failing {
                    warn!("[{}] sending advertising message to {} failed: {}", adv.uuid, dest, e);
                }
                failing = true;
            }
        }
    }
    trace!("[{}] advertising sender stopped", adv.uuid);
}

/// Receive announcements until shutdown and hand new branches to the
/// connection manager.
pub(crate) async fn run_receiver(
    socket: UdpSocket,
    shared: Arc<BranchShared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let local = shared.identity.uuid;
    // One byte more than a valid message so oversized datagrams are noticed.
    let mut buf = [0u8; ADVERTISING_MESSAGE_LEN + 1];
    loop {
        let received = tokio::select! {
            r = socket.recv_from(&mut buf) => r,
            _ = shutdown.changed() => break,
        };
        let (n, from) = match received {
            Ok(r) => r,
            Err(e) => {
                warn!("[{}] receiving advertising message failed: {}", local, e);
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                continue;
            }
        };
        let adv = match wire::decode_advertising(&buf[..n]) {
            Ok(adv) => adv,
            Err(e) => {
                debug!("[{}] invalid advertising message from {}: {}", local, from, e);
                continue;
            }
        };
        if adv.uuid == local {
            continue;
        }
        manager::on_advertisement(&shared, adv.uuid, SocketAddr::new(from.ip(), adv.tcp_port));
    }
    trace!("[{}] advertising receiver stopped", local);
}
