//! One TCP connection between two branches: info exchange, authentication,
//! validation verdicts, then heartbeats until it breaks.

use std::future::Future;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use yogi_core::auth::Authenticator;
use yogi_core::wire::{self, INFO_HEADER_LEN};
use yogi_core::{BranchIdentity, Duration, Error, ErrorCode, Message, Result};

fn io_error(e: std::io::Error) -> Error {
    Error::with_details(ErrorCode::RwSocketFailed, e.to_string())
}

fn unexpected(msg: &Message, expected: &str) -> Error {
    Error::with_details(
        ErrorCode::DeserializeMsgFailed,
        format!("expected {}, got {:?}", expected, msg),
    )
}

/// Run `fut` with a deadline; `Timeout` when it passes.
pub(crate) async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit.as_std() {
        Some(d) => tokio::time::timeout(d, fut)
            .await
            .map_err(|_| Error::from(ErrorCode::Timeout))?,
        None => fut.await,
    }
}

pub(crate) async fn write_message<W>(w: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = wire::encode_frame(msg)?;
    w.write_all(&frame).await.map_err(io_error)?;
    w.flush().await.map_err(io_error)
}

pub(crate) async fn read_message<R>(r: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 4];
    r.read_exact(&mut len).await.map_err(io_error)?;
    let len = wire::frame_len(len)?;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await.map_err(io_error)?;
    Ok(wire::decode_payload(&payload)?)
}

pub(crate) async fn send_info<W>(w: &mut W, local: &BranchIdentity) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = wire::encode_info(local)?;
    w.write_all(&bytes).await.map_err(io_error)?;
    w.flush().await.map_err(io_error)
}

pub(crate) async fn recv_info<R>(r: &mut R) -> Result<BranchIdentity>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; INFO_HEADER_LEN];
    r.read_exact(&mut header).await.map_err(io_error)?;
    let header = wire::decode_info_header(&header)?;
    let mut body = vec![0u8; header.body_len];
    r.read_exact(&mut body).await.map_err(io_error)?;
    wire::decode_info_body(&header, &body)
}

/// Both sides confirm that they accepted the other's info message.
pub(crate) async fn exchange_acks<S>(s: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_message(s, &Message::InfoAck).await?;
    match read_message(s).await? {
        Message::InfoAck => Ok(()),
        other => Err(unexpected(&other, "info ack")),
    }
}

/// Challenge/response in both directions. `PasswordMismatch` if either side
/// rejects the other's answer.
pub(crate) async fn authenticate<S>(s: &mut S, password: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let auth = Authenticator::new(password);
    write_message(s, &Message::Challenge(auth.challenge())).await?;
    let peer_challenge = match read_message(s).await? {
        Message::Challenge(c) => c,
        other => return Err(unexpected(&other, "challenge")),
    };
    write_message(s, &Message::Solution(auth.answer(&peer_challenge))).await?;
    let peer_solution = match read_message(s).await? {
        Message::Solution(sol) => sol,
        other => return Err(unexpected(&other, "solution")),
    };
    let accepted = auth.verify(&peer_solution);
    write_message(s, &Message::AuthVerdict { accepted }).await?;
    let peer_accepted = match read_message(s).await? {
        Message::AuthVerdict { accepted } => accepted,
        other => return Err(unexpected(&other, "auth verdict")),
    };
    if accepted && peer_accepted {
        Ok(())
    } else {
        Err(ErrorCode::PasswordMismatch.into())
    }
}

/// Tell the peer whether we accept it and learn whether it accepts us. Our
/// own rejection takes precedence over the peer's.
pub(crate) async fn exchange_verdicts<S>(s: &mut S, local: Result<()>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let code = match &local {
        Ok(()) => 0,
        Err(e) => e.code().value(),
    };
    write_message(s, &Message::Verdict { code }).await?;
    let peer_code = match read_message(s).await? {
        Message::Verdict { code } => code,
        other => return Err(unexpected(&other, "verdict")),
    };
    local?;
    if peer_code == 0 {
        return Ok(());
    }
    Err(match ErrorCode::from_value(peer_code) {
        Some(code) => Error::with_details(code, "rejected by remote branch"),
        None => Error::with_details(
            ErrorCode::DeserializeMsgFailed,
            format!("unknown verdict {}", peer_code),
        ),
    })
}

/// Read frames until the connection breaks or stays silent for longer than
/// `timeout`. `on_frame` runs for every frame received.
pub(crate) async fn receive_loop<R>(reader: &mut R, timeout: Duration, mut on_frame: impl FnMut()) -> Error
where
    R: AsyncRead + Unpin,
{
    loop {
        match with_timeout(timeout, read_message(reader)).await {
            Ok(Message::Heartbeat) => on_frame(),
            Ok(other) => {
                tracing::trace!("ignoring {:?} on established connection", other);
                on_frame();
            }
            Err(e) => return e,
        }
    }
}

/// Send a heartbeat every `period`, at least every millisecond, until
/// writing fails. Never returns for an infinite period.
pub(crate) async fn heartbeat_loop<W>(writer: &mut W, period: Duration) -> Error
where
    W: AsyncWrite + Unpin,
{
    let Some(period) = period.as_std() else {
        return std::future::pending().await;
    };
    let mut ticker = tokio::time::interval(period.max(Duration::MIN_PERIOD));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = write_message(writer, &Message::Heartbeat).await {
            return e;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use uuid::Uuid;
    use yogi_core::Timestamp;

    fn identity(name: &str) -> BranchIdentity {
        BranchIdentity {
            uuid: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            network_name: "net".into(),
            path: format!("/{}", name),
            hostname: "host".into(),
            pid: 1,
            advertising_interval: Duration::from_secs(1),
            tcp_server_address: "0.0.0.0".into(),
            tcp_server_port: 4000,
            start_time: Timestamp::now(),
            timeout: Duration::from_secs(3),
            ghost_mode: false,
        }
    }

    #[tokio::test]
    async fn info_exchange() {
        let (mut a, mut b) = duplex(64 * 1024);
        let ia = identity("a");
        let ib = identity("b");
        let (ra, rb) = tokio::join!(
            async {
                send_info(&mut a, &ia).await?;
                let remote = recv_info(&mut a).await?;
                exchange_acks(&mut a).await?;
                Ok::<_, Error>(remote)
            },
            async {
                send_info(&mut b, &ib).await?;
                let remote = recv_info(&mut b).await?;
                exchange_acks(&mut b).await?;
                Ok::<_, Error>(remote)
            }
        );
        assert_eq!(ra.unwrap().uuid, ib.uuid);
        assert_eq!(rb.unwrap().name, "a");
    }

    #[tokio::test]
    async fn bad_magic_prefix() {
        let (mut a, mut b) = duplex(1024);
        let mut junk = vec![b'X'; INFO_HEADER_LEN];
        junk[5] = 0;
        a.write_all(&junk).await.unwrap();
        let err = recv_info(&mut b).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMagicPrefix);
    }

    #[tokio::test]
    async fn matching_passwords_authenticate() {
        let (mut a, mut b) = duplex(1024);
        let (ra, rb) = tokio::join!(authenticate(&mut a, "pw"), authenticate(&mut b, "pw"));
        assert!(ra.is_ok());
        assert!(rb.is_ok());
    }

    #[tokio::test]
    async fn password_mismatch_on_both_sides() {
        let (mut a, mut b) = duplex(1024);
        let (ra, rb) = tokio::join!(authenticate(&mut a, "pw"), authenticate(&mut b, "other"));
        assert_eq!(ra.unwrap_err().code(), ErrorCode::PasswordMismatch);
        assert_eq!(rb.unwrap_err().code(), ErrorCode::PasswordMismatch);
    }

    #[tokio::test]
    async fn verdicts_propagate_rejection() {
        let (mut a, mut b) = duplex(1024);
        let (ra, rb) = tokio::join!(
            exchange_verdicts(&mut a, Ok(())),
            exchange_verdicts(&mut b, Err(ErrorCode::DuplicateBranchPath.into()))
        );
        assert_eq!(ra.unwrap_err().code(), ErrorCode::DuplicateBranchPath);
        assert_eq!(rb.unwrap_err().code(), ErrorCode::DuplicateBranchPath);
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let (_a, mut b) = duplex(1024);
        let err = receive_loop(&mut b, Duration::from_millis(20), || {}).await;
        assert_eq!(err.code(), ErrorCode::Timeout);
    }

    #[tokio::test]
    async fn heartbeats_keep_connection_alive() {
        let (mut a, mut b) = duplex(1024);
        let mut frames = 0;
        let result = tokio::time::timeout(std::time::Duration::from_millis(200), async {
            tokio::select! {
                e = heartbeat_loop(&mut a, Duration::from_millis(10)) => e,
                e = receive_loop(&mut b, Duration::from_millis(100), || frames += 1) => e,
            }
        })
        .await;
        assert!(result.is_err(), "connection ended early");
        assert!(frames >= 3);
    }

    #[tokio::test]
    async fn zero_heartbeat_period_is_clamped() {
        let (mut a, mut b) = duplex(64 * 1024);
        let mut frames = 0;
        let result = tokio::time::timeout(std::time::Duration::from_millis(50), async {
            tokio::select! {
                e = heartbeat_loop(&mut a, Duration::from_nanos(1).unwrap().halved()) => e,
                e = receive_loop(&mut b, Duration::from_millis(100), || frames += 1) => e,
            }
        })
        .await;
        assert!(result.is_err(), "connection ended early");
        assert!(frames >= 1);
    }

    #[tokio::test]
    async fn closed_peer_is_socket_error() {
        let (a, mut b) = duplex(1024);
        drop(a);
        let err = receive_loop(&mut b, Duration::INFINITE, || {}).await;
        assert_eq!(err.code(), ErrorCode::RwSocketFailed);
    }
}
