//! Length-prefixed framing and the shared-secret challenge used by the
//! managed binding.
//!
//! A frame is a 4-byte big-endian length followed by that many bytes.
//! Authentication is a challenge/response over frames: the challenger sends
//! `#CHALLENGE#` followed by a random nonce, the other side answers with
//! `HMAC-SHA256(secret, nonce)`, and the challenger replies `#WELCOME#` or
//! `#FAILURE#`. Both directions are run, so each side proves it holds the
//! secret. The secret itself never crosses the wire.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, RpcError};
use crate::secret::AuthSecret;

type HmacSha256 = Hmac<Sha256>;

pub const CHALLENGE: &[u8] = b"#CHALLENGE#";
pub const WELCOME: &[u8] = b"#WELCOME#";
pub const FAILURE: &[u8] = b"#FAILURE#";

pub const NONCE_LEN: usize = 32;
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> std::io::Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds limit", payload.len()),
        ));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }
    let mut buf = vec![0; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

fn mac_for(secret: &AuthSecret, nonce: &[u8]) -> std::io::Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.expose())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
    mac.update(nonce);
    Ok(mac)
}

/// The answer to a challenge `nonce` under `secret`.
pub fn digest(secret: &AuthSecret, nonce: &[u8]) -> std::io::Result<Vec<u8>> {
    Ok(mac_for(secret, nonce)?.finalize().into_bytes().to_vec())
}

fn verify(secret: &AuthSecret, nonce: &[u8], answer: &[u8]) -> std::io::Result<bool> {
    Ok(mac_for(secret, nonce)?.verify_slice(answer).is_ok())
}

/// Proves to the peer that we hold `secret`.
///
/// Returns `Ok(false)` if the peer rejected our answer.
pub async fn answer_challenge<S>(stream: &mut S, secret: &AuthSecret) -> std::io::Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let message = read_frame(stream).await?;
    let nonce = message.strip_prefix(CHALLENGE).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "expected a challenge frame")
    })?;
    write_frame(stream, &digest(secret, nonce)?).await?;
    let verdict = read_frame(stream).await?;
    Ok(verdict == WELCOME)
}

/// Makes the peer prove it holds `secret`.
///
/// Returns `Ok(false)` if the peer's answer was wrong. The peer is told
/// either way.
pub async fn deliver_challenge<S>(stream: &mut S, secret: &AuthSecret) -> std::io::Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    write_frame(stream, &[CHALLENGE, &nonce[..]].concat()).await?;
    let answer = read_frame(stream).await?;
    if verify(secret, &nonce, &answer)? {
        write_frame(stream, WELCOME).await?;
        Ok(true)
    } else {
        write_frame(stream, FAILURE).await?;
        Ok(false)
    }
}

/// Runs both directions of the challenge from the connecting side.
///
/// A peer that hangs up or resets mid-handshake is a connection failure.
/// Only malformed handshake frames are reported as protocol errors.
pub async fn authenticate<S>(stream: &mut S, addr: &str, secret: &AuthSecret, secret_env: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let io_err = |e: std::io::Error| match e.kind() {
        std::io::ErrorKind::InvalidData => RpcError::Protocol(format!("authentication handshake: {}", e)),
        _ => RpcError::connection(addr, e),
    };
    if !answer_challenge(stream, secret).await.map_err(io_err)? {
        return Err(RpcError::Authentication {
            hint: rejection_hint(secret, secret_env),
        });
    }
    if !deliver_challenge(stream, secret).await.map_err(io_err)? {
        return Err(RpcError::Authentication {
            hint: "the scheduler could not prove it holds the same shared secret".to_string(),
        });
    }
    Ok(())
}

/// Tells the operator where the secret came from and whether it was set.
/// Never includes the secret itself.
pub fn rejection_hint(secret: &AuthSecret, secret_env: &str) -> String {
    if secret.is_empty() {
        format!(
            "the scheduler rejected the empty shared secret; is the {} environment variable set?",
            secret_env
        )
    } else {
        format!(
            "the scheduler rejected the shared secret from {}; are you using the correct one?",
            secret_env
        )
    }
}
