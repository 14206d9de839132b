//! Wire protocol codec for length-prefixed messages.
//!
//! Every message is a little-endian `u64` length followed by that many
//! payload bytes:
//!
//! ```text
//! [u64 LE length] [payload: length bytes]
//! ```
//!
//! There is no type byte and no reserved length. A zero length is both an
//! empty message and the keep-alive signal; readers cannot tell them apart.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, SocketError};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 8;

/// Encode a payload length as the wire prefix.
pub fn encode_length(len: u64) -> [u8; LENGTH_PREFIX_SIZE] {
    len.to_le_bytes()
}

/// Decode a wire prefix into a payload length.
pub fn decode_length(prefix: [u8; LENGTH_PREFIX_SIZE]) -> u64 {
    u64::from_le_bytes(prefix)
}

/// Read one complete frame and return its payload.
///
/// Reads exactly [`LENGTH_PREFIX_SIZE`] bytes, then exactly the announced
/// number of payload bytes. Short reads are retried; EOF or any transport
/// error in the middle of a frame fails the whole call, so a truncated
/// payload is never returned.
///
/// Without `max_message_size` the announced length is trusted and a buffer
/// of that size is allocated up front. A hostile peer can therefore request
/// arbitrarily large allocations.
///
/// # Errors
///
/// [`SocketError::Read`] on transport failure, [`SocketError::MessageTooLarge`]
/// when the length exceeds the limit, [`SocketError::Allocation`] when the
/// receive buffer cannot be reserved. After the latter two the stream sits in
/// the middle of a frame and must not be read again.
pub async fn read_frame<R>(reader: &mut R, max_message_size: Option<u64>) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut prefix).await.map_err(SocketError::Read)?;
    let len = decode_length(prefix);

    if let Some(limit) = max_message_size {
        if len > limit {
            return Err(SocketError::MessageTooLarge { len, limit });
        }
    }

    let size = usize::try_from(len).map_err(|_overflow| SocketError::Allocation { len })?;
    let mut payload = Vec::new();
    payload
        .try_reserve_exact(size)
        .map_err(|_reserve| SocketError::Allocation { len })?;
    payload.resize(size, 0);

    reader.read_exact(&mut payload).await.map_err(SocketError::Read)?;
    Ok(payload)
}

/// Write one frame: the length prefix, then the payload.
///
/// The prefix and payload are two separate write phases, each retried until
/// the transport has accepted every byte. `written` is incremented as bytes
/// are accepted, so on error it holds the partial count already handed to the
/// transport. An empty payload only issues the prefix phase.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], written: &mut usize) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let prefix = encode_length(payload.len() as u64);
    write_counted(writer, &prefix, written).await?;
    if !payload.is_empty() {
        write_counted(writer, payload, written).await?;
    }
    writer.flush().await
}

/// `write_all` that keeps a running count of accepted bytes.
async fn write_counted<W>(writer: &mut W, buf: &[u8], written: &mut usize) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut offset = 0;
    while offset < buf.len() {
        let n = writer.write(&buf[offset..]).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "transport accepted zero bytes",
            ));
        }
        offset += n;
        *written += n;
    }
    Ok(())
}
