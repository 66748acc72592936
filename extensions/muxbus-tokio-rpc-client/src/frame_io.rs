use muxbus::{
    constants::FRAME_HEADER_SIZE,
    frame::{FrameDecodeError, FrameHeader, Message},
    pool::{BufferPool, SharedBufferPool},
};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

fn invalid_data(err: FrameDecodeError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// Reads exactly one frame.
///
/// Malformed and oversized frames come back as `InvalidData` so the caller
/// treats them like any other broken connection.
pub(crate) async fn read_message<R>(
    reader: &mut R,
    pool: &SharedBufferPool,
    max_body_len: usize,
) -> io::Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut header_bytes = [0u8; FRAME_HEADER_SIZE];
    reader.read_exact(&mut header_bytes).await?;

    let header = FrameHeader::decode(&header_bytes).map_err(invalid_data)?;
    let body_len = header.body_len as usize;
    if body_len > max_body_len {
        return Err(invalid_data(FrameDecodeError::BodyTooLarge {
            len: body_len,
            max: max_body_len,
        }));
    }

    let mut bytes = pool.acquire(header.frame_len());
    bytes.extend_from_slice(&header_bytes);
    bytes.resize(header.frame_len(), 0);

    if let Err(err) = reader.read_exact(&mut bytes[FRAME_HEADER_SIZE..]).await {
        pool.release(bytes);
        return Err(err);
    }

    Message::decode(pool, bytes).map_err(invalid_data)
}

pub(crate) async fn write_message<W>(writer: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(message.as_bytes()).await?;
    writer.flush().await
}
