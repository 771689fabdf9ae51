//! Frame codec shared by coordinator and worker
//!
//! A frame is a 4-byte big-endian length followed by that many bytes of
//! zlib-compressed protobuf [`Envelope`]. One request and one response are
//! outstanding at most per connection, so no buffering beyond a frame is needed.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::mapreduce::error::{CodecError, CodecResult};
use crate::mapreduce::protocol::Envelope;

/// Upper bound on a frame, both on the wire and once decompressed
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Serialize and compress an envelope into a frame body
pub fn encode(envelope: &Envelope) -> CodecResult<Vec<u8>> {
    let raw = envelope.encode_to_vec();
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2 + 16), Compression::fast());
    encoder.write_all(&raw)?;
    let body = encoder.finish()?;
    if body.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge {
            size: body.len(),
            max: MAX_FRAME_LEN,
        });
    }
    Ok(body)
}

/// Decompress and decode a frame body
pub fn decode(body: &[u8]) -> CodecResult<Envelope> {
    let mut raw = Vec::new();
    // Read one byte past the limit so an oversized body is detectable
    ZlibDecoder::new(body)
        .take(MAX_FRAME_LEN as u64 + 1)
        .read_to_end(&mut raw)
        .map_err(CodecError::Decompress)?;
    if raw.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge {
            size: raw.len(),
            max: MAX_FRAME_LEN,
        });
    }
    Ok(Envelope::decode(raw.as_slice())?)
}

pub async fn write_frame<W>(writer: &mut W, envelope: &Envelope) -> CodecResult<()>
where
    W: AsyncWrite + Unpin,
{
    let body = encode(envelope)?;
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R>(reader: &mut R) -> CodecResult<Envelope>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    let read = read_full(reader, &mut prefix).await?;
    if read == 0 {
        return Err(CodecError::Closed);
    }
    if read < prefix.len() {
        return Err(CodecError::Truncated {
            read,
            expected: prefix.len(),
        });
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut body = vec![0u8; len];
    let read = read_full(reader, &mut body).await?;
    if read < len {
        return Err(CodecError::Truncated {
            read,
            expected: len,
        });
    }
    decode(&body)
}

/// Fill `buf` unless EOF comes first; returns the number of bytes read
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> CodecResult<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// A framed, strictly alternating message stream
pub struct Connection<S = TcpStream> {
    stream: S,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub async fn send<M>(&mut self, message: M) -> CodecResult<()>
    where
        M: Into<Envelope>,
    {
        write_frame(&mut self.stream, &message.into()).await
    }

    pub async fn recv<M>(&mut self) -> CodecResult<M>
    where
        M: TryFrom<Envelope, Error = CodecError>,
    {
        let envelope = read_frame(&mut self.stream).await?;
        M::try_from(envelope)
    }

    /// Send one message and wait for the reply
    pub async fn exchange<Req, Resp>(&mut self, message: Req) -> CodecResult<Resp>
    where
        Req: Into<Envelope>,
        Resp: TryFrom<Envelope, Error = CodecError>,
    {
        self.send(message).await?;
        self.recv().await
    }

    pub async fn shutdown(&mut self) -> CodecResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
