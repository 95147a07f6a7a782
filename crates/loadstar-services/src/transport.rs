//! Packet transport over an async byte stream.
//!
//! [`PacketReader`] turns bytes into logical messages: packets are decoded
//! incrementally and chunked messages are reassembled before they are
//! handed out. [`PacketWriter`] does the reverse.

use std::collections::VecDeque;
use std::io;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use loadstar_core::assembler::{mark_last_completed, split_message};
use loadstar_core::{InboundAssembler, Packet, PacketDecoder, PacketError};

const READ_BUF: usize = 4096;

/// What the reader produced.
#[derive(Debug)]
pub enum Inbound {
    /// A whole logical message.
    Message(Packet),
    /// Bytes or packets that were discarded. The stream continues unless
    /// the error is fatal.
    Malformed(PacketError),
    /// Peer closed the stream.
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("packet encoding failed: {0}")]
    Packet(#[from] PacketError),
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}

// ── Reader ────────────────────────────────────────────────────────────────────

pub struct PacketReader<R> {
    reader: R,
    decoder: PacketDecoder,
    assembler: InboundAssembler,
    pending: VecDeque<Result<Packet, PacketError>>,
    buf: Box<[u8; READ_BUF]>,
    closed: bool,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: PacketDecoder::new(),
            assembler: InboundAssembler::new(),
            pending: VecDeque::new(),
            buf: Box::new([0u8; READ_BUF]),
            closed: false,
        }
    }

    /// Next logical message. Cancel safe: decoded packets are buffered
    /// before anything is awaited.
    pub async fn next(&mut self) -> io::Result<Inbound> {
        loop {
            if let Some(item) = self.assembler.take_deferred() {
                return Ok(match item {
                    Ok(message) => Inbound::Message(message),
                    Err(e) => Inbound::Malformed(e),
                });
            }
            while let Some(item) = self.pending.pop_front() {
                match item {
                    Ok(packet) => match self.assembler.accept(packet) {
                        Ok(Some(message)) => return Ok(Inbound::Message(message)),
                        Ok(None) => {}
                        Err(e) => return Ok(Inbound::Malformed(e)),
                    },
                    Err(e) => return Ok(Inbound::Malformed(e)),
                }
            }
            if self.closed {
                return Ok(Inbound::Closed);
            }

            let n = self.reader.read(&mut self.buf[..]).await?;
            if n == 0 {
                self.closed = true;
                if self.decoder.in_packet() || self.assembler.in_progress() {
                    return Ok(Inbound::Malformed(PacketError::Truncated));
                }
                return Ok(Inbound::Closed);
            }
            self.pending.extend(self.decoder.feed(&self.buf[..n]));
        }
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

pub struct PacketWriter<W> {
    writer: W,
    chunk_size: usize,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new(writer: W, chunk_size: usize) -> Self {
        Self { writer, chunk_size }
    }

    /// Write one packet as it is.
    pub async fn send_packet(&mut self, packet: &Packet) -> Result<(), TransportError> {
        let bytes = packet.encode()?;
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Write `body` under the arguments of `template`, split into as many
    /// packets as the chunk size needs. Nothing is written if any packet
    /// fails to encode. Returns the packet count.
    pub async fn send_message(
        &mut self,
        template: &Packet,
        body: &[u8],
    ) -> Result<usize, TransportError> {
        let mut packets = split_message(template, body, self.chunk_size);
        if !body.is_empty() {
            mark_last_completed(&mut packets);
        }
        let encoded = packets
            .iter()
            .map(Packet::encode)
            .collect::<Result<Vec<Bytes>, _>>()?;
        for bytes in &encoded {
            self.writer.write_all(bytes).await?;
        }
        self.writer.flush().await?;
        Ok(encoded.len())
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }

    /// The underlying stream, for writing bytes outside the packet format.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }
}
