//! Multi-packet messages.
//!
//! A message longer than the chunk size travels as consecutive packets, each
//! stamped with `SEQUENCE_NUM`, `TOTAL_PACKETS` and `COMPLETED=F`. The
//! sender flips `COMPLETED` on the packet it actually sends last; nothing on
//! the receiving side infers "last" from sequence numbers alone.

use std::collections::BTreeSet;

use bytes::{BufMut, Bytes, BytesMut};

use crate::packet::{ArgKey, Packet, PacketError};

/// Message bytes carried per packet unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Refuse to allocate reassembly slots beyond this.
pub const MAX_MESSAGE_PACKETS: u64 = 1 << 16;

// ── Splitting ─────────────────────────────────────────────────────────────────

/// Split `message` into packets carrying the arguments of `template`.
///
/// An empty message yields a single unsequenced packet with the template
/// arguments only.
pub fn split_message(template: &Packet, message: &[u8], chunk_size: usize) -> Vec<Packet> {
    if message.is_empty() {
        let mut only = template.clone();
        only.set_message(Bytes::new());
        return vec![only];
    }

    let chunk_size = chunk_size.max(1);
    let total = message.len().div_ceil(chunk_size);
    message
        .chunks(chunk_size)
        .enumerate()
        .map(|(seq, chunk)| {
            let mut packet = template.clone();
            packet.set_completed(false);
            packet.set(ArgKey::TotalPackets, total);
            packet.set(ArgKey::SequenceNum, seq);
            packet.set_message(Bytes::copy_from_slice(chunk));
            packet
        })
        .collect()
}

/// Mark the final packet of an outgoing batch as `COMPLETED=T`.
pub fn mark_last_completed(packets: &mut [Packet]) {
    if let Some(last) = packets.last_mut() {
        last.set_completed(true);
    }
}

// ── Reassembly ────────────────────────────────────────────────────────────────

/// Rebuilds one logical message from its packets, in any order.
///
/// Slots are sized by the first `TOTAL_PACKETS` seen. Duplicate and
/// out-of-range sequence numbers are ignored, but `COMPLETED` is always
/// taken from the latest packet.
#[derive(Debug, Default)]
pub struct MessageReassembler {
    args: Packet,
    slots: Vec<Option<Bytes>>,
    missing: BTreeSet<usize>,
    sequenced: bool,
    unsequenced: Bytes,
}

impl MessageReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, packet: &Packet) -> Result<(), PacketError> {
        if let Some(flag) = packet.scalar(ArgKey::Completed) {
            self.args.set(ArgKey::Completed, flag);
        }

        let seq = match packet.number(ArgKey::SequenceNum)? {
            Some(seq) => seq,
            None => {
                self.merge(packet);
                if packet.has_message() {
                    self.unsequenced = packet.message().clone();
                }
                return Ok(());
            }
        };

        if !self.sequenced {
            let total = packet.number(ArgKey::TotalPackets)?.unwrap_or(0);
            if total == 0 || total > MAX_MESSAGE_PACKETS {
                return Err(PacketError::InvalidValue {
                    key: ArgKey::TotalPackets,
                    value: packet.scalar(ArgKey::TotalPackets).unwrap_or("").to_string(),
                });
            }
            let total = total as usize;
            self.slots = vec![None; total];
            self.missing = (0..total).collect();
            self.sequenced = true;
        }

        let seq = match usize::try_from(seq) {
            Ok(seq) if seq < self.slots.len() => seq,
            _ => return Ok(()),
        };
        if self.slots[seq].is_some() {
            return Ok(());
        }
        self.slots[seq] = Some(packet.message().clone());
        self.missing.remove(&seq);
        self.merge(packet);
        Ok(())
    }

    pub fn add_all<'a>(
        &mut self,
        packets: impl IntoIterator<Item = &'a Packet>,
    ) -> Result<(), PacketError> {
        for packet in packets {
            self.add(packet)?;
        }
        Ok(())
    }

    /// False when `packet` is sequenced for a different message: another
    /// `JOB_ID` or another `TOTAL_PACKETS`.
    pub fn belongs(&self, packet: &Packet) -> bool {
        if !self.sequenced {
            return true;
        }
        if let Ok(Some(total)) = packet.number(ArgKey::TotalPackets) {
            if total != self.slots.len() as u64 {
                return false;
            }
        }
        match (self.args.scalar(ArgKey::JobId), packet.scalar(ArgKey::JobId)) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => true,
        }
    }

    fn abandoned(&self) -> PacketError {
        PacketError::IncompleteMessage {
            missing: self.missing.len(),
            total: self.total_count(),
        }
    }

    fn merge(&mut self, packet: &Packet) {
        for (key, value) in packet.args() {
            if !matches!(key, ArgKey::SequenceNum | ArgKey::TotalPackets) {
                self.args.set(key, value.clone());
            }
        }
    }

    pub fn received_all_packets(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn received_count(&self) -> usize {
        self.slots.len() - self.missing.len()
    }

    pub fn total_count(&self) -> usize {
        self.slots.len()
    }

    pub fn missing_sequence_numbers(&self) -> Vec<usize> {
        self.missing.iter().copied().collect()
    }

    /// `100 * received / total`; a message without sequencing is complete.
    pub fn percent_complete(&self) -> f64 {
        if self.slots.is_empty() {
            return 100.0;
        }
        100.0 * self.received_count() as f64 / self.total_count() as f64
    }

    /// Whether the sender has flagged its last packet.
    pub fn sender_completed(&self) -> bool {
        self.args.completed() == Some(true)
    }

    /// Merged arguments of every accepted packet.
    pub fn args(&self) -> &Packet {
        &self.args
    }

    /// Concatenated message. Gaps are left out. With `only_if_complete`,
    /// returns `None` until every slot is filled.
    pub fn full_message(&self, only_if_complete: bool) -> Option<Bytes> {
        if only_if_complete && !self.received_all_packets() {
            return None;
        }
        if !self.sequenced {
            return Some(self.unsequenced.clone());
        }
        let len = self.slots.iter().flatten().map(Bytes::len).sum();
        let mut out = BytesMut::with_capacity(len);
        for chunk in self.slots.iter().flatten() {
            out.put_slice(chunk);
        }
        Some(out.freeze())
    }

    /// A packet listing the sequence numbers still outstanding.
    pub fn missing_report(&self) -> Packet {
        let missing = self.missing_sequence_numbers();
        Packet::new()
            .arg(ArgKey::TotalPacketsMissing, missing.len())
            .arg(ArgKey::MissingPacketNums, missing)
    }

    /// Merged arguments plus whatever message has arrived.
    pub fn into_packet(self) -> Packet {
        let message = self.full_message(false).unwrap_or_default();
        self.args.with_message(message)
    }
}

// ── Per-connection stream ─────────────────────────────────────────────────────

/// Turns the packet stream of one connection into logical messages.
///
/// Unsequenced packets are whole messages. Sequenced packets accumulate
/// until every slot is filled.
#[derive(Debug, Default)]
pub struct InboundAssembler {
    pending: Option<MessageReassembler>,
    deferred: Option<Result<Packet, PacketError>>,
}

impl InboundAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_progress(&self) -> bool {
        self.pending.is_some()
    }

    /// Accept one packet. Returns a message once one is complete.
    ///
    /// A `COMPLETED=T` packet that leaves slots empty abandons the message
    /// with [`PacketError::IncompleteMessage`]. So does a packet of another
    /// message arriving first; that packet then starts the next message,
    /// and anything it finishes waits in [`take_deferred`](Self::take_deferred).
    pub fn accept(&mut self, packet: Packet) -> Result<Option<Packet>, PacketError> {
        if !packet.contains(ArgKey::SequenceNum) {
            return Ok(Some(packet));
        }

        if let Some(stale) = self.pending.take_if(|p| !p.belongs(&packet)) {
            self.deferred = self.add_sequenced(packet).transpose();
            return Err(stale.abandoned());
        }
        self.add_sequenced(packet)
    }

    /// An outcome held back while an abandoned message was reported.
    pub fn take_deferred(&mut self) -> Option<Result<Packet, PacketError>> {
        self.deferred.take()
    }

    fn add_sequenced(&mut self, packet: Packet) -> Result<Option<Packet>, PacketError> {
        let pending = self.pending.get_or_insert_with(MessageReassembler::new);
        if let Err(e) = pending.add(&packet) {
            self.pending = None;
            return Err(e);
        }

        if pending.received_all_packets() {
            return Ok(self.pending.take().map(MessageReassembler::into_packet));
        }
        if pending.sender_completed() {
            let err = pending.abandoned();
            self.pending = None;
            return Err(err);
        }
        Ok(None)
    }
}
