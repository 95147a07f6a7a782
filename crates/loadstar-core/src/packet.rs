//! Packet codec: the length-framed text format every loadstar peer speaks.
//!
//! ```text
//! (<N>)<k1>:<v1>,<k2>:<v2>,...,<kn>:<vn>\n<message>
//! ```
//!
//! `N` is the decimal byte count of everything after `)`: the header, the
//! newline that terminates it, and the message. Array values are written
//! `[e1,e2,...]`; commas inside brackets separate elements, not arguments.
//!
//! Decoding is incremental. The decoder is fed one byte at a time and
//! rejects input as soon as it can no longer be the prefix of a well-formed
//! packet. Header tokens are uppercased on decode; message bytes are copied
//! verbatim.

use std::collections::BTreeMap;
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// Largest body a peer may declare. Anything above is a fatal framing error.
pub const MAX_PACKET_LEN: usize = 1 << 20;

/// Digits needed to spell `MAX_PACKET_LEN`.
const MAX_LENGTH_DIGITS: usize = 7;

// ── Keys ──────────────────────────────────────────────────────────────────────

/// The fixed argument vocabulary. Declaration order is encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArgKey {
    RequestType,
    Completed,
    TotalPackets,
    SequenceNum,
    TotalPacketsMissing,
    MissingPacketNums,
    OptimizedForJobType,
    JobType,
    JobId,
    JobSucceeded,
}

impl ArgKey {
    pub const ALL: [ArgKey; 10] = [
        ArgKey::RequestType,
        ArgKey::Completed,
        ArgKey::TotalPackets,
        ArgKey::SequenceNum,
        ArgKey::TotalPacketsMissing,
        ArgKey::MissingPacketNums,
        ArgKey::OptimizedForJobType,
        ArgKey::JobType,
        ArgKey::JobId,
        ArgKey::JobSucceeded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ArgKey::RequestType => "REQUEST_TYPE",
            ArgKey::Completed => "COMPLETED",
            ArgKey::TotalPackets => "TOTAL_PACKETS",
            ArgKey::SequenceNum => "SEQUENCE_NUM",
            ArgKey::TotalPacketsMissing => "TOTAL_PACKETS_MISSING",
            ArgKey::MissingPacketNums => "MISSING_PACKET_NUMS",
            ArgKey::OptimizedForJobType => "OPTIMIZED_FOR_JOB_TYPE",
            ArgKey::JobType => "JOB_TYPE",
            ArgKey::JobId => "JOB_ID",
            ArgKey::JobSucceeded => "JOB_SUCCEEDED",
        }
    }

    /// Case-insensitive lookup of a header token.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(token))
    }
}

impl fmt::Display for ArgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Values ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Scalar(String),
    Array(Vec<String>),
}

impl ArgValue {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            ArgValue::Scalar(s) => Some(s),
            ArgValue::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&[String]> {
        match self {
            ArgValue::Array(items) => Some(items),
            ArgValue::Scalar(_) => None,
        }
    }

    fn validate(&self, key: ArgKey) -> Result<(), PacketError> {
        let clean = |s: &str| s.bytes().all(is_token_byte);
        let ok = match self {
            ArgValue::Scalar(s) => clean(s),
            ArgValue::Array(items) => items.iter().all(|e| !e.is_empty() && clean(e)),
        };
        if ok {
            Ok(())
        } else {
            Err(PacketError::ReservedCharacter { key })
        }
    }

    fn write_to(&self, buf: &mut BytesMut) {
        match self {
            ArgValue::Scalar(s) => buf.put_slice(s.as_bytes()),
            ArgValue::Array(items) => {
                buf.put_u8(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        buf.put_u8(b',');
                    }
                    buf.put_slice(item.as_bytes());
                }
                buf.put_u8(b']');
            }
        }
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        ArgValue::Scalar(s.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(s: String) -> Self {
        ArgValue::Scalar(s)
    }
}

impl From<u64> for ArgValue {
    fn from(n: u64) -> Self {
        ArgValue::Scalar(n.to_string())
    }
}

impl From<usize> for ArgValue {
    fn from(n: usize) -> Self {
        ArgValue::Scalar(n.to_string())
    }
}

impl From<bool> for ArgValue {
    fn from(b: bool) -> Self {
        ArgValue::Scalar(if b { "TRUE" } else { "FALSE" }.to_string())
    }
}

impl<T: ToString> From<Vec<T>> for ArgValue {
    fn from(items: Vec<T>) -> Self {
        ArgValue::Array(items.iter().map(ToString::to_string).collect())
    }
}

/// Parse a wire boolean. Accepts `T`, `TRUE`, `F`, `FALSE` in any case.
pub fn parse_flag(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("T") || s.eq_ignore_ascii_case("TRUE") {
        Some(true)
    } else if s.eq_ignore_ascii_case("F") || s.eq_ignore_ascii_case("FALSE") {
        Some(false)
    } else {
        None
    }
}

/// Bytes that may appear inside a key, scalar value or array element.
fn is_token_byte(b: u8) -> bool {
    !matches!(b, b',' | b':' | b'[' | b']' | b'(' | b')' | b'\n')
}

// ── Packet ────────────────────────────────────────────────────────────────────

/// One framed unit: ordered arguments plus an optional message.
///
/// An empty message and no message are the same thing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    args: BTreeMap<ArgKey, ArgValue>,
    message: Bytes,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, key: ArgKey, value: impl Into<ArgValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn with_message(mut self, message: impl Into<Bytes>) -> Self {
        self.message = message.into();
        self
    }

    pub fn set(&mut self, key: ArgKey, value: impl Into<ArgValue>) {
        self.args.insert(key, value.into());
    }

    pub fn set_message(&mut self, message: impl Into<Bytes>) {
        self.message = message.into();
    }

    pub fn get(&self, key: ArgKey) -> Option<&ArgValue> {
        self.args.get(&key)
    }

    pub fn scalar(&self, key: ArgKey) -> Option<&str> {
        self.get(key).and_then(ArgValue::as_scalar)
    }

    pub fn array(&self, key: ArgKey) -> Option<&[String]> {
        self.get(key).and_then(ArgValue::as_array)
    }

    pub fn contains(&self, key: ArgKey) -> bool {
        self.args.contains_key(&key)
    }

    pub fn remove(&mut self, key: ArgKey) -> Option<ArgValue> {
        self.args.remove(&key)
    }

    pub fn args(&self) -> impl Iterator<Item = (ArgKey, &ArgValue)> {
        self.args.iter().map(|(k, v)| (*k, v))
    }

    pub fn message(&self) -> &Bytes {
        &self.message
    }

    pub fn has_message(&self) -> bool {
        !self.message.is_empty()
    }

    /// Set the `COMPLETED` flag (`T`/`F` on the wire).
    pub fn set_completed(&mut self, completed: bool) {
        self.set(ArgKey::Completed, if completed { "T" } else { "F" });
    }

    /// The `COMPLETED` flag, if present and well-formed.
    pub fn completed(&self) -> Option<bool> {
        self.scalar(ArgKey::Completed).and_then(parse_flag)
    }

    /// Parse a numeric scalar argument.
    pub fn number(&self, key: ArgKey) -> Result<Option<u64>, PacketError> {
        match self.scalar(key) {
            None => Ok(None),
            Some(s) => s.parse().map(Some).map_err(|_| PacketError::InvalidValue {
                key,
                value: s.to_string(),
            }),
        }
    }

    /// Copy every argument of `other` into this packet, overwriting
    /// duplicates.
    pub fn merge_args(&mut self, other: &Packet) {
        for (k, v) in other.args() {
            self.args.insert(k, v.clone());
        }
    }

    /// Serialise to wire bytes.
    pub fn encode(&self) -> Result<Bytes, PacketError> {
        let mut body = BytesMut::with_capacity(64 + self.message.len());
        for (i, (key, value)) in self.args.iter().enumerate() {
            value.validate(*key)?;
            if i > 0 {
                body.put_u8(b',');
            }
            body.put_slice(key.as_str().as_bytes());
            body.put_u8(b':');
            value.write_to(&mut body);
        }
        body.put_u8(b'\n');
        body.put_slice(&self.message);

        if body.len() > MAX_PACKET_LEN {
            return Err(PacketError::TooLarge(body.len()));
        }

        let prefix = format!("({})", body.len());
        let mut out = BytesMut::with_capacity(prefix.len() + body.len());
        out.put_slice(prefix.as_bytes());
        out.put(body);
        Ok(out.freeze())
    }

    /// Decode exactly one packet from `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Packet, PacketError> {
        let mut decoder = PacketDecoder::new();
        for (i, &b) in bytes.iter().enumerate() {
            if let Some(packet) = decoder.push(b)? {
                let rest = bytes.len() - i - 1;
                if rest > 0 {
                    return Err(PacketError::TrailingBytes(rest));
                }
                return Ok(packet);
            }
        }
        Err(PacketError::Truncated)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("expected '(' to open a packet, found byte 0x{0:02x}")]
    BadPrefix(u8),
    #[error("invalid byte 0x{0:02x} in length prefix")]
    BadLength(u8),
    #[error("length prefix is empty")]
    EmptyLength,
    #[error("declared length {0} exceeds maximum of {max} bytes", max = MAX_PACKET_LEN)]
    TooLarge(usize),
    #[error("packet body is empty")]
    EmptyBody,
    #[error("header syntax error at byte 0x{0:02x}")]
    HeaderSyntax(u8),
    #[error("unknown header key {0:?}")]
    UnknownKey(String),
    #[error("header not terminated within declared length")]
    UnterminatedHeader,
    #[error("header is not valid UTF-8")]
    InvalidUtf8,
    #[error("packet truncated")]
    Truncated,
    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),
    #[error("value for {key} contains a reserved character")]
    ReservedCharacter { key: ArgKey },
    #[error("invalid {key} value {value:?}")]
    InvalidValue { key: ArgKey, value: String },
    #[error("incomplete message: {missing} of {total} packets missing")]
    IncompleteMessage { missing: usize, total: usize },
}

impl PacketError {
    /// Errors after which the byte stream cannot be trusted any more.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PacketError::TooLarge(_))
    }
}

// ── Decoder ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum State {
    /// Expecting `(`.
    Start,
    Length { value: usize, digits: usize },
    Header { remaining: usize, lex: Lex },
    Message { remaining: usize },
    /// Discarding the rest of a rejected body.
    Skip { remaining: usize },
    /// Discarding until the next `(`.
    Resync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lex {
    KeyStart,
    Key,
    Value { empty: bool },
    Array,
    ArrayEnd,
}

/// Incremental packet decoder.
///
/// Feed bytes with [`push`](Self::push). A packet is only parsed once all
/// declared bytes have arrived, but syntax errors are reported as soon as
/// they are visible. After an error the decoder resynchronises on its own:
/// inside a body it skips to the declared end, inside a prefix it skips to
/// the next `(`.
#[derive(Debug)]
pub struct PacketDecoder {
    state: State,
    header: Vec<u8>,
    key_start: usize,
    message: BytesMut,
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Start,
            header: Vec::new(),
            key_start: 0,
            message: BytesMut::new(),
        }
    }

    /// True while part of a packet has been consumed.
    pub fn in_packet(&self) -> bool {
        matches!(
            self.state,
            State::Length { .. } | State::Header { .. } | State::Message { .. }
        )
    }

    /// Feed a chunk of bytes, collecting every packet and error it yields.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Packet, PacketError>> {
        bytes.iter().filter_map(|&b| self.push(b).transpose()).collect()
    }

    /// Feed one byte. `Ok(None)` means more bytes are needed.
    pub fn push(&mut self, byte: u8) -> Result<Option<Packet>, PacketError> {
        match self.state {
            State::Start => {
                if byte == b'(' {
                    self.state = State::Length { value: 0, digits: 0 };
                    Ok(None)
                } else {
                    self.state = State::Resync;
                    Err(PacketError::BadPrefix(byte))
                }
            }
            State::Resync => {
                if byte == b'(' {
                    self.state = State::Length { value: 0, digits: 0 };
                }
                Ok(None)
            }
            State::Length { value, digits } => self.push_length(byte, value, digits),
            State::Header { remaining, lex } => self.push_header(byte, remaining - 1, lex),
            State::Message { remaining } => {
                self.message.put_u8(byte);
                if remaining == 1 {
                    self.finish().map(Some)
                } else {
                    self.state = State::Message {
                        remaining: remaining - 1,
                    };
                    Ok(None)
                }
            }
            State::Skip { remaining } => {
                self.state = if remaining == 1 {
                    State::Start
                } else {
                    State::Skip {
                        remaining: remaining - 1,
                    }
                };
                Ok(None)
            }
        }
    }

    fn push_length(
        &mut self,
        byte: u8,
        value: usize,
        digits: usize,
    ) -> Result<Option<Packet>, PacketError> {
        match byte {
            b'0'..=b'9' => {
                let value = value * 10 + usize::from(byte - b'0');
                if digits + 1 > MAX_LENGTH_DIGITS || value > MAX_PACKET_LEN {
                    self.state = State::Resync;
                    return Err(PacketError::TooLarge(value));
                }
                self.state = State::Length {
                    value,
                    digits: digits + 1,
                };
                Ok(None)
            }
            b')' if digits == 0 => {
                self.state = State::Start;
                Err(PacketError::EmptyLength)
            }
            b')' if value == 0 => {
                self.state = State::Start;
                Err(PacketError::EmptyBody)
            }
            b')' => {
                self.header.clear();
                self.message.clear();
                self.key_start = 0;
                self.state = State::Header {
                    remaining: value,
                    lex: Lex::KeyStart,
                };
                Ok(None)
            }
            other => {
                self.state = State::Resync;
                Err(PacketError::BadLength(other))
            }
        }
    }

    /// `remaining` already accounts for `byte`.
    fn push_header(
        &mut self,
        byte: u8,
        remaining: usize,
        lex: Lex,
    ) -> Result<Option<Packet>, PacketError> {
        if byte == b'\n' {
            let terminated = match lex {
                Lex::KeyStart => self.header.is_empty(),
                Lex::Value { .. } | Lex::ArrayEnd => true,
                Lex::Key | Lex::Array => false,
            };
            if !terminated {
                return Err(self.reject(remaining, PacketError::HeaderSyntax(byte)));
            }
            if remaining == 0 {
                return self.finish().map(Some);
            }
            self.state = State::Message { remaining };
            return Ok(None);
        }

        let next = match self.lex_step(byte, lex) {
            Ok(next) => next,
            Err(e) => return Err(self.reject(remaining, e)),
        };
        self.header.push(byte);
        if next == Lex::KeyStart {
            self.key_start = self.header.len();
        }

        if remaining == 0 {
            return Err(self.reject(0, PacketError::UnterminatedHeader));
        }
        self.state = State::Header {
            remaining,
            lex: next,
        };
        Ok(None)
    }

    fn lex_step(&self, byte: u8, lex: Lex) -> Result<Lex, PacketError> {
        match (lex, byte) {
            (Lex::Key, b':') => {
                let token = std::str::from_utf8(&self.header[self.key_start..]).unwrap_or("");
                match ArgKey::from_token(token) {
                    Some(_) => Ok(Lex::Value { empty: true }),
                    None => Err(PacketError::UnknownKey(
                        String::from_utf8_lossy(&self.header[self.key_start..]).to_uppercase(),
                    )),
                }
            }
            (Lex::KeyStart | Lex::Key, b) if is_token_byte(b) => Ok(Lex::Key),
            (Lex::Value { .. }, b',') => Ok(Lex::KeyStart),
            (Lex::Value { empty: true }, b'[') => Ok(Lex::Array),
            (Lex::Value { .. }, b) if is_token_byte(b) => Ok(Lex::Value { empty: false }),
            (Lex::Array, b']') => Ok(Lex::ArrayEnd),
            (Lex::Array, b) if b == b',' || is_token_byte(b) => Ok(Lex::Array),
            (Lex::ArrayEnd, b',') => Ok(Lex::KeyStart),
            (_, b) => Err(PacketError::HeaderSyntax(b)),
        }
    }

    fn reject(&mut self, remaining: usize, error: PacketError) -> PacketError {
        self.state = if remaining == 0 {
            State::Start
        } else {
            State::Skip { remaining }
        };
        error
    }

    fn finish(&mut self) -> Result<Packet, PacketError> {
        self.state = State::Start;
        let header = std::str::from_utf8(&self.header)
            .map_err(|_| PacketError::InvalidUtf8)?
            .to_ascii_uppercase();
        let args = parse_header(&header)?;
        let message = self.message.split().freeze();
        self.header.clear();
        Ok(Packet { args, message })
    }
}

/// Split a validated, uppercased header into arguments.
fn parse_header(header: &str) -> Result<BTreeMap<ArgKey, ArgValue>, PacketError> {
    let mut args = BTreeMap::new();
    if header.is_empty() {
        return Ok(args);
    }

    let mut depth = 0usize;
    let mut start = 0usize;
    let mut items = Vec::new();
    for (i, c) in header.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&header[start..]);

    for item in items {
        let (key, value) = item
            .split_once(':')
            .ok_or(PacketError::HeaderSyntax(b','))?;
        let key = ArgKey::from_token(key).ok_or_else(|| PacketError::UnknownKey(key.to_string()))?;
        let value = match value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
            Some("") => ArgValue::Array(Vec::new()),
            Some(inner) => {
                let items: Vec<String> = inner.split(',').map(str::to_string).collect();
                if items.iter().any(String::is_empty) {
                    return Err(PacketError::HeaderSyntax(b','));
                }
                ArgValue::Array(items)
            }
            None => ArgValue::Scalar(value.to_string()),
        };
        args.insert(key, value);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut out = format!("({})", body.len()).into_bytes();
        out.extend_from_slice(body);
        out
    }

    fn decode_all(bytes: &[u8]) -> Vec<Result<Packet, PacketError>> {
        PacketDecoder::new().feed(bytes)
    }

    #[test]
    fn encode_matches_wire_format() {
        let packet = Packet::new()
            .arg(ArgKey::JobId, 7u64)
            .arg(ArgKey::JobType, "A")
            .with_message("hi");
        let bytes = packet.encode().unwrap();
        assert_eq!(&bytes[..], b"(22)JOB_TYPE:A,JOB_ID:7\nhi");
    }

    #[test]
    fn round_trip_with_arrays_and_delimiters_in_message() {
        let packet = Packet::new()
            .arg(ArgKey::TotalPacketsMissing, 3usize)
            .arg(ArgKey::MissingPacketNums, vec![1, 4, 9])
            .arg(ArgKey::JobSucceeded, true)
            .with_message(&b"a,b:[c]\n(9)JOB_ID:1\n"[..]);
        let bytes = packet.encode().unwrap();
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(
            decoded.array(ArgKey::MissingPacketNums).unwrap(),
            &["1".to_string(), "4".to_string(), "9".to_string()]
        );
    }

    #[test]
    fn empty_array_round_trips() {
        let packet = Packet::new().arg(ArgKey::MissingPacketNums, Vec::<u64>::new());
        let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();
        assert_eq!(decoded.array(ArgKey::MissingPacketNums), Some(&[][..]));
    }

    #[test]
    fn decode_uppercases_header_but_not_message() {
        let bytes = frame(b"job_type:a,job_id:x7\nkeep me");
        let packet = Packet::decode(&bytes).unwrap();
        assert_eq!(packet.scalar(ArgKey::JobType), Some("A"));
        assert_eq!(packet.scalar(ArgKey::JobId), Some("X7"));
        assert_eq!(&packet.message()[..], b"keep me");
    }

    #[test]
    fn packet_only_completes_on_last_declared_byte() {
        let bytes = frame(b"JOB_ID:1\nabc");
        let mut decoder = PacketDecoder::new();
        for &b in &bytes[..bytes.len() - 1] {
            assert_eq!(decoder.push(b), Ok(None));
            assert!(decoder.in_packet());
        }
        let packet = decoder.push(*bytes.last().unwrap()).unwrap().unwrap();
        assert_eq!(packet.scalar(ArgKey::JobId), Some("1"));
        assert!(!decoder.in_packet());
    }

    #[test]
    fn unknown_key_rejected_before_body_completes() {
        let mut bytes = frame(b"JOB_ID:1,COLOR:RED\npadding-padding");
        let total = bytes.len();
        bytes.extend(frame(b"JOB_ID:2\n"));

        let mut decoder = PacketDecoder::new();
        let mut error_at = None;
        let mut packets = Vec::new();
        for (i, &b) in bytes.iter().enumerate() {
            match decoder.push(b) {
                Err(e) => {
                    assert_eq!(e, PacketError::UnknownKey("COLOR".into()));
                    error_at.get_or_insert(i);
                }
                Ok(Some(p)) => packets.push(p),
                Ok(None) => {}
            }
        }
        assert!(error_at.unwrap() < total - 1);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].scalar(ArgKey::JobId), Some("2"));
    }

    #[test]
    fn garbage_before_packet_resyncs() {
        let mut bytes = b"xyz".to_vec();
        bytes.extend(frame(b"JOB_TYPE:B\n"));
        let results = decode_all(&bytes);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Err(PacketError::BadPrefix(b'x')));
        assert_eq!(
            results[1].as_ref().unwrap().scalar(ArgKey::JobType),
            Some("B")
        );
    }

    #[test]
    fn header_must_be_terminated_within_length() {
        let results = decode_all(&frame(b"JOB_ID:1"));
        assert_eq!(results, vec![Err(PacketError::UnterminatedHeader)]);
    }

    #[test]
    fn header_syntax_errors() {
        for body in [
            &b"JOB_ID\n"[..],
            b"JOB_ID:1,\n",
            b"JOB_ID:[1\n",
            b"JOB_ID:1]\n",
            b":1\n",
            b"MISSING_PACKET_NUMS:[1,,2]\n",
        ] {
            let results = decode_all(&frame(body));
            assert_eq!(results.len(), 1, "body {:?}", body);
            assert!(
                matches!(results[0], Err(PacketError::HeaderSyntax(_))),
                "body {:?} gave {:?}",
                body,
                results[0]
            );
        }
    }

    #[test]
    fn length_prefix_errors() {
        assert_eq!(decode_all(b"()x"), vec![Err(PacketError::EmptyLength), Err(PacketError::BadPrefix(b'x'))]);
        assert_eq!(decode_all(b"(0)"), vec![Err(PacketError::EmptyBody)]);
        assert_eq!(decode_all(b"(1a"), vec![Err(PacketError::BadLength(b'a'))]);

        let oversized = decode_all(b"(99999999)");
        assert!(matches!(oversized[0], Err(PacketError::TooLarge(_))));
        assert!(oversized[0].as_ref().unwrap_err().is_fatal());
    }

    #[test]
    fn packet_without_args_or_message() {
        let packet = Packet::decode(b"(1)\n").unwrap();
        assert_eq!(packet.args().count(), 0);
        assert!(!packet.has_message());
        assert_eq!(&Packet::new().encode().unwrap()[..], b"(1)\n");
    }

    #[test]
    fn encode_rejects_reserved_characters() {
        let err = Packet::new().arg(ArgKey::JobId, "1,2").encode().unwrap_err();
        assert_eq!(err, PacketError::ReservedCharacter { key: ArgKey::JobId });
        let err = Packet::new()
            .arg(ArgKey::MissingPacketNums, vec![""])
            .encode()
            .unwrap_err();
        assert_eq!(
            err,
            PacketError::ReservedCharacter {
                key: ArgKey::MissingPacketNums
            }
        );
    }

    #[test]
    fn one_shot_decode_rejects_partial_and_trailing_input() {
        let bytes = frame(b"JOB_ID:1\n");
        assert_eq!(Packet::decode(&bytes[..bytes.len() - 1]), Err(PacketError::Truncated));
        let mut extra = bytes.clone();
        extra.extend_from_slice(b"((");
        assert_eq!(Packet::decode(&extra), Err(PacketError::TrailingBytes(2)));
    }

    #[test]
    fn flags_parse_short_and_long_forms() {
        assert_eq!(parse_flag("t"), Some(true));
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("false"), Some(false));
        assert_eq!(parse_flag("yes"), None);

        let mut packet = Packet::new();
        packet.set_completed(false);
        assert_eq!(packet.scalar(ArgKey::Completed), Some("F"));
        assert_eq!(packet.completed(), Some(false));
    }
}
