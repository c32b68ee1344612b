use bytes::{Buf, BufMut, BytesMut};

use crate::error::{PacketError, Result};

/// Bytes per wire word.
pub const WORD_BYTES: usize = 4;

/// Largest header: header word + stream id + integer seconds + two
/// fractional-tick words.
pub const MAX_HEADER_WORDS: usize = 5;

/// [`MAX_HEADER_WORDS`] in bytes.
pub const MAX_HEADER_BYTES: usize = MAX_HEADER_WORDS * WORD_BYTES;

/// The sequence / flow-control word leading every payload.
pub const SEQUENCE_BYTES: usize = WORD_BYTES;

/// Optional trailer word.
pub const TRAILER_BYTES: usize = WORD_BYTES;

const TYPE_SHIFT: u32 = 28;
const CLASS_ID_BIT: u32 = 1 << 27;
const TRAILER_BIT: u32 = 1 << 26;
const START_OF_BURST_BIT: u32 = 1 << 25;
const END_OF_BURST_BIT: u32 = 1 << 24;
const TSI_SHIFT: u32 = 22;
const TSF_SHIFT: u32 = 20;
const COUNT_SHIFT: u32 = 16;
const TIME_TYPE_MASK: u32 = 0x3;
const COUNT_MASK: u32 = 0xf;
const SIZE_MASK: u32 = 0xffff;

/// Integer timestamp type written on pack ("other").
const TSI_OTHER: u32 = 0x3;
/// Fractional timestamp type written on pack ("sample count").
const TSF_SAMPLE_COUNT: u32 = 0x1;

/// Packet class carried in the top nibble of the header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Sample data with stream id.
    Data,
    /// Extension data with stream id.
    ExtensionData,
    /// Context packet: flow-control acks and async events.
    Context,
    /// Extension context packet.
    ExtensionContext,
}

impl PacketType {
    fn code(self) -> u32 {
        match self {
            PacketType::Data => 0x1,
            PacketType::ExtensionData => 0x3,
            PacketType::Context => 0x4,
            PacketType::ExtensionContext => 0x5,
        }
    }

    fn from_code(code: u32) -> Result<Self> {
        match code {
            0x1 => Ok(PacketType::Data),
            0x3 => Ok(PacketType::ExtensionData),
            0x4 => Ok(PacketType::Context),
            0x5 => Ok(PacketType::ExtensionContext),
            other => Err(PacketError::UnknownPacketType(other as u8)),
        }
    }

    /// Whether this packet carries samples.
    pub fn is_data(self) -> bool {
        matches!(self, PacketType::Data | PacketType::ExtensionData)
    }

    /// Short name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            PacketType::Data => "data",
            PacketType::ExtensionData => "ext-data",
            PacketType::Context => "context",
            PacketType::ExtensionContext => "ext-context",
        }
    }
}

/// Decoded packet header.
///
/// `payload_words` counts every payload word including the leading
/// sequence word, so it is always at least one for a valid packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    pub stream_id: u32,
    /// Rolling packet counter, 4 bits on the wire. [`pack`] rejects values
    /// above 15.
    pub packet_count: u8,
    pub start_of_burst: bool,
    pub end_of_burst: bool,
    /// Integer seconds, present when the integer-time flag is set.
    pub integer_time: Option<u32>,
    /// Fractional tick count, present when the fractional-time flag is set.
    pub fractional_time: Option<u64>,
    pub trailer: Option<u32>,
    pub payload_words: usize,
}

impl PacketHeader {
    /// A data packet header with `payload_words` payload words.
    pub fn data(stream_id: u32, payload_words: usize) -> Self {
        Self {
            packet_type: PacketType::Data,
            stream_id,
            packet_count: 0,
            start_of_burst: false,
            end_of_burst: false,
            integer_time: None,
            fractional_time: None,
            trailer: None,
            payload_words,
        }
    }

    /// A context packet header carrying `trailer`.
    pub fn context(stream_id: u32, payload_words: usize, trailer: u32) -> Self {
        Self {
            packet_type: PacketType::Context,
            trailer: Some(trailer),
            ..Self::data(stream_id, payload_words)
        }
    }

    /// Attach both timestamp fields.
    pub fn with_time(mut self, seconds: u32, ticks: u64) -> Self {
        self.integer_time = Some(seconds);
        self.fractional_time = Some(ticks);
        self
    }

    /// Whether both timestamp fields are present.
    pub fn has_time_spec(&self) -> bool {
        self.integer_time.is_some() && self.fractional_time.is_some()
    }

    /// Header words before the payload.
    pub fn header_words(&self) -> usize {
        2 + usize::from(self.integer_time.is_some()) + 2 * usize::from(self.fractional_time.is_some())
    }

    /// Total words on the wire.
    pub fn packet_words(&self) -> usize {
        self.header_words() + self.payload_words + usize::from(self.trailer.is_some())
    }

    /// Total bytes on the wire.
    pub fn packet_bytes(&self) -> usize {
        self.packet_words() * WORD_BYTES
    }

    fn header_word(&self, packet_words: usize) -> u32 {
        let mut word = self.packet_type.code() << TYPE_SHIFT;
        if self.trailer.is_some() {
            word |= TRAILER_BIT;
        }
        if self.start_of_burst {
            word |= START_OF_BURST_BIT;
        }
        if self.end_of_burst {
            word |= END_OF_BURST_BIT;
        }
        if self.integer_time.is_some() {
            word |= TSI_OTHER << TSI_SHIFT;
        }
        if self.fractional_time.is_some() {
            word |= TSF_SAMPLE_COUNT << TSF_SHIFT;
        }
        word |= u32::from(self.packet_count) << COUNT_SHIFT;
        word | (packet_words as u32 & SIZE_MASK)
    }
}

/// A decoded packet borrowing its body from the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet<'a> {
    pub header: PacketHeader,
    /// Payload word 0.
    pub sequence: u32,
    /// Payload after the sequence word, trailer excluded.
    pub body: &'a [u8],
}

impl Packet<'_> {
    /// Event code carried in the low byte of a context packet's trailer.
    pub fn context_code(&self) -> Result<u8> {
        self.header
            .trailer
            .map(|trailer| (trailer & 0xff) as u8)
            .ok_or(PacketError::MissingTrailer)
    }
}

/// Pack `header` and the sequence word into `dst`.
///
/// Writes the header words, the sequence word and (if present) the trailer
/// at the end of the packet. Returns the byte offset where the body starts;
/// the caller fills `header.payload_words - 1` words from there.
///
/// Wire format:
/// ```text
/// ┌────────┬──────┬──────────┬───────────┬──────────┬──────────┬─────────┐
/// │ Header │ SID  │ Int secs │ Frac ticks│ Sequence │ Body     │ Trailer │
/// │ (4B)   │ (4B) │ (4B opt) │ (8B opt)  │ (4B)     │ (words)  │ (4B opt)│
/// └────────┴──────┴──────────┴───────────┴──────────┴──────────┴─────────┘
/// ```
pub fn pack(header: &PacketHeader, sequence: u32, dst: &mut [u8]) -> Result<usize> {
    if header.payload_words == 0 {
        return Err(PacketError::MissingSequence);
    }
    if u32::from(header.packet_count) > COUNT_MASK {
        return Err(PacketError::PacketCountOutOfRange(header.packet_count));
    }
    let words = header.packet_words();
    if words > SIZE_MASK as usize {
        return Err(PacketError::PacketTooLarge { words });
    }
    let needed = words * WORD_BYTES;
    if dst.len() < needed {
        return Err(PacketError::BufferTooSmall {
            needed,
            available: dst.len(),
        });
    }

    let mut cursor: &mut [u8] = &mut dst[..needed];
    cursor.put_u32(header.header_word(words));
    cursor.put_u32(header.stream_id);
    if let Some(seconds) = header.integer_time {
        cursor.put_u32(seconds);
    }
    if let Some(ticks) = header.fractional_time {
        cursor.put_u64(ticks);
    }
    cursor.put_u32(sequence);

    if let Some(trailer) = header.trailer {
        dst[needed - TRAILER_BYTES..needed].copy_from_slice(&trailer.to_be_bytes());
    }

    Ok(header.header_words() * WORD_BYTES + SEQUENCE_BYTES)
}

/// Unpack one packet from `src`.
///
/// Bytes past the declared packet size are ignored. Fields absent per the
/// header flags are never read.
pub fn unpack(src: &[u8]) -> Result<Packet<'_>> {
    if src.len() % WORD_BYTES != 0 {
        return Err(PacketError::Misaligned(src.len()));
    }
    if src.len() < 2 * WORD_BYTES {
        return Err(PacketError::Truncated {
            needed: 2 * WORD_BYTES,
            available: src.len(),
        });
    }

    let mut cursor = src;
    let word = cursor.get_u32();

    let packet_type = PacketType::from_code(word >> TYPE_SHIFT)?;
    if word & CLASS_ID_BIT != 0 {
        return Err(PacketError::ClassIdUnsupported);
    }

    let declared = (word & SIZE_MASK) as usize;
    if declared * WORD_BYTES > src.len() {
        return Err(PacketError::Truncated {
            needed: declared * WORD_BYTES,
            available: src.len(),
        });
    }

    let has_trailer = word & TRAILER_BIT != 0;
    let has_tsi = (word >> TSI_SHIFT) & TIME_TYPE_MASK != 0;
    let has_tsf = (word >> TSF_SHIFT) & TIME_TYPE_MASK != 0;
    let header_words = 2 + usize::from(has_tsi) + 2 * usize::from(has_tsf);
    let required = header_words + usize::from(has_trailer);
    if declared < required {
        return Err(PacketError::InconsistentSize { declared, required });
    }
    let payload_words = declared - required;
    if payload_words == 0 {
        return Err(PacketError::MissingSequence);
    }

    let stream_id = cursor.get_u32();
    let integer_time = has_tsi.then(|| cursor.get_u32());
    let fractional_time = has_tsf.then(|| cursor.get_u64());
    let sequence = cursor.get_u32();

    let packet = &src[..declared * WORD_BYTES];
    let body_start = header_words * WORD_BYTES + SEQUENCE_BYTES;
    let body_end = packet.len() - usize::from(has_trailer) * TRAILER_BYTES;
    let trailer = has_trailer.then(|| {
        let mut tail = &packet[body_end..];
        tail.get_u32()
    });

    Ok(Packet {
        header: PacketHeader {
            packet_type,
            stream_id,
            packet_count: ((word >> COUNT_SHIFT) & COUNT_MASK) as u8,
            start_of_burst: word & START_OF_BURST_BIT != 0,
            end_of_burst: word & END_OF_BURST_BIT != 0,
            integer_time,
            fractional_time,
            trailer,
            payload_words,
        },
        sequence,
        body: &packet[body_start..body_end],
    })
}

/// Build a complete packet around `body`, zero-padded to whole words.
///
/// `header.payload_words` is recomputed from the body length.
pub fn encode_packet(header: &PacketHeader, sequence: u32, body: &[u8]) -> Result<BytesMut> {
    let mut header = header.clone();
    header.payload_words = 1 + body.len().div_ceil(WORD_BYTES);

    let mut dst = BytesMut::zeroed(header.packet_bytes());
    let offset = pack(&header, sequence, &mut dst)?;
    dst[offset..offset + body.len()].copy_from_slice(body);
    Ok(dst)
}
