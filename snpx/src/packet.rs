/*!
Packet codec for SNPX frames.

Every frame starts with a fixed 56-byte little-endian header. Short requests carry
their service block and up to six data bytes inside the header ("inline" form);
longer requests append their data after the header and move the service block
to the tail of the header ("data-following" form). Replies mirror this with an
inline acknowledge (data in bytes 44..50) or a data-following acknowledge.
*/

use crate::error::{ProtocolError, Result, SnpxError};
use crate::protocol::{HEADER_LEN, INLINE_DATA_MAX, REPLY_INLINE_LEN};
use bytes::{BufMut, Bytes, BytesMut};

/// Byte offsets inside the 56-byte header
mod offset {
    pub const PACKET_TYPE: usize = 0;
    pub const SEQUENCE: usize = 2;
    pub const DATA_LEN: usize = 4;
    pub const MAILBOX_COUNT: [usize; 2] = [9, 17];
    pub const SEQUENCE_SHORT: usize = 30;
    pub const MESSAGE_TYPE: usize = 31;
    pub const MAILBOX_SOURCE: usize = 36;
    pub const PACKET_NUMBER: usize = 40;
    pub const INLINE_SERVICE: usize = 42;
    pub const INLINE_DATA: usize = 48;
    pub const DATA_MARKER: usize = 48;
    pub const DATA_SERVICE: usize = 50;
    pub const STATUS_MAJOR: usize = 42;
    pub const STATUS_MINOR: usize = 43;
    pub const REPLY_DATA: usize = 44;
}

const MAILBOX_SOURCE_ID: [u8; 4] = [0x10, 0x0E, 0x00, 0x00];
const PACKET_NUMBER_ID: [u8; 2] = [0x01, 0x01];

/// The all-zero frame that opens a session
pub const HELLO: [u8; HEADER_LEN] = [0; HEADER_LEN];

/// Packet type, header byte 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Welcome = 0x01,
    Request = 0x02,
    Reply = 0x03,
    Open = 0x08,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Welcome),
            0x02 => Some(Self::Request),
            0x03 => Some(Self::Reply),
            0x08 => Some(Self::Open),
            _ => None,
        }
    }
}

/// Message type, header byte 31
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    InlineRequest = 0xC0,
    DataRequest = 0x80,
    InlineAck = 0xD4,
    DataAck = 0x94,
    Rejected = 0xD1,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0xC0 => Some(Self::InlineRequest),
            0x80 => Some(Self::DataRequest),
            0xD4 => Some(Self::InlineAck),
            0x94 => Some(Self::DataAck),
            0xD1 => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Service code of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceCode {
    ReadMemory = 0x04,
    WriteMemory = 0x07,
    OpenProtocol = 0x4F,
}

impl ServiceCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x04 => Some(Self::ReadMemory),
            0x07 => Some(Self::WriteMemory),
            0x4F => Some(Self::OpenProtocol),
            _ => None,
        }
    }
}

/// Memory segment selector of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Segment {
    Protocol = 0x01,
    /// 16-bit register words backing assignments
    Register = 0x08,
    /// Command text (`SETASG`, `CLRASG`)
    Command = 0x38,
    OutputBits = 0x46,
    InputBits = 0x48,
}

impl Segment {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Protocol),
            0x08 => Some(Self::Register),
            0x38 => Some(Self::Command),
            0x46 => Some(Self::OutputBits),
            0x48 => Some(Self::InputBits),
            _ => None,
        }
    }
}

/// One request frame, minus its sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub packet_type: PacketType,
    pub service: ServiceCode,
    pub segment: Segment,
    /// Word offset for registers, bit offset for bit segments
    pub address: u16,
    /// Words, bits or text bytes depending on the segment
    pub length: u16,
    pub data: Bytes,
}

impl Request {
    /// Protocol-open request sent right after the hello exchange
    pub fn open_protocol() -> Self {
        Self {
            packet_type: PacketType::Open,
            service: ServiceCode::OpenProtocol,
            segment: Segment::Protocol,
            address: 0,
            length: 0,
            data: Bytes::new(),
        }
    }

    /// Command text such as `CLRASG` or `SETASG 1 2 $VAR 0.0`
    pub fn command(text: &str) -> Result<Self> {
        let length = u16::try_from(text.len()).map_err(|_| {
            SnpxError::out_of_range(format!(
                "command text is {} bytes, at most {} fit",
                text.len(),
                u16::MAX
            ))
        })?;
        Ok(Self {
            packet_type: PacketType::Request,
            service: ServiceCode::WriteMemory,
            segment: Segment::Command,
            address: 0,
            length,
            data: Bytes::copy_from_slice(text.as_bytes()),
        })
    }

    pub fn read(segment: Segment, address: u16, length: u16) -> Self {
        Self {
            packet_type: PacketType::Request,
            service: ServiceCode::ReadMemory,
            segment,
            address,
            length,
            data: Bytes::new(),
        }
    }

    pub fn write(segment: Segment, address: u16, length: u16, data: impl Into<Bytes>) -> Self {
        Self {
            packet_type: PacketType::Request,
            service: ServiceCode::WriteMemory,
            segment,
            address,
            length,
            data: data.into(),
        }
    }

    /// Whether the data fits inside the header
    pub fn is_inline(&self) -> bool {
        self.data.len() <= INLINE_DATA_MAX
    }

    /// Encode the request with the given sequence number
    pub fn encode(&self, sequence: u16) -> BytesMut {
        let mut header = [0u8; HEADER_LEN];
        let inline = self.is_inline();

        header[offset::PACKET_TYPE] = self.packet_type as u8;
        header[offset::SEQUENCE..offset::SEQUENCE + 2].copy_from_slice(&sequence.to_le_bytes());
        for at in offset::MAILBOX_COUNT {
            header[at] = if inline { 0x01 } else { 0x02 };
        }
        header[offset::SEQUENCE_SHORT] = sequence as u8;
        let message_type = if inline {
            MessageType::InlineRequest
        } else {
            MessageType::DataRequest
        };
        header[offset::MESSAGE_TYPE] = message_type as u8;
        header[offset::MAILBOX_SOURCE..offset::MAILBOX_SOURCE + 4].copy_from_slice(&MAILBOX_SOURCE_ID);
        header[offset::PACKET_NUMBER..offset::PACKET_NUMBER + 2].copy_from_slice(&PACKET_NUMBER_ID);

        let body = if inline {
            header[offset::INLINE_DATA..offset::INLINE_DATA + self.data.len()]
                .copy_from_slice(&self.data);
            offset::INLINE_SERVICE
        } else {
            let len = self.data.len() as u16;
            header[offset::DATA_LEN..offset::DATA_LEN + 2].copy_from_slice(&len.to_le_bytes());
            header[offset::DATA_MARKER..offset::DATA_MARKER + 2].copy_from_slice(&PACKET_NUMBER_ID);
            offset::DATA_SERVICE
        };
        header[body] = self.service as u8;
        header[body + 1] = self.segment as u8;
        header[body + 2..body + 4].copy_from_slice(&self.address.to_le_bytes());
        header[body + 4..body + 6].copy_from_slice(&self.length.to_le_bytes());

        let mut buf = BytesMut::with_capacity(HEADER_LEN + if inline { 0 } else { self.data.len() });
        buf.put_slice(&header);
        if !inline {
            buf.put_slice(&self.data);
        }
        buf
    }

    /// Decode a request frame, returning its sequence number and contents
    ///
    /// Inline write requests yield all six inline data bytes; the receiver trims
    /// them using `length` and the segment's unit.
    pub fn decode(frame: &[u8]) -> Result<(u16, Self)> {
        check_header(frame)?;

        let packet_type = PacketType::from_u8(frame[offset::PACKET_TYPE])
            .ok_or(ProtocolError::UnknownPacketType(frame[offset::PACKET_TYPE]))?;
        if !matches!(packet_type, PacketType::Request | PacketType::Open) {
            return Err(ProtocolError::UnknownPacketType(packet_type as u8).into());
        }

        let (body, data) = match MessageType::from_u8(frame[offset::MESSAGE_TYPE]) {
            Some(MessageType::InlineRequest) => {
                let data = &frame[offset::INLINE_DATA..offset::INLINE_DATA + INLINE_DATA_MAX];
                (offset::INLINE_SERVICE, Bytes::copy_from_slice(data))
            }
            Some(MessageType::DataRequest) => (offset::DATA_SERVICE, Bytes::copy_from_slice(trailing(frame)?)),
            _ => return Err(ProtocolError::UnknownMessageType(frame[offset::MESSAGE_TYPE]).into()),
        };

        let service = ServiceCode::from_u8(frame[body]).ok_or(ProtocolError::UnknownService(frame[body]))?;
        let segment =
            Segment::from_u8(frame[body + 1]).ok_or(ProtocolError::UnknownSegment(frame[body + 1]))?;
        let data = if service == ServiceCode::ReadMemory { Bytes::new() } else { data };

        Ok((
            read_u16(frame, offset::SEQUENCE),
            Self {
                packet_type,
                service,
                segment,
                address: read_u16(frame, body + 2),
                length: read_u16(frame, body + 4),
                data,
            },
        ))
    }
}

/// Reply status bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    pub major: u8,
    pub minor: u8,
}

/// A successfully decoded reply frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub packet_type: PacketType,
    pub sequence: u16,
    pub status: Status,
    /// Reply data; inline acknowledges always carry six bytes
    pub data: Bytes,
}

impl Reply {
    /// Answer to the hello frame
    pub fn welcome() -> Self {
        Self {
            packet_type: PacketType::Welcome,
            sequence: 0,
            status: Status::default(),
            data: Bytes::new(),
        }
    }

    /// Successful acknowledge carrying `data`
    pub fn ack(sequence: u16, data: impl Into<Bytes>) -> Self {
        Self {
            packet_type: PacketType::Reply,
            sequence,
            status: Status::default(),
            data: data.into(),
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut header = [0u8; HEADER_LEN];
        header[offset::PACKET_TYPE] = self.packet_type as u8;
        header[offset::SEQUENCE..offset::SEQUENCE + 2].copy_from_slice(&self.sequence.to_le_bytes());

        if self.packet_type == PacketType::Welcome {
            let mut buf = BytesMut::with_capacity(HEADER_LEN);
            buf.put_slice(&header);
            return buf;
        }

        let inline = self.data.len() <= REPLY_INLINE_LEN;
        stamp_reply(&mut header, self.sequence, self.status);
        let message_type = if inline {
            header[offset::REPLY_DATA..offset::REPLY_DATA + self.data.len()].copy_from_slice(&self.data);
            MessageType::InlineAck
        } else {
            let len = self.data.len() as u16;
            header[offset::DATA_LEN..offset::DATA_LEN + 2].copy_from_slice(&len.to_le_bytes());
            MessageType::DataAck
        };
        header[offset::MESSAGE_TYPE] = message_type as u8;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + if inline { 0 } else { self.data.len() });
        buf.put_slice(&header);
        if !inline {
            buf.put_slice(&self.data);
        }
        buf
    }
}

/// Encode a rejection frame carrying the given status
pub fn encode_rejection(sequence: u16, status: Status) -> BytesMut {
    let mut header = [0u8; HEADER_LEN];
    header[offset::PACKET_TYPE] = PacketType::Reply as u8;
    header[offset::SEQUENCE..offset::SEQUENCE + 2].copy_from_slice(&sequence.to_le_bytes());
    stamp_reply(&mut header, sequence, status);
    header[offset::MESSAGE_TYPE] = MessageType::Rejected as u8;

    let mut buf = BytesMut::with_capacity(HEADER_LEN);
    buf.put_slice(&header);
    buf
}

/// Decode a reply frame
///
/// Fails with `MalformedPacket` when the frame is shorter than the header or its
/// declared data, and with `ProtocolError` for unknown codes or a controller-side
/// rejection.
pub fn decode(frame: &[u8]) -> Result<Reply> {
    check_header(frame)?;

    let packet_type = PacketType::from_u8(frame[offset::PACKET_TYPE])
        .ok_or(ProtocolError::UnknownPacketType(frame[offset::PACKET_TYPE]))?;
    let sequence = read_u16(frame, offset::SEQUENCE);

    match packet_type {
        PacketType::Welcome => return Ok(Reply { sequence, ..Reply::welcome() }),
        PacketType::Reply => {}
        other => return Err(ProtocolError::UnknownPacketType(other as u8).into()),
    }

    let status = Status {
        major: frame[offset::STATUS_MAJOR],
        minor: frame[offset::STATUS_MINOR],
    };

    let data = match MessageType::from_u8(frame[offset::MESSAGE_TYPE]) {
        Some(MessageType::InlineAck) => {
            Bytes::copy_from_slice(&frame[offset::REPLY_DATA..offset::REPLY_DATA + REPLY_INLINE_LEN])
        }
        Some(MessageType::DataAck) => Bytes::copy_from_slice(trailing(frame)?),
        Some(MessageType::Rejected) => {
            return Err(ProtocolError::Rejected {
                major: status.major,
                minor: status.minor,
            }
            .into())
        }
        _ => return Err(ProtocolError::UnknownMessageType(frame[offset::MESSAGE_TYPE]).into()),
    };

    if status.major != 0 {
        return Err(ProtocolError::Rejected {
            major: status.major,
            minor: status.minor,
        }
        .into());
    }

    Ok(Reply {
        packet_type,
        sequence,
        status,
        data,
    })
}

/// Sequence number of a reply frame, read before anything else is decoded
pub fn frame_sequence(frame: &[u8]) -> Result<u16> {
    check_header(frame)?;
    Ok(read_u16(frame, offset::SEQUENCE))
}

/// Length of data declared to follow a header
pub fn declared_data_len(header: &[u8]) -> usize {
    read_u16(header, offset::DATA_LEN) as usize
}

fn stamp_reply(header: &mut [u8; HEADER_LEN], sequence: u16, status: Status) {
    for at in offset::MAILBOX_COUNT {
        header[at] = 0x01;
    }
    header[offset::SEQUENCE_SHORT] = sequence as u8;
    header[offset::MAILBOX_SOURCE..offset::MAILBOX_SOURCE + 4].copy_from_slice(&MAILBOX_SOURCE_ID);
    header[offset::PACKET_NUMBER..offset::PACKET_NUMBER + 2].copy_from_slice(&PACKET_NUMBER_ID);
    header[offset::STATUS_MAJOR] = status.major;
    header[offset::STATUS_MINOR] = status.minor;
}

fn check_header(frame: &[u8]) -> Result<()> {
    if frame.len() < HEADER_LEN {
        return Err(SnpxError::malformed(format!(
            "frame is {} bytes, header alone needs {HEADER_LEN}",
            frame.len()
        )));
    }
    Ok(())
}

fn trailing(frame: &[u8]) -> Result<&[u8]> {
    let len = declared_data_len(frame);
    frame.get(HEADER_LEN..HEADER_LEN + len).ok_or_else(|| {
        SnpxError::malformed(format!(
            "header declares {len} data bytes, frame carries {}",
            frame.len() - HEADER_LEN
        ))
    })
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}
