//! Binary framing for networked channels.
//!
//! All frames use little-endian byte order and carry a 4-byte length prefix
//! that excludes itself:
//!
//! ```text
//! [4: total_len][1: type][N: body]
//!
//! HELLO       body = [4: name_len][name]
//! HELLO_ACK   body = [1: accepted]
//! BEGIN_STEP  body = [8: step]
//! DECLARE     body = [4: name_len][name][1: dtype][4: ndim][8 * ndim: dims]
//! PUT         body = [4: name_len][name][1: dtype][4: data_len][data_len: data]
//! END_STEP    body = (empty)
//! CLOSE       body = (empty)
//! CLOSE_ACK   body = (empty)
//! ```
//!
//! A reader opens with HELLO naming the channel it wants; the writer answers
//! HELLO_ACK. Every step is BEGIN_STEP, any DECLAREs, any PUTs, END_STEP.
//! CLOSE marks end of stream; in reliable mode the reader answers CLOSE_ACK.

use crate::error::{StreamError, StreamResult};
use crate::payload::{ArrayData, DataType, VariableInfo};

pub const FRAME_TYPE_HELLO: u8 = 0x01;
pub const FRAME_TYPE_HELLO_ACK: u8 = 0x02;
pub const FRAME_TYPE_BEGIN_STEP: u8 = 0x03;
pub const FRAME_TYPE_DECLARE: u8 = 0x04;
pub const FRAME_TYPE_PUT: u8 = 0x05;
pub const FRAME_TYPE_END_STEP: u8 = 0x06;
pub const FRAME_TYPE_CLOSE: u8 = 0x07;
pub const FRAME_TYPE_CLOSE_ACK: u8 = 0x08;

/// Largest frame accepted off the wire (1 GiB).
pub const MAX_FRAME_LEN: usize = 1 << 30;

/// One unit of channel traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Hello { channel: String },
    HelloAck { accepted: bool },
    BeginStep { step: u64 },
    Declare(VariableInfo),
    Put { variable: String, data: ArrayData },
    EndStep,
    Close,
    CloseAck,
}

impl Frame {
    pub fn frame_type(&self) -> u8 {
        match self {
            Frame::Hello { .. } => FRAME_TYPE_HELLO,
            Frame::HelloAck { .. } => FRAME_TYPE_HELLO_ACK,
            Frame::BeginStep { .. } => FRAME_TYPE_BEGIN_STEP,
            Frame::Declare(_) => FRAME_TYPE_DECLARE,
            Frame::Put { .. } => FRAME_TYPE_PUT,
            Frame::EndStep => FRAME_TYPE_END_STEP,
            Frame::Close => FRAME_TYPE_CLOSE,
            Frame::CloseAck => FRAME_TYPE_CLOSE_ACK,
        }
    }

    /// Encode the frame to bytes (including length prefix).
    pub fn encode(&self) -> StreamResult<Vec<u8>> {
        let mut body = Vec::new();

        // Frame type
        body.push(self.frame_type());

        match self {
            Frame::Hello { channel } => put_name(&mut body, channel)?,
            Frame::HelloAck { accepted } => body.push(u8::from(*accepted)),
            Frame::BeginStep { step } => body.extend_from_slice(&step.to_le_bytes()),
            Frame::Declare(info) => {
                put_name(&mut body, &info.name)?;
                body.push(info.dtype.to_byte());
                body.extend_from_slice(&(info.shape.len() as u32).to_le_bytes());
                for dim in &info.shape {
                    body.extend_from_slice(&(*dim as u64).to_le_bytes());
                }
            }
            Frame::Put { variable, data } => {
                put_name(&mut body, variable)?;
                body.push(data.dtype().to_byte());
                let bytes = data.to_le_bytes();
                let data_len = u32::try_from(bytes.len()).map_err(|_| {
                    StreamError::Protocol(format!("Put of {} bytes is too large", bytes.len()))
                })?;
                body.extend_from_slice(&data_len.to_le_bytes());
                body.extend_from_slice(&bytes);
            }
            Frame::EndStep | Frame::Close | Frame::CloseAck => {}
        }

        if body.len() > MAX_FRAME_LEN {
            return Err(StreamError::Protocol(format!(
                "Frame too large: {} bytes, max {}",
                body.len(),
                MAX_FRAME_LEN
            )));
        }

        let mut buf = Vec::with_capacity(4 + body.len());

        // Length prefix (excludes itself)
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);

        Ok(buf)
    }

    /// Decode a frame from bytes (excluding length prefix).
    pub fn decode(data: &[u8]) -> StreamResult<Self> {
        let mut cursor = Cursor::new(data);

        let frame = match cursor.u8()? {
            FRAME_TYPE_HELLO => Frame::Hello {
                channel: cursor.name()?,
            },
            FRAME_TYPE_HELLO_ACK => Frame::HelloAck {
                accepted: cursor.u8()? != 0,
            },
            FRAME_TYPE_BEGIN_STEP => Frame::BeginStep { step: cursor.u64()? },
            FRAME_TYPE_DECLARE => {
                let name = cursor.name()?;
                let dtype = DataType::from_byte(cursor.u8()?)?;
                let ndim = cursor.u32()? as usize;
                let mut shape = Vec::with_capacity(ndim.min(64));
                for _ in 0..ndim {
                    let dim = usize::try_from(cursor.u64()?).map_err(|_| {
                        StreamError::Protocol("Dimension exceeds platform usize".to_string())
                    })?;
                    shape.push(dim);
                }
                Frame::Declare(VariableInfo::new(name, dtype, shape))
            }
            FRAME_TYPE_PUT => {
                let variable = cursor.name()?;
                let dtype = DataType::from_byte(cursor.u8()?)?;
                let data_len = cursor.u32()? as usize;
                let data = ArrayData::from_le_bytes(dtype, cursor.bytes(data_len)?)?;
                Frame::Put { variable, data }
            }
            FRAME_TYPE_END_STEP => Frame::EndStep,
            FRAME_TYPE_CLOSE => Frame::Close,
            FRAME_TYPE_CLOSE_ACK => Frame::CloseAck,
            other => {
                return Err(StreamError::Protocol(format!(
                    "Unknown frame type: {:#04x}",
                    other
                )))
            }
        };

        if cursor.remaining() != 0 {
            return Err(StreamError::Protocol(format!(
                "Frame {:#04x} has {} trailing bytes",
                frame.frame_type(),
                cursor.remaining()
            )));
        }

        Ok(frame)
    }
}

fn put_name(buf: &mut Vec<u8>, name: &str) -> StreamResult<()> {
    let len = u32::try_from(name.len())
        .map_err(|_| StreamError::Protocol(format!("Name too long: {} bytes", name.len())))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(name.as_bytes());
    Ok(())
}

/// Bounds-checked little-endian reader over a frame body.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn bytes(&mut self, len: usize) -> StreamResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(StreamError::Protocol(format!(
                "Frame truncated: need {} bytes at offset {}, have {}",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> StreamResult<[u8; N]> {
        let mut raw = [0u8; N];
        raw.copy_from_slice(self.bytes(N)?);
        Ok(raw)
    }

    fn u8(&mut self) -> StreamResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> StreamResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> StreamResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn name(&mut self) -> StreamResult<String> {
        let len = self.u32()? as usize;
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| StreamError::Protocol("Name is not valid UTF-8".to_string()))
    }
}

/// Read a length-prefixed frame from a buffer.
///
/// Returns `None` if there isn't enough data for a complete frame.
/// Returns `Some((frame_data, consumed))` with the frame data (excluding length prefix)
/// and the total bytes consumed.
pub fn read_frame(buf: &[u8]) -> Option<(&[u8], usize)> {
    let len = declared_len(buf)?;

    if buf.len() < 4 + len {
        return None;
    }

    Some((&buf[4..4 + len], 4 + len))
}

/// Length announced by the prefix at the start of `buf`, if it is complete.
pub fn declared_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 4 {
        return None;
    }
    Some(u32::from_le_bytes(buf[0..4].try_into().ok()?) as usize)
}
