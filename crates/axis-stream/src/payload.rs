//! Numeric array payloads and variable metadata.
//!
//! A [`Payload`] is what a data channel carries: a flat, typed element
//! buffer ([`ArrayData`]) plus the n-dimensional shape it is laid out in.
//! On the wire, elements are always little-endian.

use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    U8,
    I32,
    I64,
    F32,
    F64,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn element_size(self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::I32 | DataType::F32 => 4,
            DataType::I64 | DataType::F64 => 8,
        }
    }

    /// Convert from wire format byte.
    pub fn from_byte(byte: u8) -> StreamResult<Self> {
        match byte {
            0x01 => Ok(DataType::U8),
            0x02 => Ok(DataType::I32),
            0x03 => Ok(DataType::I64),
            0x04 => Ok(DataType::F32),
            0x05 => Ok(DataType::F64),
            other => Err(StreamError::Protocol(format!(
                "Unknown data type byte: {:#04x}",
                other
            ))),
        }
    }

    /// Convert to wire format byte.
    pub fn to_byte(self) -> u8 {
        match self {
            DataType::U8 => 0x01,
            DataType::I32 => 0x02,
            DataType::I64 => 0x03,
            DataType::F32 => 0x04,
            DataType::F64 => 0x05,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::U8 => "u8",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat, typed element buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "lowercase")]
pub enum ArrayData {
    U8(Vec<u8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl ArrayData {
    /// Allocate a zero-filled buffer of `len` elements.
    pub fn zeros(dtype: DataType, len: usize) -> Self {
        match dtype {
            DataType::U8 => ArrayData::U8(vec![0; len]),
            DataType::I32 => ArrayData::I32(vec![0; len]),
            DataType::I64 => ArrayData::I64(vec![0; len]),
            DataType::F32 => ArrayData::F32(vec![0.0; len]),
            DataType::F64 => ArrayData::F64(vec![0.0; len]),
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            ArrayData::U8(_) => DataType::U8,
            ArrayData::I32(_) => DataType::I32,
            ArrayData::I64(_) => DataType::I64,
            ArrayData::F32(_) => DataType::F32,
            ArrayData::F64(_) => DataType::F64,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            ArrayData::U8(v) => v.len(),
            ArrayData::I32(v) => v.len(),
            ArrayData::I64(v) => v.len(),
            ArrayData::F32(v) => v.len(),
            ArrayData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode elements as little-endian bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            ArrayData::U8(v) => v.clone(),
            ArrayData::I32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            ArrayData::I64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            ArrayData::F32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            ArrayData::F64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }

    /// Decode little-endian bytes of the given element type.
    pub fn from_le_bytes(dtype: DataType, bytes: &[u8]) -> StreamResult<Self> {
        if bytes.len() % dtype.element_size() != 0 {
            return Err(StreamError::InvalidPayload(format!(
                "{} bytes is not a whole number of {} elements",
                bytes.len(),
                dtype
            )));
        }

        Ok(match dtype {
            DataType::U8 => ArrayData::U8(bytes.to_vec()),
            DataType::I32 => ArrayData::I32(decode_le(bytes, i32::from_le_bytes)),
            DataType::I64 => ArrayData::I64(decode_le(bytes, i64::from_le_bytes)),
            DataType::F32 => ArrayData::F32(decode_le(bytes, f32::from_le_bytes)),
            DataType::F64 => ArrayData::F64(decode_le(bytes, f64::from_le_bytes)),
        })
    }

    /// Copy `source` into this buffer. Element type and length must match.
    pub fn copy_from(&mut self, variable: &str, source: &ArrayData) -> StreamResult<()> {
        let mismatch = |expected: String, actual: String| StreamError::BufferMismatch {
            variable: variable.to_string(),
            expected,
            actual,
        };

        if self.dtype() != source.dtype() {
            return Err(mismatch(source.dtype().to_string(), self.dtype().to_string()));
        }
        if self.len() != source.len() {
            return Err(mismatch(
                format!("{} elements", source.len()),
                format!("{} elements", self.len()),
            ));
        }

        match (self, source) {
            (ArrayData::U8(dst), ArrayData::U8(src)) => dst.copy_from_slice(src),
            (ArrayData::I32(dst), ArrayData::I32(src)) => dst.copy_from_slice(src),
            (ArrayData::I64(dst), ArrayData::I64(src)) => dst.copy_from_slice(src),
            (ArrayData::F32(dst), ArrayData::F32(src)) => dst.copy_from_slice(src),
            (ArrayData::F64(dst), ArrayData::F64(src)) => dst.copy_from_slice(src),
            _ => unreachable!("element types checked above"),
        }
        Ok(())
    }
}

fn decode_le<const N: usize, T>(bytes: &[u8], convert: fn([u8; N]) -> T) -> Vec<T> {
    bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut raw = [0u8; N];
            raw.copy_from_slice(chunk);
            convert(raw)
        })
        .collect()
}

/// Number of elements described by `shape`. A scalar (empty shape) has one.
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Declared metadata of a variable carried on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    pub dtype: DataType,
    pub shape: Vec<usize>,
}

impl VariableInfo {
    pub fn new(name: impl Into<String>, dtype: DataType, shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape,
        }
    }

    pub fn element_count(&self) -> usize {
        element_count(&self.shape)
    }

    /// Allocate a receive buffer sized to this declaration.
    pub fn allocate(&self) -> ArrayData {
        ArrayData::zeros(self.dtype, self.element_count())
    }
}

/// An n-dimensional numeric array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub shape: Vec<usize>,
    pub data: ArrayData,
}

impl Payload {
    /// Build a payload, checking that `shape` covers exactly `data`.
    pub fn new(shape: Vec<usize>, data: ArrayData) -> StreamResult<Self> {
        let payload = Self { shape, data };
        payload.validate()?;
        Ok(payload)
    }

    /// One-dimensional payload over all of `data`.
    pub fn vector(data: ArrayData) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn validate(&self) -> StreamResult<()> {
        let expected = element_count(&self.shape);
        if expected != self.data.len() {
            return Err(StreamError::InvalidPayload(format!(
                "shape {:?} needs {} elements, data has {}",
                self.shape,
                expected,
                self.data.len()
            )));
        }
        Ok(())
    }

    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    /// Declaration of this payload under `name`.
    pub fn variable(&self, name: &str) -> VariableInfo {
        VariableInfo::new(name, self.dtype(), self.shape.clone())
    }
}
