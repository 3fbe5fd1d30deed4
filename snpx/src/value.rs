/*!
Controller variable types and their wire encodings.

Each [`VarType`] owns one row of a small codec table: how many slot cells it
occupies by default, which multiplier its `SETASG` registration carries, and how
a [`Value`] is packed into / unpacked from register memory.
*/

use crate::error::{Result, SnpxError};
use crate::protocol::SLOT_BYTES;
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declared type of a controller variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    Int,
    Real,
    String,
}

/// A typed value read from or written to the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i32),
    Real(f32),
    String(String),
}

/// Encode/decode/size row for one variable type
pub struct TypeCodec {
    /// Slot cells occupied when the caller does not specify a size
    pub default_size: u16,
    /// Multiplier field of the `SETASG` command text
    pub multiplier: &'static str,
    /// Pack a value into `cells * SLOT_BYTES` bytes
    pub encode: fn(&Value, u16) -> Result<Vec<u8>>,
    /// Unpack a value from register bytes
    pub decode: fn(&[u8]) -> Result<Value>,
}

/// STRING variables use a fixed NUL-padded block of this many cells
pub const STRING_SLOTS: u16 = 10;

static CODECS: [TypeCodec; 3] = [
    TypeCodec {
        default_size: 1,
        multiplier: "1",
        encode: encode_int,
        decode: decode_int,
    },
    TypeCodec {
        default_size: 1,
        multiplier: "0.0",
        encode: encode_real,
        decode: decode_real,
    },
    TypeCodec {
        default_size: STRING_SLOTS,
        multiplier: "1",
        encode: encode_string,
        decode: decode_string,
    },
];

impl VarType {
    /// Codec row for this type
    pub fn codec(self) -> &'static TypeCodec {
        match self {
            Self::Int => &CODECS[0],
            Self::Real => &CODECS[1],
            Self::String => &CODECS[2],
        }
    }

    /// Default number of slot cells
    pub fn default_size(self) -> u16 {
        self.codec().default_size
    }

    /// Encode `value` into a block of `cells` slot cells
    pub fn encode(self, value: &Value, cells: u16) -> Result<Vec<u8>> {
        if value.var_type() != self {
            return Err(SnpxError::TypeMismatch {
                expected: self,
                found: value.var_type(),
            });
        }
        (self.codec().encode)(value, cells)
    }

    /// Decode a value of this type from register bytes
    pub fn decode(self, data: &[u8]) -> Result<Value> {
        (self.codec().decode)(data)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Real => "real",
            Self::String => "string",
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VarType {
    type Err = SnpxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "int" | "integer" => Ok(Self::Int),
            "real" | "float" => Ok(Self::Real),
            "string" | "str" => Ok(Self::String),
            _ => Err(SnpxError::config(format!("unknown variable type: {s:?}"))),
        }
    }
}

impl Value {
    /// Type tag of this value
    pub fn var_type(&self) -> VarType {
        match self {
            Self::Int(_) => VarType::Int,
            Self::Real(_) => VarType::Real,
            Self::String(_) => VarType::String,
        }
    }

    /// Parse a textual value as the given type
    pub fn parse(var_type: VarType, text: &str) -> Result<Self> {
        match var_type {
            VarType::Int => text
                .trim()
                .parse()
                .map(Self::Int)
                .map_err(|e| SnpxError::out_of_range(format!("invalid INT {text:?}: {e}"))),
            VarType::Real => text
                .trim()
                .parse()
                .map(Self::Real)
                .map_err(|e| SnpxError::out_of_range(format!("invalid REAL {text:?}: {e}"))),
            VarType::String => Ok(Self::String(text.to_string())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
        }
    }
}

fn block(cells: u16) -> Vec<u8> {
    Vec::with_capacity(cells as usize * SLOT_BYTES)
}

fn pad(mut out: Vec<u8>, cells: u16) -> Vec<u8> {
    out.resize(cells as usize * SLOT_BYTES, 0);
    out
}

fn require(data: &[u8], len: usize, what: &str) -> Result<()> {
    if data.len() < len {
        return Err(SnpxError::malformed(format!(
            "{what} needs {len} bytes, reply carried {}",
            data.len()
        )));
    }
    Ok(())
}

fn encode_int(value: &Value, cells: u16) -> Result<Vec<u8>> {
    let Value::Int(v) = value else {
        return Err(SnpxError::TypeMismatch {
            expected: VarType::Int,
            found: value.var_type(),
        });
    };
    let mut out = block(cells);
    out.put_i32_le(*v);
    Ok(pad(out, cells))
}

fn decode_int(mut data: &[u8]) -> Result<Value> {
    require(data, 4, "INT")?;
    Ok(Value::Int(data.get_i32_le()))
}

fn encode_real(value: &Value, cells: u16) -> Result<Vec<u8>> {
    let Value::Real(v) = value else {
        return Err(SnpxError::TypeMismatch {
            expected: VarType::Real,
            found: value.var_type(),
        });
    };
    let mut out = block(cells);
    out.put_f32_le(*v);
    Ok(pad(out, cells))
}

fn decode_real(mut data: &[u8]) -> Result<Value> {
    require(data, 4, "REAL")?;
    Ok(Value::Real(data.get_f32_le()))
}

fn encode_string(value: &Value, cells: u16) -> Result<Vec<u8>> {
    let Value::String(text) = value else {
        return Err(SnpxError::TypeMismatch {
            expected: VarType::String,
            found: value.var_type(),
        });
    };
    let capacity = cells as usize * SLOT_BYTES;
    if !text.is_ascii() {
        return Err(SnpxError::out_of_range(format!(
            "STRING value {text:?} is not ASCII"
        )));
    }
    if text.len() > capacity {
        return Err(SnpxError::out_of_range(format!(
            "STRING value is {} bytes, block holds {capacity}",
            text.len()
        )));
    }
    let mut out = block(cells);
    out.put_slice(text.as_bytes());
    Ok(pad(out, cells))
}

fn decode_string(data: &[u8]) -> Result<Value> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let raw = &data[..end];
    if !raw.is_ascii() {
        return Err(SnpxError::malformed("STRING block contains non-ASCII bytes"));
    }
    Ok(Value::String(String::from_utf8_lossy(raw).into_owned()))
}

/// Decode consecutive little-endian f32 cells
pub fn decode_reals(mut data: &[u8], count: usize) -> Result<Vec<f32>> {
    require(data, count * 4, "REAL block")?;
    Ok((0..count).map(|_| data.get_f32_le()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_layout() {
        let bytes = VarType::Int.encode(&Value::Int(-2), 1).unwrap();
        assert_eq!(bytes, vec![0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(VarType::Int.decode(&bytes).unwrap(), Value::Int(-2));
    }

    #[test]
    fn test_real_layout() {
        let bytes = VarType::Real.encode(&Value::Real(1200.13), 1).unwrap();
        assert_eq!(bytes, 1200.13f32.to_le_bytes().to_vec());

        match VarType::Real.decode(&bytes).unwrap() {
            Value::Real(v) => assert!((v - 1200.13).abs() < 1e-3),
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_array_cells_are_padded() {
        let bytes = VarType::Real.encode(&Value::Real(1.0), 3).unwrap();
        assert_eq!(bytes.len(), 12);
        assert!(bytes[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_string_block() {
        let bytes = VarType::String
            .encode(&Value::String("HELLO".into()), STRING_SLOTS)
            .unwrap();
        assert_eq!(bytes.len(), STRING_SLOTS as usize * SLOT_BYTES);
        assert_eq!(&bytes[..5], b"HELLO");
        assert_eq!(
            VarType::String.decode(&bytes).unwrap(),
            Value::String("HELLO".into())
        );
    }

    #[test]
    fn test_string_too_long() {
        let text = "X".repeat(41);
        let err = VarType::String
            .encode(&Value::String(text), STRING_SLOTS)
            .unwrap_err();
        assert!(matches!(err, SnpxError::OutOfRange(_)));
    }

    #[test]
    fn test_type_mismatch() {
        let err = VarType::Int.encode(&Value::Real(1.0), 1).unwrap_err();
        assert!(matches!(
            err,
            SnpxError::TypeMismatch {
                expected: VarType::Int,
                found: VarType::Real
            }
        ));
    }

    #[test]
    fn test_short_reply_is_malformed() {
        assert!(matches!(
            VarType::Real.decode(&[0x00, 0x01]),
            Err(SnpxError::MalformedPacket(_))
        ));
        assert!(matches!(
            decode_reals(&[0u8; 8], 3),
            Err(SnpxError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_parse_values() {
        assert_eq!("REAL".parse::<VarType>().unwrap(), VarType::Real);
        assert_eq!(Value::parse(VarType::Int, " 42 ").unwrap(), Value::Int(42));
        assert!(Value::parse(VarType::Int, "4.2").is_err());
    }
}
