use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::protocol::error::DecodeError;

/// How the raw words of a register map onto a value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RegisterEncoding {
    SignedTenths,
    UnsignedTenths,
    UnsignedHundredths,
    SignedInt16,
    UnsignedInt16,
    UnsignedInt32,
    SignedInt32,
    RawBits,
    /// Packed string over `n` registers, two characters per word.
    Ascii(u8),
}

impl RegisterEncoding {
    /// Number of 16-bit words the encoding spans.
    pub fn width(&self) -> usize {
        match self {
            RegisterEncoding::UnsignedInt32 | RegisterEncoding::SignedInt32 => 2,
            RegisterEncoding::Ascii(n) => (*n).max(1) as usize,
            _ => 1,
        }
    }

    /// Bit-level encodings may share an address with a numeric one.
    pub fn is_raw_bits(&self) -> bool {
        matches!(self, RegisterEncoding::RawBits)
    }
}

/// Last decoded value of a register. Never partially written.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RegisterValue {
    #[default]
    Unset,
    Float(f64),
    Integer(i64),
    Text(String),
}

impl RegisterValue {
    pub fn is_set(&self) -> bool {
        !matches!(self, RegisterValue::Unset)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RegisterValue::Float(v) => Some(*v),
            RegisterValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RegisterValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RegisterValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterValue::Unset => write!(f, "unset"),
            RegisterValue::Float(v) => write!(f, "{v:.2}"),
            RegisterValue::Integer(v) => write!(f, "{v}"),
            RegisterValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Decode `words`, starting at the register at `address`, with `encoding`.
pub fn decode(
    address: u16,
    words: &[u16],
    encoding: RegisterEncoding,
) -> Result<RegisterValue, DecodeError> {
    let needed = encoding.width();
    if words.len() < needed {
        return Err(DecodeError::Width {
            address,
            needed,
            available: words.len(),
        });
    }

    let value = match encoding {
        RegisterEncoding::SignedTenths => RegisterValue::Float(words[0] as i16 as f64 / 10.0),
        RegisterEncoding::UnsignedTenths => RegisterValue::Float(words[0] as f64 / 10.0),
        RegisterEncoding::UnsignedHundredths => RegisterValue::Float(words[0] as f64 / 100.0),
        RegisterEncoding::SignedInt16 => RegisterValue::Integer(words[0] as i16 as i64),
        RegisterEncoding::UnsignedInt16 | RegisterEncoding::RawBits => {
            RegisterValue::Integer(words[0] as i64)
        }
        RegisterEncoding::UnsignedInt32 => RegisterValue::Integer(combine_u32(words) as i64),
        RegisterEncoding::SignedInt32 => RegisterValue::Integer(combine_u32(words) as i32 as i64),
        RegisterEncoding::Ascii(n) => RegisterValue::Text(decode_ascii(&words[..n as usize])),
    };
    Ok(value)
}

/// High word first.
fn combine_u32(words: &[u16]) -> u32 {
    ((words[0] as u32) << 16) | words[1] as u32
}

fn decode_ascii(words: &[u16]) -> String {
    let bytes: Vec<u8> = words
        .iter()
        .flat_map(|w| w.to_be_bytes())
        .filter(|b| *b != 0)
        .collect();
    String::from_utf8_lossy(&bytes).trim().to_string()
}

/// True when any bit of `mask` is set in `word`.
pub fn extract_bits(word: u16, mask: u16) -> bool {
    word & mask != 0
}

/// Masked field of `word`, shifted down.
pub fn extract_field(word: u16, mask: u16, shift: u8) -> u16 {
    (word & mask) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_tenths() {
        assert_eq!(
            decode(1111, &[0xFF9C], RegisterEncoding::SignedTenths).unwrap(),
            RegisterValue::Float(-10.0)
        );
        assert_eq!(
            decode(1111, &[0x8000], RegisterEncoding::SignedTenths).unwrap(),
            RegisterValue::Float(-3276.8)
        );
        assert_eq!(
            decode(1111, &[0x7FFF], RegisterEncoding::SignedTenths).unwrap(),
            RegisterValue::Float(3276.7)
        );
    }

    #[test]
    fn test_signed_tenths_matches_division_for_all_words() {
        for raw in i16::MIN..=i16::MAX {
            let value = decode(0, &[raw as u16], RegisterEncoding::SignedTenths).unwrap();
            assert_eq!(value, RegisterValue::Float(raw as f64 / 10.0));
        }
    }

    #[test]
    fn test_unsigned_encodings() {
        assert_eq!(
            decode(0, &[0xFF9C], RegisterEncoding::UnsignedTenths).unwrap(),
            RegisterValue::Float(6552.4)
        );
        assert_eq!(
            decode(0, &[0xFF9C], RegisterEncoding::UnsignedInt16).unwrap(),
            RegisterValue::Integer(65436)
        );
        assert_eq!(
            decode(0, &[0xFF9C], RegisterEncoding::SignedInt16).unwrap(),
            RegisterValue::Integer(-100)
        );
        assert_eq!(
            decode(2, &[305], RegisterEncoding::UnsignedHundredths).unwrap(),
            RegisterValue::Float(3.05)
        );
    }

    #[test]
    fn test_32_bit_word_order() {
        assert_eq!(
            decode(1146, &[0x0001, 0x0000], RegisterEncoding::UnsignedInt32).unwrap(),
            RegisterValue::Integer(65536)
        );
        assert_eq!(
            decode(1154, &[0xFFFF, 0xFFFE], RegisterEncoding::SignedInt32).unwrap(),
            RegisterValue::Integer(-2)
        );
        assert_eq!(
            decode(1146, &[0xFFFF, 0xFFFF], RegisterEncoding::UnsignedInt32).unwrap(),
            RegisterValue::Integer(u32::MAX as i64)
        );
    }

    #[test]
    fn test_width_mismatch() {
        assert_eq!(
            decode(1146, &[0x0001], RegisterEncoding::UnsignedInt32),
            Err(DecodeError::Width {
                address: 1146,
                needed: 2,
                available: 1
            })
        );
    }

    #[test]
    fn test_ascii() {
        let words = [0x4142, 0x4344, 0x2020, 0x0000];
        assert_eq!(
            decode(92, &words, RegisterEncoding::Ascii(4)).unwrap(),
            RegisterValue::Text("ABCD".to_string())
        );
    }

    #[test]
    fn test_extract_bits_register_30() {
        assert!(extract_bits(0x0005, 0x01));
        assert!(extract_bits(0x0005, 0x04));
        assert!(!extract_bits(0x0005, 0x02));
        assert_eq!(extract_field(0x0500, 0x0700, 8), 5);
    }

    #[test]
    fn test_encoding_names() {
        assert_eq!(
            "signed_tenths".parse::<RegisterEncoding>().unwrap(),
            RegisterEncoding::SignedTenths
        );
        assert_eq!(RegisterEncoding::UnsignedInt32.to_string(), "unsigned_int32");
        assert_eq!(RegisterEncoding::UnsignedInt32.width(), 2);
    }
}
