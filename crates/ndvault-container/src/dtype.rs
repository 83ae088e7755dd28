//! Element types, scalar values and the `Element` trait.
//!
//! Cells are stored little-endian. `Scalar` is the loosely typed value used
//! for fill values and single-cell reads; it compares NaN equal to NaN so that
//! a NaN fill value behaves like any other sentinel.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::{ContainerError, Result};

/// Numeric element type of an array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Int8,
    Int16,
    Int32,
    #[serde(alias = "int")]
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    #[serde(alias = "float")]
    Float64,
}

impl DType {
    /// Size of one element in bytes
    pub const fn size(self) -> usize {
        match self {
            DType::Int8 | DType::UInt8 => 1,
            DType::Int16 | DType::UInt16 => 2,
            DType::Int32 | DType::UInt32 | DType::Float32 => 4,
            DType::Int64 | DType::UInt64 | DType::Float64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    /// Decode the element at the start of `bytes`.
    pub(crate) fn decode(self, bytes: &[u8]) -> Scalar {
        match self {
            DType::Int8 => i8::read_le(bytes).to_scalar(),
            DType::Int16 => i16::read_le(bytes).to_scalar(),
            DType::Int32 => i32::read_le(bytes).to_scalar(),
            DType::Int64 => i64::read_le(bytes).to_scalar(),
            DType::UInt8 => u8::read_le(bytes).to_scalar(),
            DType::UInt16 => u16::read_le(bytes).to_scalar(),
            DType::UInt32 => u32::read_le(bytes).to_scalar(),
            DType::UInt64 => u64::read_le(bytes).to_scalar(),
            DType::Float32 => f32::read_le(bytes).to_scalar(),
            DType::Float64 => f64::read_le(bytes).to_scalar(),
        }
    }

    /// Count elements in `bytes` equal to `value` (NaN-aware).
    pub(crate) fn count_equal(self, bytes: &[u8], value: Scalar) -> u64 {
        let size = self.size();
        // Integer encodings are canonical, so byte equality is value equality.
        if !self.is_float() {
            return match value.encode(self) {
                Ok(pattern) => bytes
                    .chunks_exact(size)
                    .filter(|cell| *cell == pattern.as_slice())
                    .count() as u64,
                Err(_) => 0,
            };
        }
        bytes
            .chunks_exact(size)
            .filter(|cell| self.decode(cell).matches(value))
            .count() as u64
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::UInt16 => "uint16",
            DType::UInt32 => "uint32",
            DType::UInt64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        };
        f.write_str(name)
    }
}

/// A single numeric value: fill values and single-cell reads.
#[derive(Debug, Clone, Copy)]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Scalar {
    pub fn is_nan(self) -> bool {
        matches!(self, Scalar::Float(v) if v.is_nan())
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Int(v) => v as f64,
            Scalar::UInt(v) => v as f64,
            Scalar::Float(v) => v,
        }
    }

    /// Numeric equality where NaN matches NaN.
    pub fn matches(self, other: Scalar) -> bool {
        match (self, other) {
            (Scalar::Int(a), Scalar::Int(b)) => a == b,
            (Scalar::UInt(a), Scalar::UInt(b)) => a == b,
            (Scalar::Int(a), Scalar::UInt(b)) | (Scalar::UInt(b), Scalar::Int(a)) => {
                a >= 0 && a as u64 == b
            }
            (a, b) => {
                let (a, b) = (a.as_f64(), b.as_f64());
                (a.is_nan() && b.is_nan()) || a == b
            }
        }
    }

    /// Encode this value as one element of `dtype`.
    ///
    /// Fails when the value is not representable (e.g. NaN as an integer,
    /// or `300` as `uint8`).
    pub fn encode(self, dtype: DType) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(dtype.size());
        let bad = || {
            ContainerError::Validation(format!("value {} is not representable as {}", self, dtype))
        };
        macro_rules! int {
            ($t:ty) => {{
                let v: $t = match self {
                    Scalar::Int(v) => <$t>::try_from(v).map_err(|_| bad())?,
                    Scalar::UInt(v) => <$t>::try_from(v).map_err(|_| bad())?,
                    Scalar::Float(v) => {
                        if v.fract() != 0.0 || !v.is_finite() {
                            return Err(bad());
                        }
                        let as_int = v as i128;
                        <$t>::try_from(as_int).map_err(|_| bad())?
                    }
                };
                v.write_le(&mut out);
            }};
        }
        match dtype {
            DType::Int8 => int!(i8),
            DType::Int16 => int!(i16),
            DType::Int32 => int!(i32),
            DType::Int64 => int!(i64),
            DType::UInt8 => int!(u8),
            DType::UInt16 => int!(u16),
            DType::UInt32 => int!(u32),
            DType::UInt64 => int!(u64),
            DType::Float32 => (self.as_f64() as f32).write_le(&mut out),
            DType::Float64 => self.as_f64().write_le(&mut out),
        }
        Ok(out)
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.matches(*other)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::UInt(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
        }
    }
}

// JSON cannot carry NaN or infinities, so those travel as strings.
impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match *self {
            Scalar::Int(v) => serializer.serialize_i64(v),
            Scalar::UInt(v) => serializer.serialize_u64(v),
            Scalar::Float(v) if v.is_nan() => serializer.serialize_str("NaN"),
            Scalar::Float(v) if v == f64::INFINITY => serializer.serialize_str("inf"),
            Scalar::Float(v) if v == f64::NEG_INFINITY => serializer.serialize_str("-inf"),
            Scalar::Float(v) => serializer.serialize_f64(v),
        }
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Int(i64),
            UInt(u64),
            Float(f64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Int(v) => Ok(Scalar::Int(v)),
            Repr::UInt(v) => Ok(Scalar::UInt(v)),
            Repr::Float(v) => Ok(Scalar::Float(v)),
            Repr::Text(s) => match s.to_ascii_lowercase().as_str() {
                "nan" => Ok(Scalar::Float(f64::NAN)),
                "inf" | "infinity" => Ok(Scalar::Float(f64::INFINITY)),
                "-inf" | "-infinity" => Ok(Scalar::Float(f64::NEG_INFINITY)),
                _ => Err(de::Error::custom(format!("invalid scalar value {:?}", s))),
            },
        }
    }
}

/// A Rust primitive that can be stored as an array element.
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: DType;

    fn write_le(self, out: &mut Vec<u8>);
    fn read_le(bytes: &[u8]) -> Self;
    fn to_scalar(self) -> Scalar;
}

macro_rules! impl_element {
    ($t:ty, $dtype:ident, $variant:ident, $wide:ty) => {
        impl Element for $t {
            const DTYPE: DType = DType::$dtype;

            #[inline]
            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(&bytes[..std::mem::size_of::<$t>()]);
                <$t>::from_le_bytes(buf)
            }

            #[inline]
            fn to_scalar(self) -> Scalar {
                Scalar::$variant(self as $wide)
            }
        }
    };
}

impl_element!(i8, Int8, Int, i64);
impl_element!(i16, Int16, Int, i64);
impl_element!(i32, Int32, Int, i64);
impl_element!(i64, Int64, Int, i64);
impl_element!(u8, UInt8, UInt, u64);
impl_element!(u16, UInt16, UInt, u64);
impl_element!(u32, UInt32, UInt, u64);
impl_element!(u64, UInt64, UInt, u64);
impl_element!(f32, Float32, Float, f64);
impl_element!(f64, Float64, Float, f64);
