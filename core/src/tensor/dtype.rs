//! Element data types understood by the eager runtime.
//!
//! `DType` is the framework-side type tag carried by blob descriptors and
//! tensor definitions. Host tensors always carry one of the concrete numeric
//! types; `OFRecord` and `TensorBuffer` only ever appear on the runtime side
//! and cannot be fed from host memory.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::tensor::{Result, TensorError};

/// Framework element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Char,
    Float16,
    Float32,
    Float64,
    Int8,
    Int32,
    Int64,
    #[serde(rename = "uint8")]
    UInt8,
    #[serde(rename = "record")]
    OFRecord,
    TensorBuffer,
}

impl DType {
    /// Size of one element in bytes.
    ///
    /// Opaque runtime types have no fixed element size and are rejected.
    pub fn bytes(&self) -> Result<usize> {
        match self {
            DType::Char | DType::Int8 | DType::UInt8 => Ok(1),
            DType::Float16 => Ok(2),
            DType::Float32 | DType::Int32 => Ok(4),
            DType::Float64 | DType::Int64 => Ok(8),
            DType::OFRecord | DType::TensorBuffer => Err(TensorError::UnsupportedDType(*self)),
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            DType::Char
                | DType::Float16
                | DType::Float32
                | DType::Float64
                | DType::Int8
                | DType::Int32
                | DType::Int64
        )
    }

    pub fn is_floating_point(&self) -> bool {
        matches!(self, DType::Float16 | DType::Float32 | DType::Float64)
    }

    /// Whether host data of this type can be pushed into a blob.
    pub fn is_feedable(&self) -> bool {
        !matches!(self, DType::OFRecord | DType::TensorBuffer)
    }

    /// Canonical framework name (`oneflow.float32` style, without the prefix).
    pub fn name(&self) -> &'static str {
        match self {
            DType::Char => "char",
            DType::Float16 => "float16",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Int8 => "int8",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::OFRecord => "record",
            DType::TensorBuffer => "tensor_buffer",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oneflow.{}", self.name())
    }
}

impl FromStr for DType {
    type Err = TensorError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.strip_prefix("oneflow.").unwrap_or(s);
        match name {
            "char" => Ok(DType::Char),
            "float16" | "half" => Ok(DType::Float16),
            "float" | "float32" => Ok(DType::Float32),
            "double" | "float64" => Ok(DType::Float64),
            "int8" => Ok(DType::Int8),
            "int32" => Ok(DType::Int32),
            "int64" => Ok(DType::Int64),
            "uint8" => Ok(DType::UInt8),
            "record" => Ok(DType::OFRecord),
            "tensor_buffer" => Ok(DType::TensorBuffer),
            _ => Err(TensorError::UnknownDType(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_bytes() {
        assert_eq!(DType::Float32.bytes().unwrap(), 4);
        assert_eq!(DType::Float16.bytes().unwrap(), 2);
        assert_eq!(DType::Int64.bytes().unwrap(), 8);
        assert_eq!(DType::Char.bytes().unwrap(), 1);
        assert!(matches!(
            DType::OFRecord.bytes(),
            Err(TensorError::UnsupportedDType(DType::OFRecord))
        ));
    }

    #[test]
    fn test_dtype_flags() {
        assert!(DType::Float64.is_floating_point());
        assert!(!DType::Int32.is_floating_point());
        assert!(!DType::UInt8.is_signed());
        assert!(DType::Int8.is_signed());
        assert!(!DType::TensorBuffer.is_feedable());
    }

    #[test]
    fn test_dtype_aliases() {
        assert_eq!("float".parse::<DType>().unwrap(), DType::Float32);
        assert_eq!("oneflow.double".parse::<DType>().unwrap(), DType::Float64);
        assert_eq!(DType::Float32.to_string(), "oneflow.float32");
        assert!("complex64".parse::<DType>().is_err());
    }

    #[test]
    fn test_dtype_serde_names() {
        let json = serde_json::to_string(&DType::OFRecord).unwrap();
        assert_eq!(json, "\"record\"");
        let back: DType = serde_json::from_str("\"uint8\"").unwrap();
        assert_eq!(back, DType::UInt8);
    }
}
