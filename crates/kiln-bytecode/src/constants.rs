//! Constant pool for bytecode modules

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::tensor::{element_count, Device, Tensor};
use serde::{Deserialize, Serialize};

/// Maximum tuple nesting accepted by the decoder
pub const MAX_CONSTANT_DEPTH: usize = 64;

mod tag {
    pub const NONE: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const INT: u8 = 2;
    pub const FLOAT: u8 = 3;
    pub const STR: u8 = 4;
    pub const TENSOR: u8 = 5;
    pub const TUPLE: u8 = 6;
}

/// A serializable constant value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    /// The `None` value
    None,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// UTF-8 string
    Str(String),
    /// Dense tensor
    Tensor(Tensor),
    /// Fixed-size heterogeneous tuple
    Tuple(Vec<Constant>),
}

impl Constant {
    /// Short type name, used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Constant::None => "None",
            Constant::Bool(_) => "bool",
            Constant::Int(_) => "int",
            Constant::Float(_) => "float",
            Constant::Str(_) => "str",
            Constant::Tensor(_) => "Tensor",
            Constant::Tuple(_) => "tuple",
        }
    }

    /// Encode this constant as a tagged value
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        match self {
            Constant::None => writer.emit_u8(tag::NONE),
            Constant::Bool(b) => {
                writer.emit_u8(tag::BOOL);
                writer.emit_u8(*b as u8);
            }
            Constant::Int(i) => {
                writer.emit_u8(tag::INT);
                writer.emit_i64(*i);
            }
            Constant::Float(f) => {
                writer.emit_u8(tag::FLOAT);
                writer.emit_f64(*f);
            }
            Constant::Str(s) => {
                writer.emit_u8(tag::STR);
                writer.emit_string(s);
            }
            Constant::Tensor(t) => {
                writer.emit_u8(tag::TENSOR);
                let (device, index) = t.device.tag();
                writer.emit_u8(device);
                writer.emit_u8(index);
                writer.emit_u32(t.shape.len() as u32);
                for &dim in &t.shape {
                    writer.emit_u64(dim as u64);
                }
                writer.emit_u32(t.data.len() as u32);
                for &x in &t.data {
                    writer.emit_f64(x);
                }
            }
            Constant::Tuple(items) => {
                writer.emit_u8(tag::TUPLE);
                writer.emit_u32(items.len() as u32);
                for item in items {
                    item.encode(writer);
                }
            }
        }
    }

    /// Decode a tagged value
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        Self::decode_nested(reader, 0)
    }

    fn decode_nested(reader: &mut BytecodeReader<'_>, depth: usize) -> Result<Self, DecodeError> {
        if depth > MAX_CONSTANT_DEPTH {
            return Err(DecodeError::NestingTooDeep(MAX_CONSTANT_DEPTH));
        }
        let offset = reader.position();
        let kind = reader.read_u8()?;
        let value = match kind {
            tag::NONE => Constant::None,
            tag::BOOL => Constant::Bool(reader.read_u8()? != 0),
            tag::INT => Constant::Int(reader.read_i64()?),
            tag::FLOAT => Constant::Float(reader.read_f64()?),
            tag::STR => Constant::Str(reader.read_string()?),
            tag::TENSOR => Constant::Tensor(decode_tensor(reader, offset)?),
            tag::TUPLE => {
                let count = reader.read_count(1)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(Self::decode_nested(reader, depth + 1)?);
                }
                Constant::Tuple(items)
            }
            other => {
                return Err(DecodeError::InvalidTag {
                    kind: "constant",
                    tag: other,
                    offset,
                })
            }
        };
        Ok(value)
    }
}

fn decode_tensor(reader: &mut BytecodeReader<'_>, offset: usize) -> Result<Tensor, DecodeError> {
    let device_tag = reader.read_u8()?;
    let device_index = reader.read_u8()?;
    let device =
        Device::from_tag(device_tag, device_index).ok_or(DecodeError::InvalidTag {
            kind: "device",
            tag: device_tag,
            offset: offset + 1,
        })?;

    let ndim = reader.read_count(8)?;
    let mut shape = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        let dim = reader.read_u64()?;
        shape.push(usize::try_from(dim).map_err(|_| DecodeError::InvalidValue {
            offset,
            reason: format!("dimension {dim} does not fit in usize"),
        })?);
    }

    let numel = reader.read_count(8)?;
    if element_count(&shape) != Some(numel) {
        return Err(DecodeError::InvalidValue {
            offset,
            reason: format!("shape {shape:?} does not hold {numel} elements"),
        });
    }
    let mut data = Vec::with_capacity(numel);
    for _ in 0..numel {
        data.push(reader.read_f64()?);
    }

    Ok(Tensor {
        shape,
        data,
        device,
    })
}

/// Ordered pool of constants referenced by index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
    /// Constants in index order
    pub values: Vec<Constant>,
}

impl ConstantPool {
    /// Create a new empty constant pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constant and return its index
    pub fn add(&mut self, value: Constant) -> u32 {
        let index = self.values.len();
        self.values.push(value);
        index as u32
    }

    /// Get a constant by index
    pub fn get(&self, index: u32) -> Option<&Constant> {
        self.values.get(index as usize)
    }

    /// Number of constants
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Encode the constant pool
    ///
    /// Format: count (u32) followed by tagged values
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.values.len() as u32);
        for value in &self.values {
            value.encode(writer);
        }
    }

    /// Decode the constant pool
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let count = reader.read_count(1)?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(Constant::decode(reader)?);
        }
        Ok(Self { values })
    }
}

impl From<Vec<Constant>> for ConstantPool {
    fn from(values: Vec<Constant>) -> Self {
        Self { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(pool: &ConstantPool) -> ConstantPool {
        let mut writer = BytecodeWriter::new();
        pool.encode(&mut writer);
        let bytes = writer.into_bytes();
        let mut reader = BytecodeReader::new(&bytes);
        let decoded = ConstantPool::decode(&mut reader).unwrap();
        assert!(!reader.has_more());
        decoded
    }

    #[test]
    fn test_pool_preserves_types_and_order() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.add(Constant::Int(1)), 0);
        assert_eq!(pool.add(Constant::Float(1.0)), 1);
        pool.add(Constant::Str("one".to_string()));
        pool.add(Constant::None);
        pool.add(Constant::Bool(true));

        let decoded = roundtrip(&pool);
        assert_eq!(decoded, pool);
        // Int(1) and Float(1.0) stay distinct
        assert_eq!(decoded.get(0), Some(&Constant::Int(1)));
        assert_eq!(decoded.get(1), Some(&Constant::Float(1.0)));
    }

    #[test]
    fn test_tensor_keeps_device() {
        let mut tensor = Tensor::with_shape(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        tensor.device = Device::Cuda(1);
        let pool = ConstantPool::from(vec![
            Constant::Tensor(tensor.clone()),
            Constant::Tuple(vec![Constant::Int(3), Constant::Tensor(tensor)]),
        ]);
        assert_eq!(roundtrip(&pool), pool);
    }

    #[test]
    fn test_invalid_tag() {
        let bytes = [1, 0, 0, 0, 0x7F];
        let mut reader = BytecodeReader::new(&bytes);
        assert!(matches!(
            ConstantPool::decode(&mut reader),
            Err(DecodeError::InvalidTag { tag: 0x7F, .. })
        ));
    }

    #[test]
    fn test_tensor_shape_mismatch_rejected() {
        let mut writer = BytecodeWriter::new();
        writer.emit_u8(5); // tensor
        writer.emit_u8(0);
        writer.emit_u8(0);
        writer.emit_u32(1);
        writer.emit_u64(3); // shape [3]
        writer.emit_u32(2); // but 2 elements
        writer.emit_f64(1.0);
        writer.emit_f64(2.0);
        let bytes = writer.into_bytes();
        let mut reader = BytecodeReader::new(&bytes);
        assert!(matches!(
            Constant::decode(&mut reader),
            Err(DecodeError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let mut writer = BytecodeWriter::new();
        for _ in 0..(MAX_CONSTANT_DEPTH + 2) {
            writer.emit_u8(6); // tuple
            writer.emit_u32(1);
        }
        writer.emit_u8(0);
        let bytes = writer.into_bytes();
        let mut reader = BytecodeReader::new(&bytes);
        assert_eq!(
            Constant::decode(&mut reader),
            Err(DecodeError::NestingTooDeep(MAX_CONSTANT_DEPTH))
        );
    }

    #[test]
    fn test_constants_json_shape() {
        let json = r#"[{"Int": 1}, "None", {"Tensor": {"shape": [2], "data": [0.5, 1.5], "device": "cuda:0"}}]"#;
        let values: Vec<Constant> = serde_json::from_str(json).unwrap();
        assert_eq!(values[0], Constant::Int(1));
        assert_eq!(values[1], Constant::None);
        match &values[2] {
            Constant::Tensor(t) => assert_eq!(t.device, Device::Cuda(0)),
            other => panic!("expected tensor, got {other:?}"),
        }
    }
}
