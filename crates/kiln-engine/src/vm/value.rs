//! Runtime values

use kiln_bytecode::{Constant, Device, Tensor};
use std::fmt;
use std::sync::Arc;

use super::{VmError, VmResult};

/// A runtime value
///
/// Heap payloads are reference counted so that cloning values between the
/// operand stack, locals and module state is cheap.
#[derive(Debug, Clone)]
pub enum Value {
    /// The `None` value
    None,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Immutable string
    Str(Arc<str>),
    /// Dense tensor
    Tensor(Arc<Tensor>),
    /// Immutable tuple
    Tuple(Arc<[Value]>),
}

impl Value {
    /// Short type name, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Tensor(_) => "Tensor",
            Value::Tuple(_) => "tuple",
        }
    }

    /// Truthiness used by conditional jumps and `not`
    pub fn is_truthy(&self) -> VmResult<bool> {
        Ok(match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Tensor(t) => match t.data.as_slice() {
                [x] => *x != 0.0,
                _ => {
                    return Err(VmError::TypeError(format!(
                        "truth value of a tensor with {} elements is ambiguous",
                        t.numel()
                    )))
                }
            },
        })
    }

    /// Numeric value as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(x) => Some(*x),
            Value::Bool(b) => Some(*b as i64 as f64),
            _ => None,
        }
    }

    /// Integer value, if this is an int or bool
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Tensor payload
    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Tensor(t) => Some(t),
            _ => None,
        }
    }

    /// Convert a serialized constant
    pub fn from_constant(constant: &Constant) -> Self {
        match constant {
            Constant::None => Value::None,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(i) => Value::Int(*i),
            Constant::Float(x) => Value::Float(*x),
            Constant::Str(s) => Value::Str(Arc::from(s.as_str())),
            Constant::Tensor(t) => Value::Tensor(Arc::new(t.clone())),
            Constant::Tuple(items) => Value::Tuple(items.iter().map(Value::from_constant).collect()),
        }
    }

    /// Convert to a serializable constant
    pub fn to_constant(&self) -> Constant {
        match self {
            Value::None => Constant::None,
            Value::Bool(b) => Constant::Bool(*b),
            Value::Int(i) => Constant::Int(*i),
            Value::Float(x) => Constant::Float(*x),
            Value::Str(s) => Constant::Str(s.to_string()),
            Value::Tensor(t) => Constant::Tensor(Tensor::clone(t)),
            Value::Tuple(items) => Constant::Tuple(items.iter().map(Value::to_constant).collect()),
        }
    }

    /// Copy with every tensor placed on `device`
    pub fn to_device(&self, device: Device) -> Value {
        match self {
            Value::Tensor(t) if t.device != device => Value::Tensor(Arc::new(t.to_device(device))),
            Value::Tuple(items) => Value::Tuple(items.iter().map(|v| v.to_device(device)).collect()),
            other => other.clone(),
        }
    }

    /// Visit every tensor, including those nested in tuples
    pub fn for_each_tensor(&self, f: &mut impl FnMut(&Tensor)) {
        match self {
            Value::Tensor(t) => f(t),
            Value::Tuple(items) => items.iter().for_each(|v| v.for_each_tensor(f)),
            _ => {}
        }
    }
}

/// Structural equality; ints and floats compare numerically
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tensor(a), Value::Tensor(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Tensor> for Value {
    fn from(t: Tensor) -> Self {
        Value::Tensor(Arc::new(t))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Tuple(Arc::from(items))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => f.write_str(s),
            Value::Tensor(t) => {
                write!(f, "tensor({:?}, shape={:?}", t.data, t.shape)?;
                if t.device != Device::Cpu {
                    write!(f, ", device={}", t.device)?;
                }
                f.write_str(")")
            }
            Value::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_conversion() {
        let constant = Constant::Tuple(vec![
            Constant::Int(1),
            Constant::Str("a".to_string()),
            Constant::Tensor(Tensor::from_vec(vec![1.0])),
        ]);
        let value = Value::from_constant(&constant);
        assert_eq!(value.to_constant(), constant);
    }

    #[test]
    fn test_numeric_equality() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Int(1), Value::Bool(true));
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::None.is_truthy().unwrap());
        assert!(Value::from("x").is_truthy().unwrap());
        assert!(!Value::from(Vec::new()).is_truthy().unwrap());
        assert!(Value::from(Tensor::from_vec(vec![2.0])).is_truthy().unwrap());
        assert!(Value::from(Tensor::zeros(2)).is_truthy().is_err());
    }

    #[test]
    fn test_to_device_recurses() {
        let value = Value::from(vec![Value::Int(1), Value::from(Tensor::zeros(2))]);
        let moved = value.to_device(Device::Mps);
        let mut devices = Vec::new();
        moved.for_each_tensor(&mut |t| devices.push(t.device));
        assert_eq!(devices, vec![Device::Mps]);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::from(vec![Value::Int(1)]).to_string(), "(1,)");
    }
}
