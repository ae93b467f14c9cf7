//! Operator library
//!
//! Named operators callable from source as `ops.name(...)` and from
//! bytecode through a function's operator table. Operators marked
//! non-portable exist only in the full runtime and are rejected by the
//! default lowering policy.

use crate::vm::{Value, VmError, VmResult};
use kiln_bytecode::Tensor;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::sync::{Arc, LazyLock};

/// Largest tensor `zeros` and `ones` will allocate
pub const MAX_TENSOR_ELEMENTS: usize = 1 << 26;

/// Native implementation of an operator
pub type OperatorFn = fn(&[Value]) -> VmResult<Value>;

/// Operator definition
#[derive(Debug, Clone, Copy)]
pub struct OperatorDef {
    /// Name used in source and operator tables
    pub name: &'static str,
    /// Fixed argument count
    pub arity: u8,
    /// Whether minimal runtimes provide this operator
    pub portable: bool,
    /// Implementation
    pub func: OperatorFn,
}

static OPERATORS: LazyLock<FxHashMap<&'static str, OperatorDef>> = LazyLock::new(|| {
    let defs = [
        def("add", 2, true, op_add),
        def("sub", 2, true, op_sub),
        def("mul", 2, true, op_mul),
        def("div", 2, true, op_div),
        def("rem", 2, true, op_rem),
        def("neg", 1, true, op_neg),
        def("round", 1, true, op_round),
        def("abs", 1, true, op_abs),
        def("relu", 1, true, op_relu),
        def("sum", 1, true, op_sum),
        def("mean", 1, true, op_mean),
        def("dot", 2, true, op_dot),
        def("zeros", 1, true, op_zeros),
        def("ones", 1, true, op_ones),
        def("numel", 1, true, op_numel),
        def("device", 1, true, op_device),
        def("float", 1, true, op_float),
        def("int", 1, true, op_int),
        def("len", 1, true, op_len),
        def("print", 1, false, op_print),
        // Versioned semantics kept for old bytecode
        def("_div_0_3", 2, true, op_div_0_3),
        def("_round_0_4", 1, true, op_round_0_4),
    ];
    defs.into_iter().map(|d| (d.name, d)).collect()
});

fn def(name: &'static str, arity: u8, portable: bool, func: OperatorFn) -> OperatorDef {
    OperatorDef {
        name,
        arity,
        portable,
        func,
    }
}

/// Look up an operator by name
pub fn lookup(name: &str) -> Option<&'static OperatorDef> {
    OPERATORS.get(name)
}

/// All operator names, sorted
pub fn names() -> Vec<&'static str> {
    let mut names: Vec<_> = OPERATORS.keys().copied().collect();
    names.sort_unstable();
    names
}

// ============================================================================
// Argument helpers
// ============================================================================

fn arity_error(name: &str, expected: usize, args: &[Value]) -> VmError {
    VmError::ArityMismatch {
        name: name.to_string(),
        expected,
        actual: args.len(),
    }
}

fn one<'a>(name: &str, args: &'a [Value]) -> VmResult<&'a Value> {
    match args {
        [a] => Ok(a),
        _ => Err(arity_error(name, 1, args)),
    }
}

fn two<'a>(name: &str, args: &'a [Value]) -> VmResult<(&'a Value, &'a Value)> {
    match args {
        [a, b] => Ok((a, b)),
        _ => Err(arity_error(name, 2, args)),
    }
}

fn type_error(name: &str, args: &[&Value]) -> VmError {
    let types: Vec<_> = args.iter().map(|v| v.type_name()).collect();
    VmError::TypeError(format!("'{name}' not supported for ({})", types.join(", ")))
}

fn expect_tensor<'a>(name: &str, value: &'a Value) -> VmResult<&'a Tensor> {
    value.as_tensor().ok_or_else(|| type_error(name, &[value]))
}

// ============================================================================
// Elementwise arithmetic
// ============================================================================

fn zip_tensors(a: &Tensor, b: &Tensor, f: impl Fn(f64, f64) -> f64) -> VmResult<Tensor> {
    if a.device != b.device {
        return Err(VmError::DeviceMismatch {
            left: a.device,
            right: b.device,
        });
    }
    if a.shape != b.shape {
        return Err(VmError::ShapeMismatch {
            left: a.shape.clone(),
            right: b.shape.clone(),
        });
    }
    Ok(Tensor {
        shape: a.shape.clone(),
        data: a.data.iter().zip(&b.data).map(|(&x, &y)| f(x, y)).collect(),
        device: a.device,
    })
}

/// Binary numeric operation with scalar broadcasting over tensors
fn numeric(
    name: &str,
    a: &Value,
    b: &Value,
    int_op: impl Fn(i64, i64) -> VmResult<Value>,
    float_op: impl Fn(f64, f64) -> f64,
) -> VmResult<Value> {
    match (a, b) {
        (Value::Tensor(x), Value::Tensor(y)) => Ok(zip_tensors(x, y, float_op)?.into()),
        (Value::Tensor(x), scalar) => {
            let s = scalar.as_f64().ok_or_else(|| type_error(name, &[a, b]))?;
            Ok(x.map(|e| float_op(e, s)).into())
        }
        (scalar, Value::Tensor(y)) => {
            let s = scalar.as_f64().ok_or_else(|| type_error(name, &[a, b]))?;
            Ok(y.map(|e| float_op(s, e)).into())
        }
        (Value::Float(_), _) | (_, Value::Float(_)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(Value::Float(float_op(x, y))),
            _ => Err(type_error(name, &[a, b])),
        },
        _ => match (a.as_int(), b.as_int()) {
            (Some(x), Some(y)) => int_op(x, y),
            _ => Err(type_error(name, &[a, b])),
        },
    }
}

/// `a + b`; also concatenates strings and tuples
pub fn add(a: &Value, b: &Value) -> VmResult<Value> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(Value::Str(Arc::from(format!("{x}{y}")))),
        (Value::Tuple(x), Value::Tuple(y)) => {
            Ok(Value::Tuple(x.iter().chain(y.iter()).cloned().collect()))
        }
        _ => numeric("add", a, b, |x, y| Ok(Value::Int(x.wrapping_add(y))), |x, y| x + y),
    }
}

/// `a - b`
pub fn sub(a: &Value, b: &Value) -> VmResult<Value> {
    numeric("sub", a, b, |x, y| Ok(Value::Int(x.wrapping_sub(y))), |x, y| x - y)
}

/// `a * b`
pub fn mul(a: &Value, b: &Value) -> VmResult<Value> {
    numeric("mul", a, b, |x, y| Ok(Value::Int(x.wrapping_mul(y))), |x, y| x * y)
}

/// True division: ints divide to a float
pub fn div(a: &Value, b: &Value) -> VmResult<Value> {
    numeric(
        "div",
        a,
        b,
        |x, y| {
            if y == 0 {
                return Err(VmError::DivisionByZero);
            }
            Ok(Value::Float(x as f64 / y as f64))
        },
        |x, y| x / y,
    )
}

/// Division as defined up to bytecode version 3: ints truncate toward zero
pub fn div_truncating(a: &Value, b: &Value) -> VmResult<Value> {
    numeric(
        "_div_0_3",
        a,
        b,
        |x, y| {
            if y == 0 {
                return Err(VmError::DivisionByZero);
            }
            Ok(Value::Int(x.wrapping_div(y)))
        },
        |x, y| x / y,
    )
}

/// `a % b`
pub fn rem(a: &Value, b: &Value) -> VmResult<Value> {
    numeric(
        "rem",
        a,
        b,
        |x, y| {
            if y == 0 {
                return Err(VmError::DivisionByZero);
            }
            Ok(Value::Int(x.wrapping_rem(y)))
        },
        |x, y| x % y,
    )
}

fn unary_numeric(
    name: &str,
    a: &Value,
    int_op: impl Fn(i64) -> i64,
    float_op: impl Fn(f64) -> f64,
) -> VmResult<Value> {
    match a {
        Value::Tensor(t) => Ok(t.map(float_op).into()),
        Value::Float(x) => Ok(Value::Float(float_op(*x))),
        Value::Int(_) | Value::Bool(_) => match a.as_int() {
            Some(i) => Ok(Value::Int(int_op(i))),
            None => Err(type_error(name, &[a])),
        },
        _ => Err(type_error(name, &[a])),
    }
}

/// `-a`
pub fn neg(a: &Value) -> VmResult<Value> {
    unary_numeric("neg", a, i64::wrapping_neg, |x| -x)
}

/// Ordering of two comparable values; `None` when unordered (NaN)
pub fn partial_cmp(a: &Value, b: &Value) -> VmResult<Option<Ordering>> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Some(x.cmp(y))),
        (Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(x.partial_cmp(&y)),
            _ => Err(VmError::TypeError(format!(
                "cannot order {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

// ============================================================================
// Operator implementations
// ============================================================================

fn op_add(args: &[Value]) -> VmResult<Value> {
    let (a, b) = two("add", args)?;
    add(a, b)
}

fn op_sub(args: &[Value]) -> VmResult<Value> {
    let (a, b) = two("sub", args)?;
    sub(a, b)
}

fn op_mul(args: &[Value]) -> VmResult<Value> {
    let (a, b) = two("mul", args)?;
    mul(a, b)
}

fn op_div(args: &[Value]) -> VmResult<Value> {
    let (a, b) = two("div", args)?;
    div(a, b)
}

fn op_div_0_3(args: &[Value]) -> VmResult<Value> {
    let (a, b) = two("_div_0_3", args)?;
    div_truncating(a, b)
}

fn op_rem(args: &[Value]) -> VmResult<Value> {
    let (a, b) = two("rem", args)?;
    rem(a, b)
}

fn op_neg(args: &[Value]) -> VmResult<Value> {
    neg(one("neg", args)?)
}

fn op_round(args: &[Value]) -> VmResult<Value> {
    unary_numeric("round", one("round", args)?, |i| i, f64::round_ties_even)
}

fn op_round_0_4(args: &[Value]) -> VmResult<Value> {
    unary_numeric("_round_0_4", one("_round_0_4", args)?, |i| i, f64::round)
}

fn op_abs(args: &[Value]) -> VmResult<Value> {
    unary_numeric("abs", one("abs", args)?, i64::wrapping_abs, f64::abs)
}

fn op_relu(args: &[Value]) -> VmResult<Value> {
    unary_numeric("relu", one("relu", args)?, |i| i.max(0), |x| x.max(0.0))
}

fn op_sum(args: &[Value]) -> VmResult<Value> {
    let t = expect_tensor("sum", one("sum", args)?)?;
    Ok(Value::Float(t.data.iter().sum()))
}

fn op_mean(args: &[Value]) -> VmResult<Value> {
    let t = expect_tensor("mean", one("mean", args)?)?;
    Ok(Value::Float(t.data.iter().sum::<f64>() / t.numel() as f64))
}

fn op_dot(args: &[Value]) -> VmResult<Value> {
    let (a, b) = two("dot", args)?;
    let (x, y) = (expect_tensor("dot", a)?, expect_tensor("dot", b)?);
    if x.shape.len() != 1 || y.shape.len() != 1 {
        return Err(VmError::TypeError("'dot' expects 1-D tensors".to_string()));
    }
    let product = zip_tensors(x, y, |p, q| p * q)?;
    Ok(Value::Float(product.data.iter().sum()))
}

fn shape_from(name: &str, value: &Value) -> VmResult<Vec<usize>> {
    let dim = |v: &Value| {
        v.as_int()
            .and_then(|i| usize::try_from(i).ok())
            .ok_or_else(|| VmError::TypeError(format!("'{name}' expects non-negative dimensions")))
    };
    match value {
        Value::Tuple(items) => items.iter().map(dim).collect(),
        other => Ok(vec![dim(other)?]),
    }
}

fn filled(name: &str, args: &[Value], fill: f64) -> VmResult<Value> {
    let shape = shape_from(name, one(name, args)?)?;
    let too_large = || VmError::RuntimeError(format!("'{name}' shape {shape:?} is too large"));
    let numel = kiln_bytecode::tensor::element_count(&shape)
        .filter(|&n| n <= MAX_TENSOR_ELEMENTS)
        .ok_or_else(too_large)?;
    let mut data = Vec::new();
    data.try_reserve_exact(numel).map_err(|_| too_large())?;
    data.resize(numel, fill);
    Tensor::with_shape(shape, data)
        .map(Value::from)
        .ok_or_else(|| VmError::RuntimeError(format!("'{name}' produced an invalid tensor")))
}

fn op_zeros(args: &[Value]) -> VmResult<Value> {
    filled("zeros", args, 0.0)
}

fn op_ones(args: &[Value]) -> VmResult<Value> {
    filled("ones", args, 1.0)
}

fn op_numel(args: &[Value]) -> VmResult<Value> {
    let t = expect_tensor("numel", one("numel", args)?)?;
    Ok(Value::Int(t.numel() as i64))
}

fn op_device(args: &[Value]) -> VmResult<Value> {
    let t = expect_tensor("device", one("device", args)?)?;
    Ok(Value::from(t.device.to_string().as_str()))
}

fn op_float(args: &[Value]) -> VmResult<Value> {
    let a = one("float", args)?;
    match a {
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| VmError::RuntimeError(format!("cannot convert {s:?} to float"))),
        other => other
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| type_error("float", &[other])),
    }
}

fn op_int(args: &[Value]) -> VmResult<Value> {
    let a = one("int", args)?;
    match a {
        Value::Float(x) => {
            let truncated = x.trunc();
            if !truncated.is_finite() || truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
                return Err(VmError::RuntimeError(format!("cannot convert {x:?} to int")));
            }
            Ok(Value::Int(truncated as i64))
        }
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| VmError::RuntimeError(format!("cannot convert {s:?} to int"))),
        other => other
            .as_int()
            .map(Value::Int)
            .ok_or_else(|| type_error("int", &[other])),
    }
}

fn op_len(args: &[Value]) -> VmResult<Value> {
    let a = one("len", args)?;
    let len = match a {
        Value::Str(s) => s.chars().count(),
        Value::Tuple(items) => items.len(),
        Value::Tensor(t) => *t
            .shape
            .first()
            .ok_or_else(|| VmError::TypeError("len() of a 0-d tensor".to_string()))?,
        other => return Err(type_error("len", &[other])),
    };
    Ok(Value::Int(len as i64))
}

fn op_print(args: &[Value]) -> VmResult<Value> {
    println!("{}", one("print", args)?);
    Ok(Value::None)
}
