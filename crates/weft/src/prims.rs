//! Minimal reference operator set.
//!
//! The real operator library is an external collaborator; these primitives
//! exist so the pipeline has concrete symbols with honest shape inference to
//! record, rewrite, and partition. Meta functions only manipulate metadata.
//! Eager implementations cover plain numbers, enough for symbols invoked
//! outside any recording context.

use anyhow::Result;
use once_cell::sync::Lazy;

use crate::error::UnsupportedOpError;
use crate::trace::{
    Args, DType, Device, Number, OpTags, ProxyMeta, ProxySource, ScalarKind, Symbol, SymbolRef,
    TensorMeta, Value,
};

fn tensor_meta_of(value: &Value) -> Option<TensorMeta> {
    match value {
        Value::Proxy(proxy) => proxy.tensor_meta().cloned(),
        Value::Tensor(arg) => Some(arg.meta.clone()),
        _ => None,
    }
}

fn unsupported(symbol: &str, detail: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(UnsupportedOpError::new(symbol, detail))
}

/// Shared inference for elementwise binary arithmetic: tensor/tensor needs
/// matching metadata, tensor/number adopts the tensor's metadata (promoting
/// integer tensors to f32 under a float number), number/number promotes to
/// float if either side is float.
fn elementwise_meta(symbol: &str, args: &Args, src: &mut dyn ProxySource) -> Result<Value> {
    let lhs = args
        .operand(0, "lhs")
        .ok_or_else(|| unsupported(symbol, "a call without a left operand"))?;
    let rhs = args
        .operand(1, "rhs")
        .ok_or_else(|| unsupported(symbol, "a call without a right operand"))?;

    match (tensor_meta_of(lhs), tensor_meta_of(rhs)) {
        (Some(a), Some(b)) => {
            if a.shape != b.shape {
                return Err(unsupported(
                    symbol,
                    format!("mismatched operand shapes {:?} and {:?}", a.shape, b.shape),
                ));
            }
            if a.dtype != b.dtype || a.device != b.device {
                return Err(unsupported(
                    symbol,
                    format!("mixed operand metadata {a} and {b}"),
                ));
            }
            Ok(Value::Proxy(src.fresh(ProxyMeta::Tensor(a))?))
        }
        (Some(meta), None) | (None, Some(meta)) => {
            let number = if tensor_meta_of(lhs).is_some() { rhs } else { lhs };
            let Value::Number(number) = number else {
                return Err(unsupported(
                    symbol,
                    format!("operand `{number}` alongside a tensor"),
                ));
            };
            let dtype = match number.kind() {
                ScalarKind::Float if !meta.dtype.is_float() => DType::F32,
                _ => meta.dtype,
            };
            let meta = TensorMeta::new(meta.shape, dtype, meta.device);
            Ok(Value::Proxy(src.fresh(ProxyMeta::Tensor(meta))?))
        }
        (None, None) => match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => {
                let kind = match (a.kind(), b.kind()) {
                    (ScalarKind::Float, _) | (_, ScalarKind::Float) => ScalarKind::Float,
                    _ => ScalarKind::Int,
                };
                Ok(Value::Proxy(src.fresh(ProxyMeta::Scalar(kind))?))
            }
            _ => Err(unsupported(
                symbol,
                format!("operands `{lhs}` and `{rhs}`"),
            )),
        },
    }
}

fn number_operands(symbol: &str, args: &Args) -> Result<(Number, Number), UnsupportedOpError> {
    let lhs = args.operand(0, "lhs");
    let rhs = args.operand(1, "rhs");
    match (lhs, rhs) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => Ok((*a, *b)),
        _ => Err(UnsupportedOpError::new(
            symbol,
            "direct execution on non-number arguments",
        )),
    }
}

fn eager_arith(
    symbol: &'static str,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
    args: &Args,
) -> Result<Value, UnsupportedOpError> {
    let (a, b) = number_operands(symbol, args)?;
    let result = match (a, b) {
        (Number::Int(x), Number::Int(y)) => Number::Int(int_op(x, y)),
        (Number::Int(x), Number::Float(y)) => Number::Float(float_op(x as f64, y)),
        (Number::Float(x), Number::Int(y)) => Number::Float(float_op(x, y as f64)),
        (Number::Float(x), Number::Float(y)) => Number::Float(float_op(x, y)),
        _ => {
            return Err(UnsupportedOpError::new(
                symbol,
                "direct execution on boolean arguments",
            ))
        }
    };
    Ok(Value::Number(result))
}

fn add_meta(args: &Args, src: &mut dyn ProxySource) -> Result<Value> {
    elementwise_meta("add", args, src)
}

fn sub_meta(args: &Args, src: &mut dyn ProxySource) -> Result<Value> {
    elementwise_meta("sub", args, src)
}

fn mul_meta(args: &Args, src: &mut dyn ProxySource) -> Result<Value> {
    elementwise_meta("mul", args, src)
}

fn add_eager(args: &Args) -> Result<Value, UnsupportedOpError> {
    eager_arith("add", |a, b| a.wrapping_add(b), |a, b| a + b, args)
}

fn sub_eager(args: &Args) -> Result<Value, UnsupportedOpError> {
    eager_arith("sub", |a, b| a.wrapping_sub(b), |a, b| a - b, args)
}

fn mul_eager(args: &Args) -> Result<Value, UnsupportedOpError> {
    eager_arith("mul", |a, b| a.wrapping_mul(b), |a, b| a * b, args)
}

fn matmul_meta(args: &Args, src: &mut dyn ProxySource) -> Result<Value> {
    let symbol = "matmul";
    let lhs = args
        .operand(0, "lhs")
        .and_then(tensor_meta_of)
        .ok_or_else(|| unsupported(symbol, "a non-tensor left operand"))?;
    let rhs = args
        .operand(1, "rhs")
        .and_then(tensor_meta_of)
        .ok_or_else(|| unsupported(symbol, "a non-tensor right operand"))?;

    if lhs.rank() != 2 || rhs.rank() != 2 {
        return Err(unsupported(
            symbol,
            format!("ranks {} and {}; only rank-2 operands", lhs.rank(), rhs.rank()),
        ));
    }
    if lhs.shape[1] != rhs.shape[0] {
        return Err(unsupported(
            symbol,
            format!(
                "contraction between {:?} and {:?}",
                lhs.shape, rhs.shape
            ),
        ));
    }
    if lhs.dtype != rhs.dtype || lhs.device != rhs.device {
        return Err(unsupported(
            symbol,
            format!("mixed operand metadata {lhs} and {rhs}"),
        ));
    }

    let meta = TensorMeta::new(vec![lhs.shape[0], rhs.shape[1]], lhs.dtype, lhs.device);
    Ok(Value::Proxy(src.fresh(ProxyMeta::Tensor(meta))?))
}

fn transpose_meta(args: &Args, src: &mut dyn ProxySource) -> Result<Value> {
    let symbol = "transpose";
    let input = args
        .operand(0, "input")
        .and_then(tensor_meta_of)
        .ok_or_else(|| unsupported(symbol, "a non-tensor operand"))?;

    let perm: Vec<usize> = match args.operand(1, "perm") {
        None => (0..input.rank()).rev().collect(),
        Some(Value::Seq(items)) => {
            let mut perm = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Number(Number::Int(axis)) if *axis >= 0 => perm.push(*axis as usize),
                    other => {
                        return Err(unsupported(symbol, format!("permutation entry `{other}`")))
                    }
                }
            }
            perm
        }
        Some(other) => return Err(unsupported(symbol, format!("permutation `{other}`"))),
    };

    let mut seen = vec![false; input.rank()];
    if perm.len() != input.rank()
        || perm.iter().any(|&axis| {
            axis >= input.rank() || std::mem::replace(&mut seen[axis], true)
        })
    {
        return Err(unsupported(
            symbol,
            format!("permutation {:?} of a rank-{} tensor", perm, input.rank()),
        ));
    }

    let shape: Vec<usize> = perm.iter().map(|&axis| input.shape[axis]).collect();
    let meta = TensorMeta::new(shape, input.dtype, input.device);
    Ok(Value::Proxy(src.fresh(ProxyMeta::Tensor(meta))?))
}

fn reshape_meta(args: &Args, src: &mut dyn ProxySource) -> Result<Value> {
    let symbol = "reshape";
    let input = args
        .operand(0, "input")
        .and_then(tensor_meta_of)
        .ok_or_else(|| unsupported(symbol, "a non-tensor operand"))?;
    let shape = match args.operand(1, "shape") {
        Some(Value::Seq(items)) => {
            let mut dims = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Number(Number::Int(dim)) if *dim >= 0 => dims.push(*dim as usize),
                    other => return Err(unsupported(symbol, format!("shape entry `{other}`"))),
                }
            }
            dims
        }
        _ => return Err(unsupported(symbol, "a call without a target shape")),
    };

    let target: usize = shape.iter().product();
    if target != input.num_elements() {
        return Err(unsupported(
            symbol,
            format!(
                "reshaping {} elements into shape {:?}",
                input.num_elements(),
                shape
            ),
        ));
    }

    let meta = TensorMeta::new(shape, input.dtype, input.device);
    Ok(Value::Proxy(src.fresh(ProxyMeta::Tensor(meta))?))
}

fn uniform_meta(args: &Args, src: &mut dyn ProxySource) -> Result<Value> {
    let symbol = "uniform";
    let shape = match args.operand(0, "shape") {
        Some(Value::Seq(items)) => {
            let mut dims = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Number(Number::Int(dim)) if *dim >= 0 => dims.push(*dim as usize),
                    other => return Err(unsupported(symbol, format!("shape entry `{other}`"))),
                }
            }
            dims
        }
        _ => return Err(unsupported(symbol, "a call without a shape")),
    };

    let meta = TensorMeta::new(shape, DType::F32, Device::Cpu);
    Ok(Value::Proxy(src.fresh(ProxyMeta::Tensor(meta))?))
}

pub fn add() -> SymbolRef {
    static SYM: Lazy<SymbolRef> =
        Lazy::new(|| Symbol::register("add", OpTags::NONE, add_meta, Some(add_eager)));
    SYM.clone()
}

pub fn sub() -> SymbolRef {
    static SYM: Lazy<SymbolRef> =
        Lazy::new(|| Symbol::register("sub", OpTags::NONE, sub_meta, Some(sub_eager)));
    SYM.clone()
}

pub fn mul() -> SymbolRef {
    static SYM: Lazy<SymbolRef> =
        Lazy::new(|| Symbol::register("mul", OpTags::NONE, mul_meta, Some(mul_eager)));
    SYM.clone()
}

pub fn matmul() -> SymbolRef {
    static SYM: Lazy<SymbolRef> =
        Lazy::new(|| Symbol::register("matmul", OpTags::NONE, matmul_meta, None));
    SYM.clone()
}

pub fn transpose() -> SymbolRef {
    static SYM: Lazy<SymbolRef> =
        Lazy::new(|| Symbol::register("transpose", OpTags::LAYOUT, transpose_meta, None));
    SYM.clone()
}

pub fn reshape() -> SymbolRef {
    static SYM: Lazy<SymbolRef> =
        Lazy::new(|| Symbol::register("reshape", OpTags::LAYOUT, reshape_meta, None));
    SYM.clone()
}

/// Random initialization; tagged side-effecting so dead-code elimination
/// never drops a draw that advances generator state.
pub fn uniform() -> SymbolRef {
    static SYM: Lazy<SymbolRef> =
        Lazy::new(|| Symbol::register("uniform", OpTags::SIDE_EFFECTS, uniform_meta, None));
    SYM.clone()
}
