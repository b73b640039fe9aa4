//! Operator, member and size semantics shared by every execution strategy.

use std::rc::Rc;

use super::{MAX_ARRAY_INDEX, Thrown, Value};
use crate::ir::{BinaryOp, UnaryOp};

type OpResult<T> = Result<T, Thrown>;

fn arithmetic_error(lhs: &Value, rhs: &Value) -> Thrown {
    Thrown::message(format!(
        "Attempt to perform arithmetic between {} and {}",
        lhs.type_name(),
        rhs.type_name()
    ))
}

fn comparison_error(lhs: &Value, rhs: &Value) -> Thrown {
    Thrown::message(format!("Attempt to compare {} and {}", lhs.type_name(), rhs.type_name()))
}

fn concat(lhs: &str, rhs: &str) -> Value {
    let mut s = String::with_capacity(lhs.len() + rhs.len());
    s.push_str(lhs);
    s.push_str(rhs);
    Value::String(Rc::from(s))
}

pub fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> OpResult<Value> {
    match op {
        BinaryOp::Add => add(lhs, rhs),
        BinaryOp::Sub => numeric(lhs, rhs, i64::wrapping_sub, |a, b| a - b),
        BinaryOp::Mul => mul(lhs, rhs),
        BinaryOp::Div => div(lhs, rhs),
        BinaryOp::Mod => rem(lhs, rhs),
        BinaryOp::Pow => numeric(lhs, rhs, |a, b| (a as f64).powf(b as f64) as i64, f64::powf),
        BinaryOp::Eq => Ok(Value::Boolean(equals(lhs, rhs))),
        BinaryOp::Neq => Ok(Value::Boolean(!equals(lhs, rhs))),
        BinaryOp::Gt => compare(lhs, rhs, |o| o.is_gt()),
        BinaryOp::Ge => compare(lhs, rhs, |o| o.is_ge()),
        BinaryOp::Lt => compare(lhs, rhs, |o| o.is_lt()),
        BinaryOp::Le => compare(lhs, rhs, |o| o.is_le()),
        BinaryOp::And => logical(lhs, rhs, |a, b| a && b),
        BinaryOp::Or => logical(lhs, rhs, |a, b| a || b),
    }
}

pub fn unary(op: UnaryOp, target: &Value) -> OpResult<Value> {
    match (op, target) {
        (UnaryOp::Neg, Value::Long(n)) => Ok(Value::Long(n.wrapping_neg())),
        (UnaryOp::Neg, Value::Double(n)) => Ok(Value::Double(-n)),
        (UnaryOp::Neg, other) => {
            Err(Thrown::message(format!("Attempt to perform arithmetic on {}", other.type_name())))
        }
        (UnaryOp::Negate, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
        (UnaryOp::Negate, other) => Err(Thrown::message(format!("Attempt to negate {}", other.type_name()))),
    }
}

fn numeric(
    lhs: &Value,
    rhs: &Value,
    long: impl Fn(i64, i64) -> i64,
    double: impl Fn(f64, f64) -> f64,
) -> OpResult<Value> {
    match (lhs, rhs) {
        (Value::Long(a), Value::Long(b)) => Ok(Value::Long(long(*a, *b))),
        (Value::Long(a), Value::Double(b)) => Ok(Value::Double(double(*a as f64, *b))),
        (Value::Double(a), Value::Long(b)) => Ok(Value::Double(double(*a, *b as f64))),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(double(*a, *b))),
        _ => Err(arithmetic_error(lhs, rhs)),
    }
}

fn add(lhs: &Value, rhs: &Value) -> OpResult<Value> {
    match (lhs, rhs) {
        (Value::String(a), b) => Ok(concat(a, &b.tostring())),
        (Value::Long(_) | Value::Double(_) | Value::Boolean(_) | Value::Nil, Value::String(b)) => {
            Ok(concat(&lhs.tostring(), b))
        }
        _ => numeric(lhs, rhs, i64::wrapping_add, |a, b| a + b),
    }
}

fn mul(lhs: &Value, rhs: &Value) -> OpResult<Value> {
    match (lhs, rhs) {
        (Value::String(s), Value::Long(n)) => {
            if *n < 0 || *n > MAX_ARRAY_INDEX {
                return Err(Thrown::message("Value out of range"));
            }
            Ok(Value::String(Rc::from(s.repeat(*n as usize))))
        }
        (Value::String(_), _) => Err(Thrown::message("not a long")),
        _ => numeric(lhs, rhs, i64::wrapping_mul, |a, b| a * b),
    }
}

fn div(lhs: &Value, rhs: &Value) -> OpResult<Value> {
    if let (Value::Long(_), Value::Long(0)) = (lhs, rhs) {
        return Err(Thrown::message("Division by zero"));
    }
    numeric(lhs, rhs, i64::wrapping_div, |a, b| a / b)
}

fn rem(lhs: &Value, rhs: &Value) -> OpResult<Value> {
    if let (Value::Long(_), Value::Long(0)) = (lhs, rhs) {
        return Err(Thrown::message("Division by zero"));
    }
    numeric(lhs, rhs, i64::wrapping_rem, |a, b| a % b)
}

fn compare(lhs: &Value, rhs: &Value, test: impl Fn(std::cmp::Ordering) -> bool) -> OpResult<Value> {
    let ordering = match (lhs, rhs) {
        (Value::Long(a), Value::Long(b)) => Some(a.cmp(b)),
        (Value::Long(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
        (Value::Double(a), Value::Long(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => return Err(comparison_error(lhs, rhs)),
    };
    // NaN compares false under every operator
    Ok(Value::Boolean(ordering.is_some_and(test)))
}

fn logical(lhs: &Value, rhs: &Value, combine: impl Fn(bool, bool) -> bool) -> OpResult<Value> {
    match (lhs, rhs) {
        (Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(combine(*a, *b))),
        _ => Err(Thrown::message("not a boolean")),
    }
}

/// Script-level equality: numbers compare across Long/Double, strings and
/// ranges by content, containers and functions by identity.
pub fn equals(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Long(a), Value::Double(b)) | (Value::Double(b), Value::Long(a)) => *a as f64 == *b,
        (Value::Double(a), Value::Double(b)) => a == b,
        _ => lhs == rhs,
    }
}

// ── Members ──────────────────────────────────────────────────────────

fn array_index(key: &Value) -> OpResult<usize> {
    match key {
        Value::Long(n) if *n < 0 => Err(Thrown::message("Negative index")),
        Value::Long(n) if *n > MAX_ARRAY_INDEX => Err(Thrown::message("Index too large")),
        Value::Long(n) => Ok(*n as usize),
        other => Err(Thrown::message(format!("Attempt to use non int key {other} on array"))),
    }
}

pub fn get_member(target: &Value, key: &Value) -> OpResult<Value> {
    match target {
        Value::Array(items) => Ok(items.borrow().get(array_index(key)?)),
        Value::Object(map) => Ok(map.borrow().get(key).cloned().unwrap_or(Value::Nil)),
        Value::Range { from, to } => Ok(match key.as_str() {
            Some("from") => Value::Long(*from),
            Some("to") => Value::Long(*to),
            _ => Value::Nil,
        }),
        Value::String(s) => match key {
            Value::Long(n) if *n < 0 => Err(Thrown::message("Negative index")),
            Value::Long(n) => Ok(usize::try_from(*n)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map_or(Value::Nil, |c| Value::String(Rc::from(c.to_string())))),
            _ => Err(Thrown::message("Attempt to access non integer field of string")),
        },
        Value::Function(f) => Ok(match key.as_str() {
            Some("annotations") => {
                Value::array(f.annotations.iter().map(|a| Value::String(a.clone())).collect())
            }
            _ => Value::Nil,
        }),
        other => Err(Thrown::message(format!("Attempt to index {}", other.type_name()))),
    }
}

pub fn set_member(target: &Value, key: Value, value: Value) -> OpResult<()> {
    match target {
        Value::Array(items) => {
            let index = array_index(&key)?;
            items.borrow_mut().set(index, value);
            Ok(())
        }
        Value::Object(map) => {
            map.borrow_mut().insert(key, value);
            Ok(())
        }
        Value::Range { .. } => Err(Thrown::message("Ranges are immutable")),
        Value::Function(_) => Err(Thrown::message("Functions are immutable")),
        other => Err(Thrown::message(format!("Attempt to index {}", other.type_name()))),
    }
}

pub fn size(target: &Value) -> OpResult<i64> {
    match target {
        Value::Array(items) => Ok(items.borrow().len() as i64),
        Value::Object(map) => Ok(map.borrow().len() as i64),
        Value::Range { from, to } => Ok(to.wrapping_sub(*from).wrapping_abs()),
        other => Err(Thrown::message(format!("Attempt to get length of {}", other.type_name()))),
    }
}

pub fn keys(target: &Value) -> OpResult<Value> {
    match target {
        Value::Object(map) => Ok(Value::array(map.borrow().keys().cloned().collect())),
        Value::Range { .. } => Ok(Value::array(vec![Value::from("from"), Value::from("to")])),
        Value::Function(_) => Ok(Value::array(vec![Value::from("annotations")])),
        other => Err(Thrown::message(format!("Attempt to get keys of {}", other.type_name()))),
    }
}
