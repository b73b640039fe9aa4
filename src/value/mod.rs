use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

use crate::bytecode::Module;
use crate::vm::{Frame, Vm, VmError};

pub mod ops;

/// Largest index an array accepts.
pub const MAX_ARRAY_INDEX: i64 = i32::MAX as i64;

// ── Value ────────────────────────────────────────────────────────────

/// Runtime value.
///
/// `Array`, `Object` and `Function` are shared by reference: cloning the
/// `Value` clones the handle, and mutations are visible to every holder.
/// `Range` is immutable.
///
/// `PartialEq`/`Hash` are the strict identity used for object keys (a
/// `Long` never equals a `Double`, containers compare by reference). The
/// script-level `==` lives in [`ops::equals`].
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(Rc<str>),
    Array(Rc<RefCell<Array>>),
    Object(Rc<RefCell<HashMap<Value, Value>>>),
    Range { from: i64, to: i64 },
    Function(Rc<Function>),
}

/// Runtime type of a value. `bytecode::TypeTag` is the wire subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Nil,
    Boolean,
    Long,
    Double,
    String,
    Array,
    Object,
    Range,
    Function,
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Value {
        Value::String(s.into())
    }

    pub fn array(values: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(Array::from_values(values))))
    }

    pub fn object(entries: impl IntoIterator<Item = (Value, Value)>) -> Value {
        Value::Object(Rc::new(RefCell::new(entries.into_iter().collect())))
    }

    pub fn range(from: i64, to: i64) -> Value {
        Value::Range { from, to }
    }

    /// Wraps a host closure as a callable function value.
    pub fn native(
        name: &str,
        f: impl Fn(&mut Vm<'_>, Vec<Value>) -> Result<Value, VmError> + 'static,
    ) -> Value {
        Value::Function(Rc::new(Function::native(name, f)))
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Nil => ValueType::Nil,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Long(_) => ValueType::Long,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::Array(_) => ValueType::Array,
            Value::Object(_) => ValueType::Object,
            Value::Range { .. } => ValueType::Range,
            Value::Function(_) => ValueType::Function,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Range { .. } => "range",
            Value::Function(_) => "function",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Snapshot of an array's elements in index order (holes skipped).
    pub fn array_values(&self) -> Option<Vec<Value>> {
        match self {
            Value::Array(a) => Some(a.borrow().values().cloned().collect()),
            _ => None,
        }
    }

    /// The string conversion used by concatenation and `print`.
    pub fn tostring(&self) -> Rc<str> {
        match self {
            Value::String(s) => s.clone(),
            other => Rc::from(other.to_string()),
        }
    }

    fn identity(&self) -> usize {
        match self {
            Value::Array(a) => Rc::as_ptr(a) as *const () as usize,
            Value::Object(o) => Rc::as_ptr(o) as *const () as usize,
            Value::Function(f) => Rc::as_ptr(f) as *const () as usize,
            _ => 0,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Long(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Double(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Range { from: f1, to: t1 }, Value::Range { from: f2, to: t2 }) => f1 == f2 && t1 == t2,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Nil => {}
            Value::Boolean(b) => b.hash(state),
            Value::Long(n) => n.hash(state),
            Value::Double(n) => n.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::Range { from, to } => {
                from.hash(state);
                to.hash(state);
            }
            Value::Array(_) | Value::Object(_) | Value::Function(_) => self.identity().hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Long(n) => write!(f, "{n}"),
            Value::Double(n) => write!(f, "{}", format_double(*n)),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(_) => write!(f, "array 0x{:x}", self.identity()),
            Value::Object(_) => write!(f, "object 0x{:x}", self.identity()),
            Value::Range { from, to } => write!(f, "Range({from} to {to})"),
            Value::Function(func) => match &func.name {
                Some(name) => write!(f, "function {name}"),
                None => write!(f, "function 0x{:x}", self.identity()),
            },
        }
    }
}

/// Formats a double the way the language prints them: always with a
/// fractional part, scientific notation outside `[1e-3, 1e7)`.
pub fn format_double(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let abs = n.abs();
    if abs == 0.0 || (1e-3..1e7).contains(&abs) {
        let s = format!("{n}");
        if s.contains('.') { s } else { format!("{s}.0") }
    } else {
        let s = format!("{n:e}");
        match s.split_once('e') {
            Some((mantissa, exp)) if mantissa.contains('.') => format!("{mantissa}E{exp}"),
            Some((mantissa, exp)) => format!("{mantissa}.0E{exp}"),
            None => s,
        }
    }
}

// ── Array ────────────────────────────────────────────────────────────

/// Integer-indexed, sparse-safe array storage.
///
/// `len` counts present entries, so writing index 10 into an empty array
/// gives a length of 1.
#[derive(Debug, Clone, Default)]
pub struct Array {
    entries: BTreeMap<usize, Value>,
}

impl Array {
    pub fn new() -> Self {
        Array::default()
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        Array { entries: values.into_iter().enumerate().collect() }
    }

    pub fn get(&self, index: usize) -> Value {
        self.entries.get(&index).cloned().unwrap_or(Value::Nil)
    }

    pub fn set(&mut self, index: usize, value: Value) {
        self.entries.insert(index, value);
    }

    pub fn push(&mut self, value: Value) {
        let next = self.entries.keys().next_back().map_or(0, |last| last + 1);
        self.entries.insert(next, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }
}

// ── Function ─────────────────────────────────────────────────────────

pub type NativeFn = dyn Fn(&mut Vm<'_>, Vec<Value>) -> Result<Value, VmError>;

pub struct Function {
    pub name: Option<Rc<str>>,
    pub annotations: Vec<Rc<str>>,
    pub kind: FunctionKind,
}

pub enum FunctionKind {
    /// A function from a loaded module, closed over the frame that was
    /// active when `LOAD_FUNCTION` ran.
    Script { module: Arc<Module>, id: u16, captured: Rc<Frame> },
    Native(Box<NativeFn>),
}

impl Function {
    pub fn native(
        name: &str,
        f: impl Fn(&mut Vm<'_>, Vec<Value>) -> Result<Value, VmError> + 'static,
    ) -> Self {
        Function { name: Some(Rc::from(name)), annotations: Vec::new(), kind: FunctionKind::Native(Box::new(f)) }
    }

    pub fn script(module: Arc<Module>, id: u16, captured: Rc<Frame>) -> Self {
        let (name, annotations) = match module.function(id) {
            Ok(info) => (
                info.name.as_deref().map(Rc::from),
                info.annotations.iter().map(|a| Rc::from(a.as_str())).collect(),
            ),
            Err(_) => (None, Vec::new()),
        };
        Function { name, annotations, kind: FunctionKind::Script { module, id, captured } }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            FunctionKind::Script { id, .. } => format!("script #{id}"),
            FunctionKind::Native(_) => "native".to_string(),
        };
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("annotations", &self.annotations)
            .field("kind", &kind)
            .finish()
    }
}

// ── Program-level errors ─────────────────────────────────────────────

/// A script-visible error: any value unwinding toward the nearest catch
/// boundary. Operator type errors carry a string message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", .0.tostring())]
pub struct Thrown(pub Value);

impl Thrown {
    pub fn message(msg: impl Into<String>) -> Self {
        Thrown(Value::String(Rc::from(msg.into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn strict_identity_for_keys() {
        assert_ne!(Value::Long(1), Value::Double(1.0));
        assert_eq!(Value::from("a"), Value::string("a"));
        let a = Value::array(vec![]);
        let b = Value::array(vec![]);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);

        let mut set = HashSet::new();
        set.insert(Value::Long(1));
        set.insert(Value::Double(1.0));
        set.insert(a.clone());
        set.insert(a.clone());
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn tostring_formats() {
        assert_eq!(Value::Long(-5).to_string(), "-5");
        assert_eq!(Value::Double(1.0).to_string(), "1.0");
        assert_eq!(Value::Double(2.5).to_string(), "2.5");
        assert_eq!(Value::Double(1.5e10).to_string(), "1.5E10");
        assert_eq!(Value::Double(1e-5).to_string(), "1.0E-5");
        assert_eq!(Value::Double(f64::NAN).to_string(), "NaN");
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Boolean(true).to_string(), "true");
        assert_eq!(Value::range(1, 3).to_string(), "Range(1 to 3)");
        assert!(Value::array(vec![]).to_string().starts_with("array 0x"));
        assert!(Value::object(vec![]).to_string().starts_with("object 0x"));
    }

    #[test]
    fn native_function_display_uses_name() {
        let f = Value::native("print", |_, _| Ok(Value::Nil));
        assert_eq!(f.to_string(), "function print");
        assert_eq!(f.type_name(), "function");
    }

    #[test]
    fn sparse_array_len_counts_entries() {
        let mut a = Array::new();
        a.set(10, Value::Long(1));
        assert_eq!(a.len(), 1);
        assert_eq!(a.get(0), Value::Nil);
        a.push(Value::Long(2));
        assert_eq!(a.get(11), Value::Long(2));
        assert_eq!(a.values().count(), 2);
    }

    #[test]
    fn shared_mutation_visible_to_all_holders() {
        let a = Value::array(vec![Value::Long(1)]);
        let alias = a.clone();
        if let Value::Array(inner) = &alias {
            inner.borrow_mut().set(1, Value::Long(2));
        }
        assert_eq!(a.array_values().unwrap(), vec![Value::Long(1), Value::Long(2)]);
    }
}
