use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Value;

/// One activation's local slots, linked to the frame its function closed
/// over. Closures keep their defining frame alive through `parent`, so
/// captured variables are shared by reference.
#[derive(Debug)]
pub struct Frame {
    locals: RefCell<Vec<Value>>,
    parent: Option<Rc<Frame>>,
}

impl Frame {
    pub fn new(locals_count: usize, parent: Option<Rc<Frame>>) -> Rc<Frame> {
        Rc::new(Frame { locals: RefCell::new(vec![Value::Nil; locals_count]), parent })
    }

    pub fn len(&self) -> usize {
        self.locals.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locals.borrow().is_empty()
    }

    pub fn local(&self, index: usize) -> Option<Value> {
        self.locals.borrow().get(index).cloned()
    }

    /// Returns false if `index` is outside the frame.
    pub fn set_local(&self, index: usize, value: Value) -> bool {
        match self.locals.borrow_mut().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// The frame `level` links up the closure chain; level 0 is `self`.
    pub fn ancestor(&self, level: usize) -> Option<&Frame> {
        let mut frame = self;
        for _ in 0..level {
            frame = frame.parent.as_deref()?;
        }
        Some(frame)
    }

    /// Copies call arguments into the parameter slots. Missing arguments
    /// stay Nil, extra ones are dropped unless the function is varargs, in
    /// which case they are collected into an array in the last parameter.
    pub fn fill_from_args(&self, argument_count: usize, varargs: bool, mut args: Vec<Value>) {
        let mut locals = self.locals.borrow_mut();
        if locals.len() < argument_count {
            locals.resize(argument_count, Value::Nil);
        }
        let fixed = if varargs { argument_count.saturating_sub(1) } else { argument_count };
        let rest = if args.len() > fixed { args.split_off(fixed) } else { Vec::new() };
        for (slot, arg) in locals.iter_mut().zip(args) {
            *slot = arg;
        }
        if varargs && argument_count > 0 {
            locals[argument_count - 1] = Value::array(rest);
        }
    }
}

// ── Globals ──────────────────────────────────────────────────────────

/// Name-keyed global table shared by every function of a run.
#[derive(Debug, Default)]
pub struct Globals {
    values: HashMap<Rc<str>, Value>,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reading an unset global yields Nil.
    pub fn get(&self, name: &str) -> Value {
        self.values.get(name).cloned().unwrap_or(Value::Nil)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        match self.values.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                self.values.insert(Rc::from(name), value);
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| &**k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ancestor_walks_parents() {
        let outer = Frame::new(1, None);
        outer.set_local(0, Value::Long(7));
        let inner = Frame::new(0, Some(outer.clone()));
        assert_eq!(inner.ancestor(1).unwrap().local(0), Some(Value::Long(7)));
        assert!(inner.ancestor(2).is_none());
        assert_eq!(inner.ancestor(0).unwrap().len(), 0);
    }

    #[test]
    fn writes_through_child_are_visible_to_parent() {
        let outer = Frame::new(1, None);
        let inner = Frame::new(0, Some(outer.clone()));
        assert!(inner.ancestor(1).unwrap().set_local(0, Value::Long(2)));
        assert_eq!(outer.local(0), Some(Value::Long(2)));
        assert!(!outer.set_local(5, Value::Nil));
    }

    #[test]
    fn fill_drops_extra_and_defaults_missing() {
        let f = Frame::new(3, None);
        f.fill_from_args(2, false, vec![Value::Long(1), Value::Long(2), Value::Long(3)]);
        assert_eq!(f.local(0), Some(Value::Long(1)));
        assert_eq!(f.local(1), Some(Value::Long(2)));
        assert_eq!(f.local(2), Some(Value::Nil));

        let g = Frame::new(2, None);
        g.fill_from_args(2, false, vec![Value::Long(1)]);
        assert_eq!(g.local(1), Some(Value::Nil));
    }

    #[test]
    fn fill_collects_varargs() {
        let f = Frame::new(2, None);
        f.fill_from_args(2, true, vec![Value::Long(1), Value::Long(2), Value::Long(3)]);
        assert_eq!(f.local(0), Some(Value::Long(1)));
        let rest = f.local(1).unwrap().array_values().unwrap();
        assert_eq!(rest, vec![Value::Long(2), Value::Long(3)]);

        let g = Frame::new(2, None);
        g.fill_from_args(2, true, vec![]);
        assert_eq!(g.local(1).unwrap().array_values().unwrap(), vec![]);
    }

    #[test]
    fn globals_default_to_nil() {
        let mut g = Globals::new();
        assert_eq!(g.get("x"), Value::Nil);
        g.set("x", Value::Long(1));
        g.set("x", Value::Long(2));
        assert_eq!(g.get("x"), Value::Long(2));
        assert!(g.contains("x"));
        assert_eq!(g.names().count(), 1);
    }
}
