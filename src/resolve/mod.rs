//! Scope and closure resolution: syntax tree in, slot-indexed IR out.

use tracing::debug;

use crate::ast;
use crate::ir::{self, BinaryOp, FunctionDef, Root};

mod scope;

use scope::{Binding, FunctionScope, ScopeChain};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    #[error("cannot assign to {kind}: {node}")]
    InvalidTarget { kind: &'static str, node: String },
    #[error("cannot destructure into {kind}: {node}")]
    InvalidPattern { kind: &'static str, node: String },
}

pub type ResolveResult<T> = Result<T, ResolveError>;

/// Resolves a whole program. The result's `locals_count` is the slot count
/// the entry function needs.
pub fn resolve(tree: &ast::Node) -> ResolveResult<Root> {
    let mut resolver = Resolver { scopes: ScopeChain::new() };
    let body = resolver.node(tree)?;
    let locals_count = resolver.scopes.current().locals_count();
    debug!(locals = locals_count, "program resolved");
    Ok(Root { locals_count, body })
}

struct Resolver {
    scopes: ScopeChain,
}

impl Resolver {
    /// Runs `f` inside a fresh block of the current function.
    fn block<T>(&mut self, f: impl FnOnce(&mut Self) -> ResolveResult<T>) -> ResolveResult<T> {
        self.scopes.current().open_block();
        let result = f(self);
        self.scopes.current().close_block();
        result
    }

    fn child(&mut self, node: &ast::Node) -> ResolveResult<Box<ir::Node>> {
        self.block(|r| r.node(node)).map(Box::new)
    }

    fn children(&mut self, nodes: &[ast::Node]) -> ResolveResult<Vec<ir::Node>> {
        nodes.iter().map(|n| self.block(|r| r.node(n))).collect()
    }

    fn name(&self, name: &str) -> ir::Node {
        match self.scopes.lookup(name) {
            Binding::Local(slot) => ir::Node::Local(slot),
            Binding::Upvalue { level, index } => ir::Node::Upvalue { level, index },
            Binding::Global => ir::Node::Global(name.to_string()),
        }
    }

    fn node(&mut self, node: &ast::Node) -> ResolveResult<ir::Node> {
        use ast::Node as A;
        use ir::Node as I;

        Ok(match node {
            A::Boolean { value } => I::Boolean(*value),
            A::Long { value } => I::Long(*value),
            A::Double { value } => I::Double(*value),
            A::Nil => I::Nil,
            A::String { value } => I::String(value.clone()),
            A::ArrayLiteral { values } => I::ArrayLiteral(self.children(values)?),
            A::ObjectLiteral { entries } => {
                let mut out = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    out.push((*self.child(key)?, *self.child(value)?));
                }
                I::ObjectLiteral(out)
            }
            A::Unary { op, target } => I::Unary { op: *op, target: self.child(target)? },
            A::Binary { op, lhs, rhs } => I::Binary { op: *op, lhs: self.child(lhs)?, rhs: self.child(rhs)? },
            A::Range { from, to } => I::Range { from: self.child(from)?, to: self.child(to)? },
            A::Identifier { name } => self.name(name),
            A::Global { name } => I::Global(name.clone()),
            A::Let { name } => {
                let slot = self.scopes.current().declare(name);
                I::Assign { target: Box::new(I::Local(slot)), value: Box::new(I::Nil) }
            }
            A::Assign { target, value } => self.assign(target, value)?,
            A::Member { target, key } => I::Member { target: self.child(target)?, key: self.child(key)? },
            A::Body { children } => {
                I::Body(self.block(|r| children.iter().map(|c| r.node(c)).collect::<ResolveResult<Vec<_>>>())?)
            }
            A::Call { target, args } => I::Call { target: self.child(target)?, args: self.children(args)? },
            A::Function { name, args, body, varargs, annotations } => {
                self.scopes.push_function(FunctionScope::with_params(args.as_slice()));
                let body = self.node(body);
                let scope = self.scopes.pop_function();
                let locals_count = scope.locals_count();
                debug!(name = name.as_deref().unwrap_or("<anonymous>"), locals = locals_count, "function resolved");
                I::Function(Box::new(FunctionDef {
                    name: name.clone(),
                    argument_count: args.len(),
                    locals_count,
                    body: body?,
                    varargs: *varargs,
                    annotations: annotations.clone(),
                }))
            }
            A::If { condition, then, otherwise } => I::If {
                condition: self.child(condition)?,
                then: self.child(then)?,
                otherwise: self.child(otherwise)?,
            },
            A::While { condition, body, otherwise } => I::While {
                condition: self.child(condition)?,
                body: self.child(body)?,
                otherwise: self.child(otherwise)?,
            },
            A::For { variable, iterable, body, otherwise } => {
                let iterable = self.child(iterable)?;
                self.block(|r| {
                    let slot = r.scopes.current().declare(variable);
                    Ok(I::For {
                        slot,
                        iterable,
                        body: Box::new(r.node(body)?),
                        otherwise: Box::new(r.node(otherwise)?),
                    })
                })?
            }
            A::Return { value } => I::Return(self.child(value)?),
            A::Throw { value } => I::Throw(self.child(value)?),
        })
    }

    fn assign(&mut self, target: &ast::Node, value: &ast::Node) -> ResolveResult<ir::Node> {
        use ast::Node as A;
        use ir::Node as I;

        let target = match target {
            // declared first so the value can refer to itself
            A::Let { name } => I::Local(self.scopes.current().declare(name)),
            A::Identifier { name } => self.name(name),
            A::Global { name } => I::Global(name.clone()),
            A::Member { target, key } => I::Member { target: self.child(target)?, key: self.child(key)? },
            A::ArrayLiteral { .. } | A::ObjectLiteral { .. } => return self.destructure(target, value),
            other => return Err(ResolveError::InvalidTarget { kind: other.kind(), node: other.to_string() }),
        };
        Ok(I::Assign { target: Box::new(target), value: self.child(value)? })
    }

    /// `pattern = value` becomes a body that stores the value in a hidden
    /// slot, assigns each pattern entry from it, and yields it.
    fn destructure(&mut self, pattern: &ast::Node, value: &ast::Node) -> ResolveResult<ir::Node> {
        let value = self.child(value)?;
        let temp = self.scopes.current().temp();
        let mut out = vec![ir::Node::Assign { target: Box::new(ir::Node::Local(temp)), value }];
        self.unpack(pattern, temp, &mut out)?;
        out.push(ir::Node::Local(temp));
        Ok(ir::Node::Body(out))
    }

    fn unpack(&mut self, pattern: &ast::Node, source: usize, out: &mut Vec<ir::Node>) -> ResolveResult<()> {
        let element = |key: ir::Node| ir::Node::Member {
            target: Box::new(ir::Node::Local(source)),
            key: Box::new(key),
        };
        match pattern {
            ast::Node::ArrayLiteral { values } => {
                for (i, sub) in values.iter().enumerate() {
                    self.bind(sub, element(ir::Node::Long(i as i64)), out)?;
                }
            }
            ast::Node::ObjectLiteral { entries } => {
                for (key, sub) in entries {
                    let key = *self.child(key)?;
                    self.bind(sub, element(key), out)?;
                }
            }
            other => return Err(ResolveError::InvalidPattern { kind: other.kind(), node: other.to_string() }),
        }
        Ok(())
    }

    fn bind(&mut self, sub: &ast::Node, value: ir::Node, out: &mut Vec<ir::Node>) -> ResolveResult<()> {
        use ast::Node as A;
        use ir::Node as I;

        let assign = |target: I, value: I| I::Assign { target: Box::new(target), value: Box::new(value) };
        match sub {
            A::Identifier { name } if name == "_" => {}
            A::Identifier { name } | A::Let { name } => {
                let slot = self.scopes.current().declare(name);
                out.push(assign(I::Local(slot), value));
            }
            A::Global { name } => out.push(assign(I::Global(name.clone()), value)),
            A::Member { target, key } => {
                let member = I::Member { target: self.child(target)?, key: self.child(key)? };
                out.push(assign(member, value));
            }
            A::ArrayLiteral { .. } | A::ObjectLiteral { .. } => {
                let temp = self.scopes.current().temp();
                out.push(assign(I::Local(temp), value));
                self.unpack(sub, temp, out)?;
            }
            A::Boolean { .. } | A::Long { .. } | A::Double { .. } | A::Nil | A::String { .. } => {
                let expected = self.node(sub)?;
                out.push(I::If {
                    condition: Box::new(I::Binary { op: BinaryOp::Neq, lhs: Box::new(expected), rhs: Box::new(value) }),
                    then: Box::new(I::Throw(Box::new(I::String(format!("Pattern {sub} didn't match"))))),
                    otherwise: Box::new(I::empty_body()),
                });
            }
            other => return Err(ResolveError::InvalidPattern { kind: other.kind(), node: other.to_string() }),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Node as A;
    use crate::ir::Node as I;

    fn root(tree: A) -> Root {
        resolve(&tree).unwrap()
    }

    #[test]
    fn let_declares_a_slot() {
        let r = root(A::body(vec![A::let_assign("x", A::long(1)), A::ident("x")]));
        assert_eq!(r.locals_count, 1);
        assert_eq!(r.body.to_string(), "(body (assign (local 0) 1) (local 0))");
    }

    #[test]
    fn bare_let_assigns_nil() {
        let r = root(A::let_("x"));
        assert_eq!(r.body, I::Assign { target: Box::new(I::Local(0)), value: Box::new(I::Nil) });
    }

    #[test]
    fn unknown_names_are_globals() {
        let r = root(A::call(A::ident("print"), vec![A::global("x")]));
        assert_eq!(r.body.to_string(), "(call (global print) (global x))");
        assert_eq!(r.locals_count, 0);
    }

    #[test]
    fn shadowing_in_nested_block() {
        let r = root(A::body(vec![
            A::let_assign("x", A::long(1)),
            A::body(vec![A::let_assign("x", A::long(2)), A::ident("x")]),
            A::ident("x"),
        ]));
        assert_eq!(r.locals_count, 2);
        assert_eq!(
            r.body.to_string(),
            "(body (assign (local 0) 1) (body (assign (local 1) 2) (local 1)) (local 0))"
        );
    }

    #[test]
    fn sibling_blocks_get_distinct_slots() {
        let r = root(A::body(vec![
            A::body(vec![A::let_assign("a", A::long(1))]),
            A::body(vec![A::let_assign("b", A::long(2))]),
        ]));
        assert_eq!(r.locals_count, 2);
        assert_eq!(r.body.to_string(), "(body (body (assign (local 0) 1)) (body (assign (local 1) 2)))");
    }

    #[test]
    fn closures_capture_upvalues() {
        // let x = 0; let inc = fun() { x = x + 1 }
        let inc = A::function(
            Some("inc"),
            &[],
            A::assign(A::ident("x"), A::binary(BinaryOp::Add, A::ident("x"), A::long(1))),
        );
        let r = root(A::body(vec![A::let_assign("x", A::long(0)), A::let_assign("inc", inc)]));
        let I::Body(children) = &r.body else { panic!("expected body") };
        let I::Assign { value, .. } = &children[1] else { panic!("expected assign") };
        let I::Function(def) = value.as_ref() else { panic!("expected function") };
        assert_eq!(def.locals_count, 0);
        assert_eq!(def.body.to_string(), "(assign (upvalue 1 0) (+ (upvalue 1 0) 1))");
    }

    #[test]
    fn recursive_function_sees_itself() {
        let f = A::function(Some("f"), &["n"], A::call(A::ident("f"), vec![A::ident("n")]));
        let r = root(A::let_assign("f", f));
        let I::Assign { value, .. } = &r.body else { panic!("expected assign") };
        let I::Function(def) = value.as_ref() else { panic!("expected function") };
        assert_eq!(def.argument_count, 1);
        assert_eq!(def.locals_count, 1);
        assert_eq!(def.body.to_string(), "(call (upvalue 1 0) (local 0))");
    }

    #[test]
    fn upvalue_levels_count_function_boundaries() {
        let inner = A::function(None, &[], A::ident("a"));
        let outer = A::function(None, &["b"], inner);
        let r = root(A::body(vec![A::let_assign("a", A::long(1)), outer]));
        let I::Body(children) = &r.body else { panic!("expected body") };
        let I::Function(outer) = &children[1] else { panic!("expected function") };
        let I::Function(inner) = &outer.body else { panic!("expected function") };
        assert_eq!(inner.body, I::Upvalue { level: 2, index: 0 });
    }

    #[test]
    fn array_destructuring() {
        let r = root(A::assign(
            A::array(vec![A::let_("a"), A::ident("_"), A::let_("b")]),
            A::ident("xs"),
        ));
        assert_eq!(r.locals_count, 3);
        assert_eq!(
            r.body.to_string(),
            "(body (assign (local 0) (global xs)) \
             (assign (local 1) (member (local 0) 0)) \
             (assign (local 2) (member (local 0) 2)) \
             (local 0))"
        );
    }

    #[test]
    fn bare_identifiers_in_patterns_declare_locals() {
        let r = root(A::body(vec![
            A::let_assign("a", A::long(0)),
            A::assign(A::array(vec![A::ident("a"), A::ident("b")]), A::array(vec![A::long(1), A::long(2)])),
            A::ident("a"),
            A::ident("b"),
        ]));
        assert_eq!(r.locals_count, 4);
        assert_eq!(
            r.body.to_string(),
            "(body (assign (local 0) 0) \
             (body (assign (local 1) (array 1 2)) \
             (assign (local 2) (member (local 1) 0)) \
             (assign (local 3) (member (local 1) 1)) \
             (local 1)) \
             (local 2) (local 3))"
        );
    }

    #[test]
    fn object_destructuring_with_literal_check() {
        let r = root(A::assign(
            A::object(vec![(A::string("kind"), A::long(1)), (A::string("v"), A::let_("v"))]),
            A::ident("o"),
        ));
        assert_eq!(
            r.body.to_string(),
            "(body (assign (local 0) (global o)) \
             (if (!= 1 (member (local 0) \"kind\")) (throw \"Pattern 1 didn't match\") (body)) \
             (assign (local 1) (member (local 0) \"v\")) \
             (local 0))"
        );
    }

    #[test]
    fn nested_patterns_use_their_own_temp() {
        let r = root(A::assign(A::array(vec![A::array(vec![A::let_("x")])]), A::ident("v")));
        assert_eq!(r.locals_count, 3);
        assert_eq!(
            r.body.to_string(),
            "(body (assign (local 0) (global v)) \
             (assign (local 1) (member (local 0) 0)) \
             (assign (local 2) (member (local 1) 0)) \
             (local 0))"
        );
    }

    #[test]
    fn for_declares_loop_variable_after_iterable() {
        // the iterable's `i` is the outer binding
        let r = root(A::body(vec![
            A::let_assign("i", A::long(3)),
            A::for_("i", A::range(A::long(1), A::ident("i")), A::ident("i"), A::body(vec![])),
        ]));
        assert_eq!(r.locals_count, 2);
        assert_eq!(
            r.body.to_string(),
            "(body (assign (local 0) 3) (for (local 1) (range 1 (local 0)) (local 1) (body)))"
        );
    }

    #[test]
    fn invalid_assignment_target() {
        let err = resolve(&A::assign(A::long(1), A::long(2))).unwrap_err();
        assert_eq!(err, ResolveError::InvalidTarget { kind: "long literal", node: "1".into() });
        let err = resolve(&A::assign(A::array(vec![A::call(A::ident("f"), vec![])]), A::Nil)).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidPattern { kind: "call", .. }));
    }
}
