//! IR to bytecode lowering.
//!
//! Every visit either leaves exactly one value on the operand stack or
//! none. Nodes that always produce a value report it and `compile` pops it
//! when the parent does not need it; control-flow nodes look at the `used`
//! flag themselves and push only when asked to.

use tracing::{debug, trace};

use crate::bytecode::{Condition, FunctionWriter, ModuleWriter, TypeTag, WriteError};
use crate::ir::{BinaryOp, FunctionDef, Node, Root};

/// Name given to the function wrapping top-level code.
pub const MAIN_NAME: &str = "$main";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("cannot assign to {target}")]
    InvalidTarget { target: String },
}

pub type EmitResult<T> = Result<T, EmitError>;

/// Lowers a resolved program into module bytes. The top-level body becomes
/// the `$main` entry function.
pub fn emit(root: &Root) -> EmitResult<Vec<u8>> {
    let mut module = ModuleWriter::new();
    let main = module.create_function(Some(MAIN_NAME), 0, root.locals_count, false, &[])?;
    let id = Emitter { module: &mut module, function: main }.finish(&root.body)?;
    module.set_entrypoint(id)?;
    let bytes = module.finish()?;
    debug!(bytes = bytes.len(), "module emitted");
    Ok(bytes)
}

struct Emitter<'m> {
    module: &'m mut ModuleWriter,
    function: FunctionWriter,
}

impl Emitter<'_> {
    /// Compiles a function body and hands the record to the module. The
    /// body's value is left on the stack, where falling off the end of the
    /// code returns it.
    fn finish(mut self, body: &Node) -> EmitResult<u16> {
        self.compile(body, true)?;
        let locals = self.function.locals_count();
        let id = self.function.end(self.module)?;
        trace!(id, locals, "function emitted");
        Ok(id)
    }

    fn compile(&mut self, node: &Node, used: bool) -> EmitResult<()> {
        if self.visit(node, used)? && !used {
            self.function.pop();
        }
        Ok(())
    }

    /// Returns true if a value was pushed regardless of `used`.
    fn visit(&mut self, node: &Node, used: bool) -> EmitResult<bool> {
        let f = &mut self.function;
        match node {
            Node::Boolean(b) => f.load_bool(*b),
            Node::Long(n) => f.load_long(self.module, *n)?,
            Node::Double(n) => f.load_double(self.module, *n)?,
            Node::Nil => f.load_nil(),
            Node::String(s) => f.load_string(self.module, s)?,
            Node::ArrayLiteral(values) => {
                for value in values {
                    self.compile(value, true)?;
                }
                self.function.create_array(values.len())?;
            }
            Node::ObjectLiteral(entries) => {
                for (key, value) in entries {
                    self.compile(key, true)?;
                    self.compile(value, true)?;
                }
                self.function.create_object(entries.len())?;
            }
            Node::Unary { op, target } => {
                self.compile(target, true)?;
                self.function.unary(*op);
            }
            Node::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs)?,
            Node::Range { from, to } => {
                self.compile(from, true)?;
                self.compile(to, true)?;
                self.function.create_range();
            }
            Node::Local(slot) => f.load_local(*slot)?,
            Node::Upvalue { level, index } => f.load_upvalue(*level, *index)?,
            Node::Global(name) => f.load_global(self.module, name)?,
            Node::Assign { target, value } => {
                self.assign(target, value, used)?;
                return Ok(false);
            }
            Node::Member { target, key } => {
                self.compile(target, true)?;
                self.compile(key, true)?;
                self.function.load_member();
            }
            Node::Body(children) => {
                if children.is_empty() {
                    if used {
                        self.function.load_nil();
                    }
                    return Ok(false);
                }
                let last = children.len() - 1;
                for (i, child) in children.iter().enumerate() {
                    self.compile(child, used && i == last)?;
                }
                return Ok(false);
            }
            Node::Call { target, args } => {
                self.compile(target, true)?;
                for arg in args {
                    self.compile(arg, true)?;
                }
                self.function.call(args.len())?;
            }
            Node::Function(def) => self.function_def(def)?,
            Node::If { condition, then, otherwise } => {
                let else_label = self.function.new_label();
                let end = self.function.new_label();
                self.compile(condition, true)?;
                self.function.jump_if(Condition::IfFalse, else_label)?;
                self.compile(then, used)?;
                self.function.jump(end)?;
                self.function.bind(else_label)?;
                self.compile(otherwise, used)?;
                self.function.bind(end)?;
                return Ok(false);
            }
            Node::While { condition, body, otherwise } => {
                self.while_loop(condition, body, otherwise, used)?;
                return Ok(false);
            }
            Node::For { slot, iterable, body, otherwise } => {
                let lowered = ForLoop { slot: *slot, body, otherwise, used };
                match iterable.as_ref() {
                    Node::Range { from, to } => {
                        self.compile(from, true)?;
                        self.compile(to, true)?;
                        self.range_for(&lowered)?;
                    }
                    other => self.dynamic_for(other, &lowered)?,
                }
                return Ok(false);
            }
            Node::Return(value) => {
                self.compile(value, true)?;
                self.function.ret();
            }
            Node::Throw(value) => {
                self.compile(value, true)?;
                self.function.throw();
            }
        }
        Ok(true)
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Node, rhs: &Node) -> EmitResult<()> {
        let skip_on = match op {
            BinaryOp::And => Some(Condition::IfFalse),
            BinaryOp::Or => Some(Condition::IfTrue),
            _ => None,
        };
        self.compile(lhs, true)?;
        match skip_on {
            Some(condition) => {
                let done = self.function.new_label();
                self.function.dup();
                self.function.jump_if(condition, done)?;
                self.compile(rhs, true)?;
                self.function.binary(op);
                self.function.bind(done)?;
            }
            None => {
                self.compile(rhs, true)?;
                self.function.binary(op);
            }
        }
        Ok(())
    }

    fn assign(&mut self, target: &Node, value: &Node, used: bool) -> EmitResult<()> {
        match target {
            Node::Local(slot) => {
                self.value_for_store(value, used)?;
                self.function.store_local(*slot)?;
            }
            Node::Upvalue { level, index } => {
                self.value_for_store(value, used)?;
                self.function.store_upvalue(*level, *index)?;
            }
            Node::Global(name) => {
                self.value_for_store(value, used)?;
                self.function.store_global(self.module, name)?;
            }
            Node::Member { target, key } => {
                self.compile(target, true)?;
                self.compile(key, true)?;
                self.compile(value, true)?;
                if used {
                    // STORE_MEMBER consumes all three, so park the result
                    let temp = self.function.new_local()?;
                    self.function.dup();
                    self.function.store_local(temp as usize)?;
                    self.function.store_member();
                    self.function.load_local(temp as usize)?;
                } else {
                    self.function.store_member();
                }
            }
            other => return Err(EmitError::InvalidTarget { target: other.to_string() }),
        }
        Ok(())
    }

    fn value_for_store(&mut self, value: &Node, used: bool) -> EmitResult<()> {
        self.compile(value, true)?;
        if used {
            self.function.dup();
        }
        Ok(())
    }

    fn function_def(&mut self, def: &FunctionDef) -> EmitResult<()> {
        let function = self.module.create_function(
            def.name.as_deref(),
            def.argument_count,
            def.locals_count,
            def.varargs,
            &def.annotations,
        )?;
        let id = Emitter { module: &mut *self.module, function }.finish(&def.body)?;
        self.function.load_function(id);
        Ok(())
    }

    /// The else branch runs only if the condition was false on first test.
    /// With a used result the loop yields the last body value, or the else
    /// value.
    fn while_loop(&mut self, condition: &Node, body: &Node, otherwise: &Node, used: bool) -> EmitResult<()> {
        let start = self.function.new_label();
        let done = self.function.new_label();
        let end = self.function.new_label();

        let run_else = self.function.new_local()? as usize;
        self.function.load_bool(true);
        self.function.store_local(run_else)?;
        if used {
            self.function.load_nil();
        }

        self.function.bind(start)?;
        self.compile(condition, true)?;
        self.function.jump_if(Condition::IfFalse, done)?;
        if used {
            self.function.pop();
        }
        self.function.load_bool(false);
        self.function.store_local(run_else)?;
        self.compile(body, used)?;
        self.function.jump(start)?;

        self.function.bind(done)?;
        self.function.load_local(run_else)?;
        self.function.jump_if(Condition::IfFalse, end)?;
        if used {
            self.function.pop();
        }
        self.compile(otherwise, used)?;
        self.function.bind(end)?;
        Ok(())
    }

    /// Iterable of unknown type: ranges and arrays are handled, anything
    /// else throws.
    fn dynamic_for(&mut self, iterable: &Node, lowered: &ForLoop<'_>) -> EmitResult<()> {
        let is_range = self.function.new_label();
        let is_array = self.function.new_label();
        let end = self.function.new_label();

        self.compile(iterable, true)?;
        self.function.dup();
        self.function.test_type(TypeTag::Range);
        self.function.jump_if(Condition::IfTrue, is_range)?;
        self.function.dup();
        self.function.test_type(TypeTag::Array);
        self.function.jump_if(Condition::IfTrue, is_array)?;
        self.function.load_string(self.module, "For not implemented for value ")?;
        self.function.swap2();
        self.function.binary(BinaryOp::Add);
        self.function.throw();

        self.function.bind(is_range)?;
        self.function.dup();
        self.function.load_string(self.module, "from")?;
        self.function.load_member();
        self.function.swap2();
        self.function.load_string(self.module, "to")?;
        self.function.load_member();
        self.range_for(lowered)?;
        self.function.jump(end)?;

        self.function.bind(is_array)?;
        self.array_for(lowered)?;
        self.function.bind(end)?;
        Ok(())
    }

    /// Expects `from` and `to` on the stack. Counts towards `to` inclusive,
    /// downwards when `from > to`, advancing `from` in place. The body
    /// always runs at least once and the else branch never does.
    fn range_for(&mut self, lowered: &ForLoop<'_>) -> EmitResult<()> {
        let from = self.function.new_local()? as usize;
        let to = self.function.new_local()? as usize;
        let step = self.function.new_local()? as usize;
        let end = self.function.new_local()? as usize;
        self.function.store_local(to)?;
        self.function.store_local(from)?;

        let descending = self.function.new_label();
        let stepped = self.function.new_label();
        self.function.load_local(from)?;
        self.function.load_local(to)?;
        self.function.binary(BinaryOp::Gt);
        self.function.jump_if(Condition::IfTrue, descending)?;
        self.function.load_long(self.module, 1)?;
        self.function.store_local(step)?;
        self.function.jump(stepped)?;
        self.function.bind(descending)?;
        self.function.load_long(self.module, -1)?;
        self.function.store_local(step)?;
        self.function.bind(stepped)?;

        self.function.load_local(to)?;
        self.function.load_local(step)?;
        self.function.binary(BinaryOp::Add);
        self.function.store_local(end)?;

        let start = self.function.new_label();
        let done = self.function.new_label();
        self.function.bind(start)?;
        self.function.load_local(from)?;
        self.function.load_local(end)?;
        self.function.binary(BinaryOp::Neq);
        self.function.jump_if(Condition::IfFalse, done)?;
        self.function.load_local(from)?;
        self.function.store_local(lowered.slot)?;
        self.compile(lowered.body, false)?;
        self.function.load_local(from)?;
        self.function.load_local(step)?;
        self.function.binary(BinaryOp::Add);
        self.function.store_local(from)?;
        self.function.jump(start)?;
        self.function.bind(done)?;
        if lowered.used {
            self.function.load_nil();
        }
        Ok(())
    }

    /// Expects the array on the stack. Its size is read once; an empty
    /// array runs the else branch instead of the body.
    fn array_for(&mut self, lowered: &ForLoop<'_>) -> EmitResult<()> {
        let array = self.function.new_local()? as usize;
        let index = self.function.new_local()? as usize;
        let len = self.function.new_local()? as usize;
        self.function.store_local(array)?;
        self.function.load_local(array)?;
        self.function.size();
        self.function.store_local(len)?;
        self.function.load_long(self.module, 0)?;
        self.function.store_local(index)?;

        let start = self.function.new_label();
        let done = self.function.new_label();
        let end = self.function.new_label();

        self.function.load_local(len)?;
        self.function.load_long(self.module, 0)?;
        self.function.binary(BinaryOp::Eq);
        self.function.jump_if(Condition::IfFalse, start)?;
        self.compile(lowered.otherwise, lowered.used)?;
        self.function.jump(end)?;

        self.function.bind(start)?;
        self.function.load_local(index)?;
        self.function.load_local(len)?;
        self.function.binary(BinaryOp::Lt);
        self.function.jump_if(Condition::IfFalse, done)?;
        self.function.load_local(array)?;
        self.function.load_local(index)?;
        self.function.load_member();
        self.function.store_local(lowered.slot)?;
        self.compile(lowered.body, false)?;
        self.function.load_local(index)?;
        self.function.load_long(self.module, 1)?;
        self.function.binary(BinaryOp::Add);
        self.function.store_local(index)?;
        self.function.jump(start)?;

        self.function.bind(done)?;
        if lowered.used {
            self.function.load_nil();
        }
        self.function.bind(end)?;
        Ok(())
    }
}

/// The parts of a `for` node shared by both loop shapes.
struct ForLoop<'n> {
    slot: usize,
    body: &'n Node,
    otherwise: &'n Node,
    used: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::bytecode::{Instruction, Module};
    use crate::ir::UnaryOp;
    use crate::value::Value;
    use crate::vm::{self, Globals, VmError, VmResult};

    fn b(node: Node) -> Box<Node> {
        Box::new(node)
    }

    fn bin(op: BinaryOp, lhs: Node, rhs: Node) -> Node {
        Node::Binary { op, lhs: b(lhs), rhs: b(rhs) }
    }

    fn set(target: Node, value: Node) -> Node {
        Node::Assign { target: b(target), value: b(value) }
    }

    fn range(from: i64, to: i64) -> Node {
        Node::Range { from: b(Node::Long(from)), to: b(Node::Long(to)) }
    }

    fn for_(slot: usize, iterable: Node, body: Node, otherwise: Node) -> Node {
        Node::For { slot, iterable: b(iterable), body: b(body), otherwise: b(otherwise) }
    }

    fn module(locals_count: usize, body: Node) -> Module {
        Module::read(&emit(&Root { locals_count, body }).unwrap()).unwrap()
    }

    fn run(locals_count: usize, body: Node) -> VmResult<Value> {
        let module = Arc::new(module(locals_count, body));
        vm::run(&module, &mut Globals::new())
    }

    fn main_code(module: &Module) -> Vec<Instruction> {
        let entry = module.entry().unwrap();
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < entry.code.len() {
            let (instruction, next) = Instruction::decode(&entry.code, pos).unwrap();
            out.push(instruction);
            pos = next;
        }
        out
    }

    /// `acc = acc * 10 + i` over the loop, so the visiting order shows up
    /// in the digits.
    fn digits(iterable: Node) -> Node {
        Node::Body(vec![
            set(Node::Local(0), Node::Long(0)),
            for_(
                1,
                iterable,
                set(Node::Local(0), bin(BinaryOp::Add, bin(BinaryOp::Mul, Node::Local(0), Node::Long(10)), Node::Local(1))),
                Node::empty_body(),
            ),
            Node::Local(0),
        ])
    }

    #[test]
    fn addition_uses_constant_pool_in_order() {
        let m = module(0, bin(BinaryOp::Add, Node::Long(1), Node::Long(2)));
        assert_eq!(
            main_code(&m),
            vec![
                Instruction::ConstantLong(0),
                Instruction::ConstantLong(1),
                Instruction::Binary(BinaryOp::Add),
            ]
        );
        assert_eq!(m.entry().unwrap().name.as_deref(), Some(MAIN_NAME));
        assert_eq!(vm::run(&Arc::new(m), &mut Globals::new()).unwrap(), Value::Long(3));
    }

    #[test]
    fn unused_values_are_popped() {
        let m = module(0, Node::Body(vec![Node::Long(1), Node::Nil]));
        assert_eq!(
            main_code(&m),
            vec![Instruction::ConstantLong(0), Instruction::Pop, Instruction::ConstantNil]
        );
    }

    #[test]
    fn empty_body_yields_nil() {
        assert_eq!(run(0, Node::empty_body()).unwrap(), Value::Nil);
        let m = module(0, Node::Body(vec![Node::empty_body(), Node::Long(1)]));
        assert_eq!(main_code(&m), vec![Instruction::ConstantLong(0)]);
    }

    #[test]
    fn assignment_value_is_the_result() {
        let body = Node::Body(vec![
            set(Node::Local(0), set(Node::Global("g".into()), Node::Long(4))),
            bin(BinaryOp::Add, Node::Local(0), Node::Global("g".into())),
        ]);
        assert_eq!(run(1, body).unwrap(), Value::Long(8));
    }

    #[test]
    fn member_assignment_in_expression_position() {
        let body = Node::Body(vec![
            set(Node::Local(0), Node::ObjectLiteral(vec![])),
            set(
                Node::Local(1),
                set(Node::Member { target: b(Node::Local(0)), key: b(Node::String("k".into())) }, Node::Long(5)),
            ),
            bin(
                BinaryOp::Add,
                Node::Local(1),
                Node::Member { target: b(Node::Local(0)), key: b(Node::String("k".into())) },
            ),
        ]);
        assert_eq!(run(2, body).unwrap(), Value::Long(10));
    }

    #[test]
    fn assigning_to_a_literal_is_rejected() {
        let err = emit(&Root { locals_count: 0, body: set(Node::Long(1), Node::Long(2)) }).unwrap_err();
        assert_eq!(err, EmitError::InvalidTarget { target: "1".into() });
    }

    #[test]
    fn and_or_short_circuit() {
        let boom = || Node::Throw(b(Node::String("boom".into())));
        assert_eq!(run(0, bin(BinaryOp::And, Node::Boolean(false), boom())).unwrap(), Value::Boolean(false));
        assert_eq!(run(0, bin(BinaryOp::Or, Node::Boolean(true), boom())).unwrap(), Value::Boolean(true));
        assert_eq!(run(0, bin(BinaryOp::And, Node::Boolean(true), Node::Boolean(false))).unwrap(), Value::Boolean(false));
        let err = run(0, bin(BinaryOp::Or, Node::Boolean(false), boom())).unwrap_err();
        assert!(matches!(err, VmError::Thrown(v) if v == Value::from("boom")));
    }

    #[test]
    fn if_in_both_positions() {
        let pick = |c| Node::If { condition: b(Node::Boolean(c)), then: b(Node::Long(1)), otherwise: b(Node::Long(2)) };
        assert_eq!(run(0, pick(true)).unwrap(), Value::Long(1));
        assert_eq!(run(0, pick(false)).unwrap(), Value::Long(2));
        assert_eq!(run(0, Node::Body(vec![pick(true), Node::Long(3)])).unwrap(), Value::Long(3));
    }

    #[test]
    fn while_yields_last_body_value_or_else() {
        let looping = |limit| {
            Node::Body(vec![
                set(Node::Local(0), Node::Long(0)),
                Node::While {
                    condition: b(bin(BinaryOp::Lt, Node::Local(0), Node::Long(limit))),
                    body: b(set(Node::Local(0), bin(BinaryOp::Add, Node::Local(0), Node::Long(1)))),
                    otherwise: b(Node::Long(99)),
                },
            ])
        };
        assert_eq!(run(1, looping(3)).unwrap(), Value::Long(3));
        assert_eq!(run(1, looping(0)).unwrap(), Value::Long(99));
    }

    #[test]
    fn while_as_statement_leaves_no_value() {
        let body = Node::Body(vec![
            set(Node::Local(0), Node::Long(0)),
            Node::While {
                condition: b(bin(BinaryOp::Lt, Node::Local(0), Node::Long(2))),
                body: b(set(Node::Local(0), bin(BinaryOp::Add, Node::Local(0), Node::Long(1)))),
                otherwise: b(Node::Long(99)),
            },
            Node::Local(0),
        ]);
        assert_eq!(run(1, body).unwrap(), Value::Long(2));
    }

    #[test]
    fn range_for_walks_in_both_directions() {
        assert_eq!(run(2, digits(range(1, 3))).unwrap(), Value::Long(123));
        assert_eq!(run(2, digits(range(3, 1))).unwrap(), Value::Long(321));
    }

    #[test]
    fn runtime_range_uses_the_same_loop() {
        let body = Node::Body(vec![set(Node::Local(2), range(3, 1)), digits(Node::Local(2))]);
        assert_eq!(run(3, body).unwrap(), Value::Long(321));
    }

    #[test]
    fn degenerate_range_runs_body_once_and_never_else() {
        let body = Node::Body(vec![
            set(Node::Local(0), Node::Long(0)),
            for_(
                1,
                range(5, 5),
                set(Node::Local(0), bin(BinaryOp::Add, Node::Local(0), Node::Long(1))),
                set(Node::Local(0), Node::Long(100)),
            ),
            Node::Local(0),
        ]);
        assert_eq!(run(2, body).unwrap(), Value::Long(1));
    }

    #[test]
    fn array_for_visits_in_index_order() {
        let array = Node::ArrayLiteral(vec![Node::Long(4), Node::Long(5), Node::Long(6)]);
        assert_eq!(run(2, digits(array)).unwrap(), Value::Long(456));
    }

    #[test]
    fn empty_array_runs_else() {
        let looped = for_(0, Node::ArrayLiteral(vec![]), Node::Long(1), Node::String("empty".into()));
        assert_eq!(run(1, looped).unwrap(), Value::from("empty"));
        let non_empty = for_(0, Node::ArrayLiteral(vec![Node::Long(1)]), Node::Long(1), Node::String("empty".into()));
        assert_eq!(run(1, non_empty).unwrap(), Value::Nil);
    }

    #[test]
    fn other_iterables_throw() {
        let err = run(1, for_(0, Node::Long(1), Node::Nil, Node::Nil)).unwrap_err();
        assert!(matches!(err, VmError::Thrown(v) if v == Value::from("For not implemented for value 1")));
    }

    #[test]
    fn loop_temporaries_grow_the_header() {
        let m = module(2, digits(range(1, 3)));
        // from, to, step and end on top of the two resolved slots
        assert_eq!(m.entry().unwrap().locals_count, 6);
    }

    #[test]
    fn type_tests_work_on_a_copy() {
        let m = module(2, Node::Body(vec![set(Node::Local(0), range(1, 2)), for_(1, Node::Local(0), Node::Nil, Node::Nil)]));
        let code = main_code(&m);
        let tests: Vec<_> = code
            .windows(2)
            .filter(|w| matches!(w[1], Instruction::TestType(_)))
            .map(|w| w[0])
            .collect();
        assert_eq!(tests, vec![Instruction::Dup, Instruction::Dup]);
    }

    #[test]
    fn nested_functions_get_preorder_ids() {
        let inner = Node::Function(Box::new(FunctionDef {
            name: Some("inner".into()),
            argument_count: 0,
            locals_count: 0,
            body: Node::Unary { op: UnaryOp::Neg, target: b(Node::Upvalue { level: 1, index: 0 }) },
            varargs: false,
            annotations: vec![],
        }));
        let outer = Node::Function(Box::new(FunctionDef {
            name: Some("outer".into()),
            argument_count: 1,
            locals_count: 1,
            body: Node::Call { target: b(inner), args: vec![] },
            varargs: false,
            annotations: vec!["pure".into()],
        }));
        let body = Node::Call { target: b(outer), args: vec![Node::Long(7)] };
        let m = module(0, body);
        let names: Vec<_> = m.functions().iter().map(|f| (f.id, f.display_name().to_string())).collect();
        assert_eq!(names, vec![(0, "$main".into()), (1, "outer".into()), (2, "inner".into())]);
        assert_eq!(m.function(1).unwrap().annotations, vec!["pure"]);
        assert_eq!(vm::run(&Arc::new(m), &mut Globals::new()).unwrap(), Value::Long(-7));
    }
}
