use std::rc::Rc;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::bytecode::{DecodeError, FormatError, FunctionInfo, Instruction, Module};
use crate::value::{Function, FunctionKind, Thrown, Value, ops};

mod frame;

pub use frame::{Frame, Globals};

/// Failures of the machine itself: malformed code or exhausted limits.
/// Script code can never catch these.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmFault {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("operand stack underflow in function {function} at offset {offset}")]
    StackUnderflow { function: u16, offset: usize },
    #[error("local slot {index} out of range in function {function}")]
    LocalOutOfRange { function: u16, index: u16 },
    #[error("upvalue {level}:{index} out of range in function {function}")]
    UpvalueOutOfRange { function: u16, level: u16, index: u16 },
    #[error("jump target {target} out of bounds in function {function}")]
    JumpOutOfBounds { function: u16, target: u16 },
    #[error("step limit of {limit} exceeded")]
    StepLimitExceeded { limit: u64 },
    #[error("call depth limit of {limit} exceeded")]
    CallDepthExceeded { limit: usize },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum VmError {
    #[error(transparent)]
    Fault(#[from] VmFault),
    #[error("uncaught error: {}", .0.tostring())]
    Thrown(Value),
}

impl From<Thrown> for VmError {
    fn from(thrown: Thrown) -> Self {
        VmError::Thrown(thrown.0)
    }
}

impl VmError {
    pub fn is_thrown(&self) -> bool {
        matches!(self, VmError::Thrown(_))
    }
}

pub type VmResult<T> = Result<T, VmError>;

#[derive(Debug, Clone, Copy)]
pub struct VmOptions {
    /// Instructions a single run may execute before aborting.
    pub max_steps: Option<u64>,
    pub max_call_depth: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions { max_steps: None, max_call_depth: 256 }
    }
}

/// Runs a module's entry function against `globals` with default limits.
pub fn run(module: &Arc<Module>, globals: &mut Globals) -> VmResult<Value> {
    Vm::new(globals).run(module)
}

// ── Operand stack ────────────────────────────────────────────────────

/// Per-call operand stack. Underflow is reported against the instruction
/// being executed.
struct Operands {
    values: Vec<Value>,
    function: u16,
    offset: usize,
}

impl Operands {
    fn underflow(&self) -> VmFault {
        VmFault::StackUnderflow { function: self.function, offset: self.offset }
    }

    fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    fn pop(&mut self) -> Result<Value, VmFault> {
        self.values.pop().ok_or_else(|| self.underflow())
    }

    fn peek(&self) -> Result<&Value, VmFault> {
        self.values.last().ok_or_else(|| self.underflow())
    }

    /// The function's result: the top of the stack, or nil when it is empty.
    fn result(&mut self) -> Value {
        self.values.pop().unwrap_or(Value::Nil)
    }

    /// Pops `n` values, returned in push order.
    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, VmFault> {
        if self.values.len() < n {
            return Err(self.underflow());
        }
        Ok(self.values.split_off(self.values.len() - n))
    }
}

// ── Machine ──────────────────────────────────────────────────────────

pub struct Vm<'g> {
    globals: &'g mut Globals,
    options: VmOptions,
    steps: u64,
    depth: usize,
}

impl<'g> Vm<'g> {
    pub fn new(globals: &'g mut Globals) -> Self {
        Self::with_options(globals, VmOptions::default())
    }

    pub fn with_options(globals: &'g mut Globals, options: VmOptions) -> Self {
        Vm { globals, options, steps: 0, depth: 0 }
    }

    pub fn globals(&mut self) -> &mut Globals {
        &mut *self.globals
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Executes the module's entry function in a fresh root frame.
    pub fn run(&mut self, module: &Arc<Module>) -> VmResult<Value> {
        let entry = module.entry().map_err(VmFault::from)?;
        let frame = Frame::new(entry.locals_count as usize, None);
        self.enter()?;
        let result = self.execute(module, entry, frame);
        self.depth -= 1;
        result
    }

    /// Calls any function value. Natives receive this machine and may
    /// re-enter it.
    pub fn call(&mut self, callee: &Value, args: Vec<Value>) -> VmResult<Value> {
        let Value::Function(function) = callee else {
            return Err(Thrown::message(format!("Attempt to call {}", callee.type_name())).into());
        };
        self.enter()?;
        let result = self.invoke(function, args);
        self.depth -= 1;
        result
    }

    fn enter(&mut self) -> VmResult<()> {
        if self.depth >= self.options.max_call_depth {
            return Err(VmFault::CallDepthExceeded { limit: self.options.max_call_depth }.into());
        }
        self.depth += 1;
        Ok(())
    }

    fn invoke(&mut self, function: &Rc<Function>, args: Vec<Value>) -> VmResult<Value> {
        match &function.kind {
            FunctionKind::Native(native) => {
                trace!(name = ?function.name, argc = args.len(), "native call");
                native(self, args)
            }
            FunctionKind::Script { module, id, captured } => {
                trace!(id, argc = args.len(), "call");
                let info = module.function(*id).map_err(VmFault::from)?;
                let frame = Frame::new(info.locals_count as usize, Some(captured.clone()));
                frame.fill_from_args(info.argument_count as usize, info.varargs, args);
                self.execute(module, info, frame)
            }
        }
    }

    fn tick(&mut self) -> Result<(), VmFault> {
        self.steps += 1;
        if let Some(limit) = self.options.max_steps {
            if self.steps > limit {
                warn!(limit, "step limit exceeded, aborting");
                return Err(VmFault::StepLimitExceeded { limit });
            }
        }
        Ok(())
    }

    fn execute(&mut self, module: &Arc<Module>, function: &FunctionInfo, frame: Rc<Frame>) -> VmResult<Value> {
        let code = &function.code;
        let id = function.id;
        let mut stack = Operands { values: Vec::with_capacity(16), function: id, offset: 0 };
        let mut ip = 0;

        while ip < code.len() {
            self.tick()?;
            stack.offset = ip;
            let (instruction, next) = Instruction::decode(code, ip).map_err(VmFault::from)?;
            ip = next;

            match instruction {
                Instruction::ConstantNil => stack.push(Value::Nil),
                Instruction::ConstantBoolean(b) => stack.push(Value::Boolean(b)),
                Instruction::ConstantLong(index) => {
                    stack.push(Value::Long(module.constant_long(index).map_err(VmFault::from)?));
                }
                Instruction::ConstantDouble(index) => {
                    stack.push(Value::Double(module.constant_double(index).map_err(VmFault::from)?));
                }
                Instruction::ConstantString(index) => {
                    stack.push(Value::from(module.constant_string(index).map_err(VmFault::from)?));
                }
                Instruction::CreateArray(count) => {
                    let values = stack.pop_n(count as usize)?;
                    stack.push(Value::array(values));
                }
                Instruction::CreateObject(count) => {
                    let flat = stack.pop_n(count as usize * 2)?;
                    let mut entries = Vec::with_capacity(count as usize);
                    let mut it = flat.into_iter();
                    while let (Some(key), Some(value)) = (it.next(), it.next()) {
                        entries.push((key, value));
                    }
                    stack.push(Value::object(entries));
                }
                Instruction::CreateRange => {
                    let to = stack.pop()?;
                    let from = stack.pop()?;
                    match (&from, &to) {
                        (Value::Long(a), Value::Long(b)) => stack.push(Value::range(*a, *b)),
                        _ => {
                            return Err(Thrown::message(format!(
                                "Attempt to create range between {} and {}",
                                from.type_name(),
                                to.type_name()
                            ))
                            .into());
                        }
                    }
                }
                Instruction::LoadLocal(index) => {
                    let value = frame.local(index as usize).ok_or(VmFault::LocalOutOfRange { function: id, index })?;
                    stack.push(value);
                }
                Instruction::StoreLocal(index) => {
                    let value = stack.pop()?;
                    if !frame.set_local(index as usize, value) {
                        return Err(VmFault::LocalOutOfRange { function: id, index }.into());
                    }
                }
                Instruction::LoadUpvalue { level, index } => {
                    let value = frame
                        .ancestor(level as usize)
                        .and_then(|f| f.local(index as usize))
                        .ok_or(VmFault::UpvalueOutOfRange { function: id, level, index })?;
                    stack.push(value);
                }
                Instruction::StoreUpvalue { level, index } => {
                    let value = stack.pop()?;
                    let stored = frame.ancestor(level as usize).is_some_and(|f| f.set_local(index as usize, value));
                    if !stored {
                        return Err(VmFault::UpvalueOutOfRange { function: id, level, index }.into());
                    }
                }
                Instruction::LoadGlobal(index) => {
                    let name = module.constant_string(index).map_err(VmFault::from)?;
                    stack.push(self.globals.get(name));
                }
                Instruction::StoreGlobal(index) => {
                    let name = module.constant_string(index).map_err(VmFault::from)?;
                    let value = stack.pop()?;
                    self.globals.set(name, value);
                }
                Instruction::LoadMember => {
                    let key = stack.pop()?;
                    let target = stack.pop()?;
                    stack.push(ops::get_member(&target, &key)?);
                }
                Instruction::StoreMember => {
                    let value = stack.pop()?;
                    let key = stack.pop()?;
                    let target = stack.pop()?;
                    ops::set_member(&target, key, value)?;
                }
                Instruction::Call(argc) => {
                    let args = stack.pop_n(argc as usize)?;
                    let callee = stack.pop()?;
                    let result = self.call(&callee, args)?;
                    stack.push(result);
                }
                Instruction::Return => return Ok(stack.result()),
                Instruction::Binary(op) => {
                    let rhs = stack.pop()?;
                    let lhs = stack.pop()?;
                    stack.push(ops::binary(op, &lhs, &rhs)?);
                }
                Instruction::Unary(op) => {
                    let target = stack.pop()?;
                    stack.push(ops::unary(op, &target)?);
                }
                Instruction::Jump(target) => {
                    ip = jump_target(code, id, target)?;
                }
                Instruction::JumpIf(condition, target) => {
                    let value = stack.pop()?;
                    let Some(b) = value.as_bool() else {
                        return Err(Thrown::message("not a boolean").into());
                    };
                    if condition.holds(b) {
                        ip = jump_target(code, id, target)?;
                    }
                }
                Instruction::LoadFunction(function_id) => {
                    module.function(function_id).map_err(VmFault::from)?;
                    let closure = Function::script(module.clone(), function_id, frame.clone());
                    stack.push(Value::Function(Rc::new(closure)));
                }
                Instruction::Pop => {
                    stack.pop()?;
                }
                Instruction::Dup => {
                    let top = stack.peek()?.clone();
                    stack.push(top);
                }
                Instruction::Throw => {
                    let value = stack.pop()?;
                    return Err(VmError::Thrown(value));
                }
                Instruction::TestType(tag) => {
                    let value = stack.pop()?;
                    stack.push(Value::Boolean(tag.matches(&value)));
                }
                Instruction::Size => {
                    let target = stack.pop()?;
                    stack.push(Value::Long(ops::size(&target)?));
                }
                Instruction::Swap2 => {
                    let top = stack.pop()?;
                    let below = stack.pop()?;
                    stack.push(top);
                    stack.push(below);
                }
            }
        }
        Ok(stack.result())
    }
}

fn jump_target(code: &[u8], function: u16, target: u16) -> Result<usize, VmFault> {
    if target as usize > code.len() {
        return Err(VmFault::JumpOutOfBounds { function, target });
    }
    Ok(target as usize)
}
