use std::collections::HashMap;

use tracing::{debug, trace};

use super::instruction::{Condition, Instruction};
use super::{Constant, FUNCTION_TAG, MAGIC, TypeTag, UNBOUND_TARGET, mutf8};
use crate::ir::{BinaryOp, UnaryOp};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    #[error("function {id} has already been written")]
    AlreadyWritten { id: u16 },
    #[error("function {id} has not been written")]
    NotWritten { id: u16 },
    #[error("function {id} was created but never written")]
    Unfinished { id: u16 },
    #[error("function {id} has unbound labels")]
    UnboundLabel { id: u16 },
    #[error("label {label} bound twice")]
    LabelRebound { label: usize },
    #[error("label {label} does not belong to function {id}")]
    UnknownLabel { label: usize, id: u16 },
    #[error("encoded string ({preview}) too long: {length} bytes")]
    StringTooLong { preview: String, length: usize },
    #[error("{what} out of bounds: {value}")]
    OutOfBounds { what: &'static str, value: usize },
    #[error("function {id} code is larger than 65535 bytes")]
    CodeTooLarge { id: u16 },
}

pub type WriteResult<T> = Result<T, WriteError>;

fn check_u16(what: &'static str, value: usize) -> WriteResult<u16> {
    u16::try_from(value).map_err(|_| WriteError::OutOfBounds { what, value })
}

fn preview(s: &str) -> String {
    let count = s.chars().count();
    if count <= 16 {
        return s.to_string();
    }
    let head: String = s.chars().take(8).collect();
    let tail: String = s.chars().skip(count - 8).collect();
    format!("{head}...{tail}")
}

// ── Byte buffer ──────────────────────────────────────────────────────

/// Growable big-endian output buffer with in-place patching.
#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Length-prefixed modified UTF-8. Callers validate the length first.
    pub fn utf(&mut self, s: &str) {
        let mut encoded = Vec::with_capacity(s.len());
        mutf8::encode(s, &mut encoded);
        self.u16(encoded.len() as u16);
        self.buf.extend_from_slice(&encoded);
    }

    pub fn patch_u16(&mut self, offset: usize, v: u16) {
        self.buf[offset..offset + 2].copy_from_slice(&v.to_be_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

// ── Module writer ────────────────────────────────────────────────────

/// Accumulates a constant pool and finished function records.
#[derive(Debug, Default)]
pub struct ModuleWriter {
    constants: Vec<Constant>,
    interned: HashMap<Constant, u16>,
    /// One entry per created function; true once its record is written.
    written: Vec<bool>,
    records: ByteWriter,
    entrypoint: u16,
}

impl ModuleWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new function and assigns it the next id.
    pub fn create_function(
        &mut self,
        name: Option<&str>,
        argument_count: usize,
        locals_count: usize,
        varargs: bool,
        annotations: &[String],
    ) -> WriteResult<FunctionWriter> {
        let argument_count = check_u16("argument count", argument_count)?;
        let locals_count = check_u16("locals count", locals_count)?;
        let annotation_count = check_u16("annotation count", annotations.len())?;
        check_u16("function count", self.written.len() + 1)?;
        let id = self.written.len() as u16;

        // name and annotation indices are interned when the function ends,
        // so the pool lists body constants first
        let mut names = Vec::with_capacity(annotations.len() + 1);
        let mut header = ByteWriter::new();
        header.u16(id);
        header.bool(name.is_some());
        if let Some(name) = name {
            names.push((header.len(), name.to_string()));
            header.u16(0);
        }
        header.u16(argument_count);
        let locals_offset = header.len();
        header.u16(locals_count);
        header.bool(varargs);
        header.u16(annotation_count);
        for annotation in annotations {
            names.push((header.len(), annotation.clone()));
            header.u16(0);
        }
        self.written.push(false);
        trace!(id, ?name, argument_count, locals_count, "function created");

        Ok(FunctionWriter {
            id,
            code_start: header.len(),
            out: header,
            locals_offset,
            locals_count,
            names,
            labels: Vec::new(),
            fixups: HashMap::new(),
        })
    }

    /// Interns a constant, returning the index of an equal entry if one
    /// already exists.
    pub fn constant(&mut self, constant: Constant) -> WriteResult<u16> {
        if let Some(&index) = self.interned.get(&constant) {
            return Ok(index);
        }
        if let Constant::String(s) = &constant {
            let length = mutf8::encoded_len(s);
            if length > mutf8::MAX_ENCODED_LEN {
                return Err(WriteError::StringTooLong { preview: preview(s), length });
            }
        }
        check_u16("constant pool size", self.constants.len() + 1)?;
        let index = self.constants.len() as u16;
        self.interned.insert(constant.clone(), index);
        self.constants.push(constant);
        Ok(index)
    }

    pub fn constant_long(&mut self, value: i64) -> WriteResult<u16> {
        self.constant(Constant::Long(value))
    }

    pub fn constant_double(&mut self, value: f64) -> WriteResult<u16> {
        self.constant(Constant::Double(value))
    }

    pub fn constant_string(&mut self, value: &str) -> WriteResult<u16> {
        self.constant(Constant::String(value.to_string()))
    }

    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    pub fn set_entrypoint(&mut self, id: u16) -> WriteResult<()> {
        if !self.written.get(id as usize).copied().unwrap_or(false) {
            return Err(WriteError::NotWritten { id });
        }
        self.entrypoint = id;
        Ok(())
    }

    pub(crate) fn write_function(&mut self, id: u16, body: &ByteWriter) -> WriteResult<()> {
        let slot = self.written.get_mut(id as usize).ok_or(WriteError::NotWritten { id })?;
        if *slot {
            return Err(WriteError::AlreadyWritten { id });
        }
        *slot = true;
        self.records.u16(FUNCTION_TAG);
        self.records.u32(body.len() as u32);
        self.records.bytes(body.as_slice());
        trace!(id, bytes = body.len(), "function written");
        Ok(())
    }

    /// Serializes the module. Fails if any created function was never
    /// finished.
    pub fn finish(self) -> WriteResult<Vec<u8>> {
        if let Some(id) = self.written.iter().position(|w| !w) {
            return Err(WriteError::Unfinished { id: id as u16 });
        }
        let constant_count = check_u16("constant pool size", self.constants.len())?;
        let function_count = check_u16("function count", self.written.len())?;
        let mut out = ByteWriter::new();
        out.u32(MAGIC);
        out.u16(constant_count);
        for constant in &self.constants {
            out.u8(constant.tag());
            match constant {
                Constant::Long(n) => out.i64(*n),
                Constant::Double(n) => out.f64(*n),
                Constant::String(s) => out.utf(s),
            }
        }
        out.u16(self.entrypoint);
        out.u16(function_count);
        out.bytes(self.records.as_slice());
        debug!(
            constants = self.constants.len(),
            functions = self.written.len(),
            bytes = out.len(),
            "module serialized"
        );
        Ok(out.into_inner())
    }
}

// ── Function writer ──────────────────────────────────────────────────

/// Forward-reference target inside one function's code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

/// Emits one function's header and code into a private buffer.
///
/// Jumps to labels that are not bound yet are written as `0xFFFF` and
/// patched when the function ends.
#[derive(Debug)]
pub struct FunctionWriter {
    id: u16,
    out: ByteWriter,
    code_start: usize,
    locals_offset: usize,
    locals_count: u16,
    /// Header offsets still waiting for a string constant index.
    names: Vec<(usize, String)>,
    labels: Vec<Option<u16>>,
    fixups: HashMap<Label, Vec<usize>>,
}

impl FunctionWriter {
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Code emitted so far, excluding the header.
    pub fn code(&self) -> &[u8] {
        &self.out.as_slice()[self.code_start..]
    }

    pub fn locals_count(&self) -> u16 {
        self.locals_count
    }

    /// Reserves a fresh local slot and patches the header's locals count.
    pub fn new_local(&mut self) -> WriteResult<u16> {
        let slot = self.locals_count;
        let count = check_u16("locals count", slot as usize + 1)?;
        self.locals_count = count;
        self.out.patch_u16(self.locals_offset, count);
        Ok(slot)
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    fn position(&self) -> WriteResult<u16> {
        u16::try_from(self.out.len() - self.code_start).map_err(|_| WriteError::CodeTooLarge { id: self.id })
    }

    /// Binds `label` to the current code position.
    pub fn bind(&mut self, label: Label) -> WriteResult<()> {
        let position = self.position()?;
        let id = self.id;
        let entry = self.labels.get_mut(label.0).ok_or(WriteError::UnknownLabel { label: label.0, id })?;
        if entry.is_some() {
            return Err(WriteError::LabelRebound { label: label.0 });
        }
        *entry = Some(position);
        Ok(())
    }

    fn target(&mut self, label: Label) -> WriteResult<u16> {
        match self.labels.get(label.0) {
            Some(Some(position)) => Ok(*position),
            Some(None) => {
                // operand follows the opcode (and condition byte) already written
                self.fixups.entry(label).or_default().push(self.out.len() + 1);
                Ok(UNBOUND_TARGET)
            }
            None => Err(WriteError::UnknownLabel { label: label.0, id: self.id }),
        }
    }

    pub fn emit(&mut self, instruction: Instruction) {
        instruction.encode(&mut self.out);
    }

    pub fn load_nil(&mut self) {
        self.emit(Instruction::ConstantNil);
    }

    pub fn load_bool(&mut self, value: bool) {
        self.emit(Instruction::ConstantBoolean(value));
    }

    pub fn load_long(&mut self, module: &mut ModuleWriter, value: i64) -> WriteResult<()> {
        let index = module.constant_long(value)?;
        self.emit(Instruction::ConstantLong(index));
        Ok(())
    }

    pub fn load_double(&mut self, module: &mut ModuleWriter, value: f64) -> WriteResult<()> {
        let index = module.constant_double(value)?;
        self.emit(Instruction::ConstantDouble(index));
        Ok(())
    }

    pub fn load_string(&mut self, module: &mut ModuleWriter, value: &str) -> WriteResult<()> {
        let index = module.constant_string(value)?;
        self.emit(Instruction::ConstantString(index));
        Ok(())
    }

    pub fn create_array(&mut self, count: usize) -> WriteResult<()> {
        let count = check_u16("array literal size", count)?;
        self.emit(Instruction::CreateArray(count));
        Ok(())
    }

    pub fn create_object(&mut self, count: usize) -> WriteResult<()> {
        let count = check_u16("object literal size", count)?;
        self.emit(Instruction::CreateObject(count));
        Ok(())
    }

    pub fn create_range(&mut self) {
        self.emit(Instruction::CreateRange);
    }

    pub fn load_local(&mut self, slot: usize) -> WriteResult<()> {
        let slot = check_u16("local slot", slot)?;
        self.emit(Instruction::LoadLocal(slot));
        Ok(())
    }

    pub fn store_local(&mut self, slot: usize) -> WriteResult<()> {
        let slot = check_u16("local slot", slot)?;
        self.emit(Instruction::StoreLocal(slot));
        Ok(())
    }

    pub fn load_upvalue(&mut self, level: usize, index: usize) -> WriteResult<()> {
        let level = check_u16("upvalue level", level)?;
        let index = check_u16("upvalue slot", index)?;
        self.emit(Instruction::LoadUpvalue { level, index });
        Ok(())
    }

    pub fn store_upvalue(&mut self, level: usize, index: usize) -> WriteResult<()> {
        let level = check_u16("upvalue level", level)?;
        let index = check_u16("upvalue slot", index)?;
        self.emit(Instruction::StoreUpvalue { level, index });
        Ok(())
    }

    pub fn load_global(&mut self, module: &mut ModuleWriter, name: &str) -> WriteResult<()> {
        let index = module.constant_string(name)?;
        self.emit(Instruction::LoadGlobal(index));
        Ok(())
    }

    pub fn store_global(&mut self, module: &mut ModuleWriter, name: &str) -> WriteResult<()> {
        let index = module.constant_string(name)?;
        self.emit(Instruction::StoreGlobal(index));
        Ok(())
    }

    pub fn load_member(&mut self) {
        self.emit(Instruction::LoadMember);
    }

    pub fn store_member(&mut self) {
        self.emit(Instruction::StoreMember);
    }

    pub fn call(&mut self, argument_count: usize) -> WriteResult<()> {
        let count = check_u16("call argument count", argument_count)?;
        self.emit(Instruction::Call(count));
        Ok(())
    }

    pub fn ret(&mut self) {
        self.emit(Instruction::Return);
    }

    pub fn binary(&mut self, op: BinaryOp) {
        self.emit(Instruction::Binary(op));
    }

    pub fn unary(&mut self, op: UnaryOp) {
        self.emit(Instruction::Unary(op));
    }

    pub fn jump(&mut self, label: Label) -> WriteResult<()> {
        let target = self.target(label)?;
        self.emit(Instruction::Jump(target));
        Ok(())
    }

    pub fn jump_if(&mut self, condition: Condition, label: Label) -> WriteResult<()> {
        // the target operand sits after the condition byte
        let target = match self.labels.get(label.0) {
            Some(Some(position)) => *position,
            Some(None) => {
                self.fixups.entry(label).or_default().push(self.out.len() + 2);
                UNBOUND_TARGET
            }
            None => return Err(WriteError::UnknownLabel { label: label.0, id: self.id }),
        };
        self.emit(Instruction::JumpIf(condition, target));
        Ok(())
    }

    pub fn load_function(&mut self, id: u16) {
        self.emit(Instruction::LoadFunction(id));
    }

    pub fn pop(&mut self) {
        self.emit(Instruction::Pop);
    }

    pub fn dup(&mut self) {
        self.emit(Instruction::Dup);
    }

    pub fn throw(&mut self) {
        self.emit(Instruction::Throw);
    }

    pub fn test_type(&mut self, tag: TypeTag) {
        self.emit(Instruction::TestType(tag));
    }

    pub fn size(&mut self) {
        self.emit(Instruction::Size);
    }

    pub fn swap2(&mut self) {
        self.emit(Instruction::Swap2);
    }

    /// Resolves pending jumps and hands the record to the module. Returns
    /// the function's id.
    pub fn end(mut self, module: &mut ModuleWriter) -> WriteResult<u16> {
        self.position()?;
        for (label, offsets) in std::mem::take(&mut self.fixups) {
            let target = self.labels[label.0].ok_or(WriteError::UnboundLabel { id: self.id })?;
            for offset in offsets {
                self.out.patch_u16(offset, target);
            }
        }
        if self.labels.iter().any(Option::is_none) {
            return Err(WriteError::UnboundLabel { id: self.id });
        }
        for (offset, name) in std::mem::take(&mut self.names) {
            let index = module.constant_string(&name)?;
            self.out.patch_u16(offset, index);
        }
        module.write_function(self.id, &self.out)?;
        Ok(self.id)
    }
}
