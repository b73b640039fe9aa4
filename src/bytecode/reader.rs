use tracing::{debug, trace};

use super::instruction::{DecodeError, Instruction};
use super::mutf8::{self, Mutf8Error};
use super::{CONSTANT_DOUBLE, CONSTANT_LONG, CONSTANT_STRING, Constant, FUNCTION_TAG, MAGIC};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormatError {
    #[error("invalid magic 0x{found:08x}")]
    BadMagic { found: u32 },
    #[error("invalid constant pool tag 0x{tag:02x}")]
    BadConstantTag { tag: u8 },
    #[error("invalid function tag 0x{found:04x}")]
    BadFunctionTag { found: u16 },
    #[error("unexpected end of input at offset {offset}: needed {needed} more bytes")]
    Truncated { offset: usize, needed: usize },
    #[error("malformed string constant: {0}")]
    Utf(#[from] Mutf8Error),
    #[error("constant {index} out of range: pool has {len} entries")]
    ConstantOutOfRange { index: u16, len: usize },
    #[error("constant {index} is a {found}, expected a {expected}")]
    ConstantType { index: u16, expected: &'static str, found: &'static str },
    #[error("no function with id {id}")]
    UnknownFunction { id: u16 },
    #[error("function {id} defined twice")]
    DuplicateFunction { id: u16 },
    #[error("module declares {declared} functions but contains {found}")]
    FunctionCount { declared: u16, found: u16 },
    #[error("{0}")]
    Decode(#[from] DecodeError),
}

pub type FormatResult<T> = Result<T, FormatError>;

// ── Byte cursor ──────────────────────────────────────────────────────

/// Big-endian cursor over a borrowed buffer. Offsets in errors are
/// absolute within the original input.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteReader { data, pos: 0, base: 0 }
    }

    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> FormatResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(FormatError::Truncated { offset: self.offset(), needed: n - self.remaining() });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> FormatResult<[u8; N]> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> FormatResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> FormatResult<bool> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> FormatResult<u16> {
        self.array().map(u16::from_be_bytes)
    }

    pub fn u32(&mut self) -> FormatResult<u32> {
        self.array().map(u32::from_be_bytes)
    }

    pub fn i64(&mut self) -> FormatResult<i64> {
        self.array().map(i64::from_be_bytes)
    }

    pub fn f64(&mut self) -> FormatResult<f64> {
        self.array().map(|b| f64::from_bits(u64::from_be_bytes(b)))
    }

    pub fn utf(&mut self) -> FormatResult<String> {
        let len = self.u16()? as usize;
        Ok(mutf8::decode(self.take(len)?)?)
    }

    /// Splits off the next `n` bytes as an independent reader.
    pub fn sub(&mut self, n: usize) -> FormatResult<ByteReader<'a>> {
        let base = self.offset();
        let data = self.take(n)?;
        Ok(ByteReader { data, pos: 0, base })
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }
}

// ── Constant lookup ──────────────────────────────────────────────────

fn constant_at(constants: &[Constant], index: u16) -> FormatResult<&Constant> {
    constants
        .get(index as usize)
        .ok_or(FormatError::ConstantOutOfRange { index, len: constants.len() })
}

fn mismatch(index: u16, expected: &'static str, found: &Constant) -> FormatError {
    FormatError::ConstantType { index, expected, found: found.type_name() }
}

fn long_at(constants: &[Constant], index: u16) -> FormatResult<i64> {
    match constant_at(constants, index)? {
        Constant::Long(n) => Ok(*n),
        other => Err(mismatch(index, "long", other)),
    }
}

fn double_at(constants: &[Constant], index: u16) -> FormatResult<f64> {
    match constant_at(constants, index)? {
        Constant::Double(n) => Ok(*n),
        other => Err(mismatch(index, "double", other)),
    }
}

fn string_at(constants: &[Constant], index: u16) -> FormatResult<&str> {
    match constant_at(constants, index)? {
        Constant::String(s) => Ok(s),
        other => Err(mismatch(index, "string", other)),
    }
}

// ── Streaming reader ─────────────────────────────────────────────────

/// Reads a module front to back. The constant pool is decoded eagerly;
/// function records are handed out one at a time.
#[derive(Debug)]
pub struct ModuleReader<'a> {
    reader: ByteReader<'a>,
    constants: Vec<Constant>,
    entrypoint: u16,
    function_count: u16,
    functions_read: u16,
}

impl<'a> ModuleReader<'a> {
    pub fn new(data: &'a [u8]) -> FormatResult<Self> {
        let mut reader = ByteReader::new(data);
        let magic = reader.u32()?;
        if magic != MAGIC {
            return Err(FormatError::BadMagic { found: magic });
        }
        let count = reader.u16()?;
        let mut constants = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let constant = match reader.u8()? {
                CONSTANT_LONG => Constant::Long(reader.i64()?),
                CONSTANT_DOUBLE => Constant::Double(reader.f64()?),
                CONSTANT_STRING => Constant::String(reader.utf()?),
                tag => return Err(FormatError::BadConstantTag { tag }),
            };
            constants.push(constant);
        }
        let entrypoint = reader.u16()?;
        let function_count = reader.u16()?;
        debug!(constants = constants.len(), entrypoint, function_count, "module header read");
        Ok(ModuleReader { reader, constants, entrypoint, function_count, functions_read: 0 })
    }

    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    pub fn constant_long(&self, index: u16) -> FormatResult<i64> {
        long_at(&self.constants, index)
    }

    pub fn constant_double(&self, index: u16) -> FormatResult<f64> {
        double_at(&self.constants, index)
    }

    pub fn constant_string(&self, index: u16) -> FormatResult<&str> {
        string_at(&self.constants, index)
    }

    pub fn entrypoint(&self) -> u16 {
        self.entrypoint
    }

    pub fn function_count(&self) -> u16 {
        self.function_count
    }

    /// Next function record, or `None` once every declared function has
    /// been read.
    pub fn read_function(&mut self) -> FormatResult<Option<FunctionReader<'a>>> {
        if self.functions_read >= self.function_count {
            return Ok(None);
        }
        let tag = self.reader.u16()?;
        if tag != FUNCTION_TAG {
            return Err(FormatError::BadFunctionTag { found: tag });
        }
        let size = self.reader.u32()? as usize;
        let mut record = self.reader.sub(size)?;
        self.functions_read += 1;

        let id = record.u16()?;
        let name = if record.bool()? {
            Some(self.constant_string(record.u16()?)?.to_string())
        } else {
            None
        };
        let argument_count = record.u16()?;
        let locals_count = record.u16()?;
        let varargs = record.bool()?;
        let annotation_count = record.u16()?;
        let mut annotations = Vec::with_capacity(annotation_count as usize);
        for _ in 0..annotation_count {
            annotations.push(self.constant_string(record.u16()?)?.to_string());
        }
        let code_offset = record.offset();
        let code = record.rest();
        Ok(Some(FunctionReader { id, name, argument_count, locals_count, varargs, annotations, code, code_offset }))
    }
}

/// One decoded function header with a view of its code.
#[derive(Debug, Clone)]
pub struct FunctionReader<'a> {
    pub id: u16,
    pub name: Option<String>,
    pub argument_count: u16,
    pub locals_count: u16,
    pub varargs: bool,
    pub annotations: Vec<String>,
    pub code: &'a [u8],
    /// Absolute offset of `code` within the module.
    pub code_offset: usize,
}

impl FunctionReader<'_> {
    /// Decodes the code stream, yielding each instruction with its offset.
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions { code: self.code, pos: 0, failed: false }
    }

    pub fn to_info(&self) -> FunctionInfo {
        FunctionInfo {
            id: self.id,
            name: self.name.clone(),
            argument_count: self.argument_count,
            locals_count: self.locals_count,
            varargs: self.varargs,
            annotations: self.annotations.clone(),
            code: self.code.to_vec(),
        }
    }
}

pub struct Instructions<'a> {
    code: &'a [u8],
    pos: usize,
    failed: bool,
}

impl Iterator for Instructions<'_> {
    type Item = Result<(usize, Instruction), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.code.len() {
            return None;
        }
        match Instruction::decode(self.code, self.pos) {
            Ok((instruction, next)) => {
                let at = self.pos;
                self.pos = next;
                Some(Ok((at, instruction)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

// ── Loaded module ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInfo {
    pub id: u16,
    pub name: Option<String>,
    pub argument_count: u16,
    pub locals_count: u16,
    pub varargs: bool,
    pub annotations: Vec<String>,
    pub code: Vec<u8>,
}

impl FunctionInfo {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

/// Fully loaded module with functions indexed by id.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    constants: Vec<Constant>,
    entrypoint: u16,
    functions: Vec<FunctionInfo>,
}

impl Module {
    pub fn read(data: &[u8]) -> FormatResult<Module> {
        let mut reader = ModuleReader::new(data)?;
        let declared = reader.function_count();
        let mut slots: Vec<Option<FunctionInfo>> = vec![None; declared as usize];
        while let Some(function) = reader.read_function()? {
            let id = function.id;
            let slot = slots.get_mut(id as usize).ok_or(FormatError::UnknownFunction { id })?;
            if slot.is_some() {
                return Err(FormatError::DuplicateFunction { id });
            }
            *slot = Some(function.to_info());
        }
        let functions: Vec<FunctionInfo> = slots.into_iter().flatten().collect();
        if functions.len() != declared as usize {
            return Err(FormatError::FunctionCount { declared, found: functions.len() as u16 });
        }
        let entrypoint = reader.entrypoint();
        if declared > 0 && entrypoint >= declared {
            return Err(FormatError::UnknownFunction { id: entrypoint });
        }
        trace!(constants = reader.constants().len(), functions = declared, entrypoint, "module loaded");
        Ok(Module { constants: reader.constants, entrypoint, functions })
    }

    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    pub fn constant_long(&self, index: u16) -> FormatResult<i64> {
        long_at(&self.constants, index)
    }

    pub fn constant_double(&self, index: u16) -> FormatResult<f64> {
        double_at(&self.constants, index)
    }

    pub fn constant_string(&self, index: u16) -> FormatResult<&str> {
        string_at(&self.constants, index)
    }

    pub fn entrypoint(&self) -> u16 {
        self.entrypoint
    }

    pub fn functions(&self) -> &[FunctionInfo] {
        &self.functions
    }

    pub fn function(&self, id: u16) -> FormatResult<&FunctionInfo> {
        self.functions.get(id as usize).ok_or(FormatError::UnknownFunction { id })
    }

    pub fn entry(&self) -> FormatResult<&FunctionInfo> {
        self.function(self.entrypoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::writer::ModuleWriter;

    fn two_function_module() -> Vec<u8> {
        let mut m = ModuleWriter::new();
        let main = m.create_function(Some("main"), 0, 1, false, &[]).unwrap();
        let mut inner = m.create_function(None, 2, 2, true, &["a".to_string(), "b".to_string()]).unwrap();
        inner.load_double(&mut m, 2.5).unwrap();
        inner.ret();
        let inner_id = inner.end(&mut m).unwrap();
        let mut main = main;
        main.load_function(inner_id);
        main.ret();
        let main_id = main.end(&mut m).unwrap();
        m.set_entrypoint(main_id).unwrap();
        m.finish().unwrap()
    }

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn header_parse_logs_at_debug() {
        let bytes = two_function_module();
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            ModuleReader::new(&bytes).unwrap();
        });
        let text = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let line = text.lines().find(|l| l.contains("module header read")).expect("header line logged");
        assert!(line.contains("DEBUG"), "{line}");
        assert!(line.contains("function_count=2"), "{line}");
    }

    #[test]
    fn streams_records_in_written_order() {
        let bytes = two_function_module();
        let mut r = ModuleReader::new(&bytes).unwrap();
        assert_eq!(r.function_count(), 2);
        assert_eq!(r.entrypoint(), 0);
        let first = r.read_function().unwrap().unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(first.name, None);
        assert_eq!((first.argument_count, first.locals_count, first.varargs), (2, 2, true));
        assert_eq!(first.annotations, vec!["a", "b"]);
        let second = r.read_function().unwrap().unwrap();
        assert_eq!(second.id, 0);
        assert_eq!(second.name.as_deref(), Some("main"));
        assert!(r.read_function().unwrap().is_none());
    }

    #[test]
    fn instructions_iterate_with_offsets() {
        let bytes = two_function_module();
        let mut r = ModuleReader::new(&bytes).unwrap();
        let f = r.read_function().unwrap().unwrap();
        let decoded: Vec<_> = f.instructions().collect::<Result<_, _>>().unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].0, 3);
        assert_eq!(decoded[1].1, Instruction::Return);
        let Instruction::ConstantDouble(index) = decoded[0].1 else { panic!("expected double load") };
        assert_eq!(r.constant_double(index).unwrap(), 2.5);
    }

    #[test]
    fn module_indexes_by_id() {
        let module = Module::read(&two_function_module()).unwrap();
        assert_eq!(module.function(0).unwrap().display_name(), "main");
        assert_eq!(module.function(1).unwrap().display_name(), "<anonymous>");
        assert_eq!(module.entry().unwrap().id, 0);
        assert_eq!(module.function(2).unwrap_err(), FormatError::UnknownFunction { id: 2 });
    }

    #[test]
    fn bad_magic_is_rejected_first() {
        let err = ModuleReader::new(&[0xCA, 0xFE, 0xBA, 0xBE, 0xFF]).unwrap_err();
        assert_eq!(err, FormatError::BadMagic { found: 0xCAFEBABE });
    }

    #[test]
    fn bad_constant_tag() {
        let bytes = [0xB1, 0x73, 0xC0, 0xDE, 0, 1, 9];
        assert_eq!(ModuleReader::new(&bytes).unwrap_err(), FormatError::BadConstantTag { tag: 9 });
    }

    #[test]
    fn truncated_input() {
        let bytes = [0xB1, 0x73, 0xC0, 0xDE, 0, 1, 1, 0, 0];
        assert!(matches!(ModuleReader::new(&bytes).unwrap_err(), FormatError::Truncated { offset: 7, .. }));
    }

    #[test]
    fn bad_function_tag() {
        let mut bytes = ModuleWriter::new().finish().unwrap();
        // claim one function, then write garbage
        bytes[9] = 1;
        bytes.extend([0xBE, 0xEF, 0, 0, 0, 0]);
        let mut r = ModuleReader::new(&bytes).unwrap();
        assert_eq!(r.read_function().unwrap_err(), FormatError::BadFunctionTag { found: 0xBEEF });
    }

    #[test]
    fn typed_constant_getters_check_type() {
        let mut m = ModuleWriter::new();
        m.constant_long(5).unwrap();
        m.constant_string("s").unwrap();
        let bytes = m.finish().unwrap();
        let r = ModuleReader::new(&bytes).unwrap();
        assert_eq!(r.constant_long(0).unwrap(), 5);
        assert_eq!(r.constant_string(1).unwrap(), "s");
        assert_eq!(
            r.constant_string(0).unwrap_err(),
            FormatError::ConstantType { index: 0, expected: "string", found: "long" }
        );
        assert_eq!(r.constant_double(7).unwrap_err(), FormatError::ConstantOutOfRange { index: 7, len: 2 });
    }

    #[test]
    fn strings_round_trip_through_modified_utf8() {
        let mut m = ModuleWriter::new();
        m.constant_string("nul\0 and 😀").unwrap();
        let bytes = m.finish().unwrap();
        let r = ModuleReader::new(&bytes).unwrap();
        assert_eq!(r.constant_string(0).unwrap(), "nul\0 and 😀");
    }

    #[test]
    fn record_size_bounds_the_code() {
        let bytes = two_function_module();
        let mut r = ModuleReader::new(&bytes).unwrap();
        let first = r.read_function().unwrap().unwrap();
        // CONSTANT_DOUBLE + RETURN
        assert_eq!(first.code.len(), 4);
    }
}
