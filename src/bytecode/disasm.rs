use std::fmt::Write;

use super::instruction::Instruction;
use super::reader::{FunctionInfo, Module};

/// Human-readable listing of a module's constants and functions.
pub fn disassemble(module: &Module) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "constants ({}):", module.constants().len());
    for (i, constant) in module.constants().iter().enumerate() {
        let _ = writeln!(out, "  #{i:<4} {:<7} {constant}", constant.type_name());
    }
    let _ = writeln!(out, "entrypoint: {}", module.entrypoint());
    for function in module.functions() {
        out.push('\n');
        out.push_str(&disassemble_function(module, function));
    }
    out
}

pub fn disassemble_function(module: &Module, function: &FunctionInfo) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "function {} {} args={} locals={}",
        function.id,
        function.display_name(),
        function.argument_count,
        function.locals_count
    );
    if function.varargs {
        out.push_str(" varargs");
    }
    for annotation in &function.annotations {
        let _ = write!(out, " @{annotation}");
    }
    out.push('\n');

    let mut pos = 0;
    while pos < function.code.len() {
        match Instruction::decode(&function.code, pos) {
            Ok((instruction, next)) => {
                let _ = write!(out, "  {pos:04}  {instruction}");
                if let Some(constant) = referenced_constant(&instruction) {
                    if let Some(value) = module.constants().get(constant as usize) {
                        let _ = write!(out, "  ; {value}");
                    }
                }
                out.push('\n');
                pos = next;
            }
            Err(e) => {
                let _ = writeln!(out, "  {pos:04}  <{e}>");
                break;
            }
        }
    }
    out
}

fn referenced_constant(instruction: &Instruction) -> Option<u16> {
    match instruction {
        Instruction::ConstantLong(i)
        | Instruction::ConstantDouble(i)
        | Instruction::ConstantString(i)
        | Instruction::LoadGlobal(i)
        | Instruction::StoreGlobal(i) => Some(*i),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Condition, ModuleWriter};
    use crate::ir::BinaryOp;

    #[test]
    fn lists_constants_and_code() {
        let mut m = ModuleWriter::new();
        let mut f = m.create_function(Some("$main"), 0, 0, false, &[]).unwrap();
        let end = f.new_label();
        f.load_long(&mut m, 1).unwrap();
        f.load_global(&mut m, "print").unwrap();
        f.binary(BinaryOp::Add);
        f.load_bool(false);
        f.jump_if(Condition::IfTrue, end).unwrap();
        f.bind(end).unwrap();
        f.ret();
        let id = f.end(&mut m).unwrap();
        m.set_entrypoint(id).unwrap();
        let module = Module::read(&m.finish().unwrap()).unwrap();

        let text = disassemble(&module);
        assert!(text.contains("constants (3):"), "{text}");
        assert!(text.contains("#0    long    1"), "{text}");
        assert!(text.contains("#1    string  \"print\""), "{text}");
        assert!(text.contains("#2    string  \"$main\""), "{text}");
        assert!(text.contains("function 0 $main args=0 locals=0"), "{text}");
        assert!(text.contains("0000  CONSTANT_LONG #0  ; 1"), "{text}");
        assert!(text.contains("0003  LOAD_GLOBAL #1  ; \"print\""), "{text}");
        assert!(text.contains("0010  JUMP_IF IF_TRUE 0014"), "{text}");
        assert!(text.contains("0014  RETURN"), "{text}");
    }
}
