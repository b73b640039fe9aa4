//! Minimal host prelude: the handful of globals the CLI and tests need.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use crate::value::{Thrown, Value, ops};
use crate::vm::{Globals, VmError};

/// Installs the prelude with `print` writing to stdout.
pub fn install(globals: &mut Globals) {
    install_with_output(globals, Rc::new(RefCell::new(std::io::stdout())));
}

/// Installs the prelude with `print` writing to `out`.
pub fn install_with_output<W: Write + 'static>(globals: &mut Globals, out: Rc<RefCell<W>>) {
    globals.set(
        "print",
        Value::native("print", move |_, args| {
            let line: Vec<String> = args.iter().map(|a| a.tostring().to_string()).collect();
            let mut out = out.borrow_mut();
            writeln!(out, "{}", line.join(" ")).map_err(|e| Thrown::message(format!("print failed: {e}")))?;
            Ok(Value::Nil)
        }),
    );
    globals.set("size", Value::native("size", |_, args| Ok(Value::Long(ops::size(&first(&args))?))));
    globals.set("type", Value::native("type", |_, args| Ok(Value::from(first(&args).type_name()))));
    globals.set("keys", Value::native("keys", |_, args| Ok(ops::keys(&first(&args))?)));
    globals.set("pcall", Value::native("pcall", pcall));
}

fn first(args: &[Value]) -> Value {
    args.first().cloned().unwrap_or(Value::Nil)
}

/// `pcall(f, args...)`: `[true, result]`, or `[false, thrown]` when `f`
/// throws. Machine faults still propagate.
fn pcall(vm: &mut crate::vm::Vm<'_>, mut args: Vec<Value>) -> Result<Value, VmError> {
    if args.is_empty() {
        return Err(Thrown::message("pcall expects a function").into());
    }
    let callee = args.remove(0);
    match vm.call(&callee, args) {
        Ok(result) => Ok(Value::array(vec![Value::Boolean(true), result])),
        Err(VmError::Thrown(value)) => Ok(Value::array(vec![Value::Boolean(false), value])),
        Err(fault) => Err(fault),
    }
}
