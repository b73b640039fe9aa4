/// An entry in the error code registry.
pub struct ErrorEntry {
    pub code: &'static str,
    pub short: &'static str, // one line for listings
    pub long: &'static str,  // full text for `idk explain`
}

/// All stable diagnostic codes.
pub static REGISTRY: &[ErrorEntry] = &[
    // ── Input ────────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "IDK-I001",
        short: "cannot read or write a file",
        long: r#"## IDK-I001: cannot read or write a file

An input file could not be read, or the compiled module could not be
written. The message names the path and the operating system error.
"#,
    },
    ErrorEntry {
        code: "IDK-J001",
        short: "invalid syntax tree",
        long: r#"## IDK-J001: invalid syntax tree

The input is not a syntax tree in the JSON shape the parser produces.
Every node is an object with a `kind` field:

    {"kind": "Binary", "op": "add",
     "lhs": {"kind": "Long", "value": 1},
     "rhs": {"kind": "Long", "value": 2}}

Check the node kinds and field names, and that operators use their
lower-case names (`add`, `neq`, `negate`, ...).
"#,
    },
    // ── Resolution ───────────────────────────────────────────────────────────
    ErrorEntry {
        code: "IDK-S001",
        short: "invalid assignment target",
        long: r#"## IDK-S001: invalid assignment target

The left side of `=` must be a name, a `let` declaration, a global, a
member access, or an array or object pattern.

**Example that triggers this:**

    f() = 1

**Fix:**

    let r = f()
"#,
    },
    ErrorEntry {
        code: "IDK-S002",
        short: "invalid destructuring pattern",
        long: r#"## IDK-S002: invalid destructuring pattern

Each entry of an array or object pattern must be a name (`_` discards
the value), a `let` declaration, a member access, a literal that the
value has to equal, or another nested pattern.

**Example that triggers this:**

    [a, f()] = pair
"#,
    },
    // ── Emission ─────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "IDK-E001",
        short: "string constant too long",
        long: r#"## IDK-E001: string constant too long

String constants are stored with a 16-bit length prefix, so their
modified UTF-8 encoding may not exceed 65535 bytes. Characters outside
ASCII take two or three bytes each, and characters outside the Basic
Multilingual Plane take six.

Split the literal and concatenate the pieces at run time.
"#,
    },
    ErrorEntry {
        code: "IDK-E002",
        short: "module limit exceeded",
        long: r#"## IDK-E002: module limit exceeded

A count in the module format is stored as an unsigned 16-bit integer:
constants, functions, arguments, locals, annotations, array and object
literal sizes, and the byte length of one function's code. The program
needs more than 65535 of one of them.
"#,
    },
    ErrorEntry {
        code: "IDK-E003",
        short: "internal emitter error",
        long: r#"## IDK-E003: internal emitter error

The emitter produced an inconsistent function: a jump to a label that
was never bound, a function written twice, or an IR assignment to
something that is not a variable or member. Resolved programs never
trigger this; it indicates a bug in the compiler.
"#,
    },
    // ── Module format ────────────────────────────────────────────────────────
    ErrorEntry {
        code: "IDK-F001",
        short: "not a module",
        long: r#"## IDK-F001: not a module

Module files start with the magic number 0xB173C0DE. The input starts
with something else, so no further parsing was attempted.

Syntax trees must use the `.json` extension to be compiled in memory.
"#,
    },
    ErrorEntry {
        code: "IDK-F002",
        short: "malformed module",
        long: r#"## IDK-F002: malformed module

The module header is valid but its contents are not: a truncated
record, an unknown constant or function tag, a constant index that is
out of range or of the wrong type, or an instruction that cannot be
decoded. The file is damaged or was produced by a different version.
"#,
    },
    // ── Execution ────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "IDK-V001",
        short: "uncaught error",
        long: r#"## IDK-V001: uncaught error

The program threw a value that nothing caught. Operators throw a
string describing the problem:

    1 - nil   -> Attempt to perform arithmetic between long and nil
    (1).x     -> Attempt to index long
    10 / 0    -> Division by zero

Use `pcall(f, args...)` to catch errors thrown by `f`.
"#,
    },
    ErrorEntry {
        code: "IDK-V002",
        short: "invalid bytecode",
        long: r#"## IDK-V002: invalid bytecode

The virtual machine hit code it cannot execute: an operand stack
underflow, a local or upvalue slot outside its frame, or a jump past
the end of a function. Modules written by `idk compile` never do this.
"#,
    },
    ErrorEntry {
        code: "IDK-V003",
        short: "step limit exceeded",
        long: r#"## IDK-V003: step limit exceeded

The run executed more instructions than `--max-steps` allows and was
stopped. Raise the limit, or look for a loop whose condition never
becomes false.
"#,
    },
    ErrorEntry {
        code: "IDK-V004",
        short: "call depth exceeded",
        long: r#"## IDK-V004: call depth exceeded

Function calls nested deeper than the machine allows (256 by default),
usually through recursion without a base case.
"#,
    },
];

/// Look up an error entry by code (e.g. `"IDK-S001"`).
pub fn lookup(code: &str) -> Option<&'static ErrorEntry> {
    REGISTRY.iter().find(|e| e.code.eq_ignore_ascii_case(code))
}
