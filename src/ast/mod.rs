use std::fmt;

use serde::{Deserialize, Serialize};

pub use crate::ir::{BinaryOp, UnaryOp};

/// Name-based syntax tree, as produced by the external parser.
///
/// Serialized as JSON objects tagged by `"kind"`, which is what the CLI
/// reads: `{"kind":"Binary","op":"add","lhs":{"kind":"Long","value":1},...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Node {
    Boolean { value: bool },
    Long { value: i64 },
    Double { value: f64 },
    Nil,
    String { value: String },
    ArrayLiteral { values: Vec<Node> },
    /// Ordered key/value pairs; keys are arbitrary expressions.
    ObjectLiteral { entries: Vec<(Node, Node)> },
    Unary { op: UnaryOp, target: Box<Node> },
    Binary { op: BinaryOp, lhs: Box<Node>, rhs: Box<Node> },
    Range { from: Box<Node>, to: Box<Node> },
    Identifier { name: String },
    /// Explicit global reference, bypassing scope lookup.
    Global { name: String },
    Let { name: String },
    Assign { target: Box<Node>, value: Box<Node> },
    Member { target: Box<Node>, key: Box<Node> },
    Body { children: Vec<Node> },
    Call { target: Box<Node>, args: Vec<Node> },
    Function {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        args: Vec<String>,
        body: Box<Node>,
        /// The last entry of `args` collects the remaining call arguments.
        #[serde(default)]
        varargs: bool,
        #[serde(default)]
        annotations: Vec<String>,
    },
    If {
        condition: Box<Node>,
        then: Box<Node>,
        #[serde(rename = "else", default = "empty_body")]
        otherwise: Box<Node>,
    },
    While {
        condition: Box<Node>,
        body: Box<Node>,
        #[serde(rename = "else", default = "empty_body")]
        otherwise: Box<Node>,
    },
    For {
        variable: String,
        iterable: Box<Node>,
        body: Box<Node>,
        #[serde(rename = "else", default = "empty_body")]
        otherwise: Box<Node>,
    },
    Return { value: Box<Node> },
    Throw { value: Box<Node> },
}

fn empty_body() -> Box<Node> {
    Box::new(Node::Body { children: Vec::new() })
}

// ---- Constructors ----

impl Node {
    pub fn boolean(value: bool) -> Node {
        Node::Boolean { value }
    }

    pub fn long(value: i64) -> Node {
        Node::Long { value }
    }

    pub fn double(value: f64) -> Node {
        Node::Double { value }
    }

    pub fn string(value: impl Into<String>) -> Node {
        Node::String { value: value.into() }
    }

    pub fn ident(name: impl Into<String>) -> Node {
        Node::Identifier { name: name.into() }
    }

    pub fn global(name: impl Into<String>) -> Node {
        Node::Global { name: name.into() }
    }

    pub fn let_(name: impl Into<String>) -> Node {
        Node::Let { name: name.into() }
    }

    pub fn array(values: Vec<Node>) -> Node {
        Node::ArrayLiteral { values }
    }

    pub fn object(entries: Vec<(Node, Node)>) -> Node {
        Node::ObjectLiteral { entries }
    }

    pub fn unary(op: UnaryOp, target: Node) -> Node {
        Node::Unary { op, target: Box::new(target) }
    }

    pub fn binary(op: BinaryOp, lhs: Node, rhs: Node) -> Node {
        Node::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn range(from: Node, to: Node) -> Node {
        Node::Range { from: Box::new(from), to: Box::new(to) }
    }

    pub fn assign(target: Node, value: Node) -> Node {
        Node::Assign { target: Box::new(target), value: Box::new(value) }
    }

    /// `let name = value`
    pub fn let_assign(name: impl Into<String>, value: Node) -> Node {
        Node::assign(Node::let_(name), value)
    }

    pub fn member(target: Node, key: Node) -> Node {
        Node::Member { target: Box::new(target), key: Box::new(key) }
    }

    pub fn body(children: Vec<Node>) -> Node {
        Node::Body { children }
    }

    pub fn call(target: Node, args: Vec<Node>) -> Node {
        Node::Call { target: Box::new(target), args }
    }

    pub fn function(name: Option<&str>, args: &[&str], body: Node) -> Node {
        Node::Function {
            name: name.map(str::to_string),
            args: args.iter().map(|a| a.to_string()).collect(),
            body: Box::new(body),
            varargs: false,
            annotations: Vec::new(),
        }
    }

    pub fn if_(condition: Node, then: Node, otherwise: Node) -> Node {
        Node::If { condition: Box::new(condition), then: Box::new(then), otherwise: Box::new(otherwise) }
    }

    pub fn while_(condition: Node, body: Node, otherwise: Node) -> Node {
        Node::While { condition: Box::new(condition), body: Box::new(body), otherwise: Box::new(otherwise) }
    }

    pub fn for_(variable: impl Into<String>, iterable: Node, body: Node, otherwise: Node) -> Node {
        Node::For {
            variable: variable.into(),
            iterable: Box::new(iterable),
            body: Box::new(body),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn ret(value: Node) -> Node {
        Node::Return { value: Box::new(value) }
    }

    pub fn throw(value: Node) -> Node {
        Node::Throw { value: Box::new(value) }
    }

    /// Short name of the node kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Boolean { .. } => "boolean literal",
            Node::Long { .. } => "long literal",
            Node::Double { .. } => "double literal",
            Node::Nil => "nil literal",
            Node::String { .. } => "string literal",
            Node::ArrayLiteral { .. } => "array literal",
            Node::ObjectLiteral { .. } => "object literal",
            Node::Unary { .. } => "unary operation",
            Node::Binary { .. } => "binary operation",
            Node::Range { .. } => "range",
            Node::Identifier { .. } => "identifier",
            Node::Global { .. } => "global",
            Node::Let { .. } => "let",
            Node::Assign { .. } => "assignment",
            Node::Member { .. } => "member access",
            Node::Body { .. } => "body",
            Node::Call { .. } => "call",
            Node::Function { .. } => "function",
            Node::If { .. } => "if",
            Node::While { .. } => "while",
            Node::For { .. } => "for",
            Node::Return { .. } => "return",
            Node::Throw { .. } => "throw",
        }
    }
}

// ---- Source-like rendering ----

fn join(f: &mut fmt::Formatter<'_>, items: &[Node]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Boolean { value } => write!(f, "{value}"),
            Node::Long { value } => write!(f, "{value}"),
            Node::Double { value } => write!(f, "{value:?}"),
            Node::Nil => write!(f, "nil"),
            Node::String { value } => write!(f, "{value:?}"),
            Node::ArrayLiteral { values } => {
                write!(f, "[")?;
                join(f, values)?;
                write!(f, "]")
            }
            Node::ObjectLiteral { entries } => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Node::Unary { op, target } => write!(f, "{}{target}", op.symbol()),
            Node::Binary { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Node::Range { from, to } => write!(f, "{from}..{to}"),
            Node::Identifier { name } => write!(f, "{name}"),
            Node::Global { name } => write!(f, "global {name}"),
            Node::Let { name } => write!(f, "let {name}"),
            Node::Assign { target, value } => write!(f, "{target} = {value}"),
            Node::Member { target, key } => write!(f, "{target}[{key}]"),
            Node::Body { children } => {
                write!(f, "{{ ")?;
                for child in children {
                    write!(f, "{child}; ")?;
                }
                write!(f, "}}")
            }
            Node::Call { target, args } => {
                write!(f, "{target}(")?;
                join(f, args)?;
                write!(f, ")")
            }
            Node::Function { name, args, body, varargs, annotations } => {
                for a in annotations {
                    write!(f, "@{a} ")?;
                }
                write!(f, "fun")?;
                if let Some(name) = name {
                    write!(f, " {name}")?;
                }
                write!(f, "(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if *varargs && i + 1 == args.len() {
                        write!(f, "...")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ") {body}")
            }
            Node::If { condition, then, otherwise } => write!(f, "if ({condition}) {then} else {otherwise}"),
            Node::While { condition, body, otherwise } => write!(f, "while ({condition}) {body} else {otherwise}"),
            Node::For { variable, iterable, body, otherwise } => {
                write!(f, "for ({variable} in {iterable}) {body} else {otherwise}")
            }
            Node::Return { value } => write!(f, "return {value}"),
            Node::Throw { value } => write!(f, "throw {value}"),
        }
    }
}
