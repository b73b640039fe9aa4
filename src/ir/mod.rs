use std::fmt;

use serde::{Deserialize, Serialize};

// ── Operators ────────────────────────────────────────────────────────
//
// Shared by the syntax tree, the IR and the value model. The byte ids
// used on the wire live in `bytecode`.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Neq,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Boolean not.
    Negate,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Negate => "!",
        }
    }
}

// ── Nodes ────────────────────────────────────────────────────────────

/// Index-resolved, desugared program tree.
///
/// Every name has been classified as `Local`, `Upvalue` or `Global`, and
/// `let`, destructuring and loop variables have been lowered to plain
/// slot assignments. Slot indices are always below the owning function's
/// `locals_count`.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Boolean(bool),
    Long(i64),
    Double(f64),
    Nil,
    String(String),
    ArrayLiteral(Vec<Node>),
    ObjectLiteral(Vec<(Node, Node)>),
    Unary { op: UnaryOp, target: Box<Node> },
    Binary { op: BinaryOp, lhs: Box<Node>, rhs: Box<Node> },
    Range { from: Box<Node>, to: Box<Node> },
    Local(usize),
    Upvalue { level: usize, index: usize },
    Global(String),
    Assign { target: Box<Node>, value: Box<Node> },
    Member { target: Box<Node>, key: Box<Node> },
    Body(Vec<Node>),
    Call { target: Box<Node>, args: Vec<Node> },
    Function(Box<FunctionDef>),
    If { condition: Box<Node>, then: Box<Node>, otherwise: Box<Node> },
    While { condition: Box<Node>, body: Box<Node>, otherwise: Box<Node> },
    For { slot: usize, iterable: Box<Node>, body: Box<Node>, otherwise: Box<Node> },
    Return(Box<Node>),
    Throw(Box<Node>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: Option<String>,
    /// Declared parameters, including the trailing varargs parameter.
    pub argument_count: usize,
    pub locals_count: usize,
    pub body: Node,
    pub varargs: bool,
    pub annotations: Vec<String>,
}

/// Top-level program: the implicit entry function's locals and body.
#[derive(Debug, Clone, PartialEq)]
pub struct Root {
    pub locals_count: usize,
    pub body: Node,
}

impl Node {
    pub fn empty_body() -> Node {
        Node::Body(Vec::new())
    }

    /// Largest local slot referenced directly by this function body, not
    /// descending into nested function definitions.
    pub fn max_local_slot(&self) -> Option<usize> {
        let mut max = None;
        self.visit_locals(&mut |slot| max = Some(max.map_or(slot, |m: usize| m.max(slot))));
        max
    }

    fn visit_locals(&self, f: &mut dyn FnMut(usize)) {
        match self {
            Node::Local(slot) => f(*slot),
            Node::For { slot, iterable, body, otherwise } => {
                f(*slot);
                iterable.visit_locals(f);
                body.visit_locals(f);
                otherwise.visit_locals(f);
            }
            Node::Boolean(_) | Node::Long(_) | Node::Double(_) | Node::Nil | Node::String(_)
            | Node::Upvalue { .. } | Node::Global(_) | Node::Function(_) => {}
            Node::ArrayLiteral(items) | Node::Body(items) => {
                items.iter().for_each(|n| n.visit_locals(f));
            }
            Node::ObjectLiteral(entries) => {
                for (k, v) in entries {
                    k.visit_locals(f);
                    v.visit_locals(f);
                }
            }
            Node::Unary { target, .. } | Node::Return(target) | Node::Throw(target) => target.visit_locals(f),
            Node::Binary { lhs, rhs, .. } => {
                lhs.visit_locals(f);
                rhs.visit_locals(f);
            }
            Node::Range { from, to } => {
                from.visit_locals(f);
                to.visit_locals(f);
            }
            Node::Assign { target, value } => {
                target.visit_locals(f);
                value.visit_locals(f);
            }
            Node::Member { target, key } => {
                target.visit_locals(f);
                key.visit_locals(f);
            }
            Node::Call { target, args } => {
                target.visit_locals(f);
                args.iter().for_each(|n| n.visit_locals(f));
            }
            Node::If { condition, then, otherwise } => {
                condition.visit_locals(f);
                then.visit_locals(f);
                otherwise.visit_locals(f);
            }
            Node::While { condition, body, otherwise } => {
                condition.visit_locals(f);
                body.visit_locals(f);
                otherwise.visit_locals(f);
            }
        }
    }
}

// ── Rendering ────────────────────────────────────────────────────────
//
// S-expression dump used by `idk ir` and in test failure output.

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Boolean(b) => write!(f, "{b}"),
            Node::Long(n) => write!(f, "{n}"),
            Node::Double(n) => write!(f, "{n:?}"),
            Node::Nil => write!(f, "nil"),
            Node::String(s) => write!(f, "{s:?}"),
            Node::ArrayLiteral(items) => {
                write!(f, "(array")?;
                for item in items {
                    write!(f, " {item}")?;
                }
                write!(f, ")")
            }
            Node::ObjectLiteral(entries) => {
                write!(f, "(object")?;
                for (k, v) in entries {
                    write!(f, " [{k} {v}]")?;
                }
                write!(f, ")")
            }
            Node::Unary { op, target } => write!(f, "({} {target})", op.symbol()),
            Node::Binary { op, lhs, rhs } => write!(f, "({} {lhs} {rhs})", op.symbol()),
            Node::Range { from, to } => write!(f, "(range {from} {to})"),
            Node::Local(slot) => write!(f, "(local {slot})"),
            Node::Upvalue { level, index } => write!(f, "(upvalue {level} {index})"),
            Node::Global(name) => write!(f, "(global {name})"),
            Node::Assign { target, value } => write!(f, "(assign {target} {value})"),
            Node::Member { target, key } => write!(f, "(member {target} {key})"),
            Node::Body(children) => {
                write!(f, "(body")?;
                for child in children {
                    write!(f, " {child}")?;
                }
                write!(f, ")")
            }
            Node::Call { target, args } => {
                write!(f, "(call {target}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
            Node::Function(def) => {
                write!(
                    f,
                    "(function {} args={} locals={}",
                    def.name.as_deref().unwrap_or("<anonymous>"),
                    def.argument_count,
                    def.locals_count
                )?;
                if def.varargs {
                    write!(f, " varargs")?;
                }
                for annotation in &def.annotations {
                    write!(f, " @{annotation}")?;
                }
                write!(f, " {})", def.body)
            }
            Node::If { condition, then, otherwise } => write!(f, "(if {condition} {then} {otherwise})"),
            Node::While { condition, body, otherwise } => write!(f, "(while {condition} {body} {otherwise})"),
            Node::For { slot, iterable, body, otherwise } => {
                write!(f, "(for (local {slot}) {iterable} {body} {otherwise})")
            }
            Node::Return(value) => write!(f, "(return {value})"),
            Node::Throw(value) => write!(f, "(throw {value})"),
        }
    }
}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(root locals={} {})", self.locals_count, self.body)
    }
}
