pub mod ansi;
pub mod json;
pub mod registry;

use crate::bytecode::{FormatError, WriteError};
use crate::emit::EmitError;
use crate::resolve::ResolveError;
use crate::vm::{VmError, VmFault};

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub code: Option<&'static str>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic { message: message.into(), code: None, notes: Vec::new(), suggestion: None }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

// ---- From impls for the crate's error types ----

impl From<&serde_json::Error> for Diagnostic {
    fn from(e: &serde_json::Error) -> Self {
        Diagnostic::error(format!("invalid syntax tree: {e}"))
            .with_code("IDK-J001")
            .with_note(format!("at line {}, column {}", e.line(), e.column()))
    }
}

impl From<&ResolveError> for Diagnostic {
    fn from(e: &ResolveError) -> Self {
        match e {
            ResolveError::InvalidTarget { .. } => Diagnostic::error(e.to_string())
                .with_code("IDK-S001")
                .with_suggestion("assign to a name, a member, or an array or object pattern"),
            ResolveError::InvalidPattern { .. } => Diagnostic::error(e.to_string())
                .with_code("IDK-S002")
                .with_suggestion("pattern entries must be names, members, literals or nested patterns"),
        }
    }
}

impl From<&WriteError> for Diagnostic {
    fn from(e: &WriteError) -> Self {
        let d = Diagnostic::error(e.to_string());
        match e {
            WriteError::StringTooLong { .. } => d
                .with_code("IDK-E001")
                .with_note("string constants are limited to 65535 bytes of modified UTF-8"),
            WriteError::OutOfBounds { .. } | WriteError::CodeTooLarge { .. } => d.with_code("IDK-E002"),
            _ => d.with_code("IDK-E003"),
        }
    }
}

impl From<&EmitError> for Diagnostic {
    fn from(e: &EmitError) -> Self {
        match e {
            EmitError::Write(inner) => Diagnostic::from(inner),
            EmitError::InvalidTarget { .. } => Diagnostic::error(e.to_string()).with_code("IDK-E003"),
        }
    }
}

impl From<&FormatError> for Diagnostic {
    fn from(e: &FormatError) -> Self {
        match e {
            FormatError::BadMagic { .. } => Diagnostic::error(e.to_string())
                .with_code("IDK-F001")
                .with_suggestion("pass a syntax tree as a .json file, or a module written by `idk compile`"),
            _ => Diagnostic::error(e.to_string()).with_code("IDK-F002"),
        }
    }
}

impl From<&VmError> for Diagnostic {
    fn from(e: &VmError) -> Self {
        match e {
            VmError::Thrown(_) => Diagnostic::error(e.to_string()).with_code("IDK-V001"),
            VmError::Fault(fault) => Diagnostic::from(fault),
        }
    }
}

impl From<&VmFault> for Diagnostic {
    fn from(e: &VmFault) -> Self {
        let d = Diagnostic::error(e.to_string());
        match e {
            VmFault::StepLimitExceeded { .. } => {
                d.with_code("IDK-V003").with_suggestion("raise --max-steps or check for an endless loop")
            }
            VmFault::CallDepthExceeded { .. } => d.with_code("IDK-V004").with_note("calls nest too deeply"),
            VmFault::Format(inner) => Diagnostic::from(inner),
            _ => d
                .with_code("IDK-V002")
                .with_note("the module is corrupt or was written by an incompatible compiler"),
        }
    }
}

impl From<&crate::Error> for Diagnostic {
    fn from(e: &crate::Error) -> Self {
        match e {
            crate::Error::Json(e) => Diagnostic::from(e),
            crate::Error::Resolve(e) => Diagnostic::from(e),
            crate::Error::Emit(e) => Diagnostic::from(e),
            crate::Error::Format(e) => Diagnostic::from(e),
            crate::Error::Vm(e) => Diagnostic::from(e),
        }
    }
}
