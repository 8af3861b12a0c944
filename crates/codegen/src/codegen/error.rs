//! Code generation error types.

use crate::ast::SourceLocation;

/// Error type for code generation operations.
///
/// Every variant aborts emission of the current module; the caller must
/// discard the buffer. The imported-module pass additionally treats
/// `TypeResolution` and `NotImplemented` as recoverable per routine.
#[derive(Debug)]
pub enum CodeGenError {
    /// Unknown triple or unsupported architecture/OS pair.
    UnsupportedPlatform(String),
    /// A parameter, field, or return type was missing where required.
    TypeResolution {
        name: String,
        context: String,
        file: Option<String>,
        line: u32,
        column: u32,
        position: u32,
    },
    /// A binary operator or intrinsic requested on a type family that
    /// does not support it.
    UnsupportedOperation(String),
    /// An AST variant or intrinsic without an emitter.
    NotImplemented(String),
    /// A built-in requested with the wrong arity.
    InvalidArgumentCount {
        name: String,
        expected: usize,
        got: usize,
    },
    /// A formatting error when writing IR.
    Format(std::fmt::Error),
}

impl CodeGenError {
    /// Build a `TypeResolution` error anchored at a source location.
    pub fn type_resolution(
        name: impl Into<String>,
        context: impl Into<String>,
        location: &SourceLocation,
    ) -> Self {
        CodeGenError::TypeResolution {
            name: name.into(),
            context: context.into(),
            file: location.file.clone(),
            line: location.line,
            column: location.column,
            position: location.position,
        }
    }

    /// Recoverable errors may be skipped per routine during the
    /// imported-module pass; everything else is fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CodeGenError::TypeResolution { .. } | CodeGenError::NotImplemented(_)
        )
    }
}

impl std::fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeGenError::UnsupportedPlatform(what) => {
                write!(f, "unsupported platform: {}", what)
            }
            CodeGenError::TypeResolution {
                name,
                context,
                file,
                line,
                column,
                ..
            } => {
                let anchor = match file {
                    Some(file) => format!("{}:{}:{}", file, line, column),
                    None => format!("{}:{}", line, column),
                };
                write!(
                    f,
                    "cannot resolve type for '{}' in {} at {}",
                    name, context, anchor
                )
            }
            CodeGenError::UnsupportedOperation(what) => {
                write!(f, "unsupported operation: {}", what)
            }
            CodeGenError::NotImplemented(what) => write!(f, "not implemented: {}", what),
            CodeGenError::InvalidArgumentCount {
                name,
                expected,
                got,
            } => write!(
                f,
                "'{}' expects {} argument(s), got {}",
                name, expected, got
            ),
            CodeGenError::Format(e) => write!(f, "IR generation error: {}", e),
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<std::fmt::Error> for CodeGenError {
    fn from(e: std::fmt::Error) -> Self {
        CodeGenError::Format(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_resolution_anchor() {
        let loc = SourceLocation {
            file: Some("main.rf".to_string()),
            line: 12,
            column: 5,
            position: 230,
        };
        let err = CodeGenError::type_resolution("x", "parameter list", &loc);
        let msg = err.to_string();
        assert!(msg.contains("main.rf:12:5"));
        assert!(msg.contains("'x'"));
    }

    #[test]
    fn test_recoverability() {
        assert!(CodeGenError::NotImplemented("when".into()).is_recoverable());
        assert!(!CodeGenError::UnsupportedPlatform("arm-wasi".into()).is_recoverable());
    }
}
