use relx_core::error::CodegenError;
use relx_core::fragment::Var;
use thiserror::Error;

/// Failure while running a generated fragment.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecError {
    #[error(transparent)]
    Codegen(#[from] CodegenError),
    #[error("unknown table {0}")]
    UnknownTable(String),
    #[error("variable {0} is not bound in this scope")]
    UnboundVariable(Var),
    #[error("cursor {0} has no more rows")]
    ExhaustedCursor(Var),
    #[error("column ${index} out of range for a row of width {width}")]
    ColumnOutOfRange { index: u32, width: usize },
    #[error("record has no field {0}")]
    UnknownField(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    Overflow,
    #[error("unknown function {0}")]
    UnknownFunction(String),
    #[error("program still contains an unfilled hole")]
    UnfilledHole,
}
