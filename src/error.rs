// ABOUTME: SchemeError - every failure and non-local-exit signal the core can raise

use thiserror::Error;

use crate::datum::Datum;

#[derive(Error, Debug, Clone)]
pub enum SchemeError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("unbound variable: {0}")]
    UnboundVariable(String),

    #[error("variable {0} is undefined (referenced before its letrec binding completed)")]
    UndefinedVariable(String),

    #[error("type error: expected {expected}, found {found} in ({context})")]
    Type {
        expected: String,
        found: String,
        context: String,
    },

    #[error("arity mismatch calling {name}: expected {expected}, received {received}")]
    Arity {
        name: String,
        expected: String,
        received: usize,
    },

    #[error("not callable: {0}")]
    NotCallable(String),

    #[error("macro error: {0}")]
    Macro(String),

    #[error("maximum recursion depth exceeded in {0}")]
    RecursionDepth(String),

    #[error("cyclic data structure not permitted here: {0}")]
    Cycle(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("index out of range: {index} (length {length})")]
    OutOfRange { index: i64, length: usize },

    #[error("{0}")]
    Custom(String),

    /// `(exit n)` — unwinds to the REPL/process driver.
    #[error("exit({0})")]
    Exit(i32),

    /// `(jump! v)` — unwinds to the nearest enclosing `catch-jump`.
    #[error("uncaught jump")]
    Jump(Datum),
}

impl SchemeError {
    pub fn type_error(expected: &str, found: &Datum, context: &str) -> SchemeError {
        SchemeError::Type {
            expected: expected.to_string(),
            found: found.type_name().to_string(),
            context: context.to_string(),
        }
    }

    pub fn arity(name: &str, expected: &str, received: usize) -> SchemeError {
        SchemeError::Arity {
            name: name.to_string(),
            expected: expected.to_string(),
            received,
        }
    }

    pub fn is_control_flow(&self) -> bool {
        matches!(self, SchemeError::Exit(_) | SchemeError::Jump(_))
    }
}
