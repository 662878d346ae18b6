//! The facade's aggregate error type (Design Note 9): every subsystem
//! error folds into one enum so `cli.rs` has a single place to format a
//! failure and pick an exit code, the way the teacher's `main.rs` funnels
//! everything through one top-level `anyhow::Result`.

use thiserror::Error;

use crate::evaluator::EvalError;
use crate::resources::ResourceError;
use crate::runtime::RuntimeError;
use crate::validator::ValidationError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("document failed validation with {} error(s): {}", .0.len(), summarize(.0))]
    Validation(Vec<ValidationError>),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("entry point function '{0}' does not exist")]
    UnknownEntryPoint(String),
}

fn summarize(errors: &[ValidationError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

pub type EngineResult<T> = Result<T, EngineError>;
