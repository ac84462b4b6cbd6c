use crate::compiler::CompileError;
use crate::path::DataPath;
use crate::validate::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("invalid schema: {0}")]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("invalid form options: {0}")]
    Options(#[from] serde_json::Error),
    #[error("no field at '{0}'")]
    UnknownField(DataPath),
    #[error("field '{0}' is not an array")]
    NotAnArray(DataPath),
    #[error("index {index} is out of range for '{path}'")]
    IndexOutOfRange { path: DataPath, index: usize },
    #[error("blur handling needs a running tokio runtime")]
    NoRuntime,
}
