use crate::{
    bootstrap::BootStage,
    input::InputError,
    runtime::{InterpreterException, RuntimeError},
};

/// Errors surfaced to callers of the worker engines.
///
/// Interpreter exceptions raised while a console line runs never reach this
/// type; the console turns them into a [`RunOutcome`](crate::RunOutcome).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    /// An engine was used before `init` completed.
    #[error("console has not been initialised")]
    NotInitialized,
    /// `run` was called without source text.
    #[error("no code to push")]
    NoCodeProvided,
    /// Interpreted code raised while running as a script.
    #[error(transparent)]
    Interpreter(InterpreterException),
    /// A bootstrap stage failed; the session was not created.
    #[error("bootstrap failed while {stage}: {source}")]
    Bootstrap { stage: BootStage, source: RuntimeError },
    /// The runtime failed outside of interpreted code.
    #[error(transparent)]
    Runtime(RuntimeError),
    /// The input bridge could not obtain a line.
    #[error(transparent)]
    Input(#[from] InputError),
    /// A virtual file did not contain UTF-8 text.
    #[error("file {path} is not valid UTF-8")]
    Encoding { path: String },
}

impl WorkerError {
    pub(crate) fn bootstrap(stage: BootStage) -> impl FnOnce(RuntimeError) -> Self {
        move |source| Self::Bootstrap { stage, source }
    }
}

impl From<RuntimeError> for WorkerError {
    fn from(error: RuntimeError) -> Self {
        match error {
            RuntimeError::Exception(exception) => Self::Interpreter(exception),
            fault @ RuntimeError::Fault(_) => Self::Runtime(fault),
        }
    }
}
