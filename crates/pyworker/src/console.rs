//! Interactive console engine.
//!
//! `ConsoleEngine` keeps one interpreter console alive across `run` calls.
//! Source is pushed one physical line at a time; the console buffers lines
//! until they form a complete statement, so a block opened in one `run` can be
//! finished by the next. Only [`ConsoleEngine::clear_buffer`] discards that
//! buffer.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::{
    bootstrap::{self, BootMode, BootRequest, ConsoleHelpers},
    config::WorkerConfig,
    error::WorkerError,
    foreign::{Foreign, Release},
    fs::{self, VirtualFs as _},
    input::{HttpInput, InputProvider},
    output::{FlushCounter, OutputSink},
    runtime::{Runtime, RuntimeError, RuntimeLoader, SyntaxCheck},
    session::{PackageSpecs, SessionInfo},
};

/// Result of one console `run`.
///
/// `state` is the syntax-check verdict of the last line pushed. `error` is set
/// when that line raised, in which case the remaining lines were not pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub state: SyntaxCheck,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunOutcome {
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.state == SyntaxCheck::Incomplete
    }
}

/// Everything the console needs between calls. Exists only after `init`.
pub struct ConsoleState<R: Runtime> {
    runtime: R,
    session: SessionInfo,
    helpers: ConsoleHelpers<R>,
}

/// Line-buffered interactive console over a [`Runtime`].
pub struct ConsoleEngine<R: Runtime> {
    config: WorkerConfig,
    input: Rc<dyn InputProvider>,
    state: Option<ConsoleState<R>>,
}

impl<R: Runtime> ConsoleEngine<R> {
    /// Creates an engine that answers `input()` over HTTP as configured.
    #[must_use]
    pub fn new(config: WorkerConfig) -> Self {
        let input = Rc::new(HttpInput::from_config(&config.input));
        Self::with_input(config, input)
    }

    /// Creates an engine with a custom input provider.
    pub fn with_input(config: WorkerConfig, input: Rc<dyn InputProvider>) -> Self {
        Self {
            config,
            input,
            state: None,
        }
    }

    /// Brings up a session and calls `on_ready` once it is usable.
    ///
    /// Calling `init` again replaces the previous session; its console and
    /// helpers are released.
    pub async fn init<L>(
        &mut self,
        loader: &L,
        stdout: impl OutputSink + 'static,
        on_ready: impl FnOnce(&SessionInfo),
        packages: &PackageSpecs,
    ) -> Result<(), WorkerError>
    where
        L: RuntimeLoader<Runtime = R>,
    {
        let booted = bootstrap::boot(
            loader,
            BootRequest {
                mode: BootMode::Console,
                config: &self.config,
                packages,
                stdout: Box::new(stdout),
                flushes: FlushCounter::default(),
                input: Rc::clone(&self.input),
            },
        )
        .await?;

        let Some(helpers) = booted.console else {
            return Err(WorkerError::Runtime(RuntimeError::fault("console bootstrap produced no helpers")));
        };
        let state = self.state.insert(ConsoleState {
            runtime: booted.runtime,
            session: booted.session,
            helpers,
        });
        on_ready(&state.session);
        Ok(())
    }

    /// The current session, if initialized.
    #[must_use]
    pub fn session(&self) -> Option<&SessionInfo> {
        self.state.as_ref().map(|state| &state.session)
    }

    /// Pushes `source` into the console line by line.
    ///
    /// Interpreter exceptions are returned as an outcome with `error` set;
    /// any other failure is returned as `Err`. Every pending line and its
    /// awaitable are released before the next line is pushed or the call
    /// returns.
    pub async fn run(&mut self, source: Option<&str>) -> Result<RunOutcome, WorkerError> {
        let ConsoleState { runtime, helpers, .. } = self.state.as_mut().ok_or(WorkerError::NotInitialized)?;
        let source = source.ok_or(WorkerError::NoCodeProvided)?;

        let mut state = SyntaxCheck::Complete;
        for line in source.split('\n') {
            let pending = Foreign::new(runtime.push_line(&helpers.console, line)?);
            state = runtime.syntax_check(&pending);
            tracing::trace!(%state, line, "pushed console line");

            let awaitable = Foreign::new(runtime.await_pending(&helpers.await_fut, &pending)?);
            match runtime.settle(&awaitable).await {
                Ok(values) => {
                    for value in values {
                        if runtime.is_proxy(&value) {
                            value.release();
                        }
                    }
                }
                Err(RuntimeError::Exception(exception)) => {
                    let message = runtime
                        .formatted_error(&pending)
                        .filter(|text| !text.trim().is_empty())
                        .unwrap_or(exception.message);
                    tracing::debug!(%state, "console line raised");
                    return Ok(RunOutcome {
                        state,
                        error: Some(message.trim_end().to_owned()),
                    });
                }
                Err(fault) => return Err(fault.into()),
            }
        }

        Ok(RunOutcome { state, error: None })
    }

    /// Discards any buffered incomplete statement.
    pub fn clear_buffer(&mut self) -> Result<(), WorkerError> {
        let ConsoleState { runtime, helpers, .. } = self.state.as_mut().ok_or(WorkerError::NotInitialized)?;
        runtime.invoke(&helpers.clear_console, &[])?;
        Ok(())
    }

    /// Shortens a long repr the way the console does when echoing results.
    pub fn shorten_repr(&mut self, text: &str) -> Result<String, WorkerError> {
        let ConsoleState { runtime, helpers, .. } = self.state.as_mut().ok_or(WorkerError::NotInitialized)?;
        let shortened = runtime.invoke(&helpers.repr_shorten, &[text])?;
        Ok(shortened.unwrap_or_else(|| text.to_owned()))
    }

    pub fn read_file(&self, path: &str) -> Result<String, WorkerError> {
        fs::read_text(&self.state()?.runtime, path)
    }

    pub fn write_file(&mut self, path: &str, data: &str) -> Result<(), WorkerError> {
        fs::write_text(&mut self.state_mut()?.runtime, path, data)
    }

    pub fn mkdir(&mut self, path: &str) -> Result<(), WorkerError> {
        Ok(self.state_mut()?.runtime.mkdir(path)?)
    }

    pub fn rmdir(&mut self, path: &str) -> Result<(), WorkerError> {
        Ok(self.state_mut()?.runtime.rmdir(path)?)
    }

    pub fn unlink(&mut self, path: &str) -> Result<(), WorkerError> {
        Ok(self.state_mut()?.runtime.unlink(path)?)
    }

    fn state(&self) -> Result<&ConsoleState<R>, WorkerError> {
        self.state.as_ref().ok_or(WorkerError::NotInitialized)
    }

    fn state_mut(&mut self) -> Result<&mut ConsoleState<R>, WorkerError> {
        self.state.as_mut().ok_or(WorkerError::NotInitialized)
    }
}
