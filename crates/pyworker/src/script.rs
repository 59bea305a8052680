//! One-shot script execution engine.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::{
    bootstrap::{self, BootMode, BootRequest},
    config::WorkerConfig,
    error::WorkerError,
    foreign::Foreign,
    fs::{self, VirtualFs as _},
    input::{HttpInput, InputProvider},
    output::{FlushCounter, OutputSink},
    runtime::{Runtime, RuntimeLoader},
    session::{PackageSpecs, SessionInfo},
};

/// Outcome of one script run, delivered through the return-value callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnResult {
    /// Number of stdout flushes observed during the run.
    pub output_length: usize,
    /// Exported value of the final expression statement; `None` if there was
    /// none or the run failed.
    pub return_value: Option<serde_json::Value>,
}

type ReturnCallback = Box<dyn FnMut(Option<&ReturnResult>)>;

struct ScriptState<R> {
    runtime: R,
    session: SessionInfo,
    set_return_value: ReturnCallback,
}

/// Runs whole scripts against the session's global namespace.
pub struct ScriptEngine<R: Runtime> {
    config: WorkerConfig,
    input: Rc<dyn InputProvider>,
    flushes: FlushCounter,
    state: Option<ScriptState<R>>,
}

impl<R: Runtime> ScriptEngine<R> {
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
            flushes: FlushCounter::default(),
            state: None,
        }
    }

    /// Brings up a session and calls `on_ready` once it is usable.
    ///
    /// `set_return_value` receives `None` at the start of every run and the
    /// run's [`ReturnResult`] at its end.
    pub async fn init<L>(
        &mut self,
        loader: &L,
        stdout: impl OutputSink + 'static,
        on_ready: impl FnOnce(&SessionInfo),
        set_return_value: impl FnMut(Option<&ReturnResult>) + 'static,
        packages: &PackageSpecs,
    ) -> Result<(), WorkerError>
    where
        L: RuntimeLoader<Runtime = R>,
    {
        self.flushes.reset();
        let booted = bootstrap::boot(
            loader,
            BootRequest {
                mode: BootMode::Script,
                config: &self.config,
                packages,
                stdout: Box::new(stdout),
                flushes: self.flushes.clone(),
                input: Rc::clone(&self.input),
            },
        )
        .await?;

        let state = self.state.insert(ScriptState {
            runtime: booted.runtime,
            session: booted.session,
            set_return_value: Box::new(set_return_value),
        });
        on_ready(&state.session);
        Ok(())
    }

    /// The current session, if initialized.
    #[must_use]
    pub fn session(&self) -> Option<&SessionInfo> {
        self.state.as_ref().map(|state| &state.session)
    }

    /// Executes `source` as one unit.
    ///
    /// The result is reported through the return-value callback on both
    /// success and failure; on failure the error is also returned.
    pub async fn run(&mut self, source: &str) -> Result<(), WorkerError> {
        let ScriptState {
            runtime,
            set_return_value,
            ..
        } = self.state.as_mut().ok_or(WorkerError::NotInitialized)?;

        self.flushes.reset();
        set_return_value(None);

        match runtime.run_async(source, None).await {
            Ok(value) => {
                let return_value = value.map(|value| {
                    let value = Foreign::new(value);
                    runtime.export(&value)
                });
                set_return_value(Some(&ReturnResult {
                    output_length: self.flushes.get(),
                    return_value,
                }));
                Ok(())
            }
            Err(error) => {
                tracing::debug!(%error, "script raised");
                set_return_value(Some(&ReturnResult {
                    output_length: self.flushes.get(),
                    return_value: None,
                }));
                Err(error.into())
            }
        }
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

    fn state(&self) -> Result<&ScriptState<R>, WorkerError> {
        self.state.as_ref().ok_or(WorkerError::NotInitialized)
    }

    fn state_mut(&mut self) -> Result<&mut ScriptState<R>, WorkerError> {
        self.state.as_mut().ok_or(WorkerError::NotInitialized)
    }
}
