use std::{io::Write, rc::Rc};

use pyworker::{
    BootMode, ConsoleEngine, InputProvider, PackageSpecs, ReturnResult, Runtime, RuntimeLoader, ScriptEngine,
    SessionInfo, WorkerConfig, WorkerError,
};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use crate::transport::Transport;

/// JSON-RPC error code for unparseable messages.
pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
/// Error code for failures reported by the worker itself.
pub const WORKER_ERROR: i32 = -32000;

/// Failure of one request.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("invalid params: {0}")]
    InvalidParams(serde_json::Error),
    #[error("failed to encode result: {0}")]
    Encode(serde_json::Error),
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

impl RpcError {
    /// The JSON-RPC error code reported for this error.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::InvalidParams(_) => INVALID_PARAMS,
            Self::Encode(_) => INTERNAL_ERROR,
            Self::Worker(_) => WORKER_ERROR,
        }
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct InitParams {
    packages: PackageSpecs,
}

#[derive(Deserialize)]
struct RunParams {
    #[serde(default)]
    code: Option<String>,
}

#[derive(Deserialize)]
struct PathParams {
    name: String,
}

#[derive(Deserialize)]
struct WriteParams {
    name: String,
    data: String,
}

enum Engine<R: Runtime> {
    Console(ConsoleEngine<R>),
    Script(ScriptEngine<R>),
}

/// Maps JSON-RPC requests onto one worker engine.
pub struct WorkerHandler<L: RuntimeLoader> {
    loader: L,
    engine: Engine<L::Runtime>,
}

impl<L: RuntimeLoader> WorkerHandler<L> {
    /// Creates a handler whose engine reads input over HTTP.
    pub fn new(loader: L, mode: BootMode, config: WorkerConfig) -> Self {
        let engine = match mode {
            BootMode::Console => Engine::Console(ConsoleEngine::new(config)),
            BootMode::Script => Engine::Script(ScriptEngine::new(config)),
        };
        Self { loader, engine }
    }

    /// Creates a handler with a custom input provider.
    pub fn with_input(loader: L, mode: BootMode, config: WorkerConfig, input: Rc<dyn InputProvider>) -> Self {
        let engine = match mode {
            BootMode::Console => Engine::Console(ConsoleEngine::with_input(config, input)),
            BootMode::Script => Engine::Script(ScriptEngine::with_input(config, input)),
        };
        Self { loader, engine }
    }

    #[must_use]
    pub fn mode(&self) -> BootMode {
        match self.engine {
            Engine::Console(_) => BootMode::Console,
            Engine::Script(_) => BootMode::Script,
        }
    }

    /// Handles one request and returns its result.
    ///
    /// Notifications produced while handling are written to `transport`
    /// before this returns.
    pub async fn handle<W: Write + 'static>(
        &mut self,
        method: &str,
        params: Value,
        transport: &Transport<W>,
    ) -> Result<Value, RpcError> {
        match method {
            "init" => {
                let params: InitParams = parse_params(params)?;
                self.init(&params.packages, transport).await?;
                Ok(Value::Null)
            }
            "run" => {
                let params: RunParams = parse_params(params)?;
                self.run(params.code.as_deref()).await
            }
            "clearBuffer" => match &mut self.engine {
                Engine::Console(engine) => {
                    engine.clear_buffer()?;
                    Ok(Value::Null)
                }
                Engine::Script(_) => Err(RpcError::MethodNotFound(method.to_owned())),
            },
            "readFile" => {
                let PathParams { name } = parse_params(params)?;
                let text = match &self.engine {
                    Engine::Console(engine) => engine.read_file(&name)?,
                    Engine::Script(engine) => engine.read_file(&name)?,
                };
                Ok(Value::String(text))
            }
            "writeFile" => {
                let WriteParams { name, data } = parse_params(params)?;
                match &mut self.engine {
                    Engine::Console(engine) => engine.write_file(&name, &data)?,
                    Engine::Script(engine) => engine.write_file(&name, &data)?,
                }
                Ok(Value::Null)
            }
            "mkdir" => {
                let PathParams { name } = parse_params(params)?;
                match &mut self.engine {
                    Engine::Console(engine) => engine.mkdir(&name)?,
                    Engine::Script(engine) => engine.mkdir(&name)?,
                }
                Ok(Value::Null)
            }
            "rmdir" => {
                let PathParams { name } = parse_params(params)?;
                match &mut self.engine {
                    Engine::Console(engine) => engine.rmdir(&name)?,
                    Engine::Script(engine) => engine.rmdir(&name)?,
                }
                Ok(Value::Null)
            }
            "unlink" => {
                let PathParams { name } = parse_params(params)?;
                match &mut self.engine {
                    Engine::Console(engine) => engine.unlink(&name)?,
                    Engine::Script(engine) => engine.unlink(&name)?,
                }
                Ok(Value::Null)
            }
            _ => Err(RpcError::MethodNotFound(method.to_owned())),
        }
    }

    async fn init<W: Write + 'static>(
        &mut self,
        packages: &PackageSpecs,
        transport: &Transport<W>,
    ) -> Result<(), WorkerError> {
        let stdout = {
            let transport = transport.clone();
            move |text: &str| transport.notify("stdout", &serde_json::json!({ "text": text }))
        };
        let on_ready = |info: &SessionInfo| transport.notify("ready", info);

        match &mut self.engine {
            Engine::Console(engine) => engine.init(&self.loader, stdout, on_ready, packages).await,
            Engine::Script(engine) => {
                let set_return_value = {
                    let transport = transport.clone();
                    move |result: Option<&ReturnResult>| transport.notify("returnValue", &result)
                };
                engine
                    .init(&self.loader, stdout, on_ready, set_return_value, packages)
                    .await
            }
        }
    }

    async fn run(&mut self, code: Option<&str>) -> Result<Value, RpcError> {
        match &mut self.engine {
            Engine::Console(engine) => {
                let outcome = engine.run(code).await?;
                serde_json::to_value(&outcome).map_err(RpcError::Encode)
            }
            Engine::Script(engine) => {
                engine.run(code.ok_or(WorkerError::NoCodeProvided)?).await?;
                Ok(Value::Null)
            }
        }
    }
}

/// Decodes request params; absent params count as an empty object.
fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    let params = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params
    };
    serde_json::from_value(params).map_err(RpcError::InvalidParams)
}
