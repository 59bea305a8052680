use std::io::{self, BufRead, Write};

use pyworker::RuntimeLoader;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    handler::{PARSE_ERROR, WorkerHandler},
    transport::{JSONRPC_VERSION, Transport, read_framed_message},
};

/// JSON-RPC request envelope.
#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

/// Serves requests from `reader` until end of stream.
///
/// Builds its own current-thread runtime, so it must not be called from
/// inside another async runtime.
pub fn serve<L, R, W>(handler: &mut WorkerHandler<L>, reader: R, writer: W) -> io::Result<()>
where
    L: RuntimeLoader,
    R: BufRead,
    W: Write + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(serve_loop(handler, reader, &Transport::new(writer)))
}

/// The request loop behind [`serve`], for callers that already run an executor.
pub async fn serve_loop<L, R, W>(handler: &mut WorkerHandler<L>, mut reader: R, transport: &Transport<W>) -> io::Result<()>
where
    L: RuntimeLoader,
    R: BufRead,
    W: Write + 'static,
{
    tracing::info!(mode = ?handler.mode(), "serving worker requests");
    while let Some(body) = read_framed_message(&mut reader)? {
        let raw_message = match serde_json::from_slice::<Value>(&body) {
            Ok(message) => message,
            Err(err) => {
                transport.send(&Response::error(&Value::Null, PARSE_ERROR, format!("parse error: {err}")))?;
                continue;
            }
        };

        if is_notification(&raw_message) {
            tracing::debug!("ignoring inbound notification");
            continue;
        }

        let RpcRequest { id, method, params } = match serde_json::from_value::<RpcRequest>(raw_message) {
            Ok(request) => request,
            Err(err) => {
                transport.send(&Response::error(&Value::Null, PARSE_ERROR, format!("parse error: {err}")))?;
                continue;
            }
        };

        tracing::debug!(%method, "handling request");
        let response = match handler.handle(&method, params, transport).await {
            Ok(result) => Response::result(&id, result),
            Err(err) => {
                tracing::debug!(%err, %method, "request failed");
                Response::error(&id, err.code(), err.to_string())
            }
        };
        transport.send(&response)?;
    }

    tracing::info!("input stream closed");
    Ok(())
}

/// Inbound messages with a `method` but no `id` expect no reply.
fn is_notification(message: &Value) -> bool {
    message.get("id").is_none()
        && message.get("jsonrpc").and_then(Value::as_str) == Some(JSONRPC_VERSION)
        && message.get("method").is_some_and(Value::is_string)
}

/// Reply to one request: either a result or an error object.
#[derive(Debug, Serialize)]
struct Response<'a> {
    jsonrpc: &'static str,
    id: &'a Value,
    #[serde(flatten)]
    outcome: Outcome,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum Outcome {
    Result(Value),
    Error { code: i32, message: String },
}

impl<'a> Response<'a> {
    fn result(id: &'a Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            outcome: Outcome::Result(result),
        }
    }

    fn error(id: &'a Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            outcome: Outcome::Error { code, message },
        }
    }
}
