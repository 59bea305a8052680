//! Session bring-up shared by the console and script engines.
//!
//! Bootstrap is all-or-nothing: the first failing stage aborts it and is
//! reported as [`WorkerError::Bootstrap`]. No partially initialized session is
//! ever handed to an engine.

use std::{fmt, rc::Rc};

use crate::{
    config::WorkerConfig,
    error::WorkerError,
    foreign::Foreign,
    input::{InputBridge, InputProvider},
    output::{FlushCounter, OutputSink, StdoutRelay},
    runtime::{Runtime, RuntimeError, RuntimeLoader},
    session::{PackageSpecs, SessionId, SessionInfo},
};

/// Preloaded package that provides [`HTTP_PATCH_SNIPPET`].
const HTTP_PATCH_PACKAGE: &str = "pyodide-http";

/// Patches the runtime's HTTP stack so synchronous requests work in the worker.
const HTTP_PATCH_SNIPPET: &str = "\
import pyodide_http
pyodide_http.patch_all()
";

/// Defines the console object and its helpers. Runs in a scratch namespace.
const CONSOLE_SNIPPET: &str = "\
import sys
import builtins
import __main__
from pyodide.ffi import to_js
from pyodide.console import PyodideConsole, repr_shorten, BANNER

pyconsole = PyodideConsole(__main__.__dict__)

async def await_fut(fut):
    res = await fut
    if res is not None:
        builtins._ = res
    return to_js([res], depth=1)

def clear_console():
    pyconsole.buffer = []
";

/// Names the console snippet must define, in extraction order.
const AWAIT_HELPER: &str = "await_fut";
const CONSOLE_OBJECT: &str = "pyconsole";
const REPR_SHORTEN: &str = "repr_shorten";
const CLEAR_CONSOLE: &str = "clear_console";
const BANNER: &str = "BANNER";

/// Which engine the session is being brought up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    Console,
    Script,
}

/// The bootstrap step that was running when bring-up failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStage {
    LoadRuntime,
    LoadPreload,
    LoadPackages,
    LoadInstaller,
    InstallPackages,
    RegisterBridge,
    CreateNamespace,
    RunSnippet,
    ExtractHelpers,
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LoadRuntime => "loading the runtime",
            Self::LoadPreload => "loading preloaded packages",
            Self::LoadPackages => "loading packages",
            Self::LoadInstaller => "loading the package installer",
            Self::InstallPackages => "installing packages",
            Self::RegisterBridge => "registering the input bridge",
            Self::CreateNamespace => "creating the bootstrap namespace",
            Self::RunSnippet => "running a bootstrap snippet",
            Self::ExtractHelpers => "extracting console helpers",
        })
    }
}

/// Console helpers extracted from the bootstrap namespace.
pub struct ConsoleHelpers<R: Runtime> {
    /// The interactive console bound to the global namespace.
    pub console: Foreign<R::Object>,
    /// Awaits a pushed line and returns a one-element result container.
    pub await_fut: Foreign<R::Object>,
    pub repr_shorten: Foreign<R::Object>,
    /// Empties the console's pending-line buffer.
    pub clear_console: Foreign<R::Object>,
    pub banner: Option<String>,
}

/// Inputs to one bring-up.
pub(crate) struct BootRequest<'a> {
    pub mode: BootMode,
    pub config: &'a WorkerConfig,
    pub packages: &'a PackageSpecs,
    pub stdout: Box<dyn OutputSink>,
    pub flushes: FlushCounter,
    pub input: Rc<dyn InputProvider>,
}

/// A freshly initialized session.
pub(crate) struct Booted<R: Runtime> {
    pub runtime: R,
    pub session: SessionInfo,
    pub console: Option<ConsoleHelpers<R>>,
}

/// Brings up a runtime for `request.mode`.
pub(crate) async fn boot<L: RuntimeLoader>(
    loader: &L,
    request: BootRequest<'_>,
) -> Result<Booted<L::Runtime>, WorkerError> {
    let BootRequest {
        mode,
        config,
        packages,
        stdout,
        flushes,
        input,
    } = request;

    tracing::info!(?mode, "bootstrapping session");
    let mut runtime = loader.load().await.map_err(WorkerError::bootstrap(BootStage::LoadRuntime))?;
    runtime.set_stdout(StdoutRelay::new(stdout, flushes));

    load_packages(&mut runtime, config, packages).await?;

    let id = SessionId::generate();
    let version = runtime.version();
    tracing::debug!(%id, %version, "runtime ready");

    let bridge = Rc::new(InputBridge::new(id, input));
    runtime
        .register_module(&config.bridge_module, bridge)
        .map_err(WorkerError::bootstrap(BootStage::RegisterBridge))?;

    let http_patch = http_patch_snippet(config);
    let input_patch = input_patch_snippet(&config.bridge_module, mode);
    let console = match mode {
        BootMode::Console => Some(boot_console(&mut runtime, http_patch, &input_patch).await?),
        BootMode::Script => {
            if !http_patch.is_empty() {
                run_snippet(&mut runtime, http_patch, None).await?;
            }
            run_snippet(&mut runtime, &input_patch, None).await?;
            None
        }
    };

    let session = SessionInfo {
        id,
        version,
        banner: console.as_ref().and_then(|helpers| helpers.banner.clone()),
    };
    tracing::info!(id = %session.id, "session initialized");
    Ok(Booted {
        runtime,
        session,
        console,
    })
}

async fn load_packages<R: Runtime>(
    runtime: &mut R,
    config: &WorkerConfig,
    packages: &PackageSpecs,
) -> Result<(), WorkerError> {
    if !config.preload.is_empty() {
        runtime
            .load_packages(&config.preload)
            .await
            .map_err(WorkerError::bootstrap(BootStage::LoadPreload))?;
    }
    if !packages.prebuilt.is_empty() {
        tracing::debug!(packages = ?packages.prebuilt, "loading packages");
        runtime
            .load_packages(&packages.prebuilt)
            .await
            .map_err(WorkerError::bootstrap(BootStage::LoadPackages))?;
    }

    let groups = [&config.always_install, &packages.installable];
    if groups.iter().all(|group| group.is_empty()) {
        return Ok(());
    }
    runtime
        .load_packages(std::slice::from_ref(&config.installer))
        .await
        .map_err(WorkerError::bootstrap(BootStage::LoadInstaller))?;
    for group in groups.into_iter().filter(|group| !group.is_empty()) {
        tracing::debug!(installer = %config.installer, packages = ?group, "installing packages");
        runtime
            .install_packages(&config.installer, group)
            .await
            .map_err(WorkerError::bootstrap(BootStage::InstallPackages))?;
    }
    Ok(())
}

/// Runs the console snippets in a scratch namespace and pulls the helpers out.
///
/// The namespace is released before returning so helper internals never leak
/// into the global scope user code sees.
async fn boot_console<R: Runtime>(
    runtime: &mut R,
    http_patch: &str,
    input_patch: &str,
) -> Result<ConsoleHelpers<R>, WorkerError> {
    let namespace = Foreign::new(
        runtime
            .new_namespace()
            .map_err(WorkerError::bootstrap(BootStage::CreateNamespace))?,
    );

    let console_snippet = format!("{http_patch}{CONSOLE_SNIPPET}");
    run_snippet(runtime, &console_snippet, Some(&*namespace)).await?;
    run_snippet(runtime, input_patch, Some(&*namespace)).await?;

    let helpers = extract_helpers(runtime, &namespace).map_err(WorkerError::bootstrap(BootStage::ExtractHelpers))?;
    namespace.release();
    Ok(helpers)
}

fn extract_helpers<R: Runtime>(runtime: &mut R, namespace: &R::Namespace) -> Result<ConsoleHelpers<R>, RuntimeError> {
    let mut require = |name: &str| -> Result<Foreign<R::Object>, RuntimeError> {
        runtime
            .namespace_get(namespace, name)?
            .map(Foreign::new)
            .ok_or_else(|| RuntimeError::fault(format!("bootstrap namespace has no `{name}`")))
    };
    let await_fut = require(AWAIT_HELPER)?;
    let console = require(CONSOLE_OBJECT)?;
    let repr_shorten = require(REPR_SHORTEN)?;
    let clear_console = require(CLEAR_CONSOLE)?;

    let banner = runtime
        .namespace_get(namespace, BANNER)?
        .map(Foreign::new)
        .and_then(|object| runtime.object_text(&object));

    Ok(ConsoleHelpers {
        console,
        await_fut,
        repr_shorten,
        clear_console,
        banner,
    })
}

async fn run_snippet<R: Runtime>(
    runtime: &mut R,
    code: &str,
    namespace: Option<&R::Namespace>,
) -> Result<(), WorkerError> {
    let value = runtime
        .run_async(code, namespace)
        .await
        .map_err(WorkerError::bootstrap(BootStage::RunSnippet))?;
    drop(value.map(Foreign::new));
    Ok(())
}

/// The HTTP patch imports its package, so it only runs when that package is preloaded.
fn http_patch_snippet(config: &WorkerConfig) -> &'static str {
    if config.preload.iter().any(|package| package == HTTP_PATCH_PACKAGE) {
        HTTP_PATCH_SNIPPET
    } else {
        tracing::debug!(package = HTTP_PATCH_PACKAGE, "HTTP patch package not preloaded, skipping patch");
        ""
    }
}

/// Routes the interpreter's `input()` and `sys.stdin.readline` through the bridge module.
///
/// The console echoes a newline after the answer; script mode flushes the
/// prompt so it reaches the host before the worker blocks.
fn input_patch_snippet(module: &str, mode: BootMode) -> String {
    let after_read = match mode {
        BootMode::Console => "    print()\n",
        BootMode::Script => "",
    };
    format!(
        "\
import sys
import builtins
import {module}

def get_input(prompt=\"\"):
    print(prompt, end=\"\", flush=True)
    line = {module}.get_input(prompt)
{after_read}    return line

builtins.input = get_input
sys.stdin.readline = {module}.readline
"
    )
}
