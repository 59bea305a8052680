//! Capability interface consumed from the embedded interpreter.
//!
//! The worker never parses or executes Python itself. It asks a [`Runtime`]
//! to load packages, run bootstrap snippets, push console lines and settle the
//! resulting futures. Every handle the runtime hands back lives in interpreter
//! memory and implements [`Release`], so callers wrap it in a
//! [`Foreign`](crate::Foreign) guard.

use std::{fmt, future::Future, rc::Rc};

use serde::{Deserialize, Serialize};

use crate::{foreign::Release, fs::VirtualFs, input::InputBridge, output::StdoutRelay};

/// Verdict of the console's syntax check for the buffered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyntaxCheck {
    /// The buffered source forms a complete statement and has been scheduled.
    Complete,
    /// More input is expected; the line stays buffered for the next push.
    Incomplete,
    /// The buffered source cannot be parsed.
    SyntaxError,
}

impl SyntaxCheck {
    /// Returns the wire name of the verdict.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Incomplete => "incomplete",
            Self::SyntaxError => "syntax-error",
        }
    }
}

impl fmt::Display for SyntaxCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An exception raised by interpreted code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct InterpreterException {
    /// The exception message as rendered by the interpreter.
    pub message: String,
}

impl InterpreterException {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure reported by the runtime.
///
/// Only [`RuntimeError::Exception`] originates from the interpreter's own
/// exception type; everything else is a host-side fault.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// Interpreted code raised an exception.
    #[error(transparent)]
    Exception(#[from] InterpreterException),
    /// The runtime itself failed (construction, marshalling, missing bindings).
    #[error("runtime fault: {0}")]
    Fault(String),
}

impl RuntimeError {
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault(message.into())
    }
}

/// Constructs a runtime asynchronously.
///
/// Loading usually downloads and instantiates the interpreter, so it is the
/// first step of every bootstrap and the first one that can fail.
pub trait RuntimeLoader {
    type Runtime: Runtime;

    fn load(&self) -> impl Future<Output = Result<Self::Runtime, RuntimeError>>;
}

/// Operations the worker needs from an embedded interpreter.
pub trait Runtime: VirtualFs {
    /// A value produced by evaluation. Proxies must be released; releasing
    /// any other value does nothing.
    type Value: Release;
    /// A scratch namespace (dictionary) separate from the global one.
    type Namespace: Release;
    /// A reference to an interpreter object looked up in a namespace.
    type Object: Release;
    /// In-flight evaluation of one pushed console line.
    type Pending: Release;
    /// The pending line wrapped by the await helper.
    type Awaitable: Release;

    /// Interpreter version string.
    fn version(&self) -> String;

    /// Routes every stdout flush through `relay`.
    fn set_stdout(&mut self, relay: StdoutRelay);

    /// Loads prebuilt packages by name or URL.
    fn load_packages(&mut self, packages: &[String]) -> impl Future<Output = Result<(), RuntimeError>>;

    /// Installs packages through the installer package (already loaded).
    fn install_packages(&mut self, installer: &str, packages: &[String])
    -> impl Future<Output = Result<(), RuntimeError>>;

    /// Makes `bridge` importable from interpreted code as module `name`.
    fn register_module(&mut self, name: &str, bridge: Rc<InputBridge>) -> Result<(), RuntimeError>;

    /// Creates an empty namespace isolated from the global one.
    fn new_namespace(&mut self) -> Result<Self::Namespace, RuntimeError>;

    /// Looks up `name` in `namespace`.
    fn namespace_get(&mut self, namespace: &Self::Namespace, name: &str) -> Result<Option<Self::Object>, RuntimeError>;

    /// Runs `code` to completion, in `namespace` or the global namespace when `None`.
    ///
    /// Returns the value of the final expression statement, or `None` when
    /// there is none.
    fn run_async(
        &mut self,
        code: &str,
        namespace: Option<&Self::Namespace>,
    ) -> impl Future<Output = Result<Option<Self::Value>, RuntimeError>>;

    /// Converts a string-like object to text.
    fn object_text(&self, object: &Self::Object) -> Option<String>;

    /// Calls `function` with string arguments and returns its result if it is a string.
    fn invoke(&mut self, function: &Self::Object, args: &[&str]) -> Result<Option<String>, RuntimeError>;

    /// Pushes one line into the interactive `console` object.
    fn push_line(&mut self, console: &Self::Object, line: &str) -> Result<Self::Pending, RuntimeError>;

    /// Syntax-check verdict recorded on a pending line.
    fn syntax_check(&self, pending: &Self::Pending) -> SyntaxCheck;

    /// Pre-formatted traceback recorded on a pending line, if it failed.
    fn formatted_error(&self, pending: &Self::Pending) -> Option<String>;

    /// Wraps `pending` with the await helper.
    fn await_pending(&mut self, helper: &Self::Object, pending: &Self::Pending) -> Result<Self::Awaitable, RuntimeError>;

    /// Waits for the wrapped evaluation and returns its one-element result container.
    fn settle(&mut self, awaitable: &Self::Awaitable) -> impl Future<Output = Result<Vec<Self::Value>, RuntimeError>>;

    /// Whether `value` is a proxy into interpreter memory.
    fn is_proxy(&self, value: &Self::Value) -> bool;

    /// Converts `value` into a host-representable JSON value.
    fn export(&self, value: &Self::Value) -> serde_json::Value;
}
