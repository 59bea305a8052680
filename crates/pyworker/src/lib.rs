//! Worker-side bridge between a host application and an embedded Python runtime.
//!
//! The crate drives an interpreter it does not implement. Everything it needs
//! from the interpreter goes through the [`Runtime`] capability trait, and
//! everything the interpreter hands back that lives in its own memory is held
//! in a [`Foreign`] guard so it is released exactly once.
//!
//! Two engines share the same bootstrap:
//!
//! - [`ConsoleEngine`] feeds source to an interactive console one line at a
//!   time, tracks whether the buffered statement is complete, and reports
//!   interpreter errors as structured [`RunOutcome`] values.
//! - [`ScriptEngine`] executes a whole blob against the global namespace and
//!   reports a [`ReturnResult`] through a callback.
//!
//! Interpreted code reads input synchronously through the [`InputBridge`],
//! which blocks the worker until the host answers, either over HTTP
//! ([`HttpInput`]) or through an in-process rendezvous ([`rendezvous`]).

mod bootstrap;
mod config;
mod console;
mod error;
mod foreign;
mod fs;
pub mod input;
mod output;
pub mod runtime;
mod script;
mod session;

pub use crate::{
    bootstrap::{BootMode, BootStage, ConsoleHelpers},
    config::{ConfigError, ENV_INPUT_ORIGIN, InputConfig, WorkerConfig},
    console::{ConsoleEngine, ConsoleState, RunOutcome},
    error::WorkerError,
    foreign::{Foreign, Release},
    fs::VirtualFs,
    input::{
        ChannelInput, HttpInput, InputBridge, InputError, InputProvider, InputRequest, InputRequests, PendingInput,
        rendezvous,
    },
    output::{CollectOutput, FlushCounter, NoOutput, OutputSink, StdoutRelay},
    runtime::{InterpreterException, Runtime, RuntimeError, RuntimeLoader, SyntaxCheck},
    script::{ReturnResult, ScriptEngine},
    session::{PackageSpecs, SessionId, SessionInfo},
};
