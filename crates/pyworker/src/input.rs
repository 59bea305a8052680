//! Blocking input for interpreted code.
//!
//! Interpreted code expects `input()` to return a line synchronously, but the
//! worker has no suspension point it could yield at from inside a synchronous
//! call. The bridge therefore blocks the whole worker until the host answers.
//! Two providers are available:
//!
//! - [`HttpInput`] performs a blocking GET against a well-known local endpoint
//!   that an intercepting layer outside the worker resolves.
//! - [`rendezvous`] pairs a [`ChannelInput`] with an [`InputRequests`] receiver
//!   for hosts that embed the worker in-process and answer from another thread.
//!
//! Neither provider has a timeout: the host must always answer.

use std::{
    cell::RefCell,
    fmt::{self, Write as _},
    io::Read as _,
    rc::Rc,
    sync::mpsc,
};

use crate::{config::InputConfig, session::SessionId};

/// Errors raised while waiting for an input line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    /// The HTTP round-trip failed before a body was read.
    #[error("input request to {url} failed: {message}")]
    Http { url: String, message: String },
    /// The host side of a rendezvous went away without answering.
    #[error("input request was abandoned by the host")]
    Abandoned,
}

/// One request for a line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRequest {
    pub session_id: SessionId,
    pub prompt: String,
}

/// Source of input lines for interpreted code.
///
/// `request_line` blocks until the host supplies a line.
pub trait InputProvider {
    fn request_line(&self, request: &InputRequest) -> Result<String, InputError>;
}

/// The object registered into the interpreter as an importable module.
///
/// The interpreter's `input()` calls [`InputBridge::get_input`], and its
/// `sys.stdin.readline` calls [`InputBridge::readline`], which reuses the most
/// recent prompt.
pub struct InputBridge {
    session_id: SessionId,
    provider: Rc<dyn InputProvider>,
    last_prompt: RefCell<String>,
}

impl InputBridge {
    pub fn new(session_id: SessionId, provider: Rc<dyn InputProvider>) -> Self {
        Self {
            session_id,
            provider,
            last_prompt: RefCell::new(String::new()),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Requests a line using `prompt`, remembering it for `readline`.
    pub fn get_input(&self, prompt: &str) -> Result<String, InputError> {
        *self.last_prompt.borrow_mut() = prompt.to_owned();
        self.request(prompt.to_owned())
    }

    /// Requests a line using the most recent prompt.
    pub fn readline(&self) -> Result<String, InputError> {
        let prompt = self.last_prompt.borrow().clone();
        self.request(prompt)
    }

    /// The most recent prompt passed to `get_input`.
    #[must_use]
    pub fn last_prompt(&self) -> String {
        self.last_prompt.borrow().clone()
    }

    fn request(&self, prompt: String) -> Result<String, InputError> {
        tracing::debug!(session_id = %self.session_id, %prompt, "requesting input line");
        let request = InputRequest {
            session_id: self.session_id,
            prompt,
        };
        self.provider.request_line(&request)
    }
}

impl fmt::Debug for InputBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputBridge")
            .field("session_id", &self.session_id)
            .field("last_prompt", &self.last_prompt)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// HTTP provider
// =============================================================================

/// Requests input with a synchronous GET to the intercepting endpoint.
///
/// The response body is returned verbatim whatever the status code.
#[derive(Debug, Clone)]
pub struct HttpInput {
    origin: String,
    path: String,
}

impl HttpInput {
    pub fn new(origin: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            path: path.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &InputConfig) -> Self {
        Self::new(config.origin.clone(), config.path.clone())
    }

    /// Full URL for `request`: `{origin}{path}?id=<id>&prompt=<encoded prompt>`.
    #[must_use]
    pub fn url_for(&self, request: &InputRequest) -> String {
        format!(
            "{}{}?id={}&prompt={}",
            self.origin.trim_end_matches('/'),
            self.path,
            request.session_id,
            encode_uri_component(&request.prompt)
        )
    }
}

impl InputProvider for HttpInput {
    fn request_line(&self, request: &InputRequest) -> Result<String, InputError> {
        let url = self.url_for(request);
        let failed = |message: String| InputError::Http {
            url: url.clone(),
            message,
        };

        let response = ureq::get(&url)
            .config()
            .http_status_as_error(false)
            .build()
            .call()
            .map_err(|err| failed(err.to_string()))?;

        let mut body = String::new();
        response
            .into_body()
            .into_reader()
            .read_to_string(&mut body)
            .map_err(|err| failed(format!("reading body: {err}")))?;
        Ok(body)
    }
}

/// Percent-encodes `text` the way ECMAScript's `encodeURIComponent` does.
#[must_use]
pub fn encode_uri_component(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for &b in text.as_bytes() {
        let is_unreserved =
            b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')');
        if is_unreserved {
            out.push(char::from(b));
        } else {
            // writing to a String cannot fail
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}

// =============================================================================
// In-process rendezvous
// =============================================================================

/// Creates a connected provider and host-side receiver.
///
/// Each request carries its own single-slot reply channel, so at most one
/// answer is ever delivered per request.
#[must_use]
pub fn rendezvous() -> (ChannelInput, InputRequests) {
    let (sender, receiver) = mpsc::channel();
    (ChannelInput { sender }, InputRequests { receiver })
}

/// Interpreter side of a [`rendezvous`].
#[derive(Debug, Clone)]
pub struct ChannelInput {
    sender: mpsc::Sender<PendingInput>,
}

impl InputProvider for ChannelInput {
    fn request_line(&self, request: &InputRequest) -> Result<String, InputError> {
        let (reply, answer) = mpsc::sync_channel(1);
        self.sender
            .send(PendingInput {
                request: request.clone(),
                reply,
            })
            .map_err(|_| InputError::Abandoned)?;
        answer.recv().map_err(|_| InputError::Abandoned)
    }
}

/// Host side of a [`rendezvous`].
#[derive(Debug)]
pub struct InputRequests {
    receiver: mpsc::Receiver<PendingInput>,
}

impl InputRequests {
    /// Blocks until the interpreter asks for a line.
    ///
    /// Returns `None` once every [`ChannelInput`] has been dropped.
    pub fn recv(&self) -> Option<PendingInput> {
        self.receiver.recv().ok()
    }

    /// Returns a request if one is already waiting.
    pub fn try_recv(&self) -> Option<PendingInput> {
        self.receiver.try_recv().ok()
    }
}

/// An outstanding request waiting for the host's answer.
///
/// Dropping it without calling [`PendingInput::resolve`] fails the request
/// with [`InputError::Abandoned`].
#[derive(Debug)]
pub struct PendingInput {
    request: InputRequest,
    reply: mpsc::SyncSender<String>,
}

impl PendingInput {
    #[must_use]
    pub fn request(&self) -> &InputRequest {
        &self.request
    }

    /// Answers the request with `line`.
    pub fn resolve(self, line: impl Into<String>) {
        // the requester may have given up already; nothing to report then
        let _ = self.reply.send(line.into());
    }
}
