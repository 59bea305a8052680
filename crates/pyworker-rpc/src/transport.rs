use std::{
    cell::RefCell,
    io::{self, BufRead, Write},
    rc::Rc,
};

use serde::Serialize;

pub(crate) const JSONRPC_VERSION: &str = "2.0";

/// Reads one Content-Length framed message body.
///
/// Returns `None` when the stream ends before a header block starts. Header
/// names are matched case-insensitively and anything but the length is
/// skipped.
pub fn read_framed_message(reader: &mut impl BufRead) -> io::Result<Option<Vec<u8>>> {
    let mut length = None;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        match header(&line) {
            None => break,
            Some((name, value)) if name.eq_ignore_ascii_case("content-length") => {
                length = Some(value.parse::<usize>().map_err(|err| {
                    invalid_frame(format!("bad content length {value:?}: {err}"))
                })?);
            }
            Some(_) => {}
        }
    }

    let length = length.ok_or_else(|| invalid_frame("frame has no content length".to_owned()))?;
    let mut body = vec![0; length];
    reader.read_exact(&mut body)?;
    Ok(Some(body))
}

/// Splits a header line into trimmed name and value; `None` marks the blank
/// line that ends the header block.
fn header(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return None;
    }
    let (name, value) = line.split_once(':').unwrap_or((line, ""));
    Some((name.trim(), value.trim()))
}

fn invalid_frame(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

/// Writes one Content-Length framed JSON message.
pub fn write_framed_message(writer: &mut impl Write, payload: &impl Serialize) -> io::Result<()> {
    let body = serde_json::to_vec(payload).map_err(|err| invalid_frame(format!("cannot encode message: {err}")))?;
    write!(writer, "Content-Length: {}\r\n\r\n", body.len())?;
    writer.write_all(&body)?;
    writer.flush()
}

/// Server-initiated message without an id.
#[derive(Serialize)]
struct Notification<'a, P> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a P,
}

/// Shared handle on the outbound stream.
///
/// Responses and notifications go through the same writer. Clones share it,
/// so engine callbacks can hold their own copy.
pub struct Transport<W> {
    writer: Rc<RefCell<W>>,
}

impl<W> Clone for Transport<W> {
    fn clone(&self) -> Self {
        Self {
            writer: Rc::clone(&self.writer),
        }
    }
}

impl<W: Write> Transport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Rc::new(RefCell::new(writer)),
        }
    }

    /// Writes one framed message.
    pub fn send(&self, payload: &impl Serialize) -> io::Result<()> {
        write_framed_message(&mut *self.writer.borrow_mut(), payload)
    }

    /// Sends a JSON-RPC notification.
    ///
    /// Notifications come from engine callbacks that cannot fail, so encode
    /// and write errors are logged and dropped.
    pub fn notify(&self, method: &str, params: &impl Serialize) {
        let message = Notification {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        };
        if let Err(err) = self.send(&message) {
            tracing::warn!(%err, method, "failed to send notification");
        }
    }
}
