use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

/// Receives decoded stdout text from the interpreter.
///
/// Implement this trait to forward output to the host. Closures taking `&str`
/// implement it directly.
pub trait OutputSink {
    /// Called once per stdout flush with the decoded text of that flush.
    fn write_text(&mut self, text: &str);
}

impl<F: FnMut(&str)> OutputSink for F {
    fn write_text(&mut self, text: &str) {
        self(text);
    }
}

/// An `OutputSink` that collects every flush.
///
/// Clones share the same buffer, so a test can keep one handle while the
/// runtime owns another.
#[derive(Debug, Clone, Default)]
pub struct CollectOutput(Rc<RefCell<Vec<String>>>);

impl CollectOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the flushes received so far, one entry per flush.
    #[must_use]
    pub fn chunks(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    /// Returns all output received so far as a single string.
    #[must_use]
    pub fn text(&self) -> String {
        self.0.borrow().concat()
    }
}

impl OutputSink for CollectOutput {
    fn write_text(&mut self, text: &str) {
        self.0.borrow_mut().push(text.to_owned());
    }
}

/// `OutputSink` that ignores all output.
#[derive(Debug, Default)]
pub struct NoOutput;

impl OutputSink for NoOutput {
    fn write_text(&mut self, _text: &str) {}
}

/// Number of stdout flushes observed since the last reset.
///
/// Clones share the same count.
#[derive(Debug, Clone, Default)]
pub struct FlushCounter(Rc<Cell<usize>>);

impl FlushCounter {
    #[must_use]
    pub fn get(&self) -> usize {
        self.0.get()
    }

    pub fn reset(&self) {
        self.0.set(0);
    }

    fn increment(&self) {
        self.0.set(self.0.get() + 1);
    }
}

/// The stdout writer installed into the runtime.
///
/// The runtime calls [`StdoutRelay::write`] with the raw bytes of each flush.
/// The relay decodes them, forwards the text to the sink and counts the flush.
pub struct StdoutRelay {
    sink: Box<dyn OutputSink>,
    flushes: FlushCounter,
}

impl StdoutRelay {
    pub fn new(sink: Box<dyn OutputSink>, flushes: FlushCounter) -> Self {
        Self { sink, flushes }
    }

    /// Handles one flush and returns the number of bytes consumed.
    ///
    /// Invalid UTF-8 sequences are replaced with U+FFFD.
    pub fn write(&mut self, buffer: &[u8]) -> usize {
        let text = String::from_utf8_lossy(buffer);
        self.sink.write_text(&text);
        self.flushes.increment();
        buffer.len()
    }

    /// Stdout is never a terminal.
    #[must_use]
    pub fn is_tty(&self) -> bool {
        false
    }
}

impl fmt::Debug for StdoutRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdoutRelay").field("flushes", &self.flushes).finish_non_exhaustive()
    }
}
