//! Passthrough to the interpreter's virtual filesystem.

use crate::{error::WorkerError, runtime::RuntimeError};

/// The interpreter's in-memory filesystem.
pub trait VirtualFs {
    fn read(&self, path: &str) -> Result<Vec<u8>, RuntimeError>;

    fn write(&mut self, path: &str, data: &[u8]) -> Result<(), RuntimeError>;

    fn mkdir(&mut self, path: &str) -> Result<(), RuntimeError>;

    fn rmdir(&mut self, path: &str) -> Result<(), RuntimeError>;

    fn unlink(&mut self, path: &str) -> Result<(), RuntimeError>;
}

/// Reads `path` as UTF-8 text.
pub(crate) fn read_text(fs: &impl VirtualFs, path: &str) -> Result<String, WorkerError> {
    let bytes = fs.read(path)?;
    String::from_utf8(bytes).map_err(|_| WorkerError::Encoding { path: path.to_owned() })
}

/// Writes `data` to `path` as UTF-8 text.
pub(crate) fn write_text(fs: &mut impl VirtualFs, path: &str, data: &str) -> Result<(), WorkerError> {
    fs.write(path, data.as_bytes())?;
    Ok(())
}
