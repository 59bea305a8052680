//! Scoped ownership of interpreter-owned handles.
//!
//! Values that live in the interpreter's memory are invisible to Rust's
//! ownership model: dropping the Rust-side handle does not free the object on
//! the interpreter side. [`Foreign`] closes that gap by calling
//! [`Release::release`] exactly once, either explicitly or when the guard goes
//! out of scope on any exit path.

use std::{fmt, ops::Deref};

/// A handle whose underlying interpreter resource must be freed explicitly.
///
/// `release` consumes the handle, so a released handle cannot be used again.
pub trait Release {
    /// Frees the interpreter-side resource behind this handle.
    fn release(self);
}

/// Guard that releases an interpreter handle exactly once.
///
/// The handle is released when [`Foreign::release`] is called or when the
/// guard is dropped, whichever comes first. [`Foreign::into_inner`] gives the
/// handle back without releasing it.
pub struct Foreign<T: Release> {
    handle: Option<T>,
}

impl<T: Release> Foreign<T> {
    /// Takes ownership of `handle`.
    #[must_use]
    pub fn new(handle: T) -> Self {
        Self { handle: Some(handle) }
    }

    /// Releases the handle now instead of at the end of the scope.
    pub fn release(mut self) {
        self.release_now();
    }

    /// Returns the handle without releasing it.
    #[must_use]
    pub fn into_inner(mut self) -> T {
        match self.handle.take() {
            Some(handle) => handle,
            // `handle` is only taken by `release_now`, which consumes or drops the guard.
            None => unreachable!("foreign handle already released"),
        }
    }

    fn release_now(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.release();
        }
    }
}

impl<T: Release> Deref for Foreign<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.handle {
            Some(handle) => handle,
            None => unreachable!("foreign handle already released"),
        }
    }
}

impl<T: Release> Drop for Foreign<T> {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl<T: Release + fmt::Debug> fmt::Debug for Foreign<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Foreign").field(&self.handle).finish()
    }
}
