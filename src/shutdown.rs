//! Cooperative shutdown and waiting on top of the non-blocking queue operations.
//!
//! The queue itself never blocks or retries. The helpers here poll it with a spin-then-yield
//! backoff until the operation succeeds, fails for good, or the shared [`Shutdown`] flag is
//! raised. A raised flag is reported as `Error::Disconnected`, but only once nothing
//! already committed is left to consume.
//!
//! ## Examples
//! ```
//! use spscq::SpscMessageQueue;
//! use spscq::error::Error;
//! use spscq::shutdown::Shutdown;
//!
//! let shutdown = Shutdown::new();
//! let (mut writer, mut reader) = SpscMessageQueue::<u64>::new(64).split();
//!
//! let producer = {
//!     let shutdown = shutdown.clone();
//!     std::thread::spawn(move || {
//!         for i in 0..1000 {
//!             writer.push(i, &shutdown).unwrap();
//!         }
//!         shutdown.stop();
//!     })
//! };
//!
//! let mut count = 0;
//! while let Ok(value) = reader.pop(&shutdown) {
//!     assert_eq!(count, value);
//!     count += 1;
//! }
//! assert_eq!(1000, count);
//! assert_eq!(Error::Disconnected, reader.pop(&shutdown).unwrap_err());
//! producer.join().unwrap();
//! ```

use crate::error::{PushError, Result, disconnected};
use crate::{MessageReader, MessageWriter, Reader, Writer};
use crossbeam_utils::{Backoff, CachePadded};
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Stop flag shared by the producer, the consumer and whoever owns their threads.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    stopped: Arc<CachePadded<AtomicBool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Everything the calling thread committed before is visible to whoever
    /// observes the flag.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            debug!("shutdown requested");
        }
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Writer {
    /// Publish a record of `len` bytes populated by `f`, waiting for space if the queue is
    /// full. Returns `Error::Disconnected` if the queue stays full after `shutdown` is raised
    /// and `Error::InvalidSize` immediately if the record can never fit.
    pub fn publish<F: FnOnce(&mut [u8])>(&mut self, len: usize, shutdown: &Shutdown, f: F) -> Result<()> {
        let backoff = Backoff::new();
        loop {
            let stopped = shutdown.is_stopped();
            match self.acquire_write(len) {
                Ok(mut slot) => {
                    f(slot.get_buffer_mut());
                    slot.commit();
                    return Ok(());
                }
                Err(err) if err.is_transient() && stopped => {
                    debug!("writer observed shutdown while full");
                    return Err(disconnected());
                }
                Err(err) if err.is_transient() => backoff.snooze(),
                Err(err) => {
                    warn!("publish rejected: {err}");
                    return Err(err);
                }
            }
        }
    }
}

impl Reader {
    /// Consume the next record with `f`, waiting for one if the queue is empty. Returns
    /// `Error::Disconnected` once `shutdown` is raised and everything committed before has
    /// been consumed.
    pub fn consume<R, F: FnOnce(&[u8]) -> R>(&mut self, shutdown: &Shutdown, f: F) -> Result<R> {
        let backoff = Backoff::new();
        loop {
            // flag first, so a record committed before the stop is never missed
            let stopped = shutdown.is_stopped();
            match self.acquire_read() {
                Ok(slot) => {
                    let result = f(slot.get_buffer());
                    slot.commit();
                    return Ok(result);
                }
                Err(err) if err.is_transient() && stopped => {
                    debug!("reader drained after shutdown");
                    return Err(disconnected());
                }
                Err(err) if err.is_transient() => backoff.snooze(),
                Err(err) => return Err(err),
            }
        }
    }
}

impl<T> MessageWriter<T> {
    /// Push `value`, waiting for space if the queue is full. If the queue stays full after
    /// `shutdown` is raised the value is handed back with `Error::Disconnected`.
    pub fn push(&mut self, value: T, shutdown: &Shutdown) -> std::result::Result<(), PushError<T>> {
        let backoff = Backoff::new();
        let mut value = value;
        loop {
            let stopped = shutdown.is_stopped();
            match self.try_push(value) {
                Ok(()) => return Ok(()),
                Err(PushError { error, value: rejected }) if error.is_transient() && stopped => {
                    debug!("writer observed shutdown while full");
                    return Err(PushError::new(disconnected(), rejected));
                }
                Err(PushError { error, value: rejected }) if error.is_transient() => {
                    value = rejected;
                    backoff.snooze();
                }
                Err(err) => {
                    warn!("push rejected: {}", err.error);
                    return Err(err);
                }
            }
        }
    }
}

impl<T> MessageReader<T> {
    /// Pop the oldest value, waiting for one if the queue is empty. Returns
    /// `Error::Disconnected` once `shutdown` is raised and the queue has been drained.
    pub fn pop(&mut self, shutdown: &Shutdown) -> Result<T> {
        let backoff = Backoff::new();
        loop {
            let stopped = shutdown.is_stopped();
            match self.try_pop() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && stopped => {
                    debug!("reader drained after shutdown");
                    return Err(disconnected());
                }
                Err(err) if err.is_transient() => backoff.snooze(),
                Err(err) => return Err(err),
            }
        }
    }
}
