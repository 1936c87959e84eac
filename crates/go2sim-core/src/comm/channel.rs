//! Channels for inter-thread communication
//!
//! Wrapper around crossbeam-channel with crate error types.

use crossbeam_channel::{self as cc, RecvTimeoutError, TrySendError};
use std::time::Duration;

use crate::{Error, Result};

/// Sender half of a channel
#[derive(Debug)]
pub struct Sender<T> {
    inner: cc::Sender<T>,
}

impl<T> Sender<T> {
    /// Try to send without blocking
    #[inline]
    pub fn try_send(&self, value: T) -> Result<()> {
        match self.inner.try_send(value) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::ChannelFull),
            Err(TrySendError::Disconnected(_)) => Err(Error::ChannelClosed),
        }
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Receiver half of a channel
#[derive(Debug)]
pub struct Receiver<T> {
    pub(crate) inner: cc::Receiver<T>,
}

impl<T> Receiver<T> {
    /// Receive a value, blocking until one is available
    #[inline]
    pub fn recv(&self) -> Result<T> {
        self.inner.recv().map_err(|_| Error::ChannelClosed)
    }

    /// Receive with a timeout
    #[inline]
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        match self.inner.recv_timeout(timeout) {
            Ok(v) => Ok(Some(v)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::ChannelClosed),
        }
    }

    /// Drain all available messages
    #[inline]
    pub fn drain(&self) -> Vec<T> {
        let mut v = Vec::with_capacity(self.inner.len());
        while let Ok(msg) = self.inner.try_recv() {
            v.push(msg);
        }
        v
    }

    /// Check if the channel is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Get the number of messages in the channel
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Create a bounded channel with the specified capacity
pub fn bounded_channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = cc::bounded(capacity);
    (Sender { inner: tx }, Receiver { inner: rx })
}
