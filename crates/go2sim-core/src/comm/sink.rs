//! Outbound delivery seam

use super::{Sender, Topic};
use crate::{Error, Result};

/// Destination for messages leaving the control loop
///
/// A failed delivery is reported as [`Error::Publish`]; the caller decides
/// whether to keep going.
pub trait MessageSink<T>: Send + Sync {
    /// Hand a message to the bus without blocking
    fn deliver(&self, message: T) -> Result<()>;
}

impl<T: Clone + Send + Sync + 'static> MessageSink<T> for Topic<T> {
    /// Fails when a subscriber was too full to take the message
    fn deliver(&self, message: T) -> Result<()> {
        let delivery = self.publish(message);
        if !delivery.is_complete() {
            return Err(Error::Publish(format!(
                "{}: {} of {} subscribers full",
                self.name(),
                delivery.missed(),
                delivery.subscribers
            )));
        }
        Ok(())
    }
}

impl<T: Send + 'static> MessageSink<T> for Sender<T> {
    fn deliver(&self, message: T) -> Result<()> {
        self.try_send(message).map_err(|e| match e {
            Error::ChannelFull => Error::Publish("state channel full".into()),
            Error::ChannelClosed => Error::Publish("state channel closed".into()),
            other => other,
        })
    }
}

impl<T, S: MessageSink<T> + ?Sized> MessageSink<T> for Box<S> {
    fn deliver(&self, message: T) -> Result<()> {
        (**self).deliver(message)
    }
}
