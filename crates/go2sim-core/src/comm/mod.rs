//! Communication primitives standing in for the message bus
//!
//! Channels and topics for in-process delivery of commands and state, plus
//! the [`MessageSink`] seam through which the control loop publishes.

mod channel;
mod sink;
mod topic;

pub use channel::{bounded_channel, Receiver, Sender};
pub use sink::MessageSink;
pub use topic::{Delivery, Topic, TopicConfig};
