//! Publish-subscribe topics for message distribution
//!
//! In-process stand-in for the `/lowcmd` and `/lowstate` bus topics.
//! Supports multiple publishers and subscribers.

use crossbeam_channel::{self as cc, TrySendError};
use parking_lot::RwLock;
use std::sync::Arc;

use super::Receiver;

/// Configuration for a topic
#[derive(Debug, Clone)]
pub struct TopicConfig {
    /// Maximum number of messages to buffer per subscriber
    pub buffer_size: usize,
    /// Topic name for debugging/logging
    pub name: Arc<str>,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            buffer_size: 10,
            name: Arc::from(""),
        }
    }
}

impl TopicConfig {
    /// Create a new topic config with the given name
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the buffer size
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }
}

/// Outcome of one publish
///
/// Both counts are taken under the same lock, so a subscriber joining
/// concurrently is never counted as a miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Subscribers that received the message
    pub delivered: usize,
    /// Live subscribers the message was offered to
    pub subscribers: usize,
}

impl Delivery {
    /// Subscribers whose buffer was full
    pub fn missed(&self) -> usize {
        self.subscribers - self.delivered
    }

    /// Whether every live subscriber received the message
    pub fn is_complete(&self) -> bool {
        self.delivered == self.subscribers
    }
}

struct TopicInner<T> {
    config: TopicConfig,
    subscribers: Vec<cc::Sender<T>>,
}

impl<T: Clone + Send + 'static> TopicInner<T> {
    /// Deliver to every subscriber.
    ///
    /// A full subscriber misses this message but stays subscribed; a
    /// disconnected one is removed and not counted.
    #[inline]
    fn do_publish(&mut self, message: T) -> Delivery {
        let mut delivered = 0;
        self.subscribers.retain(|tx| match tx.try_send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
        Delivery {
            delivered,
            subscribers: self.subscribers.len(),
        }
    }
}

/// A publish-subscribe topic
///
/// Multiple publishers can send messages, and multiple subscribers
/// receive copies of all messages.
///
/// # Example
/// ```ignore
/// let topic = Topic::<LowState>::new("/lowstate");
/// let sub = topic.subscribe();
/// topic.publish(LowState::default());
/// let msg = sub.recv().unwrap();
/// ```
pub struct Topic<T> {
    inner: Arc<RwLock<TopicInner<T>>>,
}

impl<T: Clone + Send + 'static> Topic<T> {
    /// Create a new topic with default configuration
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self::with_config(TopicConfig::new(name))
    }

    /// Create a new topic with custom configuration
    pub fn with_config(config: TopicConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(TopicInner {
                config,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Get the topic name
    #[inline]
    pub fn name(&self) -> Arc<str> {
        self.inner.read().config.name.clone()
    }

    /// Publish a message to all subscribers
    #[inline]
    pub fn publish(&self, message: T) -> Delivery {
        self.inner.write().do_publish(message)
    }

    /// Subscribe to the topic
    pub fn subscribe(&self) -> Receiver<T> {
        let mut inner = self.inner.write();
        let (tx, rx) = cc::bounded(inner.config.buffer_size);
        inner.subscribers.push(tx);
        Receiver { inner: rx }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.read().subscribers.len()
    }
}

impl<T: Clone + Send + 'static> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}
