//! Bounded frame channels connecting bridge workers.
//!
//! A [`FrameChannel`] is a named, bounded, multi-producer multi-consumer
//! FIFO queue. Senders suspend while the channel is full. Closing the
//! channel is the only way to end a stream: once closed, further sends
//! fail, while receivers still drain every buffered frame before observing
//! end-of-stream.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{BridgeError, Result};

/// Something the termination sequence can close.
pub trait Closable: Send + Sync {
    /// Channel name, used in logs.
    fn name(&self) -> &str;

    /// Close the channel.
    ///
    /// Returns `true` if this call closed it, `false` if it was already closed.
    fn close(&self) -> bool;

    /// Whether the channel is closed.
    fn is_closed(&self) -> bool;
}

/// A named bounded channel.
pub struct FrameChannel<T> {
    name: Arc<str>,
    sender: async_channel::Sender<T>,
    receiver: async_channel::Receiver<T>,
    closed: Arc<watch::Sender<bool>>,
}

impl<T> FrameChannel<T> {
    /// Create a bounded channel. A capacity of zero is raised to one.
    pub fn bounded(name: impl Into<String>, capacity: usize) -> Self {
        let (sender, receiver) = async_channel::bounded(capacity.max(1));
        let (closed, _) = watch::channel(false);
        Self {
            name: Arc::from(name.into()),
            sender,
            receiver,
            closed: Arc::new(closed),
        }
    }

    /// Get a sending handle.
    pub fn sender(&self) -> FrameSender<T> {
        FrameSender {
            name: self.name.clone(),
            inner: self.sender.clone(),
            closed: self.closed.clone(),
        }
    }

    /// Get a receiving handle.
    pub fn receiver(&self) -> FrameReceiver<T> {
        FrameReceiver {
            name: self.name.clone(),
            inner: self.receiver.clone(),
        }
    }

    /// Number of buffered frames.
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    /// Whether no frames are buffered.
    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    /// Channel capacity.
    pub fn capacity(&self) -> usize {
        self.sender.capacity().unwrap_or(usize::MAX)
    }
}

impl<T> Clone for FrameChannel<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<T> fmt::Debug for FrameChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameChannel")
            .field("name", &self.name)
            .field("len", &self.sender.len())
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl<T: Send> Closable for FrameChannel<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&self) -> bool {
        let closed = self.sender.close();
        self.closed.send_replace(true);
        closed
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Sending half of a [`FrameChannel`].
pub struct FrameSender<T> {
    name: Arc<str>,
    inner: async_channel::Sender<T>,
    closed: Arc<watch::Sender<bool>>,
}

impl<T> FrameSender<T> {
    /// Send a frame, suspending while the channel is full.
    ///
    /// Fails with [`BridgeError::ChannelClosed`] once the channel is closed.
    pub async fn send(&self, frame: T) -> Result<()> {
        self.inner
            .send(frame)
            .await
            .map_err(|_| BridgeError::ChannelClosed {
                channel: self.name.to_string(),
            })
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the channel is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Resolve once the channel has been closed through [`Closable::close`].
    pub async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

impl<T> Clone for FrameSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            inner: self.inner.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<T> fmt::Debug for FrameSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSender").field("name", &self.name).finish()
    }
}

/// Receiving half of a [`FrameChannel`].
pub struct FrameReceiver<T> {
    name: Arc<str>,
    inner: async_channel::Receiver<T>,
}

impl<T> FrameReceiver<T> {
    /// Receive the next frame, suspending while the channel is empty.
    ///
    /// Returns `None` once the channel is closed and fully drained.
    pub async fn recv(&self) -> Option<T> {
        self.inner.recv().await.ok()
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the channel is closed (frames may still be buffered).
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl<T> Clone for FrameReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for FrameReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameReceiver")
            .field("name", &self.name)
            .finish()
    }
}
