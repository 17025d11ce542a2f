//! Link queues: the hand-off channel on every graph edge.
//!
//! A `LinkQueue` carries buffer ownership from one producer to one consumer in
//! FIFO order. End-of-stream travels through the channel as a marker behind the
//! last buffer, so everything pushed before `close()` is still delivered. Once a
//! consumer has seen the marker, every further `pop()` returns end-of-stream
//! immediately.
//!
//! `abort()` is the cancellation path: it disconnects a private signal channel
//! that every blocking `push`/`pop` selects on, waking parked workers at once.

use crate::pipeline::buffer::Buffer;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Why a queue operation did not complete.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    #[error("queue already closed")]
    Closed,

    #[error("queue aborted")]
    Aborted,

    #[error("timed out waiting on queue")]
    Timeout,

    #[error("queue disconnected")]
    Disconnected,
}

enum Message {
    Frame(Buffer),
    EndOfStream,
}

/// Ordered, closable hand-off channel between two nodes.
pub struct LinkQueue {
    name: String,
    capacity: Option<usize>,
    tx: Sender<Message>,
    rx: Receiver<Message>,
    closed: AtomicBool,
    end_seen: AtomicBool,
    aborted: AtomicBool,
    abort_tx: Mutex<Option<Sender<()>>>,
    abort_rx: Receiver<()>,
    pushed: AtomicU64,
    popped: AtomicU64,
}

impl LinkQueue {
    /// Queue with backpressure: `push` blocks once `capacity` buffers are in flight.
    pub fn bounded(name: impl Into<String>, capacity: usize) -> Self {
        // The end-of-stream marker needs a slot too, so never build a rendezvous channel.
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self::with_channel(name.into(), Some(capacity), tx, rx)
    }

    /// Queue without backpressure.
    pub fn unbounded(name: impl Into<String>) -> Self {
        let (tx, rx) = unbounded();
        Self::with_channel(name.into(), None, tx, rx)
    }

    fn with_channel(
        name: String,
        capacity: Option<usize>,
        tx: Sender<Message>,
        rx: Receiver<Message>,
    ) -> Self {
        let (abort_tx, abort_rx) = bounded(0);
        Self {
            name,
            capacity,
            tx,
            rx,
            closed: AtomicBool::new(false),
            end_seen: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            abort_tx: Mutex::new(Some(abort_tx)),
            abort_rx,
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `None` for unbounded queues.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Buffers pushed but not yet popped.
    pub fn len(&self) -> usize {
        let pushed = self.pushed.load(Ordering::Acquire);
        let popped = self.popped.load(Ordering::Acquire);
        pushed.saturating_sub(popped) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// True when `pop` would return without blocking.
    pub fn is_ready(&self) -> bool {
        !self.is_empty() || self.is_closed() || self.is_aborted()
    }

    /// Total buffers accepted by `push`.
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Total buffers handed out by `pop`.
    pub fn popped(&self) -> u64 {
        self.popped.load(Ordering::Relaxed)
    }

    /// Append `buffer` to the tail, blocking while a bounded queue is full.
    pub fn push(&self, buffer: Buffer) -> Result<(), LinkError> {
        if self.is_aborted() {
            return Err(LinkError::Aborted);
        }
        if self.is_closed() {
            return Err(LinkError::Closed);
        }
        select! {
            send(self.tx, Message::Frame(buffer)) -> res => {
                res.map_err(|_| LinkError::Disconnected)?;
                self.pushed.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            recv(self.abort_rx) -> _ => Err(LinkError::Aborted),
        }
    }

    /// Block until a buffer (`Ok(Some)`) or end-of-stream (`Ok(None)`) arrives.
    pub fn pop(&self) -> Result<Option<Buffer>, LinkError> {
        if self.end_seen.load(Ordering::Acquire) {
            return Ok(None);
        }
        if self.is_aborted() {
            return Err(LinkError::Aborted);
        }
        select! {
            recv(self.rx) -> msg => self.receive(msg.map_err(|_| LinkError::Disconnected)?),
            recv(self.abort_rx) -> _ => Err(LinkError::Aborted),
        }
    }

    /// Like `pop`, giving up with `LinkError::Timeout` after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<Buffer>, LinkError> {
        if self.end_seen.load(Ordering::Acquire) {
            return Ok(None);
        }
        if self.is_aborted() {
            return Err(LinkError::Aborted);
        }
        select! {
            recv(self.rx) -> msg => self.receive(msg.map_err(|_| LinkError::Disconnected)?),
            recv(self.abort_rx) -> _ => Err(LinkError::Aborted),
            default(timeout) => Err(LinkError::Timeout),
        }
    }

    fn receive(&self, msg: Message) -> Result<Option<Buffer>, LinkError> {
        match msg {
            Message::Frame(buffer) => {
                self.popped.fetch_add(1, Ordering::AcqRel);
                Ok(Some(buffer))
            }
            Message::EndOfStream => {
                self.end_seen.store(true, Ordering::Release);
                Ok(None)
            }
        }
    }

    /// Post end-of-stream. Only the first call has an effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::trace!("Queue '{}' closed after {} buffers", self.name, self.pushed());
        select! {
            send(self.tx, Message::EndOfStream) -> _ => {}
            recv(self.abort_rx) -> _ => {}
        }
    }

    /// Wake every blocked `push`/`pop` with `LinkError::Aborted`.
    pub fn abort(&self) {
        if self.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut tx) = self.abort_tx.lock() {
            tx.take();
        }
        tracing::debug!("Queue '{}' aborted", self.name);
    }
}

impl std::fmt::Debug for LinkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}
