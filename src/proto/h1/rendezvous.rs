//! Single-slot byte hand-off between the transport and the parser.
//!
//! The transport's receive task offers a [`ByteFrame`] through
//! [`Dispatcher::dispatch`] and does not get it back until the parser has
//! copied at least some bytes out of it. Partially drained frames are
//! re-offered until empty, so a slow parser backpressures the transport one
//! frame at a time. This is a hand-off, not a queue: there is no buffering
//! beyond the one slot.

use std::cmp;
use std::mem;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::trace;

use crate::transport::ByteFrame;
use crate::{Error, Result};

/// Creates a connected producer/consumer pair over a fresh slot.
///
/// The returned [`Rendezvous`] handle closes the slot from either side.
pub(crate) fn rendezvous() -> (Dispatcher, Reader, Arc<Rendezvous>) {
    let shared = Arc::new(Rendezvous {
        slot: Mutex::new(Slot::Empty),
        on_data: Notify::new(),
        on_free: Notify::new(),
    });
    let dispatcher = Dispatcher {
        shared: shared.clone(),
    };
    let reader = Reader {
        shared: shared.clone(),
    };
    (dispatcher, reader, shared)
}

#[derive(Debug)]
enum Slot {
    Empty,
    /// A frame offered by the producer, not yet touched by the consumer.
    Offered(ByteFrame),
    /// A frame handed back by the consumer with its cursor advanced.
    Returned(ByteFrame),
    Closed,
}

/// Shared slot state; also the close handle held by the stream connection.
#[derive(Debug)]
pub(crate) struct Rendezvous {
    slot: Mutex<Slot>,
    on_data: Notify,
    on_free: Notify,
}

impl Rendezvous {
    /// Terminates the hand-off: an in-flight `read` observes end-of-stream
    /// and future `dispatch` calls are rejected.
    pub(crate) fn close(&self) {
        let mut slot = self.slot.lock().expect("rendezvous poisoned");
        if !matches!(*slot, Slot::Closed) {
            trace!("rendezvous closed");
            *slot = Slot::Closed;
        }
        drop(slot);
        // notify_one stores a permit, so a waiter that checks state before
        // parking still observes the close.
        self.on_data.notify_one();
        self.on_free.notify_one();
    }
}

/// The producer half, driven by the transport's receive task.
pub(crate) struct Dispatcher {
    shared: Arc<Rendezvous>,
}

impl Dispatcher {
    /// Hands `frame` to the parser, returning once every byte in it has
    /// been consumed. Errors with `ChannelClosed` if the rendezvous closes
    /// mid-exchange; the frame's undrained remainder is discarded with it.
    pub(crate) async fn dispatch(&mut self, mut frame: ByteFrame) -> Result<()> {
        while !frame.is_empty() {
            self.offer(frame)?;
            self.shared.on_data.notify_one();
            frame = self.reclaim().await?;
        }
        Ok(())
    }

    fn offer(&mut self, frame: ByteFrame) -> Result<()> {
        let mut slot = self.shared.slot.lock().expect("rendezvous poisoned");
        match *slot {
            Slot::Closed => Err(Error::new_closed()),
            Slot::Empty => {
                *slot = Slot::Offered(frame);
                Ok(())
            }
            // There is exactly one producer and it blocks until its frame
            // comes back, so the slot cannot already hold one.
            Slot::Offered(_) | Slot::Returned(_) => unreachable!("rendezvous slot occupied"),
        }
    }

    async fn reclaim(&mut self) -> Result<ByteFrame> {
        loop {
            {
                let mut slot = self.shared.slot.lock().expect("rendezvous poisoned");
                match mem::replace(&mut *slot, Slot::Empty) {
                    Slot::Returned(frame) => return Ok(frame),
                    Slot::Closed => {
                        *slot = Slot::Closed;
                        return Err(Error::new_closed());
                    }
                    other => *slot = other,
                }
            }
            self.shared.on_free.notified().await;
        }
    }
}

/// The consumer half, owned by the parser task.
pub(crate) struct Reader {
    shared: Arc<Rendezvous>,
}

impl Reader {
    /// Copies up to `dst.len()` bytes out of the currently offered frame,
    /// advances its cursor, and signals the producer that the slot is free.
    /// Returns the copied count; `0` means end-of-stream.
    pub(crate) async fn read(&mut self, dst: &mut [u8]) -> usize {
        loop {
            {
                let mut slot = self.shared.slot.lock().expect("rendezvous poisoned");
                match mem::replace(&mut *slot, Slot::Empty) {
                    Slot::Offered(mut frame) => {
                        let n = cmp::min(dst.len(), frame.len());
                        dst[..n].copy_from_slice(&frame.bytes()[..n]);
                        frame.drain(n);
                        *slot = Slot::Returned(frame);
                        drop(slot);
                        self.shared.on_free.notify_one();
                        return n;
                    }
                    Slot::Closed => {
                        *slot = Slot::Closed;
                        return 0;
                    }
                    other => *slot = other,
                }
            }
            self.shared.on_data.notified().await;
        }
    }
}
