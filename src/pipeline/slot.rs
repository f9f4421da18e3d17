//! Double-buffered frame slot shared between the producer and the consumer.
//!
//! The writer fills the inactive slot and publishes it with a single atomic
//! pointer swap, so the descriptor (and its sequence) and the bytes become
//! visible together. A reader holds an `Arc` to the slot it loaded; the writer
//! only reuses a slot once it is the sole owner again, and allocates fresh
//! storage otherwise. A reader can never observe a slot mid-write.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::debug;

use crate::capture::FrameDescriptor;
use crate::error::TransportError;

/// One fully-written frame
#[derive(Debug)]
pub struct PublishedFrame {
    descriptor: FrameDescriptor,
    data: Vec<u8>,
}

impl PublishedFrame {
    pub fn descriptor(&self) -> &FrameDescriptor {
        &self.descriptor
    }

    pub fn sequence(&self) -> u64 {
        self.descriptor.sequence
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

pub trait FrameSink {
    /// Publish `bytes` as the latest frame. Nothing is published on error.
    fn publish(&mut self, bytes: &[u8], descriptor: FrameDescriptor) -> Result<(), TransportError>;
}

pub trait FrameSource {
    fn latest(&self) -> Option<Arc<PublishedFrame>>;
}

/// Creates the writer/reader pair for one stream.
pub fn double_buffer() -> (SlotWriter, SlotReader) {
    let published = Arc::new(ArcSwapOption::empty());
    (
        SlotWriter {
            published: published.clone(),
            spare: None,
            capacity: 0,
            reallocations: 0,
        },
        SlotReader { published },
    )
}

pub struct SlotWriter {
    published: Arc<ArcSwapOption<PublishedFrame>>,
    spare: Option<Arc<PublishedFrame>>,
    /// High-water mark; new slots are allocated at least this large.
    capacity: usize,
    reallocations: u64,
}

impl SlotWriter {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots allocated because the spare was still held by a reader
    /// (or had never been allocated).
    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }

    /// Drop the spare slot so its memory can be reclaimed.
    pub fn reclaim(&mut self) {
        if self.spare.take().is_some() {
            debug!("Released spare frame slot ({} bytes)", self.capacity);
        }
    }

    /// Unpublish the current frame and drop the spare.
    pub fn clear(&mut self) {
        self.published.store(None);
        self.spare = None;
    }

    fn take_storage(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let reusable = self
            .spare
            .take()
            .and_then(|slot| Arc::try_unwrap(slot).ok())
            .map(|slot| slot.data);

        let mut data = match reusable {
            Some(mut data) => {
                data.clear();
                data
            }
            None => {
                self.reallocations += 1;
                Vec::new()
            }
        };

        let want = len.max(self.capacity);
        if data.capacity() < want {
            data.try_reserve_exact(want)
                .map_err(|_| TransportError::OutOfMemory { bytes: want })?;
        }
        self.capacity = self.capacity.max(data.capacity());
        Ok(data)
    }
}

impl FrameSink for SlotWriter {
    fn publish(&mut self, bytes: &[u8], descriptor: FrameDescriptor) -> Result<(), TransportError> {
        let mut data = self.take_storage(bytes.len())?;
        data.extend_from_slice(bytes);

        let previous = self
            .published
            .swap(Some(Arc::new(PublishedFrame { descriptor, data })));
        self.spare = previous;
        Ok(())
    }
}

#[derive(Clone)]
pub struct SlotReader {
    published: Arc<ArcSwapOption<PublishedFrame>>,
}

impl FrameSource for SlotReader {
    fn latest(&self) -> Option<Arc<PublishedFrame>> {
        self.published.load_full()
    }
}
