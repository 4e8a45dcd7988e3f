// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use parking_lot::Mutex;
use std::{collections::VecDeque, fmt};

/// One DMA-capable memory plane of a [`Buffer`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Plane {
    /// Bus address the hardware reads from or writes to
    pub dma_addr: u64,
    /// Plane length in bytes
    pub len: usize,
}

impl Plane {
    pub fn new(dma_addr: u64, len: usize) -> Self {
        Self { dma_addr, len }
    }
}

/// Completion state of a [`Buffer`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferState {
    /// Owned by the scheduler, either waiting in a queue or bound to a job
    Queued,
    /// Processed by the hardware without error
    Done,
    /// Returned without valid content (hardware error or stream stop)
    Error,
}

/// Buffer handle lent to the scheduler by the allocator.
///
/// A buffer carries one or more DMA planes for the hardware and, for
/// metadata nodes (parameters and statistics), a CPU-visible payload. The
/// index is stable for the lifetime of the buffer in its pool, so the same
/// buffer can be queued again once it has been returned.
///
/// # Example
///
/// ```
/// use edgefirst_isp::buffer::{Buffer, BufferState, Plane};
///
/// let buf = Buffer::new(0, vec![Plane::new(0x8000_0000, 4096)]);
/// assert_eq!(buf.state(), BufferState::Queued);
/// assert_eq!(buf.dma_addr(0), 0x8000_0000);
/// assert_eq!(buf.dma_addr(1), 0);
/// ```
pub struct Buffer {
    index: u32,
    planes: Vec<Plane>,
    payload: Vec<u8>,
    state: BufferState,
    timestamp_ns: u64,
    sequence: u32,
}

impl Buffer {
    pub fn new(index: u32, planes: Vec<Plane>) -> Self {
        Self {
            index,
            planes,
            payload: Vec::new(),
            state: BufferState::Queued,
            timestamp_ns: 0,
            sequence: 0,
        }
    }

    /// Creates a metadata buffer whose plane is also mapped for the CPU.
    pub fn with_payload(index: u32, dma_addr: u64, payload: Vec<u8>) -> Self {
        let plane = Plane::new(dma_addr, payload.len());
        Self {
            payload,
            ..Self::new(index, vec![plane])
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    /// DMA address of the given plane, or 0 if the buffer has no such plane.
    pub fn dma_addr(&self, plane: usize) -> u64 {
        self.planes.get(plane).map_or(0, |p| p.dma_addr)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Monotonic completion time in nanoseconds, written at completion.
    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    /// Frame sequence of the job this buffer completed with.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Resets the completion metadata so the buffer can be queued again.
    pub fn requeue(&mut self) {
        self.state = BufferState::Queued;
        self.timestamp_ns = 0;
        self.sequence = 0;
    }

    pub(crate) fn complete(&mut self, state: BufferState, timestamp_ns: u64, sequence: u32) {
        self.state = state;
        self.timestamp_ns = timestamp_ns;
        self.sequence = sequence;
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("index", &self.index)
            .field("planes", &self.planes)
            .field("payload", &self.payload.len())
            .field("state", &self.state)
            .field("timestamp_ns", &self.timestamp_ns)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// FIFO of buffers waiting for the hardware, guarded by its own lock.
///
/// The queue lock is independent per node so producers never contend the
/// scheduler lock on enqueue. Only the scheduler pops, and only while holding
/// its global lock, which keeps a peeked front buffer valid until it is
/// popped.
#[derive(Default)]
pub struct BufferQueue {
    ready: Mutex<VecDeque<Buffer>>,
}

impl BufferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, buffer: Buffer) {
        self.ready.lock().push_back(buffer);
    }

    /// Index of the front buffer, if any.
    pub fn peek_front(&self) -> Option<u32> {
        self.ready.lock().front().map(Buffer::index)
    }

    pub fn pop_front(&self) -> Option<Buffer> {
        self.ready.lock().pop_front()
    }

    /// Returns a popped buffer to the head of the queue.
    pub(crate) fn push_front(&self, buffer: Buffer) {
        self.ready.lock().push_front(buffer);
    }

    pub fn is_empty(&self) -> bool {
        self.ready.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.ready.lock().len()
    }
}

impl fmt::Debug for BufferQueue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferQueue")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_queue_pops_nothing() {
        let q = BufferQueue::new();
        assert!(q.is_empty());
        assert!(q.peek_front().is_none());
        assert!(q.pop_front().is_none());
    }

    #[test]
    fn requeue_clears_completion() {
        let mut buf = Buffer::with_payload(3, 0x1000, vec![0; 16]);
        buf.complete(BufferState::Done, 42, 7);
        assert_eq!(buf.sequence(), 7);
        buf.requeue();
        assert_eq!(buf.state(), BufferState::Queued);
        assert_eq!(buf.timestamp_ns(), 0);
        assert_eq!(buf.planes()[0].len, 16);
    }

    proptest! {
        #[test]
        fn pop_order_matches_push_order(ops in prop::collection::vec(any::<bool>(), 1..200)) {
            let q = BufferQueue::new();
            let mut next = 0u32;
            let mut expected = VecDeque::new();
            for push in ops {
                if push {
                    q.push(Buffer::new(next, vec![]));
                    expected.push_back(next);
                    next += 1;
                } else {
                    prop_assert_eq!(q.peek_front(), expected.front().copied());
                    prop_assert_eq!(q.pop_front().map(|b| b.index()), expected.pop_front());
                }
            }
            prop_assert_eq!(q.len(), expected.len());
        }
    }
}
