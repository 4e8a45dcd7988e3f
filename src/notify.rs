// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{buffer::Buffer, node::NodeRole};
use tracing::debug;

/// Frame-sync notification sent once per triggered job.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameSync {
    pub group: usize,
    /// Frame sequence the job will complete with
    pub sequence: u32,
}

/// Buffer handed back to its owner with completion metadata filled in.
#[derive(Debug)]
pub struct CompletedBuffer {
    pub group: usize,
    pub role: NodeRole,
    pub buffer: Buffer,
}

/// Receiver of frame-sync events.
///
/// Called on the admission path, so implementations must not block. Each
/// event is sent before its job is triggered, so a sink sees events in
/// admission order and before the job's completion.
pub trait EventSink: Send + Sync {
    fn frame_sync(&self, event: FrameSync);
}

/// Receiver of completed buffers.
///
/// Called from the completion path with the scheduler lock held, so
/// implementations must not block or call back into the scheduler.
pub trait BufferSink: Send + Sync {
    fn buffer_done(&self, done: CompletedBuffer);
}

impl EventSink for kanal::Sender<FrameSync> {
    fn frame_sync(&self, event: FrameSync) {
        if self.send(event).is_err() {
            debug!("frame sync receiver closed, dropping {:?}", event);
        }
    }
}

impl BufferSink for kanal::Sender<CompletedBuffer> {
    fn buffer_done(&self, done: CompletedBuffer) {
        let (group, role, index) = (done.group, done.role, done.buffer.index());
        if self.send(done).is_err() {
            debug!("buffer receiver closed, dropping {} buffer {} of group {}", role, index, group);
        }
    }
}
