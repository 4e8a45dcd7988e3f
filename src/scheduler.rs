// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Job admission for the shared ISP engine.
//!
//! Several node groups compete for one engine that runs a single job at a
//! time. The [`Scheduler`] decides when a group has everything a job needs,
//! binds one buffer per contributing node into a [`Job`], and starts the
//! hardware. Completion (see [`crate::completion`]) releases the engine and
//! admits the next group.
//!
//! # Lock ordering
//!
//! There are two lock domains:
//!
//! 1. the scheduler lock, guarding the busy flag, the in-flight job and every
//!    group's streaming map, formats and frame sequence;
//! 2. one queue lock per node, guarding only that node's ready queue.
//!
//! The scheduler lock is always taken before a queue lock, never the other
//! way round. Queue locks are held only for a single push, peek or pop.
//! Buffers are popped only with the scheduler lock held, so a buffer seen in
//! the peek phase of an admission is still there in its pop phase.
//!
//! The scheduler lock is released before the job is configured and the
//! hardware triggered. Nothing else can be admitted meanwhile because the
//! busy flag stays set until completion clears it.
//!
//! Admission never blocks or allocates, so it can run from the completion
//! path as well as from buffer-queue and stream-on calls.

use crate::{
    buffer::{Buffer, BufferState},
    completion::{irq, monotonic_ns},
    error::{IspError, Result},
    format::{Capabilities, CaptureMode, GroupFormats, NodeFormat, Requirement},
    node::{NodeGroup, NodeRole, RoleMask, NODE_COUNT},
    notify::{BufferSink, CompletedBuffer, EventSink, FrameSync},
    pipeline::Pipeline,
    regs::RegisterAccess,
};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Parameter buffers a client may allocate per group.
pub const MAX_PARAMS_BUFFERS: u32 = 64;

/// Default number of node groups.
pub const DEFAULT_GROUPS: usize = 8;

/// Scheduler configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of node groups sharing the engine
    pub groups: usize,
    /// Run without parameter buffers; the params node is never required
    pub disable_params: bool,
    /// Skip the statistics copy on statistics-ready interrupts
    pub disable_stats: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            groups: DEFAULT_GROUPS,
            disable_params: false,
            disable_stats: false,
        }
    }
}

/// One hardware run: a buffer per contributing node of one group.
#[derive(Debug)]
pub struct Job {
    group: usize,
    sequence: u32,
    formats: GroupFormats,
    buffers: [Option<Buffer>; NODE_COUNT],
}

impl Job {
    pub fn group(&self) -> usize {
        self.group
    }

    /// Frame sequence of the group when the job was admitted.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn formats(&self) -> &GroupFormats {
        &self.formats
    }

    pub fn buffer(&self, role: NodeRole) -> Option<&Buffer> {
        self.buffers[role.index()].as_ref()
    }

    pub(crate) fn buffer_mut(&mut self, role: NodeRole) -> Option<&mut Buffer> {
        self.buffers[role.index()].as_mut()
    }

    /// Roles with a bound buffer.
    pub fn bound(&self) -> RoleMask {
        NodeRole::ALL
            .into_iter()
            .filter(|r| self.buffers[r.index()].is_some())
            .collect()
    }

    pub(crate) fn into_buffers(self) -> impl Iterator<Item = (NodeRole, Buffer)> {
        NodeRole::ALL
            .into_iter()
            .zip(self.buffers)
            .filter_map(|(role, buf)| buf.map(|b| (role, b)))
    }
}

/// Result of one admission attempt for one group.
#[derive(Debug)]
pub(crate) enum Admission {
    /// Another job owns the engine
    Busy,
    /// These required roles are not streaming
    NotStreaming(RoleMask),
    /// This contributing node has nothing queued
    NoBuffer(NodeRole),
    Admitted(Job),
}

#[derive(Debug)]
pub(crate) struct GroupState {
    pub(crate) streaming: RoleMask,
    /// Roles inside `stop_streaming`; admission treats them as stopped
    pub(crate) stopping: RoleMask,
    pub(crate) frame_sequence: u32,
    pub(crate) formats: GroupFormats,
}

/// The job owning the engine. `job` is `None` while it is being configured.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub(crate) group: usize,
    pub(crate) bound: RoleMask,
    pub(crate) job: Option<Job>,
}

#[derive(Debug)]
pub(crate) struct SchedState {
    pub(crate) busy: bool,
    pub(crate) in_flight: Option<InFlight>,
    pub(crate) groups: Vec<GroupState>,
    pub(crate) interrupts_enabled: bool,
    /// Sources currently enabled in the interrupt enable register
    pub(crate) interrupt_mask: u32,
}

/// Serialises access to the ISP engine across node groups.
///
/// The scheduler is shared by reference (typically in an [`Arc`]) between
/// buffer producers, stream control and the interrupt handler; every entry
/// point takes `&self`.
///
/// # Example
///
/// ```
/// use edgefirst_isp::{
///     buffer::{Buffer, Plane},
///     node::NodeRole,
///     notify::{CompletedBuffer, FrameSync},
///     scheduler::{Scheduler, SchedulerConfig},
///     sim::SimRegisters,
/// };
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let (buf_tx, buf_rx) = kanal::unbounded::<CompletedBuffer>();
/// let (ev_tx, ev_rx) = kanal::unbounded::<FrameSync>();
/// let config = SchedulerConfig { groups: 1, disable_params: true, ..Default::default() };
/// let sched = Scheduler::new(
///     config,
///     Arc::new(SimRegisters::new()),
///     Arc::new(buf_tx),
///     Arc::new(ev_tx),
/// )?;
///
/// let raw = sched.format(0, NodeRole::Input0)?.plane_sizes().next().unwrap_or(0);
/// sched.queue_buffer(0, NodeRole::Input0, Buffer::new(0, vec![Plane::new(0x1000_0000, raw)]))?;
/// sched.start_streaming(0, NodeRole::Input0)?;
/// assert!(!sched.is_busy());
/// # let _ = (buf_rx, ev_rx);
/// # Ok(())
/// # }
/// ```
pub struct Scheduler {
    pub(crate) groups: Vec<NodeGroup>,
    pub(crate) state: Mutex<SchedState>,
    pub(crate) job_done: Condvar,
    pub(crate) pipeline: Pipeline,
    pub(crate) buffers: Arc<dyn BufferSink>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) config: SchedulerConfig,
}

impl Scheduler {
    /// Initialises the hardware and creates the node groups.
    ///
    /// # Errors
    ///
    /// Returns an error if the hardware reset or interrupt enable fails.
    pub fn new(
        config: SchedulerConfig,
        regs: Arc<dyn RegisterAccess>,
        buffers: Arc<dyn BufferSink>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let pipeline = Pipeline::new(regs);
        pipeline.init()?;

        let groups = (0..config.groups).map(NodeGroup::new).collect();
        let state = SchedState {
            busy: false,
            in_flight: None,
            groups: (0..config.groups)
                .map(|_| GroupState {
                    streaming: RoleMask::EMPTY,
                    stopping: RoleMask::EMPTY,
                    frame_sequence: 0,
                    formats: GroupFormats::default(),
                })
                .collect(),
            interrupts_enabled: true,
            interrupt_mask: irq::ENABLE_ALL,
        };
        debug!("scheduler ready with {} node groups", config.groups);

        Ok(Self {
            groups,
            state: Mutex::new(state),
            job_done: Condvar::new(),
            pipeline,
            buffers,
            events,
            config,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn group(&self, group: usize) -> Result<&NodeGroup> {
        self.groups.get(group).ok_or(IspError::InvalidGroup(group))
    }

    pub fn groups(&self) -> &[NodeGroup] {
        &self.groups
    }

    /// Number of buffers the client may allocate for a node.
    ///
    /// Parameter buffers are capped at [`MAX_PARAMS_BUFFERS`]; other nodes get
    /// what they ask for.
    pub fn queue_setup(&self, group: usize, role: NodeRole, requested: u32) -> Result<u32> {
        self.group(group)?;
        let count = match role {
            NodeRole::Params => requested.min(MAX_PARAMS_BUFFERS),
            _ => requested,
        };
        debug!("group {} {}: {} buffers (requested {})", group, role, count, requested);
        Ok(count)
    }

    pub fn format(&self, group: usize, role: NodeRole) -> Result<NodeFormat> {
        self.group(group)?;
        Ok(*self.state.lock().groups[group].formats.node(role))
    }

    /// Negotiates the format of a node.
    ///
    /// # Errors
    ///
    /// Returns [`IspError::InvalidFormat`] if the format does not suit the node
    /// and [`IspError::Busy`] if the node is streaming.
    pub fn set_format(&self, group: usize, role: NodeRole, format: NodeFormat) -> Result<()> {
        self.group(group)?;
        format.validate(role)?;

        let mut state = self.state.lock();
        let gs = &mut state.groups[group];
        if gs.streaming.contains(role) {
            return Err(IspError::Busy(role));
        }
        gs.formats.nodes[role.index()] = format;
        debug!("group {} {}: format {}", group, role, format);
        Ok(())
    }

    /// Node requirements of a group under its current formats.
    pub fn capabilities(&self, group: usize) -> Result<Capabilities> {
        self.group(group)?;
        let state = self.state.lock();
        Ok(state.groups[group]
            .formats
            .capabilities(!self.config.disable_params))
    }

    /// Selects linear or staggered HDR capture, which decides whether the
    /// secondary input is required. Rejected while any input streams.
    pub fn set_capture_mode(&self, group: usize, mode: CaptureMode) -> Result<()> {
        self.group(group)?;

        let mut state = self.state.lock();
        let gs = &mut state.groups[group];
        for role in [NodeRole::Input0, NodeRole::Input1] {
            if gs.streaming.contains(role) {
                return Err(IspError::Busy(role));
            }
        }
        gs.formats.mode = mode;
        Ok(())
    }

    /// Hands a buffer to a node and tries to admit a job for its group.
    ///
    /// # Errors
    ///
    /// Rejects buffers whose planes (or payload, for metadata nodes) are
    /// smaller than the node format requires, and parameter buffers whose
    /// index lies beyond the capped pool.
    pub fn queue_buffer(&self, group: usize, role: NodeRole, buffer: Buffer) -> Result<()> {
        let nodes = self.group(group)?;
        if role == NodeRole::Params && buffer.index() >= MAX_PARAMS_BUFFERS {
            return Err(IspError::BufferIndex {
                role,
                index: buffer.index(),
                limit: MAX_PARAMS_BUFFERS,
            });
        }

        let format = *self.state.lock().groups[group].formats.node(role);
        prepare(role, &format, &buffer)?;

        trace!("group {} {}: queue buffer {}", group, role, buffer.index());
        nodes.node(role).queue().push(buffer);

        // Only this group can have become ready.
        self.try_schedule(group)?;
        Ok(())
    }

    /// Sets or clears a node's bit in the group streaming map.
    ///
    /// Setting a bit tries to admit a job for the group once the map update
    /// is released. Clearing only updates the map; use
    /// [`Scheduler::stop_streaming`] to also return queued buffers and wait
    /// for the running job.
    pub fn set_streaming(&self, group: usize, role: NodeRole, streaming: bool) -> Result<()> {
        self.group(group)?;
        {
            let mut state = self.state.lock();
            let gs = &mut state.groups[group];
            if streaming {
                gs.streaming.insert(role);
            } else {
                gs.streaming.remove(role);
            }
            debug!("group {} {}: streaming {:?}", group, role, gs.streaming);
        }
        if streaming {
            self.try_schedule(group)?;
        }
        Ok(())
    }

    /// Marks a node as streaming and tries to admit a job for its group.
    pub fn start_streaming(&self, group: usize, role: NodeRole) -> Result<()> {
        self.set_streaming(group, role, true)
    }

    /// Whether a job of the group needs a buffer from `role` under the
    /// group's current formats. Statistics only take part while streaming.
    pub fn is_node_required(&self, group: usize, role: NodeRole) -> Result<bool> {
        Ok(self.capabilities(group)?.requires(role) == Requirement::Required)
    }

    /// Stops a node. Returns the number of unclaimed buffers returned as
    /// errors.
    ///
    /// Buffers waiting in the node's queue are returned in the error state.
    /// If the running job has a buffer of this node bound the call blocks
    /// until that job completes; the job itself is not cancelled and its
    /// buffers complete normally. No new job takes the node once the stop has
    /// begun, and buffers queued while waiting are drained as well. The
    /// streaming bit is cleared last.
    pub fn stop_streaming(&self, group: usize, role: NodeRole) -> Result<usize> {
        let nodes = self.group(group)?;
        let mut state = self.state.lock();
        state.groups[group].stopping.insert(role);

        let mut drained = 0;
        loop {
            while let Some(mut buffer) = nodes.node(role).queue().pop_front() {
                buffer.complete(BufferState::Error, monotonic_ns(), 0);
                self.buffers.buffer_done(CompletedBuffer {
                    group,
                    role,
                    buffer,
                });
                drained += 1;
            }

            let running = state
                .in_flight
                .as_ref()
                .is_some_and(|f| f.group == group && f.bound.contains(role));
            if !running {
                break;
            }
            debug!("group {} {}: waiting for the running job", group, role);
            self.job_done.wait(&mut state);
        }

        let gs = &mut state.groups[group];
        gs.stopping.remove(role);
        gs.streaming.remove(role);
        debug!(
            "group {} {}: stream off, {} buffers dropped, streaming {:?}",
            group, role, drained, gs.streaming
        );
        Ok(drained)
    }

    /// Tries to admit a job for a single group. Returns whether a job started.
    pub fn try_schedule(&self, group: usize) -> Result<bool> {
        self.group(group)?;
        let mut state = self.state.lock();
        match self.admit(&mut state, group) {
            Admission::Admitted(job) => {
                drop(state);
                self.dispatch(job);
                Ok(true)
            }
            other => {
                trace!("group {}: not admitted ({:?})", group, other);
                Ok(false)
            }
        }
    }

    /// Scans every group once, lowest index first, and admits the first ready
    /// one. Returns whether a job started. A no-op when nothing is ready.
    pub fn schedule(&self) -> bool {
        self.schedule_after(None)
    }

    /// Scans every group once starting after `after`, admitting the first
    /// ready one.
    pub(crate) fn schedule_after(&self, after: Option<usize>) -> bool {
        let mut state = self.state.lock();
        if state.busy {
            return false;
        }

        let n = self.groups.len();
        for i in 0..n {
            let group = after.map_or(i, |a| (a + 1 + i) % n);
            match self.admit(&mut state, group) {
                Admission::Admitted(job) => {
                    drop(state);
                    self.dispatch(job);
                    return true;
                }
                other => trace!("group {}: not admitted ({:?})", group, other),
            }
        }
        false
    }

    /// Admission state machine. Runs with the scheduler lock held.
    fn admit(&self, state: &mut SchedState, group: usize) -> Admission {
        if state.busy {
            return Admission::Busy;
        }

        let gs = &state.groups[group];
        let streaming = gs.streaming.difference(gs.stopping);
        let caps = gs.formats.capabilities(!self.config.disable_params);
        let missing = caps.required().difference(streaming);
        if !missing.is_empty() {
            return Admission::NotStreaming(missing);
        }

        let contributing = caps.contributing(streaming);
        let nodes = &self.groups[group];
        if let Some(role) = contributing
            .iter()
            .find(|r| nodes.node(*r).queue().peek_front().is_none())
        {
            return Admission::NoBuffer(role);
        }

        let mut buffers: [Option<Buffer>; NODE_COUNT] = Default::default();
        for role in contributing.iter() {
            buffers[role.index()] = nodes.node(role).queue().pop_front();
            if buffers[role.index()].is_none() {
                // Pops only happen under the scheduler lock, so a peeked
                // buffer cannot vanish. Put everything back if it did.
                error!("group {} {}: peeked buffer disappeared", group, role);
                for r in contributing.iter() {
                    if let Some(b) = buffers[r.index()].take() {
                        nodes.node(r).queue().push_front(b);
                    }
                }
                return Admission::NoBuffer(role);
            }
        }

        let job = Job {
            group,
            sequence: gs.frame_sequence,
            formats: gs.formats,
            buffers,
        };
        state.busy = true;
        state.in_flight = Some(InFlight {
            group,
            bound: contributing,
            job: None,
        });
        debug!("group {}: admitted job {} with {:?}", group, job.sequence, contributing);
        Admission::Admitted(job)
    }

    /// Configures and triggers an admitted job. Runs without the scheduler
    /// lock except for the short hand-over of the job to the in-flight slot.
    ///
    /// The frame-sync event goes out before the trigger, so events reach the
    /// sink in admission order.
    pub(crate) fn dispatch(&self, job: Job) {
        self.pipeline.configure(&job);
        let event = FrameSync {
            group: job.group,
            sequence: job.sequence,
        };

        {
            let mut state = self.state.lock();
            let claimed = state
                .in_flight
                .as_ref()
                .is_some_and(|f| f.group == job.group && f.job.is_none());
            if !claimed {
                error!("group {}: job has no in-flight slot, returning its buffers", job.group);
                self.abandon(&mut state, job);
                return;
            }
            if let Some(f) = state.in_flight.as_mut() {
                f.job = Some(job);
            }
        }

        self.events.frame_sync(event);
        self.pipeline.trigger();
        debug!("group {}: hardware started, frame {}", event.group, event.sequence);
    }

    /// Returns the buffers of a job that never ran and releases the engine.
    fn abandon(&self, state: &mut SchedState, job: Job) {
        let group = job.group;
        for (role, mut buffer) in job.into_buffers() {
            buffer.complete(BufferState::Error, monotonic_ns(), 0);
            self.buffers.buffer_done(CompletedBuffer {
                group,
                role,
                buffer,
            });
        }
        if !matches!(state.in_flight, Some(InFlight { job: Some(_), .. })) {
            state.in_flight = None;
            state.busy = false;
            self.job_done.notify_all();
        }
    }

    /// True while a job owns the engine.
    pub fn is_busy(&self) -> bool {
        self.state.lock().busy
    }

    /// Group whose job currently owns the engine.
    pub fn running_group(&self) -> Option<usize> {
        self.state.lock().in_flight.as_ref().map(|f| f.group)
    }

    /// Sequence number the group's next completed job will carry.
    pub fn frame_sequence(&self, group: usize) -> Result<u32> {
        self.group(group)?;
        Ok(self.state.lock().groups[group].frame_sequence)
    }

    pub fn streaming_map(&self, group: usize) -> Result<RoleMask> {
        self.group(group)?;
        Ok(self.state.lock().groups[group].streaming)
    }

    /// Buffers waiting in a node's queue.
    pub fn queued(&self, group: usize, role: NodeRole) -> Result<usize> {
        Ok(self.group(group)?.node(role).queue().len())
    }

    /// False once an interrupt could not be acknowledged and its sources were
    /// disabled.
    pub fn interrupts_enabled(&self) -> bool {
        self.state.lock().interrupts_enabled
    }

    /// Interrupt sources still enabled. Sources whose acknowledge failed are
    /// removed and stay removed.
    pub fn interrupt_mask(&self) -> u32 {
        self.state.lock().interrupt_mask
    }
}

/// Checks that a buffer can hold what its node produces or consumes.
fn prepare(role: NodeRole, format: &NodeFormat, buffer: &Buffer) -> Result<()> {
    if let NodeFormat::Meta { buffer_size } = format {
        if buffer.payload().len() < *buffer_size {
            return Err(IspError::BufferTooSmall {
                role,
                index: buffer.index(),
                plane: 0,
                len: buffer.payload().len(),
                required: *buffer_size,
            });
        }
    }

    let expected = format.plane_sizes().count();
    if buffer.planes().len() != expected {
        return Err(IspError::PlaneCount {
            role,
            index: buffer.index(),
            planes: buffer.planes().len(),
            expected,
        });
    }
    for (plane, (p, required)) in buffer.planes().iter().zip(format.plane_sizes()).enumerate() {
        if p.len < required {
            return Err(IspError::BufferTooSmall {
                role,
                index: buffer.index(),
                plane,
                len: p.len,
                required,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{buffer::Plane, format::PARAMS_BUFFER_SIZE, sim::SimRegisters};

    #[test]
    fn job_without_slot_releases_engine() {
        let sim = Arc::new(SimRegisters::new());
        let (buf_tx, buf_rx) = kanal::unbounded::<CompletedBuffer>();
        let (ev_tx, ev_rx) = kanal::unbounded::<FrameSync>();
        let config = SchedulerConfig {
            groups: 1,
            disable_params: true,
            ..Default::default()
        };
        let sched = Scheduler::new(config, sim.clone(), Arc::new(buf_tx), Arc::new(ev_tx)).unwrap();

        let mut buffers: [Option<Buffer>; NODE_COUNT] = Default::default();
        buffers[NodeRole::Frame.index()] = Some(Buffer::new(3, vec![Plane::new(0x1000, 16)]));
        let job = Job {
            group: 0,
            sequence: 0,
            formats: GroupFormats::default(),
            buffers,
        };
        sched.state.lock().busy = true;
        sched.dispatch(job);

        assert!(!sched.is_busy());
        assert_eq!(sched.running_group(), None);
        assert_eq!(sim.triggers(), 0);
        assert!(ev_rx.try_recv().unwrap().is_none());
        let done = buf_rx.try_recv().unwrap().unwrap();
        assert_eq!((done.role, done.buffer.index()), (NodeRole::Frame, 3));
        assert_eq!(done.buffer.state(), BufferState::Error);
    }

    #[test]
    fn prepare_checks_meta_payload() {
        let format = NodeFormat::default_for(NodeRole::Params);
        let small = Buffer::with_payload(0, 0x1000, vec![0; 16]);
        assert!(matches!(
            prepare(NodeRole::Params, &format, &small),
            Err(IspError::BufferTooSmall { required: PARAMS_BUFFER_SIZE, .. })
        ));
        let ok = Buffer::with_payload(0, 0x1000, vec![0; PARAMS_BUFFER_SIZE]);
        assert!(prepare(NodeRole::Params, &format, &ok).is_ok());
    }

    #[test]
    fn prepare_checks_planes() {
        let format = NodeFormat::default_for(NodeRole::Frame);
        let sizes: Vec<usize> = format.plane_sizes().collect();
        assert_eq!(sizes.len(), 2);

        let one = Buffer::new(0, vec![Plane::new(0x1000, sizes[0])]);
        assert!(matches!(
            prepare(NodeRole::Frame, &format, &one),
            Err(IspError::PlaneCount { expected: 2, .. })
        ));

        let short = Buffer::new(
            1,
            vec![Plane::new(0x1000, sizes[0]), Plane::new(0x2000, sizes[1] - 1)],
        );
        assert!(matches!(
            prepare(NodeRole::Frame, &format, &short),
            Err(IspError::BufferTooSmall { plane: 1, .. })
        ));

        let ok = Buffer::new(
            2,
            vec![Plane::new(0x1000, sizes[0]), Plane::new(0x2000, sizes[1])],
        );
        assert!(prepare(NodeRole::Frame, &format, &ok).is_ok());
    }
}
