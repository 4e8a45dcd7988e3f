// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst ISP Scheduler Library
//!
//! This library arbitrates a single image signal processor engine between
//! several independent node groups. Each group is a fixed set of buffer
//! endpoints (raw inputs, processing parameters, output frame, infrared
//! channel and statistics); the scheduler forms a job from one buffer per
//! contributing node, programs the hardware, and returns the buffers when the
//! hardware signals completion.
//!
//! ## Features
//!
//! - **Job Admission**: Peek-then-pop admission under a single scheduler lock
//!   so a job is formed from all of its buffers or none of them.
//! - **Single Job in Flight**: A global busy flag serialises the engine; the
//!   lock is released while the hardware is configured and triggered.
//! - **Round-Robin Completion**: After each completion the groups are
//!   rescanned starting after the one that completed.
//! - **Statistics**: Hardware statistics are copied into the running job's
//!   statistics buffer on the statistics-ready interrupt.
//! - **Stream Control**: Stopping a node drains its queue and waits for any
//!   running job holding one of its buffers.
//!
//! ## Example
//!
//! ```
//! use edgefirst_isp::{
//!     buffer::{Buffer, BufferState, Plane},
//!     completion::irq,
//!     node::NodeRole,
//!     notify::{CompletedBuffer, FrameSync},
//!     scheduler::{Scheduler, SchedulerConfig},
//!     sim::SimRegisters,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sim = Arc::new(SimRegisters::new());
//! let (buf_tx, buf_rx) = kanal::unbounded::<CompletedBuffer>();
//! let (ev_tx, _ev_rx) = kanal::unbounded::<FrameSync>();
//! let config = SchedulerConfig { groups: 1, disable_params: true, ..Default::default() };
//! let sched = Scheduler::new(config, sim.clone(), Arc::new(buf_tx), Arc::new(ev_tx))?;
//!
//! for role in [NodeRole::Input0, NodeRole::Frame] {
//!     let planes = sched
//!         .format(0, role)?
//!         .plane_sizes()
//!         .enumerate()
//!         .map(|(i, len)| Plane::new(0x1000_0000 * (i as u64 + 1), len))
//!         .collect();
//!     sched.queue_buffer(0, role, Buffer::new(0, planes))?;
//!     sched.start_streaming(0, role)?;
//! }
//! assert!(sched.is_busy());
//!
//! // The hardware signals frame done.
//! sim.raise(irq::FD2);
//! sched.handle_interrupt()?;
//! assert!(!sched.is_busy());
//!
//! let done = buf_rx.recv()?;
//! assert_eq!(done.buffer.state(), BufferState::Done);
//! # Ok(())
//! # }
//! ```
//!
//! ## Hardware Access
//!
//! The scheduler reaches the hardware only through the
//! [`regs::RegisterAccess`] trait. [`sim::SimRegisters`] provides an
//! in-memory implementation used by the simulator binary and the tests.
//!
//! ## Safety
//!
//! The only `unsafe` code reads `CLOCK_MONOTONIC` for completion timestamps.

pub mod buffer;
pub mod completion;
pub mod error;
pub mod format;
pub mod node;
pub mod notify;
pub mod pipeline;
pub mod regs;
pub mod scheduler;
pub mod sim;
pub mod stats;

pub use error::{IspError, Result};
pub use scheduler::{Scheduler, SchedulerConfig};
