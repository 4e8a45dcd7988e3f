// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Interrupt handling and job completion.
//!
//! [`Scheduler::handle_interrupt`] is the completion entry point. It reads
//! and acknowledges the interrupt status, copies statistics into the running
//! job on a statistics-ready event, and on a terminal event returns every
//! bound buffer, advances the group's frame sequence, releases the engine and
//! rescans the groups round-robin starting after the one that completed.

use crate::{
    buffer::BufferState,
    error::Result,
    node::NodeRole,
    notify::CompletedBuffer,
    regs::Field,
    scheduler::Scheduler,
    stats,
};
use std::fmt;
use tracing::{debug, error, instrument, warn};

/// Interrupt status and enable bits.
pub mod irq {
    /// Frame start, exposure 0
    pub const FS1: u32 = 1 << 0;
    /// Frame start, exposure 1
    pub const FS2: u32 = 1 << 1;
    /// Frame done, first pass
    pub const FD1: u32 = 1 << 2;
    /// Frame done, job complete
    pub const FD2: u32 = 1 << 3;
    /// Statistics ready
    pub const STATD: u32 = 1 << 4;
    /// DRC statistics ready
    pub const DRCD: u32 = 1 << 5;
    pub const BUS_ERR_MASK: u32 = 0xf << 16;
    pub const TRIG_ERR: u32 = 1 << 20;
    pub const CSI_TERR: u32 = 1 << 21;
    /// Engine still running; informational
    pub const BUSY: u32 = 1 << 31;

    pub const ERRORS: u32 = BUS_ERR_MASK | TRIG_ERR | CSI_TERR;

    /// Every source the completion path handles.
    pub const ENABLE_ALL: u32 = FS1 | FS2 | FD1 | FD2 | STATD | DRCD | ERRORS;
}

/// One raw interrupt status word.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct IrqStatus(u32);

impl IrqStatus {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Bits acknowledged by writing them back.
    pub const fn handled(self) -> u32 {
        self.0 & irq::ENABLE_ALL
    }

    pub const fn stats_ready(self) -> bool {
        self.0 & irq::STATD != 0
    }

    pub const fn hw_busy(self) -> bool {
        self.0 & irq::BUSY != 0
    }

    /// Completion state of the running job if this status ends it. Error bits
    /// take precedence over frame done.
    pub const fn terminal(self) -> Option<BufferState> {
        if self.0 & irq::ERRORS != 0 {
            Some(BufferState::Error)
        } else if self.0 & irq::FD2 != 0 {
            Some(BufferState::Done)
        } else {
            None
        }
    }
}

impl fmt::Debug for IrqStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const NAMES: [(u32, &str); 10] = [
            (irq::FS1, "FS1"),
            (irq::FS2, "FS2"),
            (irq::FD1, "FD1"),
            (irq::FD2, "FD2"),
            (irq::STATD, "STATD"),
            (irq::DRCD, "DRCD"),
            (irq::BUS_ERR_MASK, "BUS_ERR"),
            (irq::TRIG_ERR, "TRIG_ERR"),
            (irq::CSI_TERR, "CSI_TERR"),
            (irq::BUSY, "BUSY"),
        ];
        write!(f, "{:#010x}", self.0)?;
        f.debug_list()
            .entries(NAMES.iter().filter(|(bit, _)| self.0 & bit != 0).map(|(_, n)| n))
            .finish()
    }
}

/// A job ended by a terminal interrupt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub group: usize,
    pub sequence: u32,
    pub state: BufferState,
    /// Buffers returned to their owners
    pub buffers: usize,
}

/// What one interrupt did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IrqReport {
    pub status: IrqStatus,
    pub stats_copied: bool,
    pub completed: Option<Completion>,
    /// A new job was admitted after the completion
    pub rescheduled: bool,
}

/// CLOCK_MONOTONIC in nanoseconds.
pub fn monotonic_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid timespec for the duration of the call.
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

impl Scheduler {
    /// Services one hardware interrupt.
    ///
    /// # Errors
    ///
    /// Only a failed status read is reported. Everything after it is handled
    /// here: a failed acknowledge disables the acknowledged sources and a
    /// failed statistics copy leaves the statistics buffer partly filled.
    #[instrument(skip(self), level = "trace")]
    pub fn handle_interrupt(&self) -> Result<IrqReport> {
        let timestamp = monotonic_ns();
        let regs = self.pipeline.regs();
        let status = IrqStatus::new(regs.read_field(Field::InterruptStatus)?);
        log_status(status);

        let mut report = IrqReport {
            status,
            stats_copied: false,
            completed: None,
            rescheduled: false,
        };

        if status.stats_ready() {
            report.stats_copied = self.collect_stats();
        }

        let clear = status.handled();
        if clear != 0 {
            if let Err(e) = regs.write_field(Field::InterruptStatus, clear) {
                error!("interrupt clear of {:?} failed: {}, disabling those sources", status, e);
                let mut state = self.state.lock();
                state.interrupt_mask &= !clear;
                state.interrupts_enabled = false;
                if let Err(e) = regs.write_field(Field::InterruptEnable, state.interrupt_mask) {
                    error!("interrupt disable failed: {}", e);
                }
            }
        }

        if let Some(state) = status.terminal() {
            report.completed = self.complete_job(state, timestamp);
            if let Some(done) = report.completed {
                report.rescheduled = self.schedule_after(Some(done.group));
            }
        }

        Ok(report)
    }

    /// Copies hardware statistics into the running job's statistics buffer.
    fn collect_stats(&self) -> bool {
        if self.config.disable_stats {
            return false;
        }

        let mut state = self.state.lock();
        let Some(buf) = state
            .in_flight
            .as_mut()
            .and_then(|f| f.job.as_mut())
            .and_then(|job| job.buffer_mut(NodeRole::Stats))
        else {
            debug!("statistics ready without a statistics buffer");
            return false;
        };

        match stats::copy_into(self.pipeline.regs(), buf) {
            Ok(()) => true,
            Err(e) => {
                warn!("statistics copy into buffer {} failed: {}", buf.index(), e);
                false
            }
        }
    }

    /// Returns the running job's buffers and releases the engine.
    fn complete_job(&self, result: BufferState, timestamp: u64) -> Option<Completion> {
        let mut state = self.state.lock();
        let Some(in_flight) = state.in_flight.take() else {
            warn!("terminal interrupt with no job in flight");
            return None;
        };
        let job = match in_flight.job {
            Some(job) => job,
            None => {
                // Still being configured, so it cannot have run yet.
                warn!("group {}: terminal interrupt before trigger", in_flight.group);
                state.in_flight = Some(in_flight);
                return None;
            }
        };

        let group = job.group();
        let sequence = state.groups[group].frame_sequence;
        let mut buffers = 0;
        for (role, mut buffer) in job.into_buffers() {
            buffer.complete(result, timestamp, sequence);
            self.buffers.buffer_done(CompletedBuffer {
                group,
                role,
                buffer,
            });
            buffers += 1;
        }

        state.groups[group].frame_sequence = sequence.wrapping_add(1);
        state.busy = false;
        self.job_done.notify_all();

        debug!("group {}: frame {} complete ({:?})", group, sequence, result);
        Some(Completion {
            group,
            sequence,
            state: result,
            buffers,
        })
    }
}

fn log_status(status: IrqStatus) {
    let raw = status.raw();
    if raw & irq::ERRORS != 0 {
        error!("hardware error {:?}", status);
    } else if raw & irq::ENABLE_ALL != 0 {
        debug!("interrupt {:?}", status);
    }
    if status.hw_busy() {
        error!("interrupt while hardware still busy {:?}", status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_take_precedence() {
        assert_eq!(IrqStatus::new(irq::FD2).terminal(), Some(BufferState::Done));
        assert_eq!(
            IrqStatus::new(irq::FD2 | irq::TRIG_ERR).terminal(),
            Some(BufferState::Error)
        );
        assert_eq!(IrqStatus::new(1 << 17).terminal(), Some(BufferState::Error));
        for bit in [irq::FS1, irq::FS2, irq::FD1, irq::STATD, irq::DRCD, irq::BUSY] {
            assert_eq!(IrqStatus::new(bit).terminal(), None);
        }
    }

    #[test]
    fn busy_is_never_acknowledged() {
        let status = IrqStatus::new(irq::BUSY | irq::FD2);
        assert_eq!(status.handled(), irq::FD2);
        assert!(status.hw_busy());
    }

    #[test]
    fn status_debug_names_bits() {
        let s = format!("{:?}", IrqStatus::new(irq::FS1 | irq::STATD));
        assert!(s.contains("FS1") && s.contains("STATD"), "{}", s);
    }

    #[test]
    fn monotonic_clock_advances() {
        let a = monotonic_ns();
        let b = monotonic_ns();
        assert!(a > 0 && b >= a);
    }
}
