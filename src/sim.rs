// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! In-memory register file emulating the ISP.
//!
//! [`SimRegisters`] implements [`RegisterAccess`] without hardware. It records
//! every write, acknowledges interrupt status bits on write-one-to-clear,
//! auto-clears reset bits and counts triggers. A trigger issued while the
//! previous job has not yet raised a terminal interrupt counts as an overlap,
//! which the scheduler must never cause.
//!
//! Writes to chosen fields can be made to fail to exercise the best-effort
//! configuration and interrupt-acknowledge paths.

use crate::{
    completion::irq,
    error::{IspError, Result},
    regs::{Field, MemRegion, RegisterAccess},
    stats::{STATS_MEMORY_WORDS, STATS_REGISTER_WORDS},
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// One recorded write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegWrite {
    Field(Field, u32),
    /// Parameter block of the given length
    Params(usize),
}

#[derive(Default)]
struct SimState {
    fields: HashMap<Field, u32>,
    log: Vec<RegWrite>,
    failing: HashSet<Field>,
    fail_params: bool,
    params: Option<Vec<u8>>,
    status: u32,
    triggers: u64,
    running: bool,
    overlaps: u64,
}

/// Simulated register file.
pub struct SimRegisters {
    state: Mutex<SimState>,
    stats_regs: Vec<u8>,
    stats_mem: Vec<u8>,
    trigger_tx: Option<kanal::Sender<u64>>,
}

impl Default for SimRegisters {
    fn default() -> Self {
        Self::new()
    }
}

/// Word `i` of a statistics region reads as `tag << 24 | i`.
fn pattern(tag: u32, words: usize) -> Vec<u8> {
    (0..words as u32)
        .flat_map(|i| (tag << 24 | i).to_le_bytes())
        .collect()
}

impl SimRegisters {
    pub const REGISTER_TAG: u32 = 0xa5;
    pub const MEMORY_TAG: u32 = 0x5a;

    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            stats_regs: pattern(Self::REGISTER_TAG, STATS_REGISTER_WORDS),
            stats_mem: pattern(Self::MEMORY_TAG, STATS_MEMORY_WORDS),
            trigger_tx: None,
        }
    }

    /// Sends the running trigger count on every trigger.
    pub fn with_trigger_notify(mut self, tx: kanal::Sender<u64>) -> Self {
        self.trigger_tx = Some(tx);
        self
    }

    /// Makes every later write to `field` fail.
    pub fn fail_writes(&self, field: Field) {
        self.state.lock().failing.insert(field);
    }

    pub fn restore_writes(&self, field: Field) {
        self.state.lock().failing.remove(&field);
    }

    pub fn fail_params(&self, fail: bool) {
        self.state.lock().fail_params = fail;
    }

    /// Latches interrupt status bits as the hardware would.
    pub fn raise(&self, bits: u32) {
        let mut state = self.state.lock();
        state.status |= bits;
        if bits & (irq::FD2 | irq::ERRORS) != 0 {
            state.running = false;
        }
    }

    pub fn status(&self) -> u32 {
        self.state.lock().status
    }

    pub fn writes(&self) -> Vec<RegWrite> {
        self.state.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    /// Last value written to a field.
    pub fn value(&self, field: Field) -> Option<u32> {
        self.state.lock().fields.get(&field).copied()
    }

    pub fn last_params(&self) -> Option<Vec<u8>> {
        self.state.lock().params.clone()
    }

    pub fn triggers(&self) -> u64 {
        self.state.lock().triggers
    }

    /// Triggers issued while a job was still running.
    pub fn overlapping_triggers(&self) -> u64 {
        self.state.lock().overlaps
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }
}

impl RegisterAccess for SimRegisters {
    fn write_field(&self, field: Field, value: u32) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing.contains(&field) {
            return Err(IspError::RegisterWrite { field });
        }
        state.log.push(RegWrite::Field(field, value));
        trace!("{:?} <- {:#x}", field, value);

        match field {
            Field::SoftReset => {
                state.fields.insert(field, 0);
            }
            Field::InterruptStatus => state.status &= !value,
            Field::Trigger => {
                if state.running {
                    state.overlaps += 1;
                }
                state.running = true;
                state.triggers += 1;
                let count = state.triggers;
                drop(state);
                if let Some(tx) = &self.trigger_tx {
                    if tx.send(count).is_err() {
                        debug!("trigger receiver closed, dropping trigger {}", count);
                    }
                }
            }
            _ => {
                state.fields.insert(field, value);
            }
        }
        Ok(())
    }

    fn read_field(&self, field: Field) -> Result<u32> {
        let state = self.state.lock();
        Ok(match field {
            Field::InterruptStatus => state.status,
            _ => state.fields.get(&field).copied().unwrap_or(0),
        })
    }

    fn bulk_read(&self, region: MemRegion, offset: usize, dest: &mut [u8]) -> Result<()> {
        let src = match region {
            MemRegion::StatsRegisters => &self.stats_regs,
            MemRegion::StatsMemory => &self.stats_mem,
        };
        let start = offset * 4;
        let Some(src) = src.get(start..start + dest.len()) else {
            return Err(IspError::BulkRead {
                region,
                offset,
                words: dest.len() / 4,
            });
        };
        dest.copy_from_slice(src);
        Ok(())
    }

    fn load_params(&self, block: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_params {
            return Err(IspError::ParamsLoad("parameter memory not ready".into()));
        }
        state.log.push(RegWrite::Params(block.len()));
        state.params = Some(block.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_write_one_to_clear() {
        let sim = SimRegisters::new();
        sim.raise(irq::FS1 | irq::FD2);
        sim.write_field(Field::InterruptStatus, irq::FS1).unwrap();
        assert_eq!(sim.read_field(Field::InterruptStatus).unwrap(), irq::FD2);
    }

    #[test]
    fn reset_auto_clears() {
        let sim = SimRegisters::new();
        sim.write_field(Field::SoftReset, 2).unwrap();
        assert_eq!(sim.read_field(Field::SoftReset).unwrap(), 0);
    }

    #[test]
    fn trigger_survives_closed_notify_channel() {
        let (tx, rx) = kanal::unbounded::<u64>();
        let sim = SimRegisters::new().with_trigger_notify(tx);
        sim.write_field(Field::Trigger, 1).unwrap();
        assert_eq!(rx.recv().unwrap(), 1);
        drop(rx);
        sim.write_field(Field::Trigger, 1).unwrap();
        assert_eq!(sim.triggers(), 2);
    }

    #[test]
    fn overlapping_trigger_is_counted() {
        let sim = SimRegisters::new();
        sim.write_field(Field::Trigger, 1).unwrap();
        sim.write_field(Field::Trigger, 1).unwrap();
        assert_eq!(sim.overlapping_triggers(), 1);
        sim.raise(irq::FD2);
        sim.write_field(Field::Trigger, 1).unwrap();
        assert_eq!(sim.overlapping_triggers(), 1);
        assert_eq!(sim.triggers(), 3);
    }

    #[test]
    fn failing_field_is_not_recorded() {
        let sim = SimRegisters::new();
        sim.fail_writes(Field::ImageWidth);
        assert!(matches!(
            sim.write_field(Field::ImageWidth, 640),
            Err(IspError::RegisterWrite { field: Field::ImageWidth })
        ));
        assert!(sim.writes().is_empty());
        sim.restore_writes(Field::ImageWidth);
        sim.write_field(Field::ImageWidth, 640).unwrap();
        assert_eq!(sim.value(Field::ImageWidth), Some(640));
    }

    #[test]
    fn bulk_read_bounds() {
        let sim = SimRegisters::new();
        let mut word = [0u8; 4];
        sim.bulk_read(MemRegion::StatsMemory, 0x10, &mut word).unwrap();
        assert_eq!(u32::from_le_bytes(word), SimRegisters::MEMORY_TAG << 24 | 0x10);
        let mut past = [0u8; 8];
        assert!(sim
            .bulk_read(MemRegion::StatsRegisters, STATS_REGISTER_WORDS - 1, &mut past)
            .is_err());
    }
}
