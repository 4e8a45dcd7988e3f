// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Register-access seam.
//!
//! The scheduler never touches the hardware through raw offsets. Every access
//! goes through a named [`Field`] of the register-access layer, which owns the
//! register map and the bit layout of each field.

use crate::error::Result;

/// Named register field of the ISP.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    SoftReset,
    /// Bus transfer error disable
    XferErrorDisable,
    /// Line number of debug counter 1 or 2
    DebugLineNum(u8),
    InterruptEnable,
    InterruptStatus,
    Trigger,
    HeadColorHOffset,
    HeadColorVOffset,
    /// Input bit depth code of exposure 0 or 1
    InputBpp(u8),
    ImageWidth,
    ImageHeight,
    InputAddr(u8),
    InputLineStride(u8),
    OutputAddr(u8),
    OutputLineStride(u8),
    IrAddr,
    IrLineStride,
    /// Output color matrix coefficient
    ColorMatrix { row: u8, col: u8 },
    ColorOffset(u8),
    ColorSignConfig,
    PackType,
    PackOrder(u8),
    Ch0Obpp,
    Ch12Obpp,
    Ch12Subsample,
}

/// Memory-mapped regions the statistics are read from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MemRegion {
    /// Statistics alias registers
    StatsRegisters,
    /// Tightly coupled statistics memory
    StatsMemory,
}

/// Register-access layer used by the scheduler.
///
/// Implementations must be callable from the completion path, so they must
/// not block for an unbounded time.
pub trait RegisterAccess: Send + Sync {
    fn write_field(&self, field: Field, value: u32) -> Result<()>;

    fn read_field(&self, field: Field) -> Result<u32>;

    /// Copies `dest.len() / 4` words starting at word `offset` of `region`.
    fn bulk_read(&self, region: MemRegion, offset: usize, dest: &mut [u8]) -> Result<()>;

    /// Applies a complete processing parameter block verbatim.
    fn load_params(&self, block: &[u8]) -> Result<()>;
}
