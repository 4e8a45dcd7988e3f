// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    buffer::Buffer,
    error::{IspError, Result},
    node::NodeRole,
    regs::{MemRegion, RegisterAccess},
};

/// One contiguous block of statistics copied into the statistics buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StatsBlock {
    pub name: &'static str,
    pub region: MemRegion,
    /// Word offset inside the region
    pub offset: usize,
    pub words: usize,
}

const fn block(name: &'static str, region: MemRegion, offset: usize, words: usize) -> StatsBlock {
    StatsBlock {
        name,
        region,
        offset,
        words,
    }
}

/// Statistics blocks in the order they are laid out in the buffer.
pub const STATS_LAYOUT: [StatsBlock; 7] = [
    block("registers", MemRegion::StatsRegisters, 0, 128),
    block("ctemp", MemRegion::StatsMemory, 0x000, 0x400),
    block("rgbir_hist", MemRegion::StatsMemory, 0x400, 0x200),
    block("hist", MemRegion::StatsMemory, 0x600, 0x400),
    block("drc_local_sum", MemRegion::StatsMemory, 0xa00, 0x400),
    block("drc_global_hist_roi0", MemRegion::StatsMemory, 0xe00, 0x100),
    block("drc_global_hist_roi1", MemRegion::StatsMemory, 0xf00, 0x100),
];

/// Words of the statistics alias register block
pub const STATS_REGISTER_WORDS: usize = 128;

/// Words of the statistics memory
pub const STATS_MEMORY_WORDS: usize = 0x1000;

const fn layout_words() -> usize {
    let mut words = 0;
    let mut i = 0;
    while i < STATS_LAYOUT.len() {
        words += STATS_LAYOUT[i].words;
        i += 1;
    }
    words
}

/// Size in bytes of one statistics buffer.
pub const STATS_BUFFER_SIZE: usize = layout_words() * 4;

/// Byte range of a named block inside the statistics buffer.
pub fn block_range(name: &str) -> Option<std::ops::Range<usize>> {
    let mut start = 0;
    for b in STATS_LAYOUT.iter() {
        let end = start + b.words * 4;
        if b.name == name {
            return Some(start..end);
        }
        start = end;
    }
    None
}

/// Copies every statistics block from the hardware into `buf`.
///
/// # Errors
///
/// Returns [`IspError::BufferTooSmall`] if the payload cannot hold the whole
/// layout, or the register layer's error if a bulk read fails. Blocks copied
/// before a failing read are left in place.
pub fn copy_into(regs: &dyn RegisterAccess, buf: &mut Buffer) -> Result<()> {
    let index = buf.index();
    let dest = buf.payload_mut();
    if dest.len() < STATS_BUFFER_SIZE {
        return Err(IspError::BufferTooSmall {
            role: NodeRole::Stats,
            index,
            plane: 0,
            len: dest.len(),
            required: STATS_BUFFER_SIZE,
        });
    }

    let mut start = 0;
    for b in STATS_LAYOUT.iter() {
        let end = start + b.words * 4;
        regs.bulk_read(b.region, b.offset, &mut dest[start..end])?;
        start = end;
    }
    Ok(())
}
