// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    node::NodeRole,
    regs::{Field, MemRegion},
};
use thiserror::Error;

/// Errors reported by the ISP scheduler and its register-access layer.
///
/// Hardware-facing failures that happen while a job is being configured are
/// logged and contained by the scheduler; they only reach callers through the
/// register-access layer itself or through per-buffer error state.
#[derive(Error, Debug)]
pub enum IspError {
    #[error("register write to {field:?} failed")]
    RegisterWrite { field: Field },

    #[error("register read from {field:?} failed")]
    RegisterRead { field: Field },

    #[error("bulk read of {words} words at {region:?}+{offset:#x} failed")]
    BulkRead {
        region: MemRegion,
        offset: usize,
        words: usize,
    },

    #[error("parameter block load failed: {0}")]
    ParamsLoad(String),

    #[error("node group {0} does not exist")]
    InvalidGroup(usize),

    #[error("{0} node is streaming")]
    Busy(NodeRole),

    #[error("{0:?} is not a four character code")]
    UnknownFourCC(String),

    #[error("format {format} is not supported by the {role} node")]
    InvalidFormat { format: String, role: NodeRole },

    #[error("buffer {index} plane {plane} too small for {role} node ({len} < {required})")]
    BufferTooSmall {
        role: NodeRole,
        index: u32,
        plane: usize,
        len: usize,
        required: usize,
    },

    #[error("buffer {index} has {planes} planes but the {role} node expects {expected}")]
    PlaneCount {
        role: NodeRole,
        index: u32,
        planes: usize,
        expected: usize,
    },

    #[error("buffer index {index} exceeds the {limit} buffer {role} pool")]
    BufferIndex {
        role: NodeRole,
        index: u32,
        limit: u32,
    },

    #[error("hardware reset did not complete")]
    ResetTimeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid parameter file: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = IspError> = std::result::Result<T, E>;
