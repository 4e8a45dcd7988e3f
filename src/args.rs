// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_isp::{format::FourCC, SchedulerConfig};
use std::path::PathBuf;

/// Command-line arguments for the EdgeFirst ISP scheduler simulator.
///
/// The simulator runs the scheduler against an in-memory register file and
/// an emulated engine thread, feeding every node group with recycled buffers
/// until each group has produced the requested number of frames. Arguments
/// can be specified via command line or environment variables.
///
/// # Example
///
/// ```bash
/// # Via command line
/// edgefirst-isp --groups 4 --frames 500 --stats
///
/// # Via environment variables
/// export ISP_GROUPS=4
/// export ISP_FRAMES=500
/// edgefirst-isp
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Number of node groups sharing the engine
    #[arg(short, long, env = "ISP_GROUPS", default_value = "2")]
    pub groups: usize,

    /// Frames each group produces before the simulator stops
    #[arg(short, long, env = "ISP_FRAMES", default_value = "100")]
    pub frames: u32,

    /// Buffers allocated per node
    #[arg(short, long, env = "ISP_BUFFERS", default_value = "4")]
    pub buffers: u32,

    /// Frame resolution in pixels (width height)
    #[arg(
        long,
        env = "ISP_SIZE",
        default_value = "640 480",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub size: Vec<u32>,

    /// Raw input pixel format (fourcc)
    #[arg(long, env = "ISP_INPUT_FORMAT", default_value = "RG12")]
    pub input_format: FourCC,

    /// Output frame pixel format (fourcc)
    #[arg(long, env = "ISP_OUTPUT_FORMAT", default_value = "NV12")]
    pub output_format: FourCC,

    /// Staggered HDR capture; the secondary input becomes required
    #[arg(long, env = "ISP_HDR")]
    pub hdr: bool,

    /// Stream the statistics node
    #[arg(long, env = "ISP_STATS")]
    pub stats: bool,

    /// Run without parameter buffers
    #[arg(long, env = "ISP_DISABLE_PARAMS")]
    pub disable_params: bool,

    /// Skip the statistics copy on statistics-ready interrupts
    #[arg(long, env = "ISP_DISABLE_STATS")]
    pub disable_stats: bool,

    /// JSON array of bytes used as the parameter block for every frame
    #[arg(long, env = "ISP_PARAMS")]
    pub params: Option<PathBuf>,

    /// Emulated hardware processing time per frame in microseconds
    #[arg(long, env = "ISP_FRAME_TIME", default_value = "2000")]
    pub frame_time: u64,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Send logs to the systemd journal
    #[arg(long, env = "JOURNALD")]
    pub journald: bool,

    /// Enable Tokio async runtime console for debugging
    #[arg(long, env = "TOKIO_CONSOLE")]
    pub tokio_console: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}

impl From<&Args> for SchedulerConfig {
    fn from(args: &Args) -> Self {
        SchedulerConfig {
            groups: args.groups,
            disable_params: args.disable_params,
            disable_stats: args.disable_stats,
        }
    }
}
