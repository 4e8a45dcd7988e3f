// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Pixel format catalog and the per-format constant tables the scheduler
//! programs into the hardware.
//!
//! The catalog answers two kinds of questions. During admission it tells the
//! scheduler which optional nodes the negotiated formats need (see
//! [`Capabilities::requires`]), so the admission logic never branches on
//! individual formats. During job configuration it supplies the conversion
//! matrix, packetizer settings and bayer head color of the bound formats.

use crate::{
    error::{IspError, Result},
    node::{NodeRole, RoleMask, NODE_COUNT},
    stats::STATS_BUFFER_SIZE,
};
use core::fmt;

/// Size in bytes of one processing parameter block.
pub const PARAMS_BUFFER_SIZE: usize = 2048;

/// Default width of video nodes before a format is negotiated
pub const DEFAULT_WIDTH: u32 = 640;

/// Default height of video nodes before a format is negotiated
pub const DEFAULT_HEIGHT: u32 = 480;

/// Four character code identifying a pixel format.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl From<FourCC> for u32 {
    fn from(value: FourCC) -> Self {
        u32::from_le_bytes(value.0)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for c in self.0 {
            let c = if c.is_ascii_graphic() || c == b' ' {
                c as char
            } else {
                '.'
            };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FourCC({})", self)
    }
}

impl std::str::FromStr for FourCC {
    type Err = IspError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| IspError::UnknownFourCC(s.to_string()))?;
        Ok(FourCC(bytes))
    }
}

/// NV12 4:2:0 YUV semi-planar format
pub const NV12: FourCC = FourCC(*b"NV12");

/// YUYV 4:2:2 YUV packed format
pub const YUYV: FourCC = FourCC(*b"YUYV");

/// RGB 24-bit pixel format (8 bits per channel, no alpha)
pub const RGB3: FourCC = FourCC(*b"RGB3");

/// BGR 24-bit pixel format (8 bits per channel, no alpha)
pub const BGR3: FourCC = FourCC(*b"BGR3");

/// 8-bit greyscale, used for the IR channel
pub const GREY: FourCC = FourCC(*b"GREY");

/// 16-bit greyscale, used for the IR channel
pub const Y16: FourCC = FourCC(*b"Y16 ");

pub const SRGGB8: FourCC = FourCC(*b"RGGB");
pub const SGRBG8: FourCC = FourCC(*b"GRBG");
pub const SGBRG8: FourCC = FourCC(*b"GBRG");
pub const SBGGR8: FourCC = FourCC(*b"BA81");
pub const SRGGB10: FourCC = FourCC(*b"RG10");
pub const SGRBG10: FourCC = FourCC(*b"BA10");
pub const SGBRG10: FourCC = FourCC(*b"GB10");
pub const SBGGR10: FourCC = FourCC(*b"BG10");
pub const SRGGB12: FourCC = FourCC(*b"RG12");
pub const SGRBG12: FourCC = FourCC(*b"BA12");
pub const SGBRG12: FourCC = FourCC(*b"GB12");
pub const SBGGR12: FourCC = FourCC(*b"BG12");
pub const SRGGB14: FourCC = FourCC(*b"RG14");
pub const SGRBG14: FourCC = FourCC(*b"GR14");
pub const SGBRG14: FourCC = FourCC(*b"GB14");
pub const SBGGR14: FourCC = FourCC(*b"BG14");
pub const SRGGB16: FourCC = FourCC(*b"RG16");
pub const SGRBG16: FourCC = FourCC(*b"GR16");
pub const SGBRG16: FourCC = FourCC(*b"GB16");
pub const SBGGR16: FourCC = FourCC(*b"BYR2");

/// 10-bit RGB-IR 4x4 mosaic (vendor code)
pub const RGBIR10: FourCC = FourCC(*b"RI10");

/// 12-bit RGB-IR 4x4 mosaic (vendor code)
pub const RGBIR12: FourCC = FourCC(*b"RI12");

/// Position of the red sample in a 2x2 bayer tile.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BayerOrder {
    Rggb,
    Grbg,
    Gbrg,
    Bggr,
}

impl BayerOrder {
    /// Horizontal and vertical head color offsets.
    pub const fn head_offsets(self) -> (u32, u32) {
        match self {
            BayerOrder::Rggb => (0, 0),
            BayerOrder::Grbg => (1, 0),
            BayerOrder::Gbrg => (0, 1),
            BayerOrder::Bggr => (1, 1),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ColorFamily {
    Bayer(BayerOrder),
    Yuv,
    Rgb,
    Mono,
}

/// Which kind of node a catalog entry can be negotiated on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FormatUsage {
    RawInput,
    IrChannel,
    Output,
}

/// Catalog entry describing one supported pixel format.
#[derive(Debug, PartialEq, Eq)]
pub struct PixelFormat {
    pub fourcc: FourCC,
    /// Bits per pixel (per sample for bayer formats)
    pub bit_depth: u32,
    pub planes: usize,
    pub family: ColorFamily,
    pub usage: FormatUsage,
    /// Sensor delivers an interleaved infrared channel
    pub rgb_ir: bool,
}

const fn raw(fourcc: FourCC, bit_depth: u32, order: BayerOrder) -> PixelFormat {
    PixelFormat {
        fourcc,
        bit_depth,
        planes: 1,
        family: ColorFamily::Bayer(order),
        usage: FormatUsage::RawInput,
        rgb_ir: false,
    }
}

const fn rgb_ir(fourcc: FourCC, bit_depth: u32) -> PixelFormat {
    PixelFormat {
        rgb_ir: true,
        ..raw(fourcc, bit_depth, BayerOrder::Rggb)
    }
}

const fn output(fourcc: FourCC, bit_depth: u32, planes: usize, family: ColorFamily) -> PixelFormat {
    PixelFormat {
        fourcc,
        bit_depth,
        planes,
        family,
        usage: FormatUsage::Output,
        rgb_ir: false,
    }
}

const fn ir(fourcc: FourCC, bit_depth: u32) -> PixelFormat {
    PixelFormat {
        fourcc,
        bit_depth,
        planes: 1,
        family: ColorFamily::Mono,
        usage: FormatUsage::IrChannel,
        rgb_ir: false,
    }
}

static CATALOG: [PixelFormat; 28] = [
    output(NV12, 8, 2, ColorFamily::Yuv),
    output(YUYV, 16, 1, ColorFamily::Yuv),
    output(RGB3, 24, 1, ColorFamily::Rgb),
    output(BGR3, 24, 1, ColorFamily::Rgb),
    raw(SRGGB8, 8, BayerOrder::Rggb),
    raw(SGRBG8, 8, BayerOrder::Grbg),
    raw(SGBRG8, 8, BayerOrder::Gbrg),
    raw(SBGGR8, 8, BayerOrder::Bggr),
    raw(SRGGB10, 10, BayerOrder::Rggb),
    raw(SGRBG10, 10, BayerOrder::Grbg),
    raw(SGBRG10, 10, BayerOrder::Gbrg),
    raw(SBGGR10, 10, BayerOrder::Bggr),
    raw(SRGGB12, 12, BayerOrder::Rggb),
    raw(SGRBG12, 12, BayerOrder::Grbg),
    raw(SGBRG12, 12, BayerOrder::Gbrg),
    raw(SBGGR12, 12, BayerOrder::Bggr),
    raw(SRGGB14, 14, BayerOrder::Rggb),
    raw(SGRBG14, 14, BayerOrder::Grbg),
    raw(SGBRG14, 14, BayerOrder::Gbrg),
    raw(SBGGR14, 14, BayerOrder::Bggr),
    raw(SRGGB16, 16, BayerOrder::Rggb),
    raw(SGRBG16, 16, BayerOrder::Grbg),
    raw(SGBRG16, 16, BayerOrder::Gbrg),
    raw(SBGGR16, 16, BayerOrder::Bggr),
    rgb_ir(RGBIR10, 10),
    rgb_ir(RGBIR12, 12),
    ir(GREY, 8),
    ir(Y16, 16),
];

/// Looks up a pixel format in the catalog.
pub fn find(fourcc: FourCC) -> Option<&'static PixelFormat> {
    CATALOG.iter().find(|f| f.fourcc == fourcc)
}

/// Catalog entries usable for the given kind of node.
pub fn formats(usage: FormatUsage) -> impl Iterator<Item = &'static PixelFormat> {
    CATALOG.iter().filter(move |f| f.usage == usage)
}

impl PixelFormat {
    pub const fn bytes_per_pixel(&self) -> u32 {
        self.bit_depth.div_ceil(8)
    }

    /// Input bit depth code of the pipe configuration (8, 10, 12, 14, 16 bits).
    pub const fn ibpp_code(&self) -> u32 {
        self.bit_depth.saturating_sub(8) / 2
    }

    pub const fn is_yuv(&self) -> bool {
        matches!(self.family, ColorFamily::Yuv)
    }

    pub const fn bayer_order(&self) -> Option<BayerOrder> {
        match self.family {
            ColorFamily::Bayer(order) => Some(order),
            _ => None,
        }
    }

    pub const fn bytes_per_line(&self, width: u32) -> u32 {
        self.bytes_per_pixel() * width
    }

    /// Size in bytes of one plane of a `width` x `height` image.
    pub const fn plane_size(&self, plane: usize, width: u32, height: u32) -> usize {
        let line = self.bytes_per_line(width) as usize;
        match (self.fourcc, plane) {
            (NV12, 1) => line * (height as usize).div_ceil(2),
            _ => line * height as usize,
        }
    }
}

/// Negotiated image format of a video node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VideoFormat {
    pub format: &'static PixelFormat,
    pub width: u32,
    pub height: u32,
}

impl VideoFormat {
    /// Builds a video format from a catalog fourcc.
    pub fn new(fourcc: FourCC, width: u32, height: u32) -> Option<Self> {
        find(fourcc).map(|format| Self {
            format,
            width,
            height,
        })
    }

    pub fn fourcc(&self) -> FourCC {
        self.format.fourcc
    }

    pub fn plane_size(&self, plane: usize) -> usize {
        self.format.plane_size(plane, self.width, self.height)
    }
}

/// Negotiated format of any node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeFormat {
    Video(VideoFormat),
    Meta { buffer_size: usize },
}

impl NodeFormat {
    /// Format a node starts with before any negotiation.
    pub fn default_for(role: NodeRole) -> Self {
        let video = |fourcc| {
            // Catalog constants below are always present.
            NodeFormat::Video(VideoFormat {
                format: find(fourcc).unwrap_or(&CATALOG[0]),
                width: DEFAULT_WIDTH,
                height: DEFAULT_HEIGHT,
            })
        };
        match role {
            NodeRole::Input0 | NodeRole::Input1 => video(SRGGB12),
            NodeRole::Ir => video(GREY),
            NodeRole::Frame => video(NV12),
            NodeRole::Params => NodeFormat::Meta {
                buffer_size: PARAMS_BUFFER_SIZE,
            },
            NodeRole::Stats => NodeFormat::Meta {
                buffer_size: STATS_BUFFER_SIZE,
            },
        }
    }

    pub fn video(&self) -> Option<&VideoFormat> {
        match self {
            NodeFormat::Video(v) => Some(v),
            NodeFormat::Meta { .. } => None,
        }
    }

    /// Sizes each plane of a buffer queued on this node must at least have.
    pub fn plane_sizes(&self) -> impl Iterator<Item = usize> + '_ {
        let planes = match self {
            NodeFormat::Video(v) => v.format.planes,
            NodeFormat::Meta { .. } => 1,
        };
        (0..planes).map(move |plane| match self {
            NodeFormat::Video(v) => v.plane_size(plane),
            NodeFormat::Meta { buffer_size } => *buffer_size,
        })
    }

    /// Checks that this format can be negotiated on a node of `role`.
    ///
    /// # Errors
    ///
    /// Returns [`IspError::InvalidFormat`] when the format kind does not
    /// match the node, the pixel format is meant for another kind of node,
    /// or a metadata buffer would be too small for its block.
    pub fn validate(&self, role: NodeRole) -> Result<()> {
        let ok = match (self, role) {
            (NodeFormat::Meta { buffer_size }, NodeRole::Params) => {
                *buffer_size >= PARAMS_BUFFER_SIZE
            }
            (NodeFormat::Meta { buffer_size }, NodeRole::Stats) => {
                *buffer_size >= STATS_BUFFER_SIZE
            }
            (NodeFormat::Video(v), NodeRole::Input0 | NodeRole::Input1) => {
                v.format.usage == FormatUsage::RawInput && v.width > 0 && v.height > 0
            }
            (NodeFormat::Video(v), NodeRole::Ir) => {
                v.format.usage == FormatUsage::IrChannel && v.width > 0 && v.height > 0
            }
            (NodeFormat::Video(v), NodeRole::Frame) => {
                v.format.usage == FormatUsage::Output && v.width > 0 && v.height > 0
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(IspError::InvalidFormat {
                format: self.to_string(),
                role,
            })
        }
    }
}

impl fmt::Display for NodeFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NodeFormat::Video(v) => write!(f, "{}x{} {}", v.width, v.height, v.format.fourcc),
            NodeFormat::Meta { buffer_size } => write!(f, "meta {} bytes", buffer_size),
        }
    }
}

/// Exposure layout of the sensor feeding a group.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CaptureMode {
    /// Single exposure on the primary input
    #[default]
    Linear,
    /// Two staggered exposures; the second arrives on the secondary input
    StaggeredHdr,
}

/// How a node participates in admission under the current formats.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Requirement {
    /// Must be streaming and have a buffer ready
    Required,
    /// Contributes a buffer only while it is streaming
    IfStreaming,
    /// Never part of a job; its queue is left untouched
    Skipped,
}

/// Node requirements derived from the negotiated formats of a group.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub staggered_hdr: bool,
    pub rgb_ir: bool,
    pub params: bool,
}

impl Capabilities {
    pub const fn requires(&self, role: NodeRole) -> Requirement {
        match role {
            NodeRole::Input0 | NodeRole::Frame => Requirement::Required,
            NodeRole::Params if self.params => Requirement::Required,
            NodeRole::Input1 if self.staggered_hdr => Requirement::Required,
            NodeRole::Ir if self.rgb_ir => Requirement::Required,
            NodeRole::Stats => Requirement::IfStreaming,
            _ => Requirement::Skipped,
        }
    }

    /// Roles that must stream before the group can be admitted.
    pub fn required(&self) -> RoleMask {
        NodeRole::ALL
            .into_iter()
            .filter(|r| self.requires(*r) == Requirement::Required)
            .collect()
    }

    /// Roles that bind a buffer into a job given the streaming map.
    pub fn contributing(&self, streaming: RoleMask) -> RoleMask {
        NodeRole::ALL
            .into_iter()
            .filter(|r| match self.requires(*r) {
                Requirement::Required => true,
                Requirement::IfStreaming => streaming.contains(*r),
                Requirement::Skipped => false,
            })
            .collect()
    }
}

/// Negotiated formats of every node of a group.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GroupFormats {
    pub nodes: [NodeFormat; NODE_COUNT],
    pub mode: CaptureMode,
}

impl Default for GroupFormats {
    fn default() -> Self {
        Self {
            nodes: NodeRole::ALL.map(NodeFormat::default_for),
            mode: CaptureMode::default(),
        }
    }
}

impl GroupFormats {
    pub fn node(&self, role: NodeRole) -> &NodeFormat {
        &self.nodes[role.index()]
    }

    pub fn video(&self, role: NodeRole) -> Option<&VideoFormat> {
        self.node(role).video()
    }

    pub fn capabilities(&self, params: bool) -> Capabilities {
        Capabilities {
            staggered_hdr: self.mode == CaptureMode::StaggeredHdr,
            rgb_ir: self.video(NodeRole::Input0).is_some_and(|v| v.format.rgb_ir),
            params,
        }
    }
}

/// Color conversion applied by the gamut/color matrix block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ColorMatrix {
    /// ITU-R BT.601 RGB to YCbCr
    Bt601,
    /// Pass-through for RGB outputs
    Identity,
}

impl ColorMatrix {
    pub fn for_output(format: &PixelFormat) -> Self {
        if format.is_yuv() {
            ColorMatrix::Bt601
        } else {
            ColorMatrix::Identity
        }
    }

    pub const fn coefficients(self) -> [[i16; 3]; 3] {
        match self {
            ColorMatrix::Bt601 => [[65, 129, 25], [-38, -74, 112], [112, -94, -18]],
            ColorMatrix::Identity => [[256, 0, 0], [0, 256, 0], [0, 0, 256]],
        }
    }

    pub const fn offsets(self) -> [u32; 3] {
        match self {
            ColorMatrix::Bt601 => [256, 2048, 2048],
            ColorMatrix::Identity => [0, 0, 0],
        }
    }

    /// Sign configuration of the matrix block (1 = signed coefficients).
    pub const fn sign_config(self) -> u32 {
        match self {
            ColorMatrix::Bt601 => 1,
            ColorMatrix::Identity => 0,
        }
    }
}

/// Output packetizer settings for one output fourcc.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Packetizer {
    pub pack_type: u32,
    pub ch0_obpp: u32,
    pub ch12_obpp: u32,
    pub ch12_subsample: u32,
    pub order: [u32; 3],
}

impl Packetizer {
    pub const fn for_output(fourcc: FourCC) -> Self {
        const DEFAULT: Packetizer = Packetizer {
            pack_type: 1,
            ch0_obpp: 8,
            ch12_obpp: 8,
            ch12_subsample: 0,
            order: [0, 1, 2],
        };
        match fourcc {
            NV12 => Packetizer {
                pack_type: 0,
                ch12_obpp: 6,
                ch12_subsample: 2,
                order: [0, 0, 1],
                ..DEFAULT
            },
            YUYV => Packetizer {
                ch12_subsample: 1,
                order: [0, 1, 3],
                ..DEFAULT
            },
            _ => DEFAULT,
        }
    }
}
