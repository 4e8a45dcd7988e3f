// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    completion::irq,
    error::{IspError, Result},
    format::{ColorMatrix, Packetizer, VideoFormat, NV12},
    node::NodeRole,
    regs::{Field, RegisterAccess},
    scheduler::Job,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

const SOFT_RESET: u32 = 1 << 0;
const HARD_RESET: u32 = 1 << 1;
const RESET_POLLS: u32 = 100;
const XFER_ERR_DISABLE: u32 = 1 << 0;
const DEBUG_LINE_DISABLE: u32 = 0xffff;

/// Hardware side of a job: programs the bound buffers and formats into the
/// register file and starts the engine.
///
/// Configuration is best-effort. A failed field write is logged and counted
/// but never aborts the job, so the hardware is still triggered with whatever
/// configuration did land.
pub struct Pipeline {
    regs: Arc<dyn RegisterAccess>,
}

impl Pipeline {
    pub fn new(regs: Arc<dyn RegisterAccess>) -> Self {
        Self { regs }
    }

    pub fn regs(&self) -> &dyn RegisterAccess {
        self.regs.as_ref()
    }

    /// Resets the engine and enables every interrupt source the completion
    /// path handles.
    ///
    /// # Errors
    ///
    /// Returns [`IspError::ResetTimeout`] if a reset bit never auto-clears, or
    /// the register layer's error for a failed write.
    pub fn init(&self) -> Result<()> {
        self.reset(false)?;
        self.reset(true)?;
        self.regs.write_field(Field::XferErrorDisable, XFER_ERR_DISABLE)?;
        self.regs.write_field(Field::DebugLineNum(1), DEBUG_LINE_DISABLE)?;
        self.regs.write_field(Field::DebugLineNum(2), DEBUG_LINE_DISABLE)?;
        self.regs.write_field(Field::InterruptEnable, irq::ENABLE_ALL)?;
        debug!("hardware initialised");
        Ok(())
    }

    /// Issues a soft or hard reset and waits for the bit to auto-clear.
    pub fn reset(&self, hard: bool) -> Result<()> {
        let bit = if hard { HARD_RESET } else { SOFT_RESET };
        self.regs.write_field(Field::SoftReset, bit)?;
        for _ in 0..RESET_POLLS {
            if self.regs.read_field(Field::SoftReset)? & bit == 0 {
                return Ok(());
            }
        }
        Err(IspError::ResetTimeout)
    }

    /// Programs everything the job needs. Returns the number of failed writes.
    ///
    /// The parameter block goes first so the per-frame color, packetizer and
    /// address settings always override whatever the block contained.
    pub fn configure(&self, job: &Job) -> usize {
        let mut failed = 0;

        if let Some(params) = job.buffer(NodeRole::Params) {
            if let Err(e) = self.regs.load_params(params.payload()) {
                warn!("group {}: parameter block {} not applied: {}", job.group(), params.index(), e);
                failed += 1;
            }
        }

        match job.formats().video(NodeRole::Frame) {
            Some(out) => {
                self.set_color_matrix(ColorMatrix::for_output(out.format), &mut failed);
                self.set_packetizer(Packetizer::for_output(out.fourcc()), &mut failed);
                self.set_pipe_conf(job, out, &mut failed);
            }
            None => {
                warn!("group {}: frame node has no video format", job.group());
                failed += 1;
            }
        }

        if failed > 0 {
            warn!("group {}: {} configuration writes failed, triggering anyway", job.group(), failed);
        }
        failed
    }

    /// Kicks off the engine on the configured job.
    pub fn trigger(&self) {
        if let Err(e) = self.regs.write_field(Field::Trigger, 1) {
            error!("hardware trigger failed: {}", e);
        }
    }

    fn write(&self, field: Field, value: u32, failed: &mut usize) {
        if let Err(e) = self.regs.write_field(field, value) {
            warn!("{:?} <- {:#x}: {}", field, value, e);
            *failed += 1;
        }
    }

    fn set_color_matrix(&self, matrix: ColorMatrix, failed: &mut usize) {
        for (row, coefs) in matrix.coefficients().iter().enumerate() {
            for (col, coef) in coefs.iter().enumerate() {
                let field = Field::ColorMatrix {
                    row: row as u8,
                    col: col as u8,
                };
                // Two's complement 16-bit coefficient
                self.write(field, *coef as u16 as u32, failed);
            }
        }
        for (ch, offset) in matrix.offsets().iter().enumerate() {
            self.write(Field::ColorOffset(ch as u8), *offset, failed);
        }
        self.write(Field::ColorSignConfig, matrix.sign_config(), failed);
    }

    fn set_packetizer(&self, pck: Packetizer, failed: &mut usize) {
        self.write(Field::Ch0Obpp, pck.ch0_obpp, failed);
        self.write(Field::Ch12Obpp, pck.ch12_obpp, failed);
        self.write(Field::Ch12Subsample, pck.ch12_subsample, failed);
        self.write(Field::PackType, pck.pack_type, failed);
        for (i, order) in pck.order.iter().enumerate() {
            self.write(Field::PackOrder(i as u8), *order, failed);
        }
    }

    fn set_pipe_conf(&self, job: &Job, out: &VideoFormat, failed: &mut usize) {
        let formats = job.formats();

        if let Some(input) = formats.video(NodeRole::Input0) {
            let (h, v) = input.format.bayer_order().map_or((0, 0), |o| o.head_offsets());
            self.write(Field::HeadColorHOffset, h, failed);
            self.write(Field::HeadColorVOffset, v, failed);
            self.write(Field::InputBpp(0), input.format.ibpp_code(), failed);
            self.write(
                Field::InputLineStride(0),
                input.format.bytes_per_line(input.width),
                failed,
            );
        }
        self.write(Field::ImageWidth, out.width, failed);
        self.write(Field::ImageHeight, out.height, failed);
        self.write(Field::InputAddr(0), dma_addr(job, NodeRole::Input0, 0, failed), failed);

        match (job.buffer(NodeRole::Input1), formats.video(NodeRole::Input1)) {
            (Some(_), Some(input1)) => {
                self.write(Field::InputBpp(1), input1.format.ibpp_code(), failed);
                self.write(Field::InputAddr(1), dma_addr(job, NodeRole::Input1, 0, failed), failed);
                self.write(
                    Field::InputLineStride(1),
                    input1.format.bytes_per_line(input1.width),
                    failed,
                );
            }
            _ => {
                self.write(Field::InputAddr(1), 0, failed);
                self.write(Field::InputLineStride(1), 0, failed);
            }
        }

        if out.fourcc() == NV12 {
            self.write(Field::OutputAddr(0), dma_addr(job, NodeRole::Frame, 0, failed), failed);
            self.write(Field::OutputLineStride(0), out.width, failed);
            self.write(Field::OutputAddr(1), dma_addr(job, NodeRole::Frame, 1, failed), failed);
            self.write(Field::OutputLineStride(1), out.width / 2, failed);
        } else {
            self.write(Field::OutputAddr(0), 0, failed);
            self.write(Field::OutputLineStride(0), 0, failed);
            self.write(Field::OutputAddr(1), dma_addr(job, NodeRole::Frame, 0, failed), failed);
            self.write(
                Field::OutputLineStride(1),
                out.format.bytes_per_line(out.width),
                failed,
            );
        }

        match (job.buffer(NodeRole::Ir), formats.video(NodeRole::Ir)) {
            (Some(_), Some(ir)) => {
                self.write(Field::IrAddr, dma_addr(job, NodeRole::Ir, 0, failed), failed);
                self.write(Field::IrLineStride, ir.format.bytes_per_line(ir.width), failed);
            }
            _ => {
                self.write(Field::IrAddr, 0, failed);
                self.write(Field::IrLineStride, 0, failed);
            }
        }
    }
}

/// 32-bit DMA address of a bound plane, 0 when unbound. The engine cannot
/// reach addresses above 4 GiB; those count as a failed write and program 0.
fn dma_addr(job: &Job, role: NodeRole, plane: usize, failed: &mut usize) -> u32 {
    let Some(addr) = job.buffer(role).map(|b| b.dma_addr(plane)) else {
        return 0;
    };
    match u32::try_from(addr) {
        Ok(addr) => addr,
        Err(_) => {
            warn!("{} plane {}: address {:#x} beyond the 32-bit DMA range", role, plane, addr);
            *failed += 1;
            0
        }
    }
}
