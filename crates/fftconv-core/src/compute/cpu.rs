//! CPU backend using rustfft for transforms and Rayon for row/column
//! parallelism on large frames.

use std::sync::Arc;

use num_complex::Complex;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};

use crate::buffer::DeviceBuffer;
use crate::consts::{COMPLEX_WIDTH, PARALLEL_PIXEL_THRESHOLD};
use crate::error::{Result, StageError};
use crate::shape::Shape;

use super::{
    check_page_copy, complex_extent, ComputeBackend, FftDirection, FftPlan, Kernel, KernelInner,
    PlanInner,
};

/// Built-in device operations the CPU backend resolves named kernels to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CpuOp {
    Spread,
    Pack,
    Mult,
    FillZero,
}

pub(crate) struct CpuPlan {
    row_forward: Arc<dyn Fft<f32>>,
    row_inverse: Arc<dyn Fft<f32>>,
    col_forward: Arc<dyn Fft<f32>>,
    col_inverse: Arc<dyn Fft<f32>>,
}

pub struct CpuBackend;

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "CPU/rustfft"
    }

    fn is_gpu(&self) -> bool {
        false
    }

    fn load_kernel(&self, unit: &str, entry: &str) -> Result<Kernel> {
        let op = match (unit, entry) {
            ("fft.wgsl", "fft_spread") => CpuOp::Spread,
            ("fft.wgsl", "fft_pack") => CpuOp::Pack,
            ("mult.wgsl", "mult") => CpuOp::Mult,
            ("fillzero.wgsl", "fillzero") => CpuOp::FillZero,
            _ => {
                return Err(StageError::ResourceAcquisition {
                    unit: unit.into(),
                    entry: entry.into(),
                    reason: "no such built-in operation".into(),
                })
            }
        };
        Ok(Kernel {
            inner: KernelInner::Cpu(op),
        })
    }

    fn alloc(&self, shape: &Shape) -> Result<DeviceBuffer> {
        Ok(DeviceBuffer::cpu_zeroed(shape.clone()))
    }

    fn upload(&self, data: &[f32], shape: Shape) -> Result<DeviceBuffer> {
        if data.len() != shape.len() {
            return Err(StageError::InvalidInput(format!(
                "upload of {} samples into extent {shape}",
                data.len()
            )));
        }
        Ok(DeviceBuffer::from_vec(data.to_vec(), shape))
    }

    fn download(&self, buf: &DeviceBuffer) -> Result<Vec<f32>> {
        Ok(buf.cpu()?.to_vec())
    }

    fn fill_zero(&self, kernel: &Kernel, buf: &mut DeviceBuffer) -> Result<()> {
        expect_op(kernel, CpuOp::FillZero)?;
        buf.cpu_mut()?.fill(0.0);
        Ok(())
    }

    fn spread(&self, kernel: &Kernel, src: &DeviceBuffer, dst: &mut DeviceBuffer) -> Result<()> {
        expect_op(kernel, CpuOp::Spread)?;
        let (src_w, src_h) = (src.shape().width(), src.shape().height());
        let (pw, ph) = complex_extent(dst.shape())?;
        if src_w > pw || src_h > ph {
            return Err(StageError::Dispatch(format!(
                "spread source {}x{src_h} exceeds padded extent {pw}x{ph}",
                src_w
            )));
        }
        let input = src.cpu()?;
        let output = dst.cpu_mut()?;
        for row in 0..ph {
            for col in 0..pw {
                let base = (row * pw + col) * COMPLEX_WIDTH;
                output[base] = if row < src_h && col < src_w {
                    input[row * src_w + col]
                } else {
                    0.0
                };
                output[base + 1] = 0.0;
            }
        }
        Ok(())
    }

    fn pack(
        &self,
        kernel: &Kernel,
        src: &DeviceBuffer,
        dst: &mut DeviceBuffer,
        scale: f32,
    ) -> Result<()> {
        expect_op(kernel, CpuOp::Pack)?;
        let (pw, ph) = complex_extent(src.shape())?;
        let (dst_w, dst_h) = (dst.shape().width(), dst.shape().height());
        if dst_w > pw || dst_h > ph {
            return Err(StageError::Dispatch(format!(
                "pack destination {dst_w}x{dst_h} exceeds padded extent {pw}x{ph}"
            )));
        }
        let input = src.cpu()?;
        let output = dst.cpu_mut()?;
        for row in 0..dst_h {
            for col in 0..dst_w {
                output[row * dst_w + col] = input[(row * pw + col) * COMPLEX_WIDTH] * scale;
            }
        }
        Ok(())
    }

    fn complex_mul(&self, kernel: &Kernel, a: &DeviceBuffer, b: &mut DeviceBuffer) -> Result<()> {
        expect_op(kernel, CpuOp::Mult)?;
        if a.shape() != b.shape() {
            return Err(StageError::Dispatch(format!(
                "complex_mul extents differ: {} vs {}",
                a.shape(),
                b.shape()
            )));
        }
        let (pw, ph) = complex_extent(a.shape())?;
        let lhs = a.cpu()?;
        let rhs = b.cpu_mut()?;
        for i in 0..pw * ph {
            let (ar, ai) = (lhs[2 * i], lhs[2 * i + 1]);
            let (br, bi) = (rhs[2 * i], rhs[2 * i + 1]);
            rhs[2 * i] = ar * br - ai * bi;
            rhs[2 * i + 1] = ar * bi + ai * br;
        }
        Ok(())
    }

    fn copy_page(&self, src: &DeviceBuffer, page: usize, dst: &mut DeviceBuffer) -> Result<()> {
        let stride = check_page_copy(src.shape(), dst.shape(), page, src.shape().batch())?;
        let input = src.cpu()?;
        let output = dst.cpu_mut()?;
        output.copy_from_slice(&input[page * stride..(page + 1) * stride]);
        Ok(())
    }

    fn paste_page(&self, src: &DeviceBuffer, dst: &mut DeviceBuffer, page: usize) -> Result<()> {
        let stride = check_page_copy(dst.shape(), src.shape(), page, dst.shape().batch())?;
        let input = src.cpu()?;
        let output = dst.cpu_mut()?;
        output[page * stride..(page + 1) * stride].copy_from_slice(input);
        Ok(())
    }

    fn plan_fft(&self, width: usize, height: usize) -> Result<FftPlan> {
        if width == 0 || height == 0 {
            return Err(StageError::UnsupportedExtent {
                width,
                height,
                reason: "transform extent must be non-zero".into(),
            });
        }
        let mut planner = FftPlanner::new();
        let plan = CpuPlan {
            row_forward: planner.plan_fft_forward(width),
            row_inverse: planner.plan_fft_inverse(width),
            col_forward: planner.plan_fft_forward(height),
            col_inverse: planner.plan_fft_inverse(height),
        };
        Ok(FftPlan::new(PlanInner::Cpu(plan), width, height))
    }

    fn fft(&self, plan: &FftPlan, buf: &mut DeviceBuffer, direction: FftDirection) -> Result<()> {
        let cpu_plan = match &plan.inner {
            PlanInner::Cpu(p) => p,
            #[cfg(feature = "gpu")]
            _ => {
                return Err(StageError::Dispatch(
                    "plan does not belong to the CPU backend".into(),
                ))
            }
        };
        if *buf.shape() != plan.spectral_shape() {
            return Err(StageError::Dispatch(format!(
                "transform buffer extent {} does not match plan extent {}",
                buf.shape(),
                plan.spectral_shape()
            )));
        }
        let (w, h) = (plan.width(), plan.height());
        let (row_fft, col_fft) = match direction {
            FftDirection::Forward => (&cpu_plan.row_forward, &cpu_plan.col_forward),
            FftDirection::Inverse => (&cpu_plan.row_inverse, &cpu_plan.col_inverse),
        };
        let data = buf.cpu_mut()?;
        if w * h >= PARALLEL_PIXEL_THRESHOLD {
            fft_rows_parallel(data, w, row_fft);
            fft_cols_parallel(data, w, h, col_fft);
        } else {
            fft_rows_sequential(data, w, row_fft);
            fft_cols_sequential(data, w, h, col_fft);
        }
        Ok(())
    }
}

fn expect_op(kernel: &Kernel, op: CpuOp) -> Result<()> {
    match &kernel.inner {
        KernelInner::Cpu(k) if *k == op => Ok(()),
        KernelInner::Cpu(k) => Err(StageError::Dispatch(format!(
            "kernel {k:?} bound to a {op:?} dispatch"
        ))),
        #[cfg(feature = "gpu")]
        _ => Err(StageError::Dispatch(
            "kernel does not belong to the CPU backend".into(),
        )),
    }
}

// ---------------------------------------------------------------------------
// In-place interleaved-complex FFT passes
// ---------------------------------------------------------------------------

fn fft_row_in_place(row: &mut [f32], fft: &Arc<dyn Fft<f32>>) {
    let mut samples: Vec<Complex<f32>> = row
        .chunks_exact(COMPLEX_WIDTH)
        .map(|p| Complex::new(p[0], p[1]))
        .collect();
    fft.process(&mut samples);
    for (slot, v) in row.chunks_exact_mut(COMPLEX_WIDTH).zip(samples) {
        slot[0] = v.re;
        slot[1] = v.im;
    }
}

fn fft_rows_sequential(data: &mut [f32], w: usize, fft: &Arc<dyn Fft<f32>>) {
    for row in data.chunks_mut(COMPLEX_WIDTH * w) {
        fft_row_in_place(row, fft);
    }
}

fn fft_rows_parallel(data: &mut [f32], w: usize, fft: &Arc<dyn Fft<f32>>) {
    data.par_chunks_mut(COMPLEX_WIDTH * w)
        .for_each(|row| fft_row_in_place(row, fft));
}

fn gather_col(data: &[f32], w: usize, h: usize, col: usize) -> Vec<Complex<f32>> {
    (0..h)
        .map(|row| {
            let i = (row * w + col) * COMPLEX_WIDTH;
            Complex::new(data[i], data[i + 1])
        })
        .collect()
}

fn scatter_col(data: &mut [f32], w: usize, col: usize, samples: &[Complex<f32>]) {
    for (row, v) in samples.iter().enumerate() {
        let i = (row * w + col) * COMPLEX_WIDTH;
        data[i] = v.re;
        data[i + 1] = v.im;
    }
}

fn fft_cols_sequential(data: &mut [f32], w: usize, h: usize, fft: &Arc<dyn Fft<f32>>) {
    for col in 0..w {
        let mut samples = gather_col(data, w, h, col);
        fft.process(&mut samples);
        scatter_col(data, w, col, &samples);
    }
}

fn fft_cols_parallel(data: &mut [f32], w: usize, h: usize, fft: &Arc<dyn Fft<f32>>) {
    let snapshot: &[f32] = data;
    let processed: Vec<Vec<Complex<f32>>> = (0..w)
        .into_par_iter()
        .map(|col| {
            let mut samples = gather_col(snapshot, w, h, col);
            fft.process(&mut samples);
            samples
        })
        .collect();
    for (col, samples) in processed.into_iter().enumerate() {
        scatter_col(data, w, col, &samples);
    }
}
