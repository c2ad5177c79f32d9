//! Compute backend seam: the stage talks to the device exclusively through
//! [`ComputeBackend`], which owns kernel resolution, buffer management, the
//! device-side helper operators and the FFT primitive.

pub mod cpu;
#[cfg(feature = "gpu")]
pub mod wgpu_backend;

use std::sync::Arc;

use ndarray::Array2;

use crate::buffer::DeviceBuffer;
use crate::error::{Result, StageError};
use crate::shape::Shape;

/// Opaque handle to a named device kernel, resolved by
/// [`ComputeBackend::load_kernel`] from a (source unit, entry point) pair.
#[derive(Clone, Debug)]
pub struct Kernel {
    pub(crate) inner: KernelInner,
}

#[derive(Clone, Debug)]
pub(crate) enum KernelInner {
    Cpu(cpu::CpuOp),
    #[cfg(feature = "gpu")]
    Wgpu(Arc<wgpu::ComputePipeline>),
}

/// Transform direction for [`ComputeBackend::fft`]. Both directions are
/// unnormalized; callers own the normalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FftDirection {
    Forward,
    Inverse,
}

/// Backend-specific execution plan bound to a fixed (width, height) extent.
/// Expensive to construct; build once and reuse across invocations.
pub struct FftPlan {
    pub(crate) inner: PlanInner,
    width: usize,
    height: usize,
}

pub(crate) enum PlanInner {
    Cpu(cpu::CpuPlan),
    #[cfg(feature = "gpu")]
    Wgpu(wgpu_backend::WgpuPlan),
}

impl std::fmt::Debug for FftPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftPlan")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl FftPlan {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub(crate) fn new(inner: PlanInner, width: usize, height: usize) -> Self {
        Self {
            inner,
            width,
            height,
        }
    }

    /// Extent of the interleaved-complex buffers this plan transforms.
    pub fn spectral_shape(&self) -> Shape {
        Shape::interleaved_complex(self.width, self.height)
    }
}

/// Device abstraction consumed by pipeline stages.
///
/// Every dispatch helper enqueues work in program order; completion order
/// follows submission order, so a sequence of calls forms a dependency chain
/// without explicit synchronization.
pub trait ComputeBackend: Send + Sync {
    /// Human-readable device name.
    fn name(&self) -> &str;

    fn is_gpu(&self) -> bool;

    /// Resolve a named kernel from a (source unit, entry point) pair.
    fn load_kernel(&self, unit: &str, entry: &str) -> Result<Kernel>;

    /// Allocate a zero-initialized buffer.
    fn alloc(&self, shape: &Shape) -> Result<DeviceBuffer>;

    fn upload(&self, data: &[f32], shape: Shape) -> Result<DeviceBuffer>;

    fn download(&self, buf: &DeviceBuffer) -> Result<Vec<f32>>;

    /// Overwrite every sample of `buf` with zero.
    fn fill_zero(&self, kernel: &Kernel, buf: &mut DeviceBuffer) -> Result<()>;

    /// Zero-pad a real frame into an interleaved-complex buffer: each source
    /// sample lands in the real slot of the top-left region of `dst`, all
    /// imaginary slots and samples outside the source extent become zero.
    fn spread(&self, kernel: &Kernel, src: &DeviceBuffer, dst: &mut DeviceBuffer) -> Result<()>;

    /// Extract the real parts of an interleaved-complex buffer into a real
    /// frame, scaling every sample by `scale`.
    fn pack(
        &self,
        kernel: &Kernel,
        src: &DeviceBuffer,
        dst: &mut DeviceBuffer,
        scale: f32,
    ) -> Result<()>;

    /// Pointwise complex multiply: `b[i] = a[i] * b[i]`.
    fn complex_mul(&self, kernel: &Kernel, a: &DeviceBuffer, b: &mut DeviceBuffer) -> Result<()>;

    /// Copy frame `page` of a batched buffer into a single-frame buffer.
    fn copy_page(&self, src: &DeviceBuffer, page: usize, dst: &mut DeviceBuffer) -> Result<()>;

    /// Copy a single-frame buffer into frame `page` of a batched buffer.
    fn paste_page(&self, src: &DeviceBuffer, dst: &mut DeviceBuffer, page: usize) -> Result<()>;

    /// Build an execution plan for `width` x `height` transforms.
    fn plan_fft(&self, width: usize, height: usize) -> Result<FftPlan>;

    /// Execute a 2D transform in place over an interleaved-complex buffer
    /// whose extent matches the plan.
    fn fft(&self, plan: &FftPlan, buf: &mut DeviceBuffer, direction: FftDirection) -> Result<()>;

    /// Upload a host image, mapping ndarray's (rows, cols) onto (height, width).
    fn upload_image(&self, image: &Array2<f32>) -> Result<DeviceBuffer> {
        let (h, w) = image.dim();
        let flat: Vec<f32> = image.iter().copied().collect();
        self.upload(&flat, Shape::d2(w, h))
    }

    /// Download a rank-2 buffer as a host image.
    fn download_image(&self, buf: &DeviceBuffer) -> Result<Array2<f32>> {
        let shape = buf.shape().clone();
        if shape.rank() != 2 {
            return Err(StageError::InvalidInput(format!(
                "expected a rank-2 buffer, got rank {}",
                shape.rank()
            )));
        }
        let data = self.download(buf)?;
        Array2::from_shape_vec((shape.height(), shape.width()), data)
            .map_err(|e| StageError::Dispatch(format!("download shape mismatch: {e}")))
    }
}

/// Complex extent (samples per row, rows) of an interleaved-complex buffer.
pub(crate) fn complex_extent(shape: &Shape) -> Result<(usize, usize)> {
    let (w, h) = (shape.width(), shape.height());
    if w % crate::consts::COMPLEX_WIDTH != 0 {
        return Err(StageError::Dispatch(format!(
            "extent {shape} is not an interleaved-complex layout"
        )));
    }
    Ok((w / crate::consts::COMPLEX_WIDTH, h))
}

/// Validate a page copy between a batched buffer and a single-frame buffer.
/// Returns the per-frame sample stride.
pub(crate) fn check_page_copy(
    batched: &Shape,
    frame: &Shape,
    page: usize,
    batch: usize,
) -> Result<usize> {
    if batched.frame() != frame.frame() {
        return Err(StageError::Dispatch(format!(
            "page copy between mismatched extents {batched} and {frame}"
        )));
    }
    if page >= batch {
        return Err(StageError::Dispatch(format!(
            "page {page} out of range for batch of {batch}"
        )));
    }
    Ok(batched.width() * batched.height())
}

/// Which device class the host prefers for a stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DevicePreference {
    Cpu,
    Gpu,
}

/// Build a backend for the given preference, falling back to the CPU when no
/// usable GPU exists.
pub fn create_backend(preference: &DevicePreference) -> Arc<dyn ComputeBackend> {
    match preference {
        DevicePreference::Cpu => Arc::new(cpu::CpuBackend),
        DevicePreference::Gpu => {
            #[cfg(feature = "gpu")]
            {
                match wgpu_backend::WgpuBackend::new() {
                    Ok(backend) => return Arc::new(backend),
                    Err(e) => {
                        tracing::warn!("GPU unavailable ({e}), falling back to CPU");
                    }
                }
            }
            #[cfg(not(feature = "gpu"))]
            {
                tracing::warn!("built without the `gpu` feature, falling back to CPU");
            }
            Arc::new(cpu::CpuBackend)
        }
    }
}
