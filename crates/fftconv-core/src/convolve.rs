//! Batched frequency-domain convolution stage.
//!
//! Convolves one reference frame against a batch of kernel frames of the
//! same extent. The reference spectrum is computed once per invocation; each
//! kernel page then costs one forward transform, one pointwise multiply and
//! one inverse transform. Transforms run at the frame extent, so the result
//! is a circular convolution.

use std::sync::Arc;

use crate::buffer::DeviceBuffer;
use crate::compute::{ComputeBackend, FftDirection, FftPlan, Kernel};
use crate::error::{Result, StageError};
use crate::resources::Resources;
use crate::shape::Shape;
use crate::stage::{ExecutionMode, Stage};

const SPREAD_KERNEL: (&str, &str) = ("fft.wgsl", "fft_spread");
const PACK_KERNEL: (&str, &str) = ("fft.wgsl", "fft_pack");
const MULT_KERNEL: (&str, &str) = ("mult.wgsl", "mult");
const FILLZERO_KERNEL: (&str, &str) = ("fillzero.wgsl", "fillzero");

struct AcquiredKernels {
    backend: Arc<dyn ComputeBackend>,
    spread: Kernel,
    pack: Kernel,
    mult: Kernel,
    fillzero: Kernel,
}

/// Extent-bound state built on the first successful shape negotiation and
/// reused until teardown. The plan is never rebuilt for a different extent.
struct Prepared {
    width: usize,
    height: usize,
    batch: usize,
    plan: FftPlan,
    /// Reference spectrum, interleaved complex.
    spectral_a: DeviceBuffer,
    /// Per-page working spectrum, interleaved complex.
    spectral_b: DeviceBuffer,
    /// Real single-frame staging buffer for page copies and packed results.
    scratch: DeviceBuffer,
}

enum PlanState {
    Uninitialized,
    Ready(Prepared),
}

#[derive(Default)]
pub struct FftConvolveStage {
    kernels: Option<AcquiredKernels>,
    state: PlanState,
}

impl Default for PlanState {
    fn default() -> Self {
        PlanState::Uninitialized
    }
}

impl FftConvolveStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a shape negotiation has prepared the extent-bound state.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, PlanState::Ready(_))
    }

    fn kernels(&self) -> Result<&AcquiredKernels> {
        self.kernels
            .as_ref()
            .ok_or(StageError::NotReady("setup has not run"))
    }

    fn check_inputs<'a>(
        &self,
        inputs: &'a [&DeviceBuffer],
    ) -> Result<(&'a DeviceBuffer, &'a DeviceBuffer)> {
        if inputs.len() != 2 {
            return Err(StageError::InvalidInput(format!(
                "expected 2 inputs (reference, kernels), got {}",
                inputs.len()
            )));
        }
        let (reference, kernels) = (inputs[0], inputs[1]);
        if reference.shape().rank() != 2 {
            return Err(StageError::InvalidInput(format!(
                "reference input must be rank 2, got extent {}",
                reference.shape()
            )));
        }
        let krank = kernels.shape().rank();
        if krank != 2 && krank != 3 {
            return Err(StageError::InvalidInput(format!(
                "kernel input must be rank 2 or 3, got extent {}",
                kernels.shape()
            )));
        }
        if reference.shape().frame() != kernels.shape().frame() {
            return Err(StageError::ShapeMismatch {
                expected: reference.shape().frame(),
                actual: kernels.shape().frame(),
            });
        }
        Ok((reference, kernels))
    }
}

impl Stage for FftConvolveStage {
    fn setup(&mut self, resources: &Resources) -> Result<()> {
        let backend = resources.backend();
        tracing::debug!("acquiring convolution kernels on {}", backend.name());
        self.kernels = Some(AcquiredKernels {
            spread: resources.kernel(SPREAD_KERNEL.0, SPREAD_KERNEL.1)?,
            pack: resources.kernel(PACK_KERNEL.0, PACK_KERNEL.1)?,
            mult: resources.kernel(MULT_KERNEL.0, MULT_KERNEL.1)?,
            fillzero: resources.kernel(FILLZERO_KERNEL.0, FILLZERO_KERNEL.1)?,
            backend,
        });
        Ok(())
    }

    fn input_count(&self) -> usize {
        2
    }

    fn input_rank(&self, index: usize) -> usize {
        match index {
            0 => 2,
            _ => 3,
        }
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::PROCESSOR | ExecutionMode::GPU
    }

    fn negotiate_shape(&mut self, inputs: &[&DeviceBuffer]) -> Result<Shape> {
        let (reference, kernels) = self.check_inputs(inputs)?;
        let (w, h) = (reference.shape().width(), reference.shape().height());
        let batch = kernels.shape().batch();

        match &mut self.state {
            PlanState::Ready(prep) => {
                // The plan is bound to the first negotiated extent for the
                // lifetime of this instance; only the batch may change.
                if (w, h) != (prep.width, prep.height) {
                    return Err(StageError::ShapeMismatch {
                        expected: Shape::d2(prep.width, prep.height),
                        actual: Shape::d2(w, h),
                    });
                }
                prep.batch = batch;
            }
            PlanState::Uninitialized => {
                let backend = Arc::clone(&self.kernels()?.backend);
                let plan = backend.plan_fft(w, h)?;
                let spectral = Shape::interleaved_complex(w, h);
                tracing::debug!("preparing {w}x{h} transforms, batch of {batch}");
                self.state = PlanState::Ready(Prepared {
                    width: w,
                    height: h,
                    batch,
                    spectral_a: backend.alloc(&spectral)?,
                    spectral_b: backend.alloc(&spectral)?,
                    scratch: backend.alloc(&Shape::d2(w, h))?,
                    plan,
                });
            }
        }
        Ok(Shape::d3(w, h, batch))
    }

    fn process(&mut self, inputs: &[&DeviceBuffer], output: &mut DeviceBuffer) -> Result<()> {
        let acquired = self
            .kernels
            .as_ref()
            .ok_or(StageError::NotReady("setup has not run"))?;
        let prep = match &mut self.state {
            PlanState::Ready(prep) => prep,
            PlanState::Uninitialized => {
                return Err(StageError::NotReady("shape negotiation has not run"))
            }
        };

        if inputs.len() != 2 {
            return Err(StageError::InvalidInput(format!(
                "expected 2 inputs (reference, kernels), got {}",
                inputs.len()
            )));
        }
        let (reference, kernels) = (inputs[0], inputs[1]);
        let frame = Shape::d2(prep.width, prep.height);
        if reference.shape().frame() != frame || kernels.shape().frame() != frame {
            return Err(StageError::ShapeMismatch {
                expected: frame.clone(),
                actual: if reference.shape().frame() != frame {
                    reference.shape().frame()
                } else {
                    kernels.shape().frame()
                },
            });
        }
        let expected_out = Shape::d3(prep.width, prep.height, prep.batch);
        if kernels.shape().batch() != prep.batch {
            return Err(StageError::ShapeMismatch {
                expected: expected_out,
                actual: kernels.shape().clone(),
            });
        }
        if *output.shape() != expected_out {
            return Err(StageError::ShapeMismatch {
                expected: expected_out,
                actual: output.shape().clone(),
            });
        }

        let backend = &acquired.backend;
        let scale = 1.0 / (prep.width * prep.height) as f32;

        backend.fill_zero(&acquired.fillzero, &mut prep.scratch)?;

        // Reference spectrum, computed once and reused for every page.
        // Spreading overwrites every slot of its destination, padding
        // included.
        backend.spread(&acquired.spread, reference, &mut prep.spectral_a)?;
        backend.fft(&prep.plan, &mut prep.spectral_a, FftDirection::Forward)?;

        for page in 0..prep.batch {
            backend.copy_page(kernels, page, &mut prep.scratch)?;
            backend.spread(&acquired.spread, &prep.scratch, &mut prep.spectral_b)?;
            backend.fft(&prep.plan, &mut prep.spectral_b, FftDirection::Forward)?;
            backend.complex_mul(&acquired.mult, &prep.spectral_a, &mut prep.spectral_b)?;
            backend.fft(&prep.plan, &mut prep.spectral_b, FftDirection::Inverse)?;
            backend.pack(&acquired.pack, &prep.spectral_b, &mut prep.scratch, scale)?;
            backend.paste_page(&prep.scratch, output, page)?;
        }
        Ok(())
    }

    fn teardown(&mut self) {
        self.state = PlanState::Uninitialized;
    }
}
