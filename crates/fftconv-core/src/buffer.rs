use crate::error::Result;
use crate::shape::Shape;

/// A device-resident array of f32 samples with a shape descriptor.
///
/// The storage is backend-specific: a flat host vector for the CPU backend,
/// a `wgpu::Buffer` for the GPU backend. Buffers are created through a
/// [`ComputeBackend`](crate::compute::ComputeBackend) and must only be passed
/// back to the backend that created them.
#[derive(Debug)]
pub struct DeviceBuffer {
    pub(crate) inner: BufferInner,
    shape: Shape,
}

#[derive(Debug)]
pub(crate) enum BufferInner {
    Cpu(Vec<f32>),
    #[cfg(feature = "gpu")]
    Wgpu(wgpu::Buffer),
}

impl DeviceBuffer {
    pub(crate) fn cpu_zeroed(shape: Shape) -> Self {
        let len = shape.len();
        Self {
            inner: BufferInner::Cpu(vec![0.0; len]),
            shape,
        }
    }

    pub(crate) fn from_vec(data: Vec<f32>, shape: Shape) -> Self {
        debug_assert_eq!(data.len(), shape.len());
        Self {
            inner: BufferInner::Cpu(data),
            shape,
        }
    }

    #[cfg(feature = "gpu")]
    pub(crate) fn from_wgpu(buffer: wgpu::Buffer, shape: Shape) -> Self {
        Self {
            inner: BufferInner::Wgpu(buffer),
            shape,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub(crate) fn cpu(&self) -> Result<&[f32]> {
        match &self.inner {
            BufferInner::Cpu(data) => Ok(data),
            #[cfg(feature = "gpu")]
            _ => Err(StageError::Dispatch(
                "buffer does not belong to the CPU backend".into(),
            )),
        }
    }

    pub(crate) fn cpu_mut(&mut self) -> Result<&mut [f32]> {
        match &mut self.inner {
            BufferInner::Cpu(data) => Ok(data),
            #[cfg(feature = "gpu")]
            _ => Err(StageError::Dispatch(
                "buffer does not belong to the CPU backend".into(),
            )),
        }
    }

    #[cfg(feature = "gpu")]
    pub(crate) fn wgpu(&self) -> Result<&wgpu::Buffer> {
        match &self.inner {
            BufferInner::Wgpu(buffer) => Ok(buffer),
            _ => Err(StageError::Dispatch(
                "buffer does not belong to the GPU backend".into(),
            )),
        }
    }
}
