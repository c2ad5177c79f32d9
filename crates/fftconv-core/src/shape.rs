use std::fmt;

use serde::{Deserialize, Serialize};

use crate::consts::COMPLEX_WIDTH;

/// Extent descriptor for a device buffer, rank 1 to 3.
///
/// Dimensions are ordered `[width, height, batch]`. A rank-2 shape describes
/// a single frame; rank 3 adds a batch of frames along the third axis.
/// Storage is row-major within a frame, and frames are contiguous along the
/// batch axis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Single frame of `width` x `height` samples.
    pub fn d2(width: usize, height: usize) -> Self {
        Self {
            dims: vec![width, height],
        }
    }

    /// Batch of `batch` frames, each `width` x `height`.
    pub fn d3(width: usize, height: usize, batch: usize) -> Self {
        Self {
            dims: vec![width, height, batch],
        }
    }

    /// Frequency-domain extent for a `width` x `height` frame in
    /// interleaved-complex layout: two floats per complex sample.
    pub fn interleaved_complex(width: usize, height: usize) -> Self {
        Self::d2(COMPLEX_WIDTH * width, height)
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn width(&self) -> usize {
        self.dims[0]
    }

    pub fn height(&self) -> usize {
        self.dims.get(1).copied().unwrap_or(1)
    }

    /// Size of the batch axis, or 1 for rank-2 shapes.
    pub fn batch(&self) -> usize {
        self.dims.get(2).copied().unwrap_or(1)
    }

    /// Total sample count.
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extent of a single frame, with any batch axis stripped.
    pub fn frame(&self) -> Shape {
        Shape::d2(self.width(), self.height())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for d in &self.dims {
            if !first {
                write!(f, "x")?;
            }
            write!(f, "{d}")?;
            first = false;
        }
        Ok(())
    }
}
