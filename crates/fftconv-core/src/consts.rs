/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Floats per interleaved-complex sample (real, imaginary).
pub const COMPLEX_WIDTH: usize = 2;
