pub mod convolve;
pub mod info;
