pub mod buffer;
pub mod compute;
pub mod consts;
pub mod convolve;
pub mod error;
pub mod io;
pub mod resources;
pub mod shape;
pub mod stage;
