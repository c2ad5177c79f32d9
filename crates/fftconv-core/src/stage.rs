//! Generic processing-stage interface.
//!
//! A host scheduler drives a stage through a fixed lifecycle: `setup` once,
//! `negotiate_shape` whenever input extents are known, `process` per batch,
//! `teardown` once. Stages are held as `&mut dyn Stage`; a single instance is
//! never invoked concurrently.

use std::ops::BitOr;

use crate::buffer::DeviceBuffer;
use crate::error::Result;
use crate::resources::Resources;
use crate::shape::Shape;

/// Device-placement flags a stage reports to the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionMode(u8);

impl ExecutionMode {
    /// The stage transforms inputs into one output per invocation.
    pub const PROCESSOR: ExecutionMode = ExecutionMode(0b01);
    /// The stage dispatches device kernels and prefers GPU placement.
    pub const GPU: ExecutionMode = ExecutionMode(0b10);

    pub fn contains(self, other: ExecutionMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ExecutionMode {
    type Output = ExecutionMode;

    fn bitor(self, rhs: ExecutionMode) -> ExecutionMode {
        ExecutionMode(self.0 | rhs.0)
    }
}

pub trait Stage {
    /// Acquire kernels and device context. Failures are fatal for the stage.
    fn setup(&mut self, resources: &Resources) -> Result<()>;

    /// Number of input buffers `process` expects.
    fn input_count(&self) -> usize;

    /// Required rank of input `index`.
    fn input_rank(&self, index: usize) -> usize;

    fn execution_mode(&self) -> ExecutionMode;

    /// Derive the output extent from the input extents, preparing any
    /// extent-bound state. Must be called after `setup` and before `process`.
    fn negotiate_shape(&mut self, inputs: &[&DeviceBuffer]) -> Result<Shape>;

    /// Run one batch. `output` must match the negotiated extent.
    fn process(&mut self, inputs: &[&DeviceBuffer], output: &mut DeviceBuffer) -> Result<()>;

    /// Release extent-bound state, returning the stage to its pre-negotiation
    /// lifecycle. Idempotent.
    fn teardown(&mut self);
}
