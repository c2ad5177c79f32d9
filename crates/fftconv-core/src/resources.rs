//! Shared resource provider handed to stages during setup.

use std::sync::Arc;

use crate::compute::{ComputeBackend, Kernel};
use crate::error::Result;

/// Resolves named kernels and exposes the compute context a stage runs on.
#[derive(Clone)]
pub struct Resources {
    backend: Arc<dyn ComputeBackend>,
}

impl Resources {
    pub fn new(backend: Arc<dyn ComputeBackend>) -> Self {
        Self { backend }
    }

    /// Resolve a kernel from its (source unit, entry point) pair.
    pub fn kernel(&self, unit: &str, entry: &str) -> Result<Kernel> {
        self.backend.load_kernel(unit, entry)
    }

    pub fn backend(&self) -> Arc<dyn ComputeBackend> {
        Arc::clone(&self.backend)
    }
}
