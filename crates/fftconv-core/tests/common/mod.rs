#![allow(dead_code)]

use std::sync::Arc;

use fftconv_core::compute::{create_backend, ComputeBackend, DevicePreference};
use fftconv_core::convolve::FftConvolveStage;
use fftconv_core::resources::Resources;
use fftconv_core::shape::Shape;
use fftconv_core::stage::Stage;

pub fn cpu_backend() -> Arc<dyn ComputeBackend> {
    create_backend(&DevicePreference::Cpu)
}

/// Deterministic frame fill without pulling in an RNG crate.
pub fn pseudo_random(len: usize, seed: u32) -> Vec<f32> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 8) as f32 / (1u32 << 24) as f32
        })
        .collect()
}

/// Unit impulse at (col, row) in a w x h frame.
pub fn impulse(w: usize, h: usize, col: usize, row: usize) -> Vec<f32> {
    let mut frame = vec![0.0; w * h];
    frame[row * w + col] = 1.0;
    frame
}

/// Independent spatial-domain circular convolution, accumulated in f64.
pub fn circular_convolve(a: &[f32], b: &[f32], w: usize, h: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f64;
            for v in 0..h {
                for u in 0..w {
                    let yy = (y + h - v) % h;
                    let xx = (x + w - u) % w;
                    acc += a[v * w + u] as f64 * b[yy * w + xx] as f64;
                }
            }
            out[y * w + x] = acc as f32;
        }
    }
    out
}

/// Run the full stage lifecycle over one reference frame and a kernel batch,
/// returning the flat output samples.
pub fn convolve_batch(
    backend: &Arc<dyn ComputeBackend>,
    reference: &[f32],
    kernels: &[f32],
    w: usize,
    h: usize,
    batch: usize,
) -> Vec<f32> {
    let reference_buf = backend
        .upload(reference, Shape::d2(w, h))
        .expect("reference upload");
    let kernels_buf = backend
        .upload(kernels, Shape::d3(w, h, batch))
        .expect("kernel upload");

    let mut stage = FftConvolveStage::new();
    stage
        .setup(&Resources::new(Arc::clone(backend)))
        .expect("setup");

    let inputs = [&reference_buf, &kernels_buf];
    let out_shape = stage.negotiate_shape(&inputs).expect("negotiate_shape");
    assert_eq!(out_shape, Shape::d3(w, h, batch));

    let mut output = backend.alloc(&out_shape).expect("output alloc");
    stage.process(&inputs, &mut output).expect("process");
    stage.teardown();

    backend.download(&output).expect("download")
}

pub fn assert_frames_close(actual: &[f32], expected: &[f32], tolerance: f32, label: &str) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "{label}: sample counts differ"
    );
    for (i, (&a, &e)) in actual.iter().zip(expected.iter()).enumerate() {
        let bound = tolerance * (1.0 + e.abs());
        assert!(
            (a - e).abs() <= bound,
            "{label}: sample {i} = {a}, expected {e} (tolerance {bound})"
        );
    }
}
