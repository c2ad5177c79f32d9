mod common;

use common::{
    assert_frames_close, circular_convolve, convolve_batch, cpu_backend, impulse, pseudo_random,
};

// ---------------------------------------------------------------------------
// Convolution against an independent spatial-domain reference
// ---------------------------------------------------------------------------

#[test]
fn matches_spatial_circular_convolution() {
    let (w, h) = (16, 16);
    let backend = cpu_backend();
    let reference = pseudo_random(w * h, 7);
    let kernel = pseudo_random(w * h, 42);

    let result = convolve_batch(&backend, &reference, &kernel, w, h, 1);
    let expected = circular_convolve(&reference, &kernel, w, h);

    assert_frames_close(&result, &expected, 1e-3, "16x16 circular convolution");
}

#[test]
fn matches_spatial_reference_non_square() {
    let (w, h) = (16, 8);
    let backend = cpu_backend();
    let reference = pseudo_random(w * h, 3);
    let kernel = pseudo_random(w * h, 91);

    let result = convolve_batch(&backend, &reference, &kernel, w, h, 1);
    let expected = circular_convolve(&reference, &kernel, w, h);

    assert_frames_close(&result, &expected, 1e-3, "16x8 circular convolution");
}

#[test]
fn matches_spatial_reference_non_power_of_two() {
    // The CPU transforms handle arbitrary extents.
    let (w, h) = (12, 10);
    let backend = cpu_backend();
    let reference = pseudo_random(w * h, 11);
    let kernel = pseudo_random(w * h, 29);

    let result = convolve_batch(&backend, &reference, &kernel, w, h, 1);
    let expected = circular_convolve(&reference, &kernel, w, h);

    assert_frames_close(&result, &expected, 1e-3, "12x10 circular convolution");
}

// ---------------------------------------------------------------------------
// Normalization round trip: a unit impulse at the origin is the identity
// ---------------------------------------------------------------------------

#[test]
fn origin_impulse_reproduces_reference() {
    let (w, h) = (16, 16);
    let backend = cpu_backend();
    let reference = pseudo_random(w * h, 123);
    let kernel = impulse(w, h, 0, 0);

    let result = convolve_batch(&backend, &reference, &kernel, w, h, 1);

    assert_frames_close(&result, &reference, 1e-4, "identity via origin impulse");
}

#[test]
fn shifted_impulse_circularly_shifts_reference() {
    let (w, h) = (8, 8);
    let (dx, dy) = (3, 5);
    let backend = cpu_backend();
    let reference = pseudo_random(w * h, 55);
    let kernel = impulse(w, h, dx, dy);

    let result = convolve_batch(&backend, &reference, &kernel, w, h, 1);

    for row in 0..h {
        for col in 0..w {
            let src = ((row + h - dy) % h) * w + (col + w - dx) % w;
            let got = result[row * w + col];
            let want = reference[src];
            assert!(
                (got - want).abs() < 1e-4,
                "shift by ({dx},{dy}) at [{row},{col}]: {got} vs {want}"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Zero kernel annihilates its page
// ---------------------------------------------------------------------------

#[test]
fn zero_kernel_page_yields_zero_output_page() {
    let (w, h, batch) = (8, 8, 3);
    let backend = cpu_backend();
    let reference = pseudo_random(w * h, 17);

    // Page 1 is all zeros, pages 0 and 2 are impulses.
    let mut kernels = Vec::with_capacity(w * h * batch);
    kernels.extend(impulse(w, h, 0, 0));
    kernels.extend(vec![0.0; w * h]);
    kernels.extend(impulse(w, h, 1, 0));

    let result = convolve_batch(&backend, &reference, &kernels, w, h, batch);

    let zero_page = &result[w * h..2 * w * h];
    let max = zero_page.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    assert!(max < 1e-5, "zero kernel page should be zero, max = {max}");

    // Neighbouring pages are unaffected.
    let first_page = &result[..w * h];
    assert_frames_close(first_page, &reference, 1e-4, "page 0 around a zero page");
}

// ---------------------------------------------------------------------------
// Batch consistency: every page matches its single-kernel invocation
// ---------------------------------------------------------------------------

#[test]
fn batch_pages_match_individual_invocations() {
    let (w, h, batch) = (8, 8, 4);
    let backend = cpu_backend();
    let reference = pseudo_random(w * h, 200);

    let pages: Vec<Vec<f32>> = (0..batch)
        .map(|p| pseudo_random(w * h, 300 + p as u32))
        .collect();
    let mut kernels = Vec::with_capacity(w * h * batch);
    for page in &pages {
        kernels.extend(page.iter().copied());
    }

    let batched = convolve_batch(&backend, &reference, &kernels, w, h, batch);

    for (p, page) in pages.iter().enumerate() {
        let single = convolve_batch(&backend, &reference, page, w, h, 1);
        let got = &batched[p * w * h..(p + 1) * w * h];
        assert_frames_close(got, &single, 1e-5, &format!("batch page {p}"));
    }
}

#[test]
fn rank_2_kernel_input_behaves_as_batch_of_one() {
    use fftconv_core::convolve::FftConvolveStage;
    use fftconv_core::resources::Resources;
    use fftconv_core::shape::Shape;
    use fftconv_core::stage::Stage;

    let (w, h) = (8, 8);
    let backend = cpu_backend();
    let reference = pseudo_random(w * h, 5);
    let kernel = pseudo_random(w * h, 6);

    let reference_buf = backend.upload(&reference, Shape::d2(w, h)).unwrap();
    let kernel_buf = backend.upload(&kernel, Shape::d2(w, h)).unwrap();

    let mut stage = FftConvolveStage::new();
    stage.setup(&Resources::new(backend.clone())).unwrap();
    let inputs = [&reference_buf, &kernel_buf];
    let shape = stage.negotiate_shape(&inputs).unwrap();
    assert_eq!(shape, Shape::d3(w, h, 1), "rank-2 kernel implies batch 1");

    let mut output = backend.alloc(&shape).unwrap();
    stage.process(&inputs, &mut output).unwrap();

    let result = backend.download(&output).unwrap();
    let expected = convolve_batch(&backend, &reference, &kernel, w, h, 1);
    assert_frames_close(&result, &expected, 1e-6, "rank-2 vs rank-3 batch of 1");
}

// ---------------------------------------------------------------------------
// GPU parity (requires `gpu` feature and an adapter)
// ---------------------------------------------------------------------------

#[cfg(feature = "gpu")]
#[test]
fn gpu_matches_cpu_convolution() {
    use fftconv_core::compute::{create_backend, DevicePreference};

    let gpu = create_backend(&DevicePreference::Gpu);
    if !gpu.is_gpu() {
        return; // skip if no GPU available
    }

    let (w, h) = (16, 16);
    let cpu = cpu_backend();
    let reference = pseudo_random(w * h, 77);
    let kernel = pseudo_random(w * h, 88);

    let cpu_result = convolve_batch(&cpu, &reference, &kernel, w, h, 1);
    let gpu_result = convolve_batch(&gpu, &reference, &kernel, w, h, 1);

    assert_frames_close(&gpu_result, &cpu_result, 1e-2, "GPU vs CPU 16x16");
}

#[cfg(feature = "gpu")]
#[test]
fn gpu_batch_matches_cpu_batch() {
    use fftconv_core::compute::{create_backend, DevicePreference};

    let gpu = create_backend(&DevicePreference::Gpu);
    if !gpu.is_gpu() {
        return;
    }

    let (w, h, batch) = (8, 8, 3);
    let cpu = cpu_backend();
    let reference = pseudo_random(w * h, 13);
    let kernels = pseudo_random(w * h * batch, 14);

    let cpu_result = convolve_batch(&cpu, &reference, &kernels, w, h, batch);
    let gpu_result = convolve_batch(&gpu, &reference, &kernels, w, h, batch);

    assert_frames_close(&gpu_result, &cpu_result, 1e-2, "GPU vs CPU batch of 3");
}

#[cfg(feature = "gpu")]
#[test]
fn gpu_rejects_non_power_of_two_extent() {
    use fftconv_core::compute::{create_backend, DevicePreference};
    use fftconv_core::error::StageError;

    let gpu = create_backend(&DevicePreference::Gpu);
    if !gpu.is_gpu() {
        return;
    }

    let err = gpu.plan_fft(12, 16).expect_err("12 is not a power of two");
    assert!(
        matches!(err, StageError::UnsupportedExtent { width: 12, .. }),
        "expected UnsupportedExtent, got {err}"
    );
}
