mod common;

use common::{cpu_backend, pseudo_random};

use fftconv_core::convolve::FftConvolveStage;
use fftconv_core::error::StageError;
use fftconv_core::resources::Resources;
use fftconv_core::shape::Shape;
use fftconv_core::stage::{ExecutionMode, Stage};

fn ready_stage() -> FftConvolveStage {
    let mut stage = FftConvolveStage::new();
    stage.setup(&Resources::new(cpu_backend())).expect("setup");
    stage
}

// ---------------------------------------------------------------------------
// Static contract: input counts, ranks, execution mode
// ---------------------------------------------------------------------------

#[test]
fn reports_two_inputs_with_expected_ranks() {
    let stage = FftConvolveStage::new();
    assert_eq!(stage.input_count(), 2);
    assert_eq!(stage.input_rank(0), 2, "reference input is a single frame");
    assert_eq!(stage.input_rank(1), 3, "kernel input is a batch");
}

#[test]
fn reports_processor_and_gpu_mode() {
    let stage = FftConvolveStage::new();
    let mode = stage.execution_mode();
    assert!(mode.contains(ExecutionMode::PROCESSOR));
    assert!(mode.contains(ExecutionMode::GPU));
}

// ---------------------------------------------------------------------------
// Lifecycle ordering
// ---------------------------------------------------------------------------

#[test]
fn process_before_setup_is_not_ready() {
    let backend = cpu_backend();
    let reference = backend.upload(&pseudo_random(64, 1), Shape::d2(8, 8)).unwrap();
    let kernels = backend.upload(&pseudo_random(64, 2), Shape::d3(8, 8, 1)).unwrap();
    let mut output = backend.alloc(&Shape::d3(8, 8, 1)).unwrap();

    let mut stage = FftConvolveStage::new();
    let err = stage
        .process(&[&reference, &kernels], &mut output)
        .expect_err("process without setup");
    assert!(matches!(err, StageError::NotReady(_)), "got {err}");
}

#[test]
fn process_before_negotiation_is_not_ready() {
    let backend = cpu_backend();
    let reference = backend.upload(&pseudo_random(64, 1), Shape::d2(8, 8)).unwrap();
    let kernels = backend.upload(&pseudo_random(64, 2), Shape::d3(8, 8, 1)).unwrap();
    let mut output = backend.alloc(&Shape::d3(8, 8, 1)).unwrap();

    let mut stage = ready_stage();
    assert!(!stage.is_ready());
    let err = stage
        .process(&[&reference, &kernels], &mut output)
        .expect_err("process without shape negotiation");
    assert!(matches!(err, StageError::NotReady(_)), "got {err}");
}

#[test]
fn negotiation_before_setup_is_not_ready() {
    let backend = cpu_backend();
    let reference = backend.upload(&pseudo_random(64, 1), Shape::d2(8, 8)).unwrap();
    let kernels = backend.upload(&pseudo_random(64, 2), Shape::d3(8, 8, 1)).unwrap();

    let mut stage = FftConvolveStage::new();
    let err = stage
        .negotiate_shape(&[&reference, &kernels])
        .expect_err("negotiate without setup");
    assert!(matches!(err, StageError::NotReady(_)), "got {err}");
}

// ---------------------------------------------------------------------------
// Shape negotiation
// ---------------------------------------------------------------------------

#[test]
fn negotiated_shape_appends_batch_axis() {
    let backend = cpu_backend();
    let reference = backend
        .upload(&pseudo_random(16 * 8, 1), Shape::d2(16, 8))
        .unwrap();
    let kernels = backend
        .upload(&pseudo_random(16 * 8 * 5, 2), Shape::d3(16, 8, 5))
        .unwrap();

    let mut stage = ready_stage();
    let shape = stage.negotiate_shape(&[&reference, &kernels]).unwrap();
    assert_eq!(shape, Shape::d3(16, 8, 5));
    assert!(stage.is_ready());
}

#[test]
fn negotiation_is_idempotent() {
    let backend = cpu_backend();
    let reference = backend.upload(&pseudo_random(64, 1), Shape::d2(8, 8)).unwrap();
    let kernels = backend.upload(&pseudo_random(64 * 2, 2), Shape::d3(8, 8, 2)).unwrap();

    let mut stage = ready_stage();
    let inputs = [&reference, &kernels];
    let first = stage.negotiate_shape(&inputs).unwrap();
    let second = stage.negotiate_shape(&inputs).unwrap();
    assert_eq!(first, second, "repeated negotiation changed the shape");
    assert!(stage.is_ready());
}

#[test]
fn extent_mismatch_fails_before_preparing() {
    let backend = cpu_backend();
    let reference = backend.upload(&pseudo_random(64, 1), Shape::d2(8, 8)).unwrap();
    let kernels = backend
        .upload(&pseudo_random(16 * 8, 2), Shape::d3(16, 8, 1))
        .unwrap();

    let mut stage = ready_stage();
    let err = stage
        .negotiate_shape(&[&reference, &kernels])
        .expect_err("mismatched extents");
    assert!(
        matches!(err, StageError::ShapeMismatch { .. }),
        "got {err}"
    );
    assert!(!stage.is_ready(), "mismatch must leave the stage unprepared");
}

#[test]
fn later_extent_change_errors_against_prepared_extent() {
    let backend = cpu_backend();
    let small_ref = backend.upload(&pseudo_random(64, 1), Shape::d2(8, 8)).unwrap();
    let small_ker = backend.upload(&pseudo_random(64, 2), Shape::d3(8, 8, 1)).unwrap();
    let big_ref = backend
        .upload(&pseudo_random(256, 3), Shape::d2(16, 16))
        .unwrap();
    let big_ker = backend
        .upload(&pseudo_random(256, 4), Shape::d3(16, 16, 1))
        .unwrap();

    let mut stage = ready_stage();
    stage.negotiate_shape(&[&small_ref, &small_ker]).unwrap();

    let err = stage
        .negotiate_shape(&[&big_ref, &big_ker])
        .expect_err("plan is bound to the first extent");
    match err {
        StageError::ShapeMismatch { expected, actual } => {
            assert_eq!(expected, Shape::d2(8, 8), "error reports the prepared extent");
            assert_eq!(actual, Shape::d2(16, 16));
        }
        other => panic!("expected ShapeMismatch, got {other}"),
    }
    assert!(stage.is_ready(), "prepared state survives a rejected extent");
}

#[test]
fn batch_may_change_between_negotiations() {
    let backend = cpu_backend();
    let reference = backend.upload(&pseudo_random(64, 1), Shape::d2(8, 8)).unwrap();
    let two = backend.upload(&pseudo_random(128, 2), Shape::d3(8, 8, 2)).unwrap();
    let five = backend.upload(&pseudo_random(320, 3), Shape::d3(8, 8, 5)).unwrap();

    let mut stage = ready_stage();
    assert_eq!(
        stage.negotiate_shape(&[&reference, &two]).unwrap(),
        Shape::d3(8, 8, 2)
    );
    assert_eq!(
        stage.negotiate_shape(&[&reference, &five]).unwrap(),
        Shape::d3(8, 8, 5)
    );
}

// ---------------------------------------------------------------------------
// Invalid inputs
// ---------------------------------------------------------------------------

#[test]
fn rejects_wrong_input_count() {
    let backend = cpu_backend();
    let reference = backend.upload(&pseudo_random(64, 1), Shape::d2(8, 8)).unwrap();

    let mut stage = ready_stage();
    let err = stage
        .negotiate_shape(&[&reference])
        .expect_err("one input is not enough");
    assert!(matches!(err, StageError::InvalidInput(_)), "got {err}");
}

#[test]
fn rejects_batched_reference_input() {
    let backend = cpu_backend();
    let reference = backend
        .upload(&pseudo_random(128, 1), Shape::d3(8, 8, 2))
        .unwrap();
    let kernels = backend.upload(&pseudo_random(64, 2), Shape::d3(8, 8, 1)).unwrap();

    let mut stage = ready_stage();
    let err = stage
        .negotiate_shape(&[&reference, &kernels])
        .expect_err("rank-3 reference");
    assert!(matches!(err, StageError::InvalidInput(_)), "got {err}");
}

#[test]
fn rejects_mismatched_output_extent() {
    let backend = cpu_backend();
    let reference = backend.upload(&pseudo_random(64, 1), Shape::d2(8, 8)).unwrap();
    let kernels = backend.upload(&pseudo_random(128, 2), Shape::d3(8, 8, 2)).unwrap();

    let mut stage = ready_stage();
    let inputs = [&reference, &kernels];
    stage.negotiate_shape(&inputs).unwrap();

    // Batch of 1 instead of the negotiated 2.
    let mut output = backend.alloc(&Shape::d3(8, 8, 1)).unwrap();
    let err = stage
        .process(&inputs, &mut output)
        .expect_err("output extent differs from the negotiated shape");
    assert!(matches!(err, StageError::ShapeMismatch { .. }), "got {err}");
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

#[test]
fn teardown_returns_stage_to_unprepared() {
    let backend = cpu_backend();
    let reference = backend.upload(&pseudo_random(64, 1), Shape::d2(8, 8)).unwrap();
    let kernels = backend.upload(&pseudo_random(64, 2), Shape::d3(8, 8, 1)).unwrap();

    let mut stage = ready_stage();
    let inputs = [&reference, &kernels];
    stage.negotiate_shape(&inputs).unwrap();
    assert!(stage.is_ready());

    stage.teardown();
    assert!(!stage.is_ready());

    let mut output = backend.alloc(&Shape::d3(8, 8, 1)).unwrap();
    let err = stage
        .process(&inputs, &mut output)
        .expect_err("process after teardown");
    assert!(matches!(err, StageError::NotReady(_)), "got {err}");
}

#[test]
fn stage_can_renegotiate_a_new_extent_after_teardown() {
    let backend = cpu_backend();
    let small_ref = backend.upload(&pseudo_random(64, 1), Shape::d2(8, 8)).unwrap();
    let small_ker = backend.upload(&pseudo_random(64, 2), Shape::d3(8, 8, 1)).unwrap();
    let big_ref = backend
        .upload(&pseudo_random(256, 3), Shape::d2(16, 16))
        .unwrap();
    let big_ker = backend
        .upload(&pseudo_random(256, 4), Shape::d3(16, 16, 1))
        .unwrap();

    let mut stage = ready_stage();
    stage.negotiate_shape(&[&small_ref, &small_ker]).unwrap();
    stage.teardown();

    let shape = stage
        .negotiate_shape(&[&big_ref, &big_ker])
        .expect("fresh extent after teardown");
    assert_eq!(shape, Shape::d3(16, 16, 1));

    let mut output = backend.alloc(&shape).unwrap();
    stage.process(&[&big_ref, &big_ker], &mut output).unwrap();
}

#[test]
fn teardown_is_idempotent() {
    let mut stage = ready_stage();
    stage.teardown();
    stage.teardown();
    assert!(!stage.is_ready());
}
