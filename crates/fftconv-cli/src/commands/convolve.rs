use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use fftconv_core::compute::{create_backend, DevicePreference};
use fftconv_core::convolve::FftConvolveStage;
use fftconv_core::io::{load_image, save_image};
use fftconv_core::resources::Resources;
use fftconv_core::shape::Shape;
use fftconv_core::stage::Stage;

#[derive(Args)]
pub struct ConvolveArgs {
    /// Reference image (TIFF or PNG)
    #[arg(long)]
    pub reference: PathBuf,

    /// Kernel images, one per output page; all must match the reference extent
    #[arg(required = true)]
    pub kernels: Vec<PathBuf>,

    /// Compute device (cpu or gpu)
    #[arg(long, default_value = "cpu")]
    pub device: String,

    /// Directory for the per-page output images
    #[arg(short, long, default_value = "out")]
    pub output_dir: PathBuf,
}

pub fn run(args: &ConvolveArgs) -> Result<()> {
    let preference = match args.device.as_str() {
        "cpu" => DevicePreference::Cpu,
        "gpu" => DevicePreference::Gpu,
        other => bail!("Unknown device '{other}', expected cpu or gpu"),
    };

    let reference = load_image(&args.reference)
        .with_context(|| format!("Failed to load {}", args.reference.display()))?;
    let (h, w) = reference.dim();
    println!("Loaded {}x{} reference image", w, h);

    let backend = create_backend(&preference);
    println!("Compute device: {}", backend.name());

    let batch = args.kernels.len();
    let mut kernel_samples = Vec::with_capacity(w * h * batch);
    for path in &args.kernels {
        let kernel =
            load_image(path).with_context(|| format!("Failed to load {}", path.display()))?;
        if kernel.dim() != (h, w) {
            bail!(
                "Kernel {} is {}x{}, expected {}x{}",
                path.display(),
                kernel.dim().1,
                kernel.dim().0,
                w,
                h
            );
        }
        kernel_samples.extend(kernel.iter().copied());
    }
    tracing::debug!("loaded {batch} kernel pages");

    let reference_buf = backend.upload_image(&reference)?;
    let kernels_buf = backend.upload(&kernel_samples, Shape::d3(w, h, batch))?;

    let resources = Resources::new(backend.clone());
    let mut stage = FftConvolveStage::new();
    stage.setup(&resources).context("Stage setup failed")?;

    let inputs = [&reference_buf, &kernels_buf];
    let out_shape = stage
        .negotiate_shape(&inputs)
        .context("Shape negotiation failed")?;
    println!("Output extent: {out_shape}");

    let mut output = backend.alloc(&out_shape)?;
    stage
        .process(&inputs, &mut output)
        .context("Convolution failed")?;
    stage.teardown();

    let samples = backend.download(&output)?;
    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;

    let bar = ProgressBar::new(batch as u64);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}")
            .expect("valid progress template"),
    );
    bar.set_message("Writing pages");

    let stride = w * h;
    for page in 0..batch {
        let frame = ndarray::Array2::from_shape_vec(
            (h, w),
            samples[page * stride..(page + 1) * stride].to_vec(),
        )
        .context("Output page has unexpected extent")?;
        let path = args.output_dir.join(format!("page_{page:03}.tiff"));
        save_image(&frame, &path)
            .with_context(|| format!("Failed to save {}", path.display()))?;
        bar.inc(1);
    }
    bar.finish();

    println!("Wrote {batch} pages to {}", args.output_dir.display());
    Ok(())
}
