use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use fftconv_core::io::load_image;
use fftconv_core::shape::Shape;

#[derive(Args)]
pub struct InfoArgs {
    /// Image file (TIFF or PNG)
    pub file: PathBuf,

    /// Batch size to report the convolved output extent for
    #[arg(long, default_value = "1")]
    pub batch: usize,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let image = load_image(&args.file)
        .with_context(|| format!("Failed to load {}", args.file.display()))?;
    let (h, w) = image.dim();

    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in image.iter() {
        min = min.min(v);
        max = max.max(v);
    }

    println!("File:          {}", args.file.display());
    println!("Extent:        {}", Shape::d2(w, h));
    println!("Value range:   {min:.4} .. {max:.4}");
    println!("Output extent: {}", Shape::d3(w, h, args.batch));
    Ok(())
}
