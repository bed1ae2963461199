use std::{fs, path::PathBuf, time::Instant};

use clap::Parser;
use rapidlayout::{
    util::segmentation_file_name, LayoutBox, LayoutDetectorBuilder, Result, TextDetectionResult,
};
use serde::Serialize;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Detect layout regions (text, tables, figures, ...) in page images.
#[derive(Debug, Parser)]
struct Args {
    /// Page images to analyze.
    #[arg(required = true)]
    images: Vec<PathBuf>,
    /// ONNX layout model.
    #[arg(long, default_value = "models/layout/model.onnx")]
    model: PathBuf,
    /// Label names, one per line, blank class first.
    #[arg(long)]
    labels: Option<PathBuf>,
    /// JSON array of text detection results, one per image.
    #[arg(long)]
    lines: Option<PathBuf>,
    /// Model input width and height.
    #[arg(long, default_value_t = 1024)]
    input_size: u32,
    #[arg(long, default_value_t = 4)]
    batch_size: usize,
    #[arg(long, default_value_t = 4)]
    threads: usize,
    /// Write each segmentation map as `<index>_<image stem>.png` into this directory.
    #[arg(long)]
    segmentation_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct PageOutput<'a> {
    image: &'a PathBuf,
    image_bbox: [f32; 4],
    bboxes: &'a [LayoutBox],
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let images = args
        .images
        .iter()
        .map(image::open)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let detection_results = args
        .lines
        .as_ref()
        .map(|path| -> Result<Vec<TextDetectionResult>> {
            let json = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&json)?)
        })
        .transpose()?;

    let mut builder = LayoutDetectorBuilder::new()
        .model(&args.model)
        .input_size(args.input_size, args.input_size)
        .batch_size(args.batch_size)
        .threads(args.threads);
    if let Some(labels) = &args.labels {
        builder = builder.labels(labels);
    }
    let detector = builder.build()?;

    let start = Instant::now();
    let results = detector.detect(&images, detection_results.as_deref())?;
    log::debug!("Layout detection took {:?}", start.elapsed());

    if let Some(dir) = &args.segmentation_dir {
        fs::create_dir_all(dir)?;
        for (i, (path, result)) in args.images.iter().zip(&results).enumerate() {
            result
                .segmentation_map
                .save(dir.join(segmentation_file_name(i, path)))?;
        }
    }

    let pages = args
        .images
        .iter()
        .zip(&results)
        .map(|(image, result)| PageOutput {
            image,
            image_bbox: result.image_bbox,
            bboxes: &result.bboxes,
        })
        .collect::<Vec<_>>();
    let json = serde_json::to_string_pretty(&pages)?;
    println!("{json}");
    Ok(())
}
