use std::path::PathBuf;

use image::DynamicImage;
use layout_net::LayoutNet;
use tracing::instrument;

mod error;
pub mod heatmap;
pub mod layout_net;
pub mod regions;
mod result;
pub mod util;

pub use error::*;
pub use result::*;

pub use ort as runtime;

use regions::{get_regions, get_regions_from_detection_result, segment_assignment, stack_heatmaps};
use util::segmentation_image;

/// Anything that turns page images into per-label probability maps.
pub trait HeatmapModel {
    /// Label names in heatmap order. Index 0 is the blank class.
    fn labels(&self) -> &[String];

    /// Runs the model over all images, returning one entry per image in order.
    fn batch_detection(&self, images: &[DynamicImage]) -> Result<Vec<ImageHeatmaps>>;
}

/// Runs `model` over `images` and turns the heatmaps into labeled regions.
///
/// When `detection_results` is non-empty it must hold one entry per image, and
/// the regions are reconciled against those text lines. Otherwise (`None` or an
/// empty slice) regions come from the heatmaps alone.
#[instrument(skip_all, fields(images = images.len()))]
pub fn batch_layout_detection<M: HeatmapModel + ?Sized>(
    model: &M,
    images: &[DynamicImage],
    detection_results: Option<&[TextDetectionResult]>,
    options: &LayoutOptions,
) -> Result<Vec<LayoutResult>> {
    let detection_results = detection_results.filter(|results| !results.is_empty());
    if let Some(results) = detection_results {
        if results.len() != images.len() {
            return Err(LayoutError::DetectionResultCount {
                images: images.len(),
                results: results.len(),
            });
        }
    }

    let predictions = model.batch_detection(images)?;
    if predictions.len() != images.len() {
        return Err(LayoutError::PredictionCount {
            images: images.len(),
            predictions: predictions.len(),
        });
    }
    let labels = model.labels();

    predictions
        .into_iter()
        .enumerate()
        .map(|(i, ImageHeatmaps { heatmaps, orig_size })| -> Result<LayoutResult> {
            let logits = stack_heatmaps(&heatmaps)?;
            let assignment = segment_assignment(logits.view());

            let bboxes = match detection_results {
                Some(results) => get_regions_from_detection_result(
                    &results[i],
                    &heatmaps,
                    orig_size,
                    labels,
                    assignment.view(),
                    options,
                )?,
                None => get_regions(&heatmaps, orig_size, labels, assignment.view(), options)?,
            };
            log::debug!("Image {i}: {} regions", bboxes.len());

            Ok(LayoutResult {
                bboxes,
                segmentation_map: segmentation_image(assignment.view()),
                heatmaps,
                image_bbox: [0.0, 0.0, orig_size.0 as f32, orig_size.1 as f32],
            })
        })
        .collect()
}

pub struct LayoutDetectorBuilder {
    threads: usize,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_size: (u32, u32),
    batch_size: usize,
    cache_path: Option<PathBuf>,
    execution_providers: Vec<ExecutionProvider>,
    options: LayoutOptions,
}

impl LayoutDetectorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn model(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    /// Newline separated label names, blank class first.
    pub fn labels(mut self, path: impl Into<PathBuf>) -> Self {
        self.labels_path = Some(path.into());
        self
    }

    pub fn input_size(mut self, width: u32, height: u32) -> Self {
        self.input_size = (width, height);
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn options(mut self, options: LayoutOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_engine_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_execution_providers(
        mut self,
        providers: impl IntoIterator<Item = ExecutionProvider>,
    ) -> Self {
        self.execution_providers = providers.into_iter().collect();
        self
    }

    #[instrument(skip(self))]
    pub fn build(mut self) -> Result<LayoutDetector> {
        let model_path = self
            .model_path
            .take()
            .unwrap_or_else(|| "models/layout/model.onnx".into());
        let model = LayoutNet::init(
            model_path,
            self.labels_path.take(),
            self.threads,
            self.input_size,
            self.batch_size,
            &self.execution_providers,
            self.cache_path.take(),
        )?;
        Ok(LayoutDetector {
            model,
            options: self.options,
        })
    }
}

impl Default for LayoutDetectorBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            model_path: None,
            labels_path: None,
            input_size: (1024, 1024),
            batch_size: 4,
            cache_path: None,
            execution_providers: DEFAULT_PROVIDERS.to_vec(),
            options: LayoutOptions::default(),
        }
    }
}

pub struct LayoutDetector {
    model: LayoutNet,
    options: LayoutOptions,
}

impl LayoutDetector {
    pub fn labels(&self) -> &[String] {
        self.model.labels()
    }

    #[instrument(skip_all)]
    pub fn detect(
        &self,
        images: &[DynamicImage],
        detection_results: Option<&[TextDetectionResult]>,
    ) -> Result<Vec<LayoutResult>> {
        batch_layout_detection(&self.model, images, detection_results, &self.options)
    }
}

/// Thresholds used when turning heatmaps into regions.
#[derive(Debug, Clone, Copy)]
pub struct LayoutOptions {
    /// Padding added to the right of every vertical separator, in heatmap pixels.
    pub vertical_line_width: f32,
    /// Pixels where the blank class reaches this probability are cleared.
    pub blank_threshold: f32,
    /// Peak a region needs to be detected when reconciling with text lines.
    pub text_threshold: f32,
    /// Binarization threshold when reconciling with text lines.
    pub low_text: f32,
    /// Peak a region needs to be detected without text lines.
    pub region_text_threshold: f32,
    /// Binarization threshold without text lines.
    pub region_low_text: f32,
    pub min_candidate_area: f32,
    pub min_confidence: f32,
    /// Share of a line's area a region must cover to claim it.
    pub line_overlap: f32,
    pub unclaimed_line_confidence: f32,
    pub min_output_area: f32,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            vertical_line_width: 20.0,
            blank_threshold: 0.5,
            text_threshold: 0.9,
            low_text: 0.8,
            region_text_threshold: 0.8,
            region_low_text: 0.7,
            min_candidate_area: 25.0,
            min_confidence: 0.3,
            line_overlap: 0.5,
            unclaimed_line_confidence: 0.5,
            min_output_area: 16.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "tensorrt")]
    TensorRT,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "directml")]
    DirectML,
}

const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "tensorrt")]
    ExecutionProvider::TensorRT,
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "directml")]
    ExecutionProvider::DirectML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];
