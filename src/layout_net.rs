use std::path::PathBuf;

use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{Axis, Ix4};
use ort::{inputs, ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::{
    util::{resize_heatmap, subtract_mean_normalize},
    ExecutionProvider, HeatmapModel, ImageHeatmaps, LayoutError, Result,
};

const MEAN_VALUES: [f32; 3] = [0.485, 0.456, 0.406];
const NORM_VALUES: [f32; 3] = [1.0 / 0.229, 1.0 / 0.224, 1.0 / 0.225];

const INPUT_NAME: &str = "pixel_values";

pub const DEFAULT_LABELS: &[&str] = &[
    "Blank",
    "Caption",
    "Footnote",
    "Formula",
    "List-item",
    "Page-footer",
    "Page-header",
    "Picture",
    "Figure",
    "Section-header",
    "Table",
    "Text",
    "Title",
];

/// Segmentation model producing one probability map per layout label.
pub struct LayoutNet {
    session: Session,
    labels: Vec<String>,
    input_size: (u32, u32),
    batch_size: usize,
}

#[cfg(feature = "tensorrt")]
fn setup_tensorrt(
    cache_path: PathBuf,
    (width, height): (u32, u32),
    batch_size: usize,
) -> ExecutionProviderDispatch {
    use ort::TensorRTExecutionProvider;

    TensorRTExecutionProvider::default()
        .with_profile_min_shapes(format!("{INPUT_NAME}:1x3x{height}x{width}"))
        .with_profile_max_shapes(format!("{INPUT_NAME}:{batch_size}x3x{height}x{width}"))
        .with_profile_opt_shapes(format!("{INPUT_NAME}:{batch_size}x3x{height}x{width}"))
        .with_engine_cache(true)
        .with_engine_cache_path(cache_path.to_string_lossy())
        .with_timing_cache(true)
        .with_builder_optimization_level(5)
        .build()
}

#[cfg(feature = "cuda")]
fn setup_cuda() -> ExecutionProviderDispatch {
    use ort::CUDAExecutionProvider;

    CUDAExecutionProvider::default().build()
}

#[cfg(feature = "directml")]
fn setup_directml() -> ExecutionProviderDispatch {
    use ort::DirectMLExecutionProvider;

    DirectMLExecutionProvider::default().build()
}

#[cfg(feature = "coreml")]
fn setup_coreml() -> ExecutionProviderDispatch {
    use ort::CoreMLExecutionProvider;

    CoreMLExecutionProvider::default().build()
}

impl LayoutNet {
    #[instrument(level = "debug")]
    pub fn init(
        path: PathBuf,
        labels_path: Option<PathBuf>,
        num_threads: usize,
        input_size: (u32, u32),
        batch_size: usize,
        execution_providers: &[ExecutionProvider],
        cache_path: Option<PathBuf>,
    ) -> Result<Self> {
        #[cfg(feature = "directml")]
        let parallel = execution_providers.contains(&ExecutionProvider::DirectML);
        #[cfg(not(feature = "directml"))]
        let parallel = true;

        let batch_size = batch_size.max(1);
        #[cfg(feature = "tensorrt")]
        let engine_cache = cache_path
            .clone()
            .or_else(|| path.parent().map(|parent| parent.join(".cache")))
            .unwrap_or_else(|| ".cache".into());

        let execution_providers = execution_providers.iter().filter_map(
            |provider| -> Option<ExecutionProviderDispatch> {
                match provider {
                    ExecutionProvider::Default => None,
                    #[cfg(feature = "tensorrt")]
                    ExecutionProvider::TensorRT => {
                        Some(setup_tensorrt(engine_cache.clone(), input_size, batch_size))
                    }
                    #[cfg(feature = "coreml")]
                    ExecutionProvider::CoreML => Some(setup_coreml()),
                    #[cfg(feature = "cuda")]
                    ExecutionProvider::Cuda => Some(setup_cuda()),
                    #[cfg(feature = "directml")]
                    ExecutionProvider::DirectML => Some(setup_directml()),
                }
            },
        );

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_memory_pattern(parallel)?
            .with_parallel_execution(parallel)?
            .with_inter_threads(num_threads)?
            .with_intra_threads(num_threads)?
            .with_execution_providers(execution_providers)?
            .commit_from_file(path)?;

        log::debug!("Layout inputs: {:?}", session.inputs);
        log::debug!("Layout outputs: {:?}", session.outputs);

        let labels = match labels_path {
            Some(labels_path) => std::fs::read_to_string(labels_path)?
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_LABELS.iter().map(|label| label.to_string()).collect(),
        };
        #[cfg(not(feature = "tensorrt"))]
        let _ = cache_path;

        Ok(Self {
            session,
            labels,
            input_size,
            batch_size,
        })
    }

    #[instrument(level = "trace", skip(self, images))]
    fn detect_chunk(&self, images: &[DynamicImage]) -> Result<Vec<ImageHeatmaps>> {
        let (width, height) = self.input_size;
        let inputs = images
            .iter()
            .map(|image| {
                let image = image.resize_exact(width, height, FilterType::Triangle);
                subtract_mean_normalize(&image, &MEAN_VALUES, &NORM_VALUES)
            })
            .collect::<Vec<_>>();
        let views = inputs.iter().map(|it| it.view()).collect::<Vec<_>>();
        let input_values = ndarray::stack(Axis(0), &views)?;

        let outputs = self.session.run(inputs![INPUT_NAME => input_values]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or(LayoutError::MissingOutput)?;
        let logits = output.try_extract_tensor::<f32>()?.into_dimensionality::<Ix4>()?;
        log::trace!("Layout output tensor size: {:?}", logits.dim());

        images
            .iter()
            .zip(logits.outer_iter())
            .map(|(image, maps)| {
                let heatmaps = maps
                    .outer_iter()
                    .map(|heatmap| resize_heatmap(heatmap, width, height))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ImageHeatmaps {
                    heatmaps,
                    orig_size: image.dimensions(),
                })
            })
            .collect()
    }
}

impl HeatmapModel for LayoutNet {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    #[instrument(level = "debug", skip(self, images))]
    fn batch_detection(&self, images: &[DynamicImage]) -> Result<Vec<ImageHeatmaps>> {
        let mut results = Vec::with_capacity(images.len());
        for chunk in images.chunks(self.batch_size) {
            results.extend(self.detect_chunk(chunk)?);
        }
        Ok(results)
    }
}
