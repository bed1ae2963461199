use thiserror::Error;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("heatmap shape {heatmap:?} does not match segment assignment shape {assignment:?}")]
    ShapeMismatch {
        heatmap: (usize, usize),
        assignment: (usize, usize),
    },
    #[error("model produced {heatmaps} heatmaps for {labels} labels")]
    LabelCount { labels: usize, heatmaps: usize },
    #[error("no heatmaps to extract regions from")]
    EmptyHeatmaps,
    #[error("got {results} text detection results for {images} images")]
    DetectionResultCount { images: usize, results: usize },
    #[error("model returned {predictions} predictions for {images} images")]
    PredictionCount { images: usize, predictions: usize },
    #[error("model session produced no outputs")]
    MissingOutput,
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
    #[error(transparent)]
    Runtime(#[from] ort::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = LayoutError> = std::result::Result<T, E>;
