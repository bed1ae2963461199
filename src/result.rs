use geo::{coord, Rect};
use image::GrayImage;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

pub const BLANK_LABEL: &str = "Blank";
pub const TEXT_LABEL: &str = "Text";
pub const PICTURE_LABEL: &str = "Picture";
pub const FIGURE_LABEL: &str = "Figure";
pub const TABLE_LABEL: &str = "Table";
pub const FORMULA_LABEL: &str = "Formula";

/// A quadrilateral region with an optional detection confidence.
///
/// Corners are stored as `[x, y]` pairs. Rectangles built by this crate use the
/// order top-left, top-right, bottom-right, bottom-left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonBox {
    pub polygon: [[f32; 2]; 4],
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl PolygonBox {
    pub fn new(polygon: [[f32; 2]; 4]) -> Self {
        Self {
            polygon,
            confidence: None,
        }
    }

    pub fn from_bbox([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self::new([[x1, y1], [x2, y1], [x2, y2], [x1, y2]])
    }

    pub fn with_confidence(mut self, confidence: Option<f32>) -> Self {
        self.confidence = confidence;
        self
    }

    /// Axis-aligned extent of the polygon.
    pub fn rect(&self) -> Rect<f32> {
        let [min_x, min_y, max_x, max_y] = self.bbox();
        Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y })
    }

    /// `[min_x, min_y, max_x, max_y]`
    pub fn bbox(&self) -> [f32; 4] {
        self.polygon.iter().fold(
            [f32::MAX, f32::MAX, f32::MIN, f32::MIN],
            |[x1, y1, x2, y2], &[x, y]| [x1.min(x), y1.min(y), x2.max(x), y2.max(y)],
        )
    }

    pub fn area(&self) -> f32 {
        let rect = self.rect();
        rect.width() * rect.height()
    }

    /// Maps the polygon from an image of `from_size` to one of `to_size`, both `(width, height)`.
    pub fn rescale(self, from_size: (u32, u32), to_size: (u32, u32)) -> Self {
        let scale_x = to_size.0 as f32 / from_size.0 as f32;
        let scale_y = to_size.1 as f32 / from_size.1 as f32;
        Self {
            polygon: self.polygon.map(|[x, y]| [x * scale_x, y * scale_y]),
            ..self
        }
    }

    /// Clamps every corner into `[x1, y1, x2, y2]`.
    pub fn fit_to_bounds(self, [x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self {
            polygon: self
                .polygon
                .map(|[x, y]| [x.min(x2).max(x1), y.min(y2).max(y1)]),
            ..self
        }
    }

    pub fn intersection_area(&self, other: &PolygonBox) -> f32 {
        let (a, b) = (self.rect(), other.rect());
        let x_overlap = (a.max().x.min(b.max().x) - a.min().x.max(b.min().x)).max(0.0);
        let y_overlap = (a.max().y.min(b.max().y) - a.min().y.max(b.min().y)).max(0.0);
        x_overlap * y_overlap
    }

    /// Fraction of this box's area covered by `other`.
    pub fn intersection_pct(&self, other: &PolygonBox) -> f32 {
        let area = self.area();
        if area == 0.0 {
            return 0.0;
        }
        self.intersection_area(other) / area
    }

    /// Whether this box's extent lies fully inside `other`'s.
    pub(crate) fn is_contained_in(&self, other: &PolygonBox) -> bool {
        let [x1, y1, x2, y2] = self.bbox();
        let [ox1, oy1, ox2, oy2] = other.bbox();
        x1 >= ox1 && y1 >= oy1 && x2 <= ox2 && y2 <= oy2
    }
}

impl AsRef<PolygonBox> for PolygonBox {
    fn as_ref(&self) -> &PolygonBox {
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutBox {
    pub bounds: PolygonBox,
    pub label: String,
}

impl LayoutBox {
    pub fn new(bounds: PolygonBox, label: impl Into<String>) -> Self {
        Self {
            bounds,
            label: label.into(),
        }
    }

    pub fn confidence(&self) -> Option<f32> {
        self.bounds.confidence
    }
}

impl AsRef<PolygonBox> for LayoutBox {
    fn as_ref(&self) -> &PolygonBox {
        &self.bounds
    }
}

/// Text lines and column separators found by a separate line detector, in
/// original image coordinates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextDetectionResult {
    pub bboxes: Vec<PolygonBox>,
    #[serde(default)]
    pub vertical_lines: Vec<PolygonBox>,
}

/// Raw model output for a single image.
#[derive(Debug, Clone)]
pub struct ImageHeatmaps {
    /// One probability map per label, indexed `[y, x]`.
    pub heatmaps: Vec<Array2<f32>>,
    /// `(width, height)` of the source image.
    pub orig_size: (u32, u32),
}

#[derive(Debug, Clone)]
pub struct LayoutResult {
    pub bboxes: Vec<LayoutBox>,
    pub segmentation_map: GrayImage,
    pub heatmaps: Vec<Array2<f32>>,
    pub image_bbox: [f32; 4],
}
