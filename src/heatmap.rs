//! Turns a single class heatmap into polygons.
//!
//! The map is binarized at a low threshold, split into 4-connected components,
//! and every component whose peak clears the high threshold becomes a rotated
//! rectangle around its slightly dilated pixels.

use float_ord::FloatOrd;
use geo::{BoundingRect, EuclideanLength, Line, MinimumRotatedRect, MultiPoint, Point};
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::{
    distance_transform::Norm,
    morphology::dilate_mut,
    region_labelling::{connected_components, Connectivity},
};
use ndarray::ArrayView2;
use tracing::instrument;

use crate::{util::binary_mask, PolygonBox};

const MIN_COMPONENT_SIZE: u32 = 10;
const MIN_PEAK_NORMALIZER: f32 = 0.25;
const SQUARE_RATIO_TOLERANCE: f32 = 0.1;

type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

#[derive(Debug, Clone, Copy)]
struct Component {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    size: u32,
    peak: f32,
}

impl Component {
    const EMPTY: Self = Self {
        min_x: u32::MAX,
        min_y: u32::MAX,
        max_x: 0,
        max_y: 0,
        size: 0,
        peak: f32::MIN,
    };

    fn add(&mut self, x: u32, y: u32, value: f32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.size += 1;
        self.peak = self.peak.max(value);
    }
}

/// Extracts one box per connected region of `heatmap` above `low_text` whose
/// peak reaches `text_threshold`.
///
/// Boxes are in heatmap pixel coordinates. Confidence is the region peak
/// normalized by the strongest peak found (floored at 0.25).
#[instrument(skip(heatmap), level = "trace")]
pub fn get_detected_boxes(
    heatmap: ArrayView2<f32>,
    text_threshold: f32,
    low_text: f32,
) -> Vec<PolygonBox> {
    let mask = binary_mask(heatmap, low_text);
    let labels = connected_components(&mask, Connectivity::Four, Luma([0u8]));
    let components = component_stats(&labels, heatmap);

    let detections = components
        .iter()
        .enumerate()
        .filter(|(_, component)| {
            component.size >= MIN_COMPONENT_SIZE && component.peak >= text_threshold
        })
        .filter_map(|(index, component)| {
            let polygon = component_box(&labels, index as u32 + 1, component)?;
            Some((polygon, component.peak))
        })
        .collect::<Vec<_>>();
    log::trace!(
        "{} of {} components kept",
        detections.len(),
        components.len()
    );

    let normalizer = detections
        .iter()
        .map(|(_, peak)| FloatOrd(*peak))
        .max()
        .map_or(0.0, |peak| peak.0)
        .max(MIN_PEAK_NORMALIZER);
    detections
        .into_iter()
        .map(|(polygon, peak)| PolygonBox::new(polygon).with_confidence(Some(peak / normalizer)))
        .collect()
}

/// Detects boxes at `processor_size` and maps them into an image of
/// `image_size`, dropping any box contained in another.
#[instrument(skip(heatmap), level = "trace")]
pub fn get_and_clean_boxes(
    heatmap: ArrayView2<f32>,
    processor_size: (u32, u32),
    image_size: (u32, u32),
    text_threshold: f32,
    low_text: f32,
) -> Vec<PolygonBox> {
    let bounds = [0.0, 0.0, image_size.0 as f32, image_size.1 as f32];
    let boxes = get_detected_boxes(heatmap, text_threshold, low_text)
        .into_iter()
        .map(|bbox| bbox.rescale(processor_size, image_size).fit_to_bounds(bounds))
        .collect();
    clean_contained_boxes(boxes)
}

/// Drops every box whose extent lies inside a different box.
pub fn clean_contained_boxes<B: AsRef<PolygonBox>>(boxes: Vec<B>) -> Vec<B> {
    retain_uncovered(boxes, |_, _| true)
}

/// Drops every box whose extent lies inside a different, strictly larger box.
pub fn keep_largest_boxes<B: AsRef<PolygonBox>>(boxes: Vec<B>) -> Vec<B> {
    retain_uncovered(boxes, |inner, outer| inner.area() < outer.area())
}

fn retain_uncovered<B: AsRef<PolygonBox>>(
    boxes: Vec<B>,
    covers: impl Fn(&PolygonBox, &PolygonBox) -> bool,
) -> Vec<B> {
    let keep = boxes
        .iter()
        .enumerate()
        .map(|(i, inner)| {
            let inner = inner.as_ref();
            !boxes.iter().enumerate().any(|(j, outer)| {
                let outer = outer.as_ref();
                i != j
                    && inner.bbox() != outer.bbox()
                    && inner.is_contained_in(outer)
                    && covers(inner, outer)
            })
        })
        .collect::<Vec<_>>();
    boxes
        .into_iter()
        .zip(keep)
        .filter_map(|(bbox, keep)| keep.then_some(bbox))
        .collect()
}

fn component_stats(labels: &LabelImage, heatmap: ArrayView2<f32>) -> Vec<Component> {
    let mut components = Vec::new();
    for (x, y, &Luma([label])) in labels.enumerate_pixels() {
        if label == 0 {
            continue;
        }
        let index = label as usize - 1;
        if index >= components.len() {
            components.resize(index + 1, Component::EMPTY);
        }
        components[index].add(x, y, heatmap[[y as usize, x as usize]]);
    }
    components
}

fn component_box(labels: &LabelImage, label: u32, component: &Component) -> Option<[[f32; 2]; 4]> {
    let width = component.max_x - component.min_x + 1;
    let height = component.max_y - component.min_y + 1;
    let niter = (width.min(height) as f32).sqrt() as u32;

    let sx = component.min_x.saturating_sub(niter);
    let sy = component.min_y.saturating_sub(niter);
    let ex = (component.max_x + niter + 2).min(labels.width());
    let ey = (component.max_y + niter + 2).min(labels.height());

    let mut segment = GrayImage::from_fn(ex - sx, ey - sy, |x, y| {
        if labels.get_pixel(sx + x, sy + y)[0] == label {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    let radius = ((niter + 1) / 2).min(u8::MAX as u32) as u8;
    dilate_mut(&mut segment, Norm::LInf, radius);

    let points = segment
        .enumerate_pixels()
        .filter(|(_, _, pixel)| pixel[0] != 0)
        .map(|(x, y, _)| Point::new((sx + x) as f32, (sy + y) as f32))
        .collect::<MultiPoint<f32>>();

    let rect = points.minimum_rotated_rect()?;
    let mut corners: [[f32; 2]; 4] = rect
        .exterior()
        .coords()
        .take(4)
        .map(|coord| [coord.x, coord.y])
        .collect::<Vec<_>>()
        .try_into()
        .ok()?;

    let side_a = Line::new(corners[0], corners[1]).euclidean_length();
    let side_b = Line::new(corners[1], corners[2]).euclidean_length();
    let ratio = side_a.max(side_b) / (side_a.min(side_b) + 1e-5);
    if (1.0 - ratio).abs() <= SQUARE_RATIO_TOLERANCE {
        // near-square rotated rects are unstable, use the plain extent
        let extent = points.bounding_rect()?;
        let (min, max) = (extent.min(), extent.max());
        corners = [[min.x, min.y], [max.x, min.y], [max.x, max.y], [min.x, max.y]];
    }

    Some(clockwise_from_top_left(corners))
}

/// Orders corners clockwise in image space (y pointing down), starting with the
/// corner closest to the origin.
fn clockwise_from_top_left(mut corners: [[f32; 2]; 4]) -> [[f32; 2]; 4] {
    let signed_area = (0..4)
        .map(|i| {
            let [x1, y1] = corners[i];
            let [x2, y2] = corners[(i + 1) % 4];
            x1 * y2 - x2 * y1
        })
        .sum::<f32>();
    if signed_area < 0.0 {
        corners.reverse();
    }
    let start = corners
        .iter()
        .enumerate()
        .min_by_key(|(_, [x, y])| FloatOrd(x + y))
        .map_or(0, |(index, _)| index);
    corners.rotate_left(start);
    corners
}
