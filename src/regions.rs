use std::{cmp::Reverse, collections::HashSet};

use float_ord::FloatOrd;
use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, ArrayViewMut2, Axis, Zip};
use tracing::instrument;

use crate::{
    heatmap::{get_and_clean_boxes, get_detected_boxes, keep_largest_boxes},
    util::{bbox_avg, compute_integral_image},
    LayoutBox, LayoutError, LayoutOptions, PolygonBox, Result, TextDetectionResult,
    FIGURE_LABEL, FORMULA_LABEL, PICTURE_LABEL, TABLE_LABEL, TEXT_LABEL,
};

/// Stacks per-class heatmaps into a `[class, y, x]` array.
pub fn stack_heatmaps(heatmaps: &[Array2<f32>]) -> Result<Array3<f32>> {
    if heatmaps.is_empty() {
        return Err(LayoutError::EmptyHeatmaps);
    }
    let views = heatmaps.iter().map(|it| it.view()).collect::<Vec<_>>();
    Ok(ndarray::stack(Axis(0), &views)?)
}

/// Index of the most probable class at every pixel. Ties go to the lowest index.
pub fn segment_assignment(logits: ArrayView3<f32>) -> Array2<usize> {
    logits.map_axis(Axis(0), |lane| {
        lane.iter()
            .enumerate()
            .min_by_key(|(_, value)| Reverse(FloatOrd(**value)))
            .map_or(0, |(index, _)| index)
    })
}

/// Zeroes every class heatmap wherever another class won the segment assignment.
pub fn mask_to_segments(logits: &mut Array3<f32>, assignment: ArrayView2<usize>) -> Result<()> {
    for (class, heatmap) in logits.outer_iter_mut().enumerate() {
        zero_outside_segment(heatmap, assignment, class)?;
    }
    Ok(())
}

fn zero_outside_segment(
    heatmap: ArrayViewMut2<f32>,
    assignment: ArrayView2<usize>,
    class: usize,
) -> Result<()> {
    if heatmap.dim() != assignment.dim() {
        return Err(LayoutError::ShapeMismatch {
            heatmap: heatmap.dim(),
            assignment: assignment.dim(),
        });
    }
    Zip::from(heatmap)
        .and(assignment)
        .for_each(|value, &segment| {
            if segment != class {
                *value = 0.0;
            }
        });
    Ok(())
}

fn check_label_count(labels: &[String], heatmaps: &[Array2<f32>]) -> Result<()> {
    if labels.is_empty() {
        return Err(LayoutError::EmptyHeatmaps);
    }
    if labels.len() != heatmaps.len() {
        return Err(LayoutError::LabelCount {
            labels: labels.len(),
            heatmaps: heatmaps.len(),
        });
    }
    Ok(())
}

/// Extracts labeled regions straight from the heatmaps, in original image
/// coordinates. Confidence is left unset.
#[instrument(skip_all, level = "debug")]
pub fn get_regions(
    heatmaps: &[Array2<f32>],
    orig_size: (u32, u32),
    labels: &[String],
    assignment: ArrayView2<usize>,
    options: &LayoutOptions,
) -> Result<Vec<LayoutBox>> {
    check_label_count(labels, heatmaps)?;

    let mut regions = Vec::new();
    for (class, (heatmap, label)) in heatmaps.iter().zip(labels).enumerate().skip(1) {
        let mut heatmap = heatmap.clone();
        zero_outside_segment(heatmap.view_mut(), assignment, class)?;

        let (rows, cols) = heatmap.dim();
        let boxes = get_and_clean_boxes(
            heatmap.view(),
            (cols as u32, rows as u32),
            orig_size,
            options.region_text_threshold,
            options.region_low_text,
        );
        log::trace!("{} {label} regions", boxes.len());
        regions.extend(
            boxes
                .into_iter()
                .map(|bounds| LayoutBox::new(bounds.with_confidence(None), label.as_str())),
        );
    }

    Ok(keep_largest_boxes(regions))
}

/// Extracts regions and reconciles them with externally detected text lines.
///
/// Lines and vertical separators are expected in original image coordinates;
/// the returned boxes are in original image coordinates as well.
#[instrument(skip_all, level = "debug")]
pub fn get_regions_from_detection_result(
    detection_result: &TextDetectionResult,
    heatmaps: &[Array2<f32>],
    orig_size: (u32, u32),
    labels: &[String],
    assignment: ArrayView2<usize>,
    options: &LayoutOptions,
) -> Result<Vec<LayoutBox>> {
    check_label_count(labels, heatmaps)?;
    let mut logits = stack_heatmaps(heatmaps)?;
    let (_, rows, cols) = logits.dim();
    if rows == 0 || cols == 0 {
        return Err(LayoutError::EmptyHeatmaps);
    }
    let heatmap_size = (cols as u32, rows as u32);

    let lines = detection_result
        .bboxes
        .iter()
        .map(|line| line.clone().rescale(orig_size, heatmap_size))
        .collect::<Vec<_>>();

    // clear column rulings plus padding on their right
    for separator in &detection_result.vertical_lines {
        let [x1, y1, x2, y2] = separator.clone().rescale(orig_size, heatmap_size).bbox();
        let (x1, x2) = (
            clamp_index(x1, cols),
            clamp_index(x2 + options.vertical_line_width, cols),
        );
        let (y1, y2) = (clamp_index(y1, rows), clamp_index(y2, rows));
        if x1 < x2 && y1 < y2 {
            logits.slice_mut(s![.., y1..y2, x1..x2]).fill(0.0);
        }
    }

    let blank = logits
        .index_axis(Axis(0), 0)
        .mapv(|probability| probability >= options.blank_threshold);
    Zip::from(logits.lanes_mut(Axis(0)))
        .and(&blank)
        .for_each(|mut lane, &is_blank| {
            if is_blank {
                lane.fill(0.0);
            }
        });

    mask_to_segments(&mut logits, assignment)?;

    let bounds = [0.0, 0.0, (cols - 1) as f32, (rows - 1) as f32];
    let mut candidates = Vec::new();
    for (class, label) in labels.iter().enumerate().skip(1) {
        let heatmap = logits.index_axis(Axis(0), class);
        let boxes = get_detected_boxes(heatmap, options.text_threshold, options.low_text);
        if boxes.is_empty() {
            continue;
        }
        let integral = compute_integral_image(heatmap);
        for bbox in boxes {
            if bbox.area() <= options.min_candidate_area {
                continue;
            }
            let bbox = bbox.fit_to_bounds(bounds);
            let [x1, y1, x2, y2] = bbox.bbox().map(|it| it as usize);
            let confidence = bbox_avg(integral.view(), x1, y1, x2, y2);
            if confidence <= options.min_confidence {
                continue;
            }
            candidates.push(LayoutBox::new(
                bbox.with_confidence(Some(confidence)),
                label.as_str(),
            ));
        }
    }
    log::debug!(
        "{} candidate regions, {} text lines",
        candidates.len(),
        lines.len()
    );

    Ok(reconcile_boxes(candidates, &lines, options)
        .into_iter()
        .map(|region| LayoutBox {
            bounds: region.bounds.rescale(heatmap_size, orig_size),
            ..region
        })
        .filter(|region| region.bounds.area() > options.min_output_area)
        .collect())
}

fn clamp_index(value: f32, len: usize) -> usize {
    (value.max(0.0) as usize).min(len)
}

/// Grows candidate regions over the text lines they cover.
///
/// Candidates are visited by descending confidence and claim lines first come,
/// first served. Regions without lines are dropped unless they are pictures or
/// formulas, and lines nobody claimed become text regions of their own. All
/// boxes stay in the coordinate space they were passed in.
pub fn reconcile_boxes(
    mut candidates: Vec<LayoutBox>,
    lines: &[PolygonBox],
    options: &LayoutOptions,
) -> Vec<LayoutBox> {
    candidates.sort_by_key(|candidate| Reverse(FloatOrd(candidate.confidence().unwrap_or(0.0))));
    let box_lines = assign_lines(&candidates, lines, options.line_overlap);
    let claimed = box_lines.iter().flatten().copied().collect::<HashSet<_>>();

    let mut regions = candidates
        .into_iter()
        .zip(&box_lines)
        .filter_map(|(candidate, line_indices)| {
            let covered = line_indices.iter().map(|&i| &lines[i]).collect::<Vec<_>>();
            expand_to_lines(candidate, &covered)
        })
        .collect::<Vec<_>>();

    regions.extend(
        lines
            .iter()
            .enumerate()
            .filter(|(index, _)| !claimed.contains(index))
            .map(|(_, line)| {
                LayoutBox::new(
                    line.clone()
                        .with_confidence(Some(options.unclaimed_line_confidence)),
                    TEXT_LABEL,
                )
            }),
    );
    regions
}

/// For every box (in the given order), the indices of the lines it claims.
///
/// A line goes to the first box covering at least `min_overlap` of the line's
/// area and is never handed out twice.
pub fn assign_lines(boxes: &[LayoutBox], lines: &[PolygonBox], min_overlap: f32) -> Vec<Vec<usize>> {
    let mut used = vec![false; lines.len()];
    let mut box_lines = Vec::with_capacity(boxes.len());
    for region in boxes {
        let mut claimed = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            if !used[index] && line.intersection_pct(&region.bounds) >= min_overlap {
                used[index] = true;
                claimed.push(index);
            }
        }
        box_lines.push(claimed);
    }
    box_lines
}

fn expand_to_lines(candidate: LayoutBox, lines: &[&PolygonBox]) -> Option<LayoutBox> {
    let LayoutBox { bounds, label } = candidate;
    if lines.is_empty() {
        return matches!(label.as_str(), PICTURE_LABEL | FORMULA_LABEL)
            .then_some(LayoutBox { bounds, label });
    }

    let label = if label == PICTURE_LABEL {
        FIGURE_LABEL.to_string()
    } else {
        label
    };
    let mut extent = lines.iter().map(|line| line.bbox()).reduce(union_bbox)?;
    // never smaller than the detected footprint
    if matches!(label.as_str(), FIGURE_LABEL | TABLE_LABEL | FORMULA_LABEL) {
        extent = union_bbox(extent, bounds.bbox());
    }
    Some(LayoutBox::new(
        PolygonBox::from_bbox(extent).with_confidence(bounds.confidence),
        label,
    ))
}

fn union_bbox(a: [f32; 4], b: [f32; 4]) -> [f32; 4] {
    [a[0].min(b[0]), a[1].min(b[1]), a[2].max(b[2]), a[3].max(b[3])]
}
