mod common;

use common::*;
use ndarray::{array, Array3, Axis};
use rapidlayout::{
    regions::{
        assign_lines, get_regions, mask_to_segments, reconcile_boxes, segment_assignment,
        stack_heatmaps,
    },
    LayoutBox, LayoutError, LayoutOptions, PolygonBox,
};

fn region(label: &str, bbox: [f32; 4], confidence: f32) -> LayoutBox {
    LayoutBox::new(PolygonBox::from_bbox(bbox).with_confidence(Some(confidence)), label)
}

fn line(bbox: [f32; 4]) -> PolygonBox {
    PolygonBox::from_bbox(bbox)
}

#[test]
fn segment_ties_go_to_the_lowest_class() {
    let logits = stack_heatmaps(&[
        array![[0.5, 0.2], [0.1, 0.0]],
        array![[0.5, 0.7], [0.3, 0.0]],
        array![[0.1, 0.7], [0.3, 0.0]],
    ])
    .expect("stack");
    let assignment = segment_assignment(logits.view());
    assert_eq!(assignment, array![[0, 1], [1, 0]]);
}

#[test]
fn masking_leaves_only_the_winning_class() {
    let logits = Array3::from_shape_fn((4, 7, 9), |(c, y, x)| {
        ((c * 31 + y * 17 + x * 7) % 11) as f32 / 10.0
    });
    let assignment = segment_assignment(logits.view());
    let mut masked = logits.clone();
    mask_to_segments(&mut masked, assignment.view()).expect("shapes match");

    for ((y, x), &winner) in assignment.indexed_iter() {
        for (class, heatmap) in masked.axis_iter(Axis(0)).enumerate() {
            if class == winner {
                assert_eq!(heatmap[[y, x]], logits[[class, y, x]]);
            } else {
                assert_eq!(heatmap[[y, x]], 0.0, "class {class} at ({x}, {y})");
            }
        }
    }
}

#[test]
fn masking_rejects_mismatched_shapes() {
    let mut logits = Array3::<f32>::zeros((2, 4, 4));
    let assignment = ndarray::Array2::<usize>::zeros((4, 5));
    let err = mask_to_segments(&mut logits, assignment.view()).unwrap_err();
    assert!(matches!(err, LayoutError::ShapeMismatch { .. }));
}

#[test]
fn unconstrained_regions_reject_mismatched_assignment() {
    let heatmaps = page(3, 20, 20, &[]);
    let assignment = ndarray::Array2::<usize>::zeros((20, 21));
    let err = get_regions(
        &heatmaps,
        (40, 40),
        &labels(),
        assignment.view(),
        &LayoutOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        LayoutError::ShapeMismatch {
            heatmap: (20, 20),
            assignment: (20, 21)
        }
    ));
}

#[test]
fn stacking_nothing_is_an_error() {
    assert!(matches!(
        stack_heatmaps(&[]),
        Err(LayoutError::EmptyHeatmaps)
    ));
}

#[test]
fn each_line_is_claimed_once_by_the_first_box() {
    let boxes = [
        region("Text", [0.0, 0.0, 100.0, 50.0], 0.9),
        region("Table", [0.0, 0.0, 100.0, 100.0], 0.8),
    ];
    let lines = [
        line([10.0, 10.0, 90.0, 20.0]),
        line([10.0, 60.0, 90.0, 70.0]),
        line([10.0, 40.0, 90.0, 60.0]),
        line([200.0, 200.0, 220.0, 210.0]),
    ];
    let claims = assign_lines(&boxes, &lines, 0.5);
    // the third line is half inside the first box, which reaches the threshold
    assert_eq!(claims, vec![vec![0, 2], vec![1]]);
}

#[test]
fn higher_confidence_claims_first_regardless_of_input_order() {
    let candidates = vec![
        region("Table", [0.0, 0.0, 100.0, 100.0], 0.6),
        region("Text", [0.0, 0.0, 100.0, 30.0], 0.9),
    ];
    let lines = [line([10.0, 10.0, 90.0, 20.0])];
    let regions = reconcile_boxes(candidates, &lines, &LayoutOptions::default());

    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].label, "Text");
    assert_eq!(regions[0].confidence(), Some(0.9));
    assert_eq!(regions[0].bounds.bbox(), [10.0, 10.0, 90.0, 20.0]);
}

#[test]
fn region_shrinks_to_the_lines_it_covers() {
    let candidates = vec![region("Text", [0.0, 0.0, 100.0, 100.0], 0.7)];
    let lines = [line([10.0, 10.0, 50.0, 20.0]), line([15.0, 30.0, 80.0, 40.0])];
    let regions = reconcile_boxes(candidates, &lines, &LayoutOptions::default());

    assert_eq!(regions.len(), 1);
    assert_eq!(
        regions[0].bounds.polygon,
        [[10.0, 10.0], [80.0, 10.0], [80.0, 40.0], [10.0, 40.0]]
    );
}

#[test]
fn tables_keep_their_own_extent() {
    let candidates = vec![region("Table", [0.0, 0.0, 60.0, 60.0], 0.7)];
    let lines = [line([10.0, 10.0, 70.0, 20.0])];
    let regions = reconcile_boxes(candidates, &lines, &LayoutOptions::default());

    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].label, "Table");
    assert_eq!(regions[0].bounds.bbox(), [0.0, 0.0, 70.0, 60.0]);
}

#[test]
fn picture_with_lines_becomes_figure() {
    let candidates = vec![region("Picture", [0.0, 0.0, 60.0, 60.0], 0.7)];
    let lines = [line([30.0, 50.0, 90.0, 70.0])];
    let regions = reconcile_boxes(candidates, &lines, &LayoutOptions::default());

    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].label, "Figure");
    assert_eq!(regions[0].bounds.bbox(), [0.0, 0.0, 90.0, 70.0]);
}

#[test]
fn pictures_and_formulas_are_kept_without_lines() {
    let picture = region("Picture", [0.0, 0.0, 60.0, 60.0], 0.7);
    let candidates = vec![
        picture.clone(),
        region("Formula", [100.0, 0.0, 160.0, 20.0], 0.6),
        region("Text", [0.0, 100.0, 60.0, 120.0], 0.9),
        region("Table", [100.0, 100.0, 160.0, 160.0], 0.8),
    ];
    let regions = reconcile_boxes(candidates, &[], &LayoutOptions::default());

    let labels = regions.iter().map(|it| it.label.as_str()).collect::<Vec<_>>();
    assert_eq!(labels, ["Picture", "Formula"]);
    assert_eq!(regions[0], picture);
}

#[test]
fn unclaimed_lines_become_text() {
    let candidates = vec![region("Text", [0.0, 0.0, 50.0, 50.0], 0.9)];
    let lines = [line([10.0, 10.0, 40.0, 20.0]), line([100.0, 100.0, 140.0, 110.0])];
    let regions = reconcile_boxes(candidates, &lines, &LayoutOptions::default());

    assert_eq!(regions.len(), 2);
    assert_eq!(regions[1].label, "Text");
    assert_eq!(regions[1].confidence(), Some(0.5));
    assert_eq!(regions[1].bounds, lines[1].clone().with_confidence(Some(0.5)));
}
