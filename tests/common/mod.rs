#![allow(dead_code)]

use image::DynamicImage;
use ndarray::{s, Array2};
use rapidlayout::{HeatmapModel, ImageHeatmaps, Result};

pub const BLANK: usize = 0;
pub const TEXT: usize = 1;
pub const PICTURE: usize = 2;

pub fn labels() -> Vec<String> {
    ["Blank", "Text", "Picture"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Half-open `x` and `y` ranges of `class` at `value` probability.
pub struct Block {
    pub class: usize,
    pub x: (usize, usize),
    pub y: (usize, usize),
    pub value: f32,
}

/// Heatmaps of `width` x `height` where everything outside the blocks is blank.
pub fn page(classes: usize, width: usize, height: usize, blocks: &[Block]) -> Vec<Array2<f32>> {
    let mut heatmaps = vec![Array2::<f32>::zeros((height, width)); classes];
    heatmaps[BLANK].fill(0.9);
    for block in blocks {
        let region = s![block.y.0..block.y.1, block.x.0..block.x.1];
        heatmaps[BLANK].slice_mut(region).fill(0.05);
        heatmaps[block.class].slice_mut(region).fill(block.value);
    }
    heatmaps
}

pub struct SyntheticModel {
    pub labels: Vec<String>,
    pub pages: Vec<ImageHeatmaps>,
}

impl SyntheticModel {
    pub fn single(heatmaps: Vec<Array2<f32>>, orig_size: (u32, u32)) -> Self {
        Self {
            labels: labels(),
            pages: vec![ImageHeatmaps {
                heatmaps,
                orig_size,
            }],
        }
    }
}

impl HeatmapModel for SyntheticModel {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn batch_detection(&self, images: &[DynamicImage]) -> Result<Vec<ImageHeatmaps>> {
        Ok(self.pages.iter().take(images.len()).cloned().collect())
    }
}

pub fn blank_images(count: usize, width: u32, height: u32) -> Vec<DynamicImage> {
    (0..count)
        .map(|_| DynamicImage::new_rgb8(width, height))
        .collect()
}

pub fn assert_bbox_near(actual: [f32; 4], expected: [f32; 4], tolerance: f32) {
    for (a, e) in actual.iter().zip(expected) {
        assert!(
            (a - e).abs() <= tolerance,
            "bbox {actual:?} differs from {expected:?} by more than {tolerance}"
        );
    }
}
