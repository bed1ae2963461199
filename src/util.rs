use std::path::{Path, PathBuf};

use image::{imageops, imageops::FilterType, DynamicImage, GrayImage, ImageBuffer, Luma, Pixel, Rgb};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use tracing::instrument;

use crate::{LayoutError, Result};

#[instrument(level = "debug", skip(image))]
pub(crate) fn subtract_mean_normalize(
    image: &DynamicImage,
    mean_vals: &[f32; 3],
    norm_vals: &[f32; 3],
) -> Array3<f32> {
    let mut image = image.to_rgb32f();
    let norm = Rgb::<f32>(*norm_vals);
    let mean_vals = Rgb::<f32>(*mean_vals).map2(&norm, |c1, c2| c1 * c2);
    for pixel in image.pixels_mut() {
        *pixel = pixel
            .map2(&norm, |c1, c2| c1 * c2)
            .map2(&mean_vals, |c1, c2| c1 - c2);
    }
    Array3::<f32>::from_shape_fn(
        (3, image.height() as usize, image.width() as usize),
        |(ch, y, x)| image.get_pixel(x as u32, y as u32).channels()[ch],
    )
}

/// White wherever the heatmap is strictly above `threshold`.
pub(crate) fn binary_mask(heatmap: ArrayView2<f32>, threshold: f32) -> GrayImage {
    let (height, width) = heatmap.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        if heatmap[[y as usize, x as usize]] > threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Bilinearly resizes a heatmap to `width` x `height`.
pub(crate) fn resize_heatmap(
    heatmap: ArrayView2<f32>,
    width: u32,
    height: u32,
) -> Result<Array2<f32>> {
    let (rows, cols) = heatmap.dim();
    if rows == height as usize && cols == width as usize {
        return Ok(heatmap.to_owned());
    }
    let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_raw(cols as u32, rows as u32, heatmap.iter().copied().collect())
            .ok_or(LayoutError::EmptyHeatmaps)?;
    let resized = imageops::resize(&buffer, width, height, FilterType::Triangle);
    Ok(Array2::from_shape_vec(
        (height as usize, width as usize),
        resized.into_raw(),
    )?)
}

/// Encodes a class index map as an 8 bit grayscale image. Indices above 255
/// saturate to 255.
pub fn segmentation_image(assignment: ArrayView2<usize>) -> GrayImage {
    let (height, width) = assignment.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        Luma([u8::try_from(assignment[[y as usize, x as usize]]).unwrap_or(u8::MAX)])
    })
}

/// `<index>_<stem>.png`, the file name of the `index`th image's segmentation map.
pub fn segmentation_file_name(index: usize, image: &Path) -> PathBuf {
    let stem = image.file_stem().unwrap_or(image.as_os_str());
    PathBuf::from(format!("{index}_{}.png", stem.to_string_lossy()))
}

/// Two dimensional prefix sum: cell `(y, x)` holds the sum of all values at
/// rows `<= y` and columns `<= x`.
pub fn compute_integral_image(heatmap: ArrayView2<f32>) -> Array2<f64> {
    let mut integral = heatmap.mapv(f64::from);
    integral.accumulate_axis_inplace(Axis(0), |&prev, curr| *curr += prev);
    integral.accumulate_axis_inplace(Axis(1), |&prev, curr| *curr += prev);
    integral
}

/// Mean heatmap value over the closed box `[x1, x2] x [y1, y2]`.
///
/// Zero-area boxes and boxes starting outside the map average to 0. The far
/// corner is clamped to the map.
pub fn bbox_avg(integral: ArrayView2<f64>, x1: usize, y1: usize, x2: usize, y2: usize) -> f32 {
    let (height, width) = integral.dim();
    if x2 <= x1 || y2 <= y1 || x1 >= width || y1 >= height {
        return 0.0;
    }
    let x2 = x2.min(width - 1);
    let y2 = y2.min(height - 1);

    let total = integral[[y2, x2]];
    let above = if y1 > 0 { integral[[y1 - 1, x2]] } else { 0.0 };
    let left = if x1 > 0 { integral[[y2, x1 - 1]] } else { 0.0 };
    let above_left = if x1 > 0 && y1 > 0 {
        integral[[y1 - 1, x1 - 1]]
    } else {
        0.0
    };
    let sum = total - above - left + above_left;
    let count = ((x2 - x1 + 1) * (y2 - y1 + 1)) as f64;
    (sum / count) as f32
}
