//! Alignment heatmaps as RGB images.

use crate::error::{OutputError, Result};
use image::RgbImage;
use ndarray::{Array3, ArrayView2};
use ndarray_stats::QuantileExt;

/// Viridis anchors, sampled at 0, 0.25, 0.5, 0.75 and 1.
const VIRIDIS: [[f32; 3]; 5] = [
    [68.0, 1.0, 84.0],
    [59.0, 82.0, 139.0],
    [33.0, 145.0, 140.0],
    [94.0, 201.0, 98.0],
    [253.0, 231.0, 37.0],
];

fn colormap(v: f32) -> [u8; 3] {
    let x = v.clamp(0.0, 1.0) * (VIRIDIS.len() - 1) as f32;
    let lo = (x.floor() as usize).min(VIRIDIS.len() - 2);
    let frac = x - lo as f32;
    let (a, b) = (VIRIDIS[lo], VIRIDIS[lo + 1]);
    [0, 1, 2].map(|c| (a[c] + (b[c] - a[c]) * frac).round() as u8)
}

/// Render an alignment `(T_text, T_mel)` as an HWC image.
///
/// Columns are decoder timesteps, rows are encoder timesteps with the first
/// token at the bottom. Values are scaled by the matrix maximum.
pub fn plot_alignment(alignment: ArrayView2<f32>) -> Result<RgbImage> {
    let max = *alignment.max()?;
    let scale = if max > 0.0 { 1.0 / max } else { 0.0 };
    let (height, width) = alignment.dim();

    let mut hwc = Array3::<u8>::zeros((height, width, 3));
    for ((row, col), &v) in alignment.indexed_iter() {
        let rgb = colormap(v * scale);
        for (c, &value) in rgb.iter().enumerate() {
            hwc[[height - 1 - row, col, c]] = value;
        }
    }

    hwc_to_image(hwc)
}

/// Render a mel-spectrogram `(n_mel, T)` as an HWC image, lowest band at
/// the bottom. Values are min-max scaled.
pub fn plot_spectrogram(mel: ArrayView2<f32>) -> Result<RgbImage> {
    let (min, max) = (*mel.min()?, *mel.max()?);
    let range = max - min;
    let scale = if range > 0.0 { 1.0 / range } else { 0.0 };
    let (height, width) = mel.dim();

    let mut hwc = Array3::<u8>::zeros((height, width, 3));
    for ((row, col), &v) in mel.indexed_iter() {
        let rgb = colormap((v - min) * scale);
        for (c, &value) in rgb.iter().enumerate() {
            hwc[[height - 1 - row, col, c]] = value;
        }
    }

    hwc_to_image(hwc)
}

/// Wrap an `(H, W, 3)` array as an image.
pub fn hwc_to_image(hwc: Array3<u8>) -> Result<RgbImage> {
    let (height, width, _) = hwc.dim();
    let (width, height) = (width as u32, height as u32);
    let raw = hwc.as_standard_layout().iter().copied().collect::<Vec<_>>();
    let len = raw.len();

    RgbImage::from_raw(width, height, raw)
        .ok_or_else(|| OutputError::ImageBuffer { len, width, height }.into())
}

/// Copy an image into an `(H, W, 3)` array.
pub fn image_to_hwc(image: &RgbImage) -> Result<Array3<u8>> {
    let (width, height) = image.dimensions();
    Ok(Array3::from_shape_vec(
        (height as usize, width as usize, 3),
        image.as_raw().clone(),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    #[test]
    fn colormap_endpoints() {
        assert_eq!(colormap(0.0), [68, 1, 84]);
        assert_eq!(colormap(1.0), [253, 231, 37]);
        assert_eq!(colormap(2.0), colormap(1.0));
    }

    #[test]
    fn first_token_drawn_at_bottom() {
        // (T_text = 2, T_mel = 3), token 0 owns the first frame
        let alignment = array![[1.0_f32, 0.0, 0.0], [0.0, 1.0, 1.0]];

        let image = plot_alignment(alignment.view()).unwrap();

        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(0, 1).0, [253, 231, 37]);
        assert_eq!(image.get_pixel(0, 0).0, [68, 1, 84]);
        assert_eq!(image.get_pixel(2, 0).0, [253, 231, 37]);
    }

    #[test]
    fn hwc_round_trip_keeps_layout() {
        let image = plot_alignment(Array2::<f32>::eye(4).view()).unwrap();

        let hwc = image_to_hwc(&image).unwrap();
        assert_eq!(hwc.dim(), (4, 4, 3));
        assert_eq!(hwc_to_image(hwc).unwrap(), image);
    }

    #[test]
    fn spectrogram_scales_negative_values() {
        let mel = array![[-11.5_f32, -11.5], [-2.0, 0.5]];

        let image = plot_spectrogram(mel.view()).unwrap();

        assert_eq!(image.get_pixel(0, 1).0, [68, 1, 84]);
        assert_eq!(image.get_pixel(1, 0).0, [253, 231, 37]);
    }

    #[test]
    fn empty_alignment_is_an_error() {
        assert!(plot_alignment(Array2::<f32>::zeros((0, 3)).view()).is_err());
    }
}
