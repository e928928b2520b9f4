use image::{Pixel, Rgb, Rgb32FImage, RgbImage};
use ndarray::{Array3, Array4, ArrayView3, Axis};
use tracing::instrument;

const MEAN_VALUES: [f32; 3] = [0.5, 0.5, 0.5];
const NORM_VALUES: [f32; 3] = [2.0, 2.0, 2.0];

/// Channel-first copy of a float image.
pub(crate) fn to_chw(image: &Rgb32FImage) -> Array3<f32> {
    Array3::<f32>::from_shape_fn(
        (3, image.height() as usize, image.width() as usize),
        |(ch, y, x)| image.get_pixel(x as u32, y as u32).channels()[ch],
    )
}

/// Maps `(N, 3, H, W)` values from `[0, 1]` to `[-1, 1]` in place.
#[instrument(level = "trace", skip(batch))]
pub(crate) fn subtract_mean_normalize(batch: &mut Array4<f32>) {
    for (ch, mut plane) in batch.axis_iter_mut(Axis(1)).enumerate() {
        let (mean, norm) = (MEAN_VALUES[ch], NORM_VALUES[ch]);
        plane.mapv_inplace(|v| (v - mean) * norm);
    }
}

/// Inverse of the batch normalization for a single `(3, H, W)` crop, for
/// writing samples back to disk.
pub fn to_rgb_image(data: ArrayView3<f32>) -> RgbImage {
    let (_, height, width) = data.dim();
    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb(std::array::from_fn(|ch| {
            let value = data[[ch, y, x]] / NORM_VALUES[ch] + MEAN_VALUES[ch];
            (value.clamp(0.0, 1.0) * 255.0).round() as u8
        }))
    })
}
