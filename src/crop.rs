use image::{imageops, Rgb, Rgb32FImage, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use tracing::instrument;

use crate::{geometry::Quadrilateral, Error, Result};

/// How a quadrilateral is turned into a rectangular crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropMode {
    /// Axis-aligned crop of the containing rectangle, no geometric correction.
    Fast,
    /// Perspective warp of the four corners onto an upright rectangle.
    Precise,
}

/// Crops `quad` out of `image` and returns it as a float raster with channel
/// values in `[0, 1]`.
///
/// `output_size` only applies to [`CropMode::Precise`]; when absent the
/// output takes the quadrilateral's own edge lengths.
pub fn crop(
    image: &RgbImage,
    quad: &Quadrilateral,
    output_size: Option<(u32, u32)>,
    mode: CropMode,
) -> Result<Rgb32FImage> {
    let cropped = match mode {
        CropMode::Fast => crop_fast(image, quad)?,
        CropMode::Precise => crop_precise(image, quad, output_size)?,
    };
    Ok(to_float(&cropped))
}

/// Axis-aligned crop of the box's containing rectangle. Extents are rounded
/// up so that sub-pixel boxes still yield at least one pixel.
#[instrument(level = "trace", skip(image))]
pub fn crop_fast(image: &RgbImage, quad: &Quadrilateral) -> Result<RgbImage> {
    let rect = quad.ordered().containing_rect();
    let (min, max) = (rect.top_left(), rect.bottom_right());
    if !rect.is_finite() {
        return Err(Error::degenerate(format!("non-finite box {quad:?}")));
    }

    let (min_x, min_y) = (min.x.max(0.0), min.y.max(0.0));
    let x = (min_x as u32).min(image.width());
    let y = (min_y as u32).min(image.height());
    let width = ((max.x - min_x).ceil() as u32).min(image.width() - x);
    let height = ((max.y - min_y).ceil() as u32).min(image.height() - y);
    if width == 0 || height == 0 {
        return Err(Error::degenerate(format!(
            "crop of {width}x{height} at ({x}, {y}) from {quad:?}"
        )));
    }
    log::trace!("Slicing subimage at ({x}, {y}) size {width}x{height}");
    Ok(imageops::crop_imm(image, x, y, width, height).to_image())
}

/// Rectifies the box onto an upright `output_size` rectangle.
#[instrument(level = "trace", skip(image))]
pub fn crop_precise(
    image: &RgbImage,
    quad: &Quadrilateral,
    output_size: Option<(u32, u32)>,
) -> Result<RgbImage> {
    let (width, height) = output_size.unwrap_or_else(|| {
        let (w, h) = quad.edge_lengths();
        (w.ceil().max(1.0) as u32, h.ceil().max(1.0) as u32)
    });
    if width == 0 || height == 0 {
        return Err(Error::degenerate(format!(
            "warp target of {width}x{height} for {quad:?}"
        )));
    }

    let q = quad.ordered();
    let src = q.points.map(|p| (p.x, p.y));
    let (w, h) = (width as f32, height as f32);
    let dst = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
    let projection = Projection::from_control_points(src, dst)
        .ok_or_else(|| Error::degenerate(format!("no perspective transform for {quad:?}")))?;

    let mut output = RgbImage::new(width, height);
    warp_into(
        image,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut output,
    );
    Ok(output)
}

fn to_float(image: &RgbImage) -> Rgb32FImage {
    Rgb32FImage::from_fn(image.width(), image.height(), |x, y| {
        Rgb(image.get_pixel(x, y).0.map(|c| c as f32 / 255.0))
    })
}
