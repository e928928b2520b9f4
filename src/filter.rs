use crate::geometry::Quadrilateral;

/// Whether a box ends inside a `width` x `height` image and spans more than
/// one pixel in each direction. A box starting left of or above the image is
/// kept and clamped when cropped, unless it lies entirely outside.
pub fn is_valid_box(quad: &Quadrilateral, (width, height): (u32, u32)) -> bool {
    if !quad.is_finite() {
        return false;
    }
    let rect = quad.containing_rect();
    let (min, max) = (rect.top_left(), rect.bottom_right());
    let (w, h) = (max.x - min.x, max.y - min.y);

    max.x > 0.0
        && max.y > 0.0
        && max.x < width as f32
        && max.y < height as f32
        && w > 1.0
        && h > 1.0
}

/// Drops boxes that run off the image or collapse to (near) zero size,
/// together with their labels. Kept pairs stay in their original order.
pub fn filter_boxes<T>(
    boxes: Vec<Quadrilateral>,
    labels: Vec<T>,
    image_size: (u32, u32),
) -> (Vec<Quadrilateral>, Vec<T>) {
    let before = boxes.len();
    let (boxes, labels): (Vec<_>, Vec<_>) = boxes
        .into_iter()
        .zip(labels)
        .filter(|(quad, _)| is_valid_box(quad, image_size))
        .unzip();
    if boxes.len() < before {
        log::debug!("Filtered {} of {before} boxes", before - boxes.len());
    }
    (boxes, labels)
}
