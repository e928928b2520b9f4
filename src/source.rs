use std::path::Path;

use image::RgbImage;

use crate::{geometry::Quadrilateral, labels::Label, Result};

/// Ground truth and pixels of one source image, as delivered by a
/// [`SampleSource`]. The image is owned, so it is released as soon as the
/// sample goes out of scope.
#[derive(Debug, Clone)]
pub struct RawSample {
    pub name: String,
    pub image: RgbImage,
    /// One box per entry of `labels`, in the same order.
    pub boxes: Vec<Quadrilateral>,
    pub labels: Vec<Label>,
    /// Word-level boxes, empty when the source has none.
    pub word_boxes: Vec<Quadrilateral>,
}

impl RawSample {
    pub fn image_size(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Random-access dataset of annotated images.
pub trait SampleSource: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sample_at(&self, index: usize) -> Result<RawSample>;
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn sample_at(&self, index: usize) -> Result<RawSample> {
        (**self).sample_at(index)
    }
}

pub(crate) fn open_rgb(path: &Path) -> Result<RgbImage> {
    log::trace!("Opening {}", path.display());
    Ok(image::open(path)?.into_rgb8())
}
