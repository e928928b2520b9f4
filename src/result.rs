use ndarray::{Array1, Array4};

/// Character crops of one or more source images with their class indices.
///
/// `images` is `(N, 3, size, size)` with values in `[-1, 1]`, `labels` has
/// length `N`. `N` is only known after filtering and augmentation and may be
/// zero.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterBatch {
    pub images: Array4<f32>,
    pub labels: Array1<i64>,
}

impl CharacterBatch {
    pub fn empty(size: u32) -> Self {
        let size = size as usize;
        Self {
            images: Array4::zeros((0, 3, size, size)),
            labels: Array1::zeros(0),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub index: usize,
    pub score: f32,
}
