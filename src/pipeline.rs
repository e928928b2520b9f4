use image::imageops::{self, FilterType};
use ndarray::{s, Array4};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    augment::{shuffle_and_truncate, AugmentOptions, Augmenter, NonCharSampler},
    crop::{crop, CropMode},
    filter::filter_boxes,
    labels::{Alphabet, DEFAULT_ALPHABET},
    source::{RawSample, SampleSource},
    util::{subtract_mean_normalize, to_chw},
    CharacterBatch, Error, Result,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Side of the square crops fed to the classifier.
    pub size: u32,
    /// Most boxes taken from one image. `None` or `0` keeps all of them.
    pub batch_limit: Option<usize>,
    pub augment: bool,
    pub shuffle: bool,
    pub alphabet: String,
    pub augment_options: AugmentOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            size: 64,
            batch_limit: Some(64),
            augment: true,
            shuffle: true,
            alphabet: DEFAULT_ALPHABET.to_string(),
            augment_options: AugmentOptions::default(),
        }
    }
}

impl PipelineOptions {
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::config("size must be positive"));
        }
        self.augment_options.validate()
    }
}

pub struct SamplePipelineBuilder {
    options: PipelineOptions,
    sampler: Option<Box<dyn NonCharSampler>>,
}

impl SamplePipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.options.size = size;
        self
    }

    pub fn batch_limit(mut self, limit: impl Into<Option<usize>>) -> Self {
        self.options.batch_limit = limit.into();
        self
    }

    pub fn augment(mut self, augment: bool) -> Self {
        self.options.augment = augment;
        self
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.options.shuffle = shuffle;
        self
    }

    pub fn alphabet(mut self, alphabet: impl Into<String>) -> Self {
        self.options.alphabet = alphabet.into();
        self
    }

    pub fn augment_options(mut self, options: AugmentOptions) -> Self {
        self.options.augment_options = options;
        self
    }

    pub fn nonchar_sampler(mut self, sampler: impl NonCharSampler + 'static) -> Self {
        self.sampler = Some(Box::new(sampler));
        self
    }

    #[instrument(skip_all, level = "debug")]
    pub fn build<S: SampleSource>(self, source: S) -> Result<SamplePipeline<S>> {
        self.options.validate()?;
        let alphabet = Alphabet::new(self.options.alphabet.chars())?;
        let mut augmenter = Augmenter::new(
            self.options.augment_options,
            self.options.batch_limit,
            self.options.shuffle,
        )?;
        if let Some(sampler) = self.sampler {
            augmenter = augmenter.with_sampler(sampler);
        }
        log::debug!("Pipeline options: {:?}", self.options);

        Ok(SamplePipeline {
            source,
            options: self.options,
            alphabet,
            augmenter,
        })
    }
}

impl Default for SamplePipelineBuilder {
    fn default() -> Self {
        Self {
            options: PipelineOptions::default(),
            sampler: None,
        }
    }
}

/// Turns annotated images into batches of normalized character crops.
pub struct SamplePipeline<S> {
    source: S,
    options: PipelineOptions,
    alphabet: Alphabet,
    augmenter: Augmenter,
}

impl<S: SampleSource> SamplePipeline<S> {
    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    /// Loads record `index` and turns it into a batch.
    #[instrument(level = "debug", skip(self, rng))]
    pub fn sample<R: Rng>(&self, index: usize, rng: &mut R) -> Result<CharacterBatch> {
        let raw = self.source.sample_at(index)?;
        self.process(raw, rng)
    }

    /// Filter, augment (or shuffle and truncate), crop, resize, normalize and
    /// encode the boxes of one image. The image is dropped before returning,
    /// also when a crop fails.
    #[instrument(level = "trace", skip_all, fields(name = %raw.name))]
    pub fn process<R: Rng>(&self, raw: RawSample, rng: &mut R) -> Result<CharacterBatch> {
        let image_size = raw.image_size();
        let RawSample {
            image,
            boxes,
            labels,
            word_boxes,
            ..
        } = raw;

        let (boxes, labels) = filter_boxes(boxes, labels, image_size);
        let (boxes, labels) = if self.options.augment {
            self.augmenter
                .augment(boxes, labels, &word_boxes, image_size, rng)
        } else {
            shuffle_and_truncate(
                boxes,
                labels,
                self.options.shuffle,
                self.options.batch_limit,
                rng,
            )
        };

        let size = self.options.size;
        let side = size as usize;
        let mut images = Array4::<f32>::zeros((boxes.len(), 3, side, side));
        for (i, quad) in boxes.iter().enumerate() {
            let cropped = crop(&image, quad, None, CropMode::Fast)?;
            let resized = imageops::resize(&cropped, size, size, FilterType::Triangle);
            images.slice_mut(s![i, .., .., ..]).assign(&to_chw(&resized));
        }
        drop(image);

        subtract_mean_normalize(&mut images);
        let labels = self.alphabet.encode_indices(&labels);
        log::trace!("Sampled {} characters", labels.len());

        Ok(CharacterBatch { images, labels })
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::{geometry::Quadrilateral, labels::Label};

    struct Fixed(Vec<RawSample>);

    impl SampleSource for Fixed {
        fn len(&self) -> usize {
            self.0.len()
        }

        fn sample_at(&self, index: usize) -> Result<RawSample> {
            self.0.get(index).cloned().ok_or(Error::IndexOutOfRange {
                index,
                len: self.0.len(),
            })
        }
    }

    fn raw(boxes: Vec<Quadrilateral>, labels: Vec<Label>) -> RawSample {
        RawSample {
            name: "test".into(),
            image: RgbImage::from_fn(100, 100, |x, y| Rgb([x as u8 * 2, y as u8 * 2, 200])),
            boxes,
            labels,
            word_boxes: vec![],
        }
    }

    #[test]
    fn single_box_without_augmentation() {
        let source = Fixed(vec![raw(
            vec![Quadrilateral::from_corners(10.0, 10.0, 30.0, 30.0)],
            vec![Label::Char('A')],
        )]);
        let pipeline = SamplePipelineBuilder::new()
            .size(32)
            .batch_limit(None)
            .augment(false)
            .shuffle(false)
            .build(source)
            .unwrap();

        let batch = pipeline.sample(0, &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(batch.images.dim(), (1, 3, 32, 32));
        assert!(batch.images.iter().all(|v| (-1.0..=1.0).contains(v)));
        assert_eq!(batch.labels.to_vec(), vec![0]);
    }

    #[test]
    fn invalid_boxes_are_dropped_before_cropping() {
        let source = Fixed(vec![raw(
            vec![
                Quadrilateral::from_corners(10.0, 10.0, 30.0, 30.0),
                Quadrilateral::from_corners(90.0, 90.0, 120.0, 120.0),
                Quadrilateral::from_corners(50.0, 50.0, 50.5, 60.0),
                Quadrilateral::from_corners(40.0, 60.0, 70.0, 90.0),
            ],
            vec![
                Label::Char('b'),
                Label::Char('x'),
                Label::Char('y'),
                Label::Char('?'),
            ],
        )]);
        let pipeline = SamplePipelineBuilder::new()
            .size(16)
            .shuffle(false)
            .build(source)
            .unwrap();

        let batch = pipeline.sample(0, &mut StdRng::seed_from_u64(4)).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.labels.to_vec(), vec![3, 41]);
    }

    #[test]
    fn batch_limit_caps_samples() {
        let boxes = (0..10)
            .map(|i| {
                let x = i as f32 * 9.0 + 2.0;
                Quadrilateral::from_corners(x, 20.0, x + 6.0, 40.0)
            })
            .collect();
        let labels = vec![Label::Char('e'); 10];
        let pipeline = SamplePipelineBuilder::new()
            .size(8)
            .batch_limit(4)
            .build(Fixed(vec![raw(boxes, labels)]))
            .unwrap();

        let batch = pipeline.sample(0, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(batch.images.dim(), (4, 3, 8, 8));
    }

    #[test]
    fn same_seed_gives_same_batch() {
        let boxes = (0..6)
            .map(|i| {
                let x = i as f32 * 15.0 + 3.0;
                Quadrilateral::from_corners(x, 10.0, x + 10.0, 30.0)
            })
            .collect::<Vec<_>>();
        let labels = "AbCdEf".chars().map(Label::Char).collect::<Vec<_>>();
        let pipeline = SamplePipelineBuilder::new()
            .size(12)
            .build(Fixed(vec![raw(boxes, labels)]))
            .unwrap();

        let first = pipeline.sample(0, &mut StdRng::seed_from_u64(42)).unwrap();
        let second = pipeline.sample(0, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_invalid_options_before_sampling() {
        let result = SamplePipelineBuilder::new()
            .augment_options(AugmentOptions {
                fraction_nonchar: 1.5,
                ..Default::default()
            })
            .build(Fixed(vec![]));
        assert!(matches!(result, Err(Error::Config(_))));

        let result = SamplePipelineBuilder::new().size(0).build(Fixed(vec![]));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
