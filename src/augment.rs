use geo::{coord, Intersects};
use rand::{seq::SliceRandom, Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{geometry::Quadrilateral, labels::Label, Error, Result};

/// Corner directions that move each ordered corner outward:
/// top-left up-left, top-right up-right, bottom-right down-right,
/// bottom-left down-left.
const OUTWARD: [(f32, f32); 4] = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentOptions {
    /// Replace part of the batch with boxes that contain no character.
    pub include_nonchars: bool,
    /// Share of the batch given to non-character boxes. Must be below 1.
    pub fraction_nonchar: f32,
    /// Largest outward move of a corner, as a fraction of the box size.
    pub expand_coeff: f32,
    /// Largest inward move of a corner, as a fraction of the box size.
    pub contract_coeff: f32,
    /// Attempts per non-character box before the sampler gives up on it.
    pub nonchar_retries: usize,
}

impl Default for AugmentOptions {
    fn default() -> Self {
        Self {
            include_nonchars: false,
            fraction_nonchar: 0.1,
            expand_coeff: 0.2,
            contract_coeff: 0.2,
            nonchar_retries: 10,
        }
    }
}

impl AugmentOptions {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.fraction_nonchar) {
            return Err(Error::config(format!(
                "fraction_nonchar = {}; must be in [0, 1)",
                self.fraction_nonchar
            )));
        }
        for (name, coeff) in [
            ("expand_coeff", self.expand_coeff),
            ("contract_coeff", self.contract_coeff),
        ] {
            if !coeff.is_finite() || coeff < 0.0 {
                return Err(Error::config(format!(
                    "{name} = {coeff}; must be finite and non-negative"
                )));
            }
        }
        Ok(())
    }
}

/// Source of boxes that contain no character, used as negative samples.
///
/// Implementations return at most `count` quadrilaterals inside the image
/// that intersect none of `word_boxes`, giving up on a box after `retries`
/// failed attempts. Returned boxes that do intersect a word box are dropped
/// by the caller.
pub trait NonCharSampler: Send + Sync {
    fn sample(
        &self,
        word_boxes: &[Quadrilateral],
        image_size: (u32, u32),
        count: usize,
        retries: usize,
        rng: &mut dyn RngCore,
    ) -> Vec<Quadrilateral>;
}

impl<T: NonCharSampler + ?Sized> NonCharSampler for Box<T> {
    fn sample(
        &self,
        word_boxes: &[Quadrilateral],
        image_size: (u32, u32),
        count: usize,
        retries: usize,
        rng: &mut dyn RngCore,
    ) -> Vec<Quadrilateral> {
        (**self).sample(word_boxes, image_size, count, retries, rng)
    }
}

/// Produces no negatives. Requesting a non-zero `fraction_nonchar` with this
/// sampler shrinks the batch instead of balancing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNonChars;

impl NonCharSampler for NoNonChars {
    fn sample(
        &self,
        _word_boxes: &[Quadrilateral],
        _image_size: (u32, u32),
        count: usize,
        _retries: usize,
        _rng: &mut dyn RngCore,
    ) -> Vec<Quadrilateral> {
        if count > 0 {
            log::debug!("No non-character sampler configured, dropping {count} requested negatives");
        }
        Vec::new()
    }
}

/// Effective batch size for `len` boxes. `None` and `Some(0)` mean no limit.
pub fn batch_size(len: usize, batch_limit: Option<usize>) -> usize {
    match batch_limit {
        Some(limit) if limit > 0 => len.min(limit),
        _ => len,
    }
}

/// Shuffles two parallel sequences with one shared permutation. Elements
/// past the shorter length are dropped.
pub fn joint_shuffle<A, B, R: Rng + ?Sized>(a: &mut Vec<A>, b: &mut Vec<B>, rng: &mut R) {
    debug_assert_eq!(a.len(), b.len());
    let mut pairs = a.drain(..).zip(b.drain(..)).collect::<Vec<_>>();
    pairs.shuffle(rng);
    let (shuffled_a, shuffled_b): (Vec<A>, Vec<B>) = pairs.into_iter().unzip();
    *a = shuffled_a;
    *b = shuffled_b;
}

/// Optional joint shuffle followed by truncation to the batch limit.
pub fn shuffle_and_truncate<T, R: Rng + ?Sized>(
    mut boxes: Vec<Quadrilateral>,
    mut labels: Vec<T>,
    shuffle: bool,
    batch_limit: Option<usize>,
    rng: &mut R,
) -> (Vec<Quadrilateral>, Vec<T>) {
    if shuffle {
        joint_shuffle(&mut boxes, &mut labels, rng);
    }
    let n = batch_size(labels.len().min(boxes.len()), batch_limit);
    boxes.truncate(n);
    labels.truncate(n);
    (boxes, labels)
}

/// Shuffling, batch capping, negative sampling and box jitter for one image.
pub struct Augmenter {
    options: AugmentOptions,
    batch_limit: Option<usize>,
    shuffle: bool,
    sampler: Box<dyn NonCharSampler>,
}

impl Augmenter {
    pub fn new(options: AugmentOptions, batch_limit: Option<usize>, shuffle: bool) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            batch_limit,
            shuffle,
            sampler: Box::new(NoNonChars),
        })
    }

    pub fn with_sampler(mut self, sampler: impl NonCharSampler + 'static) -> Self {
        self.sampler = Box::new(sampler);
        self
    }

    pub fn options(&self) -> &AugmentOptions {
        &self.options
    }

    #[instrument(level = "trace", skip_all, fields(boxes = boxes.len()))]
    pub fn augment<R: Rng>(
        &self,
        mut boxes: Vec<Quadrilateral>,
        mut labels: Vec<Label>,
        word_boxes: &[Quadrilateral],
        image_size: (u32, u32),
        rng: &mut R,
    ) -> (Vec<Quadrilateral>, Vec<Label>) {
        let n = batch_size(labels.len(), self.batch_limit);

        if self.options.include_nonchars {
            let n_nonchars = (self.options.fraction_nonchar * n as f32) as usize;
            joint_shuffle(&mut boxes, &mut labels, rng);
            boxes.truncate(n - n_nonchars);
            labels.truncate(n - n_nonchars);

            let negatives = self.sample_nonchars(word_boxes, image_size, n_nonchars, rng);
            labels.extend(std::iter::repeat(Label::NonChar).take(negatives.len()));
            boxes.extend(negatives);
            joint_shuffle(&mut boxes, &mut labels, rng);
        } else if self.shuffle {
            joint_shuffle(&mut boxes, &mut labels, rng);
        }

        boxes.truncate(n);
        labels.truncate(n);

        for (quad, label) in boxes.iter_mut().zip(&labels) {
            if label.is_char() {
                *quad = self.perturb(quad, image_size, rng);
            }
        }
        (boxes, labels)
    }

    fn sample_nonchars<R: Rng>(
        &self,
        word_boxes: &[Quadrilateral],
        image_size: (u32, u32),
        count: usize,
        rng: &mut R,
    ) -> Vec<Quadrilateral> {
        if count == 0 {
            return Vec::new();
        }
        let words = word_boxes.iter().map(|w| w.to_polygon()).collect::<Vec<_>>();
        let mut negatives = self.sampler.sample(
            word_boxes,
            image_size,
            count,
            self.options.nonchar_retries,
            rng,
        );
        negatives.truncate(count);
        negatives.retain(|quad| {
            let polygon = quad.to_polygon();
            !words.iter().any(|word| word.intersects(&polygon))
        });
        if negatives.len() < count {
            log::debug!("Got {} of {count} non-character boxes", negatives.len());
        }
        negatives
    }

    /// Moves each corner by an independent amount in
    /// `[-contract_coeff * dim, expand_coeff * dim]` along its outward
    /// direction. Coordinates are rounded up and clamped to the image. The
    /// box is returned unchanged if the result spans one pixel or less.
    fn perturb<R: Rng>(
        &self,
        quad: &Quadrilateral,
        (width, height): (u32, u32),
        rng: &mut R,
    ) -> Quadrilateral {
        let ordered = quad.ordered();
        let (box_w, box_h) = ordered.width_height();
        let (box_w, box_h) = (box_w.abs(), box_h.abs());
        let AugmentOptions {
            expand_coeff,
            contract_coeff,
            ..
        } = self.options;

        let noise_x: [f32; 4] =
            std::array::from_fn(|_| rng.random_range(-contract_coeff * box_w..=expand_coeff * box_w));
        let noise_y: [f32; 4] =
            std::array::from_fn(|_| rng.random_range(-contract_coeff * box_h..=expand_coeff * box_h));

        let points = std::array::from_fn(|i| {
            let p = ordered.points[i];
            let (sx, sy) = OUTWARD[i];
            coord! {
                x: (p.x + sx * noise_x[i]).ceil().clamp(0.0, width as f32),
                y: (p.y + sy * noise_y[i]).ceil().clamp(0.0, height as f32),
            }
        });
        let candidate = Quadrilateral::new(points);

        // measured in the moved corner order, a flipped box must not be
        // reordered into a valid one
        let extent = candidate.bottom_right() - candidate.top_left();
        if extent.x > 1.0 && extent.y > 1.0 {
            candidate
        } else {
            log::trace!("Perturbation collapsed {quad:?}, keeping original");
            *quad
        }
    }
}
