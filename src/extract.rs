use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use image::RgbImage;
use rand::{seq::SliceRandom, Rng};
use tracing::instrument;

use crate::{
    crop::crop_precise,
    labels::DEFAULT_ALPHABET,
    source::open_rgb,
    synth::GroundTruthArchive,
    Result,
};

/// Saved samples per class.
pub type Distribution = BTreeMap<char, usize>;

/// Writes cropped character images into one folder per class until every
/// class holds `n_max` of them.
#[derive(Debug, Clone)]
pub struct BalancedExtraction {
    n_max: usize,
    char_dir: PathBuf,
    classes: Vec<char>,
    skip_existing: bool,
    output_size: Option<(u32, u32)>,
}

impl BalancedExtraction {
    pub fn new(n_max: usize, char_dir: impl Into<PathBuf>) -> Self {
        Self {
            n_max,
            char_dir: char_dir.into(),
            classes: DEFAULT_ALPHABET.chars().collect(),
            skip_existing: true,
            output_size: None,
        }
    }

    pub fn classes(mut self, classes: impl IntoIterator<Item = char>) -> Self {
        self.classes = classes.into_iter().collect();
        self
    }

    /// Existing files are left alone and counted toward their class.
    pub fn skip_existing(mut self, skip: bool) -> Self {
        self.skip_existing = skip;
        self
    }

    /// Fixed size of every saved crop instead of the box's own size.
    pub fn output_size(mut self, size: Option<(u32, u32)>) -> Self {
        self.output_size = size;
        self
    }

    /// `<char_dir>/<class>/<class>_<image>_<char>.png`
    pub fn char_path(&self, class: char, image_index: usize, char_index: usize) -> PathBuf {
        self.char_dir
            .join(class.to_string())
            .join(format!("{class}_{image_index}_{char_index}.png"))
    }

    fn is_complete(&self, distribution: &Distribution) -> bool {
        distribution.values().all(|&count| count >= self.n_max)
    }

    /// Visits the archive in random order and stops once every class is full
    /// or the archive is exhausted.
    #[instrument(level = "debug", skip(self, archive, rng))]
    pub fn run<A: GroundTruthArchive, R: Rng>(
        &self,
        archive: &A,
        img_dir: &Path,
        rng: &mut R,
    ) -> Result<Distribution> {
        let mut distribution: Distribution = self.classes.iter().map(|c| (*c, 0)).collect();
        let mut order = (0..archive.len()).collect::<Vec<_>>();
        order.shuffle(rng);

        for image_index in order {
            if self.is_complete(&distribution) {
                break;
            }
            let record = archive.record(image_index)?;
            let img_path = img_dir.join(&record.image_name);
            let mut image: Option<RgbImage> = None;

            for (char_index, class) in record.chars().into_iter().enumerate() {
                let Some(count) = distribution.get_mut(&class) else {
                    continue;
                };
                if *count >= self.n_max {
                    continue;
                }

                let char_path = self.char_path(class, image_index, char_index);
                if self.skip_existing && char_path.is_file() {
                    log::debug!("{} exists, skipping", char_path.display());
                    *count += 1;
                    continue;
                }
                let Some(quad) = record.char_boxes.get(char_index) else {
                    log::warn!("{}: no box for character {char_index}", record.image_name);
                    break;
                };

                let source = match image {
                    Some(ref source) => source,
                    None if img_path.is_file() => image.insert(open_rgb(&img_path)?),
                    None => {
                        log::warn!("{} does not exist, skipping", img_path.display());
                        break;
                    }
                };

                let cropped = match crop_precise(source, quad, self.output_size) {
                    Ok(cropped) => cropped,
                    Err(err) => {
                        log::warn!("{}: {err}", char_path.display());
                        continue;
                    }
                };
                if let Some(parent) = char_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                cropped.save(&char_path)?;
                log::info!("{}", char_path.display());
                *count += 1;
            }
        }

        log::info!("{distribution:?}");
        Ok(distribution)
    }
}
