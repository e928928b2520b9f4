use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    geometry::Quadrilateral,
    labels::Label,
    source::{open_rgb, RawSample, SampleSource},
    Error, Result,
};

/// Ground truth of one synthetic image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthRecord {
    pub image_name: String,
    pub char_boxes: Vec<Quadrilateral>,
    #[serde(default)]
    pub word_boxes: Vec<Quadrilateral>,
    /// Rendered text blocks. Words are separated by whitespace, which carries
    /// no box of its own.
    pub transcriptions: Vec<String>,
}

impl GroundTruthRecord {
    /// The characters of all transcriptions in box order, whitespace removed.
    pub fn chars(&self) -> Vec<char> {
        self.transcriptions
            .iter()
            .flat_map(|text| text.chars())
            .filter(|c| !c.is_whitespace())
            .collect()
    }

    pub fn labels(&self) -> Vec<Label> {
        self.chars().into_iter().map(Label::Char).collect()
    }
}

/// Index-addressable collection of [`GroundTruthRecord`]s.
pub trait GroundTruthArchive: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, index: usize) -> Result<GroundTruthRecord>;
}

/// Archive held in memory, usually loaded from a JSON array of records.
#[derive(Debug, Clone, Default)]
pub struct JsonArchive {
    records: Vec<GroundTruthRecord>,
}

impl JsonArchive {
    #[instrument(level = "debug")]
    pub fn open(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let records: Vec<GroundTruthRecord> = serde_json::from_reader(reader)?;
        log::debug!("Loaded {} records from {}", records.len(), path.display());
        Ok(Self { records })
    }

    pub fn from_records(records: Vec<GroundTruthRecord>) -> Self {
        Self { records }
    }
}

impl GroundTruthArchive for JsonArchive {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn record(&self, index: usize) -> Result<GroundTruthRecord> {
        self.records
            .get(index)
            .cloned()
            .ok_or(Error::IndexOutOfRange {
                index,
                len: self.records.len(),
            })
    }
}

/// Synthetic corpus: an archive of records plus the directory holding the
/// rendered images.
pub struct SynthTextSource<A> {
    archive: A,
    img_dir: PathBuf,
}

impl<A: GroundTruthArchive> SynthTextSource<A> {
    pub fn new(archive: A, img_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive,
            img_dir: img_dir.into(),
        }
    }

    pub fn archive(&self) -> &A {
        &self.archive
    }

    pub fn img_dir(&self) -> &Path {
        &self.img_dir
    }
}

impl<A: GroundTruthArchive> SampleSource for SynthTextSource<A> {
    fn len(&self) -> usize {
        self.archive.len()
    }

    #[instrument(level = "trace", skip(self))]
    fn sample_at(&self, index: usize) -> Result<RawSample> {
        let record = self.archive.record(index)?;
        let image = open_rgb(&self.img_dir.join(&record.image_name))?;

        let mut labels = record.labels();
        let mut boxes = record.char_boxes;
        if labels.len() != boxes.len() {
            log::warn!(
                "{}: {} characters but {} boxes, pairing the first {}",
                record.image_name,
                labels.len(),
                boxes.len(),
                labels.len().min(boxes.len())
            );
            let n = labels.len().min(boxes.len());
            labels.truncate(n);
            boxes.truncate(n);
        }

        Ok(RawSample {
            name: record.image_name,
            image,
            boxes,
            labels,
            word_boxes: record.word_boxes,
        })
    }
}
