use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::instrument;

use crate::{
    geometry::Quadrilateral,
    labels::Label,
    source::{open_rgb, RawSample, SampleSource},
    Error, Result,
};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// ICDAR 2013 style benchmark: an image directory plus one character
/// annotation file per image.
#[derive(Debug, Clone)]
pub struct Icdar2013Source {
    gt_dir: PathBuf,
    img_dir: PathBuf,
    image_names: Vec<String>,
}

impl Icdar2013Source {
    /// Indexes every image file in `img_dir`, sorted by name.
    #[instrument(level = "debug", skip_all)]
    pub fn new(gt_dir: impl Into<PathBuf>, img_dir: impl Into<PathBuf>) -> Result<Self> {
        let (gt_dir, img_dir) = (gt_dir.into(), img_dir.into());
        let mut image_names = Vec::new();
        for entry in fs::read_dir(&img_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if let (true, Some(name)) = (is_image, path.file_name().and_then(|n| n.to_str())) {
                image_names.push(name.to_string());
            }
        }
        image_names.sort();
        log::debug!("Found {} images in {}", image_names.len(), img_dir.display());

        Ok(Self {
            gt_dir,
            img_dir,
            image_names,
        })
    }

    pub fn image_names(&self) -> &[String] {
        &self.image_names
    }

    /// `100.jpg` is annotated by `100_GT.txt`.
    pub fn annotation_path(&self, image_name: &str) -> PathBuf {
        let stem = image_name.chars().take(3).collect::<String>();
        self.gt_dir.join(format!("{stem}_GT.txt"))
    }
}

impl SampleSource for Icdar2013Source {
    fn len(&self) -> usize {
        self.image_names.len()
    }

    #[instrument(level = "trace", skip(self))]
    fn sample_at(&self, index: usize) -> Result<RawSample> {
        let name = self
            .image_names
            .get(index)
            .ok_or(Error::IndexOutOfRange {
                index,
                len: self.image_names.len(),
            })?;
        let gt_path = self.annotation_path(name);
        let text = fs::read_to_string(&gt_path)?;
        let (boxes, labels): (Vec<_>, Vec<_>) =
            parse_annotation(&text, &gt_path)?.into_iter().unzip();
        let image = open_rgb(&self.img_dir.join(name))?;

        Ok(RawSample {
            name: name.clone(),
            image,
            boxes,
            labels,
            word_boxes: Vec::new(),
        })
    }
}

/// One row of a character annotation file, in column order.
#[derive(Debug, Deserialize)]
struct AnnotationRow {
    _r: f32,
    _g: f32,
    _b: f32,
    _cx: f32,
    _cy: f32,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    character: String,
}

const ANNOTATION_FIELDS: usize = 10;

fn annotation_error(path: &Path, position: Option<&csv::Position>, message: String) -> Error {
    Error::Annotation {
        path: path.to_path_buf(),
        line: position.map_or(0, |p| p.line() as usize),
        message,
    }
}

/// Parses space-separated rows of `R G B cx cy x1 y1 x2 y2 "c"`. Blank lines
/// and lines starting with `#` are skipped. The box spans the corners
/// (x1, y1) and (x2, y2).
pub fn parse_annotation(text: &str, path: &Path) -> Result<Vec<(Quadrilateral, Label)>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .comment(Some(b'#'))
        .escape(Some(b'\\'))
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|err| annotation_error(path, err.position(), err.to_string()))?;
        if record.len() != ANNOTATION_FIELDS {
            return Err(annotation_error(
                path,
                record.position(),
                format!("expected {ANNOTATION_FIELDS} fields, found {}", record.len()),
            ));
        }
        let row: AnnotationRow = record
            .deserialize(None)
            .map_err(|err| annotation_error(path, record.position(), err.to_string()))?;
        rows.push((
            Quadrilateral::from_corners(row.x1, row.y1, row.x2, row.y2),
            Label::parse(&row.character),
        ));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_and_skips_comments() {
        let text = "# header\n\
                    255 255 255 386 147 370 129 402 166 \"L\"\n\
                    \n\
                    0 0 0 10 10 5 5 15 16 \"a\"\n\
                    1 2 3 4 5 6 7 8 9 \" \"\n";
        let rows = parse_annotation(text, Path::new("100_GT.txt")).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[0],
            (
                Quadrilateral::from_corners(370.0, 129.0, 402.0, 166.0),
                Label::Char('L')
            )
        );
        assert_eq!(rows[1].1, Label::Char('a'));
        assert_eq!(rows[2].1, Label::Char(' '));
    }

    #[test]
    fn reports_line_of_malformed_row() {
        let text = "1 2 3 4 5 6 7 8 9 \"x\"\n1 2 3 4 five 6 7 8 9 \"y\"\n";
        match parse_annotation(text, Path::new("gt.txt")) {
            Err(Error::Annotation { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_character_is_an_error() {
        let text = "1 2 3 4 5 6 7 8 9\n";
        assert!(parse_annotation(text, Path::new("gt.txt")).is_err());
    }

    #[test]
    fn trailing_field_is_an_error() {
        let text = "1 2 3 4 5 6 7 8 9 \"b\"\n1 2 3 4 5 6 7 20 30 \"a\" 99\n";
        match parse_annotation(text, Path::new("gt.txt")) {
            Err(Error::Annotation { line, message, .. }) => {
                assert_eq!(line, 2);
                assert!(message.contains("found 11"), "{message}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn quoted_quote_character() {
        let text = "1 2 3 4 5 6 7 20 30 \"\\\"\"\n";
        let rows = parse_annotation(text, Path::new("gt.txt")).unwrap();
        assert_eq!(rows[0].1, Label::Char('"'));
    }

    #[test]
    fn annotation_path_uses_image_prefix() {
        let source = Icdar2013Source {
            gt_dir: PathBuf::from("gt"),
            img_dir: PathBuf::from("img"),
            image_names: vec!["100.jpg".into()],
        };
        assert_eq!(source.annotation_path("100.jpg"), PathBuf::from("gt/100_GT.txt"));
    }
}
