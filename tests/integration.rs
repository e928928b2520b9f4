use std::{fs, path::Path};

use charsample::{
    extract::BalancedExtraction,
    geometry::Quadrilateral,
    icdar::Icdar2013Source,
    loader::BatchLoader,
    synth::{GroundTruthRecord, JsonArchive, SynthTextSource},
    SamplePipelineBuilder,
};
use image::{Rgb, RgbImage};
use rand::{rngs::StdRng, SeedableRng};

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 128])
    })
}

/// Six 10x20 character boxes side by side, spelling `text`.
fn row_record(image_name: &str, text: &str) -> GroundTruthRecord {
    let char_boxes = (0..text.chars().count())
        .map(|i| {
            let x = 5.0 + i as f32 * 12.0;
            Quadrilateral::from_corners(x, 10.0, x + 10.0, 30.0)
        })
        .collect();
    GroundTruthRecord {
        image_name: image_name.to_string(),
        char_boxes,
        word_boxes: vec![],
        transcriptions: vec![text.to_string()],
    }
}

fn write_image(dir: &Path, name: &str, image: &RgbImage) {
    let path = dir.join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    image.save(path).unwrap();
}

#[test]
fn synth_record_becomes_normalized_batch() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    write_image(dir.path(), "1/a.png", &gradient(100, 100));

    let archive = JsonArchive::from_records(vec![GroundTruthRecord {
        image_name: "1/a.png".into(),
        char_boxes: vec![Quadrilateral::from_corners(10.0, 10.0, 30.0, 30.0)],
        word_boxes: vec![],
        transcriptions: vec!["A".into()],
    }]);
    let pipeline = SamplePipelineBuilder::new()
        .size(24)
        .batch_limit(None)
        .augment(false)
        .shuffle(false)
        .build(SynthTextSource::new(archive, dir.path()))
        .unwrap();

    let batch = pipeline.sample(0, &mut StdRng::seed_from_u64(7)).unwrap();
    assert_eq!(batch.images.dim(), (1, 3, 24, 24));
    assert!(batch.images.iter().all(|v| (-1.0..=1.0).contains(v)));
    assert_eq!(batch.labels.to_vec(), vec![0]);
}

#[test]
fn json_archive_loads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let gt_path = dir.path().join("gt.json");
    let records = vec![row_record("x.png", "ab cd")];
    fs::write(&gt_path, serde_json::to_string(&records).unwrap()).unwrap();
    write_image(dir.path(), "x.png", &gradient(80, 40));

    let archive = JsonArchive::open(&gt_path).unwrap();
    let pipeline = SamplePipelineBuilder::new()
        .size(8)
        .augment(false)
        .build(SynthTextSource::new(archive, dir.path()))
        .unwrap();

    let batch = pipeline.sample(0, &mut StdRng::seed_from_u64(0)).unwrap();
    // 5 boxes but only 4 characters, the last box is unpaired
    assert_eq!(batch.len(), 4);
}

#[test]
fn icdar_annotations_drive_batches() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let (gt_dir, img_dir) = (dir.path().join("gt"), dir.path().join("img"));
    fs::create_dir_all(&gt_dir).unwrap();
    write_image(&img_dir, "100.png", &gradient(60, 40));
    fs::write(img_dir.join("notes.txt"), "not an image").unwrap();
    fs::write(
        gt_dir.join("100_GT.txt"),
        "# header\n\
         255 0 0 10 10 5 5 15 25 \"e\"\n\
         \n\
         0 255 0 30 10 20 5 35 25 \"T\"\n\
         0 0 255 55 10 50 5 70 25 \"x\"\n",
    )
    .unwrap();

    let source = Icdar2013Source::new(&gt_dir, &img_dir).unwrap();
    assert_eq!(source.image_names(), ["100.png"]);

    let pipeline = SamplePipelineBuilder::new()
        .size(16)
        .augment(false)
        .shuffle(false)
        .build(source)
        .unwrap();
    let batch = pipeline.sample(0, &mut StdRng::seed_from_u64(3)).unwrap();

    // the third box leaves the 60px wide image
    assert_eq!(batch.images.dim(), (2, 3, 16, 16));
    let alphabet = pipeline.alphabet();
    assert_eq!(
        batch.labels.to_vec(),
        vec![
            alphabet.index_of('e'.into()) as i64,
            alphabet.index_of('T'.into()) as i64
        ]
    );
}

#[test]
fn loader_is_reproducible_for_a_seed() {
    let dir = tempfile::tempdir().unwrap();
    let records = (0..5)
        .map(|i| {
            let name = format!("{i}.png");
            write_image(dir.path(), &name, &gradient(90, 40));
            row_record(&name, "AbCdEf")
        })
        .collect();
    let pipeline = SamplePipelineBuilder::new()
        .size(8)
        .build(SynthTextSource::new(
            JsonArchive::from_records(records),
            dir.path(),
        ))
        .unwrap();

    let run = |seed| {
        BatchLoader::new(&pipeline, (0..5).collect(), seed)
            .records_per_step(2)
            .shuffled()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    };
    let first = run(11);
    assert_eq!(first.len(), 3);
    assert_eq!(first, run(11));
}

#[test]
fn balanced_extraction_stops_at_n_max() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let (img_dir, char_dir) = (dir.path().join("img"), dir.path().join("chars"));
    let records = (0..4)
        .map(|i| {
            let name = format!("{i}.png");
            write_image(&img_dir, &name, &gradient(90, 40));
            row_record(&name, "AAAbbb")
        })
        .collect();
    let archive = JsonArchive::from_records(records);
    let extraction = BalancedExtraction::new(5, &char_dir).classes(['A', 'b']);

    let distribution = extraction
        .run(&archive, &img_dir, &mut StdRng::seed_from_u64(5))
        .unwrap();
    assert_eq!(distribution.get(&'A'), Some(&5));
    assert_eq!(distribution.get(&'b'), Some(&5));
    for class in ["A", "b"] {
        assert_eq!(fs::read_dir(char_dir.join(class)).unwrap().count(), 5);
    }

    // same visiting order: every file already exists and is counted
    let again = extraction
        .run(&archive, &img_dir, &mut StdRng::seed_from_u64(5))
        .unwrap();
    assert_eq!(again, distribution);
    assert_eq!(fs::read_dir(char_dir.join("A")).unwrap().count(), 5);
}

#[test]
fn extraction_skips_missing_images() {
    let dir = tempfile::tempdir().unwrap();
    let archive = JsonArchive::from_records(vec![row_record("missing.png", "AAA")]);
    let extraction = BalancedExtraction::new(2, dir.path().join("chars")).classes(['A']);

    let distribution = extraction
        .run(&archive, dir.path(), &mut StdRng::seed_from_u64(0))
        .unwrap();
    assert_eq!(distribution.get(&'A'), Some(&0));
}
