mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ndarray::Array2;
use parking_lot::Mutex;
use stampcube_core::cancel::CancelToken;
use stampcube_core::catalog::{Picid, SourceCatalog};
use stampcube_core::error::{Result, StampError};
use stampcube_core::frame::{ObservationFrame, Wcs};
use stampcube_core::io::image_io::save_tiff;
use stampcube_core::observation::Observation;
use stampcube_core::pipeline::{
    run_pipeline, run_pipeline_reported, CatalogLookup, Collaborators, PipelineConfig,
    PipelineStage, PlateSolver, ProgressReporter,
};
use stampcube_core::store::StampStore;
use stampcube_core::variance::{params_key, Photometry};

use common::add_star;

const SEQUENCE: &str = "PAN001_14d3bd_20180113T052325";
const STARS: [(u64, f64, f64, f64); 4] = [
    (1001, 16.0, 16.0, 60.0),
    (1002, 48.0, 16.0, 45.0),
    (1003, 16.0, 48.0, 30.0),
    // Below the default SNR limit.
    (1004, 48.0, 48.0, 5.0),
];

/// Four 64x64 TIFF frames plus `catalog.toml` in `dir`.
fn write_observation(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    for f in 0..4 {
        let mut data = Array2::<f32>::from_elem((64, 64), 0.1);
        for (_, x, y, _) in STARS {
            add_star(&mut data, x, y, 0.5, 1.5);
        }
        save_tiff(&data, &dir.join(format!("frame_{f:03}.tif"))).unwrap();
    }

    let mut catalog = String::new();
    for (picid, x, y, snr) in STARS {
        catalog.push_str(&format!(
            "[[sources]]\npicid = {picid}\nx = {x:.1}\ny = {y:.1}\nvmag = 10.5\nsnr = {snr:.1}\n\n"
        ));
    }
    std::fs::write(dir.join("catalog.toml"), catalog).unwrap();
}

fn stamp_config(dir: &Path) -> PipelineConfig {
    PipelineConfig {
        store: Some(dir.join("out.stamps")),
        target_index: Some(0),
        create_stamps: true,
        find_similar: true,
        ..PipelineConfig::for_image_dir(dir)
    }
}

#[derive(Default)]
struct StageRecorder {
    stages: Mutex<Vec<PipelineStage>>,
}

impl ProgressReporter for StageRecorder {
    fn begin_stage(&self, stage: PipelineStage, _total_items: Option<usize>) {
        self.stages.lock().push(stage);
    }
}

#[test]
fn test_end_to_end_run() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join(SEQUENCE);
    write_observation(&dir);

    let mut config = stamp_config(&dir);
    config.stamp_size = stampcube_core::stamps::StampSize::square(9).unwrap();
    let summary = run_pipeline(&config).unwrap();

    assert_eq!(summary.sequence_id, SEQUENCE);
    assert_eq!(summary.frame_count, 4);
    assert_eq!(summary.catalog_sources, 4);
    assert_eq!(summary.high_snr_sources, 3);
    assert_eq!(summary.stamps.as_ref().unwrap().written, 3);
    assert_eq!(summary.variance.as_ref().unwrap().computed, 1);
    assert_eq!(summary.similarity.as_ref().unwrap().computed, 1);
    assert!(!summary.cancelled);
    assert!(summary.elapsed(PipelineStage::Stamps).is_some());
    assert!(summary.elapsed(PipelineStage::Background).is_none());
    assert_eq!(summary.store_path.as_deref(), Some(dir.join("out.stamps").as_path()));

    let store = StampStore::open(&dir.join("out.stamps")).unwrap();
    assert_eq!(store.len(), 3);
    assert_eq!(store.stamp_shape(), Some((9, 9, 4)));
    assert!(!store.contains(Picid(1004)));

    let similar = store.similarity(Picid(1001)).unwrap();
    assert_eq!(similar.len(), 2);
    assert!(!similar.similar_stars().contains(&Picid(1001)));
    let key = params_key(&Photometry::Sum, 2, None);
    let variance = store.variance(Picid(1001), &key).unwrap();
    assert!(variance.variance.is_finite());
    assert!(variance.variance < 1e-4);

    // A rerun reuses everything already stored.
    let rerun = run_pipeline(&config).unwrap();
    assert_eq!(rerun.stamps.as_ref().unwrap().skipped_existing, 3);
    assert_eq!(rerun.variance.as_ref().unwrap().skipped, 1);
    assert_eq!(rerun.similarity.as_ref().unwrap().skipped_existing, 1);
}

#[test]
fn test_all_targets_with_background() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join(SEQUENCE);
    write_observation(&dir);

    let mut config = stamp_config(&dir);
    config.target_index = None;
    config.all_targets = true;
    config.subtract = true;
    config.background.block_size = 16;

    let collaborators = Collaborators::from_config(&config);
    let recorder = Arc::new(StageRecorder::default());
    let summary = run_pipeline_reported(
        &config,
        &collaborators,
        recorder.clone(),
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(summary.background.as_ref().unwrap().subtracted, 4);
    assert_eq!(summary.variance.as_ref().unwrap().computed, 3);
    assert_eq!(summary.similarity.as_ref().unwrap().computed, 3);
    assert_eq!(
        *recorder.stages.lock(),
        vec![
            PipelineStage::Fetch,
            PipelineStage::PlateSolve,
            PipelineStage::CatalogLookup,
            PipelineStage::Background,
            PipelineStage::Stamps,
            PipelineStage::Variance,
            PipelineStage::Similarity,
            PipelineStage::Writing,
        ]
    );
    assert_eq!(summary.timings.len(), 8);
    assert!(summary.total_elapsed() >= summary.elapsed(PipelineStage::Stamps).unwrap());
}

#[test]
fn test_stamps_require_target_selection() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = stamp_config(tmp.path());
    config.target_index = None;

    let err = run_pipeline(&config).unwrap_err();
    match err {
        StampError::InvalidInput(msg) => assert!(msg.contains("target index")),
        other => panic!("unexpected error {other}"),
    }
    assert!(!tmp.path().join("out.stamps").exists());
}

#[test]
fn test_target_index_out_of_range() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join(SEQUENCE);
    write_observation(&dir);

    let mut config = stamp_config(&dir);
    // Only three sources pass the SNR limit.
    config.target_index = Some(3);
    assert!(matches!(
        run_pipeline(&config),
        Err(StampError::InvalidInput(_))
    ));
}

#[test]
fn test_missing_catalog_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join(SEQUENCE);
    write_observation(&dir);
    std::fs::remove_file(dir.join("catalog.toml")).unwrap();

    assert!(run_pipeline(&stamp_config(&dir)).is_err());
}

#[test]
fn test_nothing_to_do_writes_no_store() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join(SEQUENCE);
    write_observation(&dir);

    let config = PipelineConfig::for_image_dir(&dir);
    let summary = run_pipeline(&config).unwrap();
    assert_eq!(summary.high_snr_sources, 3);
    assert!(summary.stamps.is_none());
    assert!(summary.store_path.is_none());
}

#[test]
fn test_sequence_fetched_from_archive() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = tmp.path().join("archive");
    let dir = archive.join(SEQUENCE);
    write_observation(&dir);

    let config = PipelineConfig {
        sequence: Some(SEQUENCE.to_string()),
        archive_root: Some(archive.clone()),
        target_index: Some(1),
        create_stamps: true,
        ..Default::default()
    };
    let summary = run_pipeline(&config).unwrap();
    assert_eq!(summary.frame_count, 4);
    let expected = dir.join(format!("{SEQUENCE}.stamps"));
    assert_eq!(summary.store_path.as_deref(), Some(expected.as_path()));
    assert!(expected.is_file());

    let missing = PipelineConfig {
        sequence: Some("PAN002_000000_20180101T000000".to_string()),
        ..config
    };
    assert!(matches!(
        run_pipeline(&missing),
        Err(StampError::External(_))
    ));
}

/// Rejects odd-numbered frames and places a WCS on the rest.
struct OddFrameSolver;

impl PlateSolver for OddFrameSolver {
    fn name(&self) -> &str {
        "odd-frame"
    }

    fn solve(&self, frame: &ObservationFrame) -> Result<Option<Wcs>> {
        if frame.metadata.frame_index % 2 == 1 {
            return Err(StampError::External("no stars matched".into()));
        }
        Ok(Some(Wcs {
            crpix: [32.0, 32.0],
            crval: [150.0, 20.0],
            cd: [[-0.001, 0.0], [0.0, 0.001]],
        }))
    }
}

#[test]
fn test_unsolved_frames_are_excluded() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join(SEQUENCE);
    write_observation(&dir);

    let config = stamp_config(&dir);
    let mut collaborators = Collaborators::from_config(&config);
    collaborators.solver = Arc::new(OddFrameSolver);
    let summary = run_pipeline_reported(
        &config,
        &collaborators,
        Arc::new(StageRecorder::default()),
        &CancelToken::new(),
    )
    .unwrap();

    let unsolved: Vec<usize> = summary.unsolved_frames.iter().map(|(i, _)| *i).collect();
    assert_eq!(unsolved, vec![1, 3]);
    assert_eq!(summary.frame_count, 2);
    let store = StampStore::open(&dir.join("out.stamps")).unwrap();
    assert_eq!(store.stamp_shape().map(|s| s.2), Some(2));
}

struct SlowCatalog;

impl CatalogLookup for SlowCatalog {
    fn lookup(&self, _observation: &Observation) -> Result<SourceCatalog> {
        std::thread::sleep(Duration::from_millis(500));
        Ok(SourceCatalog::default())
    }
}

#[test]
fn test_catalog_lookup_times_out() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join(SEQUENCE);
    write_observation(&dir);

    let config = stamp_config(&dir);
    let mut collaborators = Collaborators::from_config(&config);
    collaborators.catalog = Arc::new(SlowCatalog);
    collaborators.lookup_timeout = Duration::from_millis(20);
    let result = run_pipeline_reported(
        &config,
        &collaborators,
        Arc::new(StageRecorder::default()),
        &CancelToken::new(),
    );
    assert!(matches!(result, Err(StampError::Timeout { .. })));
}

#[test]
fn test_cancelled_run_skips_compute_stages() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join(SEQUENCE);
    write_observation(&dir);

    let config = stamp_config(&dir);
    let cancel = CancelToken::new();
    cancel.cancel();
    let summary = run_pipeline_reported(
        &config,
        &Collaborators::from_config(&config),
        Arc::new(StageRecorder::default()),
        &cancel,
    )
    .unwrap();

    assert!(summary.cancelled);
    assert!(summary.stamps.is_none());
    assert!(summary.variance.is_none());
    assert!(summary.elapsed(PipelineStage::Writing).is_some());
}
