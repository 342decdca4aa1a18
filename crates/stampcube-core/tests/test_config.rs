use std::path::PathBuf;

use stampcube_core::error::StampError;
use stampcube_core::pipeline::{PipelineConfig, TargetSelection};
use stampcube_core::similarity::MetricKind;
use stampcube_core::stamps::StampSize;
use stampcube_core::variance::Photometry;

#[test]
fn test_minimal_config_uses_defaults() {
    let config: PipelineConfig = toml::from_str(r#"image_dir = "/data/PAN001""#).unwrap();
    assert_eq!(config.image_dir, Some(PathBuf::from("/data/PAN001")));
    assert_eq!(config.snr_limit, 10.0);
    assert_eq!(config.stamp_size, StampSize::default());
    assert!(config.compute_variance);
    assert!(!config.create_stamps);
    assert_eq!(config.solve_timeout_secs, 90);
    assert_eq!(config.similarity.top_k, 200);
    assert_eq!(config.similarity.quality.acceptable_flag, 2);
    assert_eq!(config.similarity.quality.max_vmag, 13.0);
    assert_eq!(config.similarity.metric, MetricKind::Morphology);
    assert_eq!(config.variance.min_valid_frames, 2);
    assert_eq!(config.target_selection(), None);
    config.validate().unwrap();
}

#[test]
fn test_nested_sections() {
    let text = r#"
        sequence = "PAN012_358d0f_20180824T035917"
        archive_root = "/archive"
        target_index = 4
        create_stamps = true
        find_similar = true
        snr_limit = 7.5

        [stamp_size]
        rows = 11
        cols = 9

        [background]
        block_size = 32

        [variance]
        min_valid_frames = 5
        photometry = { Aperture = { radius = 3.0 } }

        [similarity]
        top_k = 25
        metric = { FluxCorrelation = "Sum" }

        [similarity.quality]
        max_vmag = 12.0
    "#;
    let config: PipelineConfig = toml::from_str(text).unwrap();
    config.validate().unwrap();

    assert_eq!(config.target_selection(), Some(TargetSelection::Index(4)));
    assert_eq!(config.stamp_size, StampSize { rows: 11, cols: 9 });
    assert_eq!(config.background.block_size, 32);
    assert_eq!(config.variance.min_valid_frames, 5);
    assert_eq!(config.variance.photometry, Photometry::Aperture { radius: 3.0 });
    assert_eq!(config.similarity.top_k, 25);
    assert_eq!(
        config.similarity.metric,
        MetricKind::FluxCorrelation(Photometry::Sum)
    );
    assert_eq!(config.similarity.quality.max_vmag, 12.0);
    assert_eq!(config.similarity.quality.acceptable_flag, 2);
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.toml");
    std::fs::write(&path, "image_dir = \"frames\"\nall_targets = true\n").unwrap();
    let config = PipelineConfig::load(&path).unwrap();
    assert_eq!(config.target_selection(), Some(TargetSelection::All));

    std::fs::write(&path, "image_dir = 3").unwrap();
    assert!(matches!(PipelineConfig::load(&path), Err(StampError::Toml(_))));
}

fn rejected(config: PipelineConfig) -> String {
    match config.validate() {
        Err(StampError::InvalidInput(msg)) => msg,
        Err(other) => panic!("unexpected error {other}"),
        Ok(()) => panic!("config accepted"),
    }
}

#[test]
fn test_validation_errors() {
    assert!(rejected(PipelineConfig::default()).contains("image directory"));

    let no_archive = PipelineConfig {
        sequence: Some("PAN001_14d3bd_20180113T052325".into()),
        ..Default::default()
    };
    assert!(rejected(no_archive).contains("archive root"));

    let both = PipelineConfig {
        target_index: Some(0),
        all_targets: true,
        ..PipelineConfig::for_image_dir("frames")
    };
    assert!(rejected(both).contains("mutually exclusive"));

    let no_target = PipelineConfig {
        create_stamps: true,
        ..PipelineConfig::for_image_dir("frames")
    };
    assert_eq!(
        rejected(no_target),
        "target index (or all targets) required to create stamps"
    );

    let mut zero_block = PipelineConfig::for_image_dir("frames");
    zero_block.background.block_size = 0;
    assert!(rejected(zero_block).contains("block size"));

    let mut nan_snr = PipelineConfig::for_image_dir("frames");
    nan_snr.snr_limit = f64::NAN;
    assert!(rejected(nan_snr).contains("SNR"));
}

#[test]
fn test_even_stamp_size_rejected() {
    let config = PipelineConfig {
        stamp_size: StampSize { rows: 10, cols: 10 },
        ..PipelineConfig::for_image_dir("frames")
    };
    assert!(matches!(
        config.validate(),
        Err(StampError::InvalidStampSize { rows: 10, cols: 10 })
    ));
}
