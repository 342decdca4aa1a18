use std::time::Duration;

use console::Style;
use stampcube_core::background::BackgroundReport;
use stampcube_core::pipeline::{PipelineConfig, PipelineSummary};
use stampcube_core::similarity::SimilarityBatchReport;
use stampcube_core::stamps::ExtractionReport;
use stampcube_core::variance::VarianceBatchReport;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    warning: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            warning: Style::new().yellow(),
            path: Style::new().underlined(),
        }
    }
}

fn on_off(s: &Styles, enabled: bool, forced: bool) -> String {
    match (enabled, forced) {
        (false, _) => s.disabled.apply_to("off").to_string(),
        (true, false) => s.method.apply_to("on").to_string(),
        (true, true) => s.method.apply_to("on (forced)").to_string(),
    }
}

fn seconds(d: Duration) -> String {
    format!("{:.2} s", d.as_secs_f64())
}

pub fn print_run_header(config: &PipelineConfig) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Stampcube Pipeline"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(18)));
    println!();

    if let Some(dir) = &config.image_dir {
        println!("  {:<14}{}", s.label.apply_to("Images"), s.path.apply_to(dir.display()));
    }
    if let Some(seq) = &config.sequence {
        println!("  {:<14}{}", s.label.apply_to("Sequence"), s.value.apply_to(seq));
    }
    let target = match config.target_selection() {
        Some(stampcube_core::pipeline::TargetSelection::Index(i)) => format!("index {i}"),
        Some(stampcube_core::pipeline::TargetSelection::All) => "all sources".to_string(),
        None => "none".to_string(),
    };
    println!("  {:<14}{}", s.label.apply_to("Targets"), s.value.apply_to(target));
    println!("  {:<14}{}", s.label.apply_to("SNR limit"), s.value.apply_to(config.snr_limit));
    println!(
        "  {:<14}{}",
        s.label.apply_to("Stamp size"),
        s.value.apply_to(format!("{}x{}", config.stamp_size.rows, config.stamp_size.cols))
    );
    println!();

    println!("  {}", s.header.apply_to("Stages"));
    println!("    {:<12}{}", s.label.apply_to("Background"), on_off(&s, config.subtract, config.force_subtract));
    println!("    {:<12}{}", s.label.apply_to("Stamps"), on_off(&s, config.create_stamps, config.force_stamps));
    println!("    {:<12}{}", s.label.apply_to("Variance"), on_off(&s, config.compute_variance, config.force_variance));
    println!("    {:<12}{}", s.label.apply_to("Similarity"), on_off(&s, config.find_similar, config.force_similarity));
    if config.find_similar {
        println!("    {:<12}{}", s.label.apply_to("Metric"), s.method.apply_to(&config.similarity.metric));
    }
    println!();
}

pub fn print_background_report(report: &BackgroundReport) {
    let s = Styles::new();
    println!("  {}", s.header.apply_to("Background"));
    println!("    {:<12}{}", s.label.apply_to("Subtracted"), s.value.apply_to(report.subtracted));
    println!("    {:<12}{}", s.label.apply_to("Reused"), s.value.apply_to(report.reused));
    for (frame, reason) in &report.failed {
        println!("    {:<12}{}", s.warning.apply_to(format!("Frame {frame}")), reason);
    }
}

pub fn print_extraction_report(report: &ExtractionReport) {
    let s = Styles::new();
    println!("  {}", s.header.apply_to("Stamps"));
    println!("    {:<12}{}", s.label.apply_to("Written"), s.value.apply_to(report.written));
    println!("    {:<12}{}", s.label.apply_to("Replaced"), s.value.apply_to(report.replaced));
    println!("    {:<12}{}", s.label.apply_to("Existing"), s.value.apply_to(report.skipped_existing));
    if !report.dropped.is_empty() {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Dropped"),
            s.warning.apply_to(format!("{} (out of bounds in every frame)", report.dropped.len()))
        );
    }
    for (picid, reason) in &report.failed {
        println!("    {:<12}{}", s.warning.apply_to(picid), reason);
    }
}

pub fn print_variance_report(report: &VarianceBatchReport) {
    let s = Styles::new();
    println!("  {}", s.header.apply_to("Variance"));
    println!("    {:<12}{}", s.label.apply_to("Computed"), s.value.apply_to(report.computed));
    println!("    {:<12}{}", s.label.apply_to("Existing"), s.value.apply_to(report.skipped));
    if !report.insufficient.is_empty() {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Too few"),
            s.warning.apply_to(report.insufficient.len())
        );
    }
    for (picid, reason) in &report.failed {
        println!("    {:<12}{}", s.warning.apply_to(picid), reason);
    }
}

pub fn print_similarity_report(report: &SimilarityBatchReport) {
    let s = Styles::new();
    println!("  {}", s.header.apply_to("Similarity"));
    println!("    {:<12}{}", s.label.apply_to("Computed"), s.value.apply_to(report.computed));
    println!("    {:<12}{}", s.label.apply_to("Existing"), s.value.apply_to(report.skipped_existing));
    println!("    {:<12}{}", s.label.apply_to("Rejected"), s.value.apply_to(report.rejected_targets));
    for (picid, reason) in &report.failed {
        println!("    {:<12}{}", s.warning.apply_to(picid), reason);
    }
}

pub fn print_pipeline_summary(summary: &PipelineSummary) {
    let s = Styles::new();

    println!();
    println!(
        "  {:<14}{}",
        s.label.apply_to("Sequence"),
        s.value.apply_to(&summary.sequence_id)
    );
    println!("  {:<14}{}", s.label.apply_to("Frames"), s.value.apply_to(summary.frame_count));
    if !summary.unsolved_frames.is_empty() {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Unsolved"),
            s.warning.apply_to(summary.unsolved_frames.len())
        );
    }
    println!(
        "  {:<14}{}",
        s.label.apply_to("Sources"),
        s.value.apply_to(format!(
            "{} ({} above SNR limit)",
            summary.catalog_sources, summary.high_snr_sources
        ))
    );
    println!();

    if let Some(report) = &summary.background {
        print_background_report(report);
    }
    if let Some(report) = &summary.stamps {
        print_extraction_report(report);
    }
    if let Some(report) = &summary.variance {
        print_variance_report(report);
    }
    if let Some(report) = &summary.similarity {
        print_similarity_report(report);
    }
    println!();

    println!("  {}", s.header.apply_to("Timing"));
    for timing in &summary.timings {
        println!(
            "    {:<26}{}",
            s.label.apply_to(timing.stage),
            s.value.apply_to(seconds(timing.elapsed))
        );
    }
    println!(
        "    {:<26}{}",
        s.label.apply_to("Total"),
        s.value.apply_to(seconds(summary.total_elapsed()))
    );
    if summary.cancelled {
        println!("  {}", s.warning.apply_to("Run was cancelled before completion"));
    }
    if let Some(path) = &summary.store_path {
        println!();
        println!("  {:<14}{}", s.label.apply_to("Stamp store"), s.path.apply_to(path.display()));
    }
    println!();
}
