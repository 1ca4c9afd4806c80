// src/main.rs

use anyhow::{Context, Result};
use roomscale::learning::{append_update_history, JsonlSink, LearningLoop};
use roomscale::video_processor::{self, EstimationPipeline, RequestOutcome};
use roomscale::Config;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct RunStats {
    requests: usize,
    succeeded: usize,
    failed: usize,
    manual_input_requested: usize,
    learning_logged: usize,
}

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("📐 Room Scale Estimator Starting");
    info!("✓ Configuration loaded from {}", config_path);
    info!(
        "Fusion: {}, manual threshold: {:.2}, learning: {}",
        config.fusion.strategy,
        config.confidence.manual_input_threshold,
        if config.learning.enabled { "on" } else { "off" }
    );

    let mut pipeline = EstimationPipeline::new(config.clone())?;

    let request_files = video_processor::find_request_files(&config.io.input_dir)?;
    if request_files.is_empty() {
        error!("No request files found in {}", config.io.input_dir);
        return Ok(());
    }

    std::fs::create_dir_all(&config.io.output_dir)?;
    let results_path = Path::new(&config.io.output_dir).join("results.jsonl");
    let mut results_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&results_path)
        .with_context(|| format!("Failed to open {}", results_path.display()))?;
    info!("💾 Results will be appended to: {}", results_path.display());

    let mut learning = config
        .learning
        .enabled
        .then(|| LearningLoop::new(JsonlSink::new(&config.learning.log_path), &config.learning));

    let mut stats = RunStats::default();

    for (idx, path) in request_files.iter().enumerate() {
        info!("Processing request {}/{}: {}", idx + 1, request_files.len(), path.display());
        stats.requests += 1;

        let request = match video_processor::load_request(path) {
            Ok(request) => request,
            Err(e) => {
                error!("❌ {:#}", e);
                stats.failed += 1;
                write_error_line(&mut results_file, path, None, &format!("{:#}", e))?;
                continue;
            }
        };

        let outcome = match pipeline.process(&request.request) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("❌ {}: {}", path.display(), e);
                stats.failed += 1;
                write_error_line(&mut results_file, path, request.request_id.as_deref(), &e.user_message())?;
                continue;
            }
        };

        stats.succeeded += 1;
        log_outcome(&outcome, &mut stats);
        write_result_line(&mut results_file, path, request.request_id.as_deref(), &outcome)?;

        if let Some(learning) = learning.as_mut() {
            for result in outcome.results() {
                let record = pipeline.learning_record(result, &request.metadata);
                match learning.log_result(&record) {
                    Ok(()) => stats.learning_logged += 1,
                    Err(e) => warn!("⚠️  Failed to log learning record: {}", e),
                }
            }
        }
    }

    if let Some(learning) = learning.as_ref() {
        run_learning_update(learning, &mut pipeline, &config)?;
    }

    info!("\n========================================");
    info!("✓ Processed {} requests", stats.requests);
    info!("  Succeeded: {}", stats.succeeded);
    info!("  Failed: {}", stats.failed);
    info!("  Manual input requested: {}", stats.manual_input_requested);
    if config.learning.enabled {
        info!("  Learning records logged: {}", stats.learning_logged);
    }
    info!("========================================");

    Ok(())
}

fn log_outcome(outcome: &RequestOutcome, stats: &mut RunStats) {
    for result in outcome.results() {
        let report = &result.confidence;
        info!(
            "  {:.2} x {:.2} x {:.2} ft via {} | confidence {:.3} ({}, ±{}%)",
            result.dimensions.length,
            result.dimensions.width,
            result.dimensions.height,
            result.dimensions.method,
            report.overall_confidence,
            report.confidence_level,
            report.expected_error_percent
        );
        if report.manual_input_required {
            warn!("  ⚠️  Low confidence: ask the user for manual dimensions");
            stats.manual_input_requested += 1;
        }
    }
}

fn run_learning_update(
    learning: &LearningLoop<JsonlSink>,
    pipeline: &mut EstimationPipeline,
    config: &Config,
) -> Result<()> {
    let statistics = learning.statistics()?;
    info!(
        "📚 Learning log: {} results, avg confidence {:.3}, {:.0}% high confidence",
        statistics.total_results,
        statistics.avg_confidence,
        statistics.high_confidence_ratio * 100.0
    );

    let summary = learning.update_model(pipeline.model_mut())?;
    match &summary.reason {
        Some(reason) => info!("📊 Distribution update skipped: {}", reason),
        None => info!("📊 Updated {} object distributions", summary.objects_updated),
    }

    let summary_path = Path::new(&config.io.output_dir).join("distribution_update.json");
    std::fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)
        .with_context(|| format!("Failed to write {}", summary_path.display()))?;

    if summary.updated {
        let history_path = learning
            .sink()
            .path()
            .with_file_name("distributions_history.json");
        append_update_history(&history_path, &summary)?;
    }

    Ok(())
}

fn write_result_line(
    file: &mut File,
    path: &Path,
    request_id: Option<&str>,
    outcome: &RequestOutcome,
) -> Result<()> {
    let json_value = serde_json::json!({
        "request_id": request_id,
        "source_file": path.display().to_string(),
        "result": outcome,
    });
    let json_line = serde_json::to_string(&json_value)?;
    writeln!(file, "{}", json_line)?;
    Ok(())
}

fn write_error_line(file: &mut File, path: &Path, request_id: Option<&str>, message: &str) -> Result<()> {
    let json_value = serde_json::json!({
        "request_id": request_id,
        "source_file": path.display().to_string(),
        "error": message,
    });
    let json_line = serde_json::to_string(&json_value)?;
    writeln!(file, "{}", json_line)?;
    Ok(())
}
