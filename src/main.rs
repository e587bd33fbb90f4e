//! Claim Risk Pipeline - Main Entry Point
//!
//! Trains the claim risk model on the configured dataset, writes the CSV
//! exports, scores a default policy into the prediction log and prints the
//! run summary.

use anyhow::{Context, Result};
use claim_risk_pipeline::{
    config::AppConfig,
    export::Exporter,
    insights::{DistributionView, DrillDown, GroupRisk, InsightBuilder},
    pipeline::Pipeline,
    prediction_log::PredictionLog,
    segmentation::segment_label,
};
use std::path::Path;
use tracing::{info, warn};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        format!("claim_risk_pipeline={}", config.logging.level).parse()?,
    );
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn log_groups(title: &str, groups: &[GroupRisk]) {
    for group in groups {
        info!(
            view = title,
            group = %group.keys.join(" / "),
            mean_risk = format!("{:.3}", group.mean_risk),
            count = group.count,
            "Risk by group"
        );
    }
}

fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load_from_path(&path)
            .with_context(|| format!("Failed to load configuration from {path}"))?,
        None => AppConfig::load()?,
    };
    init_logging(&config)?;

    info!("Starting Claim Risk Pipeline");
    info!(
        dataset = %config.data.path,
        estimators = config.model.n_estimators,
        recall_threshold = config.evaluation.recall_threshold,
        "Configuration loaded successfully"
    );

    let pipeline = Pipeline::new(config.clone());
    let raw = pipeline
        .load_dataset()
        .with_context(|| format!("Failed to load dataset {}", config.data.path))?;
    let output = pipeline.run(&raw).context("Pipeline run failed")?;

    let exporter = Exporter::new(&config.output.dir);
    exporter.write_cleaned(output.table())?;
    exporter.write_predictions(&output.test_features, &output.predicted_labels())?;
    exporter.write_attribution(&output.summary.top_features)?;

    // Score the default policy and keep it in the history
    let input = output.scoring.input_template();
    let prediction = output.scoring.score_input(&input)?;
    let log = PredictionLog::new(Path::new(&config.output.dir).join(&config.output.prediction_log));
    log.append(&prediction)?;
    let history = log.read_all()?;
    info!(
        prediction = prediction.risk_level.as_str(),
        probability = format!("{:.3}", prediction.probability),
        history = history.len(),
        "Default policy scored"
    );

    match output.scoring.explain_input(&input) {
        Ok(attribution) => {
            for contribution in attribution.ranking(5) {
                info!(
                    feature = %contribution.feature,
                    value = format!("{:.4}", contribution.mean_abs),
                    "Default policy contributor"
                );
            }
        }
        Err(e) => warn!(error = %e, "Default policy explanation unavailable"),
    }

    log_groups("location", &output.breakdown.by_location);
    log_groups("claim_type", &output.breakdown.by_claim_type);
    log_groups("segment", &output.breakdown.by_segment);

    let insights = InsightBuilder::new(output.table(), &output.scoring, &config);
    if output.segments.n_segments() > 0 {
        let report = insights.drill_down(DrillDown::Segment(segment_label(0)))?;
        match &report.distribution {
            DistributionView::Histogram(bins) => {
                info!(rows = report.rows, bins = bins.len(), "Segment 0 amount histogram")
            }
            DistributionView::RiskCounts {
                low_risk,
                high_risk,
            } => info!(rows = report.rows, low_risk, high_risk, "Segment 0 risk counts"),
        }
        match &report.attribution {
            Ok(ranking) => {
                for contribution in ranking {
                    info!(
                        feature = %contribution.feature,
                        value = format!("{:.4}", contribution.mean_abs),
                        "Segment 0 contributor"
                    );
                }
            }
            Err(e) => warn!(error = %e, "Segment 0 explanation unavailable"),
        }
    }

    output.summary.log_summary();
    info!("Pipeline shutting down...");
    Ok(())
}
