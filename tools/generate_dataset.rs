//! Synthetic Dataset Generator
//!
//! Writes a seeded policy/claim CSV with the columns the pipeline expects,
//! for local runs without the production dataset.
//!
//! Build with `--features testing`.

use anyhow::Context;
use claim_risk_pipeline::testing::SyntheticDataset;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use tracing::info;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("generate_dataset=info".parse()?),
        )
        .init();

    info!("Starting Synthetic Dataset Generator");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let output = args
        .get(1)
        .map(|s| s.as_str())
        .unwrap_or("data/eswatini_insurance_final_dataset.csv");
    let count: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1000);
    let seed: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(42);
    let missing_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.05);

    info!(
        output = %output,
        count,
        seed,
        missing_rate,
        "Configuration loaded"
    );

    let table = SyntheticDataset::new(count, seed)
        .with_missing_rate(missing_rate)
        .table()?;

    let path = Path::new(output);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {output}"))?;
    table.to_csv_writer(BufWriter::new(file))?;

    info!(
        rows = table.n_rows(),
        missing = table.missing_count(),
        "Dataset written to {}",
        output
    );
    Ok(())
}
