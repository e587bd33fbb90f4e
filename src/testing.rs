//! Seeded synthetic policy/claim datasets for tests and demos.
//!
//! Claim amounts depend on claim type, policy type, age and dependents, so
//! the top-quartile label is learnable from the other columns.

use crate::error::PipelineResult;
use crate::types::{Column, Table};
use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const CLAIM_TYPES: [(&str, f64); 5] = [
    ("Accident", 14_000.0),
    ("Fire", 26_000.0),
    ("Medical", 6_000.0),
    ("Theft", 9_000.0),
    ("Death", 20_000.0),
];
const POLICY_TYPES: [(&str, f64); 3] = [("Basic", 0.8), ("Standard", 1.0), ("Premium", 1.4)];
const PROVIDERS: [&str; 4] = ["Eswatini Insurance", "Old Mutual", "Sanlam", "Momentum"];
const GENDERS: [&str; 2] = ["Female", "Male"];
/// Region and approximate centre (latitude, longitude)
const LOCATIONS: [(&str, f64, f64); 4] = [
    ("Hhohho", -26.05, 31.25),
    ("Manzini", -26.50, 31.38),
    ("Lubombo", -26.45, 31.95),
    ("Shiselweni", -27.10, 31.30),
];

/// Builder for a synthetic dataset with the required input columns
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    records: usize,
    seed: u64,
    missing_rate: f64,
}

impl SyntheticDataset {
    pub fn new(records: usize, seed: u64) -> Self {
        Self {
            records,
            seed,
            missing_rate: 0.0,
        }
    }

    /// Blank this share of the `age`, `gender` and `premium_SZL` cells
    pub fn with_missing_rate(mut self, rate: f64) -> Self {
        self.missing_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn table(&self) -> PipelineResult<Table> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let n = self.records;

        let mut amount = Vec::with_capacity(n);
        let mut claim_type = Vec::with_capacity(n);
        let mut gender = Vec::with_capacity(n);
        let mut age = Vec::with_capacity(n);
        let mut dependents = Vec::with_capacity(n);
        let mut premium = Vec::with_capacity(n);
        let mut location = Vec::with_capacity(n);
        let mut policy_type = Vec::with_capacity(n);
        let mut provider = Vec::with_capacity(n);
        let mut start_date = Vec::with_capacity(n);
        let mut claim_date = Vec::with_capacity(n);
        let mut latitude = Vec::with_capacity(n);
        let mut longitude = Vec::with_capacity(n);

        let epoch = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap_or_default();

        for _ in 0..n {
            let (kind, base) = CLAIM_TYPES[rng.gen_range(0..CLAIM_TYPES.len())];
            let (policy, factor) = POLICY_TYPES[rng.gen_range(0..POLICY_TYPES.len())];
            let (region, lat, lon) = LOCATIONS[rng.gen_range(0..LOCATIONS.len())];
            let years: f64 = rng.gen_range(18.0..80.0_f64).round();
            let kids = rng.gen_range(0..6) as f64;

            let age_factor = 1.0 + (years - 18.0) / 100.0;
            let noise = rng.gen_range(0.75..1.25);
            let claim = (base * factor * age_factor * (1.0 + kids * 0.05) * noise).round();

            let start = epoch + Duration::days(rng.gen_range(0..2900));
            let claimed = start + Duration::days(rng.gen_range(30..1000));

            amount.push(Some(claim));
            claim_type.push(Some(kind.to_string()));
            policy_type.push(Some(policy.to_string()));
            provider.push(Some(PROVIDERS[rng.gen_range(0..PROVIDERS.len())].to_string()));
            location.push(Some(region.to_string()));
            latitude.push(Some(lat + rng.gen_range(-0.15..0.15)));
            longitude.push(Some(lon + rng.gen_range(-0.15..0.15)));
            start_date.push(Some(start.format("%Y-%m-%d").to_string()));
            claim_date.push(Some(claimed.format("%Y-%m-%d").to_string()));
            dependents.push(Some(kids));

            let blank = |rng: &mut StdRng| rng.gen_bool(self.missing_rate);
            age.push(if blank(&mut rng) { None } else { Some(years) });
            gender.push(if blank(&mut rng) {
                None
            } else {
                Some(GENDERS[rng.gen_range(0..GENDERS.len())].to_string())
            });
            let paid = (factor * rng.gen_range(150.0..450.0_f64)).round();
            premium.push(if blank(&mut rng) { None } else { Some(paid) });
        }

        let columns = vec![
            Column::numeric("claim_amount_SZL", amount),
            Column::text("claim_type", claim_type),
            Column::text("gender", gender),
            Column::numeric("age", age),
            Column::numeric("num_dependents", dependents),
            Column::numeric("premium_SZL", premium),
            Column::text("location", location),
            Column::text("policy_type", policy_type),
            Column::text("insurance_provider", provider),
            Column::text("policy_start_date", start_date),
            Column::text("claim_date", claim_date),
            Column::numeric("Latitude", latitude),
            Column::numeric("Longitude", longitude),
        ];
        Table::new(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_dataset_has_required_columns() {
        let table = SyntheticDataset::new(40, 1).table().unwrap();
        let config = AppConfig::default();
        assert!(table
            .require_columns(&config.data.required_columns, crate::error::Stage::Ingestion)
            .is_ok());
        assert_eq!(table.n_rows(), 40);
        assert_eq!(table.missing_count(), 0);
    }

    #[test]
    fn test_dataset_is_seeded() {
        let a = SyntheticDataset::new(30, 9).table().unwrap();
        let b = SyntheticDataset::new(30, 9).table().unwrap();
        assert_eq!(a.columns(), b.columns());
    }

    #[test]
    fn test_missing_rate_blanks_cells() {
        let table = SyntheticDataset::new(200, 2).with_missing_rate(0.2).table().unwrap();
        assert!(table.missing_count() > 0);
        assert_eq!(table.column("claim_date").unwrap().data.missing_count(), 0);
    }
}
