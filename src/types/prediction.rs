//! Risk prediction data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Probability above which a policy is labeled high risk
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Binary risk classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "Low Risk")]
    Low,
    #[serde(rename = "High Risk")]
    High,
}

impl RiskLevel {
    /// Map a predicted label (0/1) to a risk level
    pub fn from_label(label: u8) -> Self {
        if label == 1 {
            RiskLevel::High
        } else {
            RiskLevel::Low
        }
    }

    /// Label value of this level
    pub fn label(self) -> u8 {
        match self {
            RiskLevel::Low => 0,
            RiskLevel::High => 1,
        }
    }

    /// Display name used in logs and exports
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "Low Risk",
            RiskLevel::High => "High Risk",
        }
    }

    /// Parse the display name back
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Low Risk" => Some(RiskLevel::Low),
            "High Risk" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

/// Label assigned to a forest probability (ties go to the low-risk class)
pub fn label_for_probability(probability: f64) -> u8 {
    if probability > DECISION_THRESHOLD {
        1
    } else {
        0
    }
}

/// Outcome of scoring a single policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskPrediction {
    /// Unique prediction identifier
    pub prediction_id: String,

    /// Predicted label (1 = high risk)
    pub label: u8,

    /// Probability of the high-risk class (0.0 - 1.0)
    pub probability: f64,

    /// Risk level classification
    pub risk_level: RiskLevel,

    /// Prediction timestamp
    pub timestamp: DateTime<Utc>,
}

impl RiskPrediction {
    /// Create a prediction from a forest probability
    pub fn from_probability(probability: f64) -> Self {
        let label = label_for_probability(probability);
        Self {
            prediction_id: uuid::Uuid::new_v4().to_string(),
            label,
            probability,
            risk_level: RiskLevel::from_label(label),
            timestamp: Utc::now(),
        }
    }

    pub fn is_high_risk(&self) -> bool {
        self.risk_level == RiskLevel::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_for_probability() {
        assert_eq!(label_for_probability(0.2), 0);
        assert_eq!(label_for_probability(0.5), 0);
        assert_eq!(label_for_probability(0.51), 1);
    }

    #[test]
    fn test_risk_level_names() {
        assert_eq!(RiskLevel::High.as_str(), "High Risk");
        assert_eq!(RiskLevel::parse("Low Risk"), Some(RiskLevel::Low));
        assert_eq!(RiskLevel::parse("medium"), None);
        assert_eq!(RiskLevel::from_label(1).label(), 1);
    }

    #[test]
    fn test_prediction_serialization() {
        let prediction = RiskPrediction::from_probability(0.78);
        assert!(prediction.is_high_risk());

        let json = serde_json::to_string(&prediction).unwrap();
        assert!(json.contains("\"High Risk\""));
        let deserialized: RiskPrediction = serde_json::from_str(&json).unwrap();

        assert_eq!(prediction.prediction_id, deserialized.prediction_id);
        assert_eq!(prediction.probability, deserialized.probability);
        assert_eq!(prediction.risk_level, deserialized.risk_level);
    }
}
