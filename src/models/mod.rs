//! Risk model training, prediction and persistence

pub mod classifier;
pub mod forest;
pub mod store;

pub use classifier::{ClassScore, FeatureImportance, RiskClassifier, TrainedModel};
pub use forest::{DecisionTree, RandomForest};
pub use store::{ModelSnapshot, ModelStore, PersistOutcome};
