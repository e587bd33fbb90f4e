//! Type definitions for the claim risk pipeline

pub mod frame;
pub mod prediction;
pub mod table;

pub use frame::EncodedFrame;
pub use prediction::{RiskLevel, RiskPrediction};
pub use table::{Column, ColumnData, Table};
