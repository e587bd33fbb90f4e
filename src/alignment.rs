//! Reconciles ad hoc encoded frames with a trained schema.

use crate::schema::EncodedSchema;
use crate::types::EncodedFrame;
use ndarray::Array2;
use tracing::debug;

/// Reshapes frames to exactly the columns of an `EncodedSchema`.
///
/// Columns missing from the input are filled with 0, extra columns are
/// dropped and the result follows the schema's order. Values of shared
/// columns pass through unchanged, so aligning twice is a no-op.
#[derive(Debug, Clone, Copy)]
pub struct SchemaAligner<'a> {
    schema: &'a EncodedSchema,
}

impl<'a> SchemaAligner<'a> {
    pub fn new(schema: &'a EncodedSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &EncodedSchema {
        self.schema
    }

    pub fn align(&self, frame: &EncodedFrame) -> EncodedFrame {
        let sources: Vec<Option<usize>> = self
            .schema
            .columns()
            .iter()
            .map(|name| frame.column_index(name))
            .collect();

        let mut values = Array2::zeros((frame.n_rows(), self.schema.len()));
        for (target, source) in sources.iter().enumerate() {
            if let Some(source) = source {
                values.column_mut(target).assign(&frame.values().column(*source));
            }
        }

        let filled = sources.iter().filter(|s| s.is_none()).count();
        let dropped = frame
            .columns()
            .iter()
            .filter(|c| self.schema.index_of(c).is_none())
            .count();
        debug!(
            rows = frame.n_rows(),
            filled,
            dropped,
            "Aligned frame to trained schema"
        );

        EncodedFrame::from_parts(self.schema.columns().to_vec(), values)
    }
}
