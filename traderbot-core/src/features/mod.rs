//! Resample → align → transform → label.
//!
//! Each stage is a pure function over in-memory tables; the pipeline module
//! wires them together.

pub mod align;
pub mod labels;
pub mod resample;
pub mod transform;

pub use align::{align, column_name, drop_incomplete_edges, interpolate, AlignError, NamedSeries};
pub use labels::{generate_labels, DatasetSplit, LabelError, LabeledDataset};
pub use resample::resample;
pub use transform::{FeatureTransformer, RatioSpec, TransformError, TransformOutput, TransformWarning};
