//! Domain types shared by every pipeline stage.

pub mod interval;
pub mod record;
pub mod table;

pub use interval::{Field, Interval, IntervalRow};
pub use record::{RawRecord, SourceKind};
pub use table::{FeatureTable, TableError};
