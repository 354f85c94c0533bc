//! Convenience re-exports for common usage.
//!
//! # Usage
//!
//! ```
//! use centinela::prelude::*;
//! ```

pub use crate::error::{CentinelaError, Result};
pub use crate::forest::IsolationForest;
pub use crate::pipeline::{
    DetectionPipeline, DetectionReport, DetectionResult, RawRecord, RecordBatch, RejectedRecord,
};
pub use crate::store::{load, save};
pub use crate::threshold::{classify, select_threshold, Label};
