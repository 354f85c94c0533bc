//! Centinela: unsupervised bill-shock detection for transaction amounts.
//!
//! Centinela flags transactions whose amount is statistically unusual
//! relative to a historical distribution, without labeled examples of fraud
//! or error. An ensemble of random partitioning trees (an isolation forest)
//! scores each amount by how quickly it isolates; a contamination rate
//! calibrates the score cutoff; the fitted ensemble persists to a versioned
//! artifact and reloads with identical scoring behavior.
//!
//! # Quick Start
//!
//! ```
//! use centinela::prelude::*;
//!
//! let amounts = [100.0, 150.0, 200.0, 250.0, 300.0, 350.0, 400.0, 9000.0];
//!
//! let mut forest = IsolationForest::new()
//!     .with_contamination(0.2)
//!     .with_random_state(42);
//! forest.fit(&amounts).unwrap();
//!
//! let labels = forest.predict(&amounts);
//! assert_eq!(labels[7], Label::BillShock);
//! assert_eq!(labels[0], Label::Normal);
//! ```
//!
//! # Modules
//!
//! - [`tree`]: Random partitioning trees and the path-length correction
//! - [`forest`]: The isolation-forest estimator (fit, score, predict)
//! - [`threshold`]: Contamination-calibrated cutoff selection and labels
//! - [`store`]: Versioned model persistence with fail-closed validation
//! - [`pipeline`]: Batch orchestration from raw records to labeled results
//! - [`error`]: Error types

pub mod error;
pub mod forest;
pub mod pipeline;
pub mod prelude;
pub mod store;
pub mod threshold;
pub mod tree;

pub use error::{CentinelaError, Result};
pub use forest::IsolationForest;
pub use pipeline::{DetectionPipeline, DetectionReport, DetectionResult, RecordBatch};
pub use threshold::Label;
