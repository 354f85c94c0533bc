//! Batch detection pipeline: validate input, load or fit a model, score,
//! label, and report.
//!
//! The pipeline is the seam between the ingestion collaborator (which hands
//! over raw records) and the presentation collaborator (which consumes
//! labeled results). Record-level problems are collected and reported next
//! to the successful results; only schema, configuration, and model-artifact
//! problems abort a batch.
//!
//! There is no process-wide "current model": callers either configure a
//! model path on the pipeline or hold a fitted [`IsolationForest`] value and
//! pass it in explicitly. A fitted forest is immutable, so it can be shared
//! across concurrent detection calls while a retrain builds its replacement.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::{CentinelaError, Result};
use crate::forest::{
    IsolationForest, DEFAULT_CONTAMINATION, DEFAULT_NUM_TREES,
};
use crate::store;
use crate::threshold::Label;

/// Required amount column name, matched case-sensitively.
pub const AMOUNT_COLUMN: &str = "Amount";

/// A transaction as handed over by the ingestion collaborator.
///
/// Every field except the parsed amount passes through the pipeline
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Unique record identifier.
    pub id: String,
    /// Raw field values keyed by column name.
    pub fields: BTreeMap<String, String>,
}

impl RawRecord {
    /// Creates a record with no fields.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds a field value.
    #[must_use]
    pub fn with_field(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(column.into(), value.into());
        self
    }
}

/// An ordered batch of records plus the column set it was ingested with.
#[derive(Debug, Clone)]
pub struct RecordBatch {
    columns: Vec<String>,
    records: Vec<RawRecord>,
}

impl RecordBatch {
    /// Creates a batch from its declared columns and records.
    #[must_use]
    pub fn new(columns: Vec<String>, records: Vec<RawRecord>) -> Self {
        Self { columns, records }
    }

    /// Convenience constructor for id/amount pairs.
    pub fn from_amounts<I, S>(amounts: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let records = amounts
            .into_iter()
            .map(|(id, amount)| RawRecord::new(id).with_field(AMOUNT_COLUMN, amount.to_string()))
            .collect();
        Self {
            columns: vec!["id".to_string(), AMOUNT_COLUMN.to_string()],
            records,
        }
    }

    /// Declared column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Records in ingestion order.
    #[must_use]
    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Case-sensitive column presence check.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }
}

/// Why a record was excluded from scoring.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// The record carries no amount value.
    MissingAmount,
    /// The amount value does not parse as a number.
    NotNumeric(String),
    /// The amount parsed but is NaN or infinite.
    NonFinite(f64),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MissingAmount => write!(f, "missing amount"),
            RejectReason::NotNumeric(raw) => write!(f, "amount '{raw}' is not numeric"),
            RejectReason::NonFinite(value) => write!(f, "amount {value} is not finite"),
        }
    }
}

/// A record excluded from scoring, reported instead of silently dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    /// Position of the record in the input batch.
    pub index: usize,
    /// Identifier of the rejected record.
    pub id: String,
    /// Why it was excluded.
    pub reason: RejectReason,
}

/// One scored and labeled transaction.
///
/// Serialized field names follow the external interface: `id`, `Amount`,
/// `AnomalyScore`, `Label`.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    /// Identifier of the scored record.
    pub id: String,
    /// The validated amount.
    #[serde(rename = "Amount")]
    pub amount: f64,
    /// Anomaly score in roughly `[0, 1]`; higher is more anomalous.
    #[serde(rename = "AnomalyScore")]
    pub anomaly_score: f64,
    /// Classification against the calibrated threshold.
    #[serde(rename = "Label")]
    pub label: Label,
}

/// Outcome of a detection run: labeled results in input order plus the
/// records that were excluded from scoring.
#[derive(Debug, Clone)]
pub struct DetectionReport {
    /// Scored records, preserving batch order.
    pub results: Vec<DetectionResult>,
    /// Excluded records with reasons, preserving batch order.
    pub rejected: Vec<RejectedRecord>,
}

impl DetectionReport {
    /// Only the records labeled as bill shock.
    pub fn anomalies(&self) -> impl Iterator<Item = &DetectionResult> {
        self.results
            .iter()
            .filter(|r| r.label == Label::BillShock)
    }

    /// Number of records labeled as bill shock.
    #[must_use]
    pub fn num_flagged(&self) -> usize {
        self.anomalies().count()
    }

    /// Flagged share of the scored records (0 when nothing was scored).
    #[must_use]
    pub fn flagged_fraction(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.num_flagged() as f64 / self.results.len() as f64
        }
    }
}

/// End-to-end detection orchestrator.
///
/// # Examples
///
/// ```
/// use centinela::pipeline::{DetectionPipeline, RecordBatch};
///
/// let batch = RecordBatch::from_amounts([
///     ("t1", 100.0),
///     ("t2", 150.0),
///     ("t3", 200.0),
///     ("t4", 250.0),
///     ("t5", 300.0),
///     ("t6", 9000.0),
/// ]);
///
/// let pipeline = DetectionPipeline::new()
///     .with_contamination(0.2)
///     .with_random_state(42);
/// let report = pipeline.run(&batch).expect("detection succeeds");
///
/// assert_eq!(report.results.len(), 6);
/// assert!(report.anomalies().any(|r| r.id == "t6"));
/// ```
#[derive(Debug, Clone)]
pub struct DetectionPipeline {
    model_path: Option<PathBuf>,
    num_trees: usize,
    subsample_size: Option<usize>,
    contamination: f64,
    random_state: Option<u64>,
}

impl Default for DetectionPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionPipeline {
    /// Creates a pipeline with the default forest parameters and no model
    /// path.
    #[must_use]
    pub fn new() -> Self {
        Self {
            model_path: None,
            num_trees: DEFAULT_NUM_TREES,
            subsample_size: None,
            contamination: DEFAULT_CONTAMINATION,
            random_state: None,
        }
    }

    /// Sets where models are persisted to and loaded from.
    #[must_use]
    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    /// Sets the ensemble size used when fitting.
    #[must_use]
    pub fn with_num_trees(mut self, num_trees: usize) -> Self {
        self.num_trees = num_trees;
        self
    }

    /// Sets an explicit per-tree subsample size used when fitting.
    #[must_use]
    pub fn with_subsample_size(mut self, subsample_size: usize) -> Self {
        self.subsample_size = Some(subsample_size);
        self
    }

    /// Sets the expected anomaly fraction used when fitting.
    #[must_use]
    pub fn with_contamination(mut self, contamination: f64) -> Self {
        self.contamination = contamination;
        self
    }

    /// Sets the fit seed for reproducibility.
    #[must_use]
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Runs detection end to end.
    ///
    /// Validates the batch schema, excludes records without a finite
    /// amount, then scores against a model obtained in this order: the
    /// configured model path if its file exists, otherwise a fresh forest
    /// fitted from the batch's own valid amounts.
    ///
    /// # Errors
    ///
    /// - `Schema` if the batch is empty or lacks the `Amount` column
    /// - `CorruptModel` if a persisted artifact fails validation
    /// - `ModelNotFound` if there is no loadable model and no valid amounts
    ///   to fit from
    /// - `InsufficientData`/`InvalidParameter` from fitting
    pub fn run(&self, batch: &RecordBatch) -> Result<DetectionReport> {
        validate_schema(batch)?;
        let (valid, rejected) = extract_amounts(batch);
        if !rejected.is_empty() {
            log::warn!("{} of {} records rejected before scoring", rejected.len(), batch.len());
        }

        let amounts: Vec<f64> = valid.iter().map(|v| v.amount).collect();
        let forest = self.acquire_model(&amounts)?;
        let report = score_valid(&forest, valid, rejected);
        log::info!(
            "detected {} anomalies in {} transactions ({:.1}%)",
            report.num_flagged(),
            report.results.len(),
            report.flagged_fraction() * 100.0
        );
        Ok(report)
    }

    /// Runs detection against an explicitly passed fitted forest.
    ///
    /// Never fits or touches disk; the forest is only read.
    ///
    /// # Errors
    ///
    /// Returns `Schema` if the batch is empty or lacks the `Amount` column.
    ///
    /// # Panics
    ///
    /// Panics if the forest is not fitted.
    pub fn run_with_model(
        &self,
        forest: &IsolationForest,
        batch: &RecordBatch,
    ) -> Result<DetectionReport> {
        validate_schema(batch)?;
        let (valid, rejected) = extract_amounts(batch);
        Ok(score_valid(forest, valid, rejected))
    }

    /// Trains a forest from a batch and persists it when a model path is
    /// configured.
    ///
    /// Records without a finite amount are dropped from training (with a
    /// warning), matching detection's validation rules. The returned forest
    /// carries its calibrated threshold.
    ///
    /// # Errors
    ///
    /// - `Schema` if the batch is empty or lacks the `Amount` column
    /// - `InsufficientData` if too few valid amounts remain
    /// - `InvalidParameter` for an out-of-range configuration
    /// - `Io`/`Serialization` if persisting fails
    pub fn train(&self, batch: &RecordBatch) -> Result<IsolationForest> {
        validate_schema(batch)?;
        let (valid, rejected) = extract_amounts(batch);
        if !rejected.is_empty() {
            log::warn!("{} of {} records dropped from training", rejected.len(), batch.len());
        }
        let amounts: Vec<f64> = valid.iter().map(|v| v.amount).collect();
        if amounts.is_empty() {
            return Err(CentinelaError::InsufficientData {
                required: 2,
                actual: 0,
            });
        }

        log::info!(
            "training on {} transactions (contamination={})",
            amounts.len(),
            self.contamination
        );
        let mut forest = self.configured_forest();
        forest.fit(&amounts)?;

        if let Some(path) = &self.model_path {
            store::save(&forest, path)?;
        }
        Ok(forest)
    }

    fn configured_forest(&self) -> IsolationForest {
        let mut forest = IsolationForest::new()
            .with_num_trees(self.num_trees)
            .with_contamination(self.contamination);
        if let Some(size) = self.subsample_size {
            forest = forest.with_subsample_size(size);
        }
        if let Some(seed) = self.random_state {
            forest = forest.with_random_state(seed);
        }
        forest
    }

    fn acquire_model(&self, amounts: &[f64]) -> Result<IsolationForest> {
        if let Some(path) = &self.model_path {
            if path.exists() {
                return store::load(path);
            }
            log::warn!(
                "model file {} not found, fitting from the provided batch",
                path.display()
            );
        }
        if amounts.is_empty() {
            return Err(CentinelaError::ModelNotFound {
                message: "no persisted model and no valid training records supplied".to_string(),
            });
        }
        let mut forest = self.configured_forest();
        forest.fit(amounts)?;
        Ok(forest)
    }
}

/// A record that passed validation, with its parsed amount.
#[derive(Debug, Clone)]
struct ValidRecord {
    id: String,
    amount: f64,
}

fn validate_schema(batch: &RecordBatch) -> Result<()> {
    if batch.is_empty() {
        return Err(CentinelaError::Schema {
            message: "batch contains no records".to_string(),
        });
    }
    if !batch.has_column(AMOUNT_COLUMN) {
        let available = batch.columns().join(", ");
        return Err(CentinelaError::Schema {
            message: format!(
                "required column '{AMOUNT_COLUMN}' not found, available: {available}"
            ),
        });
    }
    Ok(())
}

fn extract_amounts(batch: &RecordBatch) -> (Vec<ValidRecord>, Vec<RejectedRecord>) {
    let mut valid = Vec::with_capacity(batch.len());
    let mut rejected = Vec::new();

    for (index, record) in batch.records().iter().enumerate() {
        let reject = |reason| RejectedRecord {
            index,
            id: record.id.clone(),
            reason,
        };
        match record.fields.get(AMOUNT_COLUMN).map(|raw| raw.trim()) {
            None => rejected.push(reject(RejectReason::MissingAmount)),
            Some("") => rejected.push(reject(RejectReason::MissingAmount)),
            Some(raw) => match raw.parse::<f64>() {
                Err(_) => rejected.push(reject(RejectReason::NotNumeric(raw.to_string()))),
                Ok(amount) if !amount.is_finite() => {
                    rejected.push(reject(RejectReason::NonFinite(amount)));
                }
                Ok(amount) => valid.push(ValidRecord {
                    id: record.id.clone(),
                    amount,
                }),
            },
        }
    }

    (valid, rejected)
}

fn score_valid(
    forest: &IsolationForest,
    valid: Vec<ValidRecord>,
    rejected: Vec<RejectedRecord>,
) -> DetectionReport {
    let amounts: Vec<f64> = valid.iter().map(|v| v.amount).collect();
    let labels = forest.predict(&amounts);
    let scores = forest.score_samples(&amounts);

    let results = valid
        .into_iter()
        .zip(scores)
        .zip(labels)
        .map(|((record, anomaly_score), label)| DetectionResult {
            id: record.id,
            amount: record.amount,
            anomaly_score,
            label,
        })
        .collect();

    DetectionReport { results, rejected }
}
