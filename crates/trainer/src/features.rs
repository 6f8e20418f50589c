//! Feature engineering for transaction records
//!
//! Turns filtered records into fixed-order numeric rows:
//! - ordered filter predicates, applied before anything else
//! - one-hot program flags by exact identifier match
//! - median imputation of absent values over the filtered set
//!
//! The resulting [`FeatureSchema`] travels with the model so inference
//! replays exactly the same columns, program key and fill values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::dataset::Dataset;
use crate::errors::PipelineError;
use crate::record::{ProgramKey, TransactionRecord, JUPITER_PROGRAM_ID, RAYDIUM_PROGRAM_ID};
use belay_forest_core::ModelKind;

/// A numeric feature derived from one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeatureColumn {
    InstructionCount,
    AccountCount,
    DataSize,
    PriorityFee,
    NetworkCongestion,
    ComputeUnitsUsed,
    SlotTime,
    ProgramJupiter,
    ProgramRaydium,
}

impl FeatureColumn {
    pub const ALL: [FeatureColumn; 9] = [
        FeatureColumn::InstructionCount,
        FeatureColumn::AccountCount,
        FeatureColumn::DataSize,
        FeatureColumn::PriorityFee,
        FeatureColumn::NetworkCongestion,
        FeatureColumn::ComputeUnitsUsed,
        FeatureColumn::SlotTime,
        FeatureColumn::ProgramJupiter,
        FeatureColumn::ProgramRaydium,
    ];

    /// Column name as it appears in records and metadata
    pub fn name(self) -> &'static str {
        match self {
            FeatureColumn::InstructionCount => "instructionCount",
            FeatureColumn::AccountCount => "accountCount",
            FeatureColumn::DataSize => "dataSize",
            FeatureColumn::PriorityFee => "priorityFee",
            FeatureColumn::NetworkCongestion => "networkCongestion",
            FeatureColumn::ComputeUnitsUsed => "computeUnitsUsed",
            FeatureColumn::SlotTime => "slotTime",
            FeatureColumn::ProgramJupiter => "program_jupiter",
            FeatureColumn::ProgramRaydium => "program_raydium",
        }
    }

    /// Raw value for `record`; `None` when the record lacks the field.
    /// Program flags are never absent.
    pub fn value(self, record: &TransactionRecord, key: ProgramKey) -> Option<f64> {
        match self {
            FeatureColumn::InstructionCount => record.instruction_count,
            FeatureColumn::AccountCount => record.account_count,
            FeatureColumn::DataSize => record.data_size,
            FeatureColumn::PriorityFee => record.priority_fee,
            FeatureColumn::NetworkCongestion => record.network_congestion,
            FeatureColumn::ComputeUnitsUsed => record.compute_units_used,
            FeatureColumn::SlotTime => record.slot_time,
            FeatureColumn::ProgramJupiter => Some(program_flag(record, key, JUPITER_PROGRAM_ID)),
            FeatureColumn::ProgramRaydium => Some(program_flag(record, key, RAYDIUM_PROGRAM_ID)),
        }
    }
}

fn program_flag(record: &TransactionRecord, key: ProgramKey, program_id: &str) -> f64 {
    if key.resolve(record) == Some(program_id) {
        1.0
    } else {
        0.0
    }
}

impl fmt::Display for FeatureColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FeatureColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureColumn::ALL
            .iter()
            .copied()
            .find(|column| column.name() == s)
            .ok_or_else(|| format!("unknown feature column '{}'", s))
    }
}

/// Quantity the model learns to predict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetColumn {
    ComputeUnitsUsed,
    PriorityFee,
    /// 1 = success, 0 = failure
    Success,
}

impl TargetColumn {
    pub fn name(self) -> &'static str {
        match self {
            TargetColumn::ComputeUnitsUsed => "computeUnitsUsed",
            TargetColumn::PriorityFee => "priorityFee",
            TargetColumn::Success => "success",
        }
    }

    pub fn value(self, record: &TransactionRecord) -> Option<f64> {
        match self {
            TargetColumn::ComputeUnitsUsed => record.compute_units_used,
            TargetColumn::PriorityFee => record.priority_fee,
            TargetColumn::Success => Some(if record.success { 1.0 } else { 0.0 }),
        }
    }

    pub fn kind(self) -> ModelKind {
        match self {
            TargetColumn::Success => ModelKind::Classifier,
            _ => ModelKind::Regressor,
        }
    }

    /// Display unit for regression errors
    pub fn unit(self) -> &'static str {
        match self {
            TargetColumn::ComputeUnitsUsed => "CU",
            TargetColumn::PriorityFee => "SOL",
            TargetColumn::Success => "",
        }
    }

    /// Decimal places used when rendering target values
    pub fn precision(self) -> usize {
        match self {
            TargetColumn::ComputeUnitsUsed => 0,
            TargetColumn::PriorityFee => 8,
            TargetColumn::Success => 3,
        }
    }
}

/// Record-level predicate applied before feature extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filter {
    /// `success == true`
    Successful,
    /// `priorityFee > 0`
    PositiveFee,
    /// `computeUnitsUsed` present
    HasComputeUnits,
}

impl Filter {
    pub fn matches(self, record: &TransactionRecord) -> bool {
        match self {
            Filter::Successful => record.success,
            Filter::PositiveFee => record.priority_fee.is_some_and(|fee| fee > 0.0),
            Filter::HasComputeUnits => record.compute_units_used.is_some(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Filter::Successful => "success",
            Filter::PositiveFee => "positive_priority_fee",
            Filter::HasComputeUnits => "has_compute_units",
        }
    }
}

impl FromStr for Filter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Filter::Successful),
            "positive_priority_fee" => Ok(Filter::PositiveFee),
            "has_compute_units" => Ok(Filter::HasComputeUnits),
            other => Err(format!("unknown filter '{}'", other)),
        }
    }
}

/// Keep records passing every filter, in input order
pub fn apply_filters(records: &[TransactionRecord], filters: &[Filter]) -> Vec<TransactionRecord> {
    records
        .iter()
        .filter(|record| filters.iter().all(|filter| filter.matches(record)))
        .cloned()
        .collect()
}

/// Median of `values`; mean of the two middle values for even counts
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Column layout and fill values a model was trained with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub columns: Vec<FeatureColumn>,
    pub target: TargetColumn,
    pub program_key: ProgramKey,
    /// Median per column over the training set, aligned with `columns`
    pub fill_values: Vec<f64>,
}

impl FeatureSchema {
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name().to_string()).collect()
    }

    /// Build the feature row for `record`, filling absent values
    pub fn vector(&self, record: &TransactionRecord) -> Vec<f64> {
        self.columns
            .iter()
            .zip(&self.fill_values)
            .map(|(column, fill)| column.value(record, self.program_key).unwrap_or(*fill))
            .collect()
    }
}

/// Summary of one feature column over the filtered set
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    pub column: FeatureColumn,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    /// Rows whose value was absent and replaced by `median`
    pub imputed: usize,
}

/// Output of [`FeatureBuilder::build`]
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub dataset: Dataset,
    pub schema: FeatureSchema,
    pub stats: Vec<ColumnStats>,
    /// Records that passed the filters and carried a target
    pub usable_records: usize,
}

/// Filters, encodes and imputes records into a [`Dataset`]
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    pub columns: Vec<FeatureColumn>,
    pub target: TargetColumn,
    pub filters: Vec<Filter>,
    pub program_key: ProgramKey,
    pub min_samples: usize,
}

impl FeatureBuilder {
    pub fn build(&self, records: &[TransactionRecord]) -> Result<FeatureSet, PipelineError> {
        if self.columns.is_empty() {
            return Err(PipelineError::Validation(
                "at least one feature column is required".to_string(),
            ));
        }

        let filtered = apply_filters(records, &self.filters);
        info!(
            "{} of {} transactions pass filters [{}]",
            filtered.len(),
            records.len(),
            self.filters.iter().map(|f| f.name()).collect::<Vec<_>>().join(", ")
        );

        let with_target: Vec<&TransactionRecord> = filtered
            .iter()
            .filter(|record| self.target.value(record).is_some())
            .collect();
        let dropped = filtered.len() - with_target.len();
        if dropped > 0 {
            warn!(
                "Dropped {} transactions without a {} value",
                dropped,
                self.target.name()
            );
        }

        if with_target.len() < self.min_samples {
            return Err(PipelineError::InsufficientData {
                required: self.min_samples,
                available: with_target.len(),
            });
        }

        let mut fill_values = Vec::with_capacity(self.columns.len());
        let mut stats = Vec::with_capacity(self.columns.len());
        for &column in &self.columns {
            let present: Vec<f64> = with_target
                .iter()
                .filter_map(|record| column.value(record, self.program_key))
                .collect();
            let imputed = with_target.len() - present.len();

            let Some(median) = median(&present) else {
                return Err(PipelineError::Dataset(format!(
                    "column {} has no values in the filtered transactions",
                    column
                )));
            };
            if imputed > 0 {
                info!("Imputed {} missing {} values with median {}", imputed, column, median);
            }

            let (min, max) = present
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
            fill_values.push(median);
            stats.push(ColumnStats {
                column,
                min,
                max,
                median,
                imputed,
            });
        }

        let schema = FeatureSchema {
            columns: self.columns.clone(),
            target: self.target,
            program_key: self.program_key,
            fill_values,
        };

        let mut features = Vec::with_capacity(with_target.len());
        let mut targets = Vec::with_capacity(with_target.len());
        for record in &with_target {
            let Some(target) = self.target.value(record) else {
                continue;
            };
            features.push(schema.vector(record));
            targets.push(target);
        }

        Ok(FeatureSet {
            dataset: Dataset::new(features, targets),
            usable_records: with_target.len(),
            schema,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(success: bool, fee: Option<f64>, cu: Option<f64>) -> TransactionRecord {
        TransactionRecord {
            success,
            program_id: Some(RAYDIUM_PROGRAM_ID.to_string()),
            instruction_count: Some(3.0),
            account_count: Some(8.0),
            priority_fee: fee,
            compute_units_used: cu,
            slot_time: Some(400.0),
            ..Default::default()
        }
    }

    fn builder(filters: Vec<Filter>, min_samples: usize) -> FeatureBuilder {
        FeatureBuilder {
            columns: vec![
                FeatureColumn::InstructionCount,
                FeatureColumn::ComputeUnitsUsed,
                FeatureColumn::ProgramJupiter,
                FeatureColumn::ProgramRaydium,
            ],
            target: TargetColumn::PriorityFee,
            filters,
            program_key: ProgramKey::ProgramId,
            min_samples,
        }
    }

    #[test]
    fn test_column_names_round_trip() {
        for column in FeatureColumn::ALL {
            assert_eq!(column.name().parse::<FeatureColumn>().unwrap(), column);
        }
        assert!("fee".parse::<FeatureColumn>().is_err());
    }

    #[test]
    fn test_program_flags_exact_match() {
        let mut rec = record(true, Some(1.0), None);
        assert_eq!(FeatureColumn::ProgramRaydium.value(&rec, ProgramKey::ProgramId), Some(1.0));
        assert_eq!(FeatureColumn::ProgramJupiter.value(&rec, ProgramKey::ProgramId), Some(0.0));
        // the other key is empty
        assert_eq!(FeatureColumn::ProgramRaydium.value(&rec, ProgramKey::Program), Some(0.0));

        rec.program_id = Some(format!("{} ", RAYDIUM_PROGRAM_ID));
        assert_eq!(FeatureColumn::ProgramRaydium.value(&rec, ProgramKey::ProgramId), Some(0.0));
    }

    #[test]
    fn test_filters_in_order() {
        let records = vec![
            record(true, Some(0.5), Some(1000.0)),
            record(false, Some(0.5), Some(1000.0)),
            record(true, Some(0.0), Some(1000.0)),
            record(true, None, None),
        ];
        let kept = apply_filters(&records, &[Filter::Successful, Filter::PositiveFee]);
        assert_eq!(kept, vec![records[0].clone()]);

        let kept = apply_filters(&records, &[Filter::HasComputeUnits]);
        assert_eq!(kept.len(), 3);
        assert_eq!(apply_filters(&kept, &[Filter::HasComputeUnits]), kept);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn test_imputation_uses_filtered_median() {
        let records = vec![
            record(true, Some(1.0), Some(100.0)),
            record(true, Some(2.0), None),
            record(true, Some(3.0), Some(300.0)),
            // filtered out, must not influence the median
            record(false, Some(4.0), Some(1_000_000.0)),
        ];
        let set = builder(vec![Filter::Successful], 0).build(&records).unwrap();

        assert_eq!(set.dataset.len(), 3);
        assert_eq!(set.dataset.features[1], vec![3.0, 200.0, 0.0, 1.0]);
        assert_eq!(set.dataset.targets, vec![1.0, 2.0, 3.0]);
        assert_eq!(set.schema.fill_values[1], 200.0);
        assert_eq!(set.stats[1].imputed, 1);
        assert!(set.dataset.features.iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn test_rows_without_target_dropped() {
        let records = vec![
            record(true, Some(1.0), Some(100.0)),
            record(true, None, Some(100.0)),
        ];
        let set = builder(vec![], 0).build(&records).unwrap();
        assert_eq!(set.usable_records, 1);
        assert_eq!(set.dataset.targets, vec![1.0]);
    }

    #[test]
    fn test_threshold_checked_after_filters() {
        let records: Vec<_> = (0..10)
            .map(|i| record(i % 2 == 0, Some(1.0), Some(100.0)))
            .collect();
        match builder(vec![Filter::Successful], 6).build(&records) {
            Err(PipelineError::InsufficientData { required, available }) => {
                assert_eq!((required, available), (6, 5));
            }
            other => panic!("unexpected result: {:?}", other.map(|s| s.usable_records)),
        }
    }

    #[test]
    fn test_column_without_values_rejected() {
        let records = vec![record(true, Some(1.0), None), record(true, Some(2.0), None)];
        let err = builder(vec![], 0).build(&records).unwrap_err();
        assert!(matches!(err, PipelineError::Dataset(_)));
    }

    #[test]
    fn test_schema_replays_fill_values() {
        let schema = FeatureSchema {
            columns: vec![FeatureColumn::SlotTime, FeatureColumn::ProgramRaydium],
            target: TargetColumn::Success,
            program_key: ProgramKey::Auto,
            fill_values: vec![420.0, 0.0],
        };
        let rec = TransactionRecord {
            program: Some(RAYDIUM_PROGRAM_ID.to_string()),
            ..Default::default()
        };
        assert_eq!(schema.vector(&rec), vec![420.0, 1.0]);
        assert_eq!(schema.names(), vec!["slotTime", "program_raydium"]);
    }
}
