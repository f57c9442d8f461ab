//! Core library for aligning sparse backtest returns onto a dense underlying price series.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod aligner;
mod interp;
mod spacing;
mod table;

pub use aligner::{align_series, interpolate, place_returns};
pub use interp::{cumulative_with_gaps, fill_linear, fill_natural_cubic, NaturalCubicSpline};
pub use spacing::{
    even_spacing_candidates, final_mapping, index_mapping, plan_mapping, select_indices_to_drop,
    MappingPlan,
};
pub use table::{parse_dense_csv, parse_sparse_csv};

#[derive(Error, Debug)]
pub enum AlignError {
    #[error("invalid input shape: {sparse} sparse returns cannot be placed into {dense} dense rows")]
    InputShape { sparse: usize, dense: usize },
    #[error("insufficient data for interpolation: need {required} known points, have {available}")]
    InsufficientDataForInterpolation { required: usize, available: usize },
    #[error("schema error: {0}")]
    Schema(String),
    #[error("row {row}: cannot parse {column} value '{value}'")]
    Parse {
        row: usize,
        column: String,
        value: String,
    },
    #[error("failed to read CSV: {0}")]
    Csv(String),
    #[error("index mapping has {actual} entries, expected {expected}")]
    MappingCount { expected: usize, actual: usize },
    #[error("invalid index mapping: {0}")]
    InvalidMapping(String),
    #[error("return {index} is not a finite number: {value}")]
    NonFiniteReturn { index: usize, value: f64 },
}

impl From<csv::Error> for AlignError {
    fn from(err: csv::Error) -> Self {
        AlignError::Csv(err.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DenseRecord {
    /// Raw `Date` cell, kept verbatim for labels.
    pub date: String,
    pub timestamp: Option<NaiveDateTime>,
    pub close: f64,
}

/// Full-resolution underlying series; its row positions define the time grid.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DenseSeries {
    pub records: Vec<DenseRecord>,
}

impl DenseSeries {
    pub fn new(records: Vec<DenseRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// First and last raw `Date` values.
    pub fn date_range(&self) -> Option<(&str, &str)> {
        let first = self.records.first()?;
        let last = self.records.last()?;
        Some((first.date.as_str(), last.date.as_str()))
    }

    pub fn closes(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.close).collect()
    }

    /// Row-over-row percent change of `Close`; the first row has no predecessor.
    pub fn close_pct_change(&self) -> Vec<Option<f64>> {
        pct_change(&self.closes())
    }

    /// Running sum of the `Close` percent changes, with undefined rows left as gaps.
    pub fn cumulative_close_returns(&self) -> Vec<Option<f64>> {
        cumulative_with_gaps(&self.close_pct_change())
    }

    /// Percent change between every `step`-th close.
    pub fn sampled_close_returns(&self, step: usize) -> Vec<f64> {
        let sampled: Vec<f64> = self
            .records
            .iter()
            .step_by(step.max(1))
            .map(|r| r.close)
            .collect();
        pct_change(&sampled).into_iter().flatten().collect()
    }
}

fn pct_change(values: &[f64]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    if values.is_empty() {
        return out;
    }
    out.push(None);
    for w in values.windows(2) {
        let change = (w[1] - w[0]) / w[0];
        out.push(change.is_finite().then_some(change));
    }
    out
}

/// Backtest returns without timestamps, one value per trade.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseSeries {
    /// Header of the column the returns came from.
    pub name: String,
    pub values: Vec<f64>,
}

impl SparseSeries {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Strictly increasing row positions of the sparse values inside the dense grid.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMapping(Vec<usize>);

impl IndexMapping {
    /// Validate that `indices` are strictly increasing and all below `bound`.
    pub fn try_new(indices: Vec<usize>, bound: usize) -> Result<Self, AlignError> {
        if let Some(w) = indices.windows(2).find(|w| w[1] <= w[0]) {
            return Err(AlignError::InvalidMapping(format!(
                "indices not strictly increasing: {} then {}",
                w[0], w[1]
            )));
        }
        if let Some(&last) = indices.last() {
            if last >= bound {
                return Err(AlignError::InvalidMapping(format!(
                    "index {last} outside frame of {bound} rows"
                )));
            }
        }
        Ok(Self(indices))
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    pub fn into_inner(self) -> Vec<usize> {
        self.0
    }
}

/// The dense-length column of placed returns, before cumulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlacedReturns {
    pub values: Vec<Option<f64>>,
    /// Row 0 was empty and got a zero.
    pub forced_head: bool,
    /// Row n-1 was empty and got a zero.
    pub forced_tail: bool,
}

impl PlacedReturns {
    pub fn known_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CumulativeCurves {
    /// Running sum over known rows; gaps stay empty.
    pub cumulative: Vec<Option<f64>>,
    pub linear: Vec<f64>,
    pub cubic: Vec<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentStats {
    pub dense_len: usize,
    pub sparse_len: usize,
    pub stride: usize,
    pub candidate_count: usize,
    pub dropped_count: usize,
    pub forced_head: bool,
    pub forced_tail: bool,
}

/// Dense rows with the sparse returns placed and cumulated onto them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignedFrame {
    pub dense: DenseSeries,
    pub sparse: SparseSeries,
    pub mapping: IndexMapping,
    pub placed: PlacedReturns,
    pub curves: CumulativeCurves,
    pub stats: AlignmentStats,
}

impl AlignedFrame {
    pub fn len(&self) -> usize {
        self.dense.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    pub fn placed_returns(&self) -> &[Option<f64>] {
        &self.placed.values
    }

    pub fn linear_cumulative(&self) -> &[f64] {
        &self.curves.linear
    }

    pub fn cubic_cumulative(&self) -> &[f64] {
        &self.curves.cubic
    }

    pub fn underlying_cumulative(&self) -> Vec<Option<f64>> {
        self.dense.cumulative_close_returns()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(closes: &[f64]) -> DenseSeries {
        DenseSeries::new(
            closes
                .iter()
                .enumerate()
                .map(|(i, &close)| DenseRecord {
                    date: format!("2022-04-{:02}", i + 1),
                    timestamp: None,
                    close,
                })
                .collect(),
        )
    }

    #[test]
    fn test_pct_change_leaves_first_row_empty() {
        let series = dense(&[100.0, 110.0, 99.0]);
        let pct = series.close_pct_change();
        assert_eq!(pct[0], None);
        assert!((pct[1].unwrap() - 0.1).abs() < 1e-12);
        assert!((pct[2].unwrap() + 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_pct_change_skips_zero_base() {
        let series = dense(&[0.0, 5.0, 10.0]);
        let pct = series.close_pct_change();
        assert_eq!(pct[1], None);
        assert!((pct[2].unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cumulative_close_returns() {
        let series = dense(&[100.0, 110.0, 99.0]);
        let cum = series.cumulative_close_returns();
        assert_eq!(cum[0], None);
        assert!((cum[1].unwrap() - 0.1).abs() < 1e-12);
        assert!(cum[2].unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_sampled_close_returns() {
        let series = dense(&[100.0, 1.0, 120.0, 1.0, 60.0]);
        let sampled = series.sampled_close_returns(2);
        assert_eq!(sampled.len(), 2);
        assert!((sampled[0] - 0.2).abs() < 1e-12);
        assert!((sampled[1] + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_date_range() {
        let series = dense(&[1.0, 2.0, 3.0]);
        assert_eq!(series.date_range(), Some(("2022-04-01", "2022-04-03")));
        assert_eq!(DenseSeries::default().date_range(), None);
    }

    #[test]
    fn test_index_mapping_validation() {
        assert!(IndexMapping::try_new(vec![0, 3, 6], 7).is_ok());
        assert!(matches!(
            IndexMapping::try_new(vec![0, 3, 3], 7),
            Err(AlignError::InvalidMapping(_))
        ));
        assert!(matches!(
            IndexMapping::try_new(vec![0, 7], 7),
            Err(AlignError::InvalidMapping(_))
        ));
    }
}
