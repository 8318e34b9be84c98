use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::model::TimeSeriesPoint;

/// Order of the points returned by a reducing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesOrder {
    /// Largest deviation from the mean first.
    #[default]
    ByDeviation,
    /// Survivors keep their position in the input.
    Original,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownsampleOptions {
    pub min_count: usize,
    pub max_count: usize,
    pub retain_ratio: f64,
    pub order: SeriesOrder,
}

impl Default for DownsampleOptions {
    fn default() -> Self {
        Self {
            min_count: 10,
            max_count: 30,
            retain_ratio: 0.3,
            order: SeriesOrder::ByDeviation,
        }
    }
}

impl DownsampleOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_count == 0 {
            return Err("downsample.max_count must be > 0".to_string());
        }
        if !(self.retain_ratio > 0.0 && self.retain_ratio <= 1.0) {
            return Err("downsample.retain_ratio must be in (0, 1]".to_string());
        }
        Ok(())
    }
}

/// Keep the points that deviate most from the mean until at most `max_count`
/// remain. Series already within `max_count` come back unchanged.
pub fn downsample(
    series: &[TimeSeriesPoint],
    min_count: usize,
    max_count: usize,
    retain_ratio: f64,
) -> Vec<TimeSeriesPoint> {
    downsample_with(
        series,
        &DownsampleOptions {
            min_count,
            max_count,
            retain_ratio,
            order: SeriesOrder::ByDeviation,
        },
    )
}

pub fn downsample_with(series: &[TimeSeriesPoint], options: &DownsampleOptions) -> Vec<TimeSeriesPoint> {
    if series.len() <= options.max_count {
        note_if_short(series.len(), options.min_count);
        return series.to_vec();
    }

    let mut current: Vec<(usize, &TimeSeriesPoint)> = series.iter().enumerate().collect();

    while current.len() > options.max_count {
        let len = current.len();
        let mean = current.iter().map(|(_, p)| p.value).sum::<f64>() / len as f64;

        let mut keep = options
            .min_count
            .max((options.retain_ratio * len as f64).round() as usize);
        if keep >= len {
            if options.min_count >= len {
                break;
            }
            keep = len - 1;
        }

        // sort_by is stable: equal deviations keep their relative order
        current.sort_by(|a, b| {
            let da = (a.1.value - mean).abs();
            let db = (b.1.value - mean).abs();
            db.partial_cmp(&da).unwrap_or(Ordering::Equal)
        });
        current.truncate(keep);
    }

    if options.order == SeriesOrder::Original {
        current.sort_by_key(|(idx, _)| *idx);
    }

    tracing::debug!(
        input = series.len(),
        output = current.len(),
        "downsampled series"
    );
    note_if_short(current.len(), options.min_count);

    current.into_iter().map(|(_, p)| p.clone()).collect()
}

fn note_if_short(len: usize, min_count: usize) {
    if len > 0 && len < min_count {
        tracing::debug!(len, min_count, "series shorter than minimum point count");
    }
}
