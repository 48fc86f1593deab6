//! Trend classification over a card's effectiveness series

use serde::{Deserialize, Serialize};

/// Fewer points than this are always reported as stable
pub const MIN_TREND_POINTS: usize = 5;

/// Slopes with a smaller magnitude count as flat
pub const STABLE_SLOPE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

impl Trend {
    /// Multiplier applied to the promotion score
    pub fn factor(&self) -> f64 {
        match self {
            Trend::Improving => 1.1,
            Trend::Stable => 1.0,
            Trend::Declining => 0.9,
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Improving => write!(f, "improving"),
            Trend::Stable => write!(f, "stable"),
            Trend::Declining => write!(f, "declining"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendAnalysis {
    pub trend: Trend,
    /// Fitted slope per usage
    pub change_rate: f64,
    pub confidence: f64,
}

impl Default for TrendAnalysis {
    fn default() -> Self {
        Self {
            trend: Trend::Stable,
            change_rate: 0.0,
            confidence: 0.5,
        }
    }
}

/// Fit a least-squares line through `values` (in chronological order) and classify its slope
pub fn analyze_trend(values: &[f64]) -> TrendAnalysis {
    if values.len() < MIN_TREND_POINTS {
        return TrendAnalysis::default();
    }

    let slope = ols_slope(values);
    let trend = classify(slope);
    TrendAnalysis {
        trend,
        change_rate: slope,
        confidence: (1.0 - variance(values)).clamp(0.1, 0.9),
    }
}

pub fn classify(slope: f64) -> Trend {
    if slope.abs() < STABLE_SLOPE {
        Trend::Stable
    } else if slope > 0.0 {
        Trend::Improving
    } else {
        Trend::Declining
    }
}

/// Slope of y against x = 0, 1, 2, ...
fn ols_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut spread = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        covariance += dx * (y - mean_y);
        spread += dx * dx;
    }
    if spread == 0.0 {
        0.0
    } else {
        covariance / spread
    }
}

/// Population variance
fn variance(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}
