pub mod group_sum;
pub mod sized_pot;

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use group_sum::GroupSum;
pub use sized_pot::SizedPot;

/// Denominator used for a sample standard deviation of `n` values.
///
/// `SmallSample` (n - 1.5) is the convention of the moving deviation bands;
/// it widens small windows slightly more than Bessel's correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StdDevCorrection {
    Population,
    Bessel,
    SmallSample,
}

impl StdDevCorrection {
    pub fn from_corrected(corrected: bool) -> Self {
        if corrected {
            StdDevCorrection::Bessel
        } else {
            StdDevCorrection::Population
        }
    }
    
    pub fn denominator(&self, n: usize) -> f64 {
        let n = n as f64;
        match self {
            StdDevCorrection::Population => n,
            StdDevCorrection::Bessel if n > 1.0 => n - 1.0,
            StdDevCorrection::SmallSample if n > 1.0 => n - 1.5,
            _ => n,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovingStatistics {
    pub window: usize,
    pub average: Vec<f64>,
    pub std_dev: Vec<f64>,
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

pub fn std_dev(values: &[f64], correction: StdDevCorrection) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let denominator = correction.denominator(values.len());
    if denominator <= 0.0 {
        return 0.0;
    }
    
    let mean_val = mean(values);
    let variance = values.iter()
        .map(|v| (v - mean_val).powi(2))
        .sum::<f64>() / denominator;
    variance.sqrt()
}

/// Divides running sums by the number of values actually in each window.
pub fn running_average(sums: &[f64], window: usize) -> Vec<f64> {
    sums.iter()
        .enumerate()
        .map(|(i, sum)| sum / window.min(i + 1).max(1) as f64)
        .collect()
}

fn window_statistics(
    tree: &GroupSum,
    series: &[f64],
    window: usize,
    correction: StdDevCorrection,
) -> MovingStatistics {
    if window <= 1 {
        return MovingStatistics {
            window: 1,
            average: series.to_vec(),
            std_dev: vec![0.0; series.len()],
        };
    }
    
    let average = running_average(&tree.running_sums(window), window);
    
    let mut pot = SizedPot::new(window);
    let std_dev = series.iter()
        .zip(&average)
        .map(|(value, avg)| pot.running_std_dev(*value, *avg, correction))
        .collect();
    
    MovingStatistics { window, average, std_dev }
}

/// Moving average and deviation of `series` for every window length.
///
/// The windows are evaluated in parallel over a shared block-sum tree;
/// results come back in the order of `windows`.
pub fn moving_statistics(
    series: &[f64],
    windows: &[usize],
    correction: StdDevCorrection,
) -> Vec<MovingStatistics> {
    let tree = GroupSum::for_windows(series, windows);
    debug!("Computing moving statistics for windows {:?} over {} values", windows, series.len());
    
    windows
        .par_iter()
        .map(|window| window_statistics(&tree, series, *window, correction))
        .collect()
}
