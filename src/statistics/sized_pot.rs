use super::StdDevCorrection;
use std::collections::VecDeque;

/// Keeps the most recent `size` values of a stream.
#[derive(Debug, Clone)]
pub struct SizedPot {
    size: usize,
    data: VecDeque<f64>,
}

impl SizedPot {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            data: VecDeque::with_capacity(size + 1),
        }
    }
    
    pub fn add_data(&mut self, point: f64) {
        if self.size == 0 {
            return;
        }
        
        self.data.push_back(point);
        while self.data.len() > self.size {
            self.data.pop_front();
        }
    }
    
    /// Standard deviation of the buffered values around `average`.
    pub fn calc_std_dev(&self, average: f64, correction: StdDevCorrection) -> f64 {
        let n = self.data.len();
        if n <= 1 {
            return 0.0;
        }
        
        let denominator = correction.denominator(n);
        if denominator <= 0.0 {
            return 0.0;
        }
        
        let squares: f64 = self.data.iter().map(|x| (x - average).powi(2)).sum();
        (squares / denominator).sqrt()
    }
    
    pub fn running_std_dev(&mut self, point: f64, average: f64, correction: StdDevCorrection) -> f64 {
        self.add_data(point);
        self.calc_std_dev(average, correction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    
    #[test]
    fn test_keeps_last_values() {
        let mut pot = SizedPot::new(3);
        for x in [1.0, 2.0, 3.0, 4.0, 5.0] {
            pot.add_data(x);
        }
        // 3, 4, 5 around 4: squares sum to 2
        assert_relative_eq!(pot.calc_std_dev(4.0, StdDevCorrection::Bessel), 1.0, epsilon = 1e-12);
        assert_relative_eq!(
            pot.calc_std_dev(4.0, StdDevCorrection::SmallSample),
            (2.0f64 / 1.5).sqrt(),
            epsilon = 1e-12
        );
    }
    
    #[test]
    fn test_single_value_has_no_spread() {
        let mut pot = SizedPot::new(10);
        assert_eq!(pot.running_std_dev(42.0, 42.0, StdDevCorrection::SmallSample), 0.0);
        assert_eq!(pot.running_std_dev(40.0, 41.0, StdDevCorrection::Population), 1.0);
    }
    
    #[test]
    fn test_matches_direct_computation_after_turnover() {
        let values: Vec<f64> = (0..500).map(|i| ((i * 37) % 101) as f64 * 0.5 + 1000.0).collect();
        let mut pot = SizedPot::new(24);
        
        for (i, value) in values.iter().enumerate() {
            pot.add_data(*value);
            let window = &values[(i + 1).saturating_sub(24)..=i];
            let mean = window.iter().sum::<f64>() / window.len() as f64;
            let direct = if window.len() > 1 {
                (window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (window.len() as f64 - 1.5)).sqrt()
            } else {
                0.0
            };
            assert_relative_eq!(
                pot.calc_std_dev(mean, StdDevCorrection::SmallSample),
                direct,
                epsilon = 1e-6
            );
        }
    }
    
    #[test]
    fn test_small_spread_on_large_values() {
        let mut pot = SizedPot::new(4);
        for x in [1e9 + 1.0, 1e9 + 2.0, 1e9 + 3.0, 1e9 + 4.0] {
            pot.add_data(x);
        }
        // squares around the mean sum to 5
        assert_relative_eq!(
            pot.calc_std_dev(1e9 + 2.5, StdDevCorrection::Bessel),
            (5.0f64 / 3.0).sqrt(),
            epsilon = 1e-12
        );
    }
}
