//! Running window sums over a fixed series.
//!
//! The series is summed in blocks of the largest small prime factor shared
//! by all requested window lengths, the block sums are split by residue and
//! each residue class is handled recursively with the remaining factors. A
//! window that is a multiple of the node's factor descends into one child;
//! anything else is answered from the node's aligned power-of-two block
//! sums. A window sum only ever adds values that lie inside the window, so
//! a large value that has left the window cannot swallow the small ones.

use std::collections::BTreeMap;

pub const PRIME_FACTORS: [usize; 5] = [2, 3, 5, 7, 11];

/// Splits `n` into factors from `PRIME_FACTORS` (ascending) and the
/// remaining cofactor.
pub fn factorize(n: usize) -> (Vec<usize>, usize) {
    let mut rest = n;
    let mut factors = Vec::new();
    if rest == 0 {
        return (factors, 0);
    }
    
    for &prime in &PRIME_FACTORS {
        while rest % prime == 0 {
            factors.push(prime);
            rest /= prime;
        }
    }
    (factors, rest)
}

/// Factors shared by every window length, counted with multiplicity.
pub fn common_factors(windows: &[usize]) -> Vec<usize> {
    let mut common: Option<BTreeMap<usize, usize>> = None;
    
    for &window in windows.iter().filter(|w| **w > 1) {
        let mut counts = BTreeMap::new();
        for factor in factorize(window).0 {
            *counts.entry(factor).or_insert(0) += 1;
        }
        
        common = Some(match common {
            None => counts,
            Some(previous) => previous
                .into_iter()
                .filter_map(|(factor, count)| {
                    counts.get(&factor).map(|other| (factor, count.min(*other)))
                })
                .collect(),
        });
    }
    
    common
        .unwrap_or_default()
        .into_iter()
        .flat_map(|(factor, count)| std::iter::repeat(factor).take(count))
        .collect()
}

/// Sum of each value and its `width - 1` predecessors (missing ones count as zero).
fn block_sums(data: &[f64], width: usize) -> Vec<f64> {
    (0..data.len())
        .map(|i| data[(i + 1).saturating_sub(width)..=i].iter().sum())
        .collect()
}

/// `levels[k][j]` is the sum of `data[j * 2^k .. (j + 1) * 2^k]`; only full
/// blocks are kept.
fn aligned_sums(data: &[f64]) -> Vec<Vec<f64>> {
    let mut levels = vec![data.to_vec()];
    loop {
        let next: Vec<f64> = match levels.last() {
            Some(last) => last.chunks_exact(2).map(|pair| pair[0] + pair[1]).collect(),
            None => break,
        };
        if next.is_empty() {
            break;
        }
        levels.push(next);
    }
    levels
}

fn modulo_group(data: &[f64], n: usize) -> Vec<Vec<f64>> {
    let mut groups = vec![Vec::with_capacity(data.len() / n + 1); n];
    for (i, value) in data.iter().enumerate() {
        groups[i % n].push(*value);
    }
    groups
}

#[derive(Debug, Clone)]
pub struct GroupSum {
    factor: usize,
    levels: Vec<Vec<f64>>,
    groups: Vec<GroupSum>,
}

impl GroupSum {
    /// Builds the tree using `factors` in ascending order; the largest
    /// factor forms the top level.
    pub fn new(data: &[f64], factors: &[usize]) -> Self {
        let levels = aligned_sums(data);
        
        match factors.split_last() {
            Some((&factor, rest)) if factor > 1 && data.len() > factor => {
                let blocks = block_sums(data, factor);
                let groups = modulo_group(&blocks, factor)
                    .iter()
                    .map(|group| GroupSum::new(group, rest))
                    .collect();
                Self { factor, levels, groups }
            }
            _ => Self {
                factor: 1,
                levels,
                groups: Vec::new(),
            },
        }
    }
    
    pub fn for_windows(data: &[f64], windows: &[usize]) -> Self {
        Self::new(data, &common_factors(windows))
    }
    
    fn len(&self) -> usize {
        self.levels.first().map_or(0, |values| values.len())
    }
    
    /// Sum of `values[start..end]` from the largest aligned blocks that fit.
    fn range_sum(&self, start: usize, end: usize) -> f64 {
        let mut total = 0.0;
        let mut i = start;
        while i < end {
            let mut level = 0;
            while level + 1 < self.levels.len() {
                let width = 1 << (level + 1);
                if i % width != 0 || i + width > end {
                    break;
                }
                level += 1;
            }
            total += self.levels[level][i >> level];
            i += 1 << level;
        }
        total
    }
    
    /// Sum of the `length` values ending at index `n` (clipped at the start
    /// of the series). `n` must be below the series length.
    pub fn get_sum(&self, length: usize, n: usize) -> f64 {
        if length == 0 {
            return 0.0;
        }
        
        if !self.groups.is_empty() && length % self.factor == 0 {
            let item_num = n / self.factor;
            let offset = n % self.factor;
            return self.groups[offset].get_sum(length / self.factor, item_num);
        }
        
        self.range_sum((n + 1).saturating_sub(length), n + 1)
    }
    
    pub fn running_sums(&self, length: usize) -> Vec<f64> {
        if length <= 1 {
            return self.levels.first().cloned().unwrap_or_default();
        }
        (0..self.len()).map(|n| self.get_sum(length, n)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    
    fn naive_sums(data: &[f64], length: usize) -> Vec<f64> {
        (0..data.len())
            .map(|i| data[(i + 1).saturating_sub(length)..=i].iter().sum())
            .collect()
    }
    
    fn integer_series(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.gen_range(0..1000) as f64).collect()
    }
    
    #[test]
    fn test_factorize() {
        assert_eq!(factorize(120), (vec![2, 2, 2, 3, 5], 1));
        assert_eq!(factorize(2160), (vec![2, 2, 2, 2, 3, 3, 3, 5], 1));
        assert_eq!(factorize(26), (vec![2], 13));
        assert_eq!(factorize(1), (vec![], 1));
    }
    
    #[test]
    fn test_common_factors() {
        assert_eq!(common_factors(&[120, 720, 2160]), vec![2, 2, 2, 3, 5]);
        assert_eq!(common_factors(&[5, 30, 90]), vec![5]);
        assert_eq!(common_factors(&[13, 26]), Vec::<usize>::new());
        assert_eq!(common_factors(&[]), Vec::<usize>::new());
    }
    
    #[test]
    fn test_matches_naive_sums() {
        let data = integer_series(5000, 7);
        let windows = [120, 720, 2160];
        let tree = GroupSum::for_windows(&data, &windows);
        
        for window in windows.iter().copied().chain([1, 7, 13, 60, 121, 4999, 6000]) {
            assert_eq!(tree.running_sums(window), naive_sums(&data, window), "window {}", window);
        }
    }
    
    #[test]
    fn test_unfactorable_window() {
        let data = integer_series(1000, 11);
        let tree = GroupSum::for_windows(&data, &[143, 169]);
        
        assert_eq!(tree.running_sums(143), naive_sums(&data, 143));
        assert_eq!(tree.running_sums(169), naive_sums(&data, 169));
    }
    
    #[test]
    fn test_arbitrary_factor_chains() {
        let data = integer_series(777, 3);
        for factors in [vec![2, 3], vec![7, 11], vec![2, 2, 5, 5], vec![3, 3, 3]] {
            let tree = GroupSum::new(&data, &factors);
            for window in [2, 6, 9, 10, 27, 50, 77, 100] {
                assert_eq!(tree.running_sums(window), naive_sums(&data, window));
            }
        }
    }
    
    #[test]
    fn test_short_and_empty_series() {
        let tree = GroupSum::for_windows(&[1.0, 2.0, 3.0], &[30]);
        assert_eq!(tree.running_sums(30), vec![1.0, 3.0, 6.0]);
        assert_eq!(tree.running_sums(1), vec![1.0, 2.0, 3.0]);
        
        let empty = GroupSum::for_windows(&[], &[30]);
        assert!(empty.running_sums(30).is_empty());
        assert!(empty.running_sums(1).is_empty());
    }
    
    #[test]
    fn test_small_values_after_a_spike() {
        let data = [1e16, 3.0, 1.0, 0.0];
        let tree = GroupSum::for_windows(&data, &[2]);
        assert_eq!(tree.running_sums(1), data.to_vec());
        assert_eq!(tree.running_sums(2)[2..], [4.0, 1.0]);
        assert_eq!(tree.running_sums(3)[3], 4.0);
    }
    
    #[test]
    fn test_wide_dynamic_range() {
        let mut rng = StdRng::seed_from_u64(23);
        let data: Vec<f64> = (0..3000)
            .map(|_| rng.gen::<f64>() * 10f64.powi(rng.gen_range(-6..13)))
            .collect();
        let windows = [120, 720, 24];
        let tree = GroupSum::for_windows(&data, &windows);
        
        for window in windows.iter().copied().chain([1, 7, 50]) {
            let sums = tree.running_sums(window);
            for (i, expected) in naive_sums(&data, window).iter().enumerate() {
                assert_relative_eq!(sums[i], *expected, max_relative = 1e-12);
            }
        }
    }
}
