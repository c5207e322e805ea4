pub mod catalog;

use crate::dosing::as_seconds;
use crate::error::{PKError, PKResult};
use chrono::Duration;

/// A metabolite edge: a fraction of the mass a drug loses each step
/// becomes a dose of the target drug.
#[derive(Debug, Clone, PartialEq)]
pub struct Metabolite {
    pub target: String,
    pub factor: f64,
}

/// Static description of a substance.
///
/// Decay is exponential with `half_life`. An optional flood-in profile
/// spreads a nominal dose over the following time steps; the weights are
/// stored normalized so that they sum to one.
#[derive(Debug, Clone)]
pub struct Drug {
    pub name: String,
    pub blood_name: String,
    pub half_life: Duration,
    pub flood_in: Option<Vec<f64>>,
    pub flood_in_step: Duration,
    pub metabolites: Vec<Metabolite>,
    pub factor: f64,
}

impl Drug {
    pub fn new(name: &str, half_life: Duration) -> PKResult<Self> {
        if half_life <= Duration::zero() {
            return Err(PKError::InvalidDrug(
                format!("Half-life of {} must be positive", name)
            ));
        }
        
        Ok(Self {
            name: name.to_string(),
            blood_name: name.to_string(),
            half_life,
            flood_in: None,
            flood_in_step: Duration::hours(1),
            metabolites: Vec::new(),
            factor: 1.0,
        })
    }
    
    pub fn with_blood_name(mut self, blood_name: &str) -> Self {
        self.blood_name = blood_name.to_string();
        self
    }
    
    /// Sets the absorption profile. Weights must be non-negative with a
    /// positive sum; they are normalized on the way in.
    pub fn with_flood_in(mut self, weights: &[f64]) -> PKResult<Self> {
        if weights.is_empty() {
            return Err(PKError::InvalidDrug(
                format!("Flood-in profile of {} is empty", self.name)
            ));
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(PKError::InvalidDrug(
                format!("Flood-in profile of {} has negative or non-finite weights", self.name)
            ));
        }
        
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(PKError::InvalidDrug(
                format!("Flood-in profile of {} must have a positive sum", self.name)
            ));
        }
        
        self.flood_in = Some(weights.iter().map(|w| w / total).collect());
        Ok(self)
    }
    
    pub fn with_flood_in_step(mut self, step: Duration) -> PKResult<Self> {
        if step <= Duration::zero() {
            return Err(PKError::InvalidDrug(
                format!("Flood-in step of {} must be positive", self.name)
            ));
        }
        self.flood_in_step = step;
        Ok(self)
    }
    
    pub fn with_metabolite(mut self, target: &str, factor: f64) -> Self {
        self.metabolites.push(Metabolite {
            target: target.to_string(),
            factor,
        });
        self
    }
    
    pub fn set_factor(&mut self, factor: f64) {
        self.factor = factor;
    }
    
    pub fn half_life_in_steps(&self, step: Duration) -> f64 {
        as_seconds(self.half_life) / as_seconds(step)
    }
    
    /// Multiplier applied to the amount in the body over one simulation step.
    pub fn get_metabolism_factor(&self, step: Duration) -> f64 {
        2f64.powf(-1.0 / self.half_life_in_steps(step))
    }
    
    /// Splits the mass lost during one step over the metabolite edges.
    pub fn get_metabolites(&self, decayed_amount: f64) -> Vec<(String, f64)> {
        self.metabolites
            .iter()
            .map(|m| (m.target.clone(), decayed_amount * m.factor))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    
    #[test]
    fn test_decay_law_over_one_half_life() {
        let cases = [
            (Duration::hours(24), Duration::hours(1)),
            (Duration::hours(36), Duration::minutes(5)),
            (Duration::hours(10), Duration::minutes(7)),
            (Duration::days(9), Duration::hours(5)),
        ];
        
        for (half_life, step) in cases {
            let drug = Drug::new("Test", half_life).unwrap();
            let factor = drug.get_metabolism_factor(step);
            let steps = drug.half_life_in_steps(step);
            
            for seed in [1.0, 7.5, 1234.0] {
                // a fractional number of steps is applied as a fractional power
                let value = seed * factor.powf(steps);
                assert_relative_eq!(value, seed / 2.0, max_relative = 1e-10);
            }
        }
    }
    
    #[test]
    fn test_decay_law_repeated_steps() {
        let drug = Drug::new("Test", Duration::hours(24)).unwrap();
        let factor = drug.get_metabolism_factor(Duration::hours(1));
        
        let mut value = 10.0;
        for _ in 0..24 {
            value *= factor;
        }
        assert_relative_eq!(value, 5.0, max_relative = 1e-10);
    }
    
    #[test]
    fn test_rejects_non_positive_half_life() {
        assert!(Drug::new("Broken", Duration::zero()).is_err());
        assert!(Drug::new("Broken", Duration::hours(-3)).is_err());
    }
    
    #[test]
    fn test_flood_in_is_normalized() {
        let drug = Drug::new("Gel", Duration::hours(36))
            .unwrap()
            .with_flood_in(&[1.0, 2.0, 3.0, 2.0, 1.0])
            .unwrap();
        
        let flood_in = drug.flood_in.unwrap();
        assert_eq!(flood_in.len(), 5);
        assert_relative_eq!(flood_in.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(flood_in[2], 3.0 / 9.0, epsilon = 1e-12);
    }
    
    #[test]
    fn test_rejects_degenerate_flood_in() {
        let drug = || Drug::new("Test", Duration::hours(1)).unwrap();
        
        assert!(drug().with_flood_in(&[]).is_err());
        assert!(drug().with_flood_in(&[0.0, 0.0]).is_err());
        assert!(drug().with_flood_in(&[1.0, -0.5]).is_err());
        assert!(drug().with_flood_in_step(Duration::minutes(-1)).is_err());
    }
    
    #[test]
    fn test_metabolite_split() {
        let drug = Drug::new("Parent", Duration::hours(1))
            .unwrap()
            .with_metabolite("a", 0.25)
            .with_metabolite("b", 0.5);
        
        let out = drug.get_metabolites(8.0);
        assert_eq!(out, vec![("a".to_string(), 2.0), ("b".to_string(), 4.0)]);
    }
}
