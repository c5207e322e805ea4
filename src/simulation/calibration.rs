use super::{BodyModel, ModelState};
use crate::dosing::as_seconds;
use crate::error::{PKError, PKResult};
use crate::statistics::StdDevCorrection;
use chrono::{Duration, NaiveDateTime};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;

/// A regimen change. Lab draws on or after `date` calibrate a new segment;
/// the factor moves linearly to the new segment over `transition`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub date: NaiveDateTime,
    pub transition: Duration,
}

/// Multiplier from simulated body burden to blood level, and the spread of
/// the lab values around the calibrated curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationFactor {
    pub average: f64,
    pub std_dev: f64,
}

impl CalibrationFactor {
    pub const IDENTITY: CalibrationFactor = CalibrationFactor {
        average: 1.0,
        std_dev: 0.0,
    };
    
    /// Linear interpolation; `weight` 0 is `self`, 1 is `other`.
    pub fn blend(&self, other: &CalibrationFactor, weight: f64) -> CalibrationFactor {
        let weight = weight.clamp(0.0, 1.0);
        CalibrationFactor {
            average: self.average * (1.0 - weight) + other.average * weight,
            std_dev: self.std_dev * (1.0 - weight) + other.std_dev * weight,
        }
    }
    
    /// Fits the factor to `(raw, measured)` pairs. Returns `None` for an
    /// empty set.
    pub fn estimate(pairs: &[(f64, f64)], correction: StdDevCorrection) -> Option<CalibrationFactor> {
        if pairs.is_empty() {
            return None;
        }
        
        let n = pairs.len();
        let average = pairs.iter().map(|(raw, measured)| measured / raw).sum::<f64>() / n as f64;
        let squares: f64 = pairs.iter()
            .map(|(raw, measured)| (measured - raw * average).powi(2))
            .sum();
        let denominator = correction.denominator(n);
        let std_dev = if denominator > 0.0 {
            (squares / denominator).sqrt()
        } else {
            0.0
        };
        
        Some(CalibrationFactor { average, std_dev })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BloodLevel {
    pub raw: f64,
    pub average: f64,
    pub std_dev: f64,
}

impl BloodLevel {
    pub fn value(&self) -> f64 {
        self.raw * self.average
    }
    
    pub fn lower(&self, multiplier: f64) -> f64 {
        self.value() - self.std_dev * multiplier
    }
    
    pub fn upper(&self, multiplier: f64) -> f64 {
        self.value() + self.std_dev * multiplier
    }
}

/// Fills segments without lab data from the closest earlier calibrated
/// segment, or the closest later one if there is none before.
fn fill_segments(segments: &[Option<CalibrationFactor>]) -> Option<Vec<CalibrationFactor>> {
    let first = segments.iter().flatten().next().copied()?;
    let mut last = first;
    Some(segments.iter()
        .map(|segment| {
            if let Some(factor) = segment {
                last = *factor;
            }
            last
        })
        .collect())
}

impl BodyModel {
    pub fn add_event(&mut self, date: NaiveDateTime, transition: Duration) {
        let transition = if transition < Duration::zero() {
            warn!("Negative transition for the event at {}, using none", date);
            Duration::zero()
        } else {
            transition
        };
        
        self.events.push(Event { date, transition });
        self.events.sort_by_key(|e| e.date);
    }
    
    pub fn events(&self) -> &[Event] {
        &self.events
    }
    
    /// Index of the event segment `time` belongs to.
    pub fn segment_of(&self, time: NaiveDateTime) -> usize {
        self.events.partition_point(|e| e.date <= time)
    }
    
    /// Lab values of one drug in time order.
    pub fn lab_values(&self, key: &str) -> Vec<(NaiveDateTime, f64)> {
        let mut values: Vec<(NaiveDateTime, f64)> = self.labs.iter()
            .filter_map(|lab| lab.get(key).map(|v| (lab.time, v)))
            .collect();
        values.sort_by_key(|(time, _)| *time);
        values
    }
    
    /// Calibrates every drug with lab data against the raw timeline, one
    /// factor per event segment. Recomputes from scratch on every call.
    pub fn estimate_blood_levels(&mut self, correction: StdDevCorrection) -> PKResult<()> {
        if self.state == ModelState::Uninitialized {
            return Err(PKError::Simulation(
                "Timeline must be calculated before calibration".to_string()
            ));
        }
        
        let keys: std::collections::BTreeSet<String> = self.labs.iter()
            .flat_map(|lab| lab.values.keys().cloned())
            .collect();
        let mut calibration = BTreeMap::new();
        
        for key in keys {
            let timeline = match self.timeline.get(&key) {
                Some(timeline) => timeline,
                None => {
                    warn!("Lab values for {} but it was never simulated, skipping", key);
                    continue;
                }
            };
            
            let mut segments: Vec<Vec<(f64, f64)>> = vec![Vec::new(); self.events.len() + 1];
            for (time, measured) in self.lab_values(&key) {
                let index = match self.index_of(time) {
                    Some(index) => index,
                    None => {
                        warn!("Lab value for {} at {} is outside of the timeline", key, time);
                        continue;
                    }
                };
                let raw = timeline[index];
                if raw <= 0.0 {
                    warn!("No simulated {} at {}, cannot calibrate against {}", key, time, measured);
                    continue;
                }
                segments[self.segment_of(time)].push((raw, measured));
            }
            
            let factors: Vec<Option<CalibrationFactor>> = segments.iter()
                .map(|pairs| CalibrationFactor::estimate(pairs, correction))
                .collect();
            
            if let Some(filled) = fill_segments(&factors) {
                for (segment, factor) in filled.iter().enumerate() {
                    info!(
                        "Calibration for {} (segment {}): factor {:.4} ± {:.4} from {} lab values",
                        key, segment, factor.average, factor.std_dev, segments[segment].len()
                    );
                }
                calibration.insert(key, filled);
            }
        }
        
        self.calibration = calibration;
        self.state = ModelState::Calibrated;
        Ok(())
    }
    
    pub fn calibration_factors(&self, key: &str) -> Option<&[CalibrationFactor]> {
        self.calibration.get(key).map(|f| f.as_slice())
    }
    
    pub fn is_calibrated(&self, key: &str) -> bool {
        self.calibration.contains_key(key)
    }
    
    /// Calibration in effect at `time`, blended across event transitions.
    pub fn factor_at(&self, key: &str, time: NaiveDateTime) -> Option<CalibrationFactor> {
        let factors = self.calibration.get(key)?;
        let segment = self.segment_of(time).min(factors.len() - 1);
        let current = factors[segment];
        
        if segment > 0 {
            let event = &self.events[segment - 1];
            let elapsed = time - event.date;
            if elapsed < event.transition {
                let weight = as_seconds(elapsed) / as_seconds(event.transition);
                return Some(factors[segment - 1].blend(&current, weight));
            }
        }
        Some(current)
    }
    
    /// Raw value and calibration at `time`. Uncalibrated drugs report the
    /// identity factor.
    pub fn get_blood_level_at_timepoint(&self, key: &str, time: NaiveDateTime) -> PKResult<BloodLevel> {
        let raw = self.get_drug_at_timepoint(key, time)?;
        let factor = self.factor_at(key, time).unwrap_or(CalibrationFactor::IDENTITY);
        
        Ok(BloodLevel {
            raw,
            average: factor.average,
            std_dev: factor.std_dev,
        })
    }
    
    /// Human readable estimate for the current time; `None` when the drug
    /// has no lab values or the current time is not on the timeline.
    pub fn get_current_blood_level_message(
        &self,
        key: &str,
        std_dev_count: f64,
        p_confidence: &str,
    ) -> Option<String> {
        if !self.has_lab_data(key) {
            return None;
        }
        
        let now = self.now?;
        let level = self.get_blood_level_at_timepoint(key, now).ok()?;
        let name = self.drugs.get(key).map_or(key, |d| d.blood_name.as_str());
        
        Some(format!(
            "Current {} level: {:6.2} ± {:5.2} ng/l (P<{})",
            name,
            level.value(),
            level.std_dev * std_dev_count,
            p_confidence
        ))
    }
}
