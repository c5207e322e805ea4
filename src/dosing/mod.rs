use crate::drugs::Drug;
use chrono::{Duration, NaiveDateTime};
use std::collections::VecDeque;

pub fn as_seconds(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}

/// Floors `time` onto the grid `origin + k * step`.
pub fn truncate_time(time: NaiveDateTime, origin: NaiveDateTime, step: Duration) -> NaiveDateTime {
    let step_ms = step.num_milliseconds().max(1);
    let offset_ms = (time - origin).num_milliseconds();
    origin + Duration::milliseconds(offset_ms.div_euclid(step_ms) * step_ms)
}

/// A single administration of a drug, referenced by registry key.
///
/// Whole doses are what the user entered; partial doses are the slices
/// produced by flood-in expansion or by metabolite conversion and are
/// never expanded again.
#[derive(Debug, Clone, PartialEq)]
pub struct Dose {
    pub drug: String,
    pub amount: f64,
    pub time: NaiveDateTime,
    pub partial: bool,
}

impl Dose {
    pub fn new(drug: &str, amount: f64, time: NaiveDateTime) -> Self {
        Self {
            drug: drug.to_string(),
            amount,
            time,
            partial: false,
        }
    }
    
    pub fn partial(drug: &str, amount: f64, time: NaiveDateTime) -> Self {
        Self {
            drug: drug.to_string(),
            amount,
            time,
            partial: true,
        }
    }
    
    pub fn truncated(mut self, origin: NaiveDateTime, step: Duration) -> Self {
        self.time = truncate_time(self.time, origin, step);
        self
    }
    
    pub fn get_partial_doses(&self, drug: &Drug) -> Vec<Dose> {
        match &drug.flood_in {
            Some(flood_in) if !self.partial && !flood_in.is_empty() => flood_in
                .iter()
                .enumerate()
                .map(|(i, weight)| {
                    Dose::partial(
                        &self.drug,
                        self.amount * weight,
                        self.time + drug.flood_in_step * i as i32,
                    )
                })
                .collect(),
            _ => vec![Dose::partial(&self.drug, self.amount, self.time)],
        }
    }
}

/// Pending doses of one drug in chronological order.
#[derive(Debug, Clone, Default)]
pub struct DoseQueue {
    doses: VecDeque<Dose>,
}

impl DoseQueue {
    /// Inserts after every dose with the same or an earlier time.
    pub fn insert_sorted(&mut self, dose: Dose) {
        let position = self.doses.partition_point(|d| d.time <= dose.time);
        self.doses.insert(position, dose);
    }
    
    /// Queues a dose that is due immediately.
    pub fn push_due(&mut self, dose: Dose) {
        self.doses.push_front(dose);
    }
    
    /// Pops every dose due at or before `time` and returns the summed amount.
    pub fn drain_due(&mut self, time: NaiveDateTime) -> f64 {
        let mut total = 0.0;
        while let Some(dose) = self.doses.front() {
            if dose.time > time {
                break;
            }
            total += dose.amount;
            self.doses.pop_front();
        }
        total
    }
    
    pub fn len(&self) -> usize {
        self.doses.len()
    }
    
    pub fn is_empty(&self) -> bool {
        self.doses.is_empty()
    }
}
