use chrono::NaiveDateTime;
use std::collections::BTreeMap;

/// One blood draw: measured concentrations keyed by drug key.
#[derive(Debug, Clone, PartialEq)]
pub struct LabObservation {
    pub time: NaiveDateTime,
    pub values: BTreeMap<String, f64>,
}

impl LabObservation {
    pub fn new(time: NaiveDateTime) -> Self {
        Self {
            time,
            values: BTreeMap::new(),
        }
    }
    
    pub fn with_value(mut self, drug: &str, value: f64) -> Self {
        self.add_value(drug, value);
        self
    }
    
    pub fn add_value(&mut self, drug: &str, value: f64) {
        self.values.insert(drug.to_string(), value);
    }
    
    pub fn get(&self, drug: &str) -> Option<f64> {
        self.values.get(drug).copied()
    }
}
