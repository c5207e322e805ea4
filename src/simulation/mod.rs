pub mod calibration;
pub mod extraction;

use crate::dosing::{as_seconds, Dose, DoseQueue};
use crate::drugs::{catalog, Drug};
use crate::error::{PKError, PKResult};
use crate::labs::LabObservation;
use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

pub use calibration::*;
pub use extraction::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModelState {
    Uninitialized,
    TimelineBuilt,
    Calibrated,
}

/// Count and total amount of the whole doses entered for one drug.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DoseStatistics {
    pub count: usize,
    pub total: f64,
}

impl DoseStatistics {
    pub fn average(&self) -> Option<f64> {
        if self.count > 0 {
            Some(self.total / self.count as f64)
        } else {
            None
        }
    }
}

/// Discrete-time body model.
///
/// Drugs are registered under string keys, doses and lab draws are added,
/// then `calculate_timeline` runs the simulation once. Calibration and the
/// extraction queries require the timeline to exist.
pub struct BodyModel {
    starting_date: NaiveDate,
    step: Duration,
    drugs: BTreeMap<String, Drug>,
    doses: BTreeMap<String, DoseQueue>,
    labs: Vec<LabObservation>,
    events: Vec<Event>,
    timeline: BTreeMap<String, Vec<f64>>,
    calibration: BTreeMap<String, Vec<CalibrationFactor>>,
    dose_statistics: BTreeMap<String, DoseStatistics>,
    duration: usize,
    real_duration: usize,
    now: Option<NaiveDateTime>,
    state: ModelState,
}

impl BodyModel {
    pub fn new(starting_date: NaiveDate, step: Duration) -> PKResult<Self> {
        if step <= Duration::zero() {
            return Err(PKError::Validation(
                "Simulation step must be positive".to_string()
            ));
        }
        
        Ok(Self {
            starting_date,
            step,
            drugs: BTreeMap::new(),
            doses: BTreeMap::new(),
            labs: Vec::new(),
            events: Vec::new(),
            timeline: BTreeMap::new(),
            calibration: BTreeMap::new(),
            dose_statistics: BTreeMap::new(),
            duration: 0,
            real_duration: 0,
            now: None,
            state: ModelState::Uninitialized,
        })
    }
    
    pub fn starting_date(&self) -> NaiveDate {
        self.starting_date
    }
    
    pub fn step(&self) -> Duration {
        self.step
    }
    
    /// Midnight of the starting date; step 0 of the timeline.
    pub fn origin(&self) -> NaiveDateTime {
        self.starting_date.and_time(NaiveTime::MIN)
    }
    
    pub fn duration(&self) -> usize {
        self.duration
    }
    
    pub fn real_duration(&self) -> usize {
        self.real_duration
    }
    
    pub fn add_drug(&mut self, key: &str, drug: Drug) {
        debug!("Registering drug {} as {}", drug.name, key);
        self.drugs.insert(key.to_string(), drug);
    }
    
    pub fn drug(&self, key: &str) -> Option<&Drug> {
        self.drugs.get(key)
    }
    
    pub fn add_dose(&mut self, key: &str, amount: f64, time: NaiveDateTime) -> PKResult<()> {
        let origin = self.origin();
        let drug = self.drugs.get(key)
            .ok_or_else(|| PKError::UnknownDrug(key.to_string()))?;
        
        if time < origin {
            return Err(PKError::InvalidDosing(
                format!("Dose of {} at {} is before the starting date {}", key, time, self.starting_date)
            ));
        }
        if !amount.is_finite() || amount < 0.0 {
            return Err(PKError::InvalidDosing(
                format!("Dose amount must be a non-negative number, got {} for {}", amount, key)
            ));
        }
        
        let spread = drug.flood_in.as_ref().map_or(0, |profile| profile.len() as i32);
        if drug.flood_in_step.checked_mul(spread).and_then(|span| time.checked_add_signed(span)).is_none() {
            return Err(PKError::InvalidDosing(
                format!("Absorption of the dose of {} at {} runs past the end of the calendar", key, time)
            ));
        }
        
        let dose = Dose::new(key, amount, time);
        let queue = self.doses.entry(key.to_string()).or_default();
        for partial in dose.get_partial_doses(drug) {
            let partial = partial.truncated(origin, self.step);
            if partial.time < origin {
                return Err(PKError::InvalidDosing(
                    format!("Absorbed part of the dose of {} lands before the starting date", key)
                ));
            }
            queue.insert_sorted(partial);
        }
        
        let stats = self.dose_statistics.entry(key.to_string()).or_default();
        stats.count += 1;
        stats.total += amount;
        Ok(())
    }
    
    pub fn dose_statistics(&self, key: &str) -> Option<DoseStatistics> {
        self.dose_statistics.get(key).copied()
    }
    
    pub fn pending_doses(&self, key: &str) -> usize {
        self.doses.get(key).map_or(0, |q| q.len())
    }
    
    pub fn add_lab_data(&mut self, observation: LabObservation) {
        self.labs.push(observation);
    }
    
    pub fn add_lab_data_list<I>(&mut self, observations: I)
    where
        I: IntoIterator<Item = LabObservation>,
    {
        for observation in observations {
            self.add_lab_data(observation);
        }
    }
    
    pub fn labs(&self) -> &[LabObservation] {
        &self.labs
    }
    
    pub fn has_lab_data(&self, key: &str) -> bool {
        self.labs.iter().any(|lab| lab.values.contains_key(key))
    }
    
    /// Step index containing `time`, if it lies on the timeline.
    pub fn index_of(&self, time: NaiveDateTime) -> Option<usize> {
        let step_ms = self.step.num_milliseconds().max(1);
        let offset_ms = (time - self.origin()).num_milliseconds();
        if offset_ms < 0 {
            return None;
        }
        let index = (offset_ms / step_ms) as usize;
        (index < self.duration).then_some(index)
    }
    
    pub fn time_at(&self, index: usize) -> NaiveDateTime {
        self.origin() + Duration::milliseconds(self.step.num_milliseconds() * index as i64)
    }
    
    pub fn steps_for(&self, span: Duration) -> usize {
        (as_seconds(span) / as_seconds(self.step)).round().max(0.0) as usize
    }
    
    fn steps_until(&self, time: NaiveDateTime) -> i64 {
        let span = as_seconds(time - self.origin());
        (span / as_seconds(self.step)).ceil() as i64
    }
    
    pub fn timeline(&self, key: &str) -> Option<&[f64]> {
        self.timeline.get(key).map(|t| t.as_slice())
    }
    
    pub fn get_drug_at_timepoint(&self, key: &str, time: NaiveDateTime) -> PKResult<f64> {
        let timeline = self.timeline.get(key)
            .ok_or_else(|| PKError::UnknownDrug(key.to_string()))?;
        let index = self.index_of(time).ok_or_else(|| PKError::Validation(
            format!("{} is outside of the simulated timeline", time)
        ))?;
        Ok(timeline[index])
    }
    
    /// Key under which a metabolite target is simulated. A target the model
    /// does not know is looked up in the drug catalog; if a drug with the
    /// same name is already registered under another key that key is used,
    /// otherwise the catalog drug is registered under the target name.
    fn resolve_metabolite(&mut self, target: &str) -> PKResult<String> {
        if self.drugs.contains_key(target) {
            return Ok(target.to_string());
        }
        
        let drug = catalog::create_drug(target).ok_or_else(|| PKError::UnknownDrug(
            format!("metabolite target {} is neither registered nor in the catalog", target)
        ))??;
        
        if let Some(key) = self.drugs.iter().find(|(_, d)| d.name == drug.name).map(|(k, _)| k.clone()) {
            debug!("Metabolite {} is simulated as the registered drug {}", target, key);
            return Ok(key);
        }
        
        info!("Registering metabolite {} from the drug catalog", drug.name);
        self.drugs.insert(target.to_string(), drug);
        Ok(target.to_string())
    }
    
    /// Drugs with pending doses plus everything reachable through
    /// metabolite edges. Edges are rewritten to the keys they resolve to.
    fn active_drugs(&mut self) -> PKResult<BTreeSet<String>> {
        let mut active: BTreeSet<String> = self.doses.iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(key, _)| key.clone())
            .collect();
        let mut pending: VecDeque<String> = active.iter().cloned().collect();
        
        while let Some(key) = pending.pop_front() {
            let targets: Vec<String> = self.drugs.get(&key)
                .map(|d| d.metabolites.iter().map(|m| m.target.clone()).collect())
                .unwrap_or_default();
            for (i, target) in targets.into_iter().enumerate() {
                let resolved = self.resolve_metabolite(&target)?;
                if resolved != target {
                    if let Some(drug) = self.drugs.get_mut(&key) {
                        drug.metabolites[i].target = resolved.clone();
                    }
                }
                if active.insert(resolved.clone()) {
                    pending.push_back(resolved);
                }
            }
        }
        
        Ok(active)
    }
    
    /// Producers before their metabolites; members of cycles follow in key order.
    fn processing_order(&self, active: &BTreeSet<String>) -> Vec<String> {
        let mut incoming: BTreeMap<&str, usize> = active.iter().map(|k| (k.as_str(), 0)).collect();
        for key in active {
            if let Some(drug) = self.drugs.get(key) {
                for m in drug.metabolites.iter().filter(|m| m.target != *key) {
                    if let Some(count) = incoming.get_mut(m.target.as_str()) {
                        *count += 1;
                    }
                }
            }
        }
        
        let mut ready: BTreeSet<&str> = incoming.iter()
            .filter(|(_, count)| **count == 0)
            .map(|(key, _)| *key)
            .collect();
        let mut order = Vec::with_capacity(active.len());
        
        while let Some(key) = ready.pop_first() {
            order.push(key.to_string());
            if let Some(drug) = self.drugs.get(key) {
                for m in drug.metabolites.iter().filter(|m| m.target != key) {
                    if let Some(count) = incoming.get_mut(m.target.as_str()) {
                        *count -= 1;
                        if *count == 0 {
                            ready.insert(m.target.as_str());
                        }
                    }
                }
            }
        }
        
        for key in active {
            if !order.contains(key) {
                order.push(key.clone());
            }
        }
        order
    }
    
    pub fn calculate_timeline(&mut self, until: NaiveDate) -> PKResult<()> {
        self.calculate_timeline_at(until, Local::now().naive_local())
    }
    
    /// Runs the simulation from the starting date up to `until`; `now`
    /// marks the end of the historical part of the timeline.
    pub fn calculate_timeline_at(&mut self, until: NaiveDate, now: NaiveDateTime) -> PKResult<()> {
        if self.state != ModelState::Uninitialized {
            return Err(PKError::Simulation(
                "Timeline has already been calculated".to_string()
            ));
        }
        if self.doses.values().all(|q| q.is_empty()) {
            return Err(PKError::Validation(
                "At least one dose is needed to calculate a timeline".to_string()
            ));
        }
        
        let duration = self.steps_until(until.and_time(NaiveTime::MIN));
        if duration <= 0 {
            return Err(PKError::Validation(
                format!("End date {} must be after the starting date {}", until, self.starting_date)
            ));
        }
        let duration = duration as usize;
        let real_duration = self.steps_until(now).clamp(0, duration as i64) as usize;
        
        let active = self.active_drugs()?;
        let order = self.processing_order(&active);
        let position: HashMap<&str, usize> = order.iter()
            .enumerate()
            .map(|(i, key)| (key.as_str(), i))
            .collect();
        
        let mut queues: Vec<DoseQueue> = order.iter()
            .map(|key| self.doses.remove(key).unwrap_or_default())
            .collect();
        
        let mut plan = Vec::with_capacity(order.len());
        for key in &order {
            let drug = self.drugs.get(key)
                .ok_or_else(|| PKError::UnknownDrug(key.clone()))?;
            plan.push((drug, drug.get_metabolism_factor(self.step)));
        }
        
        info!(
            "Simulating {} drugs over {} steps of {}s",
            order.len(),
            duration,
            as_seconds(self.step)
        );
        
        let mut series: Vec<Vec<f64>> = vec![Vec::with_capacity(duration); order.len()];
        
        for t in 0..duration {
            let time_t = self.time_at(t);
            for (i, (drug, decay)) in plan.iter().enumerate() {
                let mut current = 0.0;
                if t > 0 {
                    let previous = series[i][t - 1];
                    current = previous * decay;
                    let decayed = previous - current;
                    if decayed > 0.0 {
                        for (target, amount) in drug.get_metabolites(decayed) {
                            if let Some(&j) = position.get(target.as_str()) {
                                queues[j].push_due(Dose::partial(&target, amount, time_t));
                            }
                        }
                    }
                }
                current += queues[i].drain_due(time_t);
                series[i].push(current);
            }
        }
        
        for ((key, queue), values) in order.iter().zip(queues).zip(series) {
            if !queue.is_empty() {
                debug!("{} doses of {} lie beyond the simulated range", queue.len(), key);
                self.doses.insert(key.clone(), queue);
            }
            self.timeline.insert(key.clone(), values);
        }
        
        if real_duration == 0 {
            warn!("Current time {} is before the starting date {}", now, self.starting_date);
        }
        
        self.duration = duration;
        self.real_duration = real_duration;
        self.now = Some(now);
        self.state = ModelState::TimelineBuilt;
        Ok(())
    }
    
    /// Display name per simulated drug, sorted by name. Keys sharing a
    /// name are told apart by their key.
    pub fn display_names(&self) -> Vec<(String, String)> {
        let mut names: Vec<(String, String)> = self.timeline.keys()
            .map(|key| {
                let name = self.drugs.get(key).map_or_else(|| key.clone(), |d| d.name.clone());
                (key.clone(), name)
            })
            .collect();
        
        let mut seen: HashMap<String, usize> = HashMap::new();
        for (_, name) in &names {
            *seen.entry(name.clone()).or_insert(0) += 1;
        }
        for (key, name) in names.iter_mut() {
            if seen.get(name.as_str()).copied().unwrap_or(0) > 1 {
                *name = format!("{} ({})", name, key);
            }
        }
        
        names.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        names
    }
}
