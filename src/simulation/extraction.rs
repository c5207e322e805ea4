use super::calibration::CalibrationFactor;
use super::BodyModel;
use crate::dosing::as_seconds;
use crate::statistics::{self, moving_statistics, MovingStatistics, StdDevCorrection};
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_MOVING_WINDOW_DAYS: [i64; 3] = [5, 30, 90];

/// Leading part of the history left out of the long-term statistics.
pub const STATISTICS_SKIP_DAYS: i64 = 7;

const PALETTE: [&str; 10] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd",
    "#8c564b", "#e377c2", "#7f7f7f", "#bcbd22", "#17becf",
];

pub fn get_color(n: usize) -> &'static str {
    PALETTE[n % PALETTE.len()]
}

#[derive(Debug, Clone)]
pub struct PlotOptions {
    pub display_step: Duration,
    pub calibrated: bool,
    pub stddev_multiplier: f64,
    pub offset: f64,
    pub use_wallclock: bool,
    pub color: bool,
    pub moving_window_days: Vec<i64>,
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self {
            display_step: Duration::days(1),
            calibrated: false,
            stddev_multiplier: 1.0,
            offset: 0.0,
            use_wallclock: false,
            color: false,
            moving_window_days: DEFAULT_MOVING_WINDOW_DAYS.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum XAxis {
    Relative(Vec<f64>),
    Wallclock(Vec<NaiveDateTime>),
}

impl XAxis {
    pub fn len(&self) -> usize {
        match self {
            XAxis::Relative(x) => x.len(),
            XAxis::Wallclock(x) => x.len(),
        }
    }
    
    pub fn label(&self, i: usize) -> String {
        match self {
            XAxis::Relative(x) => x[i].to_string(),
            XAxis::Wallclock(x) => x[i].format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DrugSeries {
    Raw(Vec<f64>),
    Banded {
        value: Vec<f64>,
        lower: Vec<f64>,
        upper: Vec<f64>,
        color: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct PlotData {
    pub x: XAxis,
    pub series: BTreeMap<String, DrugSeries>,
    pub moving: BTreeMap<String, Vec<MovingStatistics>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabPoints {
    pub x: XAxis,
    pub y: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionError {
    pub time: NaiveDateTime,
    pub drug: String,
    pub measured: f64,
    pub predicted: f64,
    pub percent: f64,
}

impl BodyModel {
    fn relative_time(&self, time: NaiveDateTime, display_step: Duration, offset: f64) -> f64 {
        as_seconds(time - self.origin()) / as_seconds(display_step) + offset
    }
    
    fn axis(&self, times: &[NaiveDateTime], display_step: Duration, offset: f64, use_wallclock: bool) -> XAxis {
        if use_wallclock {
            XAxis::Wallclock(times.to_vec())
        } else {
            XAxis::Relative(times.iter()
                .map(|t| self.relative_time(*t, display_step, offset))
                .collect())
        }
    }
    
    /// Calibration for every step of the timeline.
    fn factors_over_timeline(&self, key: &str) -> Vec<CalibrationFactor> {
        (0..self.duration)
            .map(|t| self.factor_at(key, self.time_at(t)).unwrap_or(CalibrationFactor::IDENTITY))
            .collect()
    }
    
    /// Calibrated value of a drug for every step, if it has a calibration.
    pub fn calibrated_timeline(&self, key: &str) -> Option<Vec<f64>> {
        if !self.is_calibrated(key) {
            return None;
        }
        let timeline = self.timeline.get(key)?;
        Some(timeline.iter()
            .zip(self.factors_over_timeline(key))
            .map(|(raw, factor)| raw * factor.average)
            .collect())
    }
    
    /// Arrays for the renderer. Raw series are scaled by the drug's display
    /// factor; calibrated series carry the band of `stddev_multiplier`
    /// deviations and, for calibrated drugs, the moving statistics.
    ///
    /// Calibrated output is only meaningful after `estimate_blood_levels`.
    pub fn get_plot_data(&self, options: &PlotOptions) -> PlotData {
        let times: Vec<NaiveDateTime> = (0..self.duration).map(|t| self.time_at(t)).collect();
        let x = self.axis(&times, options.display_step, options.offset, options.use_wallclock);
        
        let windows: Vec<usize> = options.moving_window_days.iter()
            .map(|days| self.steps_for(Duration::days(*days)).max(1))
            .collect();
        
        let mut series = BTreeMap::new();
        let mut moving = BTreeMap::new();
        for (n, (key, name)) in self.display_names().into_iter().enumerate() {
            let timeline = match self.timeline.get(&key) {
                Some(timeline) => timeline,
                None => continue,
            };
            
            if !options.calibrated {
                let factor = self.drugs.get(&key).map_or(1.0, |d| d.factor);
                series.insert(name, DrugSeries::Raw(timeline.iter().map(|v| v * factor).collect()));
                continue;
            }
            
            let factors = self.factors_over_timeline(&key);
            let value: Vec<f64> = timeline.iter()
                .zip(&factors)
                .map(|(raw, f)| raw * f.average)
                .collect();
            let lower = value.iter()
                .zip(&factors)
                .map(|(v, f)| v - f.std_dev * options.stddev_multiplier)
                .collect();
            let upper = value.iter()
                .zip(&factors)
                .map(|(v, f)| v + f.std_dev * options.stddev_multiplier)
                .collect();
            
            if self.is_calibrated(&key) && !windows.is_empty() {
                moving.insert(
                    name.clone(),
                    moving_statistics(&value, &windows, StdDevCorrection::SmallSample),
                );
            }
            
            series.insert(name, DrugSeries::Banded {
                value,
                lower,
                upper,
                color: options.color.then(|| get_color(n).to_string()),
            });
        }
        
        PlotData { x, series, moving }
    }
    
    /// Mean and population deviation of the calibrated level over the
    /// history, leaving out the first week.
    pub fn get_statistical_data(&self, key: &str) -> Option<(f64, f64)> {
        let values = self.calibrated_timeline(key)?;
        let start = self.steps_for(Duration::days(STATISTICS_SKIP_DAYS));
        let end = self.real_duration.min(values.len());
        if start >= end {
            return None;
        }
        
        let window = &values[start..end];
        Some((
            statistics::mean(window),
            statistics::std_dev(window, StdDevCorrection::Population),
        ))
    }
    
    /// Lab values as scatter points, keyed like the plot series.
    pub fn get_plot_lab_levels(
        &self,
        display_step: Duration,
        offset: f64,
        use_wallclock: bool,
    ) -> BTreeMap<String, LabPoints> {
        let mut out = BTreeMap::new();
        for (key, name) in self.display_names() {
            let values = self.lab_values(&key);
            if values.is_empty() {
                continue;
            }
            
            let times: Vec<NaiveDateTime> = values.iter().map(|(t, _)| *t).collect();
            out.insert(name, LabPoints {
                x: self.axis(&times, display_step, offset, use_wallclock),
                y: values.iter().map(|(_, v)| *v).collect(),
            });
        }
        out
    }
    
    /// Deviation of every lab value from the calibrated estimate at its time.
    pub fn prediction_errors(&self) -> Vec<PredictionError> {
        let mut out = Vec::new();
        for lab in &self.labs {
            for (key, measured) in &lab.values {
                let level = match self.get_blood_level_at_timepoint(key, lab.time) {
                    Ok(level) => level,
                    Err(_) => continue,
                };
                let predicted = level.value();
                let percent = if *measured != 0.0 {
                    (measured - predicted) / measured * 100.0
                } else {
                    0.0
                };
                out.push(PredictionError {
                    time: lab.time,
                    drug: key.clone(),
                    measured: *measured,
                    predicted,
                    percent,
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drugs::Drug;
    use crate::labs::LabObservation;
    use crate::simulation::tests::{at, date};
    use approx::assert_relative_eq;
    
    fn calibrated_model() -> BodyModel {
        let mut model = BodyModel::new(date(1), Duration::hours(1)).unwrap();
        let mut drug = Drug::new("A", Duration::hours(24)).unwrap();
        drug.set_factor(2.0);
        model.add_drug("a", drug);
        model.add_drug("b", Drug::new("B", Duration::hours(12)).unwrap());
        for day in 1..=31 {
            model.add_dose("a", 10.0, at(day, 8)).unwrap();
        }
        model.add_dose("b", 1.0, at(1, 0)).unwrap();
        model.calculate_timeline_at(date(31), at(21, 0)).unwrap();
        
        let r1 = model.get_drug_at_timepoint("a", at(10, 12)).unwrap();
        let r2 = model.get_drug_at_timepoint("a", at(15, 12)).unwrap();
        model.add_lab_data_list(vec![
            LabObservation::new(at(10, 12)).with_value("a", r1 * 9.0),
            LabObservation::new(at(15, 12)).with_value("a", r2 * 11.0),
        ]);
        model.estimate_blood_levels(StdDevCorrection::Bessel).unwrap();
        model
    }
    
    #[test]
    fn test_raw_plot_data() {
        let model = calibrated_model();
        let data = model.get_plot_data(&PlotOptions {
            display_step: Duration::hours(1),
            offset: -24.0,
            ..PlotOptions::default()
        });
        
        match &data.x {
            XAxis::Relative(x) => {
                assert_eq!(x.len(), 30 * 24);
                assert_eq!(x[0], -24.0);
                assert_eq!(x[25], 1.0);
            }
            other => panic!("unexpected axis {:?}", other),
        }
        match &data.series["A"] {
            DrugSeries::Raw(values) => {
                assert_relative_eq!(values[8], 20.0, epsilon = 1e-9);
            }
            other => panic!("unexpected series {:?}", other),
        }
        assert!(data.moving.is_empty());
    }
    
    #[test]
    fn test_calibrated_plot_data() {
        let model = calibrated_model();
        let data = model.get_plot_data(&PlotOptions {
            calibrated: true,
            stddev_multiplier: 2.0,
            color: true,
            use_wallclock: true,
            ..PlotOptions::default()
        });
        
        assert_eq!(data.x, XAxis::Wallclock((0..30 * 24).map(|t| model.time_at(t)).collect()));
        let factor = model.calibration_factors("a").unwrap()[0];
        assert_relative_eq!(factor.average, 10.0, epsilon = 1e-9);
        
        match &data.series["A"] {
            DrugSeries::Banded { value, lower, upper, color } => {
                let raw = model.timeline("a").unwrap();
                assert_relative_eq!(value[100], raw[100] * 10.0, epsilon = 1e-9);
                assert_relative_eq!(upper[100] - lower[100], 4.0 * factor.std_dev, epsilon = 1e-9);
                assert_eq!(color.as_deref(), Some(get_color(0)));
            }
            other => panic!("unexpected series {:?}", other),
        }
        match &data.series["B"] {
            DrugSeries::Banded { value, lower, color, .. } => {
                assert_eq!(value, lower);
                assert_eq!(color.as_deref(), Some(get_color(1)));
            }
            other => panic!("unexpected series {:?}", other),
        }
        
        let moving = &data.moving["A"];
        assert_eq!(moving.iter().map(|m| m.window).collect::<Vec<_>>(), vec![120, 720, 2160]);
        assert!(!data.moving.contains_key("B"));
    }
    
    #[test]
    fn test_statistical_data() {
        let model = calibrated_model();
        let (mean, std_dev) = model.get_statistical_data("a").unwrap();
        
        let calibrated = model.calibrated_timeline("a").unwrap();
        let window = &calibrated[7 * 24..20 * 24];
        assert_relative_eq!(mean, statistics::mean(window), epsilon = 1e-9);
        assert!(std_dev > 0.0);
        assert!(model.get_statistical_data("b").is_none());
    }
    
    #[test]
    fn test_lab_points_and_prediction_errors() {
        let model = calibrated_model();
        let labs = model.get_plot_lab_levels(Duration::days(1), 0.0, false);
        
        assert_eq!(labs.len(), 1);
        assert_eq!(labs["A"].x, XAxis::Relative(vec![9.5, 14.5]));
        
        let errors = model.prediction_errors();
        assert_eq!(errors.len(), 2);
        assert_relative_eq!(errors[0].percent, (9.0 - 10.0) / 9.0 * 100.0, epsilon = 1e-9);
        assert_relative_eq!(errors[1].percent, (11.0 - 10.0) / 11.0 * 100.0, epsilon = 1e-9);
    }
}
