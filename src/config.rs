use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use crate::error::{PKError, PKResult};

const DEFAULT_DOSE_HOUR: u32 = 9;
const DEFAULT_LAB_HOUR: u32 = 12;
const DEFAULT_DAYS_INTO_FUTURE: i64 = 90;
const MAX_DAYS_INTO_FUTURE: i64 = 100 * 366;
const MAX_DOSE_REPEAT: u64 = 100_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub drugs: BTreeMap<String, DrugConfig>,
    pub model: ModelConfig,
    pub doses: BTreeMap<String, Vec<DoseConfig>>,
    pub labs: Vec<LabConfig>,
    pub graph: GraphConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrugConfig {
    pub name: String,   // Catalog alias
    pub factor: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub start_date: NaiveDate,
    pub step: Duration,
    pub days_into_future: i64,
    pub corrected_std_dev: bool,
    pub events: Vec<EventConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventConfig {
    pub event_date: NaiveDate,
    pub transition: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoseConfig {
    pub date: NaiveDateTime,
    pub dose: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabConfig {
    pub date: NaiveDateTime,
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphConfig {
    pub units: Duration,
    pub two_std_dev_in_band: bool,
    pub x_offset: f64,
    pub use_x_date: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            units: Duration::days(1),
            two_std_dev_in_band: true,
            x_offset: 0.0,
            use_x_date: false,
        }
    }
}

// File layout; optional fields stay untyped so that bad values can fall
// back to their defaults instead of failing the whole file.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(alias = "drug")]
    drugs: BTreeMap<String, RawDrug>,
    model: RawModel,
    #[serde(alias = "dose")]
    doses: BTreeMap<String, Value>,
    #[serde(default, alias = "lab")]
    labs: Option<Value>,
    #[serde(default, alias = "graphs")]
    graph: Option<RawGraph>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDrug {
    Alias(String),
    Full {
        name: String,
        #[serde(default)]
        factor: Option<Value>,
    },
}

#[derive(Debug, Deserialize)]
struct RawModel {
    start_date: NaiveDate,
    #[serde(default)]
    timedelta: Option<Value>,
    #[serde(default)]
    days_into_future: Option<Value>,
    #[serde(default)]
    corrected_std_dev: Option<Value>,
    #[serde(default)]
    events: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawGraph {
    #[serde(default)]
    units: Option<Value>,
    #[serde(default)]
    two_std_dev_in_band: Option<Value>,
    #[serde(default)]
    x_offset: Option<Value>,
    #[serde(default)]
    use_x_date: Option<Value>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> PKResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
    
    pub fn from_json(content: &str) -> PKResult<Self> {
        let raw: RawConfig = serde_json::from_str(content)?;
        let config = Self::from_raw(raw);
        config.validate()?;
        Ok(config)
    }
    
    fn from_raw(raw: RawConfig) -> Self {
        let drugs = raw.drugs
            .into_iter()
            .map(|(key, drug)| {
                let drug = match drug {
                    RawDrug::Alias(name) => DrugConfig { name, factor: 1.0 },
                    RawDrug::Full { name, factor } => DrugConfig {
                        name,
                        factor: parse_or(factor.as_ref(), "factor", 1.0, Value::as_f64),
                    },
                };
                (key, drug)
            })
            .collect();
        
        let doses = raw.doses
            .into_iter()
            .map(|(key, entries)| {
                let parsed = parse_doses(&key, &entries);
                (key, parsed)
            })
            .collect();
        
        // A single lab entry is accepted in place of a list
        let labs = match raw.labs {
            Some(Value::Array(entries)) => entries.iter().filter_map(parse_lab).collect(),
            Some(entry @ Value::Object(_)) => parse_lab(&entry).into_iter().collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                warn!("Cannot parse labs, expected a list, got: {}", other);
                Vec::new()
            }
        };
        
        let graph = raw.graph.map(parse_graph).unwrap_or_default();
        
        Self {
            drugs,
            model: parse_model(raw.model),
            doses,
            labs,
            graph,
        }
    }
    
    pub fn validate(&self) -> PKResult<()> {
        if self.drugs.is_empty() {
            return Err(PKError::Configuration(
                "At least one drug must be defined".to_string()
            ));
        }
        
        // Validate dose keys
        for key in self.doses.keys() {
            if !self.drugs.contains_key(key) {
                return Err(PKError::Configuration(
                    format!("Doses reference {} which is not in the drugs section", key)
                ));
            }
        }
        
        // Validate lab keys
        for lab in &self.labs {
            for key in lab.values.keys() {
                if !self.drugs.contains_key(key) {
                    return Err(PKError::Configuration(
                        format!("Lab value for {} which is not in the drugs section", key)
                    ));
                }
            }
        }
        
        // Validate dosing
        if self.dose_count() == 0 {
            return Err(PKError::InvalidDosing(
                "At least one dose must be specified".to_string()
            ));
        }
        
        Ok(())
    }
    
    pub fn dose_count(&self) -> usize {
        self.doses.values().map(|d| d.len()).sum()
    }
}

fn parse_or<T>(value: Option<&Value>, name: &str, default: T, parse: fn(&Value) -> Option<T>) -> T
where
    T: std::fmt::Debug,
{
    match value {
        None | Some(Value::Null) => default,
        Some(v) => parse(v).unwrap_or_else(|| {
            warn!("Cannot parse {} from {}, using default {:?}", name, v, default);
            default
        }),
    }
}

fn as_hour(value: &Value) -> Option<u32> {
    value.as_u64().filter(|h| *h < 24).map(|h| h as u32)
}

fn as_date(value: &Value) -> Option<NaiveDate> {
    value.as_str().and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
}

fn parse_duration_entry(value: &Value) -> Option<Duration> {
    let unit = value.get("unit")?.as_str()?.trim().to_lowercase();
    let amount = value.get("value")?.as_f64()?;
    let seconds = match unit.as_str() {
        "weeks" | "week" | "wk" | "w" => 7.0 * 86400.0,
        "days" | "day" | "d" => 86400.0,
        "hours" | "hour" | "h" => 3600.0,
        "minutes" | "minute" | "min" | "m" => 60.0,
        "seconds" | "second" | "sec" | "s" => 1.0,
        "milliseconds" | "millisecond" | "ms" => 0.001,
        _ => return None,
    };
    
    // Reject anything chrono cannot represent instead of saturating
    let milliseconds = (amount * seconds * 1000.0).round();
    if !milliseconds.is_finite() || milliseconds.abs() >= i64::MAX as f64 {
        return None;
    }
    Duration::try_milliseconds(milliseconds as i64)
}

/// `{"unit": "hours", "value": 1}` or a list of those, which are summed.
pub fn parse_duration(value: &Value) -> Option<Duration> {
    match value {
        Value::Array(parts) => {
            let mut total = Duration::zero();
            for part in parts {
                match parse_duration_entry(part) {
                    Some(d) => total = total.checked_add(&d)?,
                    None => warn!("Couldn't parse partial duration: {}", part),
                }
            }
            Some(total)
        }
        Value::Object(_) => parse_duration_entry(value),
        _ => None,
    }
}

fn parse_model(raw: RawModel) -> ModelConfig {
    let step = parse_or(raw.timedelta.as_ref(), "timedelta", Duration::hours(1), parse_duration);
    let step = if step <= Duration::zero() {
        warn!("timedelta must be positive, using 1 hour");
        Duration::hours(1)
    } else {
        step
    };
    
    // Parse events
    let events = match raw.events {
        Some(Value::Array(entries)) => entries.iter().filter_map(parse_event).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            warn!("Cannot parse events, expected a list, got: {}", other);
            Vec::new()
        }
    };
    
    ModelConfig {
        start_date: raw.start_date,
        step,
        days_into_future: parse_or(
            raw.days_into_future.as_ref(),
            "days_into_future",
            DEFAULT_DAYS_INTO_FUTURE,
            |v| v.as_i64().filter(|days| (0..=MAX_DAYS_INTO_FUTURE).contains(days)),
        ),
        corrected_std_dev: parse_or(raw.corrected_std_dev.as_ref(), "corrected_std_dev", true, Value::as_bool),
        events,
    }
}

fn parse_event(value: &Value) -> Option<EventConfig> {
    let event_date = match value.get("event_date").and_then(as_date) {
        Some(date) => date,
        None => {
            warn!("Event without a valid event_date, skipping: {}", value);
            return None;
        }
    };
    let transition = parse_or(value.get("transition"), "transition", Duration::zero(), parse_duration);
    Some(EventConfig { event_date, transition })
}

fn parse_graph(raw: RawGraph) -> GraphConfig {
    let defaults = GraphConfig::default();
    GraphConfig {
        units: parse_or(raw.units.as_ref(), "units", defaults.units, parse_duration),
        two_std_dev_in_band: parse_or(
            raw.two_std_dev_in_band.as_ref(),
            "two_std_dev_in_band",
            defaults.two_std_dev_in_band,
            Value::as_bool,
        ),
        x_offset: parse_or(raw.x_offset.as_ref(), "x_offset", defaults.x_offset, Value::as_f64),
        use_x_date: parse_or(raw.use_x_date.as_ref(), "use_x_date", defaults.use_x_date, Value::as_bool),
    }
}

fn parse_doses(key: &str, entries: &Value) -> Vec<DoseConfig> {
    let entries = match entries {
        Value::Array(entries) => entries,
        other => {
            warn!("Doses of {} must be a list, skipping: {}", key, other);
            return Vec::new();
        }
    };
    
    let mut doses = Vec::new();
    for entry in entries {
        let date = match entry.get("date").and_then(as_date) {
            Some(date) => date,
            None => {
                warn!("Dose of {} without a valid date, skipping: {}", key, entry);
                continue;
            }
        };
        let amount = match entry.get("dose").and_then(Value::as_f64) {
            Some(amount) => amount,
            None => {
                warn!("Dose of {} needs a numeric dose, skipping: {}", key, entry);
                continue;
            }
        };
        let hour = parse_or(entry.get("hour"), "hour", DEFAULT_DOSE_HOUR, as_hour);
        let repeat = parse_or(entry.get("repeat"), "repeat", 1, |v| {
            v.as_u64().filter(|r| (1..=MAX_DOSE_REPEAT).contains(r))
        });
        let interval = parse_or(entry.get("interval"), "interval", Duration::days(1), parse_duration);
        
        // Expand the repetitions; an entry running off the calendar is dropped whole
        let first = date.and_hms_opt(hour, 0, 0).unwrap_or_else(|| date.and_time(chrono::NaiveTime::MIN));
        match repeat_dates(first, interval, repeat) {
            Some(dates) => doses.extend(dates.into_iter().map(|date| DoseConfig { date, dose: amount })),
            None => warn!(
                "Repeating the dose of {} {} times every {} leaves the calendar, skipping: {}",
                key, repeat, interval, entry
            ),
        }
    }
    
    info!("Parsed {} doses of {}", doses.len(), key);
    doses
}

/// `first + k * interval` for k in `0..repeat`, or `None` on overflow.
fn repeat_dates(first: NaiveDateTime, interval: Duration, repeat: u64) -> Option<Vec<NaiveDateTime>> {
    (0..repeat)
        .map(|k| {
            let k = i32::try_from(k).ok()?;
            first.checked_add_signed(interval.checked_mul(k)?)
        })
        .collect()
}

fn parse_lab(entry: &Value) -> Option<LabConfig> {
    let date = match entry.get("date").and_then(as_date) {
        Some(date) => date,
        None => {
            warn!("Missing or invalid date in lab data, skipping entry: {}", entry);
            return None;
        }
    };
    let hour = match entry.get("hour") {
        None => {
            info!("Hour not defined for lab data at {}, defaulting to {}", date, DEFAULT_LAB_HOUR);
            DEFAULT_LAB_HOUR
        }
        value => parse_or(value, "hour", DEFAULT_LAB_HOUR, as_hour),
    };
    
    let raw_values = match entry.get("values").or_else(|| entry.get("value")) {
        Some(Value::Object(map)) => map,
        _ => {
            warn!("Expected a map of drug to value for lab data, got: {}", entry);
            return None;
        }
    };
    
    // Keep the numeric values only
    let mut values = BTreeMap::new();
    for (key, value) in raw_values {
        match value.as_f64() {
            Some(v) => {
                values.insert(key.clone(), v);
            }
            None => warn!("Lab value for {} is not numeric: {}", key, value),
        }
    }
    if values.is_empty() {
        return None;
    }
    
    let date = date.and_hms_opt(hour, 0, 0)?;
    Some(LabConfig { date, values })
}

#[cfg(test)]
mod tests {
    use super::*;
    
    const EXAMPLE: &str = r#"{
        "drugs": {
            "ev": { "name": "estradiol valerate", "factor": 1.5 },
            "e2": "estradiol"
        },
        "model": {
            "start_date": "2021-01-04",
            "timedelta": [ { "unit": "hours", "value": 1 }, { "unit": "minutes", "value": 30 } ],
            "days_into_future": "soon",
            "events": [ { "event_date": "2021-02-01", "transition": { "unit": "days", "value": 14 } } ]
        },
        "doses": {
            "ev": [
                { "date": "2021-01-04", "dose": 4.0, "repeat": 3, "interval": { "unit": "days", "value": 7 } },
                { "date": "2021-01-30", "hour": 20, "dose": 5 },
                { "date": "not a date", "dose": 5 }
            ]
        },
        "labs": [
            { "date": "2021-01-20", "hour": 8, "values": { "e2": 180.5 } },
            { "date": "2021-01-27", "value": { "e2": 210 } },
            { "values": { "e2": 1.0 } }
        ],
        "graph": { "units": { "unit": "days", "value": 1 }, "use_x_date": "yes" }
    }"#;
    
    fn datetime(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }
    
    #[test]
    fn test_parse_example() {
        let config = Config::from_json(EXAMPLE).unwrap();
        
        assert_eq!(config.drugs["ev"], DrugConfig { name: "estradiol valerate".to_string(), factor: 1.5 });
        assert_eq!(config.drugs["e2"].factor, 1.0);
        assert_eq!(config.model.step, Duration::minutes(90));
        assert_eq!(config.model.days_into_future, 90);
        assert!(config.model.corrected_std_dev);
        assert_eq!(config.model.events, vec![EventConfig {
            event_date: NaiveDate::from_ymd_opt(2021, 2, 1).unwrap(),
            transition: Duration::days(14),
        }]);
        
        let doses = &config.doses["ev"];
        assert_eq!(doses.len(), 4);
        assert_eq!(doses[0].date, datetime(2021, 1, 4, 9));
        assert_eq!(doses[2].date, datetime(2021, 1, 18, 9));
        assert_eq!(doses[3], DoseConfig { date: datetime(2021, 1, 30, 20), dose: 5.0 });
        
        assert_eq!(config.labs.len(), 2);
        assert_eq!(config.labs[0].date, datetime(2021, 1, 20, 8));
        assert_eq!(config.labs[1].date, datetime(2021, 1, 27, 12));
        assert_eq!(config.labs[1].values["e2"], 210.0);
        
        assert_eq!(config.graph.units, Duration::days(1));
        assert!(!config.graph.use_x_date);
        assert!(config.graph.two_std_dev_in_band);
    }
    
    #[test]
    fn test_missing_mandatory_sections() {
        assert!(Config::from_json(r#"{ "model": { "start_date": "2021-01-01" }, "doses": {} }"#).is_err());
        assert!(Config::from_json(r#"{ "drugs": { "a": "e2" }, "doses": { "a": [] } }"#).is_err());
        assert!(Config::from_json(r#"{ "drugs": { "a": "e2" }, "model": {}, "doses": {} }"#).is_err());
    }
    
    #[test]
    fn test_no_doses_is_fatal() {
        let result = Config::from_json(
            r#"{ "drugs": { "a": "e2" }, "model": { "start_date": "2021-01-01" }, "doses": { "a": [] } }"#,
        );
        assert!(matches!(result, Err(PKError::InvalidDosing(_))));
    }
    
    #[test]
    fn test_unknown_keys_are_fatal() {
        let doses = r#"{ "drugs": { "a": "e2" }, "model": { "start_date": "2021-01-01" },
            "doses": { "b": [ { "date": "2021-01-02", "dose": 1 } ] } }"#;
        assert!(matches!(Config::from_json(doses), Err(PKError::Configuration(_))));
        
        let labs = r#"{ "drugs": { "a": "e2" }, "model": { "start_date": "2021-01-01" },
            "doses": { "a": [ { "date": "2021-01-02", "dose": 1 } ] },
            "labs": [ { "date": "2021-01-03", "values": { "b": 3 } } ] }"#;
        assert!(matches!(Config::from_json(labs), Err(PKError::Configuration(_))));
    }
    
    #[test]
    fn test_duration_units() {
        let parse = |s: &str| parse_duration(&serde_json::from_str::<Value>(s).unwrap());
        assert_eq!(parse(r#"{ "unit": "w", "value": 2 }"#), Some(Duration::weeks(2)));
        assert_eq!(parse(r#"{ "unit": "min", "value": 2.5 }"#), Some(Duration::seconds(150)));
        assert_eq!(parse(r#"{ "unit": "fortnights", "value": 1 }"#), None);
        assert_eq!(parse(r#""1h""#), None);
    }
    
    fn with_doses(doses: &str, model_extra: &str) -> PKResult<Config> {
        Config::from_json(&format!(
            r#"{{ "drugs": {{ "a": "e2" }}, "model": {{ "start_date": "2021-01-01"{} }},
                "doses": {{ "a": {} }} }}"#,
            model_extra, doses
        ))
    }
    
    #[test]
    fn test_repeat_leaving_the_calendar_is_skipped() {
        let config = with_doses(
            r#"[ { "date": "2021-01-02", "dose": 1, "repeat": 2, "interval": { "unit": "days", "value": 1e8 } },
                 { "date": "2021-01-03", "dose": 2 } ]"#,
            "",
        ).unwrap();
        assert_eq!(config.doses["a"], vec![DoseConfig { date: datetime(2021, 1, 3, 9), dose: 2.0 }]);
        
        // an interval past the representable range is rejected and the default day is used
        let config = with_doses(
            r#"[ { "date": "2021-01-02", "dose": 1, "repeat": 2, "interval": { "unit": "weeks", "value": 1e300 } } ]"#,
            "",
        ).unwrap();
        assert_eq!(config.doses["a"][1].date, datetime(2021, 1, 3, 9));
    }
    
    #[test]
    fn test_repeat_is_bounded() {
        let result = with_doses(
            r#"[ { "date": "2021-01-02", "dose": 1, "repeat": 4294967297 } ]"#,
            "",
        ).unwrap();
        assert_eq!(result.doses["a"].len(), 1);
    }
    
    #[test]
    fn test_days_into_future_out_of_range() {
        let config = with_doses(
            r#"[ { "date": "2021-01-02", "dose": 1 } ]"#,
            r#", "days_into_future": 9000000000000000"#,
        ).unwrap();
        assert_eq!(config.model.days_into_future, DEFAULT_DAYS_INTO_FUTURE);
        
        let config = with_doses(
            r#"[ { "date": "2021-01-02", "dose": 1 } ]"#,
            r#", "days_into_future": 30"#,
        ).unwrap();
        assert_eq!(config.model.days_into_future, 30);
    }
}
