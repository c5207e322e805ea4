use crate::dosing::as_seconds;
use crate::error::PKResult;
use crate::simulation::{
    BodyModel, CalibrationFactor, DrugSeries, LabPoints, PlotData, PredictionError,
};
use chrono::NaiveDate;
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct DoseSummary {
    pub count: usize,
    pub total: f64,
    pub average: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelStatistics {
    pub mean: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DrugSummary {
    pub key: String,
    pub name: String,
    pub blood_name: String,
    pub doses: Option<DoseSummary>,
    pub calibration: Option<Vec<CalibrationFactor>>,
    pub statistics: Option<LevelStatistics>,
    pub current_level: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub start_date: NaiveDate,
    pub step_seconds: f64,
    pub duration: usize,
    pub real_duration: usize,
    pub std_dev_count: f64,
    pub p_confidence: String,
    pub drugs: Vec<DrugSummary>,
}

impl Summary {
    pub fn from_model(model: &BodyModel, std_dev_count: f64, p_confidence: &str) -> Self {
        let drugs = model.display_names()
            .into_iter()
            .map(|(key, name)| {
                let blood_name = model.drug(&key).map_or_else(|| name.clone(), |d| d.blood_name.clone());
                let doses = model.dose_statistics(&key).and_then(|stats| {
                    stats.average().map(|average| DoseSummary {
                        count: stats.count,
                        total: stats.total,
                        average,
                    })
                });
                
                DrugSummary {
                    calibration: model.calibration_factors(&key).map(|f| f.to_vec()),
                    statistics: model.get_statistical_data(&key)
                        .map(|(mean, std_dev)| LevelStatistics { mean, std_dev }),
                    current_level: model.get_current_blood_level_message(&key, std_dev_count, p_confidence),
                    key,
                    name,
                    blood_name,
                    doses,
                }
            })
            .collect();
        
        Self {
            start_date: model.starting_date(),
            step_seconds: as_seconds(model.step()),
            duration: model.duration(),
            real_duration: model.real_duration(),
            std_dev_count,
            p_confidence: p_confidence.to_string(),
            drugs,
        }
    }
}

pub fn save_results<P: AsRef<Path>>(
    data: &PlotData,
    labs: &BTreeMap<String, LabPoints>,
    errors: &[PredictionError],
    summary: &Summary,
    output_dir: P,
) -> PKResult<()> {
    let output_path = output_dir.as_ref();
    
    // Save plot series
    save_timeline(data, &output_path.join("timeline.csv"))?;
    save_moving_statistics(data, &output_path.join("moving_statistics.csv"))?;
    // Save lab comparison
    save_lab_levels(labs, &output_path.join("labs.csv"))?;
    save_prediction_errors(errors, &output_path.join("prediction_error.csv"))?;
    // Save summary
    save_summary(summary, &output_path.join("summary.json"))?;
    generate_report(summary, output_path)?;
    
    info!("All results saved to {:?}", output_path);
    Ok(())
}

fn save_timeline<P: AsRef<Path>>(data: &PlotData, path: P) -> PKResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    
    // Write header
    let mut header = vec!["TIME".to_string()];
    for (name, series) in &data.series {
        header.push(name.clone());
        if let DrugSeries::Banded { .. } = series {
            header.push(format!("{}_LOWER", name));
            header.push(format!("{}_UPPER", name));
        }
    }
    writer.write_record(&header)?;
    
    // Write data
    for i in 0..data.x.len() {
        let mut record = vec![data.x.label(i)];
        for series in data.series.values() {
            match series {
                DrugSeries::Raw(values) => record.push(values[i].to_string()),
                DrugSeries::Banded { value, lower, upper, .. } => {
                    record.push(value[i].to_string());
                    record.push(lower[i].to_string());
                    record.push(upper[i].to_string());
                }
            }
        }
        writer.write_record(&record)?;
    }
    
    writer.flush()?;
    Ok(())
}

fn save_moving_statistics<P: AsRef<Path>>(data: &PlotData, path: P) -> PKResult<()> {
    if data.moving.is_empty() {
        return Ok(());
    }
    
    let mut writer = csv::Writer::from_path(path)?;
    
    // One average and deviation column per drug and window
    let mut header = vec!["TIME".to_string()];
    for (name, stats) in &data.moving {
        for s in stats {
            header.push(format!("{}_AVG_{}", name, s.window));
            header.push(format!("{}_SD_{}", name, s.window));
        }
    }
    writer.write_record(&header)?;
    
    for i in 0..data.x.len() {
        let mut record = vec![data.x.label(i)];
        for stats in data.moving.values() {
            for s in stats {
                record.push(s.average[i].to_string());
                record.push(s.std_dev[i].to_string());
            }
        }
        writer.write_record(&record)?;
    }
    
    writer.flush()?;
    Ok(())
}

fn save_lab_levels<P: AsRef<Path>>(labs: &BTreeMap<String, LabPoints>, path: P) -> PKResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    // Write header
    writer.write_record(["DRUG", "TIME", "VALUE"])?;
    
    for (name, points) in labs {
        for (i, value) in points.y.iter().enumerate() {
            writer.write_record(&[name.clone(), points.x.label(i), value.to_string()])?;
        }
    }
    
    writer.flush()?;
    Ok(())
}

fn save_prediction_errors<P: AsRef<Path>>(errors: &[PredictionError], path: P) -> PKResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["TIME", "DRUG", "MEASURED", "PREDICTED", "DEVIATION_PERCENT"])?;
    
    for e in errors {
        writer.write_record(&[
            e.time.to_string(),
            e.drug.clone(),
            e.measured.to_string(),
            e.predicted.to_string(),
            e.percent.to_string(),
        ])?;
    }
    
    writer.flush()?;
    Ok(())
}

fn save_summary<P: AsRef<Path>>(summary: &Summary, path: P) -> PKResult<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, summary)?;
    Ok(())
}

/// Short markdown overview of the run.
pub fn generate_report<P: AsRef<Path>>(summary: &Summary, output_dir: P) -> PKResult<()> {
    let report_path = output_dir.as_ref().join("report.md");
    
    let mut content = format!(
        "# Blood Level Estimation Report\n\n\
         - **Start date**: {}\n\
         - **Step**: {}s\n\
         - **Simulated steps**: {} ({} in the past)\n\n",
        summary.start_date, summary.step_seconds, summary.duration, summary.real_duration
    );
    
    // Per drug section
    for drug in &summary.drugs {
        content.push_str(&format!("## {}\n", drug.name));
        if let Some(doses) = &drug.doses {
            content.push_str(&format!(
                "- {:.2}mg over {} doses, average dose {:.3}mg\n",
                doses.total, doses.count, doses.average
            ));
        }
        if let Some(stats) = &drug.statistics {
            content.push_str(&format!(
                "- Average {} level {:.2} ± {:.2} ng/l (P<{})\n",
                drug.blood_name,
                stats.mean,
                stats.std_dev * summary.std_dev_count,
                summary.p_confidence
            ));
        }
        if let Some(message) = &drug.current_level {
            content.push_str(&format!("- {}\n", message));
        }
        content.push('\n');
    }
    
    std::fs::write(report_path, content)?;
    Ok(())
}
