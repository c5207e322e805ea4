use anyhow::Context;
use chrono::{Duration, Local, NaiveDate, NaiveTime};
use clap::Parser;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::path::PathBuf;

mod config;
mod drugs;
mod dosing;
mod labs;
mod statistics;
mod simulation;
mod output;
mod error;

use crate::config::Config;
use crate::error::{PKError, PKResult};
use crate::drugs::catalog;
use crate::labs::LabObservation;
use crate::output::Summary;
use crate::simulation::{BodyModel, PlotOptions};
use crate::statistics::StdDevCorrection;

#[derive(Parser)]
#[command(name = "pk_timeline")]
#[command(about = "Estimate blood levels from a dosing history and lab results")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: PathBuf,
    
    /// Output directory
    #[arg(short, long)]
    output: PathBuf,
    
    /// Export the uncalibrated body burden instead of blood levels
    #[arg(long)]
    raw: bool,
    
    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn build_model(config: &Config) -> anyhow::Result<BodyModel> {
    let mut model = BodyModel::new(config.model.start_date, config.model.step)?;
    
    let mut known = BTreeSet::new();
    for (key, drug_config) in &config.drugs {
        match catalog::create_drug(&drug_config.name) {
            Some(drug) => {
                let mut drug = drug?;
                drug.set_factor(drug_config.factor);
                model.add_drug(key, drug);
                known.insert(key.clone());
            }
            None => warn!("Cannot find drug {} in the catalog, skipping {}", drug_config.name, key),
        }
    }
    
    for (key, doses) in &config.doses {
        if !known.contains(key) {
            warn!("Skipping {} doses of unresolved drug {}", doses.len(), key);
            continue;
        }
        for dose in doses {
            model.add_dose(key, dose.dose, dose.date)
                .with_context(|| format!("Adding dose of {} at {}", key, dose.date))?;
        }
        debug!("{} has {} pending doses", key, model.pending_doses(key));
    }
    
    // Drop lab values of skipped drugs, and draws left without any value
    let observations: Vec<LabObservation> = config.labs
        .iter()
        .map(|lab| {
            lab.values
                .iter()
                .filter(|(key, _)| known.contains(*key))
                .fold(LabObservation::new(lab.date), |obs, (key, value)| obs.with_value(key, *value))
        })
        .filter(|obs| !obs.values.is_empty())
        .collect();
    model.add_lab_data_list(observations);
    
    for event in &config.model.events {
        model.add_event(event.event_date.and_time(NaiveTime::MIN), event.transition);
    }
    debug!("{} lab draws and {} events registered", model.labs().len(), model.events().len());
    
    Ok(model)
}

/// Last simulated day, `days_into_future` after `today`.
fn simulation_end(today: NaiveDate, days_into_future: i64) -> PKResult<NaiveDate> {
    Duration::try_days(days_into_future)
        .and_then(|ahead| today.checked_add_signed(ahead))
        .ok_or_else(|| PKError::Configuration(
            format!("days_into_future of {} runs past the end of the calendar", days_into_future)
        ))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    
    // Initialize logging
    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }
    
    let config = Config::from_file(&cli.config)
        .with_context(|| format!("Loading configuration from {:?}", cli.config))?;
    info!("Loaded configuration from {:?} with {} doses", cli.config, config.dose_count());
    
    let mut model = build_model(&config)?;
    
    let until = simulation_end(Local::now().date_naive(), config.model.days_into_future)?;
    model.calculate_timeline(until)?;
    info!("Timeline calculated until {} ({} steps)", until, model.duration());
    
    let (std_dev_count, p_confidence) = if config.graph.two_std_dev_in_band {
        (2.0, ".046")
    } else {
        (1.0, ".317")
    };
    
    let calibrated = !cli.raw && !model.labs().is_empty();
    if calibrated {
        model.estimate_blood_levels(StdDevCorrection::from_corrected(config.model.corrected_std_dev))?;
    }
    
    let summary = Summary::from_model(&model, std_dev_count, p_confidence);
    for drug in &summary.drugs {
        if let Some(message) = &drug.current_level {
            info!("{}", message);
        }
        if let Some(doses) = &drug.doses {
            info!(
                "{}: {:8.2}mg over {} doses for an average dose of {:5.3}mg",
                drug.name, doses.total, doses.count, doses.average
            );
        }
        if let Some(stats) = &drug.statistics {
            info!(
                "Average blood level for {} is {:6.2} ± {:6.2} ng/l (P<{})",
                drug.name, stats.mean, stats.std_dev * std_dev_count, p_confidence
            );
        }
    }
    
    let options = PlotOptions {
        display_step: config.graph.units,
        calibrated,
        stddev_multiplier: std_dev_count,
        offset: config.graph.x_offset,
        use_wallclock: config.graph.use_x_date,
        color: true,
        ..PlotOptions::default()
    };
    let data = model.get_plot_data(&options);
    let labs = model.get_plot_lab_levels(options.display_step, options.offset, options.use_wallclock);
    let errors = if calibrated { model.prediction_errors() } else { Vec::new() };
    
    std::fs::create_dir_all(&cli.output)?;
    crate::output::save_results(&data, &labs, &errors, &summary, &cli.output)
        .with_context(|| format!("Writing results to {:?}", cli.output))?;
    info!("Results saved to {:?}", cli.output);
    
    Ok(())
}
