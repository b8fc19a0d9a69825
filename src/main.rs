#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)]

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_std::task::block_on;
use chrono::Local;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::time::ChronoLocal;

use fiberalign::aligner::{Aligner, PassReport, PassState};
use fiberalign::communications::ScanComms;
use fiberalign::configs;
use fiberalign::grid::SampleGrid;
use fiberalign::hardware::AbortFlag;
use fiberalign::util::{find_file, hostname};

/// Runs one simulated fiber-alignment pass described by a TOML config file.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Config file; resolved against the working directory, then the executable's directory
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Where to write the pass record; defaults to `scan_record.toml` next to the config file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log at DEBUG level
    #[arg(short, long)]
    verbose: bool,

    /// Do not bind the publishing and command sockets
    #[arg(long)]
    no_publish: bool,
}

#[derive(Debug, Serialize)]
struct ScanRecord {
    timestamp: String,
    hostname: String,
    target: String,
    interpolation: String,
    success: bool,
    error: Option<String>,
    measured_value: Option<f64>,
    measured_position: Option<[f64; 3]>,
    refined_value: Option<f64>,
    refined_position: Option<[f64; 3]>,
    cells_measured: usize,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::rfc_3339())
        .with_max_level(if args.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    let config_path = find_file(&args.config)
        .unwrap_or_else(|| panic!("Failed to find config file {}", args.config.display()));
    info!("Reading config file {}", config_path.display());
    let cfg_text = fs::read_to_string(&config_path).expect("Failed to open config file!");
    let cfg: toml::Value = cfg_text.parse().expect("Failed to parse config file");

    let settings =
        configs::settings_from_config(&cfg).expect("Failed to read [scan] settings from config file");
    let request =
        configs::request_from_config(&cfg).expect("Failed to read [request] from config file");
    let sim = configs::simulation_from_config(&cfg)
        .expect("Failed to read [simulation] from config file");

    let comms: Option<RefCell<ScanComms>> = if args.no_publish {
        None
    } else {
        match block_on(configs::comms_from_config(&cfg)) {
            Ok(comms) => {
                info!(
                    "Publishing on port {}, commands on port {}",
                    comms.logs_port(),
                    comms.command_port()
                );
                Some(RefCell::new(comms))
            }
            Err(e) => {
                warn!("Continuing without publishing: {e}");
                None
            }
        }
    };

    let abort = AbortFlag::new();
    let (_bench, laser, stage, meter) = sim.build();
    let mut aligner = Aligner::new(laser, stage, Arc::new(Mutex::new(meter)), abort.clone());
    aligner.settings(settings);

    // a viewer may ask for an abort before the pass begins
    if let Some(comms) = &comms {
        while block_on(comms.borrow_mut().handle_socket_request(&abort, PassState::Idle)).is_some() {}
    }

    let total = request.region.len();
    let mut measured = 0_usize;
    let mut progress = |fraction: f64, snapshot: &SampleGrid| {
        measured += 1;
        let Some(comms) = &comms else {
            return;
        };
        let mut comms = comms.borrow_mut();
        if comms.should_publish(measured, total) {
            if let Err(e) = block_on(comms.publish_progress(fraction, snapshot)) {
                warn!("failed to publish progress: {e}");
            }
        }
        let _ = block_on(comms.handle_socket_request(&abort, PassState::Scanning));
    };

    let mut last_report: Option<PassReport> = None;
    let mut completion = |report: &PassReport| {
        if let Some(comms) = &comms {
            if let Err(e) = block_on(comms.borrow_mut().publish_complete(report)) {
                warn!("failed to publish completion: {e}");
            }
        }
        last_report = Some(report.clone());
    };

    let result = aligner.find_maxima(&request, &mut progress, &mut completion);
    let error = match &result {
        Ok(_) => None,
        Err(e) => {
            error!("Pass failed: {e}");
            Some(e.to_string())
        }
    };

    let Some(report) = last_report else {
        error!("Pass ended without a report");
        std::process::exit(1);
    };
    let record = ScanRecord {
        timestamp: Local::now().to_rfc3339(),
        hostname: hostname().unwrap_or_default(),
        target: request.target.to_string(),
        interpolation: request.interpolation.to_string(),
        success: report.success,
        error,
        measured_value: report.measured.map(|m| m.value),
        measured_position: report.measured_position(),
        refined_value: report.surface.refined().map(|r| r.value),
        refined_position: report.refined_position(),
        cells_measured: report.sparse.measured_count(),
    };
    let record_path = args
        .output
        .unwrap_or_else(|| config_path.with_file_name("scan_record.toml"));
    match toml::to_string(&record) {
        Ok(text) => match fs::write(&record_path, text) {
            Ok(()) => info!("Wrote pass record to {}", record_path.display()),
            Err(e) => error!("Failed to write {}: {e}", record_path.display()),
        },
        Err(e) => error!("Failed to serialize pass record: {e}"),
    }

    if let Some(comms) = &comms {
        let _ = block_on(comms.borrow_mut().unbind_sockets());
    }
    if result.is_err() {
        std::process::exit(1);
    }
}
