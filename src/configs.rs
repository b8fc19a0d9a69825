#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss, clippy::missing_errors_doc)]

use std::str::FromStr;
use std::time::Duration;

use crate::aligner::{AlignerSettings, ScanRequest};
use crate::communications::ScanComms;
use crate::grid::{ScanRegion, StartPosition};
use crate::hardware::{AbortCheck, Target};
use crate::interpolate::{Interpolation, DEFAULT_DEPTH};
use crate::laser::LaserSettings;
use crate::sim::{GaussianCoupling, SimSetup};
use crate::util::{hostname, tomlget, tomlget_opt, tomlget_or};

/// Section a `[scan]` key is read from: the one named after this machine if it sets the key,
/// `[scan]` otherwise.
fn scan_section<'a>(cfg: &toml::Value, host: &'a str, key: &str) -> &'a str {
    if cfg.get(host).and_then(|sec| sec.get(key)).is_some() {
        host
    } else {
        "scan"
    }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

fn float_array(cfg: &toml::Value, sec: &str, key: &str) -> Result<Vec<f64>, String> {
    let Some(value) = cfg.get(sec).and_then(|s| s.get(key)) else {
        return Ok(Vec::new());
    };
    value
        .as_array()
        .ok_or_else(|| format!("failed to convert {sec}:{key} to array"))?
        .iter()
        .map(|v| {
            v.as_float()
                .or_else(|| v.as_integer().map(|i| i as f64))
                .ok_or_else(|| format!("non-numeric entry in {sec}:{key}"))
        })
        .collect()
}

fn float_pair(cfg: &toml::Value, sec: &str, key: &str) -> Result<[f64; 2], String> {
    match float_array(cfg, sec, key)?.as_slice() {
        [] => Ok([0.0, 0.0]),
        [x, y] => Ok([*x, *y]),
        _ => Err(format!("{sec}:{key} must hold two coordinates")),
    }
}

fn point(cfg: &toml::Value, sec: &str, key: &str) -> Result<[f64; 3], String> {
    match float_array(cfg, sec, key)?.as_slice() {
        [] => Ok([0.0; 3]),
        [x, y, z] => Ok([*x, *y, *z]),
        _ => Err(format!("{sec}:{key} must hold three coordinates")),
    }
}

pub fn settings_from_config(cfg: &toml::Value) -> Result<AlignerSettings, String> {
    let host = hostname()?;
    let host = host.as_str();
    let sec = |key: &str| scan_section(cfg, host, key);

    let abort_check: &str = tomlget_or!(cfg, sec("abort_check"), "abort_check", "pass");
    Ok(AlignerSettings {
        settle_delay: millis(tomlget_or!(cfg, sec("settle_delay_ms"), "settle_delay_ms", 50)),
        laser_settle: millis(tomlget_or!(cfg, sec("laser_settle_ms"), "laser_settle_ms", 1000)),
        move_timeout: millis(tomlget_or!(cfg, sec("move_timeout_ms"), "move_timeout_ms", 10_000)),
        measure_timeout: millis(tomlget_or!(
            cfg,
            sec("measure_timeout_ms"),
            "measure_timeout_ms",
            5_000
        )),
        interpolation_depth: tomlget_or!(
            cfg,
            sec("interpolation_depth"),
            "interpolation_depth",
            DEFAULT_DEPTH
        )
        .max(2),
        exclude_trailing_edge: tomlget_or!(
            cfg,
            sec("exclude_trailing_edge"),
            "exclude_trailing_edge",
            true
        ),
        abort_check: AbortCheck::from_str(abort_check)?,
    })
}

pub fn request_from_config(cfg: &toml::Value) -> Result<ScanRequest, String> {
    let target = Target::from_str(tomlget_or!(cfg, "request", "target", "input"))?;
    let origin = StartPosition::from_coords(&float_array(cfg, "request", "position")?);
    let region = ScanRegion::new(
        origin,
        tomlget!(cfg, "request", "grid_width"),
        tomlget!(cfg, "request", "grid_height"),
        tomlget!(cfg, "request", "grid_xpoints"),
        tomlget!(cfg, "request", "grid_ypoints"),
    )
    .map_err(|e| e.to_string())?;

    Ok(ScanRequest {
        target,
        region,
        passes: tomlget_or!(cfg, "request", "passes", 1_u32).max(1),
        interpolation: Interpolation::from_name(tomlget_or!(
            cfg,
            "request",
            "interpolation",
            "Cubic"
        )),
        laser: LaserSettings::new(
            tomlget_or!(cfg, "request", "wavelength_nm", 1550.0),
            tomlget_or!(cfg, "request", "power_mw", 1.0),
        ),
    })
}

pub fn simulation_from_config(cfg: &toml::Value) -> Result<SimSetup, String> {
    let defaults = SimSetup::default();
    Ok(SimSetup {
        input: point(cfg, "simulation", "input_start")?,
        output: point(cfg, "simulation", "output_start")?,
        coupling: GaussianCoupling {
            input_peak: float_pair(cfg, "simulation", "input_peak")?,
            output_peak: float_pair(cfg, "simulation", "output_peak")?,
            peak_power: tomlget_or!(cfg, "simulation", "peak_power", defaults.coupling.peak_power),
            waist: tomlget_or!(cfg, "simulation", "waist", defaults.coupling.waist),
        },
        noise: tomlget_or!(cfg, "simulation", "noise", 0.0),
        fail_move_at: tomlget_opt!(cfg, "simulation", "fail_move_at"),
    })
}

pub async fn comms_from_config(cfg: &toml::Value) -> Result<ScanComms, String> {
    let mut out = ScanComms::new().ok_or("failed to instantiate comms struct")?;
    out.bind_sockets(
        tomlget_or!(cfg, "general", "logs_port", 8080),
        tomlget_or!(cfg, "general", "command_port", 8081),
    )
    .await
    .map_err(|e| format!("error [{e}] in binding sockets"))?;
    out.set_publish_frequency(tomlget_or!(cfg, "general", "publish_every_cells", 1));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[general]
logs_port = 8080
command_port = 8081

[scan]
settle_delay_ms = 20
laser_settle_ms = 500
interpolation_depth = 1
abort_check = "cell"

[request]
target = "output"
position = [7.5, 7.5, 5.0]
grid_width = 15.0
grid_height = 15.0
grid_xpoints = 3
grid_ypoints = 4
passes = 3
interpolation = "Bivariate Spline"
wavelength_nm = 1310.0
power_mw = 2.5

[simulation]
input_start = [1.0, 2.0, 3.0]
input_peak = [5, 5]
peak_power = 2.0
fail_move_at = 4
"#;

    fn parse(text: &str) -> toml::Value {
        text.parse().unwrap()
    }

    #[test]
    fn settings_with_defaults() {
        let settings = settings_from_config(&parse(SAMPLE)).unwrap();
        assert_eq!(settings.settle_delay, Duration::from_millis(20));
        assert_eq!(settings.laser_settle, Duration::from_millis(500));
        assert_eq!(settings.move_timeout, Duration::from_secs(10));
        assert_eq!(settings.interpolation_depth, 2);
        assert!(settings.exclude_trailing_edge);
        assert_eq!(settings.abort_check, AbortCheck::EveryCell);

        let empty = settings_from_config(&parse("")).unwrap();
        assert_eq!(empty, AlignerSettings::default());
    }

    #[test]
    fn hostname_section_overrides_scan() {
        let host = hostname().unwrap();
        let text = format!("{SAMPLE}\n[\"{host}\"]\nsettle_delay_ms = 7\nexclude_trailing_edge = false\n");
        let settings = settings_from_config(&parse(&text)).unwrap();
        assert_eq!(settings.settle_delay, Duration::from_millis(7));
        assert!(!settings.exclude_trailing_edge);
        assert_eq!(settings.laser_settle, Duration::from_millis(500));
    }

    #[test]
    fn request() {
        let req = request_from_config(&parse(SAMPLE)).unwrap();
        assert_eq!(req.target, Target::Output);
        assert_eq!(req.region.origin, StartPosition::Xyz([7.5, 7.5, 5.0]));
        assert_eq!((req.region.nx(), req.region.ny()), (3, 4));
        assert_eq!(req.region.width(), 15.0);
        assert_eq!(req.passes, 3);
        assert_eq!(req.interpolation, Interpolation::BivariateSpline);
        assert_eq!(req.laser, LaserSettings::new(1310.0, 2.5));
    }

    #[test]
    fn request_without_position_starts_at_current() {
        let text = SAMPLE.replace("position = [7.5, 7.5, 5.0]\n", "");
        let req = request_from_config(&parse(&text)).unwrap();
        assert_eq!(req.region.origin, StartPosition::Current);
    }

    #[test]
    fn request_needs_a_grid() {
        let text = SAMPLE.replace("grid_xpoints = 3\n", "");
        let err = request_from_config(&parse(&text)).unwrap_err();
        assert!(err.contains("grid_xpoints"), "{err}");

        let text = SAMPLE.replace("grid_xpoints = 3", "grid_xpoints = 0");
        assert!(request_from_config(&parse(&text)).is_err());

        let text = SAMPLE.replace("target = \"output\"", "target = \"sideways\"");
        assert!(request_from_config(&parse(&text)).is_err());
    }

    #[test]
    fn negative_integers_are_rejected() {
        let text = SAMPLE.replace("grid_xpoints = 3", "grid_xpoints = -1");
        let err = request_from_config(&parse(&text)).unwrap_err();
        assert!(err.contains("grid_xpoints"), "{err}");

        let text = SAMPLE.replace("passes = 3", "passes = -2");
        assert!(request_from_config(&parse(&text)).is_err());

        let text = SAMPLE.replace("interpolation_depth = 1", "interpolation_depth = -5");
        assert!(settings_from_config(&parse(&text)).is_err());

        let text = SAMPLE.replace("settle_delay_ms = 20", "settle_delay_ms = -20");
        assert!(settings_from_config(&parse(&text)).is_err());

        let text = SAMPLE.replace("fail_move_at = 4", "fail_move_at = -1");
        assert!(simulation_from_config(&parse(&text)).is_err());
    }

    #[test]
    fn wrong_types_fall_back_to_defaults() {
        let text = SAMPLE.replace("settle_delay_ms = 20", "settle_delay_ms = \"soon\"");
        let settings = settings_from_config(&parse(&text)).unwrap();
        assert_eq!(settings.settle_delay, AlignerSettings::default().settle_delay);
    }

    #[test]
    fn simulation() {
        let sim = simulation_from_config(&parse(SAMPLE)).unwrap();
        assert_eq!(sim.input, [1.0, 2.0, 3.0]);
        assert_eq!(sim.output, [0.0; 3]);
        assert_eq!(sim.coupling.input_peak, [5.0, 5.0]);
        assert_eq!(sim.coupling.peak_power, 2.0);
        assert_eq!(sim.coupling.waist, SimSetup::default().coupling.waist);
        assert_eq!(sim.fail_move_at, Some(4));

        let bad = SAMPLE.replace("input_peak = [5, 5]", "input_peak = [5]");
        assert!(simulation_from_config(&parse(&bad)).is_err());
    }
}
