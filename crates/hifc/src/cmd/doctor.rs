use std::path::PathBuf;

use hifc_engine::EngineConfig;
use serde::Serialize;

use crate::cmd::bus::{parse_bus_spec, start_engine, BusSpec};
use crate::cmd::{BusArgs, DoctorArgs};
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(_args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let mut checks = vec![platform_bus_check(), compiled_features_check()];

    let config = config_check(&mut checks);
    let bus = bus_spec_check(&mut checks);
    if let Some(spec) = &bus {
        checks.push(device_access_check(spec));
    }
    match (bus, config) {
        (Some(spec), Some(config)) => checks.push(controller_check(spec, config)),
        _ => checks.push(CheckResult::new(
            "controller",
            CheckStatus::Skip,
            "no usable bus or configuration",
        )),
    }

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let overall = if has_fail { "fail" } else { "pass" };
    let output = DoctorOutput { checks, overall };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("hifc doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<18} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Warn => "WARN",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}

fn platform_bus_check() -> CheckResult {
    if cfg!(target_os = "linux") {
        CheckResult::new(
            "platform_bus",
            CheckStatus::Pass,
            "i2c-dev and spidev backends available",
        )
    } else {
        CheckResult::new(
            "platform_bus",
            CheckStatus::Fail,
            "bus device backends are only implemented for Linux",
        )
    }
}

fn compiled_features_check() -> CheckResult {
    let mut features = vec!["cli"];
    if cfg!(feature = "async") {
        features.push("async");
    }
    CheckResult::new("compiled_features", CheckStatus::Info, features.join(", "))
}

fn config_check(checks: &mut Vec<CheckResult>) -> Option<EngineConfig> {
    let Ok(path) = std::env::var("HIFC_CONFIG") else {
        checks.push(CheckResult::new(
            "engine_config",
            CheckStatus::Info,
            "HIFC_CONFIG not set, using defaults",
        ));
        return Some(EngineConfig::default());
    };
    let path = PathBuf::from(path);
    match EngineConfig::from_json_file(&path) {
        Ok(config) => {
            checks.push(CheckResult::new(
                "engine_config",
                CheckStatus::Pass,
                format!("{} loaded", path.display()),
            ));
            Some(config)
        }
        Err(err) => {
            checks.push(CheckResult::new(
                "engine_config",
                CheckStatus::Fail,
                err.to_string(),
            ));
            None
        }
    }
}

fn bus_spec_check(checks: &mut Vec<CheckResult>) -> Option<BusSpec> {
    let Ok(value) = std::env::var("HIFC_BUS") else {
        checks.push(CheckResult::new(
            "bus_spec",
            CheckStatus::Skip,
            "HIFC_BUS not set",
        ));
        return None;
    };
    match parse_bus_spec(&value) {
        Ok(spec) => {
            checks.push(CheckResult::new(
                "bus_spec",
                CheckStatus::Pass,
                spec.to_string(),
            ));
            Some(spec)
        }
        Err(err) => {
            checks.push(CheckResult::new("bus_spec", CheckStatus::Fail, err));
            None
        }
    }
}

fn device_access_check(spec: &BusSpec) -> CheckResult {
    let path = spec.path();
    match std::fs::OpenOptions::new().read(true).write(true).open(path) {
        Ok(_) => CheckResult::new(
            "device_access",
            CheckStatus::Pass,
            format!("{} is readable and writable", path.display()),
        ),
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => CheckResult::new(
            "device_access",
            CheckStatus::Fail,
            format!("{}: permission denied (check group membership)", path.display()),
        ),
        Err(err) => CheckResult::new(
            "device_access",
            CheckStatus::Fail,
            format!("{}: {err}", path.display()),
        ),
    }
}

/// Read the pending-event register once through a short-lived engine.
fn controller_check(spec: BusSpec, config: EngineConfig) -> CheckResult {
    let args = BusArgs {
        bus: spec,
        config: None,
    };
    let engine = match start_engine(&args, config, |builder| builder) {
        Ok(engine) => engine,
        Err(err) => return CheckResult::new("controller", CheckStatus::Fail, err.message),
    };
    let result = engine.read_pending_events();
    let stats = engine.stats();
    engine.shutdown();
    match result {
        Ok(bitmap) => CheckResult::new(
            "controller",
            CheckStatus::Pass,
            format!(
                "pending events 0x{bitmap:016x}, next read buffer {}, next write buffer {}",
                stats.next_read_slot, stats.next_write_slot
            ),
        ),
        Err(err) => CheckResult::new("controller", CheckStatus::Warn, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doctor_output_has_overall_status() {
        let output = DoctorOutput {
            checks: vec![CheckResult::new("x", CheckStatus::Pass, "ok")],
            overall: "pass",
        };
        let json = serde_json::to_string(&output).expect("doctor output should serialize");
        assert!(json.contains("\"overall\":\"pass\""));
        assert!(json.contains("\"status\":\"pass\""));
    }

    #[test]
    fn missing_device_fails_access_check() {
        let spec = BusSpec::I2c {
            path: PathBuf::from("/nonexistent/i2c-99"),
            address: 0x24,
        };
        let check = device_access_check(&spec);
        assert!(matches!(check.status, CheckStatus::Fail));
    }
}
