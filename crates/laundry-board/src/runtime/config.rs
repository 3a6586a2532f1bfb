use laundry_core::FleetLayout;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub run_seconds: Option<u64>,
    pub bind_addr: String,
    pub bridge_enabled: bool,
    pub json_logs: bool,
    pub log_dir: Option<PathBuf>,
    pub metrics_addr: Option<String>,
    pub audit_path: Option<PathBuf>,
    pub tick_ms: u64,
    pub clock_enabled: bool,
    pub dryers: u8,
    pub washers: u8,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let layout = FleetLayout::default();
        Self {
            show_help: false,
            run_seconds: None,
            bind_addr: "127.0.0.1:7000".to_string(),
            bridge_enabled: true,
            json_logs: false,
            log_dir: None,
            metrics_addr: None,
            audit_path: None,
            tick_ms: 60_000,
            clock_enabled: true,
            dryers: layout.dryers,
            washers: layout.washers,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Self {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--run-seconds" => {
                    if i + 1 < args.len() {
                        cfg.run_seconds = args[i + 1].parse::<u64>().ok();
                        i += 1;
                    }
                }
                "--bind" => {
                    if i + 1 < args.len() {
                        cfg.bind_addr = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--no-bridge" => {
                    cfg.bridge_enabled = false;
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--log-dir" => {
                    if i + 1 < args.len() {
                        cfg.log_dir = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--metrics-addr" => {
                    if i + 1 < args.len() {
                        cfg.metrics_addr = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--audit-log" => {
                    if i + 1 < args.len() {
                        cfg.audit_path = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--tick-ms" => {
                    if i + 1 < args.len() {
                        cfg.tick_ms = args[i + 1]
                            .parse::<u64>()
                            .ok()
                            .filter(|ms| *ms > 0)
                            .unwrap_or(60_000);
                        i += 1;
                    }
                }
                "--no-clock" => {
                    cfg.clock_enabled = false;
                }
                "--dryers" => {
                    if i + 1 < args.len() {
                        cfg.dryers = args[i + 1].parse().unwrap_or(cfg.dryers);
                        i += 1;
                    }
                }
                "--washers" => {
                    if i + 1 < args.len() {
                        cfg.washers = args[i + 1].parse().unwrap_or(cfg.washers);
                        i += 1;
                    }
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                _ => {}
            }
            i += 1;
        }
        cfg
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn layout(&self) -> FleetLayout {
        FleetLayout {
            dryers: self.dryers,
            washers: self.washers,
        }
    }

    pub fn print_help() {
        println!(
            r#"laundry-board - live status board for shared washers and dryers

USAGE:
    laundry-board [OPTIONS]

OPTIONS:
    --bind <ADDR>           Bridge TCP bind address [default: 127.0.0.1:7000]
    --no-bridge             Disable the TCP bridge (board and clock only)
    --run-seconds <SECS>    Run for a fixed duration then exit
    --json-logs             Output logs in JSON format (for log aggregation)
    --log-dir <DIR>         Also write daily-rolling log files to DIR
    --metrics-addr <ADDR>   Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --audit-log <PATH>      Enable audit logging of status transitions to a JSONL file
    --tick-ms <MS>          Length of one simulated minute in milliseconds [default: 60000]
    --no-clock              Do not start the countdown clock
    --dryers <N>            Number of dryers [default: 3]
    --washers <N>           Number of washers [default: 4]
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log filter (e.g., RUST_LOG=debug,laundry_core=trace)

EXAMPLES:
    # Standard room with metrics
    laundry-board --metrics-addr 0.0.0.0:9090

    # Fast-forward demo: one simulated minute per second
    laundry-board --tick-ms 1000 --audit-log ./audit.jsonl

    # Short test run
    laundry-board --run-seconds 10 --no-bridge
"#
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        std::iter::once("laundry-board")
            .chain(raw.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults_match_standard_room() {
        let cfg = RuntimeConfig::from_args(&args(&[]));
        assert_eq!(cfg.tick_interval(), Duration::from_secs(60));
        assert_eq!(cfg.layout(), FleetLayout::default());
        assert!(cfg.bridge_enabled);
        assert!(cfg.clock_enabled);
    }

    #[test]
    fn parses_flags() {
        let cfg = RuntimeConfig::from_args(&args(&[
            "--bind",
            "0.0.0.0:7100",
            "--tick-ms",
            "250",
            "--washers",
            "6",
            "--no-clock",
            "--audit-log",
            "/tmp/audit.jsonl",
            "--run-seconds",
            "3",
        ]));
        assert_eq!(cfg.bind_addr, "0.0.0.0:7100");
        assert_eq!(cfg.tick_ms, 250);
        assert_eq!(cfg.washers, 6);
        assert_eq!(cfg.dryers, 3);
        assert!(!cfg.clock_enabled);
        assert_eq!(cfg.audit_path, Some(PathBuf::from("/tmp/audit.jsonl")));
        assert_eq!(cfg.run_seconds, Some(3));
    }

    #[test]
    fn bad_values_fall_back_to_defaults() {
        let cfg = RuntimeConfig::from_args(&args(&["--tick-ms", "0", "--dryers", "many"]));
        assert_eq!(cfg.tick_ms, 60_000);
        assert_eq!(cfg.dryers, 3);
    }

    #[test]
    fn help_stops_parsing() {
        let cfg = RuntimeConfig::from_args(&args(&["-h", "--no-bridge"]));
        assert!(cfg.show_help);
        assert!(cfg.bridge_enabled);
    }
}
