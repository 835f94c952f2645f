use std::process;
use std::time::Duration;

use hotpath::VersionInfo;

mod logging;
mod scenario;

use scenario::DemoConfig;

const USAGE: &str = "\
Usage: hotpath-demo [options]

Options:
  --queue-capacity <n>     SPSC queue slots [default: 20]
  --messages <n>           Records to push through the queue [default: 50]
  --pool-capacity <n>      Slots per object pool [default: 5]
  --consumer-delay-ms <n>  Consumer start delay [default: 500]
  --interval-ms <n>        Pause after each produced/consumed record [default: 20]
  --pin-core <n|none>      Core for the pinned dummy thread [default: 1]
  -V, --version            Print version information as JSON
  -h, --help               Print this help";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Run(DemoConfig),
    Version,
    Help,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let config = match parse_args(&args) {
        Ok(Command::Run(config)) => config,
        Ok(Command::Help) => {
            println!("{USAGE}");
            return;
        }
        Ok(Command::Version) => {
            print_version();
            return;
        }
        Err(msg) => {
            eprintln!("error: {msg}");
            eprintln!();
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    logging::init_tracing();

    if let Err(e) = run(&config) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn print_version() {
    let info = VersionInfo::new().with_affinity();
    match serde_json::to_string_pretty(&info) {
        Ok(json) => println!("{json}"),
        Err(_) => println!("hotpath-demo {}", info.hotpath),
    }
}

fn run(config: &DemoConfig) -> anyhow::Result<()> {
    let version = VersionInfo::new().with_affinity();
    tracing::info!(
        version = version.hotpath,
        cores = ?version.cores,
        ?config,
        "Starting hotpath demo"
    );

    let report = scenario::run(config)?;

    tracing::info!(
        dummy_outputs = ?report.dummy_outputs,
        pool_live = ?report.pool_live,
        received = report.received.len(),
        "Demo complete"
    );
    Ok(())
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<&String>) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("{flag} requires a value"))?;
    value
        .parse()
        .map_err(|_| format!("invalid value for {flag}: '{value}'"))
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut config = DemoConfig::default();

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--queue-capacity" => {
                i += 1;
                config.queue_capacity = parse_value(flag, args.get(i))?;
            }
            "--messages" => {
                i += 1;
                config.messages = parse_value(flag, args.get(i))?;
            }
            "--pool-capacity" => {
                i += 1;
                config.pool_capacity = parse_value(flag, args.get(i))?;
            }
            "--consumer-delay-ms" => {
                i += 1;
                config.consumer_delay = Duration::from_millis(parse_value(flag, args.get(i))?);
            }
            "--interval-ms" => {
                i += 1;
                config.interval = Duration::from_millis(parse_value(flag, args.get(i))?);
            }
            "--pin-core" => {
                i += 1;
                config.pin_core = match args.get(i).map(String::as_str) {
                    Some("none") => None,
                    _ => Some(parse_value(flag, args.get(i))?),
                };
            }
            "--version" | "-V" => return Ok(Command::Version),
            "--help" | "-h" => return Ok(Command::Help),
            arg if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    if config.queue_capacity == 0 {
        return Err("--queue-capacity must be greater than zero".to_string());
    }
    if config.pool_capacity == 0 {
        return Err("--pool-capacity must be greater than zero".to_string());
    }
    Ok(Command::Run(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("hotpath-demo")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn no_flags_gives_defaults() {
        assert_eq!(
            parse_args(&args(&[])),
            Ok(Command::Run(DemoConfig::default()))
        );
    }

    #[test]
    fn all_flags() {
        let parsed = parse_args(&args(&[
            "--queue-capacity",
            "8",
            "--messages",
            "100",
            "--pool-capacity",
            "16",
            "--consumer-delay-ms",
            "0",
            "--interval-ms",
            "3",
            "--pin-core",
            "none",
        ]));
        assert_eq!(
            parsed,
            Ok(Command::Run(DemoConfig {
                queue_capacity: 8,
                messages: 100,
                pool_capacity: 16,
                consumer_delay: Duration::ZERO,
                interval: Duration::from_millis(3),
                pin_core: None,
            }))
        );
    }

    #[test]
    fn pin_core_number() {
        let Ok(Command::Run(config)) = parse_args(&args(&["--pin-core", "3"])) else {
            panic!("expected run command");
        };
        assert_eq!(config.pin_core, Some(3));
    }

    #[test]
    fn help_and_version_short_circuit() {
        assert_eq!(parse_args(&args(&["--help", "--bogus"])), Ok(Command::Help));
        assert_eq!(parse_args(&args(&["-V"])), Ok(Command::Version));
    }

    #[test]
    fn missing_value() {
        assert_eq!(
            parse_args(&args(&["--messages"])),
            Err("--messages requires a value".to_string())
        );
    }

    #[test]
    fn bad_number() {
        assert_eq!(
            parse_args(&args(&["--queue-capacity", "lots"])),
            Err("invalid value for --queue-capacity: 'lots'".to_string())
        );
    }

    #[test]
    fn zero_capacity_is_a_usage_error() {
        assert!(parse_args(&args(&["--queue-capacity", "0"])).is_err());
        assert!(parse_args(&args(&["--pool-capacity", "0"])).is_err());
    }

    #[test]
    fn unknown_flag_and_positional() {
        assert_eq!(
            parse_args(&args(&["--fast"])),
            Err("unknown flag: --fast".to_string())
        );
        assert_eq!(
            parse_args(&args(&["extra"])),
            Err("unexpected argument: extra".to_string())
        );
    }
}
