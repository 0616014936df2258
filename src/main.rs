use anyhow::Result;
use clap::{Parser, Subcommand};
use service_lifecycle::{LifecycleConfig, ServiceError, ServiceMonitor, ServiceSet, ServiceStatus};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "svcctl")]
#[command(about = "Drive the lifecycle of a configured set of interdependent services")]
#[command(version)]
#[command(long_about = "Builds the services declared in a TOML configuration file, wires up \
their dependencies, runs a sequence of lifecycle operations against them and reports every \
state transition observed on the service bus.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "svcctl.toml", help = "Path to TOML configuration file")]
    config: String,

    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    #[arg(long, help = "Print the final statuses as JSON")]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run lifecycle steps in order, e.g. `start:web fail:db reset:db start-all`
    Run {
        #[arg(required = true)]
        steps: Vec<Step>,
    },
    /// Start, stop and reset one service
    Cycle { service: String },
    /// Show configured services and their dependencies
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Start,
    Stop,
    Fail,
    Reset,
    DependencyStop,
    DependencyFail,
    StartAll,
    StopAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    operation: Operation,
    service: Option<String>,
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (operation, service) = match s.split_once(':') {
            Some((operation, service)) => (operation, Some(service.to_string())),
            None => (s, None),
        };
        let operation = match operation {
            "start" => Operation::Start,
            "stop" => Operation::Stop,
            "fail" => Operation::Fail,
            "reset" => Operation::Reset,
            "dependency-stop" => Operation::DependencyStop,
            "dependency-fail" => Operation::DependencyFail,
            "start-all" => Operation::StartAll,
            "stop-all" => Operation::StopAll,
            other => return Err(format!("unknown operation '{}'", other)),
        };

        let needs_service = !matches!(operation, Operation::StartAll | Operation::StopAll);
        match (&service, needs_service) {
            (None, true) => Err(format!("'{}' needs a service, e.g. {}:web", s, s)),
            (Some(_), false) => Err(format!("'{}' applies to all services", operation_name(s))),
            _ => Ok(Step { operation, service }),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operation = match self.operation {
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Fail => "fail",
            Operation::Reset => "reset",
            Operation::DependencyStop => "dependency-stop",
            Operation::DependencyFail => "dependency-fail",
            Operation::StartAll => "start-all",
            Operation::StopAll => "stop-all",
        };
        match &self.service {
            Some(service) => write!(f, "{}:{}", operation, service),
            None => f.write_str(operation),
        }
    }
}

fn operation_name(step: &str) -> &str {
    step.split_once(':').map(|(op, _)| op).unwrap_or(step)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting svcctl v{}", env!("CARGO_PKG_VERSION"));

    let config = match LifecycleConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("✓ Configuration is valid ({} services)", config.services.len());
                return Ok(());
            }
            Err(e) => {
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let set = Arc::new(ServiceSet::from_config(&config).map_err(|e| {
        error!("Failed to build services: {}", e);
        e
    })?);

    let command = args.command.clone().unwrap_or(Command::Status);
    if let Command::Status = command {
        print_services(&set);
        return Ok(());
    }

    let mut monitor = ServiceMonitor::new(set.registry().bus(), config.monitor.history);
    let token = CancellationToken::new();
    let monitor_task = {
        let token = token.clone();
        tokio::spawn(async move {
            monitor.run(token).await;
            monitor
        })
    };

    // Hooks may block, keep them off the async workers
    let conflicts = {
        let set = Arc::clone(&set);
        tokio::task::spawn_blocking(move || run_command(&set, &command)).await?
    };

    token.cancel();
    let monitor = monitor_task.await?;
    monitor.log_summary();

    println!();
    println!("Transitions:");
    for message in monitor.history() {
        println!("  {}", message.description());
    }

    let statuses = set.registry().statuses();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else {
        print_statuses(&statuses);
    }

    if conflicts > 0 {
        warn!("{} step(s) were rejected", conflicts);
        std::process::exit(1);
    }
    Ok(())
}

/// Run the command, returning how many steps were rejected
fn run_command(set: &ServiceSet, command: &Command) -> usize {
    let steps: Vec<Step> = match command {
        Command::Run { steps } => steps.clone(),
        Command::Cycle { service } => [Operation::Start, Operation::Stop, Operation::Reset]
            .into_iter()
            .map(|operation| Step {
                operation,
                service: Some(service.clone()),
            })
            .collect(),
        Command::Status => Vec::new(),
    };

    let mut conflicts = 0;
    for step in &steps {
        match run_step(set, step) {
            Ok(statuses) => {
                for status in statuses {
                    println!("{:<24} -> {}", step.to_string(), status);
                }
            }
            Err(e) => {
                println!("{:<24} ✗ {}", step.to_string(), e);
                conflicts += 1;
            }
        }
    }
    conflicts
}

fn run_step(set: &ServiceSet, step: &Step) -> service_lifecycle::Result<Vec<ServiceStatus>> {
    let registry = set.registry();
    let service = || match &step.service {
        Some(name) => set.get(name),
        None => Err(ServiceError::configuration(format!("{} needs a service", step))),
    };

    let status = match step.operation {
        Operation::StartAll => return Ok(registry.start_all()),
        Operation::StopAll => return Ok(registry.stop_all()),
        Operation::Start => service()?.start()?,
        Operation::Stop => service()?.stop()?,
        Operation::Fail => service()?.fail()?,
        Operation::Reset => service()?.reset()?,
        Operation::DependencyStop => service()?.dependency_stop()?,
        Operation::DependencyFail => service()?.dependency_fail()?,
    };
    Ok(vec![status])
}

fn print_services(set: &ServiceSet) {
    println!("Configured services:");
    for service in set.services() {
        let description = service.description();
        if description.is_empty() {
            println!("  {}", service.key());
        } else {
            println!("  {} - {}", service.key(), description);
        }
        for dependency in set.registry().dependencies_of(service.key()) {
            println!("      depends on {} ({:?})", dependency.service, dependency.kind);
        }
    }
}

fn print_statuses(statuses: &[ServiceStatus]) {
    println!();
    println!("Final status:");
    for status in statuses {
        let cause = status
            .cause
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  {:<20} {:<10} {}", status.service.to_string(), status.state, cause);
    }
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("service_lifecycle={0},svcctl={0}", log_level))
    });

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().with_target(true).boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format, with an example service pair
fn print_default_config() -> Result<()> {
    println!("# svcctl configuration file");
    println!("# Environment overrides use the SVCCTL__ prefix, e.g. SVCCTL__BUS__CAPACITY=64");
    println!();
    println!("{}", LifecycleConfig::default().to_toml()?);
    println!(
        r#"# [[services]]
# name = "db"
# description = "Primary database"
# fail_on_start = false
#
# [[services]]
# name = "web"
# depends_on = [{{ name = "db", kind = "always_required" }}]"#
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_parsing() {
        let step: Step = "fail:db".parse().unwrap();
        assert_eq!(step.operation, Operation::Fail);
        assert_eq!(step.service.as_deref(), Some("db"));
        assert_eq!(step.to_string(), "fail:db");

        let step: Step = "start-all".parse().unwrap();
        assert_eq!(step.operation, Operation::StartAll);
        assert!(step.service.is_none());

        assert!("start".parse::<Step>().is_err());
        assert!("stop-all:db".parse::<Step>().is_err());
        assert!("restart:db".parse::<Step>().is_err());
    }

    #[test]
    fn test_run_step_reports_unknown_services() {
        let set = ServiceSet::from_config(&LifecycleConfig::default()).unwrap();

        let step: Step = "start:missing".parse().unwrap();
        assert!(matches!(
            run_step(&set, &step),
            Err(ServiceError::UnknownService(_))
        ));

        let step: Step = "start-all".parse().unwrap();
        assert!(run_step(&set, &step).unwrap().is_empty());
        assert_eq!(run_command(&set, &Command::Cycle { service: "missing".into() }), 3);
    }

    #[test]
    fn test_args_parse_run_steps() {
        let args = Args::try_parse_from(["svcctl", "-c", "demo.toml", "run", "start:web", "stop-all"])
            .unwrap();
        assert_eq!(args.config, "demo.toml");
        match args.command {
            Some(Command::Run { steps }) => assert_eq!(steps.len(), 2),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
