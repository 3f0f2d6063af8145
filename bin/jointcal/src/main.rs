//! jointcal - run a calibration session from the command line
//!
//! Confirms the tool checklist, starts the calibration program on the
//! robot (or the simulator), prints its output and forwards operator
//! input typed on stdin to pending prompts. Ctrl-C cancels the session.

use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use jointcal::device::SshDeviceLink;
use jointcal::events::RobotSubscription;
use jointcal::{
    CalibrationEvent, CalibrationStep, Config, EventBus, Services, SessionHandle,
    SessionRegistry, SessionStatus, ZeroPointScope,
};

/// Upper bound for the configuration read after the checklist
const READ_CONFIG_TIMEOUT: Duration = Duration::from_secs(120);

/// Command line options
#[derive(Debug, Default, PartialEq)]
struct AppArgs {
    robot_id: Option<String>,
    scope: Option<ZeroPointScope>,
    head_hand: bool,
    simulate: bool,
    auto_respond: bool,
    /// Print every event as JSON instead of log lines
    json: bool,
    host: Option<String>,
    config_path: Option<PathBuf>,
    debug: bool,
}

impl AppArgs {
    fn parse() -> anyhow::Result<Self> {
        Self::parse_from(env::args().skip(1))
    }

    fn parse_from(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut app_args = AppArgs::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--robot" | "-r" => {
                    app_args.robot_id = Some(args.next().context("Missing robot id")?);
                }
                "--scope" | "-s" => {
                    let value = args.next().context("Missing calibration scope")?;
                    app_args.scope = Some(value.parse().map_err(anyhow::Error::msg)?);
                }
                "--head-hand" => app_args.head_hand = true,
                "--simulate" => app_args.simulate = true,
                "--auto" | "-a" => app_args.auto_respond = true,
                "--json" => app_args.json = true,
                "--host" => {
                    app_args.host = Some(args.next().context("Missing host")?);
                }
                "--config" | "-c" => {
                    let path = args.next().context("Missing config file path")?;
                    app_args.config_path = Some(PathBuf::from(path));
                }
                "--debug" | "-d" => app_args.debug = true,
                "--help" | "-h" => {
                    print_help();
                    process::exit(0);
                }
                "--version" | "-v" => {
                    println!("jointcal v{}", jointcal::VERSION);
                    process::exit(0);
                }
                other if other.starts_with('-') => bail!("Unknown option: {}", other),
                other => bail!("Unexpected argument: {}", other),
            }
        }

        if app_args.head_hand && app_args.scope.is_some() {
            bail!("--scope applies to zero-point calibration only");
        }
        Ok(app_args)
    }
}

fn print_help() {
    println!("jointcal - robot joint calibration sessions");
    println!();
    println!("USAGE:");
    println!("    jointcal --robot <ID> [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -r, --robot <ID>       Robot to calibrate");
    println!("    -s, --scope <SCOPE>    full_body (default), arms_only or legs_only");
    println!("        --head-hand        Run head and hand calibration instead");
    println!("        --simulate         Use the in-process simulator");
    println!("    -a, --auto             Answer prompts with their defaults");
    println!("        --json             Print events as JSON");
    println!("        --host <HOST>      Host name for the robot");
    println!("    -c, --config <PATH>    Path to configuration file");
    println!("    -d, --debug            Enable debug logging");
    println!("    -h, --help             Print this help message");
    println!("    -v, --version          Print version information");
    println!();
    println!("ENVIRONMENT:");
    println!("    JOINTCAL_SIMULATOR     Force the simulator (1 or true)");
    println!("    RUST_LOG               Set logging level (error, warn, info, debug, trace)");
}

fn load_configuration(args: &AppArgs) -> anyhow::Result<Config> {
    let mut config = match &args.config_path {
        Some(path) => jointcal::load_config_from(path)?,
        None => jointcal::load_config(),
    };

    if args.simulate {
        config.simulator.enabled = true;
    }
    if args.auto_respond {
        config.prompts.auto_respond = true;
    }
    if let (Some(robot_id), Some(host)) = (&args.robot_id, &args.host) {
        config.device.hosts.insert(robot_id.clone(), host.clone());
    }
    if config.simulator.enabled {
        if let Some(robot_id) = &args.robot_id {
            if !config.simulator.robots.contains(robot_id) {
                config.simulator.robots.push(robot_id.clone());
            }
        }
    }
    Ok(config)
}

async fn build_services(config: Config, events: Arc<EventBus>, robot_id: &str) -> anyhow::Result<Services> {
    if config.simulator.enabled {
        info!("Using the simulator for {}", robot_id);
        return Ok(Services::simulated(config, events)?);
    }

    let link = Arc::new(SshDeviceLink::new(config.device.clone()));
    link.connect(robot_id)
        .await
        .with_context(|| format!("Failed to connect to {}", robot_id))?;
    Ok(Services::ssh(config, link, events))
}

/// Print events for the robot until the bus closes
async fn print_events(mut events: RobotSubscription, json: bool) {
    while let Some(event) = events.recv().await {
        if json {
            match event.event.to_json() {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to encode event: {}", e),
            }
            continue;
        }
        match &event.event {
            CalibrationEvent::CalibrationLog { log, .. } => println!("{}", log),
            CalibrationEvent::CalibrationStatus {
                user_prompt: Some(prompt),
                status: SessionStatus::WaitingForUser,
                ..
            } => println!(">>> {} (type a response, or Enter for the default)", prompt),
            other => debug!("event: {}", other.type_name()),
        }
    }
}

/// Forward stdin lines until it closes
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Walk the checklist and configuration steps, then start the run
async fn prepare_zero_point(session: &SessionHandle) -> anyhow::Result<bool> {
    let tools = session.snapshot().tools;
    for (index, tool) in tools.iter().enumerate() {
        println!("[tool {}/{}] {}: {}", index + 1, tools.len(), tool.name, tool.description);
        session.confirm_tool(index).await?;
    }

    let snapshot = session
        .wait_until(
            |s| {
                s.status.is_terminal()
                    || s.step == Some(CalibrationStep::InitializeZero)
                    || (s.step == Some(CalibrationStep::ReadConfig) && s.step_progress.config_loaded)
            },
            READ_CONFIG_TIMEOUT,
        )
        .await?;
    if snapshot.status.is_terminal() {
        return Ok(false);
    }
    for warning in &snapshot.warnings {
        println!("warning: {}", warning);
    }
    if snapshot.step == Some(CalibrationStep::ReadConfig) {
        session.confirm_config(Vec::new()).await?;
    }

    session.begin_execution().await?;
    Ok(true)
}

/// Route operator input and follow the session until it ends
async fn follow_session(
    registry: &SessionRegistry,
    session: &SessionHandle,
    auto_confirm: bool,
) -> anyhow::Result<SessionStatus> {
    let mut input = spawn_stdin_reader();
    let mut input_open = true;
    let mut snapshots = session.watch();
    let mut verified = false;

    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        if snapshot.status.is_terminal() {
            return Ok(snapshot.status);
        }

        if snapshot.step == Some(CalibrationStep::RemoveTools) && !verified {
            verified = true;
            match session.run_verification().await {
                Ok(output) if !output.is_empty() => info!("Verification passed"),
                Ok(_) => {}
                Err(e) => warn!("Verification failed: {}", e),
            }
            if auto_confirm {
                session.confirm_tools_removed().await?;
            } else {
                println!("Remove the calibration tools, then press Enter");
            }
            continue;
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling session {}", session.session_id());
                registry.cancel(session.session_id())?;
            }
            line = input.recv(), if input_open => match line {
                Some(line) if session.is_waiting_for_response() => {
                    session.submit_response(line.trim());
                }
                Some(_) if snapshot.step == Some(CalibrationStep::RemoveTools) => {
                    session.confirm_tools_removed().await?;
                }
                Some(line) => debug!("Ignoring input '{}' with no prompt pending", line),
                None => input_open = false,
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    return Ok(session.snapshot().status);
                }
            }
        }
    }
}

async fn run(args: AppArgs) -> anyhow::Result<SessionStatus> {
    let robot_id = args.robot_id.clone().context("--robot is required")?;
    let config = load_configuration(&args)?;
    let auto_confirm = config.prompts.auto_respond;

    let events = Arc::new(EventBus::default());
    let printer = tokio::spawn(print_events(events.subscribe_robot(robot_id.clone()), args.json));

    let services = build_services(config, Arc::clone(&events), &robot_id).await?;
    let registry = SessionRegistry::new(services);

    let session = if args.head_hand {
        registry.start_head_hand(&robot_id).await?
    } else {
        let scope = args.scope.unwrap_or(ZeroPointScope::FullBody);
        registry.start_zero_point(&robot_id, scope).await?
    };
    info!("Session {} started on {}", session.session_id(), robot_id);

    let status = if args.head_hand || prepare_zero_point(&session).await? {
        follow_session(&registry, &session, auto_confirm).await?
    } else {
        session.snapshot().status
    };

    let summary = session.summary();
    println!(
        "{} slaves, {} readings, verdict {:?}",
        summary.summary.total_slaves, summary.summary.successful_readings, summary.summary.verdict
    );
    if let Some(message) = session.snapshot().error_message {
        println!("error: {}", message);
    }

    registry.shutdown().await;
    printer.abort();
    Ok(status)
}

#[tokio::main]
async fn main() {
    let args = match AppArgs::parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Failed to parse arguments: {}", e);
            print_help();
            process::exit(2);
        }
    };

    let log_level = if args.debug { "debug" } else { "info" };
    let env_filter = env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from(env_filter))
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match run(args).await {
        Ok(SessionStatus::Success) => info!("Calibration finished"),
        Ok(status) => {
            error!("Calibration ended {}", status);
            process::exit(1);
        }
        Err(e) => {
            match e.downcast_ref::<jointcal::Error>() {
                Some(error) => eprintln!("{}", jointcal::handle_startup_error(error)),
                None => eprintln!("{:#}", e),
            }
            process::exit(1);
        }
    }
}
