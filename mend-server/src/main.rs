use clap::{builder::PossibleValuesParser, Arg, ArgAction, ArgMatches, Command};
use mend_core::event_log::EventLog;
use mend_core::report::render_text;
use mend_core::source::{incident_channel, SimulatedSource};
use mend_core::{IncidentCategory, RunOutcome, Settings, Workflow};
use mend_server::dashboard::{dashboard_router, DemoState};
use mend_server::incidents::incidents_router;
use mend_server::{logging, webhook};
use std::process::ExitCode;
use std::time::Duration;

const DEMO_INCIDENT_ID: &str = "inc-demo0001";

fn cli() -> Command {
    Command::new("mend")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Closed-loop incident response")
        .subcommand_required(true)
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("run")
                .about("Run one cycle against a simulated incident")
                .arg(
                    Arg::new("incident-type")
                        .long("incident-type")
                        .default_value("latency_spike")
                        .value_parser(PossibleValuesParser::new(
                            IncidentCategory::ALL.map(|c| c.as_str()),
                        ))
                        .help("Category of the simulated incident"),
                )
                .arg(
                    Arg::new("incident-id")
                        .long("incident-id")
                        .help("Incident id (generated when omitted)"),
                )
                .arg(
                    Arg::new("subject")
                        .long("subject")
                        .help("Affected service"),
                ),
        )
        .subcommand(
            Command::new("demo")
                .about("Run the latency-spike scenario against an in-process dashboard"),
        )
        .subcommand(
            Command::new("serve")
                .about("Accept alert webhooks and remediate them")
                .arg(
                    Arg::new("listen")
                        .long("listen")
                        .help("Listen address (default MEND_LISTEN or 0.0.0.0:8080)"),
                ),
        )
}

fn main() -> ExitCode {
    let matches = cli().get_matches();
    logging::init(matches.get_flag("json"));

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match matches.subcommand() {
        Some(("run", args)) => run(&settings, args),
        Some(("demo", _)) => demo(settings),
        Some(("serve", args)) => serve(&settings, args),
        _ => ExitCode::FAILURE,
    }
}

fn run(settings: &Settings, args: &ArgMatches) -> ExitCode {
    let category = args
        .get_one::<String>("incident-type")
        .and_then(|t| IncidentCategory::parse(t))
        .unwrap_or(IncidentCategory::LatencySpike);

    let mut source = SimulatedSource::new(category);
    if let Some(id) = args.get_one::<String>("incident-id") {
        source = source.with_id(id.clone());
    }
    if let Some(subject) = args.get_one::<String>("subject") {
        source = source.with_subject(subject.clone());
    }

    run_single(settings, source)
}

fn demo(mut settings: Settings) -> ExitCode {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            tracing::error!(error = %err, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    let listener = match runtime.block_on(tokio::net::TcpListener::bind("127.0.0.1:0")) {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, "failed to bind demo dashboard");
            return ExitCode::FAILURE;
        }
    };
    let addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(err) => {
            tracing::error!(error = %err, "demo dashboard has no local address");
            return ExitCode::FAILURE;
        }
    };
    runtime.spawn(async move {
        if let Err(err) = axum::serve(listener, dashboard_router(DemoState::default())).await {
            tracing::error!(error = %err, "demo dashboard stopped");
        }
    });

    let base = format!("http://{addr}");
    tracing::info!(%base, "demo dashboard started");
    settings.llm = None;
    settings.slack_webhook_url = None;
    settings.health_url = Some(format!("{base}/api/health"));
    settings.dashboard_url = Some(base);
    settings.workflow.poll_interval = Duration::from_secs(1);
    settings.workflow.verification_timeout = Duration::from_secs(30);

    let source = SimulatedSource::new(IncidentCategory::LatencySpike).with_id(DEMO_INCIDENT_ID);
    run_single(&settings, source)
}

fn run_single(settings: &Settings, source: SimulatedSource) -> ExitCode {
    let mut workflow = match Workflow::from_settings(settings, source) {
        Ok(workflow) => workflow,
        Err(err) => {
            tracing::error!(error = %err, "failed to assemble workflow");
            return ExitCode::FAILURE;
        }
    };

    let outcome = workflow.run_once();
    match &outcome {
        RunOutcome::NoIncident => println!("no incident to process"),
        _ => {
            if let Some(report) = outcome.report() {
                println!("{}", render_text(report));
            }
        }
    }

    if outcome.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn serve(settings: &Settings, args: &ArgMatches) -> ExitCode {
    let listen = args
        .get_one::<String>("listen")
        .cloned()
        .unwrap_or_else(|| settings.listen.clone());

    let (tx, source) = incident_channel();
    let mut workflow = match Workflow::from_settings(settings, source) {
        Ok(workflow) => workflow,
        Err(err) => {
            tracing::error!(error = %err, "failed to assemble workflow");
            return ExitCode::FAILURE;
        }
    };

    let orchestrator = std::thread::spawn(move || {
        let tally = workflow.serve();
        tracing::info!(
            succeeded = tally.succeeded,
            failed = tally.failed,
            "orchestrator stopped"
        );
    });

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            tracing::error!(error = %err, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    let mut app = webhook::webhook_router(tx).merge(dashboard_router(DemoState::default()));
    match EventLog::open(&settings.event_db) {
        Ok(log) => app = app.merge(incidents_router(log)),
        Err(err) => tracing::warn!(error = %err, "event log unavailable; /api/incidents disabled"),
    }

    let served = runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&listen).await?;
        tracing::info!(%listen, "mend listening");
        axum::serve(listener, app).await
    });

    // The router owned the only sender, so the orchestrator drains and exits.
    if orchestrator.join().is_err() {
        tracing::error!("orchestrator thread panicked");
        return ExitCode::FAILURE;
    }

    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "server stopped");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_flags() {
        let matches = cli()
            .try_get_matches_from([
                "mend",
                "run",
                "--incident-type",
                "crash_loop",
                "--incident-id",
                "inc-7",
                "--json",
            ])
            .expect("matches");
        assert!(matches.get_flag("json"));
        let (name, args) = matches.subcommand().expect("subcommand");
        assert_eq!(name, "run");
        assert_eq!(
            args.get_one::<String>("incident-type").map(String::as_str),
            Some("crash_loop")
        );
        assert_eq!(args.get_one::<String>("incident-id").map(String::as_str), Some("inc-7"));
    }

    #[test]
    fn cli_rejects_unknown_incident_type() {
        assert!(cli()
            .try_get_matches_from(["mend", "run", "--incident-type", "disk_full"])
            .is_err());
        assert!(cli().try_get_matches_from(["mend"]).is_err());
    }

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }
}
