//! One pipeline run: detect, record, diagnose, plan, execute, verify, report.
//!
//! Apart from the no-incident case, every run ends with exactly one report built
//! and handed to the publisher, whatever stage it stopped at. No collaborator
//! error escapes [`Workflow::run_once`].

use crate::config::{Settings, WorkflowConfig};
use crate::context::{ContextProvider, IncidentContext, StaticContext};
use crate::diagnosis::Diagnosis;
use crate::error::ConfigError;
use crate::event_log::{Event, EventLog, EventType, NullRecorder, Recorder};
use crate::executor::{ActionExecutor, DashboardExecutor, LoggingExecutor};
use crate::incident::Incident;
use crate::planner;
use crate::reasoning::{DiagnosisRetry, LlmOracle, ReasoningOracle, StubOracle};
use crate::recovery::{
    Clock, HealthPoller, HttpHealthOracle, RecoveryOutcome, RecoveryStatus, RecoveryVerifier,
    SystemClock, UnverifiedRecovery,
};
use crate::report::{build_report, LogPublisher, PostIncidentReport, Publisher, SlackPublisher};
use crate::source::IncidentSource;
use std::sync::Arc;

pub const ESCALATED_LINE: &str = "escalated: no automated action taken";
pub const EXECUTION_FAILED_LINE: &str = "execution failed: remediation actions did not complete";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Start,
    Detected,
    Recorded,
    Diagnosed,
    Planned,
    Escalated,
    Executed,
    Verified,
    Reported,
}

/// How a run ended. Every variant except `NoIncident` carries the report it built.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    NoIncident,
    Escalated(PostIncidentReport),
    ExecutionFailed(PostIncidentReport),
    Completed(PostIncidentReport),
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, RunOutcome::Completed(r) if r.recovery_status == RecoveryStatus::Recovered)
    }

    pub fn incident_id(&self) -> Option<&str> {
        self.report().map(|r| r.incident_id.as_str())
    }

    pub fn report(&self) -> Option<&PostIncidentReport> {
        match self {
            RunOutcome::NoIncident => None,
            RunOutcome::Escalated(r) | RunOutcome::ExecutionFailed(r) | RunOutcome::Completed(r) => {
                Some(r)
            }
        }
    }

    /// Last stage reached before reporting.
    pub fn stage(&self) -> Stage {
        match self {
            RunOutcome::NoIncident => Stage::Start,
            RunOutcome::Escalated(_) => Stage::Escalated,
            RunOutcome::ExecutionFailed(_) => Stage::Planned,
            RunOutcome::Completed(_) => Stage::Verified,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunTally {
    pub succeeded: usize,
    pub failed: usize,
}

pub struct Workflow {
    config: WorkflowConfig,
    source: Box<dyn IncidentSource>,
    recorder: Box<dyn Recorder>,
    context: Box<dyn ContextProvider>,
    diagnoser: DiagnosisRetry<Box<dyn ReasoningOracle>>,
    executor: Box<dyn ActionExecutor>,
    verifier: Box<dyn RecoveryVerifier>,
    publisher: Box<dyn Publisher>,
    clock: Arc<dyn Clock>,
}

impl Workflow {
    pub fn builder(config: WorkflowConfig, source: impl IncidentSource + 'static) -> WorkflowBuilder {
        WorkflowBuilder {
            config,
            source: Box::new(source),
            recorder: None,
            context: None,
            oracle: None,
            executor: None,
            verifier: None,
            publisher: None,
            clock: None,
        }
    }

    /// Picks the real or stub collaborator for each seam from what `settings` says is reachable.
    pub fn from_settings(
        settings: &Settings,
        source: impl IncidentSource + 'static,
    ) -> Result<Workflow, ConfigError> {
        settings.workflow.validate()?;
        let mut builder = Workflow::builder(settings.workflow.clone(), source);

        match EventLog::open(&settings.event_db) {
            Ok(log) => builder = builder.recorder(log),
            Err(err) => tracing::warn!(
                path = %settings.event_db.display(),
                error = %err,
                "event log unavailable; incidents will not be persisted"
            ),
        }

        if let Some(llm) = &settings.llm {
            let oracle = LlmOracle::new(llm.clone()).map_err(|e| ConfigError::Setup {
                component: "llm oracle",
                reason: e.to_string(),
            })?;
            builder = builder.oracle(oracle);
        }

        if let Some(url) = &settings.dashboard_url {
            let exec = DashboardExecutor::new(url.as_str())
                .map_err(|e| ConfigError::invalid("MEND_DASHBOARD_URL", e.to_string()))?;
            builder = builder.executor(exec);
        }

        if let Some(url) = &settings.health_url {
            let oracle = HttpHealthOracle::new(url.as_str())
                .map_err(|e| ConfigError::invalid("MEND_HEALTH_URL", e.to_string()))?;
            builder = builder.verifier(HealthPoller::new(oracle, settings.workflow.poll_interval));
        }

        if let Some(url) = &settings.slack_webhook_url {
            let slack = SlackPublisher::new(url.as_str())
                .map_err(|e| ConfigError::invalid("MEND_SLACK_WEBHOOK_URL", e.to_string()))?;
            builder = builder.publisher(slack);
        }

        Ok(builder.build())
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn run(&mut self) -> bool {
        self.run_once().succeeded()
    }

    /// Runs until the source is exhausted.
    pub fn serve(&mut self) -> RunTally {
        let mut tally = RunTally::default();
        loop {
            match self.run_once() {
                RunOutcome::NoIncident => return tally,
                outcome if outcome.succeeded() => tally.succeeded += 1,
                _ => tally.failed += 1,
            }
        }
    }

    pub fn run_once(&mut self) -> RunOutcome {
        let Some(incident) = self.source.next() else {
            tracing::info!(stage = ?Stage::Start, "no incident available");
            return RunOutcome::NoIncident;
        };

        let span = tracing::info_span!(
            "run",
            incident_id = %incident.id,
            subject = %incident.subject,
            category = %incident.category
        );
        let _guard = span.enter();
        reached(Stage::Detected);

        if let Err(err) = self.recorder.record(&incident) {
            tracing::warn!(error = %err, "failed to record incident; continuing");
        }
        reached(Stage::Recorded);

        let context = self.context.gather(&incident).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "incident context unavailable; diagnosing without it");
            IncidentContext::default()
        });
        let diagnosis = self.diagnoser.diagnose(&incident, &context);
        self.note(
            Event::new(
                &incident.id,
                EventType::DiagnosisProduced,
                format!("recommended {}", diagnosis.recommended_action),
            )
            .with_details(serde_json::to_value(&diagnosis).unwrap_or_default()),
        );
        reached(Stage::Diagnosed);

        let plan = planner::plan(&diagnosis);
        reached(Stage::Planned);

        if plan.is_empty() {
            reached(Stage::Escalated);
            self.note(Event::new(&incident.id, EventType::Escalated, "no automated action"));
            let report = self.report(
                &incident,
                &diagnosis,
                RecoveryOutcome::unknown(),
                &[ESCALATED_LINE.to_string()],
            );
            return RunOutcome::Escalated(report);
        }

        self.note(
            Event::new(
                &incident.id,
                EventType::PlanSelected,
                format!("{} steps for {}", plan.len(), diagnosis.recommended_action),
            )
            .with_details(serde_json::to_value(&plan).unwrap_or_default()),
        );

        let start = self.clock.now();
        if !self.executor.execute(&plan, &incident.subject) {
            tracing::warn!("remediation actions failed");
            self.note(Event::new(&incident.id, EventType::ActionsFailed, "remediation failed"));
            let report = self.report(
                &incident,
                &diagnosis,
                RecoveryOutcome::not_recovered(std::time::Duration::ZERO),
                &[EXECUTION_FAILED_LINE.to_string()],
            );
            return RunOutcome::ExecutionFailed(report);
        }
        self.note(Event::new(&incident.id, EventType::ActionsExecuted, "remediation executed"));
        reached(Stage::Executed);

        let timeout = self.config.verification_timeout;
        let outcome = self
            .verifier
            .verify(&incident.id, &incident.subject, timeout, start)
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "recovery verification failed; assuming not recovered");
                RecoveryOutcome::not_recovered(timeout)
            });
        let event_type = if outcome.status == RecoveryStatus::Recovered {
            EventType::RecoveryVerified
        } else {
            EventType::RecoveryFailed
        };
        self.note(Event::new(
            &incident.id,
            event_type,
            format!("{} after {:.1}s", outcome.status, outcome.elapsed_secs()),
        ));
        reached(Stage::Verified);

        let report = self.report(&incident, &diagnosis, outcome, &[]);
        RunOutcome::Completed(report)
    }

    /// Builds the run's report and makes the single publish attempt.
    fn report(
        &self,
        incident: &Incident,
        diagnosis: &Diagnosis,
        outcome: RecoveryOutcome,
        extra_timeline: &[String],
    ) -> PostIncidentReport {
        let report = build_report(
            incident,
            diagnosis,
            outcome.elapsed_secs(),
            outcome.status,
            extra_timeline,
        );

        match self.publisher.publish(&report) {
            Ok(true) => {
                self.note(Event::new(&incident.id, EventType::ReportPublished, "report delivered"));
            }
            Ok(false) => tracing::info!("report not delivered to any channel"),
            Err(err) => tracing::warn!(error = %err, "failed to publish report"),
        }
        reached(Stage::Reported);
        report
    }

    fn note(&self, event: Event) {
        if let Err(err) = self.recorder.append(&event) {
            tracing::warn!(error = %err, event_type = ?event.event_type, "failed to append event");
        }
    }
}

fn reached(stage: Stage) {
    tracing::info!(stage = ?stage, "stage reached");
}

pub struct WorkflowBuilder {
    config: WorkflowConfig,
    source: Box<dyn IncidentSource>,
    recorder: Option<Box<dyn Recorder>>,
    context: Option<Box<dyn ContextProvider>>,
    oracle: Option<Box<dyn ReasoningOracle>>,
    executor: Option<Box<dyn ActionExecutor>>,
    verifier: Option<Box<dyn RecoveryVerifier>>,
    publisher: Option<Box<dyn Publisher>>,
    clock: Option<Arc<dyn Clock>>,
}

impl WorkflowBuilder {
    pub fn recorder(mut self, recorder: impl Recorder + 'static) -> Self {
        self.recorder = Some(Box::new(recorder));
        self
    }

    pub fn context(mut self, context: impl ContextProvider + 'static) -> Self {
        self.context = Some(Box::new(context));
        self
    }

    pub fn oracle(mut self, oracle: impl ReasoningOracle + 'static) -> Self {
        self.oracle = Some(Box::new(oracle));
        self
    }

    pub fn executor(mut self, executor: impl ActionExecutor + 'static) -> Self {
        self.executor = Some(Box::new(executor));
        self
    }

    pub fn verifier(mut self, verifier: impl RecoveryVerifier + 'static) -> Self {
        self.verifier = Some(Box::new(verifier));
        self
    }

    pub fn publisher(mut self, publisher: impl Publisher + 'static) -> Self {
        self.publisher = Some(Box::new(publisher));
        self
    }

    /// Clock used to stamp the remediation start. Share it with the verifier.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Workflow {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let verifier = self.verifier.unwrap_or_else(|| {
            Box::new(UnverifiedRecovery::with_clock(
                self.config.nominal_recovery,
                self.config.unverified_settle,
                clock.clone(),
            ))
        });
        let oracle = self.oracle.unwrap_or_else(|| Box::new(StubOracle));

        Workflow {
            diagnoser: DiagnosisRetry::new(oracle, self.config.diagnosis_retries),
            config: self.config,
            source: self.source,
            recorder: self.recorder.unwrap_or_else(|| Box::new(NullRecorder)),
            context: self.context.unwrap_or_else(|| Box::new(StaticContext)),
            executor: self.executor.unwrap_or_else(|| Box::new(LoggingExecutor)),
            verifier,
            publisher: self.publisher.unwrap_or_else(|| Box::new(LogPublisher)),
            clock,
        }
    }
}
