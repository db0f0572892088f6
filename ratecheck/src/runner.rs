//! Sequential execution of test cases.
//!
//! Each case runs inside its own [`CaseScope`]; the scope is closed on every
//! outcome before the next case starts. A [`CaseError`] fails only its case.
//! A fixture error aborts the whole run.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{Instrument, info, info_span, warn};

use ratecheck_core::config::RatecheckConfig;
use ratecheck_core::error::{CaseError, RatecheckError};
use ratecheck_core::types::{Measurement, PortAssignment, TestCase};

use crate::fixture::Fixture;
use crate::orchestrator::{Orchestrator, client_args, client_uri};
use crate::ports::PortAllocator;
use crate::process::{Role, RoleProcess};
use crate::report::{CaseOutcome, CaseReport, RunReport};
use crate::scanner::{SentinelScanner, trigger};
use crate::scope::CaseScope;
use crate::validator::DurationValidator;

/// A failed case, with the measurement if the transfer completed.
#[derive(Debug)]
struct CaseFailure {
    error: CaseError,
    measurement: Option<Measurement>,
}

impl From<CaseError> for CaseFailure {
    fn from(error: CaseError) -> Self {
        Self {
            error,
            measurement: None,
        }
    }
}

/// About 30 years; stands in for deadlines that overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

pub struct Harness {
    config: RatecheckConfig,
    ports: PortAllocator,
    validator: DurationValidator,
}

impl Harness {
    pub fn new(config: RatecheckConfig) -> Self {
        let ports = PortAllocator::new(config.ports.clone());
        let validator = DurationValidator::new(&config.validation);
        Self {
            config,
            ports,
            validator,
        }
    }

    pub fn config(&self) -> &RatecheckConfig {
        &self.config
    }

    /// Run every case in order.
    pub async fn run_all(&self, cases: &[TestCase]) -> Result<RunReport, RatecheckError> {
        self.run_until(cases, std::future::pending()).await
    }

    /// Run every case in order, stopping early when `shutdown` resolves.
    ///
    /// The case in flight is abandoned; its scope is dropped, which kills its
    /// processes and removes its fixture.
    pub async fn run_until<F>(
        &self,
        cases: &[TestCase],
        shutdown: F,
    ) -> Result<RunReport, RatecheckError>
    where
        F: Future<Output = ()>,
    {
        self.run_observed(cases, shutdown, |_| {}).await
    }

    /// Like [`run_until`](Self::run_until), calling `on_case` with each case
    /// report as soon as that case has been torn down.
    pub async fn run_observed<F, O>(
        &self,
        cases: &[TestCase],
        shutdown: F,
        mut on_case: O,
    ) -> Result<RunReport, RatecheckError>
    where
        F: Future<Output = ()>,
        O: FnMut(&CaseReport),
    {
        tokio::pin!(shutdown);
        let mut report = RunReport::default();
        let cooldown = Duration::from_millis(self.config.timing.cooldown_ms);

        for (index, case) in cases.iter().enumerate() {
            if index > 0 {
                if self.ports.may_collide(&cases[index - 1], case) {
                    warn!(
                        previous = %cases[index - 1],
                        next = %case,
                        cooldown_ms = self.config.timing.cooldown_ms,
                        "consecutive cases share derived ports"
                    );
                }
                if !cooldown.is_zero() {
                    tokio::time::sleep(cooldown).await;
                }
            }

            let span = info_span!("case", index, case = %case);
            tokio::select! {
                result = self.run_case(index, case).instrument(span) => {
                    let case_report = result?;
                    on_case(&case_report);
                    report.push(case_report);
                }
                () = &mut shutdown => {
                    warn!(index, "run interrupted, abandoning current case");
                    report.interrupted = true;
                    break;
                }
            }
        }

        info!(
            passed = report.passed,
            failed = report.failed,
            total = report.total(),
            "run finished"
        );
        Ok(report)
    }

    async fn run_case(&self, index: usize, case: &TestCase) -> Result<CaseReport, RatecheckError> {
        info!("testing {case}");
        let deadline = deadline_after(self.config.timing.case_timeout());

        let fixture =
            Fixture::provision(&self.config.general.work_dir, case, &self.config.identity).await?;
        let mut scope = CaseScope::new(fixture);
        let mut ports = None;

        let result = self.execute(&mut scope, case, &mut ports, deadline).await;
        scope.close().await;

        let outcome = match result {
            Ok(measurement) => {
                info!(elapsed_ms = measurement.elapsed.as_millis() as u64, "case passed");
                CaseOutcome::Passed { measurement }
            }
            Err(failure) => {
                warn!(kind = failure.error.kind(), error = %failure.error, "case failed");
                CaseOutcome::failed(&failure.error, failure.measurement)
            }
        };
        Ok(CaseReport::new(index, case, ports, outcome))
    }

    async fn execute(
        &self,
        scope: &mut CaseScope,
        case: &TestCase,
        ports_out: &mut Option<PortAssignment>,
        deadline: Instant,
    ) -> Result<Measurement, CaseFailure> {
        let ports = self.ports.allocate(case)?;
        *ports_out = Some(ports);

        Orchestrator::new(&self.config)
            .start_services(scope, case, ports)
            .await?;

        let identity = &self.config.identity;
        let uri = client_uri(&identity.user, &identity.host, ports.entrypoint, &identity.room);
        let command_line = format!(
            "{} {}\n",
            self.config.protocol.command,
            scope.fixture().payload_name()
        );

        let client = RoleProcess::spawn_interactive(
            Role::Client,
            &self.config.binaries.client,
            client_args(&identity.private_key, &uri),
        )?;
        info!(pid = ?client.pid(), uri = %uri, "client started");
        let client = scope.attach(client);
        let mut lines = client.take_lines().ok_or_else(|| CaseError::Spawn {
            role: Role::Client.to_string(),
            reason: "output stream unavailable".to_owned(),
        })?;

        trigger(
            client,
            &mut lines,
            &command_line,
            Duration::from_millis(self.config.timing.client_settle_ms),
        )
        .await?;

        let mut scanner = SentinelScanner::new(self.config.protocol.sentinel.as_str());
        let scanned = tokio::time::timeout_at(deadline, scanner.run(client, &mut lines)).await;
        let window = match scanned {
            Ok(result) => result?,
            Err(_) => {
                return Err(CaseError::Timeout {
                    after: self.config.timing.case_timeout(),
                    output: scanner.transcript(),
                }
                .into());
            }
        };

        let measurement = self.validator.measure(case, window);
        self.validator
            .check(&measurement)
            .map_err(|error| CaseFailure {
                error,
                measurement: Some(measurement),
            })?;
        Ok(measurement)
    }
}
