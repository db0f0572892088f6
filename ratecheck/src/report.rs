//! Per-case and per-run results.

use std::io::Write;

use serde::Serialize;

use ratecheck_core::error::CaseError;
use ratecheck_core::types::{Measurement, PortAssignment, TestCase};

use crate::output::Render;

/// Transcript lines shown in text output for a failed case.
const TEXT_OUTPUT_LINES: usize = 20;

#[derive(Debug, Serialize)]
pub struct CaseReport {
    pub index: usize,
    pub name: String,
    pub file_size_bytes: u64,
    pub rate_limit: String,
    pub expected_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortAssignment>,
    #[serde(flatten)]
    pub outcome: CaseOutcome,
}

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CaseOutcome {
    Passed {
        measurement: Measurement,
    },
    Failed {
        kind: String,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        measurement: Option<Measurement>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        output: Vec<String>,
    },
}

impl CaseOutcome {
    pub fn failed(error: &CaseError, measurement: Option<Measurement>) -> Self {
        Self::Failed {
            kind: error.kind().to_owned(),
            reason: error.to_string(),
            measurement,
            output: error.captured_output().to_vec(),
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }

    fn measurement(&self) -> Option<&Measurement> {
        match self {
            Self::Passed { measurement } => Some(measurement),
            Self::Failed { measurement, .. } => measurement.as_ref(),
        }
    }
}

impl CaseReport {
    pub fn new(
        index: usize,
        case: &TestCase,
        ports: Option<PortAssignment>,
        outcome: CaseOutcome,
    ) -> Self {
        Self {
            index,
            name: case.to_string(),
            file_size_bytes: case.file_size.bytes(),
            rate_limit: case.rate_limit.raw.clone(),
            expected_secs: case.expected_duration.as_secs_f64(),
            ports,
            outcome,
        }
    }
}

/// Results of one `run` invocation, in execution order.
#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub cases: Vec<CaseReport>,
    pub passed: usize,
    pub failed: usize,
    /// Set when the run stopped early (Ctrl-C).
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub interrupted: bool,
}

impl RunReport {
    pub fn push(&mut self, report: CaseReport) {
        if report.outcome.is_passed() {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.cases.push(report);
    }

    pub fn total(&self) -> usize {
        self.cases.len()
    }

    pub fn all_passed(&self) -> bool {
        !self.interrupted && self.failed == 0 && !self.cases.is_empty()
    }
}

impl Render for CaseReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w)?;
        writeln!(
            w,
            "--- Case {}: {} ---",
            self.index + 1,
            self.name.bold()
        )?;
        if let Some(ports) = self.ports {
            writeln!(
                w,
                "  Ports: entrypoint {} / room {}",
                ports.entrypoint, ports.room
            )?;
        }

        if let Some(m) = self.outcome.measurement() {
            writeln!(
                w,
                "  Transfer took {:.2} seconds (Expected ~{:.2}s, threshold {:.2}s)",
                m.elapsed.as_secs_f64(),
                m.expected.as_secs_f64(),
                m.threshold.as_secs_f64()
            )?;
            writeln!(w, "  Average speed: {:.2} KB/s", m.throughput_bps / 1024.0)?;
        }

        match &self.outcome {
            CaseOutcome::Passed { .. } => {
                writeln!(w, "  {} Rate limiting works!", "SUCCESS:".green().bold())?;
            }
            CaseOutcome::Failed { reason, output, .. } => {
                writeln!(w, "  {} {}", "FAILURE:".red().bold(), reason)?;
                if !output.is_empty() {
                    let skip = output.len().saturating_sub(TEXT_OUTPUT_LINES);
                    writeln!(w, "  Output (last {} lines):", output.len() - skip)?;
                    for line in &output[skip..] {
                        writeln!(w, "    {}", line.dimmed())?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Render for RunReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        for case in &self.cases {
            case.render_text(w)?;
        }
        self.summary().render_text(w)
    }
}

/// Closing totals of a run, printed after cases that were already streamed.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
    pub interrupted: bool,
    pub all_passed: bool,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            passed: self.passed,
            failed: self.failed,
            total: self.total(),
            interrupted: self.interrupted,
            all_passed: self.all_passed(),
        }
    }
}

impl Render for RunSummary {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w)?;
        writeln!(
            w,
            "{} passed, {} failed, {} total",
            self.passed.to_string().green(),
            self.failed.to_string().red(),
            self.total
        )?;
        if self.interrupted {
            writeln!(w, "{}", "run interrupted".yellow())?;
        }
        if self.all_passed {
            writeln!(w, "{}", "ALL TESTS PASSED".green().bold())?;
        } else {
            writeln!(w, "{}", "SOME TESTS FAILED".red().bold())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn measurement(elapsed: f64) -> Measurement {
        Measurement {
            elapsed: Duration::from_secs_f64(elapsed),
            expected: Duration::from_secs(5),
            threshold: Duration::from_secs(4),
            throughput_bps: 51_200.0 / elapsed,
        }
    }

    fn render(report: &impl Render) -> String {
        colored::control::set_override(false);
        let mut buffer = Vec::new();
        report
            .render_text(&mut buffer)
            .expect("text rendering should succeed");
        String::from_utf8(buffer).expect("valid UTF-8")
    }

    #[test]
    fn passed_case_renders_timing_and_speed() {
        let case = TestCase::parse_spec("50KB:10KB:5").unwrap();
        let report = CaseReport::new(
            0,
            &case,
            None,
            CaseOutcome::Passed {
                measurement: measurement(5.12),
            },
        );
        let text = render(&report);
        assert!(text.contains("Transfer took 5.12 seconds"), "{text}");
        assert!(text.contains("Average speed: 9.77 KB/s"), "{text}");
        assert!(text.contains("SUCCESS: Rate limiting works!"), "{text}");
    }

    #[test]
    fn failed_case_renders_reason_and_output() {
        let case = TestCase::parse_spec("50KB:10KB:5").unwrap();
        let err = CaseError::TriggerNotDetected {
            output: vec!["no such file".to_owned()],
        };
        let report = CaseReport::new(1, &case, None, CaseOutcome::failed(&err, None));
        let text = render(&report);
        assert!(text.contains("FAILURE: failed to trigger download"), "{text}");
        assert!(text.contains("no such file"), "{text}");
        assert!(!text.contains("Transfer took"), "{text}");
    }

    #[test]
    fn run_summary_lines() {
        let case = TestCase::parse_spec("50KB:10KB:5").unwrap();
        let mut run = RunReport::default();
        assert!(!run.all_passed(), "empty run is not a pass");

        run.push(CaseReport::new(
            0,
            &case,
            None,
            CaseOutcome::Passed {
                measurement: measurement(5.0),
            },
        ));
        assert!(run.all_passed());
        assert!(render(&run).contains("ALL TESTS PASSED"));

        let err = CaseError::RateLimitIneffective {
            elapsed: Duration::from_secs(1),
            expected: Duration::from_secs(5),
            threshold: Duration::from_secs(4),
        };
        run.push(CaseReport::new(
            1,
            &case,
            None,
            CaseOutcome::failed(&err, Some(measurement(1.0))),
        ));
        assert!(!run.all_passed());
        assert_eq!((run.passed, run.failed), (1, 1));
        assert!(render(&run).contains("SOME TESTS FAILED"));
    }

    #[test]
    fn summary_omits_case_sections() {
        let case = TestCase::parse_spec("50KB:10KB:5").unwrap();
        let mut run = RunReport::default();
        run.push(CaseReport::new(
            0,
            &case,
            None,
            CaseOutcome::Passed {
                measurement: measurement(5.0),
            },
        ));
        run.interrupted = true;

        let full = render(&run);
        let summary = render(&run.summary());
        assert!(full.contains("--- Case 1"), "{full}");
        assert!(full.ends_with(&summary), "{full}");
        assert!(!summary.contains("--- Case"), "{summary}");
        assert!(summary.contains("1 passed, 0 failed, 1 total"), "{summary}");
        assert!(summary.contains("run interrupted"), "{summary}");
        assert!(summary.contains("SOME TESTS FAILED"), "{summary}");
    }

    #[test]
    fn json_shape_is_tagged() {
        let case = TestCase::parse_spec("150KB:30KB").unwrap();
        let report = CaseReport::new(
            0,
            &case,
            Some(PortAssignment {
                entrypoint: 40000,
                room: 40001,
            }),
            CaseOutcome::Passed {
                measurement: measurement(5.0),
            },
        );
        let value = serde_json::to_value(&report).expect("json serialization should succeed");
        assert_eq!(value["result"], "passed");
        assert_eq!(value["rate_limit"], "30KB");
        assert_eq!(value["ports"]["room"], 40001);
        assert_eq!(value["measurement"]["elapsed"], 5.0);
    }
}
