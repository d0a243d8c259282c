//! JSON output format for reports and event logs

use crate::callback::OwnedEvent;
use crate::script::{ScriptOutcome, StepError};
use crate::stats::{Report, StatTotals};
use serde::{Deserialize, Serialize};

/// A single intercepted call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonEvent {
    /// Operation name (e.g. "xRead")
    pub operation: String,
    pub ticks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub int_arg: i32,
    pub int64_arg: i64,
}

impl From<&OwnedEvent> for JsonEvent {
    fn from(event: &OwnedEvent) -> Self {
        Self {
            operation: event.kind.name().to_string(),
            ticks: event.elapsed_ticks,
            subject: event.subject.clone(),
            int_arg: event.int_arg,
            int64_arg: event.int64_arg,
        }
    }
}

/// One row of a wrapper report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonOperationStat {
    pub id: i32,
    pub operation: String,
    pub calls: u64,
    pub ticks: u64,
    pub errors: u64,
}

/// Counters for one wrapper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonReport {
    pub vfs: String,
    pub clock: String,
    pub operations: Vec<JsonOperationStat>,
    pub total_calls: u64,
    pub total_ticks: u64,
    pub total_errors: u64,
}

impl From<&Report> for JsonReport {
    fn from(report: &Report) -> Self {
        let StatTotals {
            total_calls,
            total_ticks,
            total_errors,
        } = report.totals();
        Self {
            vfs: report.vfs.clone(),
            clock: report.clock.as_str().to_string(),
            operations: report
                .entries
                .iter()
                .map(|stat| JsonOperationStat {
                    id: stat.id(),
                    operation: stat.name.to_string(),
                    calls: stat.calls,
                    ticks: stat.ticks,
                    errors: stat.errors,
                })
                .collect(),
            total_calls,
            total_ticks,
            total_errors,
        }
    }
}

/// A backend error seen by a script step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonStepError {
    pub step: usize,
    pub op: String,
    pub error: String,
    pub code: i32,
}

impl From<&StepError> for JsonStepError {
    fn from(err: &StepError) -> Self {
        Self {
            step: err.step,
            op: err.op.to_string(),
            error: err.error.to_string(),
            code: err.error.code(),
        }
    }
}

/// Complete JSON document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonOutput {
    /// Format version identifier
    pub version: String,
    /// Format name
    pub format: String,
    pub reports: Vec<JsonReport>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub events: Vec<JsonEvent>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<JsonStepError>,
}

impl JsonOutput {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            format: "instvfs-json-v1".to_string(),
            reports: Vec::new(),
            events: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn from_outcome(outcome: &ScriptOutcome) -> Self {
        let mut output = Self::new();
        output.reports = outcome.reports.iter().map(JsonReport::from).collect();
        output.events = outcome.events.iter().map(JsonEvent::from).collect();
        output.errors = outcome.errors.iter().map(JsonStepError::from).collect();
        output
    }

    pub fn add_report(&mut self, report: &Report) {
        self.reports.push(JsonReport::from(report));
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for JsonOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockSource;
    use crate::events::OperationKind;
    use crate::stats::OperationCounters;
    use crate::vfs::VfsError;

    fn report() -> Report {
        let counters = OperationCounters::new();
        counters.record(OperationKind::Read, 40, false);
        counters.record(OperationKind::Read, 20, true);
        Report {
            vfs: "inst".into(),
            clock: ClockSource::Monotonic,
            entries: counters.snapshot(),
        }
    }

    #[test]
    fn test_json_output_header() {
        let output = JsonOutput::new();
        assert_eq!(output.format, "instvfs-json-v1");
        assert!(output.reports.is_empty());
    }

    #[test]
    fn test_report_conversion() {
        let json = JsonReport::from(&report());
        assert_eq!(json.vfs, "inst");
        assert_eq!(json.clock, "monotonic");
        assert_eq!(json.operations.len(), OperationKind::COUNT);
        assert_eq!(json.operations[1].operation, "xRead");
        assert_eq!(json.operations[1].calls, 2);
        assert_eq!((json.total_ticks, json.total_errors), (60, 1));
    }

    #[test]
    fn test_serialization_omits_empty_sections() {
        let mut output = JsonOutput::new();
        output.add_report(&report());
        let text = output.to_json().unwrap();

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["reports"][0]["operations"][1]["operation"], "xRead");
        assert!(value.get("events").is_none());
        assert!(value.get("errors").is_none());
    }

    #[test]
    fn test_outcome_conversion() {
        let outcome = ScriptOutcome {
            reports: vec![report()],
            events: vec![OwnedEvent {
                kind: OperationKind::Write,
                elapsed_ticks: 5,
                subject: Some("test.db".into()),
                int_arg: 4096,
                int64_arg: 0,
            }],
            errors: vec![StepError {
                step: 3,
                op: "read",
                error: VfsError::ShortRead,
            }],
        };

        let output = JsonOutput::from_outcome(&outcome);
        assert_eq!(output.events[0].operation, "xWrite");
        assert_eq!(output.events[0].subject.as_deref(), Some("test.db"));
        assert_eq!(output.errors[0].code, 522);

        let parsed: JsonOutput = serde_json::from_str(&output.to_json().unwrap()).unwrap();
        assert_eq!(parsed.events, output.events);
    }
}
