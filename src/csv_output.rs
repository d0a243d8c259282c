//! CSV output for event logs and counter reports

use crate::callback::OwnedEvent;
use crate::stats::Report;

/// Escape CSV field (handle commas, quotes, newlines)
fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Event log formatter, one row per intercepted call
#[derive(Debug)]
pub struct CsvEventOutput {
    events: Vec<OwnedEvent>,
    include_timing: bool,
}

impl CsvEventOutput {
    pub fn new(include_timing: bool) -> Self {
        Self {
            events: Vec::new(),
            include_timing,
        }
    }

    pub fn add_event(&mut self, event: OwnedEvent) {
        self.events.push(event);
    }

    fn header(&self) -> &'static str {
        if self.include_timing {
            "operation,subject,int_arg,int64_arg,ticks"
        } else {
            "operation,subject,int_arg,int64_arg"
        }
    }

    fn format_event(&self, event: &OwnedEvent) -> String {
        let mut fields = vec![
            event.kind.name().to_string(),
            escape_field(event.subject.as_deref().unwrap_or("")),
            event.int_arg.to_string(),
            event.int64_arg.to_string(),
        ];
        if self.include_timing {
            fields.push(event.elapsed_ticks.to_string());
        }
        fields.join(",")
    }

    pub fn to_csv(&self) -> String {
        let mut output = String::from(self.header());
        output.push('\n');
        for event in &self.events {
            output.push_str(&self.format_event(event));
            output.push('\n');
        }
        output
    }
}

/// Counter report formatter (one row per wrapper and operation)
#[derive(Debug, Default)]
pub struct CsvStatsOutput {
    reports: Vec<Report>,
}

impl CsvStatsOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_report(&mut self, report: Report) {
        self.reports.push(report);
    }

    pub fn to_csv(&self, include_timing: bool) -> String {
        let mut output = String::new();

        if include_timing {
            output.push_str("vfs,id,operation,calls,errors,ticks\n");
        } else {
            output.push_str("vfs,id,operation,calls,errors\n");
        }

        for report in &self.reports {
            let vfs = escape_field(&report.vfs);
            for stat in &report.entries {
                output.push_str(&format!(
                    "{},{},{},{},{}",
                    vfs,
                    stat.id(),
                    stat.name,
                    stat.calls,
                    stat.errors
                ));
                if include_timing {
                    output.push(',');
                    output.push_str(&stat.ticks.to_string());
                }
                output.push('\n');
            }
        }

        output
    }
}
