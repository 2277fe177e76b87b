//! OMP response parsing
//!
//! Only the elements the engine needs are modelled; everything else in a
//! response is ignored. Entries that lack an address or a usable timestamp
//! are logged and skipped.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use scanward_core::{ReportEntry, ResultEntry, TargetEntry, TaskEntry};

/// Timestamp format used by the scanner, parsed on its first 19 characters
const OMP_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

static OBJECT_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([0-9A-F]{2}(?::[0-9A-F]{2}){5})\s+\((\d{1,3}(?:\.\d{1,3}){3})\)\s*$")
        .expect("object name regex should compile")
});

/// Name given to the targets and tasks of one host
pub fn object_name(hardware_id: &str, address: &str) -> String {
    format!("{} ({})", hardware_id, address)
}

/// Split an object name back into `(hardware_id, address)`
pub fn parse_object_name(name: &str) -> Option<(String, String)> {
    let caps = OBJECT_NAME_REGEX.captures(name)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

pub fn parse_omp_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let head = raw.get(..19).unwrap_or(raw);
    NaiveDateTime::parse_from_str(head, OMP_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Status attributes present on every response element
#[derive(Debug, Default, Deserialize)]
pub struct Status {
    #[serde(rename = "@status", default)]
    pub code: String,
    #[serde(rename = "@status_text", default)]
    pub text: String,
    #[serde(rename = "@id", default)]
    pub id: Option<String>,
}

impl Status {
    pub fn is_ok(&self) -> bool {
        self.code.len() == 3 && self.code.starts_with('2')
    }
}

pub fn parse_status(xml: &str) -> Result<Status, quick_xml::DeError> {
    from_str(xml)
}

#[derive(Debug, Deserialize)]
struct ReportsResponse {
    #[serde(rename = "report", default)]
    reports: Vec<OuterReport>,
}

#[derive(Debug, Deserialize)]
struct OuterReport {
    #[serde(rename = "@id")]
    id: String,
    #[serde(default)]
    report: Option<InnerReport>,
}

#[derive(Debug, Deserialize)]
struct InnerReport {
    #[serde(default)]
    results: Option<ResultList>,
}

#[derive(Debug, Deserialize)]
struct ResultsResponse {
    #[serde(rename = "result", default)]
    results: Vec<ResultXml>,
}

#[derive(Debug, Deserialize)]
struct ResultList {
    #[serde(rename = "result", default)]
    results: Vec<ResultXml>,
}

#[derive(Debug, Deserialize)]
struct ResultXml {
    #[serde(default)]
    host: Option<HostXml>,
    #[serde(default)]
    modification_time: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    nvt: Option<NvtXml>,
}

#[derive(Debug, Deserialize)]
struct HostXml {
    #[serde(rename = "$text", default)]
    address: String,
}

#[derive(Debug, Deserialize)]
struct NvtXml {
    #[serde(default)]
    cvss_base: Option<String>,
}

impl ResultXml {
    fn address(&self) -> Option<String> {
        self.host
            .as_ref()
            .map(|h| h.address.trim().to_string())
            .filter(|a| !a.is_empty())
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.modification_time.as_deref().and_then(parse_omp_timestamp)
    }

    /// Score rounded to one decimal; 0 when absent or unparsable
    fn score(&self) -> f64 {
        let raw = self
            .severity
            .as_deref()
            .or_else(|| self.nvt.as_ref().and_then(|n| n.cvss_base.as_deref()));
        raw.and_then(|r| r.trim().parse::<f64>().ok())
            .map(|v| (v * 10.0).round() / 10.0)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Deserialize)]
struct TasksResponse {
    #[serde(rename = "task", default)]
    tasks: Vec<TaskXml>,
}

#[derive(Debug, Deserialize)]
struct TaskXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    target: Option<NamedRef>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TargetsResponse {
    #[serde(rename = "target", default)]
    targets: Vec<TargetXml>,
}

#[derive(Debug, Deserialize)]
struct TargetXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(default)]
    hosts: Option<String>,
}

pub fn parse_reports(xml: &str) -> Result<Vec<ReportEntry>, quick_xml::DeError> {
    let response: ReportsResponse = from_str(xml)?;
    let mut entries = Vec::new();
    for report in response.reports {
        let results = report
            .report
            .and_then(|r| r.results)
            .map(|r| r.results)
            .unwrap_or_default();
        for result in results {
            match (result.address(), result.timestamp()) {
                (Some(address), Some(timestamp)) => entries.push(ReportEntry {
                    address,
                    report: report.id.clone(),
                    timestamp,
                }),
                _ => warn!(report = %report.id, "result without host or timestamp"),
            }
        }
    }
    Ok(entries)
}

/// Tasks whose target name does not carry a hardware id and address are
/// skipped.
pub fn parse_tasks(xml: &str) -> Result<Vec<TaskEntry>, quick_xml::DeError> {
    let response: TasksResponse = from_str(xml)?;
    let mut entries = Vec::new();
    for task in response.tasks {
        let name = task
            .target
            .as_ref()
            .and_then(|t| t.name.as_deref())
            .or(task.name.as_deref())
            .unwrap_or_default();
        let Some((hardware_id, address)) = parse_object_name(name) else {
            warn!(task = %task.id, name = ?name, "unrecognised name");
            continue;
        };
        let running = task.status.as_deref().map(str::trim) == Some("Running");
        entries.push(TaskEntry {
            address,
            hardware_id,
            task: task.id,
            running,
        });
    }
    Ok(entries)
}

pub fn parse_targets(xml: &str) -> Result<Vec<TargetEntry>, quick_xml::DeError> {
    let response: TargetsResponse = from_str(xml)?;
    Ok(response
        .targets
        .into_iter()
        .filter_map(|t| {
            let address = t.hosts.as_deref().map(str::trim).unwrap_or_default().to_string();
            if address.is_empty() {
                debug!(target = %t.id, "target has no hosts");
                return None;
            }
            Some(TargetEntry {
                address,
                target: t.id,
            })
        })
        .collect())
}

/// Results with a score of zero or less are dropped
pub fn parse_results(xml: &str) -> Result<Vec<ResultEntry>, quick_xml::DeError> {
    let response: ResultsResponse = from_str(xml)?;
    Ok(response
        .results
        .iter()
        .filter_map(|r| {
            let severity = r.score();
            if severity <= 0.0 {
                return None;
            }
            Some(ResultEntry {
                address: r.address()?,
                severity,
                timestamp: r.timestamp()?,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORTS: &str = r#"<get_reports_response status="200" status_text="OK">
  <report id="r-1" format_id="f">
    <name>2020-03-01T10:00:00Z</name>
    <report id="r-1">
      <results start="1" max="100">
        <result id="x-1">
          <host>10.0.0.5<asset asset_id="a-1"/></host>
          <modification_time>2020-03-01T12:30:45Z</modification_time>
        </result>
        <result id="x-2">
          <host>10.0.0.6</host>
        </result>
      </results>
    </report>
  </report>
</get_reports_response>"#;

    #[test]
    fn test_reports() {
        let entries = parse_reports(REPORTS).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].address, "10.0.0.5");
        assert_eq!(entries[0].report, "r-1");
        assert_eq!(
            entries[0].timestamp,
            Utc.with_ymd_and_hms(2020, 3, 1, 12, 30, 45).unwrap()
        );
    }

    #[test]
    fn test_tasks_take_identity_from_target_name() {
        let xml = r#"<get_tasks_response status="200" status_text="OK">
  <task id="t-1">
    <name>AA:BB:CC:DD:EE:FF (10.0.0.5)</name>
    <target id="g-1"><name>AA:BB:CC:DD:EE:FF (10.0.0.5)</name></target>
    <status>Running</status>
  </task>
  <task id="t-2">
    <name>Weekly</name>
    <target id="g-2"><name>Office</name></target>
    <status>Done</status>
  </task>
  <task id="t-3">
    <name>11:22:33:44:55:66 (10.0.0.7)</name>
    <status>Done</status>
  </task>
</get_tasks_response>"#;
        let tasks = parse_tasks(xml).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].hardware_id, "AA:BB:CC:DD:EE:FF");
        assert!(tasks[0].running);
        assert_eq!(tasks[1].address, "10.0.0.7");
        assert!(!tasks[1].running);
    }

    #[test]
    fn test_targets() {
        let xml = r#"<get_targets_response status="200" status_text="OK">
  <target id="g-1"><name>AA:BB:CC:DD:EE:FF (10.0.0.5)</name><hosts>10.0.0.5</hosts></target>
  <target id="g-2"><name>empty</name><hosts></hosts></target>
</get_targets_response>"#;
        let targets = parse_targets(xml).unwrap();
        assert_eq!(targets, vec![TargetEntry { address: "10.0.0.5".into(), target: "g-1".into() }]);
    }

    #[test]
    fn test_results_drop_zero_severity() {
        let xml = r#"<get_results_response status="200" status_text="OK">
  <result id="x-1">
    <host>10.0.0.5</host>
    <modification_time>2020-03-01T12:30:45Z</modification_time>
    <nvt oid="1.3"><cvss_base>5.04</cvss_base></nvt>
  </result>
  <result id="x-2">
    <host>10.0.0.5</host>
    <modification_time>2020-03-01T12:30:45Z</modification_time>
    <nvt oid="1.4"><cvss_base>0.0</cvss_base></nvt>
  </result>
</get_results_response>"#;
        let results = parse_results(xml).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].severity, 5.0);
    }

    #[test]
    fn test_status() {
        let ok = parse_status(r#"<create_target_response status="201" status_text="OK, resource created" id="g-9"/>"#).unwrap();
        assert!(ok.is_ok());
        assert_eq!(ok.id.as_deref(), Some("g-9"));

        let denied = parse_status(r#"<create_task_response status="400" status_text="Bogus"/>"#).unwrap();
        assert!(!denied.is_ok());
    }

    #[test]
    fn test_object_names() {
        let name = object_name("AA:BB:CC:DD:EE:FF", "10.0.0.5");
        assert_eq!(
            parse_object_name(&name),
            Some(("AA:BB:CC:DD:EE:FF".to_string(), "10.0.0.5".to_string()))
        );
        assert!(parse_object_name("aa:bb:cc:dd:ee:ff (10.0.0.5)").is_none());
        assert!(parse_object_name("printer").is_none());
    }
}
