//! Templating & normalization
//!
//! Embedding clustering is sensitive to lexical entropy; this module is the
//! primary lever deciding cluster granularity. It routes a raw line to an OS
//! bucket, strips high-cardinality tokens (timestamps, IPs, long numerics)
//! and renders a stable low-cardinality template string.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::models::{OsKind, ParsedLog};

static IP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b").expect("ip regex"));
static ISO_TS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})?\b")
        .expect("iso ts regex")
});
static LONG_NUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{4,}\b").expect("long num regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

// Syslog-ish line: "Jun 14 15:16:01 host component[pid]: content".
static SYSLOG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}\s+\S+\s+([^\[\]:\s]+)(?:\[(\d+)\])?:\s*(.*)$",
    )
    .expect("syslog regex")
});

const TEMPLATE_MAX_LEN: usize = 180;

/// Keys whose values are stable enough to cluster on, checked in order.
const STABLE_JSON_KEYS: [&str; 23] = [
    "type", "status", "Status", "severity", "Severity", "metric", "Metric", "test", "test_name",
    "TestName", "name", "Name", "service", "Service", "component", "Component", "ComputerName",
    "message", "Message", "error", "Error", "summary", "Summary",
];

/// High-cardinality keys pruned before the deterministic JSON dump fallback.
const PRUNED_JSON_KEYS: [&str; 11] = [
    "TimeGenerated", "time", "ts", "timestamp", "ip", "IP", "Id", "id", "uuid", "request_id",
    "ray_id",
];

/// Prefix-based routing of a producer source string to an OS bucket.
pub fn os_from_source(source: &str) -> OsKind {
    let s = source.to_lowercase();
    if s.is_empty() {
        return OsKind::Unknown;
    }
    // Integration sources (simulation / upstream connectors)
    if s.starts_with("scom:") || s.starts_with("squaredup:") {
        return OsKind::Windows;
    }
    if s.starts_with("catalyst:") || s.starts_with("thousandeyes:") {
        return OsKind::Network;
    }
    if s.contains("linux.log") {
        return OsKind::Linux;
    }
    if s.contains("mac.log") {
        return OsKind::Macos;
    }
    if s.contains("windows") {
        return OsKind::Windows;
    }
    OsKind::Unknown
}

/// Strip common high-cardinality tokens that fragment clustering, collapse
/// whitespace and cap the length.
pub fn sanitize_text(text: &str) -> String {
    let t = ISO_TS_RE.replace_all(text, "<ts>");
    let t = IP_RE.replace_all(&t, "<ip>");
    let t = LONG_NUM_RE.replace_all(&t, "<num>");
    let t = WHITESPACE_RE.replace_all(t.trim(), " ");
    let mut out = t.into_owned();
    if out.len() > TEMPLATE_MAX_LEN {
        let mut cut = TEMPLATE_MAX_LEN;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    out
}

/// Stable template string for embedding. Same inputs, same output.
pub fn render_templated_line(component: &str, pid: Option<&str>, content: &str) -> String {
    let component = if component.is_empty() { "unknown" } else { component };
    match pid.filter(|p| !p.is_empty()) {
        Some(pid) => format!("{}[{}]: {}", component, pid, content),
        None => format!("{}: {}", component, content),
    }
}

fn try_parse_json_line(line: &str) -> Option<serde_json::Map<String, Value>> {
    let s = line.trim();
    if !(s.starts_with('{') && s.ends_with('}')) {
        return None;
    }
    match serde_json::from_str::<Value>(s) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn json_str(map: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key) {
        Some(Value::String(s)) if !s.is_empty() && s != "None" => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Normalize JSON integration payloads into stable text for clustering.
/// Only applies to integration-like sources; real syslog lines are left to
/// the OS parsers.
pub fn normalize_json_for_clustering(source: &str, line: &str) -> Option<(String, ParsedLog)> {
    let obj = try_parse_json_line(line)?;

    let s = source.to_lowercase();
    let is_integration = s.starts_with("scom:")
        || s.starts_with("squaredup:")
        || s.starts_with("catalyst:")
        || s.starts_with("thousandeyes:");
    if !is_integration {
        return None;
    }

    let env_id = json_str(&obj, "EnvironmentId")
        .or_else(|| json_str(&obj, "env_id"))
        .or_else(|| json_str(&obj, "environment_id"));
    let host = json_str(&obj, "ComputerName")
        .or_else(|| json_str(&obj, "Host"))
        .or_else(|| json_str(&obj, "host"))
        .or_else(|| json_str(&obj, "component"))
        .or_else(|| json_str(&obj, "Component"))
        .unwrap_or_default();

    let mut parts: Vec<String> = Vec::new();
    if s.starts_with("scom:") {
        let channel = json_str(&obj, "Channel").unwrap_or_default();
        let level = json_str(&obj, "LevelDisplayName")
            .or_else(|| json_str(&obj, "level"))
            .unwrap_or_default();
        let msg = json_str(&obj, "Message")
            .or_else(|| json_str(&obj, "message"))
            .unwrap_or_default();
        for part in ["scom".to_string(), channel, level, host.clone(), msg] {
            if !part.is_empty() {
                parts.push(part);
            }
        }
    } else {
        for key in STABLE_JSON_KEYS {
            if let Some(value) = json_str(&obj, key) {
                parts.push(format!("{}={}", key, value));
            }
        }
    }

    if parts.is_empty() {
        // Prune obvious high-cardinality fields then dump with sorted keys.
        let pruned: std::collections::BTreeMap<&String, &Value> = obj
            .iter()
            .filter(|(k, _)| !PRUNED_JSON_KEYS.contains(&k.as_str()))
            .collect();
        parts.push(serde_json::to_string(&pruned).unwrap_or_default());
    }

    let content = sanitize_text(&parts.join(" "));
    let component = if !host.is_empty() {
        host
    } else {
        s.split(':').next().unwrap_or("unknown").to_string()
    };

    let parsed = ParsedLog {
        component: component.clone(),
        pid: None,
        content: content.clone(),
        env_id,
    };
    let templated = render_templated_line(&component, None, &content);
    Some((templated, parsed))
}

fn parse_syslog_line(line: &str) -> Option<ParsedLog> {
    let caps = SYSLOG_RE.captures(line)?;
    let component = caps.get(1).map(|m| m.as_str().to_string())?;
    let pid = caps.get(2).map(|m| m.as_str().to_string());
    let content = caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default();
    Some(ParsedLog { component, pid, content, env_id: None })
}

/// Linux syslog format.
pub fn parse_linux_line(line: &str) -> Option<ParsedLog> {
    parse_syslog_line(line)
}

/// macOS system.log uses the same syslog framing.
pub fn parse_macos_line(line: &str) -> Option<ParsedLog> {
    parse_syslog_line(line)
}

/// Parse with the OS parser and render the template; falls back to an
/// unknown-component template so nothing is dropped.
pub fn parse_and_template(os: OsKind, line: &str) -> (String, ParsedLog) {
    let parsed = match os {
        OsKind::Linux => parse_linux_line(line),
        OsKind::Macos => parse_macos_line(line),
        _ => None,
    };

    match parsed {
        Some(mut parsed) => {
            parsed.content = sanitize_text(&parsed.content);
            let templated = render_templated_line(
                &parsed.component,
                parsed.pid.as_deref(),
                &parsed.content,
            );
            (templated, parsed)
        },
        None => {
            let content = sanitize_text(line);
            let parsed = ParsedLog {
                component: "unknown".to_string(),
                pid: None,
                content: content.clone(),
                env_id: None,
            };
            (render_templated_line("unknown", None, &content), parsed)
        },
    }
}

/// Full normalization entry point: JSON integration payloads first, OS
/// parsers otherwise.
pub fn normalize(os: OsKind, source: &str, line: &str) -> (String, ParsedLog) {
    if let Some(normalized) = normalize_json_for_clustering(source, line) {
        return normalized;
    }
    parse_and_template(os, line)
}

/// Aggregator grouping key.
pub fn issue_key(os: OsKind, parsed: &ParsedLog) -> String {
    let component = parsed.component.trim().to_lowercase();
    let component = if component.is_empty() { "unknown".to_string() } else { component };
    let pid = parsed.pid.as_deref().unwrap_or("").trim();
    format!("{}|{}|{}", os.as_str(), component, if pid.is_empty() { "nopid" } else { pid })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_routing_table() {
        assert_eq!(os_from_source("scom:WIN-SQL-01"), OsKind::Windows);
        assert_eq!(os_from_source("squaredup:dashboard"), OsKind::Windows);
        assert_eq!(os_from_source("catalyst:sw-core-01"), OsKind::Network);
        assert_eq!(os_from_source("thousandeyes:probe-7"), OsKind::Network);
        assert_eq!(os_from_source("/var/log/linux.log"), OsKind::Linux);
        assert_eq!(os_from_source("mac.log"), OsKind::Macos);
        assert_eq!(os_from_source("windows-host"), OsKind::Windows);
        assert_eq!(os_from_source(""), OsKind::Unknown);
        assert_eq!(os_from_source("mystery"), OsKind::Unknown);
    }

    #[test]
    fn sanitize_replaces_high_cardinality_tokens() {
        let out = sanitize_text(
            "2024-06-14T15:16:01Z request 123456 from 10.0.12.34 took   42ms",
        );
        assert_eq!(out, "<ts> request <num> from <ip> took 42ms");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize_text("error 99999 at 192.168.1.1 on 2024-01-01 10:00:00");
        let twice = sanitize_text(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn sanitize_truncates_at_180() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_text(&long).len(), 180);
    }

    #[test]
    fn render_is_deterministic() {
        let a = render_templated_line("sshd", Some("123"), "authentication failure");
        let b = render_templated_line("sshd", Some("123"), "authentication failure");
        assert_eq!(a, b);
        assert_eq!(a, "sshd[123]: authentication failure");
        assert_eq!(render_templated_line("cron", None, "job started"), "cron: job started");
    }

    #[test]
    fn parses_linux_syslog_line() {
        let parsed = parse_linux_line(
            "Jun 14 15:16:01 combo sshd[19939]: authentication failure; rhost=218.188.2.4",
        )
        .unwrap();
        assert_eq!(parsed.component, "sshd");
        assert_eq!(parsed.pid.as_deref(), Some("19939"));
        assert!(parsed.content.starts_with("authentication failure"));
    }

    #[test]
    fn parses_line_without_pid() {
        let parsed =
            parse_linux_line("Jun 14 15:16:01 combo kernel: nic eth0 link down").unwrap();
        assert_eq!(parsed.component, "kernel");
        assert_eq!(parsed.pid, None);
        assert_eq!(parsed.content, "nic eth0 link down");
    }

    #[test]
    fn unparseable_line_falls_back_to_unknown() {
        let (templated, parsed) = parse_and_template(OsKind::Linux, "free-form text 12345");
        assert_eq!(parsed.component, "unknown");
        assert_eq!(templated, "unknown: free-form text <num>");
    }

    #[test]
    fn normalize_is_deterministic() {
        let line = "Jun 14 15:16:01 combo sshd[19939]: failure from 10.1.2.3";
        let a = normalize(OsKind::Linux, "linux.log", line);
        let b = normalize(OsKind::Linux, "linux.log", line);
        assert_eq!(a.0, b.0);
    }

    #[test]
    fn scom_json_projects_stable_fields() {
        let line = r#"{"Channel":"System","LevelDisplayName":"Error","ComputerName":"WIN-01","Message":"Disk failure imminent","EnvironmentId":"env-002","TimeGenerated":"2024-06-14T15:16:01Z"}"#;
        let (templated, parsed) =
            normalize_json_for_clustering("scom:WIN-01", line).unwrap();
        assert_eq!(parsed.env_id.as_deref(), Some("env-002"));
        assert_eq!(parsed.component, "WIN-01");
        assert!(templated.contains("scom"));
        assert!(templated.contains("Disk failure imminent"));
        assert!(!templated.contains("2024-06-14"));
    }

    #[test]
    fn generic_connector_uses_stable_key_subset() {
        let line = r#"{"type":"alert","severity":"critical","testName":"dns-probe","status":"FAILED","request_id":"abc-123"}"#;
        let (templated, _) =
            normalize_json_for_clustering("thousandeyes:probe", line).unwrap();
        assert!(templated.contains("type=alert"));
        assert!(templated.contains("severity=critical"));
        assert!(templated.contains("testName=dns-probe"));
        assert!(!templated.contains("request_id"));
    }

    #[test]
    fn pruned_dump_fallback_drops_only_listed_keys() {
        // No stable keys present: falls through to the sorted pruned dump.
        let line = r#"{"ray_id":"abc-123","TimeGenerated":"2024-06-14T15:16:01Z","pool_id":"pool-7","detail":"quota exceeded"}"#;
        let (templated, _) =
            normalize_json_for_clustering("catalyst:sw-core", line).unwrap();
        assert!(!templated.contains("ray_id"));
        assert!(!templated.contains("TimeGenerated"));
        assert!(templated.contains("pool_id"));
        assert!(templated.contains("quota exceeded"));
    }

    #[test]
    fn non_integration_json_is_left_to_parsers() {
        assert!(normalize_json_for_clustering("linux.log", r#"{"a":1}"#).is_none());
    }

    #[test]
    fn issue_key_shape() {
        let parsed = ParsedLog {
            component: "SSHD".into(),
            pid: Some("19939".into()),
            content: String::new(),
            env_id: None,
        };
        assert_eq!(issue_key(OsKind::Linux, &parsed), "linux|sshd|19939");

        let no_pid = ParsedLog {
            component: "kernel".into(),
            pid: None,
            content: String::new(),
            env_id: None,
        };
        assert_eq!(issue_key(OsKind::Linux, &no_pid), "linux|kernel|nopid");
    }
}
