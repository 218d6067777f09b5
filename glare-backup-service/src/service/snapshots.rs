use chrono::{DateTime, Utc};
use serde_json::Value;

/// A snapshot reference recovered from an opaque worker output blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    pub id: String,
    pub time: Option<DateTime<Utc>>,
}

const ID_KEYS: &[&str] = &["snapshot_id", "short_id", "id"];
const HINT_KEYS: &[&str] = &[
    "time",
    "timestamp",
    "datetime",
    "paths",
    "summary",
    "tree",
    "parent",
];
const TIME_KEYS: &[&str] = &["time", "timestamp", "datetime"];

/// Worker output is persisted verbatim and has no fixed schema; this walks
/// the blob for objects that look like snapshots (an id plus at least one
/// snapshot-ish field) and returns the most recent one.
pub fn extract_primary_snapshot(value: &Value) -> Option<SnapshotRef> {
    let mut candidates = Vec::new();
    collect_snapshot_candidates(value, &mut candidates);

    candidates.sort_by(|a, b| match (a.time, b.time) {
        (Some(a_time), Some(b_time)) => b_time.cmp(&a_time),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    candidates.into_iter().next()
}

fn collect_snapshot_candidates(value: &Value, candidates: &mut Vec<SnapshotRef>) {
    match value {
        Value::Object(map) => {
            let id = ID_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .filter(|id| !id.is_empty());
            let has_hint = HINT_KEYS.iter().any(|key| map.contains_key(*key));

            if let (Some(id), true) = (id, has_hint) {
                let time = TIME_KEYS
                    .iter()
                    .find_map(|key| map.get(*key).and_then(parse_time));
                candidates.push(SnapshotRef {
                    id: id.to_string(),
                    time,
                });
            }

            for nested in map.values() {
                collect_snapshot_candidates(nested, candidates);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_snapshot_candidates(item, candidates);
            }
        }
        _ => {}
    }
}

/// Collects every snapshot-shaped object of a snapshot-list response along
/// with its raw record. Matched objects are not descended into, so one listed
/// snapshot yields exactly one record.
pub fn extract_snapshot_records(value: &Value) -> Vec<(Value, SnapshotRef)> {
    let mut records = Vec::new();
    collect_snapshot_records(value, &mut records);
    records
}

fn collect_snapshot_records(value: &Value, records: &mut Vec<(Value, SnapshotRef)>) {
    match value {
        Value::Object(map) => {
            let id = ID_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .filter(|id| !id.is_empty());
            let has_hint = HINT_KEYS.iter().any(|key| map.contains_key(*key));

            if let (Some(id), true) = (id, has_hint) {
                let time = TIME_KEYS
                    .iter()
                    .find_map(|key| map.get(*key).and_then(parse_time));
                records.push((
                    value.clone(),
                    SnapshotRef {
                        id: id.to_string(),
                        time,
                    },
                ));
                return;
            }

            for nested in map.values() {
                collect_snapshot_records(nested, records);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_snapshot_records(item, records);
            }
        }
        _ => {}
    }
}

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Size and file counters recovered from a worker's backup summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSummary {
    pub bytes_added: Option<i64>,
    pub bytes_processed: Option<i64>,
    pub files_new: Option<i64>,
    pub files_changed: Option<i64>,
    pub files_unmodified: Option<i64>,
}

pub fn extract_summary(value: &Value) -> OutputSummary {
    find_summary_object(value)
        .map(|summary| OutputSummary {
            bytes_added: read_i64(summary, "data_added"),
            bytes_processed: read_i64(summary, "total_bytes_processed"),
            files_new: read_i64(summary, "files_new"),
            files_changed: read_i64(summary, "files_changed"),
            files_unmodified: read_i64(summary, "files_unmodified"),
        })
        .unwrap_or_default()
}

fn find_summary_object(value: &Value) -> Option<&serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) => {
            if let Some(Value::Object(summary)) = map.get("summary") {
                return Some(summary);
            }
            map.values().find_map(find_summary_object)
        }
        Value::Array(items) => items.iter().find_map(find_summary_object),
        _ => None,
    }
}

fn read_i64(map: &serde_json::Map<String, Value>, key: &str) -> Option<i64> {
    map.get(key)
        .and_then(|value| value.as_i64().or_else(|| value.as_f64().map(|f| f as i64)))
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;
    use serde_json::json;

    #[test]
    fn finds_the_snapshot_nested_in_a_rustic_response() {
        let output = json!({
            "rustic": { "success": true },
            "result": {
                "snapshot": {
                    "id": "abcdef1234567890",
                    "time": "2024-03-01T10:00:00Z",
                    "tree": "deadbeef"
                }
            }
        });
        let snapshot = extract_primary_snapshot(&output).unwrap();
        assert_eq!(snapshot.id, "abcdef1234567890");
        assert_eq!(
            snapshot.time.unwrap().to_rfc3339(),
            "2024-03-01T10:00:00+00:00"
        );
    }

    #[test]
    fn picks_the_latest_snapshot_of_a_list() {
        let output = json!([
            { "id": "older", "time": "2024-03-01T09:00:00Z", "paths": ["/a"] },
            { "id": "newer", "time": "2024-03-01T11:00:00Z", "paths": ["/a"] },
            { "id": "untimed", "paths": ["/a"] }
        ]);
        assert_eq!(extract_primary_snapshot(&output).unwrap().id, "newer");
    }

    #[test]
    fn objects_without_snapshot_hints_are_ignored() {
        let output = json!({ "id": "not-a-snapshot", "status": "done" });
        assert_eq!(extract_primary_snapshot(&output), None);
    }

    #[test]
    fn snapshot_id_key_wins_over_plain_id() {
        let output = json!({
            "snapshot_id": "primary",
            "id": "secondary",
            "time": "2024-03-01T10:00:00Z"
        });
        assert_eq!(extract_primary_snapshot(&output).unwrap().id, "primary");
    }

    #[test]
    fn snapshot_list_yields_one_record_per_snapshot() {
        let body = json!({
            "rustic": { "success": true },
            "snapshots": [
                { "id": "aaa111", "time": "2024-03-01T09:00:00Z", "paths": ["/a"] },
                { "id": "bbb222", "time": "2024-03-01T10:00:00Z", "paths": ["/a"],
                  "summary": { "data_added": 5 } }
            ]
        });
        let records = extract_snapshot_records(&body);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].1.id, "aaa111");
        assert_eq!(records[1].1.id, "bbb222");
        // The raw record rides along untouched.
        assert_eq!(records[1].0["summary"]["data_added"], json!(5));
    }

    #[test]
    fn summary_counters_are_extracted() {
        let output = json!({
            "rustic": { "success": true },
            "summary": {
                "data_added": 1048576,
                "total_bytes_processed": 2097152,
                "files_new": 3,
                "files_changed": 1,
                "files_unmodified": 40
            }
        });
        let summary = extract_summary(&output);
        assert_eq!(summary.bytes_added, Some(1048576));
        assert_eq!(summary.bytes_processed, Some(2097152));
        assert_eq!(summary.files_new, Some(3));
        assert_eq!(summary.files_unmodified, Some(40));
    }

    #[test]
    fn missing_summary_yields_empty_counters() {
        let summary = extract_summary(&json!({ "rustic": { "success": true } }));
        assert_eq!(summary, OutputSummary::default());
    }
}
