use crate::model::PlanPathsConfig;
use glare_common::model::WorkerId;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathsError {
    #[error("Unknown worker in path rule: {0}")]
    UnknownWorkerRule(WorkerId),
    #[error("Invalid worker reference: {0}")]
    InvalidWorkerReference(String),
}

/// Trims every path, drops empties and de-duplicates preserving the first
/// occurrence. Worker entries that end up empty are removed so resolution
/// falls back to the defaults.
pub fn normalize(config: &PlanPathsConfig) -> PlanPathsConfig {
    let mut worker_paths = BTreeMap::new();
    for (worker_id, paths) in &config.worker_paths {
        let normalized = normalize_paths(paths);
        if !normalized.is_empty() {
            worker_paths.insert(*worker_id, normalized);
        }
    }
    PlanPathsConfig {
        default_paths: normalize_paths(&config.default_paths),
        worker_paths,
    }
}

pub fn normalize_paths(paths: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut result = Vec::new();
    for path in paths {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            result.push(trimmed.to_string());
        }
    }
    result
}

/// Worker-specific paths when the worker has a non-empty rule, otherwise the
/// plan defaults.
pub fn resolve_worker_paths(config: &PlanPathsConfig, worker_id: &WorkerId) -> Vec<String> {
    let specific = config
        .worker_paths
        .get(worker_id)
        .map(|paths| normalize_paths(paths))
        .unwrap_or_default();
    if !specific.is_empty() {
        specific
    } else {
        normalize_paths(&config.default_paths)
    }
}

/// Every per-worker rule must refer to a worker of the plan's target set.
pub fn validate_worker_rules(
    config: &PlanPathsConfig,
    targets: &BTreeSet<WorkerId>,
) -> Result<(), PathsError> {
    for worker_id in config.worker_paths.keys() {
        if !targets.contains(worker_id) {
            return Err(PathsError::UnknownWorkerRule(*worker_id));
        }
    }
    Ok(())
}

/// Parses the line-oriented form accepted from user input:
/// `@<worker-id>:<path>` attaches a path to a worker; `#`-prefixed lines are
/// comments; every other non-empty line appends a default path.
pub fn parse_plan_paths_script(input: &str) -> Result<PlanPathsConfig, PathsError> {
    let mut config = PlanPathsConfig::default();

    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(rest) = line.strip_prefix('@') {
            let (reference, path) = rest
                .split_once(':')
                .ok_or_else(|| PathsError::InvalidWorkerReference(line.to_string()))?;
            let worker_id = WorkerId::from_str(reference.trim())
                .map_err(|_| PathsError::InvalidWorkerReference(reference.trim().to_string()))?;
            config
                .worker_paths
                .entry(worker_id)
                .or_default()
                .push(path.to_string());
        } else {
            config.default_paths.push(line.to_string());
        }
    }

    Ok(normalize(&config))
}

pub fn serialize_plan_paths_script(config: &PlanPathsConfig) -> String {
    let mut lines = Vec::new();
    for path in &config.default_paths {
        lines.push(path.clone());
    }
    for (worker_id, paths) in &config.worker_paths {
        for path in paths {
            lines.push(format!("@{worker_id}:{path}"));
        }
    }
    lines.join("\n")
}
