use crate::model::RepositoryBackend;
use glare_common::model::RepositoryId;
use std::collections::BTreeMap;

/// The wire-level target of a single worker call, derived once per fire and
/// shared by the init/backup/prune/snapshot-list/check/repair/restore flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveTarget {
    pub backend: String,
    pub repository: String,
    pub options: BTreeMap<String, String>,
    /// Set when a remote name was synthesized during path rewriting and
    /// should be stored back onto the repository row as `rclone.remote`.
    pub persist_remote: Option<String>,
}

const LEGACY_S3_KEY_MAP: &[(&str, &str)] = &[
    ("s3.endpoint", "rclone.config.endpoint"),
    ("s3.region", "rclone.config.region"),
    ("s3.access-key-id", "rclone.config.access_key_id"),
    ("s3.secret-access-key", "rclone.config.secret_access_key"),
    ("s3.session-token", "rclone.config.session_token"),
    ("s3.profile", "rclone.config.profile"),
    ("s3.storage-class", "rclone.config.storage_class"),
    ("s3.acl", "rclone.config.acl"),
];

const LEGACY_S3_BOOL_MAP: &[(&str, &str)] = &[
    ("s3.path-style", "rclone.config.force_path_style"),
    ("s3.disable-tls", "rclone.config.disable_http2"),
    ("s3.no-verify-ssl", "rclone.config.no_check_certificate"),
];

fn has_rclone_native_keys(options: &BTreeMap<String, String>) -> bool {
    options
        .keys()
        .any(|key| key.starts_with("rclone.type") || key.starts_with("rclone.config."))
}

fn has_legacy_s3_keys(options: &BTreeMap<String, String>) -> bool {
    options.keys().any(|key| key.starts_with("s3."))
}

fn has_rclone_keys(options: &BTreeMap<String, String>) -> bool {
    options.keys().any(|key| key.starts_with("rclone."))
}

fn infer_provider(options: &BTreeMap<String, String>) -> &'static str {
    let endpoint_host = options
        .get("s3.endpoint")
        .map(|endpoint| match url::Url::parse(endpoint) {
            Ok(url) => url.host_str().unwrap_or("").to_string(),
            Err(_) => endpoint.clone(),
        })
        .unwrap_or_default();

    if endpoint_host.contains("r2.cloudflarestorage.com") {
        "Cloudflare"
    } else {
        "AWS"
    }
}

/// Computes the effective `(backend, repository, options)` tuple sent to a
/// worker, translating the legacy S3 option surface into its rclone
/// equivalent and rewriting the repository path under an rclone remote when
/// the rclone transport is forced.
pub fn normalize_backend_options(
    backend: RepositoryBackend,
    path: &str,
    repository_id: &RepositoryId,
    options: &BTreeMap<String, String>,
) -> EffectiveTarget {
    let rclone_native = has_rclone_native_keys(options);

    let mut effective = options.clone();
    if !rclone_native && backend == RepositoryBackend::S3 && has_legacy_s3_keys(options) {
        for (from, to) in LEGACY_S3_KEY_MAP {
            if let Some(value) = options.get(*from) {
                effective.insert(to.to_string(), value.clone());
            }
        }
        for (from, to) in LEGACY_S3_BOOL_MAP {
            if options.get(*from).map(String::as_str) == Some("true") {
                effective.insert(to.to_string(), "true".to_string());
            }
        }
        effective
            .entry("rclone.type".to_string())
            .or_insert_with(|| "s3".to_string());
        effective
            .entry("rclone.config.provider".to_string())
            .or_insert_with(|| infer_provider(options).to_string());
    }

    let force_rclone = backend == RepositoryBackend::Rclone
        || (backend == RepositoryBackend::S3
            && (has_rclone_keys(options)
                || has_legacy_s3_keys(options)
                || has_rclone_keys(&effective)));

    if !force_rclone {
        return EffectiveTarget {
            backend: backend.to_string(),
            repository: path.to_string(),
            options: effective,
            persist_remote: None,
        };
    }

    let (repository, persist_remote) = if path.starts_with("rclone:") {
        (path.to_string(), None)
    } else {
        let (remote, synthesized) = match effective.get("rclone.remote") {
            Some(remote) => (remote.clone(), false),
            None => {
                let short_id = repository_id.0.simple().to_string();
                (format!("glare-{}", &short_id[..8]), true)
            }
        };
        effective.insert("rclone.remote".to_string(), remote.clone());

        let repository = match (path.starts_with("s3:"), effective.get("s3.bucket")) {
            (true, Some(bucket)) => {
                let prefix = effective
                    .get("s3.prefix")
                    .map(|p| p.trim_matches('/'))
                    .filter(|p| !p.is_empty());
                match prefix {
                    Some(prefix) => format!("rclone:{remote}:{bucket}/{prefix}"),
                    None => format!("rclone:{remote}:{bucket}"),
                }
            }
            _ => {
                let path_part = extract_path_part(path);
                format!("rclone:{remote}:{path_part}")
            }
        };

        (repository, synthesized.then_some(remote))
    };

    EffectiveTarget {
        backend: RepositoryBackend::Rclone.to_string(),
        repository,
        options: effective,
        persist_remote,
    }
}

/// Pulls the path component out of a URL-shaped repository string, e.g.
/// `s3:https://host/bucket/prefix` → `bucket/prefix`.
fn extract_path_part(path: &str) -> String {
    if let Some(idx) = path.find("://") {
        let after_scheme = &path[idx + 3..];
        return match after_scheme.split_once('/') {
            Some((_host, rest)) => rest.trim_matches('/').to_string(),
            None => String::new(),
        };
    }

    match path.split_once(':') {
        Some((scheme, rest)) if !scheme.contains('/') => rest.trim_matches('/').to_string(),
        _ => path.trim_matches('/').to_string(),
    }
}
