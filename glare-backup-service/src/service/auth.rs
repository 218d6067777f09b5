use crate::model::Worker;
use crate::repo::user::UserRepo;
use crate::repo::worker::WorkerRepo;
use crate::repo::RepoError;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use glare_common::model::{TokenSecret, UserId, WorkerId};
use glare_common::SafeDisplay;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// RFC 4648 base32, lowercase, unpadded. 16 input bytes encode to 26 chars.
const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

const SYNC_TOKEN_PREFIX_LEN: usize = 26;
const SYNC_TOKEN_SUFFIX_BYTES: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,
    #[error(transparent)]
    InternalRepoError(#[from] RepoError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SafeDisplay for AuthError {
    fn to_safe_string(&self) -> String {
        match self {
            AuthError::InvalidToken => self.to_string(),
            AuthError::InternalRepoError(inner) => inner.to_safe_string(),
            AuthError::Internal(_) => "Internal error".to_string(),
        }
    }
}

fn base32_encode(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len().div_ceil(5) * 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;

    for byte in bytes {
        buffer = (buffer << 8) | *byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            output.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        output.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    output
}

fn base32_decode(input: &str) -> Option<Vec<u8>> {
    let mut output = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;

    for ch in input.bytes() {
        let value = BASE32_ALPHABET.iter().position(|c| *c == ch)? as u32;
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            output.push(((buffer >> bits) & 0xff) as u8);
        }
    }
    Some(output)
}

/// Byte-wise comparison whose running time does not depend on where the
/// inputs differ.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Mints a worker sync token `<base32(worker-id)>:<base64url(random32)>` and
/// the SHA-256 hex digest that gets persisted in its place.
pub fn mint_sync_token(worker_id: &WorkerId) -> (TokenSecret, String) {
    let prefix = base32_encode(worker_id.0.as_bytes());
    let suffix_bytes: [u8; SYNC_TOKEN_SUFFIX_BYTES] = rand::random();
    let token = format!("{prefix}:{}", URL_SAFE_NO_PAD.encode(suffix_bytes));
    let hash = token_hash(&token);
    (TokenSecret::new(token), hash)
}

/// Recovers the worker id from the token's base32 prefix without touching
/// storage.
pub fn worker_id_from_token(token: &str) -> Option<WorkerId> {
    let (prefix, _suffix) = token.split_once(':')?;
    if prefix.len() != SYNC_TOKEN_PREFIX_LEN {
        return None;
    }
    let bytes = base32_decode(prefix)?;
    Uuid::from_slice(&bytes).ok().map(WorkerId)
}

/// Authenticates worker-originated calls by the sync-token bearer.
pub struct WorkerAuthService {
    worker_repo: Arc<dyn WorkerRepo>,
}

impl WorkerAuthService {
    pub fn new(worker_repo: Arc<dyn WorkerRepo>) -> Self {
        Self { worker_repo }
    }

    pub async fn authenticate(&self, token: &TokenSecret) -> Result<Worker, AuthError> {
        let worker_id = worker_id_from_token(token.as_str()).ok_or(AuthError::InvalidToken)?;

        let record = self
            .worker_repo
            .get(&worker_id.0)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        let worker: Worker = record.try_into().map_err(AuthError::Internal)?;

        let presented = token_hash(token.as_str());
        if constant_time_eq(presented.as_bytes(), worker.sync_token_hash.as_bytes()) {
            Ok(worker)
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCtx {
    pub user_id: UserId,
}

/// Session management is owned by an external collaborator; the core only
/// resolves an API-token bearer to its owning user.
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn authenticate(&self, token: &TokenSecret) -> Result<AuthCtx, AuthError>;
}

pub struct ApiTokenAuthService {
    user_repo: Arc<dyn UserRepo>,
}

impl ApiTokenAuthService {
    pub fn new(user_repo: Arc<dyn UserRepo>) -> Self {
        Self { user_repo }
    }
}

#[async_trait]
impl AuthService for ApiTokenAuthService {
    async fn authenticate(&self, token: &TokenSecret) -> Result<AuthCtx, AuthError> {
        let user_id = self
            .user_repo
            .find_by_token_hash(&token_hash(token.as_str()))
            .await?
            .ok_or(AuthError::InvalidToken)?;
        Ok(AuthCtx {
            user_id: UserId(user_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;

    #[test]
    fn minted_token_encodes_the_worker_id() {
        let worker_id = WorkerId::new_v4();
        let (token, _hash) = mint_sync_token(&worker_id);
        assert_eq!(worker_id_from_token(token.as_str()), Some(worker_id));
    }

    #[test]
    fn token_prefix_is_26_chars_and_suffix_is_base64url() {
        let (token, _) = mint_sync_token(&WorkerId::new_v4());
        let (prefix, suffix) = token.as_str().split_once(':').unwrap();
        assert_eq!(prefix.len(), 26);
        assert_eq!(URL_SAFE_NO_PAD.decode(suffix).unwrap().len(), 32);
    }

    #[test]
    fn hash_matches_only_the_original_token() {
        let (token, hash) = mint_sync_token(&WorkerId::new_v4());
        assert_eq!(token_hash(token.as_str()), hash);

        let mut tampered = token.as_str().to_string();
        tampered.pop();
        tampered.push('x');
        assert_ne!(token_hash(&tampered), hash);
    }

    #[test]
    fn constant_time_eq_basic_properties() {
        assert!(constant_time_eq(b"same-bytes", b"same-bytes"));
        assert!(!constant_time_eq(b"same-bytes", b"same-bytez"));
        assert!(!constant_time_eq(b"short", b"longer-value"));
    }

    #[test]
    fn garbage_tokens_do_not_parse() {
        assert_eq!(worker_id_from_token("no-separator"), None);
        assert_eq!(worker_id_from_token("short:suffix"), None);
        assert_eq!(
            worker_id_from_token("UPPERCASE!!notbase32chars!!:suffix"),
            None
        );
    }

    #[test]
    fn base32_round_trips_uuid_bytes() {
        let uuid = Uuid::new_v4();
        let encoded = base32_encode(uuid.as_bytes());
        assert_eq!(encoded.len(), 26);
        assert_eq!(base32_decode(&encoded).unwrap(), uuid.as_bytes().to_vec());
    }
}
