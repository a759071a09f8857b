//! Credential store
//!
//! One mutex guards all five entity maps. Durable writes (clients, refresh
//! tokens) happen inside the critical section as a write-to-temp-file plus
//! atomic rename, so a crash never leaves a torn document. A disk failure is
//! logged and the in-memory change kept; the record is marked dirty and the
//! sweeper retries persistence on its next pass.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::records::{
    now_ts, AccessTokenRecord, AuthCodeRecord, ClientRecord, PendingAuthorization,
    RefreshTokenRecord,
};
use crate::{CLIENTS_FILE, REFRESH_TOKENS_FILE};

/// Sweep interval for expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Store operation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// A record with this id already exists.
    Conflict,
    /// No such record.
    NotFound,
    /// The record existed but its expiry has passed.
    Expired,
    /// The authorization code was already redeemed; tokens from the first
    /// redemption have been revoked.
    Reused,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict => write!(f, "record already exists"),
            Self::NotFound => write!(f, "record not found"),
            Self::Expired => write!(f, "record expired"),
            Self::Reused => write!(f, "authorization code already redeemed"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Counts reported by `stats()`, used by logs and the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub clients: usize,
    pub pending_authorizations: usize,
    pub authorization_codes: usize,
    pub access_tokens: usize,
    pub refresh_tokens: usize,
}

/// Tokens issued by a code's first redemption, kept so a replay of the code
/// can revoke them.
#[derive(Debug, Clone)]
struct RedeemedCode {
    access_token: String,
    refresh_token: String,
    client_id: String,
    expires_at: i64,
}

#[derive(Default)]
struct StoreInner {
    clients: HashMap<String, ClientRecord>,
    auth_codes: HashMap<String, AuthCodeRecord>,
    access_tokens: HashMap<String, AccessTokenRecord>,
    refresh_tokens: HashMap<String, RefreshTokenRecord>,
    pending: HashMap<String, PendingAuthorization>,
    redeemed: HashMap<String, RedeemedCode>,
    /// Set when a durable write failed; the sweeper retries.
    clients_dirty: bool,
    refresh_dirty: bool,
}

/// The single owner of all credential records.
pub struct CredentialStore {
    dir: PathBuf,
    inner: Mutex<StoreInner>,
}

impl CredentialStore {
    /// Open the store, creating `dir` if needed and hydrating clients and
    /// refresh tokens from disk. Missing or malformed files are treated as
    /// empty; expired refresh tokens are dropped silently.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create storage directory {:?}", dir))?;

        let mut inner = StoreInner::default();
        inner.clients = load_document::<ClientRecord>(&dir.join(CLIENTS_FILE));

        let now = now_ts();
        let raw_refresh = load_document::<RefreshTokenRecord>(&dir.join(REFRESH_TOKENS_FILE));
        let total = raw_refresh.len();
        inner.refresh_tokens = raw_refresh
            .into_iter()
            .filter(|(_, rec)| !rec.is_expired(now))
            .collect();
        let expired = total - inner.refresh_tokens.len();

        info!(
            "[Store] Opened {:?}: {} clients, {} refresh tokens ({} expired skipped)",
            dir,
            inner.clients.len(),
            inner.refresh_tokens.len(),
            expired
        );

        Ok(Self { dir, inner: Mutex::new(inner) })
    }

    // ─── Clients ─────────────────────────────────────────────────────────

    pub async fn register_client(&self, record: ClientRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.clients.contains_key(&record.client_id) {
            return Err(StoreError::Conflict);
        }
        let client_id = record.client_id.clone();
        inner.clients.insert(client_id.clone(), record);
        save_clients(&mut inner, &self.dir);
        info!("[Store] Registered client: {}", client_id);
        Ok(())
    }

    pub async fn get_client(&self, client_id: &str) -> Option<ClientRecord> {
        self.inner.lock().await.clients.get(client_id).cloned()
    }

    // ─── Authorization codes ─────────────────────────────────────────────

    pub async fn add_code(&self, record: AuthCodeRecord) {
        let mut inner = self.inner.lock().await;
        inner.auth_codes.insert(record.code.clone(), record);
    }

    /// Look at a code without consuming it (consent rendering needs the
    /// redirect target before the code is redeemed).
    pub async fn get_code(&self, code: &str) -> Option<AuthCodeRecord> {
        let mut inner = self.inner.lock().await;
        match inner.auth_codes.get(code) {
            Some(rec) if rec.is_expired(now_ts()) => {
                inner.auth_codes.remove(code);
                None
            }
            Some(rec) => Some(rec.clone()),
            None => None,
        }
    }

    /// Remove a code and return it. Exactly one of two concurrent callers
    /// wins. A code that was already redeemed revokes the tokens its first
    /// redemption produced and reports `Reused`.
    pub async fn consume_code(&self, code: &str) -> Result<AuthCodeRecord, StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.auth_codes.remove(code) {
            if record.is_expired(now_ts()) {
                return Err(StoreError::Expired);
            }
            return Ok(record);
        }

        if let Some(redeemed) = inner.redeemed.remove(code) {
            warn!(
                "[Store] Authorization code replayed for client {} - revoking issued tokens",
                redeemed.client_id
            );
            inner.access_tokens.remove(&redeemed.access_token);
            if inner.refresh_tokens.remove(&redeemed.refresh_token).is_some() {
                save_refresh_tokens(&mut inner, &self.dir);
            }
            return Err(StoreError::Reused);
        }

        Err(StoreError::NotFound)
    }

    /// Remember which tokens a redeemed code produced, for replay detection.
    pub async fn record_redemption(
        &self,
        code: &str,
        access_token: &str,
        refresh_token: &str,
        client_id: &str,
        expires_at: i64,
    ) {
        let mut inner = self.inner.lock().await;
        inner.redeemed.insert(
            code.to_string(),
            RedeemedCode {
                access_token: access_token.to_string(),
                refresh_token: refresh_token.to_string(),
                client_id: client_id.to_string(),
                expires_at,
            },
        );
    }

    // ─── Access tokens ───────────────────────────────────────────────────

    pub async fn add_access_token(&self, record: AccessTokenRecord) {
        let mut inner = self.inner.lock().await;
        inner.access_tokens.insert(record.token.clone(), record);
    }

    pub async fn load_access_token(&self, token: &str) -> Result<AccessTokenRecord, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.access_tokens.get(token) {
            Some(rec) if rec.is_expired(now_ts()) => {
                inner.access_tokens.remove(token);
                Err(StoreError::Expired)
            }
            Some(rec) => Ok(rec.clone()),
            None => Err(StoreError::NotFound),
        }
    }

    // ─── Refresh tokens ──────────────────────────────────────────────────

    pub async fn add_refresh_token(&self, record: RefreshTokenRecord) {
        let mut inner = self.inner.lock().await;
        inner.refresh_tokens.insert(record.token.clone(), record);
        save_refresh_tokens(&mut inner, &self.dir);
    }

    pub async fn load_refresh_token(&self, token: &str) -> Result<RefreshTokenRecord, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.refresh_tokens.get(token) {
            Some(rec) if rec.is_expired(now_ts()) => {
                inner.refresh_tokens.remove(token);
                save_refresh_tokens(&mut inner, &self.dir);
                Err(StoreError::Expired)
            }
            Some(rec) => Ok(rec.clone()),
            None => Err(StoreError::NotFound),
        }
    }

    /// Atomically replace `old_token` with `new_record`. No reader can
    /// observe both as valid; losing a rotation race reports `NotFound`.
    pub async fn rotate_refresh(
        &self,
        old_token: &str,
        new_record: RefreshTokenRecord,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let old = inner.refresh_tokens.remove(old_token).ok_or(StoreError::NotFound)?;
        if old.is_expired(now_ts()) {
            save_refresh_tokens(&mut inner, &self.dir);
            return Err(StoreError::Expired);
        }
        inner.refresh_tokens.insert(new_record.token.clone(), new_record);
        save_refresh_tokens(&mut inner, &self.dir);
        Ok(())
    }

    /// Best-effort revocation of an access or refresh token. Revoking a
    /// refresh token also drops the same client's live access tokens. When
    /// `client_id` is given, a token owned by a different client is left
    /// untouched.
    pub async fn revoke(&self, token: &str, client_id: Option<&str>) {
        let mut inner = self.inner.lock().await;

        if let Some(rec) = inner.access_tokens.get(token) {
            if client_id.is_none() || client_id == Some(rec.client_id.as_str()) {
                inner.access_tokens.remove(token);
                debug!("[Store] Revoked access token");
            }
            return;
        }

        let owner = match inner.refresh_tokens.get(token) {
            Some(rec) if client_id.is_none() || client_id == Some(rec.client_id.as_str()) => {
                rec.client_id.clone()
            }
            _ => return,
        };

        inner.refresh_tokens.remove(token);
        inner.access_tokens.retain(|_, at| at.client_id != owner);
        save_refresh_tokens(&mut inner, &self.dir);
        info!("[Store] Revoked refresh token for client {}", owner);
    }

    // ─── Pending federated authorizations ────────────────────────────────

    pub async fn put_pending(&self, state: &str, record: PendingAuthorization) {
        let mut inner = self.inner.lock().await;
        inner.pending.insert(state.to_string(), record);
    }

    /// Remove and return a pending authorization. The IdP callback is the
    /// sole consumer; a duplicate callback gets `NotFound`.
    pub async fn take_pending(&self, state: &str) -> Result<PendingAuthorization, StoreError> {
        let mut inner = self.inner.lock().await;
        let record = inner.pending.remove(state).ok_or(StoreError::NotFound)?;
        if record.is_expired(now_ts()) {
            return Err(StoreError::Expired);
        }
        Ok(record)
    }

    // ─── Maintenance ─────────────────────────────────────────────────────

    /// True when any live credential uses this token string. Minting checks
    /// this to rule out the (negligible) chance of a collision.
    pub async fn token_in_use(&self, token: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.access_tokens.contains_key(token)
            || inner.refresh_tokens.contains_key(token)
            || inner.auth_codes.contains_key(token)
            || inner.pending.contains_key(token)
    }

    /// Drop every expired entry. Refresh-token removals are persisted, as are
    /// any documents left dirty by an earlier failed write.
    pub async fn sweep(&self) {
        let mut inner = self.inner.lock().await;
        let now = now_ts();

        inner.auth_codes.retain(|_, rec| !rec.is_expired(now));
        inner.pending.retain(|_, rec| !rec.is_expired(now));
        inner.redeemed.retain(|_, rec| rec.expires_at >= now);

        let before = inner.access_tokens.len();
        inner.access_tokens.retain(|_, rec| !rec.is_expired(now));
        let dropped_access = before - inner.access_tokens.len();

        let before = inner.refresh_tokens.len();
        inner.refresh_tokens.retain(|_, rec| !rec.is_expired(now));
        let dropped_refresh = before - inner.refresh_tokens.len();

        if dropped_refresh > 0 || inner.refresh_dirty {
            save_refresh_tokens(&mut inner, &self.dir);
        }
        if inner.clients_dirty {
            save_clients(&mut inner, &self.dir);
        }

        if dropped_access > 0 || dropped_refresh > 0 {
            debug!(
                "[Store] Sweep removed {} access tokens, {} refresh tokens",
                dropped_access, dropped_refresh
            );
        }
    }

    /// Run the sweeper until `shutdown` is cancelled.
    pub fn spawn_sweeper(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let store = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("[Store] Sweeper stopped");
                        break;
                    }
                    _ = interval.tick() => store.sweep().await,
                }
            }
        })
    }

    /// Write both durable documents out, regardless of dirtiness.
    pub async fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        write_document(&self.dir.join(CLIENTS_FILE), &inner.clients)?;
        inner.clients_dirty = false;
        write_document(&self.dir.join(REFRESH_TOKENS_FILE), &inner.refresh_tokens)?;
        inner.refresh_dirty = false;
        debug!("[Store] Flushed durable state to {:?}", self.dir);
        Ok(())
    }

    pub async fn stats(&self) -> StoreStats {
        let inner = self.inner.lock().await;
        StoreStats {
            clients: inner.clients.len(),
            pending_authorizations: inner.pending.len(),
            authorization_codes: inner.auth_codes.len(),
            access_tokens: inner.access_tokens.len(),
            refresh_tokens: inner.refresh_tokens.len(),
        }
    }
}

// ─── Durable documents ───────────────────────────────────────────────────

fn load_document<T: DeserializeOwned>(path: &Path) -> HashMap<String, T> {
    let bytes = match fs::read(path) {
        Ok(bytes) if !bytes.is_empty() => bytes,
        Ok(_) => return HashMap::new(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(err) => {
            error!("[Store] Failed to read {:?}: {} - starting empty", path, err);
            return HashMap::new();
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(map) => map,
        Err(err) => {
            error!("[Store] Malformed JSON in {:?}: {} - starting empty", path, err);
            HashMap::new()
        }
    }
}

/// Write to a temporary sibling, then rename over the target so readers never
/// observe a torn document.
fn write_document<T: Serialize>(path: &Path, map: &HashMap<String, T>) -> Result<()> {
    let json = serde_json::to_vec_pretty(map).context("Failed to serialize store document")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &json).with_context(|| format!("Failed to write {:?}", tmp))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {:?}", path))?;
    Ok(())
}

fn save_clients(inner: &mut StoreInner, dir: &Path) {
    match write_document(&dir.join(CLIENTS_FILE), &inner.clients) {
        Ok(()) => inner.clients_dirty = false,
        Err(err) => {
            error!("[Store] Failed to persist clients: {err:#}");
            inner.clients_dirty = true;
        }
    }
}

fn save_refresh_tokens(inner: &mut StoreInner, dir: &Path) {
    match write_document(&dir.join(REFRESH_TOKENS_FILE), &inner.refresh_tokens) {
        Ok(()) => inner.refresh_dirty = false,
        Err(err) => {
            error!("[Store] Failed to persist refresh tokens: {err:#}");
            inner.refresh_dirty = true;
        }
    }
}
