use std::sync::{Mutex, RwLock};

use config::{CredentialSpec, CredentialStrategy};
use secrecy::SecretString;
use tokio::time::Instant;

use crate::{
    error::{CredentialError, FailureKind},
    refresh::{EXPIRY_MARGIN, FreshToken, TokenRefresher},
    strategy::{self, Health, MAX_RETRIES},
};

/// A credential handed to one in-flight request.
///
/// The lease is a read-only view; callers report the outcome back to the
/// pool with [`CredentialPool::report_success`] and friends.
#[derive(Debug, Clone)]
pub struct Lease {
    entry_id: usize,
    access_token: SecretString,
    profile_arn: Option<String>,
}

impl Lease {
    pub fn entry_id(&self) -> usize {
        self.entry_id
    }

    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    pub fn profile_arn(&self) -> Option<&str> {
        self.profile_arn.as_deref()
    }
}

struct Entry {
    spec: CredentialSpec,
    /// Serializes refresh attempts for this entry only.
    refresh_lock: tokio::sync::Mutex<()>,
    cache: Mutex<Option<CachedToken>>,
}

#[derive(Clone)]
struct CachedToken {
    token: SecretString,
    expires_at: Instant,
    profile_arn: Option<String>,
}

impl Entry {
    fn cached_lease(&self, entry_id: usize) -> Option<Lease> {
        let cache = self.cache.lock().expect("token cache lock poisoned");
        let cached = cache.as_ref()?;

        if cached.expires_at.checked_duration_since(Instant::now())? < EXPIRY_MARGIN {
            return None;
        }

        Some(Lease {
            entry_id,
            access_token: cached.token.clone(),
            profile_arn: cached.profile_arn.clone(),
        })
    }

    fn store(&self, fresh: &FreshToken) {
        *self.cache.lock().expect("token cache lock poisoned") = Some(CachedToken {
            token: fresh.access_token.clone(),
            expires_at: fresh.expires_at,
            profile_arn: fresh.profile_arn.clone(),
        });
    }
}

/// The set of configured credentials plus their runtime health.
///
/// Health transitions happen under the pool-wide lock; token refreshes hold
/// only the affected entry's own mutex, so a refresh storm against one
/// provider never blocks selection of the others.
pub struct CredentialPool {
    entries: Vec<Entry>,
    health: RwLock<Vec<Health>>,
    cursor: Mutex<usize>,
    strategy: CredentialStrategy,
    refresher: TokenRefresher,
}

impl CredentialPool {
    pub fn new(specs: Vec<CredentialSpec>, strategy: CredentialStrategy, refresher: TokenRefresher) -> Self {
        let entries: Vec<Entry> = specs
            .into_iter()
            .map(|spec| Entry {
                spec,
                refresh_lock: tokio::sync::Mutex::new(()),
                cache: Mutex::new(None),
            })
            .collect();

        let health = RwLock::new(vec![Health::new(); entries.len()]);

        Self {
            entries,
            health,
            cursor: Mutex::new(0),
            strategy,
            refresher,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Select a credential and return it with a valid access token,
    /// refreshing if the cached token is missing or near expiry.
    ///
    /// Tries each distinct acquirable entry at most once before giving up.
    pub async fn acquire(&self) -> Result<Lease, CredentialError> {
        let mut tried = vec![false; self.entries.len()];

        loop {
            let Some(idx) = self.select(&mut tried) else {
                return Err(CredentialError::Exhausted);
            };

            let entry = &self.entries[idx];

            if let Some(lease) = entry.cached_lease(idx) {
                return Ok(lease);
            }

            let _refresh_guard = entry.refresh_lock.lock().await;

            // Another caller may have refreshed while we waited on the lock.
            if let Some(lease) = entry.cached_lease(idx) {
                return Ok(lease);
            }

            match self.refresher.refresh(&entry.spec).await {
                Ok(fresh) => {
                    entry.store(&fresh);
                    self.mark_success(idx);

                    return Ok(Lease {
                        entry_id: idx,
                        access_token: fresh.access_token,
                        profile_arn: fresh.profile_arn,
                    });
                }
                Err(err) => {
                    log::warn!("credential {idx} refresh failed ({:?}): {err}", err.kind());
                    self.mark_failure(idx, err.kind());
                }
            }
        }
    }

    /// The upstream call using this lease completed cleanly.
    pub fn report_success(&self, lease: &Lease) {
        self.mark_success(lease.entry_id);
    }

    /// The upstream call using this lease failed.
    pub fn report_failure(&self, lease: &Lease, kind: FailureKind) {
        log::warn!("credential {} reported failed ({kind:?})", lease.entry_id);
        self.mark_failure(lease.entry_id, kind);
    }

    /// Drop the cached access token (the refresh token stays valid).
    pub fn invalidate_access_token(&self, lease: &Lease) {
        let entry = &self.entries[lease.entry_id];
        *entry.cache.lock().expect("token cache lock poisoned") = None;
    }

    fn select(&self, tried: &mut [bool]) -> Option<usize> {
        let now = Instant::now();
        let health = self.health.read().expect("pool health lock poisoned");
        let mut cursor = self.cursor.lock().expect("pool cursor lock poisoned");

        let selected = match self.strategy {
            CredentialStrategy::Sequential => strategy::select_sequential(&health, tried, *cursor, now),
            CredentialStrategy::Optimal => strategy::select_optimal(&health, tried, now),
        }?;

        *cursor = (selected + 1) % self.entries.len().max(1);
        tried[selected] = true;

        Some(selected)
    }

    fn mark_success(&self, idx: usize) {
        let mut health = self.health.write().expect("pool health lock poisoned");
        health[idx] = Health::Active {
            last_success: Some(Instant::now()),
        };
    }

    fn mark_failure(&self, idx: usize, _kind: FailureKind) {
        let mut health = self.health.write().expect("pool health lock poisoned");

        health[idx] = match &health[idx] {
            Health::Active { .. } => Health::Failed {
                count: 1,
                last_fail: Instant::now(),
            },
            Health::Failed { count, .. } => {
                let count = count + 1;
                if count >= MAX_RETRIES {
                    log::warn!("credential {idx} disabled after {count} consecutive failures");
                    Health::Disabled {
                        reason: "retries exhausted",
                    }
                } else {
                    Health::Failed {
                        count,
                        last_fail: Instant::now(),
                    }
                }
            }
            disabled @ Health::Disabled { .. } => disabled.clone(),
        };
    }

    #[cfg(test)]
    fn seed_token(&self, idx: usize, token: &str) {
        self.entries[idx].store(&FreshToken {
            access_token: SecretString::from(token.to_owned()),
            expires_at: Instant::now() + std::time::Duration::from_secs(3600),
            profile_arn: None,
        });
    }

    #[cfg(test)]
    fn failure_count(&self, idx: usize) -> u32 {
        match &self.health.read().expect("pool health lock poisoned")[idx] {
            Health::Active { .. } => 0,
            Health::Failed { count, .. } => *count,
            Health::Disabled { .. } => u32::MAX,
        }
    }

    #[cfg(test)]
    fn is_disabled(&self, idx: usize) -> bool {
        matches!(
            self.health.read().expect("pool health lock poisoned")[idx],
            Health::Disabled { .. }
        )
    }
}
