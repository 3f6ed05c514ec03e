use thiserror::Error;

/// Failure category reported back to the pool after an upstream call or a
/// refresh attempt. All kinds drive the same health transition; the kind is
/// kept for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 401/403 from the upstream or the identity provider.
    Unauthorized,
    /// Connection, DNS or TLS failure.
    Transport,
    /// 5xx or otherwise malformed upstream behavior.
    Server,
}

/// Errors surfaced by [`crate::CredentialPool::acquire`].
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no usable upstream credentials available")]
    Exhausted,
}

/// Errors from a single refresh RPC.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("identity provider rejected the refresh token ({status})")]
    Unauthorized { status: u16 },

    #[error("identity provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("refresh request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("identity provider response was malformed: {0}")]
    Malformed(String),
}

impl RefreshError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RefreshError::Unauthorized { .. } => FailureKind::Unauthorized,
            RefreshError::Transport(_) => FailureKind::Transport,
            RefreshError::Provider { .. } | RefreshError::Malformed(_) => FailureKind::Server,
        }
    }
}
