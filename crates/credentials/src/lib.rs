//! Pool of refreshable upstream credentials.
//!
//! Entries are created once at startup from configuration and never removed,
//! only disabled. Selection, health transitions and the cooldown schedule
//! live in [`CredentialPool`]; the refresh RPCs against the two identity
//! providers live in [`TokenRefresher`].

mod error;
mod pool;
mod refresh;
mod strategy;

pub use error::{CredentialError, FailureKind, RefreshError};
pub use pool::{CredentialPool, Lease};
pub use refresh::{FreshToken, IDC_REFRESH_URL, SOCIAL_REFRESH_URL, TokenRefresher};
