use std::time::Duration;

use config::{CredentialSpec, ProviderKind};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::time::Instant;

use crate::error::RefreshError;

/// Social (desktop login) refresh endpoint.
pub const SOCIAL_REFRESH_URL: &str = "https://prod.us-east-1.auth.desktop.kiro.dev/refreshToken";

/// IAM Identity Center OIDC token endpoint.
pub const IDC_REFRESH_URL: &str = "https://oidc.us-east-1.amazonaws.com/token";

/// Tokens are refreshed this long before their reported expiry.
pub(crate) const EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// A freshly minted access token together with its absolute expiry.
#[derive(Debug, Clone)]
pub struct FreshToken {
    pub access_token: SecretString,
    pub expires_at: Instant,
    /// Returned by the social provider only; attached to upstream requests.
    pub profile_arn: Option<String>,
}

/// Issues refresh RPCs against the two identity providers.
///
/// Base URLs are configurable so tests can point at local mock servers.
#[derive(Debug, Clone)]
pub struct TokenRefresher {
    client: reqwest::Client,
    social_url: String,
    idc_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocialRefreshResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    profile_arn: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdcRefreshResponse {
    access_token: String,
    expires_in: i64,
}

impl TokenRefresher {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_urls(client, SOCIAL_REFRESH_URL, IDC_REFRESH_URL)
    }

    pub fn with_urls(client: reqwest::Client, social_url: &str, idc_url: &str) -> Self {
        Self {
            client,
            social_url: social_url.to_owned(),
            idc_url: idc_url.to_owned(),
        }
    }

    /// Exchange a refresh token for an access token per the entry's provider.
    pub async fn refresh(&self, spec: &CredentialSpec) -> Result<FreshToken, RefreshError> {
        match spec.kind {
            ProviderKind::Social => self.refresh_social(spec).await,
            ProviderKind::Idc => self.refresh_idc(spec).await,
        }
    }

    async fn refresh_social(&self, spec: &CredentialSpec) -> Result<FreshToken, RefreshError> {
        let body = serde_json::json!({
            "refreshToken": spec.refresh_token.expose_secret(),
        });

        let response = self.client.post(&self.social_url).json(&body).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(status_error(status.as_u16(), response.text().await.unwrap_or_default()));
        }

        let parsed: SocialRefreshResponse = response
            .json()
            .await
            .map_err(|e| RefreshError::Malformed(e.to_string()))?;

        Ok(FreshToken {
            access_token: SecretString::from(parsed.access_token),
            expires_at: expiry(parsed.expires_in)?,
            profile_arn: parsed.profile_arn,
        })
    }

    async fn refresh_idc(&self, spec: &CredentialSpec) -> Result<FreshToken, RefreshError> {
        let body = serde_json::json!({
            "clientId": spec.client_id,
            "clientSecret": spec.client_secret.as_ref().map(ExposeSecret::expose_secret),
            "grantType": "refresh_token",
            "refreshToken": spec.refresh_token.expose_secret(),
        });

        let mut request = self.client.post(&self.idc_url).json(&body);

        // The OIDC endpoint insists on these exact headers.
        if let Some(host) = host_of(&self.idc_url) {
            request = request.header("Host", host);
        }
        request = request
            .header("x-amz-user-agent", "aws-sdk-js/2.1692.0 promise")
            .header("User-Agent", "node");

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(status_error(status.as_u16(), response.text().await.unwrap_or_default()));
        }

        let parsed: IdcRefreshResponse = response
            .json()
            .await
            .map_err(|e| RefreshError::Malformed(e.to_string()))?;

        Ok(FreshToken {
            access_token: SecretString::from(parsed.access_token),
            expires_at: expiry(parsed.expires_in)?,
            profile_arn: None,
        })
    }
}

fn status_error(status: u16, body: String) -> RefreshError {
    match status {
        401 | 403 => RefreshError::Unauthorized { status },
        _ => RefreshError::Provider { status, body },
    }
}

fn expiry(expires_in: i64) -> Result<Instant, RefreshError> {
    if expires_in <= 0 {
        return Err(RefreshError::Malformed(format!("non-positive expiresIn {expires_in}")));
    }

    Ok(Instant::now() + Duration::from_secs(expires_in as u64))
}

fn host_of(url: &str) -> Option<&str> {
    let rest = url.split_once("://")?.1;
    let authority = rest.split(['/', '?']).next()?;
    Some(authority)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::State, http::HeaderMap, routing::post};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct Captured {
        social: Arc<Mutex<Option<serde_json::Value>>>,
        idc: Arc<Mutex<Option<(HeaderMap, serde_json::Value)>>>,
    }

    async fn social_handler(
        State(captured): State<Captured>,
        Json(body): Json<serde_json::Value>,
    ) -> Json<serde_json::Value> {
        *captured.social.lock().expect("social capture") = Some(body);

        Json(serde_json::json!({
            "accessToken": "at-social",
            "expiresIn": 3600,
            "profileArn": "arn:aws:codewhisperer:us-east-1:1234:profile/test"
        }))
    }

    async fn idc_handler(
        State(captured): State<Captured>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> Json<serde_json::Value> {
        *captured.idc.lock().expect("idc capture") = Some((headers, body));

        Json(serde_json::json!({
            "accessToken": "at-idc",
            "expiresIn": 1800
        }))
    }

    async fn spawn_provider(captured: Captured) -> String {
        let app = Router::new()
            .route("/refreshToken", post(social_handler))
            .route("/token", post(idc_handler))
            .with_state(captured);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        format!("http://{address}")
    }

    fn social_spec(token: &str) -> CredentialSpec {
        CredentialSpec {
            kind: ProviderKind::Social,
            refresh_token: SecretString::from(token.to_owned()),
            client_id: None,
            client_secret: None,
        }
    }

    #[tokio::test]
    async fn social_refresh_sends_token_and_parses_profile_arn() {
        let captured = Captured::default();
        let base = spawn_provider(captured.clone()).await;

        let refresher = TokenRefresher::with_urls(
            reqwest::Client::new(),
            &format!("{base}/refreshToken"),
            &format!("{base}/token"),
        );

        let fresh = refresher.refresh(&social_spec("rt-1")).await.expect("refresh");

        assert_eq!(fresh.access_token.expose_secret(), "at-social");
        assert!(fresh.profile_arn.as_deref().is_some_and(|arn| arn.contains("profile")));

        let body = captured.social.lock().expect("capture").clone().expect("request seen");
        assert_eq!(body["refreshToken"], "rt-1");
    }

    #[tokio::test]
    async fn idc_refresh_sends_client_pair_and_grant_type() {
        let captured = Captured::default();
        let base = spawn_provider(captured.clone()).await;

        let refresher = TokenRefresher::with_urls(
            reqwest::Client::new(),
            &format!("{base}/refreshToken"),
            &format!("{base}/token"),
        );

        let spec = CredentialSpec {
            kind: ProviderKind::Idc,
            refresh_token: SecretString::from("rt-idc".to_owned()),
            client_id: Some("cid".to_owned()),
            client_secret: Some(SecretString::from("cs".to_owned())),
        };

        let fresh = refresher.refresh(&spec).await.expect("refresh");
        assert_eq!(fresh.access_token.expose_secret(), "at-idc");
        assert!(fresh.profile_arn.is_none());

        let (headers, body) = captured.idc.lock().expect("capture").clone().expect("request seen");
        assert_eq!(body["clientId"], "cid");
        assert_eq!(body["clientSecret"], "cs");
        assert_eq!(body["grantType"], "refresh_token");
        assert_eq!(headers.get("user-agent").and_then(|v| v.to_str().ok()), Some("node"));
        assert!(headers.contains_key("x-amz-user-agent"));
    }

    #[tokio::test]
    async fn unauthorized_status_maps_to_unauthorized_error() {
        let app = Router::new().route(
            "/refreshToken",
            post(|| async { (axum::http::StatusCode::FORBIDDEN, "expired") }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        let refresher = TokenRefresher::with_urls(
            reqwest::Client::new(),
            &format!("http://{address}/refreshToken"),
            &format!("http://{address}/token"),
        );

        let err = refresher.refresh(&social_spec("rt-1")).await.expect_err("403");
        assert!(matches!(err, RefreshError::Unauthorized { status: 403 }));
    }
}
