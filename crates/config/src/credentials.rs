//! Credential inputs: either a JSON array in `KIRO_AUTH_TOKEN` or the legacy
//! single-entry variables.

use std::collections::HashSet;

use anyhow::{Context, bail};
use secrecy::SecretString;
use serde::Deserialize;

/// Which identity provider refreshes this credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Desktop social login; refreshes against the Kiro auth endpoint.
    #[default]
    Social,
    /// AWS IAM Identity Center; refreshes against the OIDC token endpoint.
    Idc,
}

/// One configured refresh credential.
#[derive(Debug, Clone)]
pub struct CredentialSpec {
    pub kind: ProviderKind,
    pub refresh_token: SecretString,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
}

/// Wire shape of one entry in the `KIRO_AUTH_TOKEN` JSON array.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCredential {
    refresh_token: String,
    #[serde(default)]
    auth: Option<ProviderKind>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
}

pub(crate) fn from_env() -> anyhow::Result<Vec<CredentialSpec>> {
    let default_kind = match super::read("AUTH_METHOD").as_deref() {
        None => ProviderKind::default(),
        Some("social") => ProviderKind::Social,
        Some("idc") => ProviderKind::Idc,
        Some(other) => bail!("AUTH_METHOD must be 'social' or 'idc', got '{other}'"),
    };

    let mut raw = Vec::new();

    if let Some(json) = super::read("KIRO_AUTH_TOKEN") {
        raw = parse_json(&json).context("failed to parse KIRO_AUTH_TOKEN")?;
    }

    // Legacy single-entry variables, appended after the JSON array so the
    // array wins on duplicates.
    if let Some(token) = super::read("AWS_REFRESHTOKEN") {
        raw.push(RawCredential {
            refresh_token: token,
            auth: Some(ProviderKind::Social),
            client_id: None,
            client_secret: None,
        });
    }

    if let Some(token) = super::read("IDC_REFRESH_TOKEN") {
        raw.push(RawCredential {
            refresh_token: token,
            auth: Some(ProviderKind::Idc),
            client_id: super::read("IDC_CLIENT_ID"),
            client_secret: super::read("IDC_CLIENT_SECRET"),
        });
    }

    if raw.is_empty() {
        bail!(
            "No upstream credentials configured. Provide at least one of:\n\
             \n  KIRO_AUTH_TOKEN='[{{\"refreshToken\":\"...\",\"auth\":\"social\"}}]'\n\
             \n  AWS_REFRESHTOKEN=...\n\
             \n  IDC_REFRESH_TOKEN=... IDC_CLIENT_ID=... IDC_CLIENT_SECRET=..."
        );
    }

    let mut seen = HashSet::new();
    let mut specs = Vec::new();

    for entry in raw {
        if !seen.insert(entry.refresh_token.clone()) {
            log::warn!("dropping duplicate credential entry (same refresh token)");
            continue;
        }

        let kind = entry.auth.unwrap_or(default_kind);

        if kind == ProviderKind::Idc && (entry.client_id.is_none() || entry.client_secret.is_none()) {
            bail!("IdC credential entries require both clientId and clientSecret");
        }

        specs.push(CredentialSpec {
            kind,
            refresh_token: SecretString::from(entry.refresh_token),
            client_id: entry.client_id,
            client_secret: entry.client_secret.map(SecretString::from),
        });
    }

    Ok(specs)
}

/// Accepts either a JSON array of entries or a bare single entry.
fn parse_json(json: &str) -> anyhow::Result<Vec<RawCredential>> {
    if let Ok(entries) = serde_json::from_str::<Vec<RawCredential>>(json) {
        return Ok(entries);
    }

    let single: RawCredential = serde_json::from_str(json)?;
    Ok(vec![single])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_with(vars: &[(&'static str, &'static str)]) -> anyhow::Result<Vec<CredentialSpec>> {
        let names = [
            "AUTH_METHOD",
            "KIRO_AUTH_TOKEN",
            "AWS_REFRESHTOKEN",
            "IDC_REFRESH_TOKEN",
            "IDC_CLIENT_ID",
            "IDC_CLIENT_SECRET",
        ];
        let env: Vec<(&str, Option<&str>)> = names
            .into_iter()
            .map(|name| (name, vars.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)))
            .collect();

        temp_env::with_vars(env, from_env)
    }

    #[test]
    fn json_array_parses_both_kinds() {
        let specs = parse_with(&[(
            "KIRO_AUTH_TOKEN",
            r#"[
                {"refreshToken":"rt-social"},
                {"refreshToken":"rt-idc","auth":"idc","clientId":"cid","clientSecret":"cs"}
            ]"#,
        )])
        .expect("valid credentials");

        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].kind, ProviderKind::Social);
        assert_eq!(specs[1].kind, ProviderKind::Idc);
        assert_eq!(specs[1].client_id.as_deref(), Some("cid"));
    }

    #[test]
    fn bare_object_is_accepted() {
        let specs = parse_with(&[("KIRO_AUTH_TOKEN", r#"{"refreshToken":"rt-1"}"#)]).expect("valid credentials");
        assert_eq!(specs.len(), 1);
    }

    #[test]
    fn duplicates_are_dropped_first_wins() {
        let specs = parse_with(&[
            (
                "KIRO_AUTH_TOKEN",
                r#"[{"refreshToken":"rt-1"},{"refreshToken":"rt-1","auth":"idc","clientId":"c","clientSecret":"s"}]"#,
            ),
            ("AWS_REFRESHTOKEN", "rt-1"),
        ])
        .expect("valid credentials");

        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].kind, ProviderKind::Social);
    }

    #[test]
    fn legacy_idc_triple_is_supported() {
        let specs = parse_with(&[
            ("IDC_REFRESH_TOKEN", "rt-idc"),
            ("IDC_CLIENT_ID", "cid"),
            ("IDC_CLIENT_SECRET", "cs"),
        ])
        .expect("valid credentials");

        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].kind, ProviderKind::Idc);
    }

    #[test]
    fn idc_without_client_pair_is_rejected() {
        let err = parse_with(&[("KIRO_AUTH_TOKEN", r#"[{"refreshToken":"rt","auth":"idc"}]"#)])
            .expect_err("missing client pair");
        assert!(err.to_string().contains("clientId"));
    }

    #[test]
    fn auth_method_sets_the_default_kind() {
        let err = parse_with(&[
            ("AUTH_METHOD", "idc"),
            ("KIRO_AUTH_TOKEN", r#"[{"refreshToken":"rt"}]"#),
        ])
        .expect_err("defaulted to idc without client pair");
        assert!(err.to_string().contains("clientId"));
    }

    #[test]
    fn no_credentials_is_a_startup_error() {
        let err = parse_with(&[]).expect_err("nothing configured");
        assert!(err.to_string().contains("No upstream credentials"));
    }
}
