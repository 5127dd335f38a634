// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Room authentication: token fetch, decode, and expiry-based reuse.
//!
//! Three endpoint shapes are supported. Public endpoints take the room id
//! plus a publishable API key; private endpoints take only the room id (the
//! caller's backend decides); custom endpoints delegate to a user-supplied
//! async callback. All three must yield a JSON body with a string `token`
//! field, a JWT whose payload carries the actor id assigned to this
//! connection.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::effects::epoch_ms;

/// Reuse margin: a cached token within this many seconds of expiry is
/// refetched rather than reused.
const EXPIRY_SKEW_SECS: u64 = 30;

/// Decoded auth token for one connection.
#[derive(Debug, Clone)]
pub struct AuthToken {
    /// Raw JWT, passed verbatim in the socket URL.
    pub raw: String,
    /// Actor id assigned by the server; prefix of this connection's ids.
    pub actor: u32,
    /// Stable user identifier, if the auth backend provided one.
    pub id: Option<String>,
    /// Opaque user info echoed to peers.
    pub info: Option<Value>,
    /// Absolute expiry, epoch seconds.
    pub expires_at: u64,
}

impl AuthToken {
    fn is_expired(&self, now_secs: u64) -> bool {
        self.expires_at <= now_secs + EXPIRY_SKEW_SECS
    }
}

/// Decode the payload segment of a JWT without signature verification.
///
/// The server remains the authority; the client only needs the claims to
/// seed its id factory and user identity.
pub fn parse_token(raw: &str) -> anyhow::Result<AuthToken> {
    let mut segments = raw.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_)) => payload,
        _ => anyhow::bail!("malformed token: expected three dot-separated segments"),
    };
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| anyhow::anyhow!("malformed token payload: {e}"))?;
    let claims: Value = serde_json::from_slice(&bytes)?;

    let actor = claims
        .get("actor")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow::anyhow!("token payload missing actor claim"))?;
    Ok(AuthToken {
        raw: raw.to_owned(),
        actor: actor as u32,
        id: claims.get("id").and_then(Value::as_str).map(str::to_owned),
        info: claims.get("info").cloned().filter(|i| !i.is_null()),
        expires_at: claims.get("exp").and_then(Value::as_u64).unwrap_or(0),
    })
}

/// User-supplied async auth callback: room id in, raw token out.
pub type AuthCallback =
    Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

/// Where tokens come from.
#[derive(Clone)]
pub enum AuthEndpoint {
    /// POST `{room, publicApiKey}` to a public authorization URL.
    Public { url: String, public_api_key: String },
    /// POST `{room}` to the caller's own backend.
    Private { url: String },
    /// Delegate to a user-supplied callback.
    Custom { callback: AuthCallback },
}

impl fmt::Debug for AuthEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public { url, .. } => f.debug_struct("Public").field("url", url).finish(),
            Self::Private { url } => f.debug_struct("Private").field("url", url).finish(),
            Self::Custom { .. } => f.write_str("Custom"),
        }
    }
}

/// Token fetcher with expiry-based caching.
pub struct AuthClient {
    endpoint: AuthEndpoint,
    http: reqwest::Client,
    cached: Option<AuthToken>,
}

impl AuthClient {
    pub fn new(endpoint: AuthEndpoint) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { endpoint, http, cached: None }
    }

    /// Fetch a token for `room_id`, reusing the cached one while unexpired.
    pub async fn fetch(&mut self, room_id: &str) -> anyhow::Result<AuthToken> {
        let now_secs = epoch_ms() / 1000;
        if let Some(cached) = &self.cached {
            if !cached.is_expired(now_secs) {
                return Ok(cached.clone());
            }
        }

        let raw = match &self.endpoint {
            AuthEndpoint::Public { url, public_api_key } => {
                self.post_for_token(
                    url,
                    serde_json::json!({ "room": room_id, "publicApiKey": public_api_key }),
                )
                .await?
            }
            AuthEndpoint::Private { url } => {
                self.post_for_token(url, serde_json::json!({ "room": room_id })).await?
            }
            AuthEndpoint::Custom { callback } => callback(room_id.to_owned()).await?,
        };

        let token = parse_token(&raw)?;
        self.cached = Some(token.clone());
        Ok(token)
    }

    async fn post_for_token(&self, url: &str, body: Value) -> anyhow::Result<String> {
        let resp = self.http.post(url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("auth endpoint returned {status}: {text}");
        }
        let value: Value = resp.json().await?;
        match value.get("token").and_then(Value::as_str) {
            Some(token) => Ok(token.to_owned()),
            None => anyhow::bail!("auth response has no token field"),
        }
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
