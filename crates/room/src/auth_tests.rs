// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::json;

fn jwt(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    format!("{header}.{payload}.sig")
}

#[test]
fn parse_token_extracts_claims() -> anyhow::Result<()> {
    let raw = jwt(json!({
        "actor": 7,
        "id": "user-7",
        "info": {"name": "Ada"},
        "exp": 4_000_000_000u64,
    }));
    let token = parse_token(&raw)?;

    assert_eq!(token.actor, 7);
    assert_eq!(token.id.as_deref(), Some("user-7"));
    assert_eq!(token.info, Some(json!({"name": "Ada"})));
    assert_eq!(token.expires_at, 4_000_000_000);
    assert_eq!(token.raw, raw);
    Ok(())
}

#[test]
fn parse_token_tolerates_missing_optional_claims() -> anyhow::Result<()> {
    let token = parse_token(&jwt(json!({"actor": 3})))?;
    assert_eq!(token.actor, 3);
    assert!(token.id.is_none());
    assert!(token.info.is_none());
    assert_eq!(token.expires_at, 0);
    Ok(())
}

#[test]
fn parse_token_requires_actor() {
    assert!(parse_token(&jwt(json!({"id": "nobody"}))).is_err());
}

#[test]
fn parse_token_rejects_malformed_input() {
    assert!(parse_token("not-a-jwt").is_err());
    assert!(parse_token("one.two").is_err());
    assert!(parse_token("a.!!!.c").is_err());
}

#[test]
fn null_info_claim_is_treated_as_absent() -> anyhow::Result<()> {
    let token = parse_token(&jwt(json!({"actor": 1, "info": null})))?;
    assert!(token.info.is_none());
    Ok(())
}

#[test]
fn endpoint_debug_hides_credentials() {
    let endpoint = AuthEndpoint::Public {
        url: "https://auth.example.com".to_owned(),
        public_api_key: "pk_secret".to_owned(),
    };
    let rendered = format!("{endpoint:?}");
    assert!(rendered.contains("auth.example.com"));
    assert!(!rendered.contains("pk_secret"));
}
