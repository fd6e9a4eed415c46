// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Request signing for partner APIs
//!
//! Signing key derivation (partner and bastion compute the same value):
//!
//! ```text
//! signing_key = HMAC-SHA256(provider_secret, "bastion-v1/<yyyymmdd>/<provider>")
//! ```
//!
//! Canonical request, one field per line:
//!
//! ```text
//! <METHOD>
//! <path?query>
//! <unix timestamp>
//! <request id>
//! <hex sha256 of body>
//! ```
//!
//! `X-Bastion-Signature` is the hex HMAC-SHA256 of the canonical request under
//! the signing key.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::credential::{ActiveCredential, ProviderId};
use crate::domain::outbound::{HttpMethod, SignedRequest};
use crate::domain::tenant::{SessionId, TenantId};

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_TIMESTAMP: &str = "X-Bastion-Timestamp";
pub const HEADER_SIGNATURE: &str = "X-Bastion-Signature";
pub const HEADER_KEY_ID: &str = "X-Bastion-Key-Id";
pub const HEADER_CREDENTIAL_VERSION: &str = "X-Bastion-Credential-Version";
pub const HEADER_CONTENT_SHA256: &str = "X-Bastion-Content-Sha256";
pub const HEADER_REQUEST_ID: &str = "X-Request-Id";

const DERIVATION_PREFIX: &str = "bastion-v1";

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of any size"),
    };
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Per-day, per-provider signing key derived from the stored secret.
pub fn derive_signing_key(secret: &[u8], provider: &ProviderId, date: NaiveDate) -> [u8; 32] {
    let scope = format!("{}/{}/{}", DERIVATION_PREFIX, date.format("%Y%m%d"), provider);
    hmac_sha256(secret, scope.as_bytes())
}

pub fn key_id(provider: &ProviderId, version: u32, date: NaiveDate) -> String {
    format!("{}/v{}/{}", provider, version, date.format("%Y%m%d"))
}

pub fn content_sha256(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

pub fn canonical_request(
    method: &str,
    path_and_query: &str,
    timestamp: i64,
    request_id: &str,
    body_digest: &str,
) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}",
        method.to_ascii_uppercase(),
        path_and_query,
        timestamp,
        request_id,
        body_digest
    )
}

fn path_and_query(url: &url::Url) -> String {
    match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    }
}

/// Inputs that bind a signed request to its originating context.
pub struct SigningInput<'a> {
    pub method: HttpMethod,
    pub url: &'a url::Url,
    pub headers: &'a [(String, String)],
    pub body: Option<Vec<u8>>,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub session_id: SessionId,
}

/// Build a [`SignedRequest`] from derived credential material.
pub fn sign_request(credential: &ActiveCredential, input: SigningInput<'_>) -> SignedRequest {
    let request_id = Uuid::new_v4().to_string();
    let digest = content_sha256(input.body.as_deref().unwrap_or_default());
    let ts = input.timestamp.timestamp();
    let canonical = canonical_request(
        input.method.as_str(),
        &path_and_query(input.url),
        ts,
        &request_id,
        &digest,
    );
    let signature = hex::encode(hmac_sha256(credential.signing_key(), canonical.as_bytes()));

    let mut headers: Vec<(String, String)> = input
        .headers
        .iter()
        .filter(|(name, _)| !name.to_ascii_lowercase().starts_with("x-bastion-"))
        .cloned()
        .collect();
    if input.body.is_some() {
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
    }
    headers.push((HEADER_TIMESTAMP.to_string(), ts.to_string()));
    headers.push((HEADER_SIGNATURE.to_string(), signature.clone()));
    headers.push((HEADER_KEY_ID.to_string(), credential.key_id().to_string()));
    headers.push((HEADER_CREDENTIAL_VERSION.to_string(), credential.version().to_string()));
    headers.push((HEADER_CONTENT_SHA256.to_string(), digest));
    headers.push((HEADER_REQUEST_ID.to_string(), request_id));

    SignedRequest {
        method: input.method,
        url: input.url.to_string(),
        headers,
        body: input.body,
        signature,
        timestamp: input.timestamp,
        tenant_id: input.tenant_id,
        session_id: input.session_id,
        credential_version: credential.version(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("missing header {0}")]
    MissingHeader(&'static str),

    #[error("malformed header {0}")]
    MalformedHeader(&'static str),

    #[error("request timestamp outside the accepted window")]
    Stale,

    #[error("body digest does not match X-Bastion-Content-Sha256")]
    DigestMismatch,

    #[error("signature mismatch")]
    Mismatch,
}

fn find_header<'a>(headers: &'a [(String, String)], name: &'static str) -> Result<&'a str, SignatureError> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
        .ok_or(SignatureError::MissingHeader(name))
}

/// Partner-side verification of a bastion-signed request.
#[allow(clippy::too_many_arguments)]
pub fn verify_signed_headers(
    secret: &[u8],
    provider: &ProviderId,
    method: &str,
    path_and_query: &str,
    headers: &[(String, String)],
    body: &[u8],
    now: DateTime<Utc>,
    max_skew_secs: i64,
) -> Result<(), SignatureError> {
    let ts: i64 = find_header(headers, HEADER_TIMESTAMP)?
        .parse()
        .map_err(|_| SignatureError::MalformedHeader(HEADER_TIMESTAMP))?;
    if (now.timestamp() - ts).abs() > max_skew_secs {
        return Err(SignatureError::Stale);
    }

    let digest = content_sha256(body);
    let claimed_digest = find_header(headers, HEADER_CONTENT_SHA256)?;
    if digest.as_bytes().ct_eq(claimed_digest.as_bytes()).unwrap_u8() != 1 {
        return Err(SignatureError::DigestMismatch);
    }

    let request_id = find_header(headers, HEADER_REQUEST_ID)?;
    let provided = hex::decode(find_header(headers, HEADER_SIGNATURE)?)
        .map_err(|_| SignatureError::MalformedHeader(HEADER_SIGNATURE))?;

    let date = Utc
        .timestamp_opt(ts, 0)
        .single()
        .ok_or(SignatureError::MalformedHeader(HEADER_TIMESTAMP))?
        .date_naive();
    let key = derive_signing_key(secret, provider, date);
    let canonical = canonical_request(method, path_and_query, ts, request_id, &digest);
    let expected = hmac_sha256(&key, canonical.as_bytes());

    if provided.ct_eq(expected.as_slice()).unwrap_u8() == 1 {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential_for(secret: &[u8], provider: &ProviderId, now: DateTime<Utc>) -> ActiveCredential {
        let date = now.date_naive();
        ActiveCredential::new(
            provider.clone(),
            2,
            key_id(provider, 2, date),
            now + chrono::Duration::minutes(5),
            derive_signing_key(secret, provider, date),
        )
    }

    fn signed(secret: &[u8], body: Option<Vec<u8>>) -> (ProviderId, SignedRequest) {
        let provider = ProviderId::new("bank-api").unwrap();
        let now = Utc::now();
        let url = url::Url::parse("https://bank.example.com/v1/transfers?dry_run=true").unwrap();
        let credential = credential_for(secret, &provider, now);
        let request = sign_request(
            &credential,
            SigningInput {
                method: HttpMethod::Post,
                url: &url,
                headers: &[("X-Bastion-Signature".to_string(), "forged".to_string())],
                body,
                timestamp: now,
                tenant_id: TenantId::new(),
                session_id: SessionId::new(),
            },
        );
        (provider, request)
    }

    #[test]
    fn test_signed_request_verifies() {
        let body = br#"{"amount":100}"#.to_vec();
        let (provider, request) = signed(b"partner-secret", Some(body.clone()));

        assert_eq!(request.credential_version, 2);
        // caller-supplied bastion headers are dropped
        assert_eq!(
            request.headers.iter().filter(|(k, _)| k == HEADER_SIGNATURE).count(),
            1
        );
        let result = verify_signed_headers(
            b"partner-secret",
            &provider,
            "POST",
            "/v1/transfers?dry_run=true",
            &request.headers,
            &body,
            Utc::now(),
            300,
        );
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_tampered_body_or_wrong_secret_fails() {
        let body = br#"{"amount":100}"#.to_vec();
        let (provider, request) = signed(b"partner-secret", Some(body));

        let tampered = verify_signed_headers(
            b"partner-secret",
            &provider,
            "POST",
            "/v1/transfers?dry_run=true",
            &request.headers,
            br#"{"amount":999}"#,
            Utc::now(),
            300,
        );
        assert_eq!(tampered, Err(SignatureError::DigestMismatch));

        let wrong_secret = verify_signed_headers(
            b"other-secret",
            &provider,
            "POST",
            "/v1/transfers?dry_run=true",
            &request.headers,
            br#"{"amount":100}"#,
            Utc::now(),
            300,
        );
        assert_eq!(wrong_secret, Err(SignatureError::Mismatch));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let (provider, request) = signed(b"partner-secret", None);
        let result = verify_signed_headers(
            b"partner-secret",
            &provider,
            "POST",
            "/v1/transfers?dry_run=true",
            &request.headers,
            b"",
            Utc::now() + chrono::Duration::minutes(10),
            300,
        );
        assert_eq!(result, Err(SignatureError::Stale));
    }

    #[test]
    fn test_key_derivation_is_scoped_to_day_and_provider() {
        let bank = ProviderId::new("bank-api").unwrap();
        let tax = ProviderId::new("tax-api").unwrap();
        let d1 = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert_ne!(derive_signing_key(b"s", &bank, d1), derive_signing_key(b"s", &bank, d2));
        assert_ne!(derive_signing_key(b"s", &bank, d1), derive_signing_key(b"s", &tax, d1));
        assert_eq!(key_id(&bank, 4, d1), "bank-api/v4/20260301");
    }
}
