//! Request-signing collaborator for providers requiring signed calls.
//!
//! The signer is a pure strategy: identical inputs (timestamp included)
//! always produce identical header maps, so signatures are reproducible in
//! tests and across processes.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::http::HttpMethod;

const AMZ_DATETIME: &[FormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second]Z");
const AMZ_DATE: &[FormatItem<'static>] = format_description!("[year][month][day]");

/// Everything the signer needs to produce headers for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequest<'a> {
    pub method: HttpMethod,
    pub url: &'a str,
    pub body: &'a str,
    pub host: &'a str,
    /// Target operation header value, e.g. the vendor's RPC target.
    pub target: &'a str,
    pub timestamp: OffsetDateTime,
}

/// Credentials consumed by the signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub service: String,
}

/// Deterministic signed-headers producer.
pub trait RequestSigner: Send + Sync {
    fn signed_headers(
        &self,
        request: &SigningRequest<'_>,
        credentials: &SigningCredentials,
    ) -> BTreeMap<String, String>;
}

/// HMAC-SHA256 signer following the canonical-request / string-to-sign /
/// derived-key chain used by AWS-style APIs.
#[derive(Debug, Default, Clone, Copy)]
pub struct HmacSigner;

impl HmacSigner {
    fn canonical_request(
        request: &SigningRequest<'_>,
        headers: &BTreeMap<String, String>,
    ) -> String {
        let (path, query) = split_url(request.url);

        let canonical_headers = headers
            .iter()
            .map(|(name, value)| format!("{name}:{}\n", value.trim()))
            .collect::<String>();
        let signed_header_names = signed_header_list(headers);
        let payload_hash = hex_sha256(request.body.as_bytes());

        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            request.method.as_str(),
            path,
            query,
            canonical_headers,
            signed_header_names,
            payload_hash,
        )
    }

    fn string_to_sign(
        timestamp: &str,
        scope: &str,
        canonical_request: &str,
    ) -> String {
        format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            timestamp,
            scope,
            hex_sha256(canonical_request.as_bytes()),
        )
    }

    fn derive_key(credentials: &SigningCredentials, date: &str) -> Vec<u8> {
        let secret = format!("AWS4{}", credentials.secret_key);
        let k_date = hmac_sha256(secret.as_bytes(), date.as_bytes());
        let k_region = hmac_sha256(&k_date, credentials.region.as_bytes());
        let k_service = hmac_sha256(&k_region, credentials.service.as_bytes());
        hmac_sha256(&k_service, b"aws4_request")
    }
}

impl RequestSigner for HmacSigner {
    fn signed_headers(
        &self,
        request: &SigningRequest<'_>,
        credentials: &SigningCredentials,
    ) -> BTreeMap<String, String> {
        let timestamp = request
            .timestamp
            .format(AMZ_DATETIME)
            .unwrap_or_default();
        let date = request.timestamp.format(AMZ_DATE).unwrap_or_default();

        let mut headers = BTreeMap::new();
        headers.insert(String::from("content-encoding"), String::from("amz-1.0"));
        headers.insert(
            String::from("content-type"),
            String::from("application/json; charset=utf-8"),
        );
        headers.insert(String::from("host"), request.host.to_owned());
        headers.insert(String::from("x-amz-date"), timestamp.clone());
        headers.insert(String::from("x-amz-target"), request.target.to_owned());

        let scope = format!(
            "{}/{}/{}/aws4_request",
            date, credentials.region, credentials.service
        );
        let canonical_request = Self::canonical_request(request, &headers);
        let string_to_sign = Self::string_to_sign(&timestamp, &scope, &canonical_request);
        let key = Self::derive_key(credentials, &date);
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            credentials.access_key,
            scope,
            signed_header_list(&headers),
            signature,
        );
        headers.insert(String::from("authorization"), authorization);

        headers
    }
}

fn signed_header_list(headers: &BTreeMap<String, String>) -> String {
    headers
        .keys()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(";")
}

fn split_url(url: &str) -> (String, String) {
    let without_scheme = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    let path_and_query = without_scheme
        .split_once('/')
        .map(|(_, rest)| rest)
        .unwrap_or("");

    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, query),
        None => (path_and_query, ""),
    };

    (format!("/{path}"), query.to_owned())
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    const BLOCK_SIZE: usize = 64;

    let mut key_block = [0u8; BLOCK_SIZE];
    if key.len() > BLOCK_SIZE {
        let digest = Sha256::digest(key);
        key_block[..digest.len()].copy_from_slice(&digest);
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut inner = Sha256::new();
    let ipad: Vec<u8> = key_block.iter().map(|byte| byte ^ 0x36).collect();
    inner.update(&ipad);
    inner.update(message);
    let inner_digest = inner.finalize();

    let mut outer = Sha256::new();
    let opad: Vec<u8> = key_block.iter().map(|byte| byte ^ 0x5c).collect();
    outer.update(&opad);
    outer.update(inner_digest);
    outer.finalize().to_vec()
}
