//! AWS Signature Version 4
//!
//! Signs requests with `host` and `x-amz-date` (plus the session token when
//! present). Paths are encoded twice and query parameters once, as every
//! service except S3 expects.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

// =============================================================================
// Credentials
// =============================================================================

/// Static credentials used for signing
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Result<Self> {
        let access_key_id = access_key_id.into();
        let secret_access_key = secret_access_key.into();
        if access_key_id.trim().is_empty() || secret_access_key.trim().is_empty() {
            return Err(Error::Configuration(
                "AWS access key ID and secret access key are required".into(),
            ));
        }
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: session_token.filter(|t| !t.trim().is_empty()),
        })
    }
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// =============================================================================
// Signing
// =============================================================================

/// Header values to attach to a signed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub amz_date: String,
    pub authorization: String,
    pub security_token: Option<String>,
}

/// Sign one request
pub fn sign(
    credentials: &AwsCredentials,
    region: &str,
    service: &str,
    method: &str,
    url: &Url,
    payload: &[u8],
    now: DateTime<Utc>,
) -> Result<SignedRequest> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    // Sorted by name
    let mut headers = vec![("host", host_header(url)?), ("x-amz-date", amz_date.clone())];
    if let Some(token) = &credentials.session_token {
        headers.push(("x-amz-security-token", token.clone()));
    }
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method,
        canonical_uri(url),
        canonical_query(url),
        canonical_headers,
        signed_headers,
        hex::encode(Sha256::digest(payload)),
    );

    let scope = format!("{}/{}/{}/aws4_request", date, region, service);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes())),
    );

    let key = signing_key(&credentials.secret_access_key, &date, region, service)?;
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

    Ok(SignedRequest {
        authorization: format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, credentials.access_key_id, scope, signed_headers, signature
        ),
        amz_date,
        security_token: credentials.session_token.clone(),
    })
}

/// Derive the per-day, per-region, per-service signing key
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Internal(format!("signing key rejected: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn host_header(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::Configuration(format!("endpoint {} has no host", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() || path == "/" {
        return "/".to_string();
    }
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            (
                urlencoding::encode(&k).into_owned(),
                urlencoding::encode(&v).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Encode parameters for a query string or form body
pub fn encode_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    const SECRET: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

    fn credentials(token: Option<&str>) -> AwsCredentials {
        AwsCredentials::new("AKIDEXAMPLE", SECRET, token.map(str::to_string)).unwrap()
    }

    #[test]
    fn test_signing_key_matches_reference() {
        let key = signing_key(SECRET, "20120215", "us-east-1", "iam").unwrap();
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn test_get_vanilla_signature() {
        let url = Url::parse("https://example.amazon.com/").unwrap();
        let now = Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap();

        let signed = sign(&credentials(None), "us-east-1", "service", "GET", &url, b"", now).unwrap();

        assert_eq!(signed.amz_date, "20150830T123600Z");
        assert_eq!(
            signed.authorization,
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request, \
             SignedHeaders=host;x-amz-date, \
             Signature=5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
        );
        assert_eq!(signed.security_token, None);
    }

    #[test]
    fn test_session_token_is_signed() {
        let url = Url::parse("http://127.0.0.1:4566/clusters/c1/node-groups?maxResults=100").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let signed = sign(&credentials(Some("token")), "eu-west-1", "eks", "GET", &url, b"", now).unwrap();

        assert!(signed
            .authorization
            .contains("SignedHeaders=host;x-amz-date;x-amz-security-token"));
        assert!(signed.authorization.contains("/20240301/eu-west-1/eks/aws4_request"));
        assert_eq!(signed.security_token.as_deref(), Some("token"));
    }

    #[test]
    fn test_canonical_query_sorted_and_encoded() {
        let url = Url::parse("https://eks.us-east-1.amazonaws.com/c?nextToken=a%2Bb%2F%3D&maxResults=10").unwrap();
        assert_eq!(canonical_query(&url), "maxResults=10&nextToken=a%2Bb%2F%3D");
        assert_eq!(canonical_uri(&url), "/c");
    }

    #[test]
    fn test_form_encoding() {
        let pairs = vec![
            ("Action".to_string(), "CreateTags".to_string()),
            ("Tag.1.Value".to_string(), "NO DELETE/+".to_string()),
        ];
        assert_eq!(encode_pairs(&pairs), "Action=CreateTags&Tag.1.Value=NO%20DELETE%2F%2B");
    }

    #[test]
    fn test_blank_credentials_rejected() {
        assert_matches!(AwsCredentials::new("", SECRET, None), Err(Error::Configuration(_)));
        let creds = AwsCredentials::new("AKID", SECRET, Some(" ".into())).unwrap();
        assert_eq!(creds.session_token, None);
        assert!(!format!("{:?}", creds).contains(SECRET));
    }
}
