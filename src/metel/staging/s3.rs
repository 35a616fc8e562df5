//! S3 staging.
//!
//! Objects are written with path-style `PUT {endpoint}/{bucket}/{key}`
//! requests signed with AWS Signature Version 4. Settings come from the
//! staging parameters:
//!
//! - `AWS_REGION` (default `us-east-1`)
//! - `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY`
//! - `AWS_ENDPOINT_URL` for S3-compatible stores such as MinIO

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::StagingConfig;
use crate::error::{MetisError, Result};

use super::{join_key, StagingProvider};

const DEFAULT_REGION: &str = "us-east-1";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 (RFC 2104).
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| MetisError::Staging(format!("invalid signing key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Derives the SigV4 signing key for a day, region and service.
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<[u8; 32]> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encodes an object key, keeping `/` separators.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// Headers of a signed PUT.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedRequest {
    pub url: String,
    pub amz_date: String,
    pub content_sha256: String,
    pub authorization: String,
}

#[derive(Debug, Clone)]
struct Credentials {
    access_key: String,
    secret_key: String,
}

pub struct S3Provider {
    http: reqwest::Client,
    bucket: String,
    prefix: String,
    region: String,
    endpoint: Url,
    credentials: Option<Credentials>,
}

impl S3Provider {
    pub fn new(config: &StagingConfig) -> Result<Self> {
        let param = |name: &str| {
            config
                .parameters
                .get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let region = param("AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string());
        let endpoint = param("AWS_ENDPOINT_URL")
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", region));
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| MetisError::Config(format!("invalid AWS_ENDPOINT_URL {}: {}", endpoint, e)))?;

        let credentials = match (param("AWS_ACCESS_KEY_ID"), param("AWS_SECRET_ACCESS_KEY")) {
            (Some(access_key), Some(secret_key)) => Some(Credentials {
                access_key,
                secret_key,
            }),
            _ => None,
        };

        Ok(Self {
            http: reqwest::Client::new(),
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
            region,
            endpoint,
            credentials,
        })
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Signs a path-style PUT of `body` to `key` at time `now`.
    pub fn sign_put(&self, key: &str, body: &[u8], now: DateTime<Utc>) -> Result<SignedRequest> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            MetisError::Staging(
                "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY staging parameters are required"
                    .to_string(),
            )
        })?;

        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let content_sha256 = sha256_hex(body);

        let base_path = self.endpoint.path().trim_end_matches('/');
        let canonical_uri = format!("{}/{}/{}", base_path, encode_key(&self.bucket), encode_key(key));
        let canonical_request = format!(
            "PUT\n{}\n\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n\n{}\n{}",
            canonical_uri,
            self.host(),
            content_sha256,
            amz_date,
            SIGNED_HEADERS,
            content_sha256
        );

        let scope = format!("{}/{}/s3/aws4_request", date, self.region);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );
        let key = signing_key(&credentials.secret_key, &date, &self.region, "s3")?;
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

        Ok(SignedRequest {
            url: format!(
                "{}://{}{}",
                self.endpoint.scheme(),
                self.host(),
                canonical_uri
            ),
            amz_date,
            content_sha256,
            authorization: format!(
                "{} Credential={}/{}, SignedHeaders={}, Signature={}",
                ALGORITHM, credentials.access_key, scope, SIGNED_HEADERS, signature
            ),
        })
    }
}

#[async_trait]
impl StagingProvider for S3Provider {
    fn url(&self, run_id: &str) -> String {
        format!("s3://{}/{}", self.bucket, join_key(&[&self.prefix, run_id]))
    }

    async fn upload_file(&self, local: &Path, remote_key: &str) -> Result<()> {
        let body = tokio::fs::read(local).await?;
        let signed = self.sign_put(remote_key, &body, Utc::now())?;
        debug!("Uploading {} to {}", local.display(), signed.url);

        let response = self
            .http
            .put(&signed.url)
            .header("x-amz-date", &signed.amz_date)
            .header("x-amz-content-sha256", &signed.content_sha256)
            .header(reqwest::header::AUTHORIZATION, &signed.authorization)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MetisError::Staging(format!(
                "upload of {} answered {}: {}",
                remote_key,
                status,
                text.trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, Uri};
    use axum::routing::put;
    use axum::Router;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    type Seen = Arc<Mutex<Vec<(String, String, Vec<u8>)>>>;

    fn config(endpoint: Option<&str>) -> StagingConfig {
        let mut parameters = BTreeMap::from([
            ("AWS_ACCESS_KEY_ID".to_string(), "AKID".to_string()),
            ("AWS_SECRET_ACCESS_KEY".to_string(), "secret".to_string()),
        ]);
        if let Some(endpoint) = endpoint {
            parameters.insert("AWS_ENDPOINT_URL".to_string(), endpoint.to_string());
        }
        StagingConfig {
            parameters,
            ..Default::default()
        }
    }

    #[test]
    fn test_hmac_rfc4231_case_2() {
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f083d9a39cc84cfac8b6c2f5b7b"
        );
    }

    #[test]
    fn test_hmac_long_key_is_hashed() {
        // RFC 4231 test case 6: a 131-byte key is hashed before use
        let key = [0xaa_u8; 131];
        let mac = hmac_sha256(&key, b"Test Using Larger Than Block-Size Key - Hash Key First")
            .unwrap();
        assert_eq!(
            hex::encode(mac),
            "60e431591ee0b67f0d8a26aacbf5b77f8e0bc6213728c5140546040f0ee37f54"
        );
    }

    #[test]
    fn test_signing_key_reference() {
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_url_and_default_endpoint() {
        let provider = S3Provider::new(&config(None)).unwrap();
        assert_eq!(provider.url("r1"), "s3://metis/workflows/r1");
        assert_eq!(provider.host(), "s3.us-east-1.amazonaws.com");
    }

    #[test]
    fn test_sign_put_layout() {
        let provider = S3Provider::new(&config(Some("http://minio:9000"))).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();

        let signed = provider.sign_put("workflows/r1/out file.txt", b"data", now).unwrap();
        assert_eq!(signed.url, "http://minio:9000/metis/workflows/r1/out%20file.txt");
        assert_eq!(signed.amz_date, "20250102T030405Z");
        assert!(signed
            .authorization
            .starts_with("AWS4-HMAC-SHA256 Credential=AKID/20250102/us-east-1/s3/aws4_request, "));
        assert!(signed.authorization.contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date"));

        let again = provider.sign_put("workflows/r1/out file.txt", b"data", now).unwrap();
        assert_eq!(signed, again);
    }

    #[test]
    fn test_missing_credentials() {
        let provider = S3Provider::new(&StagingConfig::default()).unwrap();
        assert!(matches!(
            provider.sign_put("k", b"", Utc::now()),
            Err(MetisError::Staging(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_file() {
        let seen: Seen = Arc::default();
        let router = Router::new()
            .route(
                "/{*key}",
                put(
                    |State(seen): State<Seen>, uri: Uri, headers: HeaderMap, body: Bytes| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        seen.lock().unwrap().push((uri.path().to_string(), auth, body.to_vec()));
                        ""
                    },
                ),
            )
            .with_state(seen.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "hello").unwrap();

        let provider = S3Provider::new(&config(Some(&format!("http://{}", addr)))).unwrap();
        provider.upload_file(&file, "workflows/r1/a.txt").await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "/metis/workflows/r1/a.txt");
        assert!(seen[0].1.starts_with("AWS4-HMAC-SHA256 Credential=AKID/"));
        assert_eq!(seen[0].2, b"hello");
    }
}
