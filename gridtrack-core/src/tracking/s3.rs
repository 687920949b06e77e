//! Minimal S3-compatible object client (MinIO, AWS) with SigV4 signing.
//!
//! Only path-style `PUT` and `GET` of single objects are needed to store and
//! retrieve run artifacts.

use crate::config::ArtifactStoreConfig;
use crate::error::ArtifactError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

/// Static access key pair.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

/// Location of an object: `s3://bucket/key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
}

impl S3Location {
    /// Parse `s3://bucket[/prefix]`.
    pub fn parse(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix("s3://")?;
        let (bucket, key) = match rest.split_once('/') {
            Some((b, k)) => (b, k.trim_matches('/')),
            None => (rest, ""),
        };
        if bucket.is_empty() {
            return None;
        }
        Some(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    /// Append a `/`-separated relative path to the key.
    pub fn join(&self, rel: &str) -> Self {
        let rel = rel.trim_matches('/');
        let key = if self.key.is_empty() {
            rel.to_string()
        } else if rel.is_empty() {
            self.key.clone()
        } else {
            format!("{}/{}", self.key, rel)
        };
        Self {
            bucket: self.bucket.clone(),
            key,
        }
    }
}

/// Path-style S3 client.
#[derive(Debug, Clone)]
pub struct S3Client {
    http: reqwest::Client,
    endpoint: String,
    region: String,
    credentials: Option<Credentials>,
}

impl S3Client {
    pub fn new(http: reqwest::Client, store: &ArtifactStoreConfig) -> Self {
        let endpoint = store
            .endpoint_url
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", store.region));
        let credentials = match (&store.access_key_id, &store.secret_access_key) {
            (Some(id), Some(secret)) => Some(Credentials {
                access_key_id: id.clone(),
                secret_access_key: secret.clone(),
            }),
            _ => None,
        };
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            region: store.region.clone(),
            credentials,
        }
    }

    fn object_url(&self, location: &S3Location) -> (String, String) {
        let path = canonical_path(&location.bucket, &location.key);
        (format!("{}{}", self.endpoint, path), path)
    }

    fn signed(
        &self,
        method: reqwest::Method,
        location: &S3Location,
        payload: &[u8],
    ) -> Result<reqwest::RequestBuilder, String> {
        let (url, path) = self.object_url(location);
        let parsed = url::Url::parse(&url).map_err(|e| format!("invalid endpoint {url}: {e}"))?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            (None, _) => return Err(format!("endpoint {url} has no host")),
        };

        let mut request = self.http.request(method.clone(), &url);
        if let Some(creds) = &self.credentials {
            let headers = sign(
                method.as_str(),
                &host,
                &path,
                payload,
                Utc::now(),
                &self.region,
                creds,
            );
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }
        Ok(request)
    }

    pub async fn put_object(&self, location: &S3Location, bytes: Vec<u8>) -> Result<(), ArtifactError> {
        let display = format!("s3://{}/{}", location.bucket, location.key);
        let upload_err = |message: String| ArtifactError::Upload {
            path: display.clone(),
            message,
        };
        let request = self
            .signed(reqwest::Method::PUT, location, &bytes)
            .map_err(upload_err)?;
        let response = request
            .body(bytes)
            .send()
            .await
            .map_err(|e| upload_err(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(upload_err(format!("status {status}: {body}")));
        }
        Ok(())
    }

    pub async fn get_object(&self, location: &S3Location) -> Result<Vec<u8>, ArtifactError> {
        let display = format!("s3://{}/{}", location.bucket, location.key);
        let download_err = |message: String| ArtifactError::Download {
            path: display.clone(),
            message,
        };
        let request = self
            .signed(reqwest::Method::GET, location, b"")
            .map_err(download_err)?;
        let response = request
            .send()
            .await
            .map_err(|e| download_err(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(download_err(format!("status {status}: {body}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| download_err(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// `/bucket/key` with every segment percent-encoded the way S3 expects.
pub fn canonical_path(bucket: &str, key: &str) -> String {
    let mut path = format!("/{}", urlencoding::encode(bucket));
    for segment in key.split('/').filter(|s| !s.is_empty()) {
        path.push('/');
        path.push_str(&urlencoding::encode(segment));
    }
    path
}

fn hex_sha256(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the SigV4 signing key for a date (`YYYYMMDD`), region and service.
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Headers that authenticate a request without a query string.
pub fn sign(
    method: &str,
    host: &str,
    path: &str,
    payload: &[u8],
    now: DateTime<Utc>,
    region: &str,
    creds: &Credentials,
) -> Vec<(&'static str, String)> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let payload_hash = hex_sha256(payload);

    let canonical_headers =
        format!("host:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n");
    let canonical_request =
        format!("{method}\n{path}\n\n{canonical_headers}\n{SIGNED_HEADERS}\n{payload_hash}");

    let scope = format!("{date}/{region}/{SERVICE}/aws4_request");
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex_sha256(canonical_request.as_bytes())
    );

    let key = signing_key(&creds.secret_access_key, &date, region, SERVICE);
    let signature: String = hmac_sha256(&key, string_to_sign.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();

    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
        creds.access_key_id
    );

    vec![
        ("x-amz-date", amz_date),
        ("x-amz-content-sha256", payload_hash),
        ("authorization", authorization),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn creds() -> Credentials {
        Credentials {
            access_key_id: "minio".into(),
            secret_access_key: "minio123".into(),
        }
    }

    #[test]
    fn test_signing_key_matches_aws_reference() {
        // Reference derivation from the AWS SigV4 documentation.
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        let hex: String = key.iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(
            hex,
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_empty_payload_hash() {
        assert_eq!(
            hex_sha256(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sign_is_deterministic_and_well_formed() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let a = sign("PUT", "localhost:9000", "/mlflow-artifacts/1/r/model.json", b"{}", now, "us-east-1", &creds());
        let b = sign("PUT", "localhost:9000", "/mlflow-artifacts/1/r/model.json", b"{}", now, "us-east-1", &creds());
        assert_eq!(a, b);

        let auth = &a.iter().find(|(k, _)| *k == "authorization").unwrap().1;
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=minio/20240501/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature="
        ));
        let signature = auth.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);

        let date = &a.iter().find(|(k, _)| *k == "x-amz-date").unwrap().1;
        assert_eq!(date, "20240501T123000Z");

        let other = sign("GET", "localhost:9000", "/mlflow-artifacts/1/r/model.json", b"{}", now, "us-east-1", &creds());
        assert_ne!(a, other);
    }

    #[test]
    fn test_location_parse_and_join() {
        let root = S3Location::parse("s3://mlflow-artifacts/1/abc/artifacts/").unwrap();
        assert_eq!(root.bucket, "mlflow-artifacts");
        assert_eq!(root.key, "1/abc/artifacts");
        assert_eq!(root.join("model/model.json").key, "1/abc/artifacts/model/model.json");

        let bare = S3Location::parse("s3://bucket").unwrap();
        assert_eq!(bare.join("x").key, "x");
        assert!(S3Location::parse("s3:///key").is_none());
        assert!(S3Location::parse("gs://bucket").is_none());
    }

    #[test]
    fn test_canonical_path_encodes_segments() {
        assert_eq!(
            canonical_path("bucket", "a b/c+d/MLmodel"),
            "/bucket/a%20b/c%2Bd/MLmodel"
        );
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let rendered = format!("{:?}", creds());
        assert!(rendered.contains("minio"));
        assert!(!rendered.contains("minio123"));
    }
}
