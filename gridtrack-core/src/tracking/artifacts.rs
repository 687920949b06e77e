//! Artifact repositories addressed by a run's artifact URI.

use super::s3::{S3Client, S3Location};
use crate::config::ArtifactStoreConfig;
use crate::error::ArtifactError;
use std::path::{Component, Path, PathBuf};

/// Where a run's artifact files are stored.
#[derive(Debug, Clone)]
pub enum ArtifactRepository {
    /// Tracking server artifact proxy (`mlflow-artifacts:/...`).
    Proxy {
        http: reqwest::Client,
        base_url: String,
        root: String,
    },
    /// S3-compatible object store (`s3://bucket/prefix`).
    S3 { client: S3Client, root: S3Location },
    /// Local directory (`file://...` or a plain path).
    Local { root: PathBuf },
}

impl ArtifactRepository {
    /// Pick the repository for `artifact_uri`.
    ///
    /// `tracking_base` is the MLflow server URL used for proxied artifacts.
    pub fn resolve(
        artifact_uri: &str,
        http: &reqwest::Client,
        tracking_base: &str,
        store: &ArtifactStoreConfig,
    ) -> Result<Self, ArtifactError> {
        if let Some(rest) = artifact_uri.strip_prefix("mlflow-artifacts:") {
            // Either `mlflow-artifacts:/path` or `mlflow-artifacts://host:port/path`.
            let path = match rest.strip_prefix("//") {
                Some(with_authority) => with_authority
                    .split_once('/')
                    .map(|(_, p)| p)
                    .unwrap_or(""),
                None => rest,
            };
            return Ok(Self::Proxy {
                http: http.clone(),
                base_url: tracking_base.trim_end_matches('/').to_string(),
                root: path.trim_matches('/').to_string(),
            });
        }
        if artifact_uri.starts_with("s3://") {
            let root = S3Location::parse(artifact_uri).ok_or_else(|| ArtifactError::UnsupportedUri {
                uri: artifact_uri.to_string(),
            })?;
            return Ok(Self::S3 {
                client: S3Client::new(http.clone(), store),
                root,
            });
        }
        if let Some(root) = super::local_path_from_uri(artifact_uri) {
            return Ok(Self::Local { root });
        }
        Err(ArtifactError::UnsupportedUri {
            uri: artifact_uri.to_string(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Proxy { .. } => "proxy",
            Self::S3 { .. } => "s3",
            Self::Local { .. } => "local",
        }
    }

    fn proxy_url(base_url: &str, root: &str, rel: &str) -> String {
        let encoded: Vec<String> = root
            .split('/')
            .chain(rel.split('/'))
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        format!(
            "{base_url}/api/2.0/mlflow-artifacts/artifacts/{}",
            encoded.join("/")
        )
    }

    /// Store one file at `rel` (relative to the run's artifact root).
    pub async fn put(&self, rel: &str, bytes: Vec<u8>) -> Result<(), ArtifactError> {
        match self {
            Self::Proxy {
                http,
                base_url,
                root,
            } => {
                let url = Self::proxy_url(base_url, root, rel);
                let response = http
                    .put(&url)
                    .header("content-type", "application/octet-stream")
                    .body(bytes)
                    .send()
                    .await
                    .map_err(|e| ArtifactError::Upload {
                        path: rel.to_string(),
                        message: e.to_string(),
                    })?;
                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(ArtifactError::Upload {
                        path: rel.to_string(),
                        message: format!("status {status}: {body}"),
                    });
                }
                Ok(())
            }
            Self::S3 { client, root } => client.put_object(&root.join(rel), bytes).await,
            Self::Local { root } => {
                let path = safe_join(root, rel)?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, bytes).await?;
                Ok(())
            }
        }
    }

    /// Fetch one file at `rel` (relative to the run's artifact root).
    pub async fn get(&self, rel: &str) -> Result<Vec<u8>, ArtifactError> {
        match self {
            Self::Proxy {
                http,
                base_url,
                root,
            } => {
                let url = Self::proxy_url(base_url, root, rel);
                let download_err = |message: String| ArtifactError::Download {
                    path: rel.to_string(),
                    message,
                };
                let response = http
                    .get(&url)
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
            Self::S3 { client, root } => client.get_object(&root.join(rel)).await,
            Self::Local { root } => {
                let path = safe_join(root, rel)?;
                match tokio::fs::read(&path).await {
                    Ok(bytes) => Ok(bytes),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Err(ArtifactError::Download {
                            path: rel.to_string(),
                            message: format!("{} does not exist", path.display()),
                        })
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }
}

/// Join a `/`-separated relative path onto `base`, refusing to escape it.
pub fn safe_join(base: &Path, rel: &str) -> Result<PathBuf, ArtifactError> {
    let rel_path = Path::new(rel);
    let mut out = base.to_path_buf();
    let mut pushed = false;
    for component in rel_path.components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                pushed = true;
            }
            Component::CurDir => {}
            _ => {
                return Err(ArtifactError::UnsupportedUri {
                    uri: rel.to_string(),
                });
            }
        }
    }
    if !pushed {
        return Err(ArtifactError::UnsupportedUri {
            uri: rel.to_string(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolve(uri: &str) -> Result<ArtifactRepository, ArtifactError> {
        ArtifactRepository::resolve(
            uri,
            &reqwest::Client::new(),
            "http://localhost:5000/",
            &ArtifactStoreConfig::default(),
        )
    }

    #[test]
    fn test_resolve_by_scheme() {
        match resolve("mlflow-artifacts:/1/abc/artifacts").unwrap() {
            ArtifactRepository::Proxy { base_url, root, .. } => {
                assert_eq!(base_url, "http://localhost:5000");
                assert_eq!(root, "1/abc/artifacts");
            }
            other => panic!("unexpected repository {}", other.kind()),
        }
        match resolve("mlflow-artifacts://tracker:5000/2/def/artifacts").unwrap() {
            ArtifactRepository::Proxy { root, .. } => assert_eq!(root, "2/def/artifacts"),
            other => panic!("unexpected repository {}", other.kind()),
        }
        assert_eq!(resolve("s3://mlflow-artifacts/1/abc").unwrap().kind(), "s3");
        assert_eq!(resolve("file:///tmp/artifacts").unwrap().kind(), "local");
        assert!(matches!(
            resolve("gs://bucket/x"),
            Err(ArtifactError::UnsupportedUri { .. })
        ));
    }

    #[test]
    fn test_proxy_url() {
        assert_eq!(
            ArtifactRepository::proxy_url("http://h:5000", "1/abc/artifacts", "model/ML model"),
            "http://h:5000/api/2.0/mlflow-artifacts/artifacts/1/abc/artifacts/model/ML%20model"
        );
    }

    #[test]
    fn test_safe_join() {
        let base = Path::new("/data");
        assert_eq!(
            safe_join(base, "model/model.json").unwrap(),
            PathBuf::from("/data/model/model.json")
        );
        assert!(safe_join(base, "../escape").is_err());
        assert!(safe_join(base, "/etc/passwd").is_err());
        assert!(safe_join(base, "").is_err());
    }

    #[tokio::test]
    async fn test_local_put_get() {
        let dir = TempDir::new().unwrap();
        let repo = ArtifactRepository::Local {
            root: dir.path().to_path_buf(),
        };
        repo.put("model/model.json", b"{\"w\":1}".to_vec())
            .await
            .unwrap();
        assert_eq!(repo.get("model/model.json").await.unwrap(), b"{\"w\":1}");
        assert!(matches!(
            repo.get("model/missing.json").await,
            Err(ArtifactError::Download { .. })
        ));
    }
}
