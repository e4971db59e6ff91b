//! Typed client for the Twigga service HTTP API.
//!
//! Two origins are involved: the service base URL (documents, storage,
//! hosting) and the account base URL (auth initiation, token
//! introspection). Every request carries the opaque bearer token in the
//! `BONGO-TOKEN` header; JSON bodies use `application/json`; multipart
//! uploads use the form field name `files` with the forward-slash
//! relative path as the part filename.
//!
//! The [`Service`] trait fronts the subset of the client that the
//! command surface and the deploy pipeline consume. It exists so those
//! layers can be exercised against a mock, the same way the core
//! pipeline is tested against a mocked uploader.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::Profile;
use crate::release::relative_slash_path;

/// Per-call ceiling on any single HTTP request.
const HTTP_TIMEOUT: Duration = Duration::from_secs(600);

const TOKEN_HEADER: &str = "BONGO-TOKEN";
const MULTIPART_FIELD: &str = "files";

/// Ordered list of response keys that may carry the authorization URL.
/// The server contract has been unstable here; the order and the
/// `http`-prefix fallback below are deliberate compatibility hedges.
const AUTH_URL_KEYS: [&str; 4] = ["url", "auth_url", "authUrl", "authorization_url"];

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("too many requests per IP, please try again later")]
    RateLimited,
    #[error("{context} failed: {body}")]
    Status {
        context: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("no auth url found in response: {0}")]
    MissingAuthUrl(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The service operations the command layer depends on.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Service: Send + Sync {
    /// Initiate browser auth; returns the authorization URL to open.
    async fn authenticate(&self, redirect_to: &str) -> Result<String, ApiError>;

    /// Introspect a session token into its user record.
    async fn get_token_data(&self, token: &str) -> Result<Map<String, Value>, ApiError>;

    /// Filter documents in `db`/`collection`. The result object carries
    /// a `documents` array which may be absent or null.
    async fn query_documents(
        &self,
        db: &str,
        collection: &str,
        filter: Value,
    ) -> Result<Map<String, Value>, ApiError>;

    /// Create a document with a server-assigned id. Fire-and-forget:
    /// the response body is discarded.
    async fn create_document_auto(
        &self,
        db: &str,
        collection: &str,
        doc: Value,
    ) -> Result<(), ApiError>;

    /// Create a storage bucket.
    async fn add_bucket(&self, name: &str) -> Result<Map<String, Value>, ApiError>;

    /// Set a bucket's access policy (`public` or `private`).
    async fn set_bucket_policy(&self, bucket: &str, policy: &str) -> Result<(), ApiError>;

    /// Upload files to a bucket, object names relative to `base_dir`.
    /// Returns the object names as reported by the server.
    async fn upload_files(
        &self,
        bucket: &str,
        files: &[PathBuf],
        base_dir: &Path,
    ) -> Result<Vec<String>, ApiError>;

    /// List the object records in a bucket.
    async fn get_files(&self, bucket: &str) -> Result<Vec<Map<String, Value>>, ApiError>;

    /// Upload a site release: every file under `base_dir`, relative
    /// paths preserved, under `(bucket, site, version)`. Returns the
    /// relative paths that were sent.
    async fn upload_site_version(
        &self,
        bucket: &str,
        site: &str,
        version: &str,
        files: &[PathBuf],
        base_dir: &Path,
    ) -> Result<Vec<String>, ApiError>;

    /// Point a named channel at a release version.
    async fn point_channel(
        &self,
        bucket: &str,
        site: &str,
        channel: &str,
        version: &str,
    ) -> Result<(), ApiError>;
}

pub struct ApiClient {
    base_url: String,
    account_base_url: String,
    token: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn from_profile(profile: &Profile) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(ApiClient {
            base_url: profile.base_url.trim_end_matches('/').to_string(),
            account_base_url: profile.account_base_url.trim_end_matches('/').to_string(),
            token: profile.token.clone(),
            http,
        })
    }

    /// Send a JSON request, returning the status and the raw body text.
    /// Statuses are not interpreted here; each operation owns its own
    /// status policy.
    async fn do_json(
        &self,
        method: Method,
        url: String,
        body: Option<&Value>,
    ) -> Result<(StatusCode, String), ApiError> {
        debug!(%method, %url, "api request");
        let mut req = self
            .http
            .request(method, &url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            req = req.json(body);
        }
        if !self.token.is_empty() {
            req = req.header(TOKEN_HEADER, &self.token);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        debug!(%url, %status, "api response");
        Ok((status, body))
    }

    /// Build a multipart form with one `files` part per file, named by
    /// its relative path, and collect those names.
    async fn multipart_form(
        files: &[PathBuf],
        base_dir: &Path,
    ) -> Result<(Form, Vec<String>), ApiError> {
        let mut form = Form::new();
        let mut names = Vec::with_capacity(files.len());
        for full in files {
            let rel = relative_slash_path(base_dir, full);
            let bytes = tokio::fs::read(full).await.map_err(|source| ApiError::FileRead {
                path: full.clone(),
                source,
            })?;
            form = form.part(MULTIPART_FIELD, Part::bytes(bytes).file_name(rel.clone()));
            names.push(rel);
        }
        Ok((form, names))
    }

    async fn send_multipart(
        &self,
        url: String,
        form: Form,
        context: &'static str,
    ) -> Result<String, ApiError> {
        let mut req = self.http.post(&url).multipart(form);
        if !self.token.is_empty() {
            req = req.header(TOKEN_HEADER, &self.token);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status.as_u16() >= 400 {
            return Err(ApiError::Status {
                context,
                status,
                body,
            });
        }
        Ok(body)
    }
}

/// Pick the authorization URL out of the auth-initiation response:
/// the recognized keys in order, then any string value that looks like
/// a URL.
fn extract_auth_url(m: &Map<String, Value>) -> Option<String> {
    for key in AUTH_URL_KEYS {
        if let Some(Value::String(s)) = m.get(key) {
            if !s.is_empty() {
                return Some(s.clone());
            }
        }
    }
    m.values().find_map(|v| match v {
        Value::String(s) if s.starts_with("http") => Some(s.clone()),
        _ => None,
    })
}

#[async_trait]
impl Service for ApiClient {
    async fn authenticate(&self, redirect_to: &str) -> Result<String, ApiError> {
        let url = format!("{}/application/authenticate", self.account_base_url);
        let body = serde_json::json!({ "redirectTo": redirect_to });
        let (status, body) = self.do_json(Method::POST, url, Some(&body)).await?;
        if status.as_u16() >= 400 {
            return Err(ApiError::Status {
                context: "authenticate",
                status,
                body,
            });
        }
        let m: Map<String, Value> = serde_json::from_str(&body)?;
        extract_auth_url(&m).ok_or(ApiError::MissingAuthUrl(body))
    }

    async fn get_token_data(&self, token: &str) -> Result<Map<String, Value>, ApiError> {
        let url = format!("{}/user/token/{}", self.account_base_url, token);
        let (status, body) = self.do_json(Method::GET, url, None).await?;
        if status.as_u16() >= 400 {
            return Err(ApiError::Status {
                context: "token introspection",
                status,
                body,
            });
        }
        // Decode failures on this payload are forgiven; callers check
        // for the fields they need.
        Ok(serde_json::from_str(&body).unwrap_or_default())
    }

    async fn query_documents(
        &self,
        db: &str,
        collection: &str,
        filter: Value,
    ) -> Result<Map<String, Value>, ApiError> {
        let url = format!("{}/document/{}/{}/filter", self.base_url, db, collection);
        let (status, body) = self.do_json(Method::POST, url, Some(&filter)).await?;
        match status {
            StatusCode::OK => Ok(serde_json::from_str(&body)?),
            StatusCode::TOO_MANY_REQUESTS => Err(ApiError::RateLimited),
            status => Err(ApiError::Status {
                context: "query documents",
                status,
                body,
            }),
        }
    }

    async fn create_document_auto(
        &self,
        db: &str,
        collection: &str,
        doc: Value,
    ) -> Result<(), ApiError> {
        let url = format!("{}/document/{}/{}", self.base_url, db, collection);
        // Response body intentionally discarded; the server contract
        // for the assigned id is unclear.
        let _ = self.do_json(Method::POST, url, Some(&doc)).await?;
        Ok(())
    }

    async fn add_bucket(&self, name: &str) -> Result<Map<String, Value>, ApiError> {
        let url = format!("{}/storage/buckets", self.base_url);
        let body = serde_json::json!({ "name": name });
        let (status, body) = self.do_json(Method::POST, url, Some(&body)).await?;
        if status.as_u16() >= 400 {
            return Err(ApiError::Status {
                context: "create bucket",
                status,
                body,
            });
        }
        Ok(serde_json::from_str(&body).unwrap_or_default())
    }

    async fn set_bucket_policy(&self, bucket: &str, policy: &str) -> Result<(), ApiError> {
        let url = format!("{}/storage/buckets/{}/policy", self.base_url, bucket);
        let body = serde_json::json!({ "policy": policy });
        let (status, body) = self.do_json(Method::POST, url, Some(&body)).await?;
        if status.as_u16() >= 400 {
            return Err(ApiError::Status {
                context: "set bucket policy",
                status,
                body,
            });
        }
        Ok(())
    }

    async fn upload_files(
        &self,
        bucket: &str,
        files: &[PathBuf],
        base_dir: &Path,
    ) -> Result<Vec<String>, ApiError> {
        let url = format!("{}/storage/buckets/{}/objects", self.base_url, bucket);
        info!(bucket, count = files.len(), "uploading objects");
        let (form, _) = Self::multipart_form(files, base_dir).await?;
        let body = self.send_multipart(url, form, "upload").await?;

        #[derive(serde::Deserialize)]
        struct UploadResponse {
            files: Vec<String>,
        }
        let resp: UploadResponse = serde_json::from_str(&body)?;
        Ok(resp.files)
    }

    async fn get_files(&self, bucket: &str) -> Result<Vec<Map<String, Value>>, ApiError> {
        let url = format!("{}/storage/buckets/{}/objects", self.base_url, bucket);
        let (status, body) = self.do_json(Method::GET, url, None).await?;
        if status.as_u16() >= 400 {
            return Err(ApiError::Status {
                context: "get files",
                status,
                body,
            });
        }
        let m: Map<String, Value> = serde_json::from_str(&body)?;
        let files = m
            .get("files")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_object().cloned())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(files)
    }

    async fn upload_site_version(
        &self,
        bucket: &str,
        site: &str,
        version: &str,
        files: &[PathBuf],
        base_dir: &Path,
    ) -> Result<Vec<String>, ApiError> {
        let url = format!(
            "{}/hosting/{}/{}/{}/upload",
            self.base_url, bucket, site, version
        );
        info!(bucket, site, version, count = files.len(), "uploading site release");
        let (form, names) = Self::multipart_form(files, base_dir).await?;
        self.send_multipart(url, form, "upload").await?;
        Ok(names)
    }

    async fn point_channel(
        &self,
        bucket: &str,
        site: &str,
        channel: &str,
        version: &str,
    ) -> Result<(), ApiError> {
        let url = format!(
            "{}/hosting/{}/{}/channels/{}",
            self.base_url, bucket, site, channel
        );
        let body = serde_json::json!({ "version": version });
        info!(bucket, site, channel, version, "pointing channel");
        let (status, body) = self.do_json(Method::POST, url, Some(&body)).await?;
        if status.as_u16() >= 400 {
            return Err(ApiError::Status {
                context: "point channel",
                status,
                body,
            });
        }
        Ok(())
    }
}
