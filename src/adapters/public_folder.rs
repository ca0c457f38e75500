use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use http_body_util::BodyExt;
use hyper::{Method, Request, Response, StatusCode};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::{
    config::models::PublicFolderConfig,
    ports::static_content::{FileSystemError, FileSystemResult, StaticContent},
};

/// Folder served when nothing else is configured
pub const DEFAULT_FOLDER_PATH: &str = "public";
/// Document looked up when a request maps onto a directory
pub const DEFAULT_DOCUMENT: &str = "index.html";

/// A directory on disk served under a URL prefix.
///
/// Requests that map onto a directory are answered with the first existing
/// default document, tried in registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicFolder {
    folder_path: PathBuf,
    prefix: String,
    default_documents: Vec<String>,
}

impl PublicFolder {
    pub fn new(folder_path: impl Into<PathBuf>) -> Self {
        Self {
            folder_path: folder_path.into(),
            prefix: "/".to_string(),
            default_documents: vec![DEFAULT_DOCUMENT.to_string()],
        }
    }

    /// Serve the folder under `prefix` instead of the site root
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = normalize_prefix(prefix);
        self
    }

    /// Replace the default document list. Duplicates are dropped.
    pub fn with_default_documents<I, S>(mut self, documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_documents.clear();
        for document in documents {
            self.add_default_document(document);
        }
        self
    }

    /// Append a default document unless it is already listed
    pub fn add_default_document(&mut self, document: impl Into<String>) -> bool {
        let document = document.into();
        if document.is_empty() || self.default_documents.contains(&document) {
            return false;
        }
        self.default_documents.push(document);
        true
    }

    pub fn from_config(config: &PublicFolderConfig) -> Self {
        let folder = Self::new(&config.path).with_prefix(&config.prefix);
        if config.default_documents.is_empty() {
            folder
        } else {
            folder.with_default_documents(config.default_documents.iter().cloned())
        }
    }

    pub fn folder_path(&self) -> &Path {
        &self.folder_path
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn default_documents(&self) -> &[String] {
        &self.default_documents
    }

    /// Map a request path onto a path below the folder.
    ///
    /// `Ok(None)` means the path is outside this folder's URL prefix.
    fn map_path(&self, request_path: &str) -> FileSystemResult<Option<PathBuf>> {
        let Some(relative) = strip_prefix(request_path, &self.prefix) else {
            return Ok(None);
        };
        let decoded = urlencoding::decode(relative)
            .map_err(|e| FileSystemError::InvalidPath(format!("{request_path}: {e}")))?;

        let mut mapped = self.folder_path.clone();
        for component in Path::new(decoded.trim_start_matches('/')).components() {
            match component {
                Component::Normal(segment) => mapped.push(segment),
                Component::CurDir => {}
                _ => {
                    return Err(FileSystemError::InvalidPath(format!(
                        "Path traversal attempt detected: {request_path}"
                    )));
                }
            }
        }
        Ok(Some(mapped))
    }

    /// Resolve a mapped path to an existing file inside the folder
    async fn locate(&self, mapped: PathBuf) -> FileSystemResult<Option<PathBuf>> {
        let metadata = match tokio::fs::metadata(&mapped).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FileSystemError::IoError(e)),
        };

        let file = if metadata.is_dir() {
            let mut found = None;
            for document in &self.default_documents {
                let candidate = mapped.join(document);
                if tokio::fs::metadata(&candidate)
                    .await
                    .is_ok_and(|m| m.is_file())
                {
                    found = Some(candidate);
                    break;
                }
            }
            match found {
                Some(file) => file,
                None => return Ok(None),
            }
        } else {
            mapped
        };

        // symlinks may still point outside the folder
        let canonical_root = tokio::fs::canonicalize(&self.folder_path).await?;
        let canonical_file = tokio::fs::canonicalize(&file).await?;
        if !canonical_file.starts_with(&canonical_root) {
            return Err(FileSystemError::InvalidPath(
                "Path traversal attempt detected".to_string(),
            ));
        }
        Ok(Some(file))
    }
}

impl Default for PublicFolder {
    fn default() -> Self {
        Self::new(DEFAULT_FOLDER_PATH)
    }
}

#[async_trait]
impl StaticContent for PublicFolder {
    async fn try_resolve(
        &self,
        req: &Request<()>,
    ) -> FileSystemResult<Option<Response<AxumBody>>> {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return Ok(None);
        }
        let Some(mapped) = self.map_path(req.uri().path())? else {
            return Ok(None);
        };
        let Some(file) = self.locate(mapped).await? else {
            return Ok(None);
        };

        // ServeFile needs an owned request; only the head matters to it
        let mut file_req = Request::new(AxumBody::empty());
        *file_req.method_mut() = req.method().clone();
        *file_req.uri_mut() = req.uri().clone();
        *file_req.headers_mut() = req.headers().clone();

        let response = match ServeFile::new(&file).oneshot(file_req).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        tracing::debug!(path = %file.display(), status = %response.status(), "Served static file");
        let (parts, body) = response.into_parts();
        let body = AxumBody::new(body.map_err(|e| {
            tracing::error!("Error reading static file body: {}", e);
            axum::Error::new(e)
        }));
        Ok(Some(Response::from_parts(parts, body)))
    }

    fn describe(&self) -> String {
        format!("{} -> {}", self.prefix, self.folder_path.display())
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

fn strip_prefix<'a>(request_path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix == "/" {
        return Some(request_path);
    }
    if request_path == prefix.trim_end_matches('/') {
        return Some("");
    }
    request_path.strip_prefix(prefix)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn folder_with(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            let full_path = dir.path().join(path);
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(full_path, content).unwrap();
        }
        dir
    }

    fn get(path: &str) -> Request<()> {
        Request::get(path).body(()).unwrap()
    }

    async fn body_text(response: Response<AxumBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_serves_file() {
        let dir = folder_with(&[("css/site.css", "body {}")]);
        let folder = PublicFolder::new(dir.path());

        let response = folder
            .try_resolve(&get("/css/site.css"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "body {}");
    }

    #[tokio::test]
    async fn test_missing_file_is_a_miss() {
        let dir = folder_with(&[]);
        let folder = PublicFolder::new(dir.path());
        assert!(folder.try_resolve(&get("/nope.txt")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_default_documents_in_order() {
        let dir = folder_with(&[("docs/default.htm", "htm"), ("docs/index.html", "html")]);

        let folder =
            PublicFolder::new(dir.path()).with_default_documents(["default.htm", "index.html"]);
        let response = folder.try_resolve(&get("/docs/")).await.unwrap().unwrap();
        assert_eq!(body_text(response).await, "htm");

        let folder = PublicFolder::new(dir.path());
        let response = folder.try_resolve(&get("/docs")).await.unwrap().unwrap();
        assert_eq!(body_text(response).await, "html");
    }

    #[tokio::test]
    async fn test_directory_without_default_document() {
        let dir = folder_with(&[("empty/readme.txt", "x")]);
        let folder = PublicFolder::new(dir.path());
        assert!(folder.try_resolve(&get("/empty/")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = folder_with(&[("inner/secret.txt", "s")]);
        let folder = PublicFolder::new(dir.path().join("inner"));

        assert!(folder.try_resolve(&get("/../inner/secret.txt")).await.is_err());
        assert!(folder.try_resolve(&get("/%2e%2e/inner/secret.txt")).await.is_err());
    }

    #[tokio::test]
    async fn test_prefix_scopes_requests() {
        let dir = folder_with(&[("app.js", "js"), ("index.html", "home")]);
        let folder = PublicFolder::new(dir.path()).with_prefix("assets");
        assert_eq!(folder.prefix(), "/assets/");

        let response = folder.try_resolve(&get("/assets/app.js")).await.unwrap().unwrap();
        assert_eq!(body_text(response).await, "js");
        let response = folder.try_resolve(&get("/assets")).await.unwrap().unwrap();
        assert_eq!(body_text(response).await, "home");
        assert!(folder.try_resolve(&get("/app.js")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_only_get_and_head_are_served() {
        let dir = folder_with(&[("a.txt", "a")]);
        let folder = PublicFolder::new(dir.path());

        let post = Request::post("/a.txt").body(()).unwrap();
        assert!(folder.try_resolve(&post).await.unwrap().is_none());

        let head = Request::head("/a.txt").body(()).unwrap();
        let response = folder.try_resolve(&head).await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_default_documents_deduplicated() {
        let mut folder = PublicFolder::default();
        assert_eq!(folder.folder_path(), Path::new(DEFAULT_FOLDER_PATH));
        assert!(!folder.add_default_document("index.html"));
        assert!(folder.add_default_document("index.htm"));
        assert_eq!(folder.default_documents(), ["index.html", "index.htm"]);
    }

    #[test]
    fn test_from_config() {
        let config = PublicFolderConfig {
            path: "site".into(),
            prefix: "/static/".to_string(),
            default_documents: vec!["home.html".to_string(), "home.html".to_string()],
        };
        let folder = PublicFolder::from_config(&config);
        assert_eq!(folder.prefix(), "/static/");
        assert_eq!(folder.default_documents(), ["home.html"]);
        assert_eq!(folder.describe(), "/static/ -> site");
    }
}
