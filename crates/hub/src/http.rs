//! HTTP client for a hub-compatible model repository API

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use base64::Engine;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::{HubConfig, DEFAULT_REVISION};
use crate::error::{HubError, Result};
use crate::remote::{safe_relative_path, walk_files, RemoteRepository};
use crate::repo::RepoId;

/// Repository info returned by `/api/models/{repo}/revision/{rev}`
#[derive(Debug, Deserialize)]
struct RepoInfo {
    #[serde(default)]
    siblings: Vec<Sibling>,
}

#[derive(Debug, Deserialize)]
struct Sibling {
    rfilename: String,
}

#[derive(Debug, Deserialize)]
struct WhoAmI {
    name: String,
}

/// Blocking hub client
pub struct HttpHub {
    config: HubConfig,
    http: Client,
}

impl HttpHub {
    /// Create a new client
    pub fn new(config: HubConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("weightport/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Public URL of a repository
    pub fn repo_url(&self, repo: &RepoId) -> String {
        format!("{}/{}", self.config.endpoint, repo)
    }

    fn authorize(builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        match token {
            Some(token) if !token.is_empty() => builder.bearer_auth(token),
            _ => builder,
        }
    }

    /// Name of the account `token` belongs to
    pub fn whoami(&self, token: &str) -> Result<String> {
        let url = format!("{}/api/whoami-v2", self.config.endpoint);
        let resp = self.http.get(&url).bearer_auth(token).send()?;
        let resp = check_status(resp, "whoami")?;
        let who: WhoAmI = resp.json()?;
        Ok(who.name)
    }

    /// Bare names belong to the token's account
    fn qualify(&self, repo: &RepoId, token: &str) -> Result<RepoId> {
        match repo.namespace() {
            Some(_) => Ok(repo.clone()),
            None => Ok(repo.with_namespace(&self.whoami(token)?)),
        }
    }

    fn create_repo(&self, repo: &RepoId, token: &str) -> Result<()> {
        let url = format!("{}/api/repos/create", self.config.endpoint);
        let body = serde_json::json!({
            "type": "model",
            "name": repo.name(),
            "organization": repo.namespace(),
            "private": false,
        });

        let resp = self.http.post(&url).bearer_auth(token).json(&body).send()?;
        match resp.status() {
            // 409 Conflict: already exists
            StatusCode::CONFLICT => Ok(()),
            _ => check_status(resp, &repo.to_string()).map(|_| ()),
        }
    }

    fn download_once(
        &self,
        repo: &RepoId,
        revision: &str,
        path: &str,
        dest: &Path,
        token: Option<&str>,
    ) -> Result<()> {
        let url = format!(
            "{}/{}/resolve/{}/{}",
            self.config.endpoint, repo, revision, path
        );
        let resp = Self::authorize(self.http.get(&url), token).send()?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(HubError::FileNotFound(format!("{repo}/{path}")));
        }
        let mut resp = check_status(resp, &format!("{repo}/{path}"))?;

        let mut file = File::create(dest)?;
        resp.copy_to(&mut file)?;
        Ok(())
    }
}

impl RemoteRepository for HttpHub {
    fn list_files(
        &self,
        repo: &RepoId,
        revision: &str,
        token: Option<&str>,
    ) -> Result<Vec<String>> {
        let url = format!(
            "{}/api/models/{}/revision/{}",
            self.config.endpoint, repo, revision
        );
        let resp = Self::authorize(self.http.get(&url), token).send()?;

        match resp.status() {
            StatusCode::NOT_FOUND if revision != DEFAULT_REVISION => {
                return Err(HubError::RevisionNotFound {
                    repo: repo.to_string(),
                    revision: revision.to_string(),
                })
            }
            StatusCode::NOT_FOUND => return Err(HubError::RepoNotFound(repo.to_string())),
            _ => {}
        }

        let resp = check_status(resp, &repo.to_string())?;
        let info: RepoInfo = resp.json()?;
        let mut files: Vec<String> = info.siblings.into_iter().map(|s| s.rfilename).collect();
        files.sort();
        Ok(files)
    }

    fn download_file(
        &self,
        repo: &RepoId,
        revision: &str,
        path: &str,
        dest: &Path,
        token: Option<&str>,
    ) -> Result<()> {
        let mut backoff = self.config.initial_backoff;
        let mut attempt = 0u32;

        loop {
            match self.download_once(repo, revision, path, dest, token) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        repo = %repo,
                        path,
                        attempt,
                        error = %e,
                        "download failed, retrying"
                    );
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn upload(
        &self,
        local_dir: &Path,
        repo: &RepoId,
        token: &str,
        commit_message: &str,
    ) -> Result<String> {
        if token.is_empty() {
            return Err(HubError::Unauthorized("empty token".to_string()));
        }

        let repo = self.qualify(repo, token)?;
        self.create_repo(&repo, token)?;

        // NDJSON commit: header line, then one line per file
        let engine = base64::engine::general_purpose::STANDARD;
        let mut body = serde_json::to_string(&serde_json::json!({
            "key": "header",
            "value": { "summary": commit_message, "description": "" },
        }))?;
        body.push('\n');

        let files = walk_files(local_dir)?;
        for file in &files {
            let bytes = std::fs::read(local_dir.join(safe_relative_path(file)?))?;
            let line = serde_json::json!({
                "key": "file",
                "value": {
                    "path": file,
                    "encoding": "base64",
                    "content": engine.encode(&bytes),
                },
            });
            body.push_str(&serde_json::to_string(&line)?);
            body.push('\n');
        }

        let url = format!(
            "{}/api/models/{}/commit/{}",
            self.config.endpoint, repo, DEFAULT_REVISION
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()?;
        check_status(resp, &repo.to_string())?;

        tracing::info!(repo = %repo, files = files.len(), "pushed to hub");
        Ok(self.repo_url(&repo))
    }

    fn delete(&self, repo: &RepoId, token: &str) -> Result<()> {
        let repo = self.qualify(repo, token)?;
        let url = format!("{}/api/repos/delete", self.config.endpoint);
        let body = serde_json::json!({
            "type": "model",
            "name": repo.name(),
            "organization": repo.namespace(),
        });

        let resp = self
            .http
            .delete(&url)
            .bearer_auth(token)
            .json(&body)
            .send()?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(HubError::RepoNotFound(repo.to_string()));
        }
        check_status(resp, &repo.to_string())?;
        Ok(())
    }

    fn cache_dir(&self) -> Option<&Path> {
        self.config.cache_dir.as_deref()
    }
}

fn check_status(resp: Response, context: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(HubError::Unauthorized(context.to_string()))
        }
        _ => Err(HubError::Server {
            status: status.as_u16(),
            message: resp.text().unwrap_or_default(),
        }),
    }
}
