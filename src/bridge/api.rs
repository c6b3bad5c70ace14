//! Penpot REST calls authenticated with the browser's session cookies.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, COOKIE};
use reqwest::Method;
use serde_json::{json, Value};

use super::driver::{cookie_header, BrowserDriver};
use crate::error::{Error, Result};

/// Name of the file the bridge opens (and creates when missing).
pub const WORKSPACE_FILE_NAME: &str = "MCP Workspace";

/// Project and file to open in the workspace editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceFile {
    /// Project id.
    pub project_id: String,
    /// File id.
    pub file_id: String,
}

/// Penpot RPC client.
pub struct PenpotApi {
    http: reqwest::Client,
    base: String,
    driver: Arc<dyn BrowserDriver>,
    timeout: Duration,
}

impl PenpotApi {
    /// Create a client for the Penpot instance at `base`.
    pub fn new(base: impl Into<String>, driver: Arc<dyn BrowserDriver>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            base: base.into().trim_end_matches('/').to_string(),
            driver,
            timeout,
        })
    }

    /// POST `/api/rpc/command/{command}` with a JSON body.
    pub async fn post_command(&self, command: &str, params: &Value) -> Result<Value> {
        self.call(Method::POST, command, Some(params), &[]).await
    }

    /// GET `/api/rpc/command/{command}` with query parameters.
    pub async fn get_command(&self, command: &str, query: &[(String, String)]) -> Result<Value> {
        self.call(Method::GET, command, None, query).await
    }

    /// Issue one RPC call; an empty body decodes to `null`.
    pub async fn call(
        &self,
        method: Method,
        command: &str,
        body: Option<&Value>,
        query: &[(String, String)],
    ) -> Result<Value> {
        let path = format!("/api/rpc/command/{command}");
        let operation = format!("{method} {path}");
        let request = async {
            let cookies = self.driver.cookies().await?;
            let mut request = self
                .http
                .request(method.clone(), format!("{}{}", self.base, path))
                .header(COOKIE, cookie_header(&cookies))
                .header(ACCEPT, "application/json");
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(Error::Api {
                    method: method.to_string(),
                    path: path.clone(),
                    status: status.as_u16(),
                });
            }
            let text = response.text().await?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            Ok(serde_json::from_str(&text)?)
        };

        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| Error::Timeout {
                operation,
                ms: self.timeout.as_millis() as u64,
            })?
    }

    /// Find or create the project and file the bridge works in.
    pub async fn ensure_workspace_file(&self, shared_team: &str) -> Result<WorkspaceFile> {
        tracing::info!("Ensuring workspace file via REST API");

        let teams = self.get_command("get-teams", &[]).await?;
        let team = pick_team(as_list(&teams), shared_team)
            .ok_or_else(|| Error::Automation("no team found for MCP user".into()))?;
        let team_id = id_of(team)?;
        tracing::info!(team = name_of(team), id = %team_id, "Team");

        let projects = self
            .get_command("get-projects", &[("team-id".into(), team_id.clone())])
            .await?;
        let project = match pick_project(as_list(&projects)) {
            Some(project) => project.clone(),
            None => {
                let created = self
                    .post_command(
                        "create-project",
                        &json!({ "teamId": team_id, "name": WORKSPACE_FILE_NAME }),
                    )
                    .await?;
                tracing::info!(id = %id_of(&created)?, "Created project");
                created
            }
        };
        let project_id = id_of(&project)?;
        tracing::info!(project = name_of(&project), id = %project_id, "Project");

        let files = self
            .get_command(
                "get-project-files",
                &[("project-id".into(), project_id.clone())],
            )
            .await?;
        let file = match pick_file(as_list(&files)) {
            Some(file) => file.clone(),
            None => {
                let created = self
                    .post_command(
                        "create-file",
                        &json!({ "projectId": project_id, "name": WORKSPACE_FILE_NAME }),
                    )
                    .await?;
                tracing::info!(id = %id_of(&created)?, "Created file");
                created
            }
        };
        let file_id = id_of(&file)?;
        tracing::info!(file = name_of(&file), id = %file_id, "File");

        Ok(WorkspaceFile {
            project_id,
            file_id,
        })
    }
}

fn as_list(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or_default()
}

fn flag(item: &Value, camel: &str, kebab: &str) -> bool {
    [camel, kebab]
        .iter()
        .any(|key| item.get(*key).and_then(Value::as_bool).unwrap_or(false))
}

fn name_of(item: &Value) -> &str {
    item.get("name").and_then(Value::as_str).unwrap_or("")
}

fn id_of(item: &Value) -> Result<String> {
    item.get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Automation(format!("API item without id: {item}")))
}

/// Shared team by name, then the default team, then the first.
pub fn pick_team<'a>(teams: &'a [Value], shared_team: &str) -> Option<&'a Value> {
    teams
        .iter()
        .find(|t| name_of(t) == shared_team)
        .or_else(|| teams.iter().find(|t| flag(t, "isDefault", "is-default")))
        .or_else(|| teams.first())
}

/// Default project, then the first.
pub fn pick_project(projects: &[Value]) -> Option<&Value> {
    projects
        .iter()
        .find(|p| flag(p, "isDefault", "is-default"))
        .or_else(|| projects.first())
}

/// The workspace file by name, then any non-library file, then the first.
pub fn pick_file(files: &[Value]) -> Option<&Value> {
    files
        .iter()
        .find(|f| name_of(f) == WORKSPACE_FILE_NAME)
        .or_else(|| files.iter().find(|f| !flag(f, "isShared", "is-shared")))
        .or_else(|| files.first())
}
