//! Projects.
//!
//! A project owns clusters and SSH keys and passes its labels on to every
//! cluster in it. Like SSH keys, projects are managed directly and never
//! go through the cluster provisioner. A new project is only usable once
//! it reports `Active`, so create blocks until then.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::config::WaitConfig;
use crate::error::{ApiError, MetaKubeError, Result};

use super::client::MetaKubeClient;
use super::types::{Project, ProjectRequest};
use super::wait::{ProbeErrors, Waiter};

/// Manages projects.
#[derive(Debug, Clone)]
pub struct ProjectManager {
    client: MetaKubeClient,
    waiter: Waiter,
    activation_ticks: u32,
}

impl ProjectManager {
    /// Creates a new manager.
    #[must_use]
    pub fn new(client: MetaKubeClient, waits: &WaitConfig) -> Self {
        Self {
            waiter: Waiter::new(waits.interval(), client.cancellation().clone()),
            activation_ticks: waits.project_ticks,
            client,
        }
    }

    /// Creates a project and waits until it is active.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails, the response has no id, or
    /// the project does not become active in time. In the last case the
    /// project exists and its id has been logged.
    pub async fn create(&self, name: &str, labels: BTreeMap<String, String>) -> Result<Project> {
        info!("Creating project {name}");

        let request = ProjectRequest {
            name: name.to_string(),
            labels,
        };
        let created = self.client.create_project(&request).await?;
        if created.id.is_empty() {
            return Err(MetaKubeError::Api(ApiError::InvalidResponse {
                path: String::from("/api/v1/projects"),
                message: format!("created project `{name}` has no id"),
            }));
        }

        info!("Created project {name} (ID: {}), waiting for activation", created.id);
        self.wait_active(&created.id).await?;

        let refreshed = self.read(&created.id).await?;
        Ok(refreshed.unwrap_or(created))
    }

    /// Looks a project up.
    ///
    /// Returns `None` when it is gone or its delete was accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn read(&self, project_id: &str) -> Result<Option<Project>> {
        let project = self
            .client
            .find_project(project_id)
            .await?
            .filter(|project| !project.is_deleting());

        if project.is_none() {
            debug!("Project {project_id} not found");
        }
        Ok(project)
    }

    /// Replaces the name and labels of a project.
    ///
    /// A `None` argument keeps the current value. Returns `None` when the
    /// project is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn update(
        &self,
        project_id: &str,
        name: Option<&str>,
        labels: Option<BTreeMap<String, String>>,
    ) -> Result<Option<Project>> {
        let Some(current) = self.read(project_id).await? else {
            return Ok(None);
        };

        let request = ProjectRequest {
            name: name.map_or(current.name, str::to_string),
            labels: labels.unwrap_or(current.labels),
        };
        info!("Updating project {project_id}");
        let updated = self.client.update_project(project_id, &request).await?;

        Ok((!updated.is_deleting()).then_some(updated))
    }

    /// Deletes a project. Deleting a missing project succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn delete(&self, project_id: &str) -> Result<()> {
        info!("Deleting project {project_id}");
        self.client.delete_project(project_id).await
    }

    async fn wait_active(&self, project_id: &str) -> Result<()> {
        let client = &self.client;
        self.waiter
            .wait_until(
                "project activation",
                self.activation_ticks,
                ProbeErrors::Swallow,
                move || async move {
                    Ok(client
                        .find_project(project_id)
                        .await?
                        .is_some_and(|project| project.is_active()))
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use crate::error::ProvisionError;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PROJECTS: &str = "/api/v1/projects";
    const PROJECT: &str = "/api/v1/projects/prj";

    fn manager(server: &MockServer) -> ProjectManager {
        let api = ApiConfig {
            url: server.uri(),
            ..ApiConfig::default()
        };
        let waits = WaitConfig {
            interval_ms: 1,
            project_ticks: 5,
            ..WaitConfig::default()
        };
        let client = MetaKubeClient::new(&api, "token", CancellationToken::new()).unwrap();
        ProjectManager::new(client, &waits)
    }

    fn labels() -> BTreeMap<String, String> {
        BTreeMap::from([(String::from("team"), String::from("x"))])
    }

    #[tokio::test]
    async fn test_create_waits_for_active() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(PROJECTS))
            .and(body_json(json!({"name": "demo", "labels": {"team": "x"}})))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"id": "prj", "name": "demo", "status": "Inactive"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        // Activation shows up on the third poll.
        Mock::given(method("GET"))
            .and(path(PROJECT))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "prj", "name": "demo", "status": "Inactive"})),
            )
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(PROJECT))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "prj",
                "name": "demo",
                "labels": {"team": "x"},
                "status": "Active"
            })))
            .mount(&server)
            .await;

        let project = manager(&server).create("demo", labels()).await.unwrap();
        assert_eq!(project.id, "prj");
        assert!(project.is_active());
        assert_eq!(project.labels, labels());
    }

    #[tokio::test]
    async fn test_create_times_out_when_never_active() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(PROJECTS))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"id": "prj", "name": "demo", "status": "Inactive"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(PROJECT))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "prj", "name": "demo", "status": "Inactive"})),
            )
            .expect(5)
            .mount(&server)
            .await;

        let err = manager(&server).create("demo", labels()).await.unwrap_err();
        assert!(matches!(
            err,
            MetaKubeError::Provision(ProvisionError::Timeout { ref operation, .. })
                if operation == "project activation"
        ));
    }

    #[tokio::test]
    async fn test_read_soft_deleted_or_missing_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(PROJECT))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "prj",
                "name": "demo",
                "status": "Terminating",
                "deletionTimestamp": "2020-03-03T04:06:52Z"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/projects/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let projects = manager(&server);
        assert!(projects.read("prj").await.unwrap().is_none());
        assert!(projects.read("gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_keeps_unchanged_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(PROJECT))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "prj",
                "name": "demo",
                "labels": {"team": "x"},
                "status": "Active"
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(PROJECT))
            .and(body_json(json!({"name": "renamed", "labels": {"team": "x"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "prj",
                "name": "renamed",
                "labels": {"team": "x"},
                "status": "Active"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let updated = manager(&server)
            .update("prj", Some("renamed"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "renamed");
    }

    #[tokio::test]
    async fn test_update_missing_project_writes_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(PROJECT))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let updated = manager(&server)
            .update("prj", None, Some(labels()))
            .await
            .unwrap();
        assert!(updated.is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_project_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(PROJECT))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        manager(&server).delete("prj").await.unwrap();
    }
}
