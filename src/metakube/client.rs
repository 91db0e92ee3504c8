//! MetaKube API client implementation.
//!
//! This module provides the HTTP transport for the MetaKube REST API: typed
//! verbs against resource paths, status classification, and the bounded
//! retry for patches that race with in-flight provisioning. The typed
//! endpoint wrappers at the bottom are thin and carry no policy.

use reqwest::{header, Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::{ApiConfig, ProviderConfig};
use crate::error::{ApiError, ErrorBody, MetaKubeError, Result};

use super::types::{
    Cluster, ClusterHealth, ClusterLocator, ClusterPatch, ClusterUpgrade, CreateClusterRequest,
    Datacenter, Image, NodeDeployment, NodeDeploymentPatch, Project, ProjectRequest, SshKey, Tenant,
    UpgradeNodesRequest, clusters_path,
};

/// How a response status is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Any 2xx.
    Success,
    /// 404; absent, not an error for get and delete.
    NotFound,
    /// 409; retried by patch only.
    Conflict,
    /// Anything else; always fatal.
    Other,
}

impl StatusClass {
    /// Classifies a status code.
    #[must_use]
    pub fn of(status: StatusCode) -> Self {
        if status.is_success() {
            Self::Success
        } else if status == StatusCode::NOT_FOUND {
            Self::NotFound
        } else if status == StatusCode::CONFLICT {
            Self::Conflict
        } else {
            Self::Other
        }
    }
}

/// Raw response: status plus body bytes.
#[derive(Debug)]
struct RawResponse {
    status: StatusCode,
    body: Vec<u8>,
}

/// MetaKube API client.
#[derive(Debug, Clone)]
pub struct MetaKubeClient {
    /// HTTP client.
    client: Client,
    /// Base URL without trailing slash.
    base_url: String,
    /// Bearer token.
    token: String,
    /// Attempts for a conflicting patch.
    conflict_attempts: u32,
    /// Delay between conflicting patch attempts.
    conflict_delay: Duration,
    /// Cancellation shared with every wait of the current operation.
    cancel: CancellationToken,
}

impl MetaKubeClient {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &ApiConfig, token: &str, cancel: CancellationToken) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ApiError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            conflict_attempts: config.conflict_attempts.max(1),
            conflict_delay: config.conflict_delay(),
            cancel,
        })
    }

    /// Cancellation token observed by retries and waits.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sends one request and collects the raw response.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> Result<RawResponse> {
        debug!("{method} {path}");

        let mut request = self
            .client
            .request(method.clone(), format!("{}{path}", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(header::ACCEPT, "application/json");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if let Some(body) = body {
            trace!("Request body for {method} {path}: {body}");
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::network(format!("{method} {path}: {e}")))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::network(format!("{method} {path}: failed to read body: {e}")))?
            .to_vec();

        trace!("{method} {path} -> {status}: {}", String::from_utf8_lossy(&body));
        Ok(RawResponse { status, body })
    }

    /// Builds the fatal error for a non-success response.
    fn failure(method: &Method, path: &str, response: &RawResponse) -> MetaKubeError {
        let body = ErrorBody::from_bytes(&response.body);
        let status = response.status.as_u16();
        let err = if response.status == StatusCode::UNAUTHORIZED
            || response.status == StatusCode::FORBIDDEN
        {
            ApiError::AuthenticationFailed {
                method: method.to_string(),
                path: path.to_string(),
                status,
                body,
            }
        } else {
            ApiError::RequestFailed {
                method: method.to_string(),
                path: path.to_string(),
                status,
                body,
            }
        };
        MetaKubeError::Api(err)
    }

    fn decode<T: DeserializeOwned>(path: &str, body: &[u8]) -> Result<T> {
        serde_json::from_slice(body).map_err(|e| {
            MetaKubeError::Api(ApiError::InvalidResponse {
                path: path.to_string(),
                message: format!("Failed to parse response: {e}"),
            })
        })
    }

    fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Value> {
        serde_json::to_value(body)
            .map_err(|e| MetaKubeError::internal(format!("Failed to encode request body: {e}")))
    }

    /// Fetches a resource; `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error for any status other than 2xx or 404.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let response = self.execute(Method::GET, path, None, &[]).await?;
        match StatusClass::of(response.status) {
            StatusClass::Success => Self::decode(path, &response.body).map(Some),
            StatusClass::NotFound => Ok(None),
            StatusClass::Conflict | StatusClass::Other => {
                Err(Self::failure(&Method::GET, path, &response))
            }
        }
    }

    /// Fetches a resource that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] on 404 and an error for any other
    /// non-2xx status.
    pub async fn get_required<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get(path).await?.ok_or_else(|| {
            MetaKubeError::Api(ApiError::NotFound {
                path: path.to_string(),
            })
        })
    }

    /// Lists a collection.
    ///
    /// # Errors
    ///
    /// Returns an error for any non-2xx status, including 404.
    pub async fn list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        self.list_with_headers(path, &[]).await
    }

    /// Lists a collection, sending extra request headers.
    ///
    /// # Errors
    ///
    /// Returns an error for any non-2xx status, including 404.
    pub async fn list_with_headers<T: DeserializeOwned>(
        &self,
        path: &str,
        headers: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let response = self.execute(Method::GET, path, None, headers).await?;
        match StatusClass::of(response.status) {
            // Some list endpoints answer `null` for an empty collection.
            StatusClass::Success => Self::decode::<Option<Vec<T>>>(path, &response.body)
                .map(Option::unwrap_or_default),
            StatusClass::NotFound => Err(MetaKubeError::Api(ApiError::NotFound {
                path: path.to_string(),
            })),
            StatusClass::Conflict | StatusClass::Other => {
                Err(Self::failure(&Method::GET, path, &response))
            }
        }
    }

    /// Creates a resource; the server must answer `201 Created`.
    ///
    /// # Errors
    ///
    /// Returns an error for any status other than 201.
    pub async fn create<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = Self::encode(body)?;
        let response = self.execute(Method::POST, path, Some(&payload), &[]).await?;
        if response.status == StatusCode::CREATED {
            return Self::decode(path, &response.body);
        }
        if response.status.is_success() {
            return Err(MetaKubeError::Api(ApiError::UnexpectedStatus {
                method: Method::POST.to_string(),
                path: path.to_string(),
                expected: StatusCode::CREATED.as_u16(),
                status: response.status.as_u16(),
            }));
        }
        Err(Self::failure(&Method::POST, path, &response))
    }

    /// Patches a resource, retrying the identical patch on 409.
    ///
    /// Between attempts the client waits the configured delay; cancellation
    /// is honoured during that wait.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::ConflictRetriesExhausted`] when every attempt
    /// conflicted, [`MetaKubeError::Cancelled`] when cancelled while
    /// waiting, and an error for any other non-2xx status without retrying.
    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = Self::encode(body)?;
        let attempts = self.conflict_attempts;

        for attempt in 1..=attempts {
            let response = self.execute(Method::PATCH, path, Some(&payload), &[]).await?;
            match StatusClass::of(response.status) {
                StatusClass::Success => return Self::decode(path, &response.body),
                StatusClass::Conflict => {
                    warn!("PATCH {path} conflicted (attempt {attempt}/{attempts})");
                    if attempt < attempts {
                        tokio::select! {
                            () = self.cancel.cancelled() => {
                                return Err(MetaKubeError::cancelled(format!("PATCH {path}")));
                            }
                            () = tokio::time::sleep(self.conflict_delay) => {}
                        }
                    }
                }
                StatusClass::NotFound | StatusClass::Other => {
                    return Err(Self::failure(&Method::PATCH, path, &response));
                }
            }
        }

        Err(MetaKubeError::Api(ApiError::ConflictRetriesExhausted {
            path: path.to_string(),
            attempts,
        }))
    }

    /// Issues a PUT with an optional JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error for any non-2xx status.
    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: Option<&B>) -> Result<()> {
        let payload = body.map(Self::encode).transpose()?;
        let response = self
            .execute(Method::PUT, path, payload.as_ref(), &[])
            .await?;
        if response.status.is_success() {
            Ok(())
        } else {
            Err(Self::failure(&Method::PUT, path, &response))
        }
    }

    /// Replaces a resource with PUT and decodes the answer.
    ///
    /// # Errors
    ///
    /// Returns an error for any non-2xx status.
    pub async fn replace<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = Self::encode(body)?;
        let response = self.execute(Method::PUT, path, Some(&payload), &[]).await?;
        if response.status.is_success() {
            Self::decode(path, &response.body)
        } else {
            Err(Self::failure(&Method::PUT, path, &response))
        }
    }

    /// Deletes a resource. Already absent counts as deleted.
    ///
    /// # Errors
    ///
    /// Returns an error for any status other than 2xx or 404.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let response = self.execute(Method::DELETE, path, None, &[]).await?;
        match StatusClass::of(response.status) {
            StatusClass::Success => Ok(()),
            StatusClass::NotFound => {
                debug!("DELETE {path}: already absent");
                Ok(())
            }
            StatusClass::Conflict | StatusClass::Other => {
                Err(Self::failure(&Method::DELETE, path, &response))
            }
        }
    }

    // ------------------------------------------------------------------
    // Typed endpoints
    // ------------------------------------------------------------------

    /// Looks up a datacenter by its human-facing name.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn datacenter(&self, name: &str) -> Result<Option<Datacenter>> {
        self.get(&format!("/api/v1/dc/{name}")).await
    }

    /// Fetches a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the project does not exist or the call fails.
    pub async fn project(&self, project_id: &str) -> Result<Project> {
        self.get_required(&format!("/api/v1/projects/{project_id}"))
            .await
    }

    /// Looks a project up; `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn find_project(&self, project_id: &str) -> Result<Option<Project>> {
        self.get(&format!("/api/v1/projects/{project_id}")).await
    }

    /// Creates a project.
    ///
    /// # Errors
    ///
    /// Returns an error unless the server answers 201.
    pub async fn create_project(&self, request: &ProjectRequest) -> Result<Project> {
        self.create("/api/v1/projects", request).await
    }

    /// Replaces a project's name and labels.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn update_project(&self, project_id: &str, request: &ProjectRequest) -> Result<Project> {
        self.replace(&format!("/api/v1/projects/{project_id}"), request)
            .await
    }

    /// Deletes a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn delete_project(&self, project_id: &str) -> Result<()> {
        self.delete(&format!("/api/v1/projects/{project_id}")).await
    }

    /// Lists `OpenStack` tenants visible with the given credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn openstack_tenants(
        &self,
        datacenter: &str,
        provider: &ProviderConfig,
    ) -> Result<Vec<Tenant>> {
        self.list_with_headers(
            "/api/v1/providers/openstack/tenants",
            &openstack_headers(datacenter, provider),
        )
        .await
    }

    /// Lists `OpenStack` images visible with the given credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn openstack_images(
        &self,
        datacenter: &str,
        provider: &ProviderConfig,
    ) -> Result<Vec<Image>> {
        self.list_with_headers(
            "/api/v1/providers/openstack/images",
            &openstack_headers(datacenter, provider),
        )
        .await
    }

    /// Lists versions that do not trigger automatic upgrades.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn available_versions(&self) -> Result<Vec<ClusterUpgrade>> {
        self.list("/api/v1/upgrades/cluster").await
    }

    /// Creates a cluster together with its first node pool.
    ///
    /// # Errors
    ///
    /// Returns an error unless the server answers 201.
    pub async fn create_cluster(
        &self,
        project_id: &str,
        seed: &str,
        request: &CreateClusterRequest,
    ) -> Result<Cluster> {
        self.create(&clusters_path(project_id, seed), request).await
    }

    /// Lists the clusters of a project in one seed.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn clusters(&self, project_id: &str, seed: &str) -> Result<Vec<Cluster>> {
        self.list(&clusters_path(project_id, seed)).await
    }

    /// Fetches a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn cluster(&self, locator: &ClusterLocator) -> Result<Option<Cluster>> {
        self.get(&locator.path()).await
    }

    /// Patches a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the patch fails or keeps conflicting.
    pub async fn patch_cluster(
        &self,
        locator: &ClusterLocator,
        patch: &ClusterPatch,
    ) -> Result<Cluster> {
        self.patch(&locator.path(), patch).await
    }

    /// Deletes a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn delete_cluster(&self, locator: &ClusterLocator) -> Result<()> {
        self.delete(&locator.path()).await
    }

    /// Fetches cluster health.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster is missing or the call fails.
    pub async fn cluster_health(&self, locator: &ClusterLocator) -> Result<ClusterHealth> {
        self.get_required(&locator.sub_path("health")).await
    }

    /// Lists the single-step upgrades available to a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn cluster_upgrades(&self, locator: &ClusterLocator) -> Result<Vec<ClusterUpgrade>> {
        self.list(&locator.sub_path("upgrades")).await
    }

    /// Lists the node deployments of a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn node_deployments(&self, locator: &ClusterLocator) -> Result<Vec<NodeDeployment>> {
        self.list(&locator.sub_path("nodedeployments")).await
    }

    /// Patches a node deployment.
    ///
    /// # Errors
    ///
    /// Returns an error if the patch fails or keeps conflicting.
    pub async fn patch_node_deployment(
        &self,
        locator: &ClusterLocator,
        node_deployment_id: &str,
        patch: &NodeDeploymentPatch,
    ) -> Result<NodeDeployment> {
        self.patch(
            &locator.sub_path(&format!("nodedeployments/{node_deployment_id}")),
            patch,
        )
        .await
    }

    /// Upgrades the worker nodes of a cluster to a version.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn upgrade_nodes(&self, locator: &ClusterLocator, version: &str) -> Result<()> {
        let request = UpgradeNodesRequest {
            version: version.to_string(),
        };
        self.put(&locator.sub_path("nodes/upgrades"), Some(&request))
            .await
    }

    /// Lists the SSH keys of a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn project_ssh_keys(&self, project_id: &str) -> Result<Vec<SshKey>> {
        self.list(&format!("/api/v1/projects/{project_id}/sshkeys"))
            .await
    }

    /// Creates a project SSH key.
    ///
    /// # Errors
    ///
    /// Returns an error unless the server answers 201.
    pub async fn create_ssh_key(&self, project_id: &str, key: &SshKey) -> Result<SshKey> {
        self.create(&format!("/api/v1/projects/{project_id}/sshkeys"), key)
            .await
    }

    /// Deletes a project SSH key.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn delete_ssh_key(&self, project_id: &str, key_id: &str) -> Result<()> {
        self.delete(&format!("/api/v1/projects/{project_id}/sshkeys/{key_id}"))
            .await
    }

    /// Lists the SSH keys assigned to a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn cluster_ssh_keys(&self, locator: &ClusterLocator) -> Result<Vec<SshKey>> {
        self.list(&locator.sub_path("sshkeys")).await
    }

    /// Assigns a project SSH key to a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn assign_ssh_key(&self, locator: &ClusterLocator, key_id: &str) -> Result<()> {
        self.put::<Value>(&locator.sub_path(&format!("sshkeys/{key_id}")), None)
            .await
    }

    /// Removes an SSH key from a cluster; the key itself is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn unassign_ssh_key(&self, locator: &ClusterLocator, key_id: &str) -> Result<()> {
        self.delete(&locator.sub_path(&format!("sshkeys/{key_id}")))
            .await
    }
}

fn openstack_headers<'a>(datacenter: &'a str, provider: &'a ProviderConfig) -> [(&'a str, &'a str); 4] {
    [
        ("DatacenterName", datacenter),
        ("Domain", provider.domain.as_str()),
        ("Username", provider.username.as_str()),
        ("Password", provider.password.as_str()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> MetaKubeClient {
        let config = ApiConfig {
            url: server.uri(),
            conflict_delay_ms: 5,
            ..ApiConfig::default()
        };
        MetaKubeClient::new(&config, "token", CancellationToken::new()).unwrap()
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(StatusClass::of(StatusCode::OK), StatusClass::Success);
        assert_eq!(StatusClass::of(StatusCode::CREATED), StatusClass::Success);
        assert_eq!(StatusClass::of(StatusCode::NO_CONTENT), StatusClass::Success);
        assert_eq!(StatusClass::of(StatusCode::NOT_FOUND), StatusClass::NotFound);
        assert_eq!(StatusClass::of(StatusCode::CONFLICT), StatusClass::Conflict);
        assert_eq!(StatusClass::of(StatusCode::BAD_REQUEST), StatusClass::Other);
        assert_eq!(
            StatusClass::of(StatusCode::INTERNAL_SERVER_ERROR),
            StatusClass::Other
        );
    }

    #[tokio::test]
    async fn test_get_not_found_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/dc/nowhere"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dc = client(&server).datacenter("nowhere").await.unwrap();
        assert!(dc.is_none());
    }

    #[tokio::test]
    async fn test_get_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/projects/prj"))
            .and(header_matcher("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "prj",
                "name": "Project",
                "labels": {"team": "x"}
            })))
            .mount(&server)
            .await;

        let project = client(&server).project("prj").await.unwrap();
        assert_eq!(project.labels.get("team").map(String::as_str), Some("x"));
    }

    #[tokio::test]
    async fn test_error_body_is_carried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/upgrades/cluster"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({"error": {"message": "boom"}})),
            )
            .mount(&server)
            .await;

        let err = client(&server).available_versions().await.unwrap_err();
        match err {
            MetaKubeError::Api(ApiError::RequestFailed { status, body, path, .. }) => {
                assert_eq!(status, 500);
                assert_eq!(path, "/api/v1/upgrades/cluster");
                assert_eq!(body, ErrorBody::Json(json!({"error": {"message": "boom"}})));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unauthorized_is_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/upgrades/cluster"))
            .respond_with(ResponseTemplate::new(401).set_body_string("no token"))
            .mount(&server)
            .await;

        let err = client(&server).available_versions().await.unwrap_err();
        assert!(matches!(
            err,
            MetaKubeError::Api(ApiError::AuthenticationFailed { status: 401, .. })
        ));
    }

    #[tokio::test]
    async fn test_patch_retries_conflicts_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/res"))
            .respond_with(ResponseTemplate::new(409))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/res"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let result: Value = client(&server)
            .patch("/res", &json!({"name": "x"}))
            .await
            .unwrap();
        assert_eq!(result, json!({"ok": true}));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_patch_gives_up_after_bounded_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/res"))
            .respond_with(ResponseTemplate::new(409))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server)
            .patch::<_, Value>("/res", &json!({"name": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MetaKubeError::Api(ApiError::ConflictRetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_patch_other_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/res"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .patch::<_, Value>("/res", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MetaKubeError::Api(ApiError::RequestFailed { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn test_patch_cancelled_between_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/res"))
            .respond_with(ResponseTemplate::new(409))
            .expect(1)
            .mount(&server)
            .await;

        let config = ApiConfig {
            url: server.uri(),
            conflict_delay_ms: 60_000,
            ..ApiConfig::default()
        };
        let cancel = CancellationToken::new();
        let client = MetaKubeClient::new(&config, "token", cancel.clone()).unwrap();
        cancel.cancel();

        let err = client
            .patch::<_, Value>("/res", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, MetaKubeError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/projects/prj/sshkeys/k1"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).delete_ssh_key("prj", "k1").await.unwrap();
    }

    #[tokio::test]
    async fn test_create_requires_created_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/projects/prj/sshkeys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "k1", "name": "alice", "spec": {"publicKey": "ssh-rsa AAA"}
            })))
            .mount(&server)
            .await;

        let key = SshKey {
            name: String::from("alice"),
            ..SshKey::default()
        };
        let err = client(&server).create_ssh_key("prj", &key).await.unwrap_err();
        assert!(matches!(
            err,
            MetaKubeError::Api(ApiError::UnexpectedStatus { expected: 201, status: 200, .. })
        ));
    }

    #[tokio::test]
    async fn test_openstack_listing_sends_credentials_as_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/providers/openstack/tenants"))
            .and(header_matcher("DatacenterName", "dbl1"))
            .and(header_matcher("Domain", "Default"))
            .and(header_matcher("Username", "ops"))
            .and(header_matcher("Password", "secret"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"id": "t1", "name": "tenant"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let provider = ProviderConfig {
            tenant: String::from("tenant"),
            username: String::from("ops"),
            password: String::from("secret"),
            domain: String::from("Default"),
        };
        let tenants = client(&server)
            .openstack_tenants("dbl1", &provider)
            .await
            .unwrap();
        assert_eq!(tenants.len(), 1);
        assert_eq!(tenants[0].name, "tenant");
    }

    #[tokio::test]
    async fn test_list_null_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/projects/prj/sshkeys"))
            .respond_with(ResponseTemplate::new(200).set_body_string("null"))
            .mount(&server)
            .await;

        let keys = client(&server).project_ssh_keys("prj").await.unwrap();
        assert!(keys.is_empty());
    }
}
