//! Project-scoped SSH keys.
//!
//! Keys are independent of clusters, so these entry points talk to the
//! project key collection directly and never go through the provisioner.

use tracing::{debug, info};

use crate::error::{ApiError, MetaKubeError, Result};

use super::client::MetaKubeClient;
use super::types::{SshKey, SshKeySpec};

/// Manages SSH keys of a project.
#[derive(Debug, Clone)]
pub struct SshKeyManager {
    client: MetaKubeClient,
}

impl SshKeyManager {
    /// Creates a new manager.
    #[must_use]
    pub const fn new(client: MetaKubeClient) -> Self {
        Self { client }
    }

    /// Uploads a key and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails or the response has no id.
    pub async fn create(&self, project_id: &str, name: &str, public_key: &str) -> Result<String> {
        info!("Creating SSH key {name} in project {project_id}");

        let request = SshKey {
            name: name.to_string(),
            spec: SshKeySpec {
                public_key: public_key.trim().to_string(),
                fingerprint: None,
            },
            ..SshKey::default()
        };
        let created = self.client.create_ssh_key(project_id, &request).await?;
        if created.id.is_empty() {
            return Err(MetaKubeError::Api(ApiError::InvalidResponse {
                path: format!("/api/v1/projects/{project_id}/sshkeys"),
                message: String::from("created SSH key has no id"),
            }));
        }

        info!("Created SSH key {name} (ID: {})", created.id);
        Ok(created.id)
    }

    /// Looks a key up by id.
    ///
    /// Returns `None` when the key is gone or its delete was accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn read(&self, project_id: &str, key_id: &str) -> Result<Option<SshKey>> {
        let key = self
            .client
            .project_ssh_keys(project_id)
            .await?
            .into_iter()
            .find(|key| key.id == key_id && key.deletion_timestamp.is_none());

        if key.is_none() {
            debug!("SSH key {key_id} not found in project {project_id}");
        }
        Ok(key)
    }

    /// Deletes a key. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn delete(&self, project_id: &str, key_id: &str) -> Result<()> {
        info!("Deleting SSH key {key_id} from project {project_id}");
        self.client.delete_ssh_key(project_id, key_id).await
    }
}

/// Compares two public keys, ignoring surrounding whitespace.
#[must_use]
pub fn same_public_key(a: &str, b: &str) -> bool {
    a.trim() == b.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEYS: &str = "/api/v1/projects/prj/sshkeys";

    fn manager(server: &MockServer) -> SshKeyManager {
        let config = ApiConfig {
            url: server.uri(),
            ..ApiConfig::default()
        };
        SshKeyManager::new(MetaKubeClient::new(&config, "token", CancellationToken::new()).unwrap())
    }

    #[test]
    fn test_public_key_comparison_ignores_whitespace() {
        assert!(same_public_key("ssh-rsa AAAA me@host\n", "  ssh-rsa AAAA me@host"));
        assert!(!same_public_key("ssh-rsa AAAA", "ssh-rsa BBBB"));
    }

    #[tokio::test]
    async fn test_create_trims_public_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(KEYS))
            .and(body_json(json!({"name": "alice", "spec": {"publicKey": "ssh-rsa AAAA"}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "k1",
                "name": "alice",
                "spec": {"publicKey": "ssh-rsa AAAA", "fingerprint": "aa:bb"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let id = manager(&server)
            .create("prj", "alice", "ssh-rsa AAAA\n")
            .await
            .unwrap();
        assert_eq!(id, "k1");
    }

    #[tokio::test]
    async fn test_read_skips_soft_deleted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(KEYS))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "k1", "name": "alice", "spec": {"publicKey": "ssh-rsa A"}},
                {"id": "k2", "name": "bob", "spec": {"publicKey": "ssh-rsa B"}, "deletionTimestamp": "2020-03-03T04:06:52Z"}
            ])))
            .mount(&server)
            .await;

        let keys = manager(&server);
        let alice = keys.read("prj", "k1").await.unwrap().unwrap();
        assert_eq!(alice.name, "alice");
        assert!(keys.read("prj", "k2").await.unwrap().is_none());
        assert!(keys.read("prj", "k3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_key_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(format!("{KEYS}/k1")))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        manager(&server).delete("prj", "k1").await.unwrap();
    }
}
