//! Secrets store capability.
//!
//! The core only issues `get`/`write`/`delete` against team-scoped paths; the
//! vault-backed implementation ships with the deployment. The in-memory
//! backend here serves the standalone binary and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Builds the canonical `teams/<teamUUID>/secrets/<secretUUID>` path.
pub fn team_secret_path(team_id: Uuid, secret_id: Uuid) -> String {
    format!("teams/{team_id}/secrets/{secret_id}")
}

#[derive(Debug, Clone, Default)]
pub struct SecretMetadata {
    pub entries: HashMap<String, String>,
}

#[async_trait]
pub trait SecretsStore: Send + Sync {
    async fn get_secret(&self, path: &str) -> Result<(String, SecretMetadata)>;
    async fn write_secret(
        &self,
        path: &str,
        value: &str,
        metadata: SecretMetadata,
    ) -> Result<()>;
    async fn delete_secret(&self, path: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemorySecrets {
    entries: DashMap<String, (String, SecretMetadata)>,
}

impl MemorySecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SecretsStore for MemorySecrets {
    async fn get_secret(&self, path: &str) -> Result<(String, SecretMetadata)> {
        self.entries
            .get(path)
            .map(|e| e.clone())
            .ok_or_else(|| Error::not_found(format!("secret {path}")))
    }

    async fn write_secret(
        &self,
        path: &str,
        value: &str,
        metadata: SecretMetadata,
    ) -> Result<()> {
        self.entries
            .insert(path.to_string(), (value.to_string(), metadata));
        Ok(())
    }

    async fn delete_secret(&self, path: &str) -> Result<()> {
        self.entries.remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_secret_path_shape() {
        let team = Uuid::new_v4();
        let secret = Uuid::new_v4();
        let path = team_secret_path(team, secret);
        assert_eq!(path, format!("teams/{team}/secrets/{secret}"));
    }

    #[tokio::test]
    async fn test_write_get_delete_roundtrip() {
        let store = MemorySecrets::new();
        let path = team_secret_path(Uuid::new_v4(), Uuid::new_v4());

        store
            .write_secret(&path, "tok-123", SecretMetadata::default())
            .await
            .unwrap();
        let (value, _) = store.get_secret(&path).await.unwrap();
        assert_eq!(value, "tok-123");

        store.delete_secret(&path).await.unwrap();
        let err = store.get_secret(&path).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemorySecrets::new();
        store.delete_secret("teams/x/secrets/y").await.unwrap();
    }
}
