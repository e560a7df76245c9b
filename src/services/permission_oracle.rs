use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Capability lookup against the sibling auth service. The engine consumes
/// exactly one capability: whether a user's source accounts may go negative.
#[async_trait]
pub trait PermissionOracle: Send + Sync {
    async fn allow_negative(&self, tenant_id: &str, user_id: &str) -> Result<bool>;
}

#[derive(Debug, Deserialize)]
struct CapabilityResponse {
    allow_negative: bool,
}

/// Production oracle querying the auth service over HTTP. Lookup failures
/// deny the capability; an unreachable auth service must never widen what a
/// user can do.
pub struct HttpPermissionOracle {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPermissionOracle {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PermissionOracle for HttpPermissionOracle {
    async fn allow_negative(&self, tenant_id: &str, user_id: &str) -> Result<bool> {
        let url = format!(
            "{}/tenants/{}/users/{}/capabilities",
            self.base_url, tenant_id, user_id
        );

        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<CapabilityResponse>().await {
                    Ok(caps) => Ok(caps.allow_negative),
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "malformed capability response, denying");
                        Ok(false)
                    }
                }
            }
            Ok(response) => {
                warn!(user_id = %user_id, status = %response.status(), "capability lookup rejected, denying");
                Ok(false)
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "capability lookup unreachable, denying");
                Ok(false)
            }
        }
    }
}

/// Test/stub oracle with a fixed default and per-user overrides.
#[derive(Debug, Default)]
pub struct StaticPermissionOracle {
    default_allow: bool,
    overrides: HashMap<(String, String), bool>,
}

impl StaticPermissionOracle {
    pub fn denying() -> Self {
        Self::default()
    }

    pub fn allowing() -> Self {
        Self {
            default_allow: true,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(
        mut self,
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        allow: bool,
    ) -> Self {
        self.overrides
            .insert((tenant_id.into(), user_id.into()), allow);
        self
    }
}

#[async_trait]
impl PermissionOracle for StaticPermissionOracle {
    async fn allow_negative(&self, tenant_id: &str, user_id: &str) -> Result<bool> {
        Ok(self
            .overrides
            .get(&(tenant_id.to_string(), user_id.to_string()))
            .copied()
            .unwrap_or(self.default_allow))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_oracle_default() {
        let oracle = StaticPermissionOracle::denying();
        assert!(!oracle.allow_negative("t1", "u1").await.unwrap());

        let oracle = StaticPermissionOracle::allowing();
        assert!(oracle.allow_negative("t1", "u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_static_oracle_override() {
        let oracle = StaticPermissionOracle::denying().with_override("t1", "house", true);
        assert!(oracle.allow_negative("t1", "house").await.unwrap());
        assert!(!oracle.allow_negative("t1", "u1").await.unwrap());
        assert!(!oracle.allow_negative("t2", "house").await.unwrap());
    }
}
