/// Kubernetes API access through kubectl
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

use crate::error::{Error, Result};
use crate::utils::command::CommandBuilder;

/// Identity of a Kubernetes object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl ObjectRef {
    /// Resource argument for kubectl, e.g. `deployment.v1.apps` or `configmap`
    pub fn kubectl_resource(&self) -> String {
        let kind = self.kind.to_lowercase();
        match self.api_version.split_once('/') {
            Some((group, version)) => format!("{}.{}.{}", kind, version, group),
            None => kind,
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} in {}", self.kind, self.name, ns),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Kubernetes operations used by manifest resources
#[async_trait]
pub trait KubeApi: Send + Sync {
    /// Apply a full manifest, returning the live object
    async fn apply(&self, manifest: &Value) -> Result<Value>;

    /// Fetch an object; `Ok(None)` when it does not exist
    async fn get(&self, object: &ObjectRef) -> Result<Option<Value>>;

    async fn delete(&self, object: &ObjectRef) -> Result<()>;
}

/// kubectl connection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KubeConfig {
    /// Path to a kubeconfig file (defaults to kubectl's own lookup)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,

    /// kubeconfig context to use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Kubernetes client for kubectl operations
#[derive(Debug, Clone, Default)]
pub struct KubectlClient {
    config: KubeConfig,
}

impl KubectlClient {
    pub fn new(config: KubeConfig) -> Self {
        Self { config }
    }

    /// Check if kubectl is installed
    pub async fn check_installed() -> Result<()> {
        crate::utils::command::check_tool_installed(
            "kubectl",
            &["version", "--client"],
            "https://kubernetes.io/docs/tasks/tools/",
        )
        .await
    }

    fn command(&self) -> CommandBuilder {
        let mut builder = CommandBuilder::new("kubectl");
        if let Some(path) = &self.config.kubeconfig {
            builder = builder.kubeconfig(path);
        }
        if let Some(context) = &self.config.context {
            builder = builder.args(["--context", context.as_str()]);
        }
        builder
    }

    fn namespace_args(object: &ObjectRef) -> Vec<String> {
        match &object.namespace {
            Some(ns) => vec!["-n".to_string(), ns.clone()],
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl KubeApi for KubectlClient {
    async fn apply(&self, manifest: &Value) -> Result<Value> {
        let body = serde_json::to_vec(manifest)?;
        let stdout = self
            .command()
            .args(["apply", "-f", "-", "-o", "json"])
            .stdin(body)
            .run("kubectl")
            .await?;
        debug!("apply_response: {}", stdout.trim());
        Ok(serde_json::from_str(&stdout)?)
    }

    async fn get(&self, object: &ObjectRef) -> Result<Option<Value>> {
        let resource = object.kubectl_resource();
        let output = self
            .command()
            .args(["get", resource.as_str(), object.name.as_str()])
            .args(Self::namespace_args(object))
            .args(["-o", "json", "--ignore-not-found"])
            .output()
            .await?;

        if !output.success {
            if output.is_not_found() {
                return Ok(None);
            }
            return Err(Error::provider("kubectl", output.stderr.trim()));
        }
        if output.stdout.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&output.stdout)?))
    }

    async fn delete(&self, object: &ObjectRef) -> Result<()> {
        let resource = object.kubectl_resource();
        let output = self
            .command()
            .args(["delete", resource.as_str(), object.name.as_str()])
            .args(Self::namespace_args(object))
            .output()
            .await?;

        if output.success {
            debug!("delete_response: {}", output.stdout.trim());
            return Ok(());
        }
        if output.is_not_found() {
            return Err(Error::not_found(object.kind.clone(), object.name.clone()));
        }
        Err(Error::provider("kubectl", output.stderr.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object_ref(api_version: &str, kind: &str) -> ObjectRef {
        ObjectRef {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: "superset-ws".to_string(),
            namespace: Some("tools".to_string()),
        }
    }

    #[test]
    fn test_kubectl_resource_names() {
        assert_eq!(
            object_ref("apps/v1", "Deployment").kubectl_resource(),
            "deployment.v1.apps"
        );
        assert_eq!(object_ref("v1", "ConfigMap").kubectl_resource(), "configmap");
        assert_eq!(
            object_ref("rbac.authorization.k8s.io/v1", "ClusterRole").kubectl_resource(),
            "clusterrole.v1.rbac.authorization.k8s.io"
        );
    }

    #[test]
    fn test_object_ref_display() {
        assert_eq!(
            object_ref("v1", "Service").to_string(),
            "Service/superset-ws in tools"
        );
    }

    #[tokio::test]
    async fn test_check_kubectl() {
        // Informational: kubectl is usually absent in test environments
        let result = KubectlClient::check_installed().await;
        if result.is_err() {
            println!("kubectl not installed (expected in test environment)");
        }
    }
}
