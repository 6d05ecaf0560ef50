/// Kubernetes objects managed as resources
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::client::{KubeApi, ObjectRef};
use crate::error::{Error, Result};
use crate::resource::{Lifecycle, Resource};

/// A complete manifest plus its identity
#[derive(Debug, Clone, PartialEq)]
pub struct K8sObject {
    resource_type: &'static str,
    object: ObjectRef,
    manifest: Value,
}

impl K8sObject {
    /// Build from a typed k8s-openapi object
    pub fn typed<T>(object: &T) -> Result<Self>
    where
        T: k8s_openapi::Resource + Serialize,
    {
        let mut manifest = serde_json::to_value(object)?;
        if let Some(map) = manifest.as_object_mut() {
            map.insert("apiVersion".to_string(), Value::from(T::API_VERSION));
            map.insert("kind".to_string(), Value::from(T::KIND));
        }
        Self::build(T::KIND, manifest)
    }

    /// Build from a raw manifest (custom objects, CRDs, storage)
    pub fn from_manifest(manifest: Value) -> Result<Self> {
        let kind = manifest
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Self::build(raw_resource_type(kind), manifest)
    }

    fn build(resource_type: &'static str, manifest: Value) -> Result<Self> {
        let field = |path: &[&str]| -> Option<String> {
            path.iter()
                .try_fold(&manifest, |value, key| value.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let api_version = field(&["apiVersion"])
            .ok_or_else(|| Error::validation(resource_type, "manifest has no apiVersion"))?;
        let kind = field(&["kind"])
            .ok_or_else(|| Error::validation(resource_type, "manifest has no kind"))?;
        let name = field(&["metadata", "name"])
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::validation(resource_type, "manifest has no metadata.name"))?;
        let namespace = field(&["metadata", "namespace"]);

        Ok(Self {
            resource_type,
            object: ObjectRef {
                api_version,
                kind,
                name,
                namespace,
            },
            manifest,
        })
    }

    pub fn object_ref(&self) -> &ObjectRef {
        &self.object
    }

    pub fn manifest(&self) -> &Value {
        &self.manifest
    }

    pub fn kind(&self) -> &str {
        &self.object.kind
    }

    pub fn namespace(&self) -> Option<&str> {
        self.object.namespace.as_deref()
    }
}

fn raw_resource_type(kind: &str) -> &'static str {
    match kind {
        "CustomResourceDefinition" => "CustomResourceDefinition",
        "PersistentVolume" => "PersistentVolume",
        "PersistentVolumeClaim" => "PersistentVolumeClaim",
        "StorageClass" => "StorageClass",
        _ => "CustomObject",
    }
}

impl Resource for K8sObject {
    type State = Value;

    fn resource_type(&self) -> &'static str {
        self.resource_type
    }

    fn name(&self) -> &str {
        &self.object.name
    }
}

#[async_trait]
impl<C> Lifecycle<C> for K8sObject
where
    C: KubeApi + ?Sized,
{
    async fn create(&self, client: &C) -> Result<Value> {
        client.apply(&self.manifest).await
    }

    async fn read(&self, client: &C) -> Result<Option<Value>> {
        let found = client.get(&self.object).await?;
        Ok(found.filter(|live| {
            live.pointer("/metadata/name").and_then(Value::as_str) == Some(self.object.name.as_str())
        }))
    }

    async fn update(&self, client: &C) -> Result<Value> {
        client.apply(&self.manifest).await
    }

    async fn delete(&self, client: &C) -> Result<()> {
        client.delete(&self.object).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Managed, Outcome};
    use k8s_openapi::api::core::v1 as corev1;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Cluster keyed by (kind, namespace, name)
    #[derive(Default)]
    struct FakeCluster {
        objects: Mutex<BTreeMap<(String, String, String), Value>>,
    }

    fn key(object: &ObjectRef) -> (String, String, String) {
        (
            object.kind.clone(),
            object.namespace.clone().unwrap_or_default(),
            object.name.clone(),
        )
    }

    #[async_trait]
    impl KubeApi for FakeCluster {
        async fn apply(&self, manifest: &Value) -> Result<Value> {
            let object = K8sObject::from_manifest(manifest.clone())?;
            let mut live = manifest.clone();
            live["metadata"]["uid"] = json!("uid-1");
            self.objects
                .lock()
                .unwrap()
                .insert(key(object.object_ref()), live.clone());
            Ok(live)
        }

        async fn get(&self, object: &ObjectRef) -> Result<Option<Value>> {
            Ok(self.objects.lock().unwrap().get(&key(object)).cloned())
        }

        async fn delete(&self, object: &ObjectRef) -> Result<()> {
            self.objects
                .lock()
                .unwrap()
                .remove(&key(object))
                .map(|_| ())
                .ok_or_else(|| Error::not_found(object.kind.clone(), object.name.clone()))
        }
    }

    fn config_map() -> corev1::ConfigMap {
        corev1::ConfigMap {
            metadata: metav1::ObjectMeta {
                name: Some("superset-ws-cm".to_string()),
                namespace: Some("tools".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "SUPERSET_PORT".to_string(),
                "8088".to_string(),
            )])),
            ..Default::default()
        }
    }

    #[test]
    fn test_typed_object_identity() {
        let object = K8sObject::typed(&config_map()).unwrap();
        assert_eq!(object.resource_type(), "ConfigMap");
        assert_eq!(object.name(), "superset-ws-cm");
        assert_eq!(object.namespace(), Some("tools"));
        assert_eq!(object.manifest()["apiVersion"], "v1");
        assert_eq!(object.manifest()["data"]["SUPERSET_PORT"], "8088");
    }

    #[test]
    fn test_raw_manifest_requires_name() {
        let manifest = json!({
            "apiVersion": "storage.k8s.io/v1",
            "kind": "StorageClass",
            "metadata": {}
        });
        assert!(matches!(
            K8sObject::from_manifest(manifest),
            Err(Error::Validation {
                resource: "StorageClass",
                ..
            })
        ));
    }

    #[test]
    fn test_custom_object_type() {
        let manifest = json!({
            "apiVersion": "traefik.containo.us/v1alpha1",
            "kind": "IngressRoute",
            "metadata": {"name": "superset", "namespace": "tools"}
        });
        let object = K8sObject::from_manifest(manifest).unwrap();
        assert_eq!(object.resource_type(), "CustomObject");
        assert_eq!(
            object.object_ref().kubectl_resource(),
            "ingressroute.v1alpha1.traefik.containo.us"
        );
    }

    #[tokio::test]
    async fn test_lifecycle_against_cluster() {
        let cluster = FakeCluster::default();
        let mut cm = Managed::new(K8sObject::typed(&config_map()).unwrap()).unwrap();

        assert!(cm.read(&cluster).await.is_none());
        assert!(matches!(cm.apply(&cluster).await, Outcome::Applied));
        assert_eq!(cm.active().unwrap()["metadata"]["uid"], "uid-1");

        assert!(matches!(cm.apply(&cluster).await, Outcome::Skipped));
        assert!(cm.update(&cluster).await.is_success());

        assert!(cm.destroy(&cluster).await.is_success());
        assert!(!cm.is_active());
        assert!(matches!(cm.destroy(&cluster).await, Outcome::Skipped));
    }

    #[tokio::test]
    async fn test_read_rejects_other_names() {
        let cluster = FakeCluster::default();
        let mut stray = config_map();
        stray.metadata.name = Some("other".to_string());
        let live = serde_json::to_value(&stray).unwrap();
        cluster.objects.lock().unwrap().insert(
            (
                "ConfigMap".to_string(),
                "tools".to_string(),
                "superset-ws-cm".to_string(),
            ),
            live,
        );

        let mut cm = Managed::new(K8sObject::typed(&config_map()).unwrap()).unwrap();
        assert!(cm.read(&cluster).await.is_none());
    }
}
