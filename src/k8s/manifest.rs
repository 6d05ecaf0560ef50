/// Builders for the Kubernetes manifests applications are deployed with
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::rbac::v1 as rbacv1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    #[default]
    Always,
    OnFailure,
    Never,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::Always => "Always",
            RestartPolicy::OnFailure => "OnFailure",
            RestartPolicy::Never => "Never",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    #[default]
    ClusterIP,
    NodePort,
    LoadBalancer,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::ClusterIP => "ClusterIP",
            ServiceType::NodePort => "NodePort",
            ServiceType::LoadBalancer => "LoadBalancer",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImagePullPolicy {
    Always,
    #[default]
    IfNotPresent,
    Never,
}

impl ImagePullPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImagePullPolicy::Always => "Always",
            ImagePullPolicy::IfNotPresent => "IfNotPresent",
            ImagePullPolicy::Never => "Never",
        }
    }
}

/// Container port, optionally exposed through a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub container_port: i32,
    /// Service port, defaults to the container port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_port: Option<i32>,
    /// Node port for NodePort/LoadBalancer services
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port: Option<i32>,
}

impl PortSpec {
    pub fn new(name: impl Into<String>, container_port: i32) -> Self {
        Self {
            name: name.into(),
            container_port,
            service_port: None,
            node_port: None,
        }
    }

    pub fn to_container_port(&self) -> corev1::ContainerPort {
        corev1::ContainerPort {
            name: Some(self.name.clone()),
            container_port: self.container_port,
            ..Default::default()
        }
    }

    pub fn to_service_port(&self) -> corev1::ServicePort {
        corev1::ServicePort {
            name: Some(self.name.clone()),
            port: self.service_port.unwrap_or(self.container_port),
            target_port: Some(IntOrString::String(self.name.clone())),
            node_port: self.node_port,
            ..Default::default()
        }
    }
}

/// Where a volume's data comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeSource {
    EmptyDir,
    HostPath { path: String },
    ConfigMap { name: String },
    Secret { name: String },
    PersistentVolumeClaim { claim_name: String },
}

/// Volume plus where it is mounted in the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    pub mount_path: String,
    pub source: VolumeSource,
    #[serde(default)]
    pub read_only: bool,
}

impl VolumeSpec {
    pub fn to_volume(&self) -> corev1::Volume {
        let mut volume = corev1::Volume {
            name: self.name.clone(),
            ..Default::default()
        };
        match &self.source {
            VolumeSource::EmptyDir => {
                volume.empty_dir = Some(corev1::EmptyDirVolumeSource::default());
            }
            VolumeSource::HostPath { path } => {
                volume.host_path = Some(corev1::HostPathVolumeSource {
                    path: path.clone(),
                    ..Default::default()
                });
            }
            VolumeSource::ConfigMap { name } => {
                volume.config_map = Some(corev1::ConfigMapVolumeSource {
                    name: Some(name.clone()),
                    ..Default::default()
                });
            }
            VolumeSource::Secret { name } => {
                volume.secret = Some(corev1::SecretVolumeSource {
                    secret_name: Some(name.clone()),
                    ..Default::default()
                });
            }
            VolumeSource::PersistentVolumeClaim { claim_name } => {
                volume.persistent_volume_claim =
                    Some(corev1::PersistentVolumeClaimVolumeSource {
                        claim_name: claim_name.clone(),
                        read_only: Some(self.read_only),
                    });
            }
        }
        volume
    }

    pub fn to_mount(&self) -> corev1::VolumeMount {
        corev1::VolumeMount {
            name: self.name.clone(),
            mount_path: self.mount_path.clone(),
            read_only: self.read_only.then_some(true),
            ..Default::default()
        }
    }
}

/// Container definition rendered into a pod spec
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub image_pull_policy: ImagePullPolicy,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    pub env: BTreeMap<String, String>,
    pub env_from_config_maps: Vec<String>,
    pub env_from_secrets: Vec<String>,
    pub ports: Vec<PortSpec>,
    pub volumes: Vec<VolumeSpec>,
}

fn non_empty<T: Clone>(items: &[T]) -> Option<Vec<T>> {
    (!items.is_empty()).then(|| items.to_vec())
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn to_container(&self) -> corev1::Container {
        let env: Vec<corev1::EnvVar> = self
            .env
            .iter()
            .map(|(name, value)| corev1::EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                ..Default::default()
            })
            .collect();

        let env_from: Vec<corev1::EnvFromSource> = self
            .env_from_config_maps
            .iter()
            .map(|name| corev1::EnvFromSource {
                config_map_ref: Some(corev1::ConfigMapEnvSource {
                    name: Some(name.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .chain(self.env_from_secrets.iter().map(|name| corev1::EnvFromSource {
                secret_ref: Some(corev1::SecretEnvSource {
                    name: Some(name.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            }))
            .collect();

        let ports: Vec<corev1::ContainerPort> =
            self.ports.iter().map(PortSpec::to_container_port).collect();
        let mounts: Vec<corev1::VolumeMount> =
            self.volumes.iter().map(VolumeSpec::to_mount).collect();

        corev1::Container {
            name: self.name.clone(),
            image: Some(self.image.clone()),
            image_pull_policy: Some(self.image_pull_policy.as_str().to_string()),
            command: non_empty(&self.command),
            args: non_empty(&self.args),
            working_dir: self.working_dir.clone(),
            env: non_empty(&env),
            env_from: non_empty(&env_from),
            ports: non_empty(&ports),
            volume_mounts: non_empty(&mounts),
            ..Default::default()
        }
    }
}

/// Object metadata with the app label applied
pub fn object_meta(
    name: &str,
    namespace: Option<&str>,
    labels: &BTreeMap<String, String>,
) -> metav1::ObjectMeta {
    metav1::ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: (!labels.is_empty()).then(|| labels.clone()),
        ..Default::default()
    }
}

pub fn namespace(name: &str) -> corev1::Namespace {
    corev1::Namespace {
        metadata: object_meta(name, None, &BTreeMap::new()),
        ..Default::default()
    }
}

pub fn service_account(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> corev1::ServiceAccount {
    corev1::ServiceAccount {
        metadata: object_meta(name, Some(namespace), labels),
        ..Default::default()
    }
}

/// Cluster role with full access to the given API groups
pub fn cluster_role(
    name: &str,
    api_groups: &[&str],
    labels: &BTreeMap<String, String>,
) -> rbacv1::ClusterRole {
    rbacv1::ClusterRole {
        metadata: object_meta(name, None, labels),
        rules: Some(vec![rbacv1::PolicyRule {
            api_groups: Some(api_groups.iter().map(|g| g.to_string()).collect()),
            resources: Some(vec!["*".to_string()]),
            verbs: vec!["*".to_string()],
            ..Default::default()
        }]),
        ..Default::default()
    }
}

pub fn cluster_role_binding(
    name: &str,
    role: &str,
    service_account: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> rbacv1::ClusterRoleBinding {
    rbacv1::ClusterRoleBinding {
        metadata: object_meta(name, None, labels),
        role_ref: rbacv1::RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: role.to_string(),
        },
        subjects: Some(vec![rbacv1::Subject {
            kind: "ServiceAccount".to_string(),
            name: service_account.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

pub fn config_map(
    name: &str,
    namespace: &str,
    data: BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> corev1::ConfigMap {
    corev1::ConfigMap {
        metadata: object_meta(name, Some(namespace), labels),
        data: Some(data),
        ..Default::default()
    }
}

/// Opaque secret from plain string values
pub fn secret(
    name: &str,
    namespace: &str,
    string_data: BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> corev1::Secret {
    corev1::Secret {
        metadata: object_meta(name, Some(namespace), labels),
        string_data: Some(string_data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Pod-level settings for a deployment
#[derive(Debug, Clone, Default)]
pub struct PodSpecOptions {
    pub replicas: i32,
    pub service_account: Option<String>,
    pub restart_policy: RestartPolicy,
    pub init_containers: Vec<ContainerSpec>,
    pub node_selector: BTreeMap<String, String>,
    /// Spread pods across this topology key (e.g. `kubernetes.io/hostname`)
    pub topology_spread_key: Option<String>,
    pub topology_spread_max_skew: i32,
    pub topology_spread_when_unsatisfiable: Option<String>,
}

pub fn deployment(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    containers: &[ContainerSpec],
    options: &PodSpecOptions,
) -> appsv1::Deployment {
    let mut volumes: Vec<corev1::Volume> = Vec::new();
    for spec in containers.iter().chain(options.init_containers.iter()) {
        for volume in &spec.volumes {
            if !volumes.iter().any(|v| v.name == volume.name) {
                volumes.push(volume.to_volume());
            }
        }
    }

    let topology_spread_constraints = options.topology_spread_key.as_ref().map(|key| {
        vec![corev1::TopologySpreadConstraint {
            max_skew: options.topology_spread_max_skew.max(1),
            topology_key: key.clone(),
            when_unsatisfiable: options
                .topology_spread_when_unsatisfiable
                .clone()
                .unwrap_or_else(|| "DoNotSchedule".to_string()),
            label_selector: Some(metav1::LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }]
    });

    let init_containers: Vec<corev1::Container> = options
        .init_containers
        .iter()
        .map(ContainerSpec::to_container)
        .collect();

    appsv1::Deployment {
        metadata: object_meta(name, Some(namespace), labels),
        spec: Some(appsv1::DeploymentSpec {
            replicas: Some(options.replicas.max(1)),
            selector: metav1::LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: corev1::PodTemplateSpec {
                metadata: Some(metav1::ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(corev1::PodSpec {
                    containers: containers.iter().map(ContainerSpec::to_container).collect(),
                    init_containers: non_empty(&init_containers),
                    volumes: non_empty(&volumes),
                    service_account_name: options.service_account.clone(),
                    restart_policy: Some(options.restart_policy.as_str().to_string()),
                    node_selector: (!options.node_selector.is_empty())
                        .then(|| options.node_selector.clone()),
                    topology_spread_constraints,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn service(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    service_type: ServiceType,
    ports: &[PortSpec],
) -> corev1::Service {
    corev1::Service {
        metadata: object_meta(name, Some(namespace), labels),
        spec: Some(corev1::ServiceSpec {
            type_: Some(service_type.as_str().to_string()),
            selector: Some(labels.clone()),
            ports: Some(ports.iter().map(PortSpec::to_service_port).collect()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Raw PersistentVolumeClaim manifest
pub fn persistent_volume_claim(
    name: &str,
    namespace: &str,
    storage_class: Option<&str>,
    size: &str,
) -> Value {
    let mut manifest = json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": {"name": name, "namespace": namespace},
        "spec": {
            "accessModes": ["ReadWriteOnce"],
            "resources": {"requests": {"storage": size}}
        }
    });
    if let Some(class) = storage_class {
        manifest["spec"]["storageClassName"] = json!(class);
    }
    manifest
}

/// Raw StorageClass manifest
pub fn storage_class(name: &str, provisioner: &str, parameters: &BTreeMap<String, String>) -> Value {
    json!({
        "apiVersion": "storage.k8s.io/v1",
        "kind": "StorageClass",
        "metadata": {"name": name},
        "provisioner": provisioner,
        "parameters": parameters,
        "reclaimPolicy": "Delete",
        "volumeBindingMode": "WaitForFirstConsumer"
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> BTreeMap<String, String> {
        BTreeMap::from([("app".to_string(), "superset-ws".to_string())])
    }

    #[test]
    fn test_container_only_sets_non_empty_fields() {
        let container = ContainerSpec::new("superset-ws", "phidata/superset:2.0.0").to_container();
        assert_eq!(container.image.as_deref(), Some("phidata/superset:2.0.0"));
        assert!(container.command.is_none());
        assert!(container.env.is_none());
        assert!(container.volume_mounts.is_none());
    }

    #[test]
    fn test_container_env_sources() {
        let mut spec = ContainerSpec::new("app", "image");
        spec.env_from_config_maps.push("app-cm".to_string());
        spec.env_from_secrets.push("app-secret".to_string());
        let container = spec.to_container();

        let env_from = container.env_from.unwrap();
        assert_eq!(env_from.len(), 2);
        assert_eq!(
            env_from[0].config_map_ref.as_ref().unwrap().name.as_deref(),
            Some("app-cm")
        );
        assert_eq!(
            env_from[1].secret_ref.as_ref().unwrap().name.as_deref(),
            Some("app-secret")
        );
    }

    #[test]
    fn test_deployment_collects_volumes_once() {
        let shared = VolumeSpec {
            name: "git-sync".to_string(),
            mount_path: "/git".to_string(),
            source: VolumeSource::EmptyDir,
            read_only: false,
        };
        let mut app = ContainerSpec::new("app", "image");
        app.volumes.push(shared.clone());
        let mut sidecar = ContainerSpec::new("git-sync", "git-sync-image");
        sidecar.volumes.push(shared);

        let options = PodSpecOptions {
            replicas: 2,
            topology_spread_key: Some("kubernetes.io/hostname".to_string()),
            ..Default::default()
        };
        let deploy = deployment("app", "tools", &labels(), &[app, sidecar], &options);
        let spec = deploy.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.containers.len(), 2);
        assert_eq!(pod.volumes.unwrap().len(), 1);
        let spread = pod.topology_spread_constraints.unwrap();
        assert_eq!(spread[0].max_skew, 1);
        assert_eq!(spread[0].when_unsatisfiable, "DoNotSchedule");
    }

    #[test]
    fn test_service_ports_target_named_port() {
        let mut port = PortSpec::new("http", 8088);
        port.service_port = Some(80);
        let svc = service("app-svc", "tools", &labels(), ServiceType::NodePort, &[port]);
        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        let ports = spec.ports.unwrap();
        assert_eq!(ports[0].port, 80);
        assert_eq!(
            ports[0].target_port,
            Some(IntOrString::String("http".to_string()))
        );
    }

    #[test]
    fn test_pvc_manifest() {
        let pvc = persistent_volume_claim("data", "tools", Some("gp2"), "10Gi");
        assert_eq!(pvc["spec"]["storageClassName"], "gp2");
        assert_eq!(pvc["spec"]["resources"]["requests"]["storage"], "10Gi");
    }
}
