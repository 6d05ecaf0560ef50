/// Superset webserver bundle for Docker or Kubernetes
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{read_env_file, split_command, workspace_name, AppTarget};
use crate::docker::container::{DockerRestartPolicy, Healthcheck, HostPort, VolumeBinding};
use crate::docker::DockerContainer;
use crate::error::{Error, Result};
use crate::k8s::manifest::{
    self, ContainerSpec, ImagePullPolicy, PodSpecOptions, PortSpec, RestartPolicy, ServiceType,
    VolumeSource, VolumeSpec,
};
use crate::k8s::K8sObject;
use crate::resource::Resource;

const RESOURCE_TYPE: &str = "SupersetWebserver";
const DEFAULT_PYTHON_PATH: &str = "/app/pythonpath:/app/docker/pythonpath_dev";
const GIT_SYNC_IMAGE: &str = "k8s.gcr.io/git-sync/git-sync:v3.1.1";

fn default_true() -> bool {
    true
}

fn default_name() -> String {
    "superset-ws".to_string()
}

fn default_version() -> String {
    "1".to_string()
}

fn default_requirements_file() -> String {
    "requirements.txt".to_string()
}

/// Image and entrypoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub name: String,
    pub tag: String,
    pub entrypoint: Option<String>,
    pub command: Option<String>,
    pub pull_policy: ImagePullPolicy,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            name: "phidata/superset".to_string(),
            tag: "2.0.0".to_string(),
            entrypoint: None,
            command: Some("webserver".to_string()),
            pull_policy: ImagePullPolicy::IfNotPresent,
        }
    }
}

/// Metadata database connection; any field may instead come from the secrets file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub wait: bool,
    pub user: Option<String>,
    pub password: Option<String>,
    pub schema: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dialect: Option<String>,
}

/// Redis connection; any field may instead come from the secrets file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub wait: bool,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub driver: Option<String>,
}

/// Settings shared by the Docker and Kubernetes containers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Container name, defaults to the app name
    pub name: Option<String>,
    pub superset_config_path: Option<String>,
    pub flask_env: String,
    pub superset_env: String,
    /// PYTHONPATH, defaults to /app/pythonpath:/app/docker/pythonpath_dev
    pub python_path: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            name: None,
            superset_config_path: None,
            flask_env: "production".to_string(),
            superset_env: "production".to_string(),
            python_path: None,
            labels: BTreeMap::new(),
        }
    }
}

/// Docker-only container settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSettings {
    pub detach: bool,
    pub auto_remove: bool,
    pub remove: bool,
    pub user: Option<String>,
    pub stdin_open: bool,
    pub tty: bool,
    pub healthcheck: Option<Healthcheck>,
    pub hostname: Option<String>,
    pub platform: Option<String>,
    pub working_dir: Option<String>,
    pub restart_policy: Option<DockerRestartPolicy>,
    pub volumes: BTreeMap<String, VolumeBinding>,
    pub ports: BTreeMap<String, Option<HostPort>>,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            detach: true,
            auto_remove: true,
            remove: true,
            user: None,
            stdin_open: true,
            tty: true,
            healthcheck: None,
            hostname: None,
            platform: Some("linux/amd64".to_string()),
            working_dir: None,
            restart_policy: None,
            volumes: BTreeMap::new(),
            ports: BTreeMap::new(),
        }
    }
}

/// Container and app ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub open_container_port: bool,
    pub container_port: u16,
    pub container_port_name: String,
    pub container_host_port: u16,
    pub open_app_port: bool,
    /// Also exported as SUPERSET_PORT
    pub app_port: u16,
    pub app_port_name: String,
    pub app_host_port: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            open_container_port: false,
            container_port: 8000,
            container_port_name: "http".to_string(),
            container_host_port: 8000,
            open_app_port: true,
            app_port: 8088,
            app_port_name: "app".to_string(),
            app_host_port: 8088,
        }
    }
}

/// Workspace volume: a host mount on Docker, git-sync on Kubernetes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceMount {
    pub mount: bool,
    pub volume_name: Option<String>,
    /// Parent directory; the workspace lands in `<container_path>/<workspace name>`
    pub container_path: String,
    pub create_git_sync_sidecar: bool,
    pub create_git_sync_init_container: bool,
    pub git_sync_repo: Option<String>,
    pub git_sync_branch: Option<String>,
    pub git_sync_wait: u32,
    /// Mount the local workspace with a hostPath instead of git-sync
    pub k8s_mount_local: bool,
}

impl Default for WorkspaceMount {
    fn default() -> Self {
        Self {
            mount: false,
            volume_name: None,
            container_path: "/mnt/workspaces".to_string(),
            create_git_sync_sidecar: true,
            create_git_sync_init_container: true,
            git_sync_repo: None,
            git_sync_branch: None,
            git_sync_wait: 1,
            k8s_mount_local: false,
        }
    }
}

/// Superset resources directory (docker-bootstrap.sh etc.), Docker only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesMount {
    pub mount: bool,
    /// Relative to the workspace root
    pub dir: String,
    pub container_path: String,
    pub volume_name: Option<String>,
}

impl Default for ResourcesMount {
    fn default() -> Self {
        Self {
            mount: false,
            dir: "workspace/superset".to_string(),
            container_path: "/app/docker".to_string(),
            volume_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub name: Option<String>,
    pub replicas: i32,
    pub node_selector: BTreeMap<String, String>,
    pub restart_policy: RestartPolicy,
    pub labels: BTreeMap<String, String>,
    pub topology_spread_key: Option<String>,
    pub topology_spread_max_skew: Option<i32>,
    pub topology_spread_when_unsatisfiable: Option<String>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            name: None,
            replicas: 1,
            node_selector: BTreeMap::new(),
            restart_policy: RestartPolicy::Always,
            labels: BTreeMap::new(),
            topology_spread_key: None,
            topology_spread_max_skew: None,
            topology_spread_when_unsatisfiable: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub create: bool,
    pub name: Option<String>,
    pub service_type: ServiceType,
    pub port: i32,
    pub node_port: Option<i32>,
    pub labels: BTreeMap<String, String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            create: true,
            name: None,
            service_type: ServiceType::ClusterIP,
            port: 8088,
            node_port: None,
            labels: BTreeMap::new(),
        }
    }
}

/// Separate Namespace, ServiceAccount, ClusterRole and ClusterRoleBinding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RbacConfig {
    pub enabled: bool,
    pub ns_name: Option<String>,
    pub sa_name: Option<String>,
    pub cr_name: Option<String>,
    pub crb_name: Option<String>,
}

/// Persistent volume claim added next to the deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvcConfig {
    pub name: String,
    pub size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

/// Storage class created ahead of the app's volume claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageClassConfig {
    pub name: String,
    pub provisioner: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

/// Additional Kubernetes objects deployed with the app
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Extras {
    pub storage_classes: Vec<StorageClassConfig>,
    pub pvcs: Vec<PvcConfig>,
    /// Raw manifests: custom objects, CRDs, PVs
    pub manifests: Vec<Value>,
    pub volumes: Vec<VolumeSpec>,
    pub ports: Vec<PortSpec>,
}

/// Superset webserver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupersetWebserver {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub target: AppTarget,

    #[serde(default)]
    pub image: ImageConfig,

    /// Install python dependencies from `requirements_file_path`
    #[serde(default)]
    pub install_requirements: bool,
    /// Relative to the workspace root
    #[serde(default = "default_requirements_file")]
    pub requirements_file_path: String,

    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub container: ContainerConfig,
    #[serde(default)]
    pub docker: DockerSettings,
    #[serde(default)]
    pub ports: PortsConfig,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// YAML file of extra env variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_name: Option<String>,

    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    /// YAML file of secret env variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    #[serde(default)]
    pub workspace: WorkspaceMount,
    #[serde(default)]
    pub resources: ResourcesMount,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub rbac: RbacConfig,

    /// Sets SUPERSET_LOAD_EXAMPLES=yes
    #[serde(default)]
    pub load_examples: bool,
    #[serde(default = "default_true")]
    pub print_env_on_load: bool,

    #[serde(default)]
    pub extras: Extras,

    #[serde(default = "default_true")]
    pub use_cache: bool,
}

impl Default for SupersetWebserver {
    fn default() -> Self {
        Self {
            name: default_name(),
            version: default_version(),
            enabled: true,
            target: AppTarget::default(),
            image: ImageConfig::default(),
            install_requirements: false,
            requirements_file_path: default_requirements_file(),
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            container: ContainerConfig::default(),
            docker: DockerSettings::default(),
            ports: PortsConfig::default(),
            env: BTreeMap::new(),
            env_file: None,
            config_map_name: None,
            secrets: BTreeMap::new(),
            secrets_file: None,
            secret_name: None,
            workspace: WorkspaceMount::default(),
            resources: ResourcesMount::default(),
            deployment: DeploymentConfig::default(),
            service: ServiceConfig::default(),
            rbac: RbacConfig::default(),
            load_examples: false,
            print_env_on_load: true,
            extras: Extras::default(),
            use_cache: true,
        }
    }
}

fn insert_opt<T: ToString>(env: &mut BTreeMap<String, String>, key: &str, value: &Option<T>) {
    if let Some(v) = value {
        env.insert(key.to_string(), v.to_string());
    }
}

fn flag(value: bool) -> String {
    let flag = if value { "True" } else { "False" };
    flag.to_string()
}

impl SupersetWebserver {
    pub fn validate(self) -> Result<Self> {
        if self.name.is_empty() {
            return Err(Error::validation(RESOURCE_TYPE, "name cannot be empty"));
        }
        if self.deployment.replicas < 1 {
            return Err(Error::validation(RESOURCE_TYPE, "replicas must be at least 1"));
        }
        if self.ports.app_port == 0 || (self.ports.open_container_port && self.ports.container_port == 0)
        {
            return Err(Error::validation(RESOURCE_TYPE, "ports must be non-zero"));
        }
        if self.docker.auto_remove
            && self
                .docker
                .restart_policy
                .as_ref()
                .is_some_and(|p| p.name != crate::docker::container::RestartPolicyName::No)
        {
            return Err(Error::validation(
                RESOURCE_TYPE,
                "docker.auto_remove conflicts with docker.restart_policy",
            ));
        }
        Ok(self)
    }

    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image.name, self.image.tag)
    }

    pub fn container_name(&self) -> &str {
        self.container.name.as_deref().unwrap_or(&self.name)
    }

    fn derived_name(&self, explicit: &Option<String>, suffix: &str) -> String {
        explicit
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.name, suffix))
    }

    pub fn namespace(&self) -> String {
        if self.rbac.enabled {
            self.derived_name(&self.rbac.ns_name, "ns")
        } else {
            self.rbac
                .ns_name
                .clone()
                .unwrap_or_else(|| "default".to_string())
        }
    }

    fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::from([("app".to_string(), self.name.clone())]);
        labels.extend(self.deployment.labels.clone());
        labels
    }

    /// Workspace directory inside the container
    fn workspace_dir(&self, workspace_root: Option<&Path>) -> Option<String> {
        workspace_root.map(|root| {
            format!(
                "{}/{}",
                self.workspace.container_path.trim_end_matches('/'),
                workspace_name(root)
            )
        })
    }

    /// Non-secret container environment
    ///
    /// Computed values come first, then `env_file`, then `env`.
    pub fn container_env(&self, workspace_root: Option<&Path>) -> Result<BTreeMap<String, String>> {
        let mut env = BTreeMap::new();
        env.insert("SUPERSET_PORT".to_string(), self.ports.app_port.to_string());
        env.insert("FLASK_ENV".to_string(), self.container.flask_env.clone());
        env.insert("SUPERSET_ENV".to_string(), self.container.superset_env.clone());
        env.insert(
            "PYTHONPATH".to_string(),
            self.container
                .python_path
                .clone()
                .unwrap_or_else(|| DEFAULT_PYTHON_PATH.to_string()),
        );
        insert_opt(
            &mut env,
            "SUPERSET_CONFIG_PATH",
            &self.container.superset_config_path,
        );
        if self.load_examples {
            env.insert("SUPERSET_LOAD_EXAMPLES".to_string(), "yes".to_string());
        }
        env.insert(
            "PRINT_ENV_ON_LOAD".to_string(),
            flag(self.print_env_on_load),
        );

        if self.install_requirements {
            env.insert("INSTALL_REQUIREMENTS".to_string(), flag(true));
            let path = match self.workspace_dir(workspace_root) {
                Some(dir) => format!("{}/{}", dir, self.requirements_file_path),
                None => self.requirements_file_path.clone(),
            };
            env.insert("REQUIREMENTS_FILE_PATH".to_string(), path);
        }
        if let Some(dir) = self.workspace_dir(workspace_root) {
            env.insert("WORKSPACE_DIR".to_string(), dir);
        }

        env.insert("WAIT_FOR_DB".to_string(), flag(self.database.wait));
        insert_opt(&mut env, "DATABASE_USER", &self.database.user);
        insert_opt(&mut env, "DATABASE_DB", &self.database.schema);
        insert_opt(&mut env, "DATABASE_HOST", &self.database.host);
        insert_opt(&mut env, "DATABASE_PORT", &self.database.port);
        insert_opt(&mut env, "DATABASE_DIALECT", &self.database.dialect);

        env.insert("WAIT_FOR_REDIS".to_string(), flag(self.redis.wait));
        insert_opt(&mut env, "REDIS_HOST", &self.redis.host);
        insert_opt(&mut env, "REDIS_PORT", &self.redis.port);
        insert_opt(&mut env, "REDIS_DRIVER", &self.redis.driver);

        if let Some(path) = &self.env_file {
            env.extend(read_env_file(path, workspace_root)?);
        }
        env.extend(self.env.clone());
        Ok(env)
    }

    /// Secret container environment: `secrets_file`, then `secrets`, then the
    /// database password
    pub fn container_secrets(
        &self,
        workspace_root: Option<&Path>,
    ) -> Result<BTreeMap<String, String>> {
        let mut secrets = BTreeMap::new();
        if let Some(path) = &self.secrets_file {
            secrets.extend(read_env_file(path, workspace_root)?);
        }
        secrets.extend(self.secrets.clone());
        insert_opt(&mut secrets, "DATABASE_PASSWORD", &self.database.password);
        Ok(secrets)
    }

    /// Docker rendition: secrets are passed as plain environment variables
    pub fn docker_container(&self, workspace_root: Option<&Path>) -> Result<DockerContainer> {
        let mut container = DockerContainer::new(self.container_name(), self.image_ref());
        container.entrypoint = self
            .image
            .entrypoint
            .as_deref()
            .map(split_command)
            .unwrap_or_default();
        container.command = self
            .image
            .command
            .as_deref()
            .map(split_command)
            .unwrap_or_default();

        let docker = &self.docker;
        container.detach = docker.detach;
        container.auto_remove = docker.auto_remove;
        container.remove = docker.remove;
        container.user = docker.user.clone();
        container.stdin_open = docker.stdin_open;
        container.tty = docker.tty;
        container.healthcheck = docker.healthcheck.clone();
        container.hostname = docker.hostname.clone();
        container.platform = docker.platform.clone();
        container.working_dir = docker.working_dir.clone();
        container.restart_policy = docker.restart_policy.clone();

        container.environment = self.container_env(workspace_root)?;
        container
            .environment
            .extend(self.container_secrets(workspace_root)?);
        container.labels = self.container.labels.clone();

        if self.ports.open_app_port {
            container.ports.insert(
                self.ports.app_port.to_string(),
                Some(HostPort::Single(self.ports.app_host_port)),
            );
        }
        if self.ports.open_container_port {
            container.ports.insert(
                self.ports.container_port.to_string(),
                Some(HostPort::Single(self.ports.container_host_port)),
            );
        }
        container.ports.extend(docker.ports.clone());

        if self.workspace.mount || self.resources.mount {
            let root = workspace_root.ok_or_else(|| {
                Error::missing(
                    "workspace_root",
                    format!("{} mounts workspace files but no workspace root is set", self.name),
                )
            })?;
            if self.workspace.mount {
                if let Some(dir) = self.workspace_dir(Some(root)) {
                    container.volumes.insert(
                        root.display().to_string(),
                        VolumeBinding {
                            bind: dir,
                            mode: "rw".to_string(),
                        },
                    );
                }
            }
            if self.resources.mount {
                container.volumes.insert(
                    root.join(&self.resources.dir).display().to_string(),
                    VolumeBinding {
                        bind: self.resources.container_path.clone(),
                        mode: "ro".to_string(),
                    },
                );
            }
        }
        container.volumes.extend(docker.volumes.clone());

        container.validate()
    }

    fn git_sync_container(
        &self,
        name: &str,
        repo: &str,
        volume: &VolumeSpec,
        workspace: &str,
        one_time: bool,
    ) -> ContainerSpec {
        let mut spec = ContainerSpec::new(name, GIT_SYNC_IMAGE);
        spec.env.insert("GIT_SYNC_REPO".to_string(), repo.to_string());
        spec.env
            .insert("GIT_SYNC_ROOT".to_string(), volume.mount_path.clone());
        spec.env
            .insert("GIT_SYNC_DEST".to_string(), workspace.to_string());
        spec.env.insert(
            "GIT_SYNC_WAIT".to_string(),
            self.workspace.git_sync_wait.to_string(),
        );
        if let Some(branch) = &self.workspace.git_sync_branch {
            spec.env.insert("GIT_SYNC_BRANCH".to_string(), branch.clone());
        }
        if one_time {
            spec.env
                .insert("GIT_SYNC_ONE_TIME".to_string(), "true".to_string());
        }
        spec.volumes.push(volume.clone());
        spec
    }

    /// Kubernetes rendition, in apply order
    pub fn k8s_objects(&self, workspace_root: Option<&Path>) -> Result<Vec<K8sObject>> {
        let namespace = self.namespace();
        let labels = self.labels();
        let mut objects = Vec::new();

        let service_account = if self.rbac.enabled {
            let sa_name = self.derived_name(&self.rbac.sa_name, "sa");
            let cr_name = self.derived_name(&self.rbac.cr_name, "cr");
            let crb_name = self.derived_name(&self.rbac.crb_name, "crb");
            objects.push(K8sObject::typed(&manifest::namespace(&namespace))?);
            objects.push(K8sObject::typed(&manifest::service_account(
                &sa_name, &namespace, &labels,
            ))?);
            objects.push(K8sObject::typed(&manifest::cluster_role(
                &cr_name,
                &["", "apps", "batch", "extensions"],
                &labels,
            ))?);
            objects.push(K8sObject::typed(&manifest::cluster_role_binding(
                &crb_name, &cr_name, &sa_name, &namespace, &labels,
            ))?);
            Some(sa_name)
        } else {
            None
        };

        let mut app = ContainerSpec::new(self.container_name(), self.image_ref());
        app.image_pull_policy = self.image.pull_policy;
        app.command = self
            .image
            .entrypoint
            .as_deref()
            .map(split_command)
            .unwrap_or_default();
        app.args = self
            .image
            .command
            .as_deref()
            .map(split_command)
            .unwrap_or_default();

        let env = self.container_env(workspace_root)?;
        if !env.is_empty() {
            let cm_name = self.derived_name(&self.config_map_name, "cm");
            objects.push(K8sObject::typed(&manifest::config_map(
                &cm_name, &namespace, env, &labels,
            ))?);
            app.env_from_config_maps.push(cm_name);
        }
        let secrets = self.container_secrets(workspace_root)?;
        if !secrets.is_empty() {
            let secret_name = self.derived_name(&self.secret_name, "secret");
            objects.push(K8sObject::typed(&manifest::secret(
                &secret_name,
                &namespace,
                secrets,
                &labels,
            ))?);
            app.env_from_secrets.push(secret_name);
        }

        if self.ports.open_app_port {
            app.ports.push(PortSpec::new(
                &self.ports.app_port_name,
                i32::from(self.ports.app_port),
            ));
        }
        if self.ports.open_container_port {
            app.ports.push(PortSpec::new(
                &self.ports.container_port_name,
                i32::from(self.ports.container_port),
            ));
        }
        app.ports.extend(self.extras.ports.iter().cloned());
        app.volumes.extend(self.extras.volumes.iter().cloned());

        let mut containers = Vec::new();
        let mut init_containers = Vec::new();
        if self.workspace.mount {
            let root = workspace_root.ok_or_else(|| {
                Error::missing(
                    "workspace_root",
                    format!("{} mounts the workspace but no workspace root is set", self.name),
                )
            })?;
            let ws_name = workspace_name(root).to_string();
            let volume_name = self.derived_name(&self.workspace.volume_name, "ws");

            if self.workspace.k8s_mount_local {
                let dir = self.workspace_dir(Some(root)).unwrap_or_default();
                app.volumes.push(VolumeSpec {
                    name: volume_name,
                    mount_path: dir,
                    source: VolumeSource::HostPath {
                        path: root.display().to_string(),
                    },
                    read_only: false,
                });
            } else {
                let repo = self.workspace.git_sync_repo.as_deref().ok_or_else(|| {
                    Error::missing(
                        "git_sync_repo",
                        format!("{} syncs the workspace from git but has no repo", self.name),
                    )
                })?;
                let volume = VolumeSpec {
                    name: volume_name,
                    mount_path: self.workspace.container_path.clone(),
                    source: VolumeSource::EmptyDir,
                    read_only: false,
                };
                app.volumes.push(volume.clone());
                if self.workspace.create_git_sync_init_container {
                    init_containers.push(self.git_sync_container(
                        "git-sync-init",
                        repo,
                        &volume,
                        &ws_name,
                        true,
                    ));
                }
                if self.workspace.create_git_sync_sidecar {
                    containers.push(self.git_sync_container(
                        "git-sync", repo, &volume, &ws_name, false,
                    ));
                }
            }
        }
        containers.insert(0, app);

        let options = PodSpecOptions {
            replicas: self.deployment.replicas,
            service_account,
            restart_policy: self.deployment.restart_policy,
            init_containers,
            node_selector: self.deployment.node_selector.clone(),
            topology_spread_key: self.deployment.topology_spread_key.clone(),
            topology_spread_max_skew: self.deployment.topology_spread_max_skew.unwrap_or(1),
            topology_spread_when_unsatisfiable: self
                .deployment
                .topology_spread_when_unsatisfiable
                .clone(),
        };

        for class in &self.extras.storage_classes {
            objects.push(K8sObject::from_manifest(manifest::storage_class(
                &class.name,
                &class.provisioner,
                &class.parameters,
            ))?);
        }
        for pvc in &self.extras.pvcs {
            objects.push(K8sObject::from_manifest(manifest::persistent_volume_claim(
                &pvc.name,
                &namespace,
                pvc.storage_class.as_deref(),
                &pvc.size,
            ))?);
        }
        for raw in &self.extras.manifests {
            objects.push(K8sObject::from_manifest(raw.clone())?);
        }

        let deploy_name = self.derived_name(&self.deployment.name, "deploy");
        objects.push(K8sObject::typed(&manifest::deployment(
            &deploy_name,
            &namespace,
            &labels,
            &containers,
            &options,
        ))?);

        if self.service.create && self.ports.open_app_port {
            let mut port = PortSpec::new(
                &self.ports.app_port_name,
                i32::from(self.ports.app_port),
            );
            port.service_port = Some(self.service.port);
            port.node_port = self.service.node_port;
            let mut svc_labels = labels.clone();
            svc_labels.extend(self.service.labels.clone());

            let mut service = manifest::service(
                &self.derived_name(&self.service.name, "svc"),
                &namespace,
                &svc_labels,
                self.service.service_type,
                &[port],
            );
            // selector must match the pods, not the service-only labels
            if let Some(spec) = service.spec.as_mut() {
                spec.selector = Some(labels.clone());
            }
            objects.push(K8sObject::typed(&service)?);
        }

        debug!("{} renders {} objects", self.name, objects.len());
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;

    fn superset() -> SupersetWebserver {
        SupersetWebserver::default().validate().unwrap()
    }

    #[test]
    fn test_defaults_from_empty_yaml() {
        let ws: SupersetWebserver = serde_yaml::from_str("{}").unwrap();
        assert_eq!(ws, SupersetWebserver::default());
        assert_eq!(ws.image_ref(), "phidata/superset:2.0.0");
        assert_eq!(ws.container_name(), "superset-ws");
        assert_eq!(ws.namespace(), "default");
    }

    #[test]
    fn test_container_env_defaults() {
        let env = superset().container_env(None).unwrap();
        assert_eq!(env["SUPERSET_PORT"], "8088");
        assert_eq!(env["FLASK_ENV"], "production");
        assert_eq!(env["SUPERSET_ENV"], "production");
        assert_eq!(env["PYTHONPATH"], DEFAULT_PYTHON_PATH);
        assert_eq!(env["PRINT_ENV_ON_LOAD"], "True");
        assert_eq!(env["WAIT_FOR_DB"], "False");
        assert!(!env.contains_key("SUPERSET_LOAD_EXAMPLES"));
        assert!(!env.contains_key("DATABASE_HOST"));
    }

    #[test]
    fn test_database_password_is_secret() {
        let mut ws = superset();
        ws.database = DatabaseConfig {
            wait: true,
            user: Some("superset".to_string()),
            password: Some("hunter2".to_string()),
            schema: Some("superset".to_string()),
            host: Some("pg".to_string()),
            port: Some(5432),
            dialect: Some("postgresql".to_string()),
        };
        ws.load_examples = true;

        let env = ws.container_env(None).unwrap();
        assert_eq!(env["DATABASE_PORT"], "5432");
        assert_eq!(env["WAIT_FOR_DB"], "True");
        assert_eq!(env["SUPERSET_LOAD_EXAMPLES"], "yes");
        assert!(!env.contains_key("DATABASE_PASSWORD"));

        let secrets = ws.container_secrets(None).unwrap();
        assert_eq!(secrets["DATABASE_PASSWORD"], "hunter2");
    }

    #[test]
    fn test_requirements_path_in_workspace() {
        let mut ws = superset();
        ws.install_requirements = true;
        let env = ws.container_env(Some(Path::new("/home/me/data-ws"))).unwrap();
        assert_eq!(env["INSTALL_REQUIREMENTS"], "True");
        assert_eq!(
            env["REQUIREMENTS_FILE_PATH"],
            "/mnt/workspaces/data-ws/requirements.txt"
        );
    }

    #[test]
    fn test_explicit_env_overrides_computed() {
        let mut ws = superset();
        ws.env.insert("FLASK_ENV".to_string(), "development".to_string());
        assert_eq!(ws.container_env(None).unwrap()["FLASK_ENV"], "development");
    }

    #[test]
    fn test_docker_container() {
        let mut ws = superset();
        ws.workspace.mount = true;
        ws.resources.mount = true;
        ws.secrets.insert("SECRET_KEY".to_string(), "abc".to_string());

        let container = ws
            .docker_container(Some(Path::new("/home/me/data-ws")))
            .unwrap();
        assert_eq!(container.command, vec!["webserver"]);
        assert_eq!(container.platform.as_deref(), Some("linux/amd64"));
        assert!(container.auto_remove);
        assert_eq!(container.ports["8088"], Some(HostPort::Single(8088)));
        assert!(!container.ports.contains_key("8000"));
        assert_eq!(
            container.volumes["/home/me/data-ws"].bind,
            "/mnt/workspaces/data-ws"
        );
        assert_eq!(
            container.volumes["/home/me/data-ws/workspace/superset"].bind,
            "/app/docker"
        );
        assert_eq!(container.environment["SECRET_KEY"], "abc");
    }

    #[test]
    fn test_docker_restart_policy_conflict() {
        let mut ws = SupersetWebserver::default();
        ws.docker.restart_policy = Some(DockerRestartPolicy {
            name: crate::docker::container::RestartPolicyName::Always,
            maximum_retry_count: None,
        });
        assert!(ws.validate().is_err());
    }

    #[test]
    fn test_k8s_objects_minimal() {
        let objects = superset().k8s_objects(None).unwrap();
        let kinds: Vec<&str> = objects.iter().map(|o| o.kind()).collect();
        assert_eq!(kinds, vec!["ConfigMap", "Deployment", "Service"]);
        assert!(objects.iter().all(|o| o.namespace() == Some("default")));
        assert_eq!(objects[1].name(), "superset-ws-deploy");
    }

    #[test]
    fn test_storage_classes_precede_claims() {
        let mut ws = superset();
        ws.target = AppTarget::K8s;
        ws.extras.storage_classes.push(StorageClassConfig {
            name: "gp3".to_string(),
            provisioner: "ebs.csi.aws.com".to_string(),
            parameters: BTreeMap::from([("type".to_string(), "gp3".to_string())]),
        });
        ws.extras.pvcs.push(PvcConfig {
            name: "superset-data".to_string(),
            size: "5Gi".to_string(),
            storage_class: Some("gp3".to_string()),
        });

        let objects = ws.k8s_objects(None).unwrap();
        let class = objects.iter().position(|o| o.kind() == "StorageClass").unwrap();
        let claim = objects
            .iter()
            .position(|o| o.kind() == "PersistentVolumeClaim")
            .unwrap();
        assert!(class < claim);

        let manifest = objects[class].manifest();
        assert_eq!(manifest["provisioner"], "ebs.csi.aws.com");
        assert_eq!(manifest["parameters"]["type"], "gp3");
        assert_eq!(manifest["volumeBindingMode"], "WaitForFirstConsumer");
        assert_eq!(objects[class].namespace(), None);
        assert_eq!(objects[claim].manifest()["spec"]["storageClassName"], "gp3");
    }

    #[test]
    fn test_k8s_objects_with_rbac_secrets_and_git_sync() {
        let mut ws = superset();
        ws.rbac.enabled = true;
        ws.database.password = Some("pw".to_string());
        ws.workspace.mount = true;
        ws.workspace.git_sync_repo = Some("https://github.com/acme/data-ws.git".to_string());
        ws.workspace.git_sync_branch = Some("main".to_string());
        ws.extras.pvcs.push(PvcConfig {
            name: "superset-data".to_string(),
            size: "5Gi".to_string(),
            storage_class: None,
        });

        let objects = ws
            .k8s_objects(Some(Path::new("/home/me/data-ws")))
            .unwrap();
        let kinds: Vec<&str> = objects.iter().map(|o| o.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "Namespace",
                "ServiceAccount",
                "ClusterRole",
                "ClusterRoleBinding",
                "ConfigMap",
                "Secret",
                "PersistentVolumeClaim",
                "Deployment",
                "Service"
            ]
        );
        assert_eq!(objects[0].name(), "superset-ws-ns");

        let deploy = objects[7].manifest();
        let pod = &deploy["spec"]["template"]["spec"];
        assert_eq!(pod["serviceAccountName"], "superset-ws-sa");
        assert_eq!(pod["containers"].as_array().unwrap().len(), 2);
        assert_eq!(pod["containers"][1]["name"], "git-sync");
        assert_eq!(pod["initContainers"][0]["name"], "git-sync-init");
        assert_eq!(pod["volumes"][0]["name"], "superset-ws-ws");
        assert_eq!(pod["containers"][0]["args"][0], "webserver");
    }

    #[test]
    fn test_git_sync_requires_repo() {
        let mut ws = superset();
        ws.workspace.mount = true;
        assert!(matches!(
            ws.k8s_objects(Some(Path::new("/ws"))),
            Err(Error::MissingConfiguration {
                field: "git_sync_repo",
                ..
            })
        ));
    }
}
