/// Docker containers declared as resources
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::client::DockerApi;
use crate::error::{Error, Result};
use crate::resource::{Lifecycle, Resource};

const RESOURCE_TYPE: &str = "DockerContainer";

/// Host side of a published port
///
/// A port mapped to `None` is published on a random host port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostPort {
    Single(u16),
    /// Host interface and port, e.g. `["127.0.0.1", 8000]`
    Interface(String, u16),
    Multiple(Vec<u16>),
}

/// Host path bound into the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBinding {
    /// Path inside the container
    pub bind: String,
    /// `rw` or `ro`
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_mode() -> String {
    "rw".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicyName {
    No,
    Always,
    OnFailure,
    UnlessStopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerRestartPolicy {
    pub name: RestartPolicyName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_retry_count: Option<u32>,
}

impl DockerRestartPolicy {
    fn arg(&self) -> String {
        match (self.name, self.maximum_retry_count) {
            (RestartPolicyName::No, _) => "no".to_string(),
            (RestartPolicyName::Always, _) => "always".to_string(),
            (RestartPolicyName::UnlessStopped, _) => "unless-stopped".to_string(),
            (RestartPolicyName::OnFailure, Some(n)) => format!("on-failure:{}", n),
            (RestartPolicyName::OnFailure, None) => "on-failure".to_string(),
        }
    }
}

/// Container healthcheck; `test` uses the `["CMD-SHELL", "..."]` form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Healthcheck {
    pub test: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_period: Option<String>,
}

impl Healthcheck {
    fn command(&self) -> String {
        match self.test.split_first() {
            Some((kind, rest)) if kind == "CMD-SHELL" || kind == "CMD" => rest.join(" "),
            _ => self.test.join(" "),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Declared Docker container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerContainer {
    pub name: String,
    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    /// Run in the background
    #[serde(default = "default_true")]
    pub detach: bool,

    /// Let the daemon remove the container when it exits
    #[serde(default)]
    pub auto_remove: bool,

    /// Remove anonymous volumes along with the container
    #[serde(default)]
    pub remove: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default)]
    pub stdin_open: bool,

    #[serde(default)]
    pub tty: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<DockerRestartPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// Host path to container binding
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, VolumeBinding>,

    /// Container port (`8000` or `8000/tcp`) to host binding
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ports: BTreeMap<String, Option<HostPort>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl DockerContainer {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            entrypoint: Vec::new(),
            command: Vec::new(),
            detach: true,
            auto_remove: false,
            remove: false,
            user: None,
            stdin_open: false,
            tty: false,
            healthcheck: None,
            hostname: None,
            platform: None,
            working_dir: None,
            restart_policy: None,
            network: None,
            volumes: BTreeMap::new(),
            ports: BTreeMap::new(),
            environment: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    /// Arguments for `docker`, starting with `run`
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string()];
        let mut push = |flag: &str, value: &str| {
            args.push(flag.to_string());
            args.push(value.to_string());
        };

        push("--name", &self.name);
        if let Some(user) = &self.user {
            push("--user", user);
        }
        if let Some(hostname) = &self.hostname {
            push("--hostname", hostname);
        }
        if let Some(platform) = &self.platform {
            push("--platform", platform);
        }
        if let Some(dir) = &self.working_dir {
            push("--workdir", dir);
        }
        if let Some(policy) = &self.restart_policy {
            push("--restart", &policy.arg());
        }
        if let Some(network) = &self.network {
            push("--network", network);
        }
        if let Some(check) = &self.healthcheck {
            push("--health-cmd", &check.command());
            if let Some(interval) = &check.interval {
                push("--health-interval", interval);
            }
            if let Some(timeout) = &check.timeout {
                push("--health-timeout", timeout);
            }
            if let Some(retries) = check.retries {
                push("--health-retries", &retries.to_string());
            }
            if let Some(start) = &check.start_period {
                push("--health-start-period", start);
            }
        }
        for (host, binding) in &self.volumes {
            push("--volume", &format!("{}:{}:{}", host, binding.bind, binding.mode));
        }
        for (container_port, host) in &self.ports {
            match host {
                None => push("--publish", container_port),
                Some(HostPort::Single(port)) => {
                    push("--publish", &format!("{}:{}", port, container_port))
                }
                Some(HostPort::Interface(ip, port)) => {
                    push("--publish", &format!("{}:{}:{}", ip, port, container_port))
                }
                Some(HostPort::Multiple(ports)) => {
                    for port in ports {
                        push("--publish", &format!("{}:{}", port, container_port));
                    }
                }
            }
        }
        for (key, value) in &self.environment {
            push("--env", &format!("{}={}", key, value));
        }
        for (key, value) in &self.labels {
            push("--label", &format!("{}={}", key, value));
        }
        if let Some(entrypoint) = self.entrypoint.first() {
            push("--entrypoint", entrypoint);
        }

        if self.detach {
            args.push("--detach".to_string());
        }
        if self.auto_remove {
            args.push("--rm".to_string());
        }
        if self.stdin_open {
            args.push("--interactive".to_string());
        }
        if self.tty {
            args.push("--tty".to_string());
        }

        args.push(self.image.clone());
        args.extend(self.entrypoint.iter().skip(1).cloned());
        args.extend(self.command.iter().cloned());
        args
    }
}

/// Container status as reported by `docker inspect`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerStatus {
    pub status: String,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub exit_code: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfigState {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortBinding {
    #[serde(default)]
    pub host_ip: String,
    #[serde(default)]
    pub host_port: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkSettings {
    #[serde(default)]
    pub ports: Option<BTreeMap<String, Option<Vec<PortBinding>>>>,
}

/// Live container, parsed from one element of `docker inspect` output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    pub id: String,
    pub name: String,
    pub created: DateTime<Utc>,
    pub state: ContainerStatus,
    #[serde(default)]
    pub config: ContainerConfigState,
    #[serde(default)]
    pub network_settings: NetworkSettings,
}

impl ContainerState {
    /// Name without the leading `/` docker reports
    pub fn container_name(&self) -> &str {
        self.name.trim_start_matches('/')
    }

    /// Host ports bound to a container port such as `8000/tcp`
    pub fn host_ports(&self, container_port: &str) -> Vec<String> {
        self.network_settings
            .ports
            .as_ref()
            .and_then(|ports| ports.get(container_port))
            .and_then(Option::as_ref)
            .map(|bindings| bindings.iter().map(|b| b.host_port.clone()).collect())
            .unwrap_or_default()
    }
}

impl Resource for DockerContainer {
    type State = ContainerState;

    fn validate(self) -> Result<Self> {
        if self.name.is_empty() {
            return Err(Error::validation(RESOURCE_TYPE, "name cannot be empty"));
        }
        if self.image.is_empty() {
            return Err(Error::validation(
                RESOURCE_TYPE,
                format!("{} has no image", self.name),
            ));
        }
        if self.auto_remove
            && self
                .restart_policy
                .as_ref()
                .is_some_and(|p| p.name != RestartPolicyName::No)
        {
            return Err(Error::validation(
                RESOURCE_TYPE,
                "auto_remove conflicts with a restart policy",
            ));
        }
        for port in self.ports.keys() {
            let number = port.split_once('/').map_or(port.as_str(), |(n, _)| n);
            if number.parse::<u16>().is_err() {
                return Err(Error::validation(
                    RESOURCE_TYPE,
                    format!("invalid container port {}", port),
                ));
            }
        }
        Ok(self)
    }

    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl<C> Lifecycle<C> for DockerContainer
where
    C: DockerApi + ?Sized,
{
    async fn create(&self, client: &C) -> Result<ContainerState> {
        client.run(self).await
    }

    async fn read(&self, client: &C) -> Result<Option<ContainerState>> {
        let found = client.inspect(&self.name).await?;
        Ok(found.filter(|c| c.container_name() == self.name))
    }

    async fn delete(&self, client: &C) -> Result<()> {
        client.remove(&self.name, self.remove).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Managed, Outcome};
    use std::sync::Mutex;

    const INSPECT: &str = r#"{
        "Id": "4f1c2d",
        "Name": "/django",
        "Created": "2024-03-01T10:20:30.123456789Z",
        "State": {"Status": "running", "Running": true, "ExitCode": 0},
        "Config": {"Image": "phidata/django:4.2.2", "Labels": {"created-by": "berth"}},
        "NetworkSettings": {"Ports": {"8000/tcp": [{"HostIp": "0.0.0.0", "HostPort": "8000"}], "9000/tcp": null}}
    }"#;

    #[derive(Default)]
    struct FakeDocker {
        containers: Mutex<BTreeMap<String, ContainerState>>,
        removed_volumes: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl DockerApi for FakeDocker {
        async fn run(&self, container: &DockerContainer) -> Result<ContainerState> {
            let mut state: ContainerState = serde_json::from_str(INSPECT)?;
            state.name = format!("/{}", container.name);
            state.config.image = container.image.clone();
            self.containers
                .lock()
                .unwrap()
                .insert(container.name.clone(), state.clone());
            Ok(state)
        }

        async fn inspect(&self, name: &str) -> Result<Option<ContainerState>> {
            Ok(self.containers.lock().unwrap().get(name).cloned())
        }

        async fn remove(&self, name: &str, volumes: bool) -> Result<()> {
            self.removed_volumes.lock().unwrap().push(volumes);
            self.containers
                .lock()
                .unwrap()
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| Error::not_found(RESOURCE_TYPE, name))
        }
    }

    #[test]
    fn test_run_args_only_include_set_fields() {
        let container = DockerContainer::new("django", "phidata/django:4.2.2");
        assert_eq!(
            container.run_args(),
            vec!["run", "--name", "django", "--detach", "phidata/django:4.2.2"]
        );
    }

    #[test]
    fn test_run_args_ports_volumes_env() {
        let mut container = DockerContainer::new("superset-ws", "phidata/superset:2.0.0");
        container.command = vec!["webserver".to_string()];
        container.ports.insert("8088".to_string(), Some(HostPort::Single(8088)));
        container.ports.insert(
            "9000/tcp".to_string(),
            Some(HostPort::Interface("127.0.0.1".to_string(), 9000)),
        );
        container.ports.insert("9100".to_string(), None);
        container.volumes.insert(
            "/home/user/ws".to_string(),
            VolumeBinding {
                bind: "/usr/local/app".to_string(),
                mode: "rw".to_string(),
            },
        );
        container
            .environment
            .insert("SUPERSET_PORT".to_string(), "8088".to_string());

        let args = container.run_args();
        let joined = args.join(" ");
        assert!(joined.contains("--publish 8088:8088"));
        assert!(joined.contains("--publish 127.0.0.1:9000:9000/tcp"));
        assert!(joined.contains("--publish 9100 "));
        assert!(joined.contains("--volume /home/user/ws:/usr/local/app:rw"));
        assert!(joined.contains("--env SUPERSET_PORT=8088"));
        assert_eq!(args[args.len() - 2], "phidata/superset:2.0.0");
        assert_eq!(args[args.len() - 1], "webserver");
    }

    #[test]
    fn test_entrypoint_splits_into_flag_and_args() {
        let mut container = DockerContainer::new("c", "img");
        container.entrypoint = vec!["/bin/sh".to_string(), "-c".to_string()];
        container.command = vec!["echo hi".to_string()];
        let args = container.run_args();
        assert!(args.windows(2).any(|w| w == ["--entrypoint", "/bin/sh"]));
        assert_eq!(&args[args.len() - 3..], ["img", "-c", "echo hi"]);
    }

    #[test]
    fn test_host_port_forms_deserialize() {
        let ports: BTreeMap<String, Option<HostPort>> = serde_yaml::from_str(
            "'8000': 8000\n'8001': ['127.0.0.1', 9001]\n'8002': [1, 2]\n'8003': null\n",
        )
        .unwrap();
        assert_eq!(ports["8000"], Some(HostPort::Single(8000)));
        assert_eq!(
            ports["8001"],
            Some(HostPort::Interface("127.0.0.1".to_string(), 9001))
        );
        assert_eq!(ports["8002"], Some(HostPort::Multiple(vec![1, 2])));
        assert_eq!(ports["8003"], None);
    }

    #[test]
    fn test_validation() {
        assert!(DockerContainer::new("", "img").validate().is_err());
        assert!(DockerContainer::new("c", "").validate().is_err());
        assert!(Managed::new(DockerContainer::new("c", "")).is_err());

        let mut container = DockerContainer::new("c", "img");
        container.auto_remove = true;
        container.restart_policy = Some(DockerRestartPolicy {
            name: RestartPolicyName::Always,
            maximum_retry_count: None,
        });
        assert!(container.validate().is_err());

        let mut container = DockerContainer::new("c", "img");
        container.ports.insert("http".to_string(), None);
        assert!(container.validate().is_err());
    }

    #[test]
    fn test_restart_policy_arg() {
        let policy = DockerRestartPolicy {
            name: RestartPolicyName::OnFailure,
            maximum_retry_count: Some(3),
        };
        assert_eq!(policy.arg(), "on-failure:3");
    }

    #[test]
    fn test_parse_inspect_output() {
        let state: ContainerState = serde_json::from_str(INSPECT).unwrap();
        assert_eq!(state.container_name(), "django");
        assert!(state.state.running);
        assert_eq!(state.host_ports("8000/tcp"), vec!["8000"]);
        assert!(state.host_ports("9000/tcp").is_empty());
    }

    #[tokio::test]
    async fn test_container_lifecycle() {
        let docker = FakeDocker::default();
        let mut container = DockerContainer::new("django", "phidata/django:4.2.2");
        container.remove = true;
        let mut managed = Managed::new(container).unwrap();

        assert!(matches!(managed.apply(&docker).await, Outcome::Applied));
        assert_eq!(
            managed.active().unwrap().config.image,
            "phidata/django:4.2.2"
        );
        assert!(matches!(managed.apply(&docker).await, Outcome::Skipped));
        assert!(matches!(
            managed.update(&docker).await,
            Outcome::Failed(Error::Unsupported { .. })
        ));

        assert!(managed.destroy(&docker).await.is_success());
        assert!(!managed.is_active());
        assert_eq!(*docker.removed_volumes.lock().unwrap(), vec![true]);
    }
}
