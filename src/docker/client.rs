/// Docker operations through the docker CLI
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::container::{ContainerState, DockerContainer};
use crate::error::{Error, Result};
use crate::utils::command::CommandBuilder;

/// Docker operations used by container resources
#[async_trait]
pub trait DockerApi: Send + Sync {
    /// Start the container and return its inspected state
    async fn run(&self, container: &DockerContainer) -> Result<ContainerState>;

    /// Inspect a container by name; `Ok(None)` when it does not exist
    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>>;

    /// Force-remove an existing container, optionally with its anonymous volumes
    async fn remove(&self, name: &str, volumes: bool) -> Result<()>;
}

/// docker CLI connection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Daemon socket or host, e.g. `unix:///var/run/docker.sock`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// Docker client for docker CLI operations
#[derive(Debug, Clone)]
pub struct DockerCliClient {
    config: DockerConfig,
    program: String,
}

impl DockerCliClient {
    pub fn new(config: DockerConfig) -> Self {
        Self {
            config,
            program: "docker".to_string(),
        }
    }

    #[cfg(test)]
    fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Check if docker is installed
    pub async fn check_installed() -> Result<()> {
        crate::utils::command::check_tool_installed(
            "docker",
            &["--version"],
            "https://docs.docker.com/get-docker/",
        )
        .await
    }

    fn command(&self) -> CommandBuilder {
        let builder = CommandBuilder::new(&self.program);
        match &self.config.host {
            Some(host) => builder.env("DOCKER_HOST", host),
            None => builder,
        }
    }
}

#[async_trait]
impl DockerApi for DockerCliClient {
    async fn run(&self, container: &DockerContainer) -> Result<ContainerState> {
        let stdout = self
            .command()
            .args(container.run_args())
            .run("docker")
            .await?;
        debug!("run_response: {}", stdout.trim());

        self.inspect(&container.name).await?.ok_or_else(|| {
            Error::provider(
                "docker",
                format!("container {} exited before it could be inspected", container.name),
            )
        })
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>> {
        let output = self
            .command()
            .args(["inspect", "--type", "container", name])
            .output()
            .await?;

        if !output.success {
            if output.is_not_found() {
                return Ok(None);
            }
            return Err(Error::provider("docker", output.stderr.trim()));
        }
        let mut containers: Vec<ContainerState> = serde_json::from_str(&output.stdout)?;
        Ok(if containers.is_empty() {
            None
        } else {
            Some(containers.swap_remove(0))
        })
    }

    async fn remove(&self, name: &str, volumes: bool) -> Result<()> {
        // rm --force exits 0 for unknown names
        if self.inspect(name).await?.is_none() {
            return Err(Error::not_found("DockerContainer", name));
        }

        let mut args = vec!["rm", "--force"];
        if volumes {
            args.push("--volumes");
        }
        args.push(name);

        let output = self.command().args(args).output().await?;
        if output.success {
            debug!("rm_response: {}", output.stdout.trim());
            return Ok(());
        }
        if output.is_not_found() {
            return Err(Error::not_found("DockerContainer", name));
        }
        Err(Error::provider("docker", output.stderr.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Shell stand-in for the docker CLI that knows one container, `web`,
    /// and records every invocation
    fn fake_docker(dir: &Path) -> PathBuf {
        let script = r#"#!/bin/sh
echo "$@" >> "$(dirname "$0")/calls.log"
case "$1" in
  inspect)
    if [ "$4" = "web" ]; then
      echo '[{"Id": "9a8b7c", "Name": "/web", "Created": "2024-03-01T10:20:30Z", "State": {"Status": "running", "Running": true, "ExitCode": 0}}]'
      exit 0
    fi
    echo "Error: No such container: $4" >&2
    exit 1
    ;;
  rm)
    exit 0
    ;;
esac
exit 2
"#;
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join("docker");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn calls(dir: &Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_remove_unknown_container_is_not_found() {
        let dir = std::env::temp_dir().join(format!("berth-docker-ghost-{}", std::process::id()));
        let client = DockerCliClient::new(DockerConfig::default())
            .with_program(fake_docker(&dir).display().to_string());

        let err = client.remove("ghost", true).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(calls(&dir).iter().all(|c| !c.starts_with("rm")));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_remove_existing_container() {
        let dir = std::env::temp_dir().join(format!("berth-docker-web-{}", std::process::id()));
        let client = DockerCliClient::new(DockerConfig::default())
            .with_program(fake_docker(&dir).display().to_string());

        let state = client.inspect("web").await.unwrap().unwrap();
        assert_eq!(state.container_name(), "web");

        client.remove("web", true).await.unwrap();
        assert!(calls(&dir).contains(&"rm --force --volumes web".to_string()));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_delete_never_created_container_fails() {
        use crate::resource::Managed;

        let dir = std::env::temp_dir().join(format!("berth-docker-managed-{}", std::process::id()));
        let client = DockerCliClient::new(DockerConfig::default())
            .with_program(fake_docker(&dir).display().to_string());

        let container = DockerContainer::new("ghost", "phidata/django:4.2.2");
        let outcome = Managed::new(container).unwrap().delete(&client).await;
        assert!(!outcome.is_success());
        assert!(outcome.error().unwrap().is_not_found());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_check_docker() {
        // Informational: docker is usually absent in test environments
        let result = DockerCliClient::check_installed().await;
        if result.is_err() {
            println!("docker not installed (expected in test environment)");
        }
    }
}
