/// Single-container apps run with Docker (Django defaults)
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{split_command, workspace_name};
use crate::docker::container::{HostPort, VolumeBinding};
use crate::docker::DockerContainer;
use crate::error::{Error, Result};
use crate::resource::Resource;

fn default_name() -> String {
    "django".to_string()
}

fn default_image_name() -> String {
    "phidata/django".to_string()
}

fn default_image_tag() -> String {
    "4.2.2".to_string()
}

fn default_command() -> Option<String> {
    Some("python manage.py runserver 0.0.0.0:8000".to_string())
}

fn default_port_number() -> u16 {
    8000
}

fn default_workspace_path() -> String {
    "/usr/local/app".to_string()
}

fn default_true() -> bool {
    true
}

/// App packaged as one Docker container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerApp {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_image_name")]
    pub image_name: String,

    #[serde(default = "default_image_tag")]
    pub image_tag: String,

    #[serde(default = "default_command")]
    pub command: Option<String>,

    /// Publish `port_number` on the host
    #[serde(default = "default_true")]
    pub open_port: bool,

    #[serde(default = "default_port_number")]
    pub port_number: u16,

    /// Host port, defaults to `port_number`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,

    /// Mount the workspace directory from the host into the container
    #[serde(default)]
    pub mount_workspace: bool,

    #[serde(default = "default_workspace_path")]
    pub workspace_volume_container_path: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub use_cache: bool,
}

impl Default for DockerApp {
    fn default() -> Self {
        Self {
            name: default_name(),
            image_name: default_image_name(),
            image_tag: default_image_tag(),
            command: default_command(),
            open_port: true,
            port_number: default_port_number(),
            host_port: None,
            mount_workspace: false,
            workspace_volume_container_path: default_workspace_path(),
            env: BTreeMap::new(),
            enabled: true,
            use_cache: true,
        }
    }
}

impl DockerApp {
    pub fn image(&self) -> String {
        format!("{}:{}", self.image_name, self.image_tag)
    }

    /// Container definition for this app
    pub fn docker_container(&self, workspace_root: Option<&Path>) -> Result<DockerContainer> {
        let mut container = DockerContainer::new(&self.name, self.image());
        container.command = self.command.as_deref().map(split_command).unwrap_or_default();
        container.environment = self.env.clone();
        container
            .labels
            .insert("created-by".to_string(), "berth".to_string());

        if self.open_port {
            container.ports.insert(
                self.port_number.to_string(),
                Some(HostPort::Single(self.host_port.unwrap_or(self.port_number))),
            );
        }

        if self.mount_workspace {
            let root = workspace_root.ok_or_else(|| {
                Error::missing(
                    "workspace_root",
                    format!("{} mounts the workspace but no workspace root is set", self.name),
                )
            })?;
            container.volumes.insert(
                root.display().to_string(),
                VolumeBinding {
                    bind: self.workspace_volume_container_path.clone(),
                    mode: "rw".to_string(),
                },
            );
            container.working_dir = Some(self.workspace_volume_container_path.clone());
            container.environment.insert(
                "WORKSPACE_NAME".to_string(),
                workspace_name(root).to_string(),
            );
        }

        container.validate()
    }
}
