/// Workspace configuration: provider settings and declared resources
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::app::{DockerApp, SupersetWebserver};
use crate::assistant::{Llm, SemanticModel, TableInfo};
use crate::aws::{AwsConfig, CacheSubnetGroup, CloudFormationStack, S3CsvDataset};
use crate::docker::DockerConfig;
use crate::k8s::KubeConfig;
use crate::resource::Resource;

/// Main workspace configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Workspace name (used for labels and log lines)
    pub name: String,

    /// Workspace root mounted into containers; defaults to the config file's directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Skip create/delete when the resource is already in the wanted state
    #[serde(default = "default_true")]
    pub use_cache: bool,

    #[serde(default)]
    pub aws: AwsConfig,

    #[serde(default)]
    pub k8s: KubeConfig,

    #[serde(default)]
    pub docker: DockerConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cache_subnet_groups: Vec<CacheSubnetGroup>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub s3_csv_datasets: Vec<S3CsvDataset>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub docker_apps: Vec<DockerApp>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub superset_webservers: Vec<SupersetWebserver>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant: Option<AssistantConfig>,
}

/// Data-analyst assistant settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub llm: Llm,

    /// Tables to describe to the model
    #[serde(default)]
    pub semantic_model: SemanticModel,
}

fn default_true() -> bool {
    true
}

fn check_unique<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> anyhow::Result<()> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            anyhow::bail!("duplicate {} name: {}", kind, name);
        }
    }
    Ok(())
}

impl WorkspaceConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config: WorkspaceConfig = serde_yaml::from_str(&content)?;
        if config.workspace_root.is_none() {
            config.workspace_root = path
                .parent()
                .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p })
                .map(Path::to_path_buf);
        }
        config.validate()
    }

    /// Validate the configuration, normalising resource arguments
    pub fn validate(self) -> anyhow::Result<Self> {
        if self.name.is_empty() {
            anyhow::bail!("name cannot be empty");
        }

        let cache_subnet_groups = self
            .cache_subnet_groups
            .into_iter()
            .map(CacheSubnetGroup::validate)
            .collect::<Result<Vec<_>, _>>()?;
        let s3_csv_datasets = self
            .s3_csv_datasets
            .into_iter()
            .map(S3CsvDataset::validate)
            .collect::<Result<Vec<_>, _>>()?;
        let superset_webservers = self
            .superset_webservers
            .into_iter()
            .map(SupersetWebserver::validate)
            .collect::<Result<Vec<_>, _>>()?;

        check_unique(
            "cache subnet group",
            cache_subnet_groups.iter().map(|g| g.name.as_str()),
        )?;
        check_unique("dataset", s3_csv_datasets.iter().map(|d| d.name.as_str()))?;
        check_unique(
            "app",
            self.docker_apps
                .iter()
                .map(|a| a.name.as_str())
                .chain(superset_webservers.iter().map(|s| s.name.as_str())),
        )?;

        Ok(Self {
            cache_subnet_groups,
            s3_csv_datasets,
            superset_webservers,
            ..self
        })
    }

    pub fn workspace_root(&self) -> Option<&Path> {
        self.workspace_root.as_deref()
    }

    /// AWS settings with the region falling back to AWS_REGION
    pub fn aws_config(&self) -> AwsConfig {
        let mut aws = self.aws.clone();
        if aws.region.is_none() {
            aws.region = std::env::var("AWS_REGION").ok();
        }
        aws
    }

    /// Generate an example configuration file
    pub fn example() -> Self {
        let cache_group = CacheSubnetGroup::new("superset-cache-subnets")
            .description("Subnets for the Superset redis cache")
            .vpc_stack(CloudFormationStack::new("data-vpc"))
            .tag("workspace", "data-platform")
            .build()
            .ok();

        Self {
            name: "data-platform".to_string(),
            workspace_root: None,
            use_cache: true,
            aws: AwsConfig {
                region: Some("us-east-1".to_string()),
                profile: None,
            },
            k8s: KubeConfig::default(),
            docker: DockerConfig::default(),
            cache_subnet_groups: cache_group.into_iter().collect(),
            s3_csv_datasets: vec![S3CsvDataset::new("movies")
                .with_bucket("data-platform-lake")
                .with_database("imdb")
                .with_columns(["title", "genre", "year", "rating"])],
            docker_apps: vec![DockerApp::default()],
            superset_webservers: vec![SupersetWebserver::default()],
            assistant: Some(AssistantConfig {
                llm: Llm::groq("llama3-8b-8192"),
                semantic_model: SemanticModel {
                    tables: vec![TableInfo {
                        name: "movies".to_string(),
                        description: "Contains information about movies from IMDB.".to_string(),
                        path: "IMDB-Movie-Data.csv".to_string(),
                    }],
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_is_valid() {
        let config = WorkspaceConfig::example();
        assert_eq!(config.cache_subnet_groups.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_round_trips_through_yaml() {
        let yaml = serde_yaml::to_string(&WorkspaceConfig::example()).unwrap();
        let parsed: WorkspaceConfig = serde_yaml::from_str(&yaml).unwrap();
        let parsed = parsed.validate().unwrap();
        assert_eq!(parsed.superset_webservers, vec![SupersetWebserver::default()]);
        assert_eq!(parsed.s3_csv_datasets[0].table_name(), "movies");
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config: WorkspaceConfig = serde_yaml::from_str("name: ws\n").unwrap();
        assert!(config.use_cache);
        assert!(config.cache_subnet_groups.is_empty());
        assert!(config.assistant.is_none());
    }

    #[test]
    fn test_validation_normalises_resources() {
        let yaml = r#"
name: ws
cache_subnet_groups:
  - name: Redis-Subnets
    subnet_ids: [subnet-a]
"#;
        let config: WorkspaceConfig = serde_yaml::from_str(yaml).unwrap();
        let config = config.validate().unwrap();
        assert_eq!(config.cache_subnet_groups[0].name, "redis-subnets");
    }

    #[test]
    fn test_validation_rejects_bad_resources() {
        let mut config = WorkspaceConfig::example();
        config.name = String::new();
        assert!(config.validate().is_err());

        let mut config = WorkspaceConfig::example();
        config.docker_apps.push(DockerApp {
            name: "superset-ws".to_string(),
            ..Default::default()
        });
        assert!(config.validate().is_err());

        let yaml = "name: ws\ncache_subnet_groups:\n  - name: no-subnets\n";
        let config: WorkspaceConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_workspace_root_defaults_to_config_dir() {
        let dir = std::env::temp_dir().join(format!("berth-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("workspace.yaml");
        std::fs::write(&path, "name: ws\n").unwrap();

        let config = WorkspaceConfig::from_file(&path).unwrap();
        assert_eq!(config.workspace_root(), Some(dir.as_path()));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
