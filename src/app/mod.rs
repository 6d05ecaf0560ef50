/// Application bundles that expand into containers and manifests
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};

pub mod docker_app;
pub mod superset;

pub use docker_app::DockerApp;
pub use superset::SupersetWebserver;

/// Where an app bundle runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppTarget {
    #[default]
    Docker,
    K8s,
}

/// Split a shell-style command string on whitespace
pub(crate) fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

/// Directory name of the workspace root
pub(crate) fn workspace_name(root: &Path) -> &str {
    root.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
}

/// Read a flat YAML mapping of environment variables
///
/// Relative paths are resolved against the workspace root. Non-string scalars
/// are rendered as strings; nested values are rejected.
pub fn read_env_file(path: &Path, workspace_root: Option<&Path>) -> Result<BTreeMap<String, String>> {
    let path = match workspace_root {
        Some(root) if path.is_relative() => root.join(path),
        _ => path.to_path_buf(),
    };
    let content = std::fs::read_to_string(&path)?;
    let values: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(&content)?;

    values
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Null => String::new(),
                _ => {
                    return Err(Error::validation(
                        "EnvFile",
                        format!("{} in {} is not a scalar", key, path.display()),
                    ))
                }
            };
            Ok((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_command() {
        assert_eq!(
            split_command("python manage.py  runserver"),
            vec!["python", "manage.py", "runserver"]
        );
    }

    #[test]
    fn test_read_env_file() {
        let dir = std::env::temp_dir().join(format!("berth-env-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("env.yml"),
            "SUPERSET_PORT: 8088\nLOAD: true\nNAME: superset\nEMPTY:\n",
        )
        .unwrap();

        let env = read_env_file(Path::new("env.yml"), Some(&dir)).unwrap();
        assert_eq!(env["SUPERSET_PORT"], "8088");
        assert_eq!(env["LOAD"], "true");
        assert_eq!(env["NAME"], "superset");
        assert_eq!(env["EMPTY"], "");

        std::fs::write(dir.join("bad.yml"), "NESTED:\n  a: 1\n").unwrap();
        assert!(read_env_file(&dir.join("bad.yml"), None).is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
