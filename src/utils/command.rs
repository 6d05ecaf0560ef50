/// Command execution for the CLI-backed provider clients (kubectl, docker)
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Result from command execution with captured output
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CommandOutput {
    /// Create from tokio Command output
    fn from_output(output: std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
        }
    }

    /// Stdout on success, otherwise a provider error carrying stderr
    pub fn into_result(self, provider: &'static str) -> Result<String> {
        if self.success {
            Ok(self.stdout)
        } else {
            Err(Error::provider(provider, self.stderr.trim()))
        }
    }

    /// Whether stderr reports a missing object
    pub fn is_not_found(&self) -> bool {
        let stderr = self.stderr.to_lowercase();
        stderr.contains("notfound") || stderr.contains("not found") || stderr.contains("no such")
    }
}

/// Builder for executing external commands
pub struct CommandBuilder {
    program: String,
    command: Command,
    stdin: Option<Vec<u8>>,
}

impl CommandBuilder {
    /// Create a new command builder
    pub fn new(program: &str) -> Self {
        let mut command = Command::new(program);
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        Self {
            program: program.to_string(),
            command,
            stdin: None,
        }
    }

    /// Add a single argument
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.command.arg(arg);
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.command.args(args);
        self
    }

    /// Set an environment variable
    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.command.env(key, val);
        self
    }

    /// Set KUBECONFIG environment variable
    pub fn kubeconfig(self, path: &Path) -> Self {
        self.env("KUBECONFIG", path)
    }

    /// Feed bytes to the process on stdin
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Execute and return raw output
    pub async fn output(mut self) -> Result<CommandOutput> {
        debug!("Running {}", self.program);
        let program = self.program;
        let output = match self.stdin.take() {
            Some(input) => {
                self.command.stdin(Stdio::piped());
                let mut child = self
                    .command
                    .spawn()
                    .map_err(|e| spawn_error(&program, e))?;
                if let Some(mut stdin) = child.stdin.take() {
                    stdin.write_all(&input).await?;
                }
                child.wait_with_output().await?
            }
            None => self
                .command
                .output()
                .await
                .map_err(|e| spawn_error(&program, e))?,
        };
        Ok(CommandOutput::from_output(output))
    }

    /// Execute and return stdout on success, error on failure
    pub async fn run(self, provider: &'static str) -> Result<String> {
        self.output().await?.into_result(provider)
    }
}

fn spawn_error(program: &str, e: std::io::Error) -> Error {
    Error::provider("command", format!("failed to run {}: {}", program, e))
}

/// Check if a command-line tool is installed
pub async fn check_tool_installed(
    tool_name: &str,
    version_args: &[&str],
    install_url: &str,
) -> Result<()> {
    let output = CommandBuilder::new(tool_name)
        .args(version_args)
        .output()
        .await;

    match output {
        Ok(out) if out.success => Ok(()),
        _ => Err(Error::provider(
            "command",
            format!(
                "{} is not installed or not in PATH. Please install from {}",
                tool_name, install_url
            ),
        )),
    }
}
