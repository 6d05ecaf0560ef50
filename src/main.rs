/// Berth - declarative data-platform resources
///
/// Creates, inspects and deletes the AWS, Kubernetes and Docker resources
/// declared in a workspace file.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use berth::app::{AppTarget, DockerApp, SupersetWebserver};
use berth::assistant::{DuckDbAssistant, Llm, LlmClient, SemanticModel};
use berth::aws::AwsApiClient;
use berth::config::WorkspaceConfig;
use berth::docker::DockerCliClient;
use berth::k8s::{K8sObject, KubectlClient};
use berth::{Lifecycle, Managed, Outcome};

const DEFAULT_GROQ_MODEL: &str = "llama3-8b-8192";
const DEFAULT_OLLAMA_MODEL: &str = "phi3";

#[derive(Parser)]
#[command(name = "berth")]
#[command(about = "Manage data-platform resources on AWS, Kubernetes and Docker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "workspace.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate example configuration file
    Init,

    /// Create the declared resources
    Create {
        /// Only create the resource with this name
        #[arg(long)]
        only: Option<String>,
    },

    /// Delete the declared resources
    Delete {
        /// Only delete the resource with this name
        #[arg(long)]
        only: Option<String>,
    },

    /// Show which declared resources exist
    Status,

    /// Print the docker commands and Kubernetes manifests apps expand to
    Render,

    /// Ask the data assistant a question
    Ask {
        question: String,

        /// Model provider, overrides the configured one
        #[arg(long, value_enum)]
        provider: Option<Provider>,

        /// Model name
        #[arg(long)]
        model: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Provider {
    Groq,
    Ollama,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("berth={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match cli.command {
        Commands::Init => init_config(&cli).await,
        Commands::Create { ref only } => create_resources(&cli, only.as_deref()).await,
        Commands::Delete { ref only } => delete_resources(&cli, only.as_deref()).await,
        Commands::Status => show_status(&cli).await,
        Commands::Render => render_apps(&cli),
        Commands::Ask {
            ref question,
            provider,
            ref model,
        } => ask(&cli, question, provider, model.clone()).await,
    };

    match result {
        Ok(summary) if summary.failed > 0 => {
            error!("{} operation(s) failed", summary.failed);
            std::process::exit(1);
        }
        Ok(_) => {}
        Err(e) => {
            error!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Outcome counts for one command
#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    applied: usize,
    skipped: usize,
    failed: usize,
}

impl Summary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Applied => self.applied += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed(_) => self.failed += 1,
        }
    }

    fn log(&self, action: &str) {
        info!(
            "{}: {} applied, {} skipped, {} failed",
            action, self.applied, self.skipped, self.failed
        );
    }
}

fn selected(only: Option<&str>, name: &str) -> bool {
    only.map_or(true, |only| only == name)
}

fn load_config(cli: &Cli) -> Result<WorkspaceConfig> {
    WorkspaceConfig::from_file(&cli.config).context("Failed to load configuration")
}

fn docker_apps<'a>(config: &'a WorkspaceConfig, only: Option<&'a str>) -> impl Iterator<Item = &'a DockerApp> {
    config
        .docker_apps
        .iter()
        .filter(move |app| app.enabled && selected(only, &app.name))
}

fn superset_webservers<'a>(
    config: &'a WorkspaceConfig,
    only: Option<&'a str>,
) -> impl Iterator<Item = &'a SupersetWebserver> {
    config
        .superset_webservers
        .iter()
        .filter(move |app| app.enabled && selected(only, &app.name))
}

/// Clients needed by the selected resources
struct Clients {
    aws: Option<AwsApiClient>,
    docker: Option<DockerCliClient>,
    kube: Option<KubectlClient>,
}

impl Clients {
    async fn connect(config: &WorkspaceConfig, only: Option<&str>) -> Result<Self> {
        let needs_aws = config
            .cache_subnet_groups
            .iter()
            .any(|g| selected(only, &g.name))
            || config
                .s3_csv_datasets
                .iter()
                .any(|d| d.enabled && selected(only, &d.name));
        let needs_docker = docker_apps(config, only).next().is_some()
            || superset_webservers(config, only).any(|s| s.target == AppTarget::Docker);
        let needs_kube = superset_webservers(config, only).any(|s| s.target == AppTarget::K8s);

        let aws = if needs_aws {
            Some(AwsApiClient::new(&config.aws_config()).await)
        } else {
            None
        };

        let docker = if needs_docker {
            DockerCliClient::check_installed()
                .await
                .context("docker is required")?;
            Some(DockerCliClient::new(config.docker.clone()))
        } else {
            None
        };

        let kube = if needs_kube {
            KubectlClient::check_installed()
                .await
                .context("kubectl is required")?;
            Some(KubectlClient::new(config.k8s.clone()))
        } else {
            None
        };

        Ok(Self { aws, docker, kube })
    }
}

async fn apply_one<R, C>(resource: R, client: &C, use_cache: bool, summary: &mut Summary)
where
    R: Lifecycle<C>,
    C: ?Sized + Sync,
{
    let outcome = match Managed::new(resource) {
        Ok(managed) => managed.with_use_cache(use_cache).apply(client).await,
        Err(e) => Outcome::Failed(e),
    };
    summary.record(&outcome);
}

async fn destroy_one<R, C>(resource: R, client: &C, use_cache: bool, summary: &mut Summary)
where
    R: Lifecycle<C>,
    C: ?Sized + Sync,
{
    let outcome = match Managed::new(resource) {
        Ok(managed) => managed.with_use_cache(use_cache).destroy(client).await,
        Err(e) => Outcome::Failed(e),
    };
    summary.record(&outcome);
}

async fn status_one<R, C>(resource: R, client: &C)
where
    R: Lifecycle<C>,
    C: ?Sized + Sync,
{
    let resource_type = resource.resource_type();
    let name = resource.name().to_string();
    let mut managed = match Managed::new(resource) {
        Ok(managed) => managed,
        Err(e) => {
            info!("  {} {}: invalid ({})", resource_type, name, e);
            return;
        }
    };
    match managed.refresh(client).await {
        Ok(Some(_)) => info!("  {} {}: present", resource_type, name),
        Ok(None) => info!("  {} {}: absent", resource_type, name),
        Err(e) => info!("  {} {}: unknown ({})", resource_type, name, e),
    }
}

/// Create the declared resources
async fn create_resources(cli: &Cli, only: Option<&str>) -> Result<Summary> {
    let config = load_config(cli)?;
    info!("Creating resources for workspace: {}", config.name);

    let clients = Clients::connect(&config, only).await?;
    let root = config.workspace_root();
    let mut summary = Summary::default();

    if let Some(aws) = &clients.aws {
        for group in config.cache_subnet_groups.iter().filter(|g| selected(only, &g.name)) {
            apply_one(group.clone(), aws, config.use_cache, &mut summary).await;
        }
        for dataset in config
            .s3_csv_datasets
            .iter()
            .filter(|d| d.enabled && selected(only, &d.name))
        {
            apply_one(dataset.clone(), aws, config.use_cache, &mut summary).await;
        }
    }

    if let Some(docker) = &clients.docker {
        for app in docker_apps(&config, only) {
            let container = app
                .docker_container(root)
                .with_context(|| format!("Failed to build container for {}", app.name))?;
            apply_one(container, docker, config.use_cache && app.use_cache, &mut summary).await;
        }
    }

    for app in superset_webservers(&config, only) {
        let use_cache = config.use_cache && app.use_cache;
        match (app.target, &clients.docker, &clients.kube) {
            (AppTarget::Docker, Some(docker), _) => {
                let container = app
                    .docker_container(root)
                    .with_context(|| format!("Failed to build container for {}", app.name))?;
                apply_one(container, docker, use_cache, &mut summary).await;
            }
            (AppTarget::K8s, _, Some(kube)) => {
                let objects = app
                    .k8s_objects(root)
                    .with_context(|| format!("Failed to build manifests for {}", app.name))?;
                for object in objects {
                    apply_one(object, kube, use_cache, &mut summary).await;
                }
            }
            _ => {}
        }
    }

    summary.log("create");
    Ok(summary)
}

/// Delete the declared resources, in reverse creation order
async fn delete_resources(cli: &Cli, only: Option<&str>) -> Result<Summary> {
    let config = load_config(cli)?;
    info!("Deleting resources for workspace: {}", config.name);

    let clients = Clients::connect(&config, only).await?;
    let root = config.workspace_root();
    let mut summary = Summary::default();

    let webservers: Vec<_> = superset_webservers(&config, only).collect();
    for app in webservers.into_iter().rev() {
        let use_cache = config.use_cache && app.use_cache;
        match (app.target, &clients.docker, &clients.kube) {
            (AppTarget::Docker, Some(docker), _) => {
                let container = app.docker_container(root)?;
                destroy_one(container, docker, use_cache, &mut summary).await;
            }
            (AppTarget::K8s, _, Some(kube)) => {
                let objects = app.k8s_objects(root)?;
                for object in objects.into_iter().rev() {
                    destroy_one(object, kube, use_cache, &mut summary).await;
                }
            }
            _ => {}
        }
    }

    if let Some(docker) = &clients.docker {
        let apps: Vec<_> = docker_apps(&config, only).collect();
        for app in apps.into_iter().rev() {
            let container = app.docker_container(root)?;
            destroy_one(container, docker, config.use_cache && app.use_cache, &mut summary).await;
        }
    }

    if let Some(aws) = &clients.aws {
        for dataset in config
            .s3_csv_datasets
            .iter()
            .rev()
            .filter(|d| d.enabled && selected(only, &d.name))
        {
            destroy_one(dataset.clone(), aws, config.use_cache, &mut summary).await;
        }
        for group in config
            .cache_subnet_groups
            .iter()
            .rev()
            .filter(|g| selected(only, &g.name))
        {
            destroy_one(group.clone(), aws, config.use_cache, &mut summary).await;
        }
    }

    summary.log("delete");
    Ok(summary)
}

/// Show which declared resources exist
async fn show_status(cli: &Cli) -> Result<Summary> {
    let config = load_config(cli)?;
    let clients = Clients::connect(&config, None).await?;
    let root = config.workspace_root();

    info!("Workspace: {}", config.name);

    if let Some(aws) = &clients.aws {
        info!("");
        info!("AWS:");
        for group in &config.cache_subnet_groups {
            status_one(group.clone(), aws).await;
        }
        for dataset in config.s3_csv_datasets.iter().filter(|d| d.enabled) {
            status_one(dataset.clone(), aws).await;
        }
    }

    if let Some(docker) = &clients.docker {
        info!("");
        info!("Docker:");
        for app in docker_apps(&config, None) {
            status_one(app.docker_container(root)?, docker).await;
        }
        for app in superset_webservers(&config, None).filter(|s| s.target == AppTarget::Docker) {
            status_one(app.docker_container(root)?, docker).await;
        }
    }

    if let Some(kube) = &clients.kube {
        info!("");
        info!("Kubernetes:");
        for app in superset_webservers(&config, None).filter(|s| s.target == AppTarget::K8s) {
            for object in app.k8s_objects(root)? {
                status_one(object, kube).await;
            }
        }
    }

    Ok(Summary::default())
}

/// Print what each app expands to without calling any provider
fn render_apps(cli: &Cli) -> Result<Summary> {
    let config = load_config(cli)?;
    let root = config.workspace_root();

    for app in docker_apps(&config, None) {
        let container = app.docker_container(root)?;
        println!("# {}", app.name);
        println!("docker {}", container.run_args().join(" "));
    }

    for app in superset_webservers(&config, None) {
        println!("# {}", app.name);
        match app.target {
            AppTarget::Docker => {
                let container = app.docker_container(root)?;
                println!("docker {}", container.run_args().join(" "));
            }
            AppTarget::K8s => {
                for object in app.k8s_objects(root)? {
                    println!("---");
                    print!("{}", render_manifest(&object)?);
                }
            }
        }
    }

    Ok(Summary::default())
}

fn render_manifest(object: &K8sObject) -> Result<String> {
    serde_yaml::to_string(object.manifest())
        .with_context(|| format!("Failed to render {}", object.object_ref()))
}

/// Pick the model from the configuration and command-line overrides
fn select_llm(configured: Option<Llm>, provider: Option<Provider>, model: Option<String>) -> Llm {
    match (configured, provider) {
        (Some(Llm::Groq { model: current, api_key }), None | Some(Provider::Groq)) => Llm::Groq {
            model: model.unwrap_or(current),
            api_key,
        },
        (Some(Llm::Ollama { model: current, host }), None | Some(Provider::Ollama)) => {
            Llm::Ollama {
                model: model.unwrap_or(current),
                host,
            }
        }
        (_, Some(Provider::Ollama)) => {
            Llm::ollama(model.unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()))
        }
        (_, _) => Llm::groq(model.unwrap_or_else(|| DEFAULT_GROQ_MODEL.to_string())),
    }
}

/// Ask the data assistant a question
async fn ask(
    cli: &Cli,
    question: &str,
    provider: Option<Provider>,
    model: Option<String>,
) -> Result<Summary> {
    let assistant_config = if cli.config.exists() {
        load_config(cli)?.assistant
    } else {
        None
    };

    let (configured, semantic_model) = match assistant_config {
        Some(a) => (Some(a.llm), a.semantic_model),
        None => (None, SemanticModel::default()),
    };
    if semantic_model.tables.is_empty() {
        warn!("No tables configured for the assistant");
    }

    let llm = select_llm(configured, provider, model);
    let client = LlmClient::new(llm).context("Failed to create model client")?;
    let assistant = DuckDbAssistant::new(client, semantic_model);

    assistant
        .print_response(question, true)
        .await
        .context("Assistant request failed")?;

    Ok(Summary::default())
}

/// Initialize example configuration file
async fn init_config(cli: &Cli) -> Result<Summary> {
    if cli.config.exists() {
        anyhow::bail!(
            "Configuration file already exists: {}",
            cli.config.display()
        );
    }

    let example_config = WorkspaceConfig::example();
    let yaml = serde_yaml::to_string(&example_config)?;

    tokio::fs::write(&cli.config, yaml)
        .await
        .context("Failed to write configuration file")?;

    info!("Example configuration created: {}", cli.config.display());
    info!("");
    info!("Next steps:");
    info!("  1. Edit the configuration file to match your requirements");
    info!("  2. Set AWS credentials and GROQ_API_KEY if you use them");
    info!("  3. Create the resources:");
    info!("     berth create");

    Ok(Summary::default())
}
