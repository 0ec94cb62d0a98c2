//! Astro CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::debug;

use astro_cluster::KubeClusterAdapter;
use astro_common::config::{load_config, AstroConfig};
use astro_common::kube_utils::create_client_with_timeout;
use astro_lifecycle::{JsonFileRecordStore, OwnerId, TokioScheduler};

/// Astro - application lifecycle on Kubernetes
#[derive(Parser, Debug)]
#[command(name = "astro")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, env = "ASTRO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Kubeconfig path (overrides ASTRO_KUBECONFIG and the config file)
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Owner identity the command runs as
    #[arg(long, global = true, env = "ASTRO_OWNER")]
    pub owner: Option<u64>,

    /// Record store file (overrides the config file)
    #[arg(long, global = true, env = "ASTRO_STORE")]
    pub store: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an application
    Create(commands::app::CreateArgs),
    /// Scale an application back up
    Start(commands::app::IdArgs),
    /// Scale an application to zero
    Stop(commands::app::IdArgs),
    /// Trigger a rolling restart
    Restart(commands::app::IdArgs),
    /// Delete an application and its cluster objects
    Delete(commands::app::IdArgs),
    /// Show one application, refreshed from the cluster
    Get(commands::app::IdArgs),
    /// List the owner's applications
    List,
    /// Tail the logs of one member process
    Logs(commands::app::LogsArgs),
}

impl Cli {
    /// Load the configuration named by `--config`, or defaults
    pub fn load_config(&self) -> Result<AstroConfig> {
        Ok(load_config(self.config.as_deref())?)
    }

    /// Run the CLI command against the live cluster
    pub async fn run(self, config: AstroConfig) -> Result<()> {
        let owner = self.owner.map(OwnerId).ok_or(Error::MissingOwner)?;

        let kubeconfig = config.resolve_kubeconfig(self.kubeconfig.as_deref());
        let client = create_client_with_timeout(
            kubeconfig.as_deref(),
            config.connect_timeout(),
            config.read_timeout(),
        )
        .await?;
        let cluster = Arc::new(
            KubeClusterAdapter::new(client)
                .with_managed_by(config.managed_by.clone())
                .with_field_manager(config.field_manager.clone()),
        );

        let store_path = self.store.unwrap_or_else(|| config.store_path.clone());
        let store = Arc::new(JsonFileRecordStore::open(store_path)?);
        debug!(path = %store.path().display(), "using record store");

        let scheduler = Arc::new(TokioScheduler::new());
        let controller = commands::build_controller(&config, cluster, store, scheduler.clone());

        let result =
            commands::execute(&controller, owner, self.command, &mut std::io::stdout()).await;

        // let detached reconciliations land before the process exits
        scheduler.wait_idle().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("astro").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn create_parses_port_and_labels() {
        let cli = parse(&[
            "--owner", "7", "create", "web", "--image", "nginx:1.27", "--replicas", "3", "--port",
            "8080", "--label", "tier=frontend", "--label", "team=web",
        ]);
        assert_eq!(cli.owner, Some(7));
        let Commands::Create(args) = cli.command else {
            panic!("expected create");
        };
        assert_eq!(args.name, "web");
        assert_eq!(args.image, "nginx:1.27");
        assert_eq!(args.replicas, 3);
        assert_eq!(args.port, Some(8080));
        assert_eq!(
            args.labels,
            vec![
                ("tier".to_string(), "frontend".to_string()),
                ("team".to_string(), "web".to_string())
            ]
        );
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli = parse(&["logs", "4", "--lines", "20", "--owner", "9", "--store", "x.json"]);
        assert_eq!(cli.owner, Some(9));
        assert_eq!(cli.store, Some(PathBuf::from("x.json")));
        let Commands::Logs(args) = cli.command else {
            panic!("expected logs");
        };
        assert_eq!(args.id, 4);
        assert_eq!(args.lines, 20);
    }

    #[test]
    fn malformed_label_is_rejected() {
        let result = Cli::try_parse_from([
            "astro", "create", "web", "--image", "x:1", "--label", "no-equals",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn replicas_default_to_one() {
        let cli = parse(&["create", "web", "--image", "x:1"]);
        let Commands::Create(args) = cli.command else {
            panic!("expected create");
        };
        assert_eq!(args.replicas, 1);
        assert_eq!(args.port, None);
    }
}
