// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line interface: `xm create cluster -f <path>`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::{debug, info};

use crate::config::ClusterFile;
use crate::connector::SudoPolicy;
use crate::modules::{register_builtin_pipelines, PIPELINE_CLUSTER_INSTALL};
use crate::pipeline::get_pipeline;
use crate::runtime::{logging, Args, ClusterRuntime, DEFAULT_WORK_DIR};

#[derive(Parser)]
#[command(
    name = "xm",
    version,
    about = "Declarative Kubernetes cluster provisioner over SSH"
)]
pub struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ClapArgs, Debug, Clone)]
struct GlobalArgs {
    /// Log level: trace, debug, info, warn, error, fatal, panic
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Shorthand for --log-level debug
    #[arg(long, global = true)]
    verbose: bool,

    /// Directory for downloaded artifacts and extracted archives
    #[arg(long, global = true, default_value = DEFAULT_WORK_DIR)]
    work_dir: PathBuf,

    /// Log critical errors and keep going instead of aborting
    #[arg(long, global = true)]
    ignore_errors: bool,

    /// Offline artifact bundle to install from
    #[arg(long, global = true)]
    artifact: Option<String>,

    /// Do not push images to the private registry
    #[arg(long, global = true)]
    skip_push_images: bool,

    /// Deploy the local-path storage addon
    #[arg(long, global = true)]
    deploy_local_storage: bool,

    /// Install OS packages on the hosts
    #[arg(long, global = true, default_value_t = true, action = clap::ArgAction::Set)]
    install_packages: bool,

    /// Do not pre-pull images on the hosts
    #[arg(long, global = true)]
    skip_pull_images: bool,

    /// Apply the security enhancement settings
    #[arg(long, global = true)]
    security_enhancement: bool,

    /// Do not install cluster addons
    #[arg(long, global = true)]
    skip_install_addons: bool,

    /// Route file operations through sudo shell commands
    #[arg(long, global = true)]
    sudo_file_ops: bool,

    /// Owner for files written through the sudo path
    #[arg(long, global = true)]
    sudo_file_ops_user: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create resources
    #[command(subcommand)]
    Create(CreateCommands),
}

#[derive(Subcommand)]
enum CreateCommands {
    /// Drive the hosts of a cluster file to a running Kubernetes cluster
    Cluster(ClusterArgs),
}

#[derive(ClapArgs, Debug, Clone)]
struct ClusterArgs {
    /// Path to the cluster file
    #[arg(short = 'f', long = "file", required = true)]
    file: PathBuf,
}

impl GlobalArgs {
    fn to_runtime_args(&self) -> Args {
        Args {
            work_dir: self.work_dir.clone(),
            ignore_errors: self.ignore_errors,
            artifact: self.artifact.clone(),
            skip_push_images: self.skip_push_images,
            deploy_local_storage: self.deploy_local_storage,
            install_packages: self.install_packages,
            skip_pull_images: self.skip_pull_images,
            security_enhancement: self.security_enhancement,
            skip_install_addons: self.skip_install_addons,
            sudo: SudoPolicy {
                use_sudo_for_file_ops: self.sudo_file_ops,
                user_for_sudo_file_ops: self.sudo_file_ops_user.clone(),
            },
        }
    }
}

/// Parse the command line and run the selected command. The returned guard
/// keeps the log file writer alive until exit.
///
/// # Errors
///
/// Returns any fatal error; the binary maps it to a non-zero exit code.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(cli.global.log_level.as_deref(), cli.global.verbose)?;

    match &cli.command {
        Commands::Create(CreateCommands::Cluster(args)) => {
            create_cluster(&cli.global, args).await
        }
    }
}

async fn create_cluster(global: &GlobalArgs, args: &ClusterArgs) -> Result<()> {
    let cluster = ClusterFile::load_from_path(&args.file)
        .with_context(|| format!("loading cluster file {}", args.file.display()))?;
    info!(cluster = %cluster.metadata.name, "cluster file loaded");
    match crate::util::local_ip() {
        Ok(ip) => debug!(%ip, "control machine address"),
        Err(e) => debug!(error = %e, "local IP discovery failed"),
    }

    let runtime = ClusterRuntime::new(cluster, global.to_runtime_args())?;
    register_builtin_pipelines();

    let mut pipeline = get_pipeline(PIPELINE_CLUSTER_INSTALL, &runtime).await?;
    pipeline.start(&runtime).await?;
    Ok(())
}
