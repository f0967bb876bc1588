use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "steward")]
#[command(version)]
#[command(about = "Reconcile a host against a declared inventory of files, users and groups", long_about = None)]
pub struct Cli {
    /// Dry run; don't make any changes
    #[arg(short = 'd', long)]
    pub dry_run: bool,

    /// Show full diffs of file content changes
    #[arg(short = 'D', long)]
    pub diff: bool,

    /// Be more verbose
    #[arg(short, long)]
    pub verbose: bool,

    /// Execute on a host via SSH instead of locally
    #[arg(long, value_name = "NAME")]
    pub host: Option<String>,

    /// User to SSH as (default: the caller's login)
    #[arg(long, value_name = "NAME")]
    pub user: Option<String>,

    /// Manifest files to apply, in order
    #[arg(required = true, value_name = "MANIFEST")]
    pub manifests: Vec<PathBuf>,
}
