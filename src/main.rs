mod cli;
mod loader;
mod render;
mod secrets;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use reconcile::{
    CancelToken, DryHost, Engine, Host, LocalHost, Registry, RunOptions, SessionPool, SshHost,
};

fn main() {
    let cli = cli::Cli::parse();

    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .format_timestamp(None)
        .init();

    if let Err(err) = run(cli) {
        eprintln!("{} {err:#}", "✗".red());
        std::process::exit(1);
    }
}

fn run(cli: cli::Cli) -> Result<()> {
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel())
            .context("failed to install interrupt handler")?;
    }

    let user = cli
        .user
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "root".to_string());

    let transport: Arc<dyn Host> = match &cli.host {
        Some(host) => Arc::new(SshHost::new(
            host.clone(),
            SessionPool::new(user),
            cancel.clone(),
        )),
        None => Arc::new(LocalHost::new(cancel.clone())),
    };

    let describe: Vec<String> = cli
        .manifests
        .iter()
        .map(|path| path.display().to_string())
        .collect();
    let target = cli.host.clone().unwrap_or_else(local_hostname);
    let verb = if cli.dry_run { "Dry running" } else { "Applying" };
    println!(
        "{} {verb} {} on {target}...",
        "==>".bold(),
        describe.join(", ").yellow().bold()
    );

    // Secrets bypass the dry shadow on purpose; the reconciliation target
    // does not.
    let secrets = secrets::VaultSecrets::new(Arc::clone(&transport), cancel.clone());
    let renderer = render::TemplateRenderer::new(secrets);

    let host: Arc<dyn Host> = if cli.dry_run {
        Arc::new(DryHost::new(0, 0, Some(transport), cancel.clone()))
    } else {
        transport
    };

    let mut registry = Registry::new();
    if let Ok(cwd) = std::env::current_dir() {
        registry.set_source_prefix(cwd.to_string_lossy());
    }
    for manifest in &cli.manifests {
        loader::load_manifest(manifest, &mut registry)?;
    }
    let bundle = registry.static_files();
    if !bundle.is_empty() {
        log::debug!("bundle manifest: {} static files", bundle.len());
    }

    let engine = Engine::new(
        RunOptions {
            dry: cli.dry_run,
            diff: cli.diff,
            verbose: cli.verbose,
        },
        cancel,
    );
    engine.apply(&registry, host.as_ref(), Some(&renderer))?;
    Ok(())
}

fn local_hostname() -> String {
    std::process::Command::new("hostname")
        .output()
        .ok()
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
