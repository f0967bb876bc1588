//! Predict a small inventory against an empty in-memory host.
//!
//! Run with: cargo run --example dry_run

use reconcile::{CancelToken, DryHost, Engine, File, Group, Registry, RunOptions, User};

fn main() -> reconcile::Result<()> {
    let cancel = CancelToken::new();
    let mut registry = Registry::new();

    registry.add(Box::new(Group::new("web", 101)))?;

    let mut deploy = User::new("deploy", 1200);
    deploy.groups = vec!["web".to_string()];
    deploy.shell = "/bin/sh".to_string();
    registry.add(Box::new(deploy))?;

    for index in 0..3 {
        let mut file = File::new(format!("/srv/site/page_{index}.html"));
        file.content = Some(format!("<h1>page {index}</h1>\n"));
        file.mode = Some(0o644);
        registry.add(Box::new(file))?;
    }

    let host = DryHost::new(0, 0, None, cancel.clone());
    let engine = Engine::new(
        RunOptions {
            dry: true,
            ..Default::default()
        },
        cancel,
    );
    let summary = engine.apply(&registry, &host, None)?;
    println!(
        "would create {}, modify {}, delete {}",
        summary.created, summary.modified, summary.deleted
    );
    Ok(())
}
