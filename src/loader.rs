//! Manifest loading: YAML documents → registered items.
//!
//! A manifest is a top-level sequence of single-key maps, each tagged with
//! the record kind:
//!
//! ```yaml
//! - group: {name: web, gid: 101}
//! - user:
//!     name: alice
//!     uid: 1000
//!     groups: [wheel]
//! - file:
//!     path: /etc/motd
//!     content: "welcome\n"
//!     mode: 644
//! ```
//!
//! Unknown keys and duplicated keys are fatal; file modes are read as
//! octal. Each entry is registered with its `path:line` so failures point
//! back at the declaration.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use reconcile::{File, Group, Item, Registry, User};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Entry {
    File(File),
    User(User),
    Group(Group),
}

impl Entry {
    fn into_item(self) -> Box<dyn Item> {
        match self {
            Entry::File(file) => Box::new(file),
            Entry::User(user) => Box::new(user),
            Entry::Group(group) => Box::new(group),
        }
    }
}

/// Load one manifest into the registry, in document order.
pub fn load_manifest(path: &Path, registry: &mut Registry) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    if text.trim().is_empty() {
        return Ok(());
    }

    let entries: Vec<Entry> = serde_yaml::from_str(&text).map_err(|err| {
        let location = err
            .location()
            .map(|loc| format!("{}:{}:{}", path.display(), loc.line(), loc.column()))
            .unwrap_or_else(|| path.display().to_string());
        anyhow::anyhow!("{location}: {err}")
    })?;

    let lines = entry_lines(&text);
    for (index, entry) in entries.into_iter().enumerate() {
        let line = lines.get(index).copied().unwrap_or(0);
        let source = format!("{}:{line}", path.display());
        registry.add_from_source(&source, entry.into_item())?;
    }
    Ok(())
}

/// 1-based line numbers of the top-level sequence entries. serde carries no
/// spans, so entry starts are recovered by scanning for the `- ` markers at
/// the left margin; parse errors still get exact locations from serde_yaml.
fn entry_lines(text: &str) -> Vec<usize> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| line.starts_with("- "))
        .map(|(index, _)| index + 1)
        .collect()
}
