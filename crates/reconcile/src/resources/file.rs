//! File reconciliation: existence, content, mode and ownership.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::host::Host;
use crate::item::{ApplyContext, Item, Outcome};
use crate::report;
use crate::{Error, Result};

/// Desired state of a filesystem entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct File {
    /// Absolute path on the target host.
    pub path: String,
    /// Inline content. Mutually exclusive with `template`.
    pub content: Option<String>,
    /// Local template rendered at apply time against the host facts.
    /// Mutually exclusive with `content`.
    pub template: Option<PathBuf>,
    /// Permission bits, declared octal.
    #[serde(deserialize_with = "octal_mode")]
    pub mode: Option<u32>,
    /// Owning user, by name or numeric id. Names resolve through the
    /// host's account snapshot, so a user registered earlier in the run is
    /// visible here.
    pub owner: Option<String>,
    /// Owning group, by name or numeric id.
    pub group: Option<String>,
    /// Manage the path for absence instead of existence.
    pub delete: bool,
    #[serde(skip)]
    id: u32,
}

impl File {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Desired bytes, if content is managed at all.
    fn resolve_content(&self, ctx: &ApplyContext) -> Result<Option<Vec<u8>>> {
        if let Some(content) = &self.content {
            return Ok(Some(content.clone().into_bytes()));
        }
        let Some(template) = &self.template else {
            return Ok(None);
        };
        let renderer = ctx.renderer.ok_or_else(|| {
            Error::Template(format!("no renderer wired for {}", template.display()))
        })?;
        let source = std::fs::read_to_string(template)
            .map_err(|err| Error::Template(format!("{}: {err}", template.display())))?;
        let info = ctx.host.info()?;
        Ok(Some(renderer.render(&source, &info)?.into_bytes()))
    }

    /// Translate owner/group declarations into numeric ids.
    fn resolve_ownership(&self, host: &dyn Host) -> Result<(Option<u32>, Option<u32>)> {
        if self.owner.is_none() && self.group.is_none() {
            return Ok((None, None));
        }
        host.reload_accounts()?;
        let snap = host.snapshot().lock().unwrap();
        let uid = match &self.owner {
            None => None,
            Some(owner) => Some(match owner.parse::<u32>() {
                Ok(numeric) => numeric,
                Err(_) => {
                    snap.user(owner)
                        .map(|user| user.uid)
                        .ok_or_else(|| Error::UnknownUser(owner.clone()))?
                }
            }),
        };
        let gid = match &self.group {
            None => None,
            Some(group) => Some(match group.parse::<u32>() {
                Ok(numeric) => numeric,
                Err(_) => {
                    snap.group(group)
                        .map(|g| g.gid)
                        .ok_or_else(|| Error::UnknownGroup(group.clone()))?
                }
            }),
        };
        Ok((uid, gid))
    }
}

/// Sibling path the new content lands on before the atomic rename.
fn sibling_temp(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".steward-tmp");
    path.with_file_name(name)
}

/// Accept `644`, `"644"` and `"0644"`, always read as octal.
fn octal_mode<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Option<u32>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }
    let digits = match Option::<Raw>::deserialize(de)? {
        None => return Ok(None),
        Some(Raw::Int(n)) => n.to_string(),
        Some(Raw::Str(s)) => s,
    };
    u32::from_str_radix(&digits, 8)
        .map(Some)
        .map_err(|_| de::Error::custom(format!("invalid octal mode {digits:?}")))
}

impl fmt::Display for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file {}", self.path)
    }
}

impl Item for File {
    fn id(&self) -> u32 {
        self.id
    }

    fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    fn boxed_clone(&self) -> Box<dyn Item> {
        Box::new(File {
            id: 0,
            ..self.clone()
        })
    }

    fn provides(&self) -> Vec<String> {
        vec![format!("file:{}", self.path)]
    }

    fn needs(&self) -> Vec<String> {
        let mut needs = Vec::new();
        if let Some(owner) = &self.owner {
            if owner.parse::<u32>().is_err() {
                needs.push(format!("user:{owner}"));
            }
        }
        if let Some(group) = &self.group {
            if group.parse::<u32>().is_err() {
                needs.push(format!("group:{group}"));
            }
        }
        needs
    }

    fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(Error::Registration("file needs a path".to_string()));
        }
        if !self.path.starts_with('/') {
            return Err(Error::Registration(format!(
                "file path {} is not absolute",
                self.path
            )));
        }
        if self.content.is_some() && self.template.is_some() {
            return Err(Error::Registration(format!(
                "file {} declares both content and template",
                self.path
            )));
        }
        if self.delete && (self.content.is_some() || self.template.is_some()) {
            return Err(Error::Registration(format!(
                "file {} is marked delete but declares content",
                self.path
            )));
        }
        Ok(())
    }

    fn static_files(&self) -> Vec<PathBuf> {
        self.template.iter().cloned().collect()
    }

    fn apply(&self, ctx: &ApplyContext) -> Result<Outcome> {
        let host = ctx.host;
        let path = Path::new(&self.path);

        let desired = self.resolve_content(ctx)?;
        let stat = host.stat(path)?;

        if self.delete {
            return match stat {
                None => Ok(Outcome::Unchanged),
                Some(_) => {
                    report::removed(&self.path);
                    host.remove(path)?;
                    Ok(Outcome::Deleted)
                }
            };
        }

        let (uid, gid) = self.resolve_ownership(host)?;

        let Some(stat) = stat else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    host.mkdir_all(parent)?;
                }
            }
            host.write_file(path, desired.as_deref().unwrap_or_default())?;
            if let Some(mode) = self.mode {
                host.chmod(path, mode)?;
            }
            if uid.is_some() || gid.is_some() {
                host.chown(path, uid, gid)?;
            }
            report::created(&self.path);
            return Ok(Outcome::Created);
        };

        let mode_change = self.mode.filter(|&mode| mode != stat.mode);
        let uid_change = uid.filter(|&uid| uid != stat.uid);
        let gid_change = gid.filter(|&gid| gid != stat.gid);
        let content_change = match &desired {
            None => None,
            Some(want) => {
                let have = host.read_file(path)?;
                if have == *want {
                    None
                } else {
                    Some((have, want.clone()))
                }
            }
        };

        if mode_change.is_none()
            && uid_change.is_none()
            && gid_change.is_none()
            && content_change.is_none()
        {
            return Ok(Outcome::Unchanged);
        }

        let mut what = Vec::new();
        if content_change.is_some() {
            what.push("content".to_string());
        }
        if let Some(mode) = mode_change {
            what.push(format!("mode {:o} → {:o}", stat.mode, mode));
        }
        if uid_change.is_some() || gid_change.is_some() {
            what.push("ownership".to_string());
        }
        report::changed(&format!("{} ({})", self.path, what.join(", ")));

        if let Some((have, want)) = content_change {
            if ctx.diff {
                report::content_diff(&self.path, &have, &want);
            }
            // Atomic replace: the temp file carries the final mode and
            // ownership before it lands on the destination path, so a
            // reader never observes a truncated or half-dressed file.
            let temp = sibling_temp(path);
            host.write_file(&temp, &want)?;
            host.chmod(&temp, self.mode.unwrap_or(stat.mode))?;
            if uid.is_some() || gid.is_some() {
                host.chown(&temp, uid, gid)?;
            }
            host.rename(&temp, path)?;
        } else {
            if let Some(mode) = mode_change {
                host.chmod(path, mode)?;
            }
            if uid_change.is_some() || gid_change.is_some() {
                host.chown(path, uid_change, gid_change)?;
            }
        }

        Ok(Outcome::Modified)
    }
}
