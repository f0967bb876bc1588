//! POSIX group reconciliation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::item::{ApplyContext, Item, Outcome};
use crate::report;
use crate::{Error, Result};

/// Desired state of a POSIX group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Group {
    pub name: String,
    pub gid: u32,
    /// When set, the gid identifies the group across runs: a name change
    /// is carried out with `groupmod -n`, keyed by the old name. Otherwise
    /// the name identifies the group and a gid change is `groupmod -g`.
    pub gid_primary: bool,
    /// Manage the group for absence instead of existence.
    pub delete: bool,
    #[serde(skip)]
    id: u32,
}

impl Group {
    pub fn new(name: impl Into<String>, gid: u32) -> Self {
        Self {
            name: name.into(),
            gid,
            ..Default::default()
        }
    }

    /// Plain record for the account snapshot, flags and identity cleared.
    pub(crate) fn record(&self) -> Group {
        Group::new(self.name.clone(), self.gid)
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group {}/{}", self.name, self.gid)
    }
}

impl Item for Group {
    fn id(&self) -> u32 {
        self.id
    }

    fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    fn boxed_clone(&self) -> Box<dyn Item> {
        Box::new(Group {
            id: 0,
            ..self.clone()
        })
    }

    fn provides(&self) -> Vec<String> {
        vec![format!("group:{}", self.name)]
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Registration(format!(
                "group needs a name (gid {})",
                self.gid
            )));
        }
        Ok(())
    }

    fn apply(&self, ctx: &ApplyContext) -> Result<Outcome> {
        let host = ctx.host;
        host.reload_accounts()?;

        let old = {
            let snap = host.snapshot().lock().unwrap();
            let found = if self.gid_primary {
                snap.group_by_gid(self.gid)
            } else {
                snap.group(&self.name)
            };
            found.cloned()
        };

        match (old, self.delete) {
            (None, true) => Ok(Outcome::Unchanged),
            (Some(old), true) => {
                report::removed(&format!("group {} (gid {})", old.name, old.gid));
                host.delete_group(&old.name)?;
                Ok(Outcome::Deleted)
            }
            (None, false) => {
                report::created(&format!("group {} (gid {})", self.name, self.gid));
                host.create_group(self)?;
                Ok(Outcome::Created)
            }
            (Some(old), false) => {
                let mut modified = false;
                if old.name != self.name {
                    report::changed(&format!(
                        "gid {} (name {} → {})",
                        self.gid, old.name, self.name
                    ));
                    host.rename_group(&old.name, &self.name)?;
                    modified = true;
                }
                if old.gid != self.gid {
                    report::changed(&format!(
                        "group {} (gid {} → {})",
                        self.name, old.gid, self.gid
                    ));
                    host.set_group_gid(&self.name, self.gid)?;
                    modified = true;
                }
                Ok(if modified {
                    Outcome::Modified
                } else {
                    Outcome::Unchanged
                })
            }
        }
    }
}
