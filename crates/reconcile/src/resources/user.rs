//! POSIX user reconciliation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::item::{ApplyContext, Item, Outcome};
use crate::report;
use crate::{Error, Result};

/// Desired state of a POSIX user account.
///
/// `password` is the crypt(3)-encrypted hash. Left blank it means the
/// account is locked, and stored values of `!`, `!!` or `x` count as locked
/// too; set `blank_password` to declare an actually empty password.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct User {
    pub name: String,
    pub uid: u32,
    /// Primary group; defaults to the user name when empty.
    pub group: String,
    /// Supplemental groups. Order is irrelevant.
    pub groups: Vec<String>,
    pub gecos: String,
    pub home: String,
    pub shell: String,
    pub password: String,
    pub blank_password: bool,
    /// When set, the uid identifies the user across runs: a name change is
    /// `usermod -l`, keyed by the old name. Otherwise the name identifies
    /// the user and a uid change is `usermod -u`.
    pub uid_primary: bool,
    /// Manage the account for absence instead of existence.
    pub delete: bool,
    #[serde(skip)]
    id: u32,
}

impl User {
    pub fn new(name: impl Into<String>, uid: u32) -> Self {
        Self {
            name: name.into(),
            uid,
            ..Default::default()
        }
    }

    /// Primary group, falling back to the user name.
    pub fn primary_group(&self) -> &str {
        if self.group.is_empty() {
            &self.name
        } else {
            &self.group
        }
    }

    /// Snapshot record for a freshly created account. The password starts
    /// locked; a declared hash is converged by the password step afterward.
    pub(crate) fn created_record(&self) -> User {
        User {
            name: self.name.clone(),
            uid: self.uid,
            group: self.primary_group().to_string(),
            groups: self.groups.clone(),
            gecos: self.gecos.clone(),
            home: self.home.clone(),
            shell: self.shell.clone(),
            ..Default::default()
        }
    }
}

/// Canonical form for password comparison: unset and the locked sentinels
/// `!`, `!!`, `x` all compare as the locked password, unless the record
/// opted into a genuinely blank one.
pub(crate) fn normalize_password(password: &str, blank: bool) -> &str {
    if blank {
        return password;
    }
    match password {
        "" | "!" | "!!" | "x" => "!",
        other => other,
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user {}/{}", self.name, self.uid)
    }
}

impl Item for User {
    fn id(&self) -> u32 {
        self.id
    }

    fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    fn boxed_clone(&self) -> Box<dyn Item> {
        Box::new(User {
            id: 0,
            ..self.clone()
        })
    }

    fn provides(&self) -> Vec<String> {
        vec![format!("user:{}", self.name)]
    }

    fn needs(&self) -> Vec<String> {
        let mut needs: Vec<String> = Vec::new();
        if !self.group.is_empty() {
            needs.push(format!("group:{}", self.group));
        }
        for group in &self.groups {
            needs.push(format!("group:{group}"));
        }
        needs
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Registration(format!(
                "user needs a name (uid {})",
                self.uid
            )));
        }
        Ok(())
    }

    fn apply(&self, ctx: &ApplyContext) -> Result<Outcome> {
        let host = ctx.host;
        host.reload_accounts()?;

        let old = {
            let snap = host.snapshot().lock().unwrap();
            let found = if self.uid_primary {
                snap.user_by_uid(self.uid)
            } else {
                snap.user(&self.name)
            };
            found.cloned()
        };

        if self.delete {
            return match old {
                None => Ok(Outcome::Unchanged),
                Some(old) => {
                    report::removed(&format!("user {} (uid {})", old.name, old.uid));
                    host.delete_user(&old.name)?;
                    Ok(Outcome::Deleted)
                }
            };
        }

        let mut created = false;
        let mut modified = false;

        match &old {
            None => {
                report::created(&format!(
                    "user {} (group {})",
                    self.name,
                    self.primary_group()
                ));
                host.create_user(self)?;
                created = true;
            }
            Some(old) => {
                if old.name != self.name {
                    report::changed(&format!(
                        "uid {} (name {} → {})",
                        self.uid, old.name, self.name
                    ));
                    host.rename_user(&old.name, &self.name)?;
                    modified = true;
                }
                if old.uid != self.uid {
                    report::changed(&format!(
                        "user {} (uid {} → {})",
                        self.name, old.uid, self.uid
                    ));
                    host.set_user_uid(&self.name, self.uid)?;
                    modified = true;
                }
            }
        }

        // From here on the record goes by its final name; every mutation
        // above already landed in the snapshot.
        let current = {
            let snap = host.snapshot().lock().unwrap();
            snap.user(&self.name)
                .cloned()
                .ok_or_else(|| Error::UnknownUser(self.name.clone()))?
        };

        if normalize_password(&current.password, current.blank_password)
            != normalize_password(&self.password, self.blank_password)
        {
            report::changed(&format!("user {} (password)", self.name));
            host.set_user_password(&self.name, &self.password, self.blank_password)?;
            modified = true;
        }

        let mut have = current.groups.clone();
        let mut want = self.groups.clone();
        have.sort();
        want.sort();
        if have != want {
            let from = if have.is_empty() {
                "none".to_string()
            } else {
                have.join(", ")
            };
            let to = if want.is_empty() {
                "none".to_string()
            } else {
                want.join(", ")
            };
            report::changed(&format!("user {} groups ({from} → {to})", self.name));
            host.set_user_groups(&self.name, &self.groups)?;
            modified = true;
        }

        if current.group != self.primary_group() {
            report::changed(&format!(
                "user {} (primary group {} → {})",
                self.name,
                current.group,
                self.primary_group()
            ));
            host.set_user_primary_group(&self.name, self.primary_group())?;
            modified = true;
        }

        Ok(if created {
            Outcome::Created
        } else if modified {
            Outcome::Modified
        } else {
            Outcome::Unchanged
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_sentinels_normalize_together() {
        for stored in ["", "!", "!!", "x"] {
            assert_eq!(normalize_password(stored, false), "!", "stored {stored:?}");
        }
    }

    #[test]
    fn real_hashes_pass_through() {
        assert_eq!(
            normalize_password("$6$salt$hash", false),
            "$6$salt$hash"
        );
        assert_ne!(normalize_password("$6$salt$hash", false), "!");
    }

    #[test]
    fn blank_opt_in_is_not_locked() {
        assert_eq!(normalize_password("", true), "");
        assert_ne!(
            normalize_password("", true),
            normalize_password("", false)
        );
    }

    #[test]
    fn primary_group_falls_back_to_name() {
        let mut user = User::new("alice", 1000);
        assert_eq!(user.primary_group(), "alice");
        user.group = "staff".to_string();
        assert_eq!(user.primary_group(), "staff");
    }

    #[test]
    fn needs_lists_every_group_reference() {
        let mut user = User::new("alice", 1000);
        user.group = "staff".to_string();
        user.groups = vec!["wheel".to_string(), "docker".to_string()];
        assert_eq!(
            user.needs(),
            vec!["group:staff", "group:wheel", "group:docker"]
        );
    }
}
