//! In-memory snapshot of a host's account databases.
//!
//! The snapshot is authoritative for the duration of one run: it is filled
//! once from `/etc/passwd`, `/etc/group` and (when readable) `/etc/shadow`,
//! and every mutation the reconciler issues is reflected here before the
//! next field is diffed. Users reference groups by name, so a gid change
//! never touches user records; a group rename rewrites them.

use std::collections::HashMap;

use crate::resources::{Group, User};
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct Snapshot {
    users: HashMap<String, User>,
    uids: HashMap<u32, String>,
    groups: HashMap<String, Group>,
    gids: HashMap<u32, String>,
    loaded: bool,
    shadow_loaded: bool,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loaded(&self) -> bool {
        self.loaded
    }

    /// Declare the snapshot filled without parsing anything. Used by hosts
    /// that have no account databases behind them.
    pub fn mark_loaded(&mut self) {
        self.loaded = true;
    }

    /// Whether stored passwords are trustworthy (shadow was readable).
    pub fn shadow_loaded(&self) -> bool {
        self.shadow_loaded
    }

    pub fn user(&self, name: &str) -> Option<&User> {
        self.users.get(name)
    }

    pub fn user_by_uid(&self, uid: u32) -> Option<&User> {
        self.uids.get(&uid).and_then(|name| self.users.get(name))
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    pub fn group_by_gid(&self, gid: u32) -> Option<&Group> {
        self.gids.get(&gid).and_then(|name| self.groups.get(name))
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    /// Fill the snapshot from database file contents. Groups are parsed
    /// first so user primary groups resolve to names.
    pub fn load(&mut self, passwd: &str, group: &str, shadow: Option<&str>) -> Result<()> {
        let mut memberships: Vec<(String, String)> = Vec::new();

        for (index, line) in group.lines().enumerate() {
            let Some(fields) = db_fields(line) else {
                continue;
            };
            if fields.len() < 3 {
                return Err(parse_err("/etc/group", index, "expected name:pw:gid:members"));
            }
            let gid = parse_id("/etc/group", index, fields[2])?;
            let name = fields[0].to_string();
            for member in fields.get(3).copied().unwrap_or("").split(',') {
                if !member.is_empty() {
                    memberships.push((member.to_string(), name.clone()));
                }
            }
            self.insert_group(Group::new(name, gid));
        }

        for (index, line) in passwd.lines().enumerate() {
            let Some(fields) = db_fields(line) else {
                continue;
            };
            if fields.len() < 7 {
                return Err(parse_err("/etc/passwd", index, "expected 7 colon fields"));
            }
            let uid = parse_id("/etc/passwd", index, fields[2])?;
            let gid = parse_id("/etc/passwd", index, fields[3])?;
            let mut user = User::new(fields[0], uid);
            user.group = self
                .gids
                .get(&gid)
                .cloned()
                .unwrap_or_else(|| gid.to_string());
            user.gecos = fields[4].to_string();
            user.home = fields[5].to_string();
            user.shell = fields[6].to_string();
            self.insert_user(user);
        }

        for (member, group_name) in memberships {
            if let Some(user) = self.users.get_mut(&member) {
                user.groups.push(group_name);
            }
        }

        if let Some(shadow) = shadow {
            for line in shadow.lines() {
                let Some(fields) = db_fields(line) else {
                    continue;
                };
                if fields.len() < 2 {
                    continue;
                }
                if let Some(user) = self.users.get_mut(fields[0]) {
                    user.password = fields[1].to_string();
                }
            }
            self.shadow_loaded = true;
        }

        self.loaded = true;
        Ok(())
    }

    // --- group mutations ---

    pub fn insert_group(&mut self, group: Group) {
        self.gids.insert(group.gid, group.name.clone());
        self.groups.insert(group.name.clone(), group);
    }

    /// Rename a group and rewrite every user record referencing the old
    /// name, primary and supplemental alike.
    pub fn rename_group(&mut self, old: &str, new: &str) {
        if let Some(mut group) = self.groups.remove(old) {
            group.name = new.to_string();
            self.gids.insert(group.gid, new.to_string());
            self.groups.insert(new.to_string(), group);
        }
        for user in self.users.values_mut() {
            if user.group == old {
                user.group = new.to_string();
            }
            for name in &mut user.groups {
                if name == old {
                    *name = new.to_string();
                }
            }
        }
    }

    pub fn set_group_gid(&mut self, name: &str, gid: u32) {
        if let Some(group) = self.groups.get_mut(name) {
            self.gids.remove(&group.gid);
            group.gid = gid;
            self.gids.insert(gid, name.to_string());
        }
    }

    pub fn remove_group(&mut self, name: &str) {
        if let Some(group) = self.groups.remove(name) {
            self.gids.remove(&group.gid);
        }
    }

    // --- user mutations ---

    pub fn insert_user(&mut self, user: User) {
        self.uids.insert(user.uid, user.name.clone());
        self.users.insert(user.name.clone(), user);
    }

    pub fn rename_user(&mut self, old: &str, new: &str) {
        if let Some(mut user) = self.users.remove(old) {
            user.name = new.to_string();
            self.uids.insert(user.uid, new.to_string());
            self.users.insert(new.to_string(), user);
        }
    }

    pub fn set_user_uid(&mut self, name: &str, uid: u32) {
        if let Some(user) = self.users.get_mut(name) {
            self.uids.remove(&user.uid);
            user.uid = uid;
            self.uids.insert(uid, name.to_string());
        }
    }

    pub fn set_user_password(&mut self, name: &str, password: &str, blank: bool) {
        if let Some(user) = self.users.get_mut(name) {
            user.password = password.to_string();
            user.blank_password = blank;
        }
    }

    pub fn set_user_groups(&mut self, name: &str, groups: &[String]) {
        if let Some(user) = self.users.get_mut(name) {
            user.groups = groups.to_vec();
        }
    }

    pub fn set_user_primary_group(&mut self, name: &str, group: &str) {
        if let Some(user) = self.users.get_mut(name) {
            user.group = group.to_string();
        }
    }

    pub fn remove_user(&mut self, name: &str) {
        if let Some(user) = self.users.remove(name) {
            self.uids.remove(&user.uid);
        }
    }
}

/// Split one database line into colon fields, skipping blanks, comments and
/// NIS compat entries.
fn db_fields(line: &str) -> Option<Vec<&str>> {
    let line = line.trim_end();
    if line.is_empty() || line.starts_with('#') || line.starts_with('+') || line.starts_with('-') {
        return None;
    }
    Some(line.split(':').collect())
}

fn parse_id(file: &'static str, index: usize, field: &str) -> Result<u32> {
    field.parse().map_err(|_| parse_err(file, index, "bad numeric id"))
}

fn parse_err(file: &'static str, index: usize, reason: &str) -> Error {
    Error::Parse {
        file,
        line: index + 1,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWD: &str = "\
root:x:0:0:root:/root:/bin/bash
alice:x:1000:1000:Alice:/home/alice:/bin/zsh
bob:x:1001:101::/home/bob:/bin/sh
";

    const GROUP: &str = "\
root:x:0:
web:x:101:alice
alice:x:1000:
docker:x:990:alice,bob
";

    const SHADOW: &str = "\
root:!:19000:0:99999:7:::
alice:$6$salt$hash:19000:0:99999:7:::
bob:!!:19000:0:99999:7:::
";

    fn loaded() -> Snapshot {
        let mut snap = Snapshot::new();
        snap.load(PASSWD, GROUP, Some(SHADOW)).unwrap();
        snap
    }

    #[test]
    fn parses_users_groups_and_shadow() {
        let snap = loaded();
        let alice = snap.user("alice").unwrap();
        assert_eq!(alice.uid, 1000);
        assert_eq!(alice.group, "alice");
        assert_eq!(alice.groups, vec!["web", "docker"]);
        assert_eq!(alice.password, "$6$salt$hash");
        assert_eq!(alice.shell, "/bin/zsh");

        let bob = snap.user_by_uid(1001).unwrap();
        assert_eq!(bob.name, "bob");
        assert_eq!(bob.group, "web");
        assert_eq!(bob.password, "!!");

        assert_eq!(snap.group_by_gid(101).unwrap().name, "web");
        assert!(snap.shadow_loaded());
    }

    #[test]
    fn unreadable_shadow_leaves_passwords_empty() {
        let mut snap = Snapshot::new();
        snap.load(PASSWD, GROUP, None).unwrap();
        assert_eq!(snap.user("alice").unwrap().password, "");
        assert!(!snap.shadow_loaded());
    }

    #[test]
    fn rename_group_rewrites_every_user_reference() {
        let mut snap = loaded();
        snap.rename_group("web", "web2");

        assert!(snap.group("web").is_none());
        assert_eq!(snap.group("web2").unwrap().gid, 101);
        assert_eq!(snap.group_by_gid(101).unwrap().name, "web2");

        assert_eq!(snap.user("bob").unwrap().group, "web2");
        assert_eq!(snap.user("alice").unwrap().groups, vec!["web2", "docker"]);
    }

    #[test]
    fn gid_change_leaves_user_records_alone() {
        let mut snap = loaded();
        snap.set_group_gid("web", 201);

        assert_eq!(snap.group("web").unwrap().gid, 201);
        assert_eq!(snap.group_by_gid(201).unwrap().name, "web");
        assert!(snap.group_by_gid(101).is_none());
        assert_eq!(snap.user("bob").unwrap().group, "web");
        assert_eq!(snap.user("alice").unwrap().groups, vec!["web", "docker"]);
    }

    #[test]
    fn rename_user_moves_both_indexes() {
        let mut snap = loaded();
        snap.rename_user("bob", "robert");
        assert!(snap.user("bob").is_none());
        assert_eq!(snap.user("robert").unwrap().uid, 1001);
        assert_eq!(snap.user_by_uid(1001).unwrap().name, "robert");
    }

    #[test]
    fn malformed_uid_is_a_parse_error() {
        let mut snap = Snapshot::new();
        let err = snap
            .load("broken:x:notanumber:0:::/bin/sh\n", "", None)
            .unwrap_err();
        assert!(err.to_string().contains("/etc/passwd line 1"));
    }
}
