//! Polymorphic execution targets.
//!
//! A [`Host`] presents one uniform surface: command execution, a file
//! surface, and POSIX account lifecycle. Three implementations exist —
//! [`local::LocalHost`] against the running OS, [`ssh::SshHost`] through a
//! pooled SSH session, and [`dry::DryHost`], an in-memory shadow whose
//! reads can cascade to a wrapped host.
//!
//! The account lifecycle operations have default implementations that
//! shell out to the usual `groupadd`/`usermod`/… tools via [`Host::exec`]
//! and then update the host-owned [`Snapshot`]; the real hosts inherit
//! them, the dry host overrides them to touch only its shadow.

pub mod dry;
pub mod local;
pub mod ssh;

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

use crate::exec::{CancelToken, Cmd, Output};
use crate::model::Snapshot;
use crate::resources::{user::normalize_password, Group, User};
use crate::{Error, Result};

/// Host facts extracted from `uname`, exposed to templates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HostInfo {
    pub uname: String,
    pub hostname: String,
    pub kernel: String,
    pub os: String,
    pub arch: String,
}

impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.hostname, self.os, self.arch)
    }
}

/// File metadata as observed through a host's file surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Permission bits (the `07777` slice of st_mode)
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub dir: bool,
}

/// A reconciliation target.
pub trait Host: fmt::Debug + Send + Sync {
    /// Human-readable identifier for error messages.
    fn describe(&self) -> String;

    /// Host facts, probed once per run and cached.
    fn info(&self) -> Result<HostInfo>;

    /// The run's cancellation token.
    fn cancel(&self) -> &CancelToken;

    /// The account snapshot owned by this host.
    fn snapshot(&self) -> &Mutex<Snapshot>;

    /// Run a command. Non-zero exit or transport failure is an error.
    fn exec(&self, cmd: &Cmd) -> Result<Output>;

    // --- file surface ---

    /// Metadata for a path, or None when nothing is there.
    fn stat(&self, path: &Path) -> Result<Option<FileStat>>;

    /// A read stream over the file. Close is idempotent.
    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>>;

    /// A write stream whose close commits the file.
    fn create(&self, path: &Path) -> Result<Box<dyn Write + Send>>;

    fn remove(&self, path: &Path) -> Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    fn mkdir_all(&self, path: &Path) -> Result<()>;

    fn chmod(&self, path: &Path, mode: u32) -> Result<()>;

    /// Change ownership; a None component is left as it is.
    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()>;

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.open(path)?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        let mut stream = self.create(path)?;
        stream.write_all(data)?;
        stream.flush()?;
        Ok(())
    }

    // --- accounts ---

    /// Fill the snapshot from the host's account databases if it has not
    /// been filled yet. The database files are read before the snapshot
    /// mutex is taken; a missing database counts as empty, an unreadable
    /// shadow leaves passwords unknown.
    fn reload_accounts(&self) -> Result<()> {
        if self.snapshot().lock().unwrap().loaded() {
            return Ok(());
        }

        let passwd = read_db(self, "/etc/passwd", false)?;
        let group = read_db(self, "/etc/group", false)?;
        let shadow = read_db(self, "/etc/shadow", true)?;
        if shadow.is_none() {
            log::debug!("{}: /etc/shadow unreadable, passwords unknown", self.describe());
        }

        let mut snap = self.snapshot().lock().unwrap();
        if snap.loaded() {
            return Ok(());
        }
        match (passwd, group) {
            (Some(passwd), Some(group)) => snap.load(&passwd, &group, shadow.as_deref()),
            _ => {
                snap.mark_loaded();
                Ok(())
            }
        }
    }

    fn create_group(&self, group: &Group) -> Result<()> {
        self.exec(
            &Cmd::new("groupadd")
                .arg("-g")
                .arg(group.gid.to_string())
                .arg(group.name.as_str())
                .cancel(self.cancel().clone()),
        )?;
        self.snapshot().lock().unwrap().insert_group(group.record());
        Ok(())
    }

    fn rename_group(&self, old: &str, new: &str) -> Result<()> {
        self.exec(
            &Cmd::new("groupmod")
                .arg("-n")
                .arg(new)
                .arg(old)
                .cancel(self.cancel().clone()),
        )?;
        self.snapshot().lock().unwrap().rename_group(old, new);
        Ok(())
    }

    fn set_group_gid(&self, name: &str, gid: u32) -> Result<()> {
        self.exec(
            &Cmd::new("groupmod")
                .arg("-g")
                .arg(gid.to_string())
                .arg(name)
                .cancel(self.cancel().clone()),
        )?;
        self.snapshot().lock().unwrap().set_group_gid(name, gid);
        Ok(())
    }

    fn delete_group(&self, name: &str) -> Result<()> {
        self.exec(&Cmd::new("groupdel").arg(name).cancel(self.cancel().clone()))?;
        self.snapshot().lock().unwrap().remove_group(name);
        Ok(())
    }

    fn create_user(&self, user: &User) -> Result<()> {
        let mut cmd = Cmd::new("useradd")
            .arg("-m")
            .arg("-g")
            .arg(user.primary_group())
            .arg("-u")
            .arg(user.uid.to_string());
        if !user.gecos.is_empty() {
            cmd = cmd.arg("-c").arg(user.gecos.as_str());
        }
        if !user.groups.is_empty() {
            cmd = cmd.arg("-G").arg(user.groups.join(","));
        }
        if !user.home.is_empty() {
            cmd = cmd.arg("-d").arg(user.home.as_str());
        }
        if !user.shell.is_empty() {
            cmd = cmd.arg("-s").arg(user.shell.as_str());
        }
        self.exec(&cmd.arg(user.name.as_str()).cancel(self.cancel().clone()))?;
        self.snapshot().lock().unwrap().insert_user(user.created_record());
        Ok(())
    }

    fn rename_user(&self, old: &str, new: &str) -> Result<()> {
        self.exec(
            &Cmd::new("usermod")
                .arg("-l")
                .arg(new)
                .arg(old)
                .cancel(self.cancel().clone()),
        )?;
        self.snapshot().lock().unwrap().rename_user(old, new);
        Ok(())
    }

    fn set_user_uid(&self, name: &str, uid: u32) -> Result<()> {
        self.exec(
            &Cmd::new("usermod")
                .arg("-u")
                .arg(uid.to_string())
                .arg(name)
                .cancel(self.cancel().clone()),
        )?;
        self.snapshot().lock().unwrap().set_user_uid(name, uid);
        Ok(())
    }

    /// Set the (crypt-encrypted) password. Fed to `chpasswd -e` on stdin;
    /// OpenBSD has no chpasswd, so `usermod -p` is used there even though
    /// the hash then shows in the process table — known limitation.
    fn set_user_password(&self, name: &str, password: &str, blank: bool) -> Result<()> {
        let wire = normalize_password(password, blank);
        if self.info()?.os == "openbsd" {
            self.exec(
                &Cmd::new("usermod")
                    .arg("-p")
                    .arg(wire)
                    .arg(name)
                    .cancel(self.cancel().clone()),
            )?;
        } else {
            self.exec(
                &Cmd::new("chpasswd")
                    .arg("-e")
                    .stdin(format!("{name}:{wire}\n").into_bytes())
                    .cancel(self.cancel().clone()),
            )?;
        }
        self.snapshot()
            .lock()
            .unwrap()
            .set_user_password(name, password, blank);
        Ok(())
    }

    fn set_user_groups(&self, name: &str, groups: &[String]) -> Result<()> {
        self.exec(
            &Cmd::new("usermod")
                .arg("-G")
                .arg(groups.join(","))
                .arg(name)
                .cancel(self.cancel().clone()),
        )?;
        self.snapshot().lock().unwrap().set_user_groups(name, groups);
        Ok(())
    }

    fn set_user_primary_group(&self, name: &str, group: &str) -> Result<()> {
        self.exec(
            &Cmd::new("usermod")
                .arg("-g")
                .arg(group)
                .arg(name)
                .cancel(self.cancel().clone()),
        )?;
        self.snapshot()
            .lock()
            .unwrap()
            .set_user_primary_group(name, group);
        Ok(())
    }

    fn delete_user(&self, name: &str) -> Result<()> {
        self.exec(&Cmd::new("userdel").arg(name).cancel(self.cancel().clone()))?;
        self.snapshot().lock().unwrap().remove_user(name);
        Ok(())
    }
}

/// Read an account database through the host's own file surface, tolerating
/// absence (and, for shadow, permission denial).
fn read_db(host: &(impl Host + ?Sized), path: &str, tolerate_denied: bool) -> Result<Option<String>> {
    match host.read_file(Path::new(path)) {
        Ok(data) => Ok(Some(String::from_utf8_lossy(&data).into_owned())),
        Err(err) if db_missing(&err, tolerate_denied) => Ok(None),
        Err(err) => Err(err),
    }
}

fn db_missing(err: &Error, tolerate_denied: bool) -> bool {
    let kind = match err {
        Error::Path { err, .. } => err.kind(),
        Error::Io(err) => err.kind(),
        _ => return false,
    };
    kind == ErrorKind::NotFound || (tolerate_denied && kind == ErrorKind::PermissionDenied)
}

/// Probe host facts with one `uname` round trip.
pub(crate) fn probe_info(host: &dyn Host) -> Result<HostInfo> {
    let out = host.exec(
        &Cmd::new("uname")
            .arg("-s")
            .arg("-n")
            .arg("-r")
            .arg("-m")
            .cancel(host.cancel().clone()),
    )?;
    let text = out.stdout_str();
    let mut fields = text.split_whitespace();
    let os = fields.next().unwrap_or("").to_lowercase();
    let hostname = fields.next().unwrap_or("").to_string();
    let kernel = fields.next().unwrap_or("").to_string();
    let arch = fields.next().unwrap_or("").to_string();
    Ok(HostInfo {
        uname: text.trim().to_string(),
        hostname,
        kernel,
        os,
        arch,
    })
}
