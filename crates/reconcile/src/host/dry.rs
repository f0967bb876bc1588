//! In-memory shadow host for dry runs.
//!
//! Writes land only in the shadow; reads consult the shadow first and fall
//! through to the optional cascade host. Because every mutation the
//! reconciler issues is immediately visible to later reads within the same
//! run, a dry run cascading to a real host predicts exactly what an apply
//! would print.
//!
//! Lock discipline: the filesystem map and the account snapshot sit behind
//! separate mutexes, and neither is held across a cascade call — the
//! cascade may itself be a dry host.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{FileStat, Host, HostInfo};
use crate::exec::{CancelToken, Cmd, Output};
use crate::model::Snapshot;
use crate::resources::{Group, User};
use crate::{Error, Result};

/// One shadowed path. A record with no stat is a tombstone: the path was
/// removed during this run and the cascade must not resurrect it.
#[derive(Debug, Clone)]
struct DryFile {
    stat: Option<FileStat>,
    /// None when only metadata is shadowed and content still lives in the
    /// cascade.
    content: Option<Vec<u8>>,
}

/// What the shadow knows about a path, extracted under the lock.
enum Shadowed {
    Missing,
    Tombstone,
    Dir,
    Content(Vec<u8>),
    MetaOnly,
}

#[derive(Debug)]
pub struct DryHost {
    /// Identity synthesized onto files the shadow creates
    uid: u32,
    gid: u32,
    cascade: Option<Arc<dyn Host>>,
    fs: Arc<Mutex<HashMap<PathBuf, DryFile>>>,
    snapshot: Mutex<Snapshot>,
    cancel: CancelToken,
}

impl DryHost {
    pub fn new(uid: u32, gid: u32, cascade: Option<Arc<dyn Host>>, cancel: CancelToken) -> Self {
        Self {
            uid,
            gid,
            cascade,
            fs: Arc::new(Mutex::new(HashMap::new())),
            snapshot: Mutex::new(Snapshot::new()),
            cancel,
        }
    }

    fn shadowed(&self, path: &Path) -> Shadowed {
        let fs = self.fs.lock().unwrap();
        match fs.get(path) {
            None => Shadowed::Missing,
            Some(file) => match (&file.stat, &file.content) {
                (None, _) => Shadowed::Tombstone,
                (Some(stat), _) if stat.dir => Shadowed::Dir,
                (Some(_), Some(content)) => Shadowed::Content(content.clone()),
                (Some(_), None) => Shadowed::MetaOnly,
            },
        }
    }

    /// Current stat for a path from shadow or cascade; the fs lock is never
    /// held while the cascade answers.
    fn effective_stat(&self, path: &Path) -> Result<Option<FileStat>> {
        let shadow = {
            let fs = self.fs.lock().unwrap();
            fs.get(path).map(|file| file.stat)
        };
        match shadow {
            Some(stat) => Ok(stat),
            None => match &self.cascade {
                Some(cascade) => cascade.stat(path),
                None => Ok(None),
            },
        }
    }

    fn update_stat(&self, path: &Path, apply: impl FnOnce(&mut FileStat)) -> Result<()> {
        let mut stat = self
            .effective_stat(path)?
            .ok_or_else(|| not_found(path))?;
        apply(&mut stat);
        let mut fs = self.fs.lock().unwrap();
        let entry = fs.entry(path.to_path_buf()).or_insert(DryFile {
            stat: None,
            content: None,
        });
        entry.stat = Some(stat);
        Ok(())
    }
}

fn not_found(path: &Path) -> Error {
    Error::Path {
        path: path.to_path_buf(),
        err: io::Error::from(io::ErrorKind::NotFound),
    }
}

/// Write stream that commits into the shadow map when dropped.
struct DryWriter {
    path: PathBuf,
    buf: Vec<u8>,
    fs: Arc<Mutex<HashMap<PathBuf, DryFile>>>,
    uid: u32,
    gid: u32,
}

impl Write for DryWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for DryWriter {
    fn drop(&mut self) {
        let mut fs = self.fs.lock().unwrap();
        let mode = fs
            .get(&self.path)
            .and_then(|file| file.stat)
            .map(|stat| stat.mode)
            .unwrap_or(0o644);
        fs.insert(
            self.path.clone(),
            DryFile {
                stat: Some(FileStat {
                    mode,
                    uid: self.uid,
                    gid: self.gid,
                    size: self.buf.len() as u64,
                    dir: false,
                }),
                content: Some(std::mem::take(&mut self.buf)),
            },
        );
    }
}

impl Host for DryHost {
    fn describe(&self) -> String {
        match &self.cascade {
            Some(cascade) => format!("dry over {}", cascade.describe()),
            None => "dry".to_string(),
        }
    }

    fn info(&self) -> Result<HostInfo> {
        match &self.cascade {
            Some(cascade) => cascade.info(),
            None => Ok(HostInfo {
                uname: String::new(),
                hostname: "dry".to_string(),
                kernel: String::new(),
                os: std::env::consts::OS.to_string(),
                arch: std::env::consts::ARCH.to_string(),
            }),
        }
    }

    fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    fn snapshot(&self) -> &Mutex<Snapshot> {
        &self.snapshot
    }

    /// Nothing runs during a dry run; reads that need command output go
    /// through the cascade via `info()` instead.
    fn exec(&self, cmd: &Cmd) -> Result<Output> {
        self.cancel.check()?;
        log::debug!("dry: would run {}", cmd.line());
        Ok(Output::default())
    }

    fn stat(&self, path: &Path) -> Result<Option<FileStat>> {
        self.effective_stat(path)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        match self.shadowed(path) {
            Shadowed::Tombstone => Err(not_found(path)),
            Shadowed::Dir => Err(Error::Path {
                path: path.to_path_buf(),
                err: io::Error::other("is a directory"),
            }),
            Shadowed::Content(content) => Ok(Box::new(io::Cursor::new(content))),
            Shadowed::Missing | Shadowed::MetaOnly => match &self.cascade {
                Some(cascade) => cascade.open(path),
                None => Err(not_found(path)),
            },
        }
    }

    fn create(&self, path: &Path) -> Result<Box<dyn Write + Send>> {
        Ok(Box::new(DryWriter {
            path: path.to_path_buf(),
            buf: Vec::new(),
            fs: Arc::clone(&self.fs),
            uid: self.uid,
            gid: self.gid,
        }))
    }

    fn remove(&self, path: &Path) -> Result<()> {
        if self.effective_stat(path)?.is_none() {
            return Err(not_found(path));
        }
        self.fs.lock().unwrap().insert(
            path.to_path_buf(),
            DryFile {
                stat: None,
                content: None,
            },
        );
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let taken = {
            let mut fs = self.fs.lock().unwrap();
            fs.remove(from)
        };
        let record = match taken {
            Some(record) => {
                if record.stat.is_none() {
                    // renaming a path this run already deleted
                    self.fs.lock().unwrap().insert(from.to_path_buf(), record);
                    return Err(not_found(from));
                }
                record
            }
            None => match &self.cascade {
                Some(cascade) => {
                    let stat = cascade.stat(from)?.ok_or_else(|| not_found(from))?;
                    let content = if stat.dir {
                        None
                    } else {
                        Some(cascade.read_file(from)?)
                    };
                    DryFile {
                        stat: Some(stat),
                        content,
                    }
                }
                None => return Err(not_found(from)),
            },
        };

        let mut fs = self.fs.lock().unwrap();
        fs.insert(
            from.to_path_buf(),
            DryFile {
                stat: None,
                content: None,
            },
        );
        fs.insert(to.to_path_buf(), record);
        Ok(())
    }

    fn mkdir_all(&self, path: &Path) -> Result<()> {
        let mut missing: Vec<PathBuf> = Vec::new();
        let mut cursor = Some(path);
        while let Some(dir) = cursor {
            if dir.as_os_str().is_empty() || dir == Path::new("/") {
                break;
            }
            match self.effective_stat(dir)? {
                Some(stat) if stat.dir => break,
                Some(_) => {
                    return Err(Error::Path {
                        path: dir.to_path_buf(),
                        err: io::Error::other("not a directory"),
                    })
                }
                None => {
                    missing.push(dir.to_path_buf());
                    cursor = dir.parent();
                }
            }
        }
        let mut fs = self.fs.lock().unwrap();
        for dir in missing.iter().rev() {
            fs.insert(
                dir.clone(),
                DryFile {
                    stat: Some(FileStat {
                        mode: 0o755,
                        uid: self.uid,
                        gid: self.gid,
                        size: 0,
                        dir: true,
                    }),
                    content: None,
                },
            );
        }
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        self.update_stat(path, |stat| stat.mode = mode & 0o7777)
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        self.update_stat(path, |stat| {
            if let Some(uid) = uid {
                stat.uid = uid;
            }
            if let Some(gid) = gid {
                stat.gid = gid;
            }
        })
    }

    // Account mutations touch only the shadow snapshot; the cascade never
    // sees them.

    fn create_group(&self, group: &Group) -> Result<()> {
        self.snapshot.lock().unwrap().insert_group(group.record());
        Ok(())
    }

    fn rename_group(&self, old: &str, new: &str) -> Result<()> {
        self.snapshot.lock().unwrap().rename_group(old, new);
        Ok(())
    }

    fn set_group_gid(&self, name: &str, gid: u32) -> Result<()> {
        self.snapshot.lock().unwrap().set_group_gid(name, gid);
        Ok(())
    }

    fn delete_group(&self, name: &str) -> Result<()> {
        self.snapshot.lock().unwrap().remove_group(name);
        Ok(())
    }

    fn create_user(&self, user: &User) -> Result<()> {
        self.snapshot.lock().unwrap().insert_user(user.created_record());
        Ok(())
    }

    fn rename_user(&self, old: &str, new: &str) -> Result<()> {
        self.snapshot.lock().unwrap().rename_user(old, new);
        Ok(())
    }

    fn set_user_uid(&self, name: &str, uid: u32) -> Result<()> {
        self.snapshot.lock().unwrap().set_user_uid(name, uid);
        Ok(())
    }

    fn set_user_password(&self, name: &str, password: &str, blank: bool) -> Result<()> {
        self.snapshot
            .lock()
            .unwrap()
            .set_user_password(name, password, blank);
        Ok(())
    }

    fn set_user_groups(&self, name: &str, groups: &[String]) -> Result<()> {
        self.snapshot.lock().unwrap().set_user_groups(name, groups);
        Ok(())
    }

    fn set_user_primary_group(&self, name: &str, group: &str) -> Result<()> {
        self.snapshot
            .lock()
            .unwrap()
            .set_user_primary_group(name, group);
        Ok(())
    }

    fn delete_user(&self, name: &str) -> Result<()> {
        self.snapshot.lock().unwrap().remove_user(name);
        Ok(())
    }
}
