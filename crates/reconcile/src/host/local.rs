//! Host backed by the running operating system.

use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use super::{probe_info, FileStat, Host, HostInfo};
use crate::exec::{run_local, CancelToken, Cmd, Output};
use crate::model::Snapshot;
use crate::{Error, Result};

#[derive(Debug)]
pub struct LocalHost {
    cancel: CancelToken,
    snapshot: Mutex<Snapshot>,
    info: OnceLock<HostInfo>,
}

impl LocalHost {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            snapshot: Mutex::new(Snapshot::new()),
            info: OnceLock::new(),
        }
    }
}

fn path_err(path: &Path, err: std::io::Error) -> Error {
    Error::Path {
        path: path.to_path_buf(),
        err,
    }
}

impl Host for LocalHost {
    fn describe(&self) -> String {
        "local".to_string()
    }

    fn info(&self) -> Result<HostInfo> {
        if let Some(info) = self.info.get() {
            return Ok(info.clone());
        }
        let info = probe_info(self)?;
        Ok(self.info.get_or_init(|| info).clone())
    }

    fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    fn snapshot(&self) -> &Mutex<Snapshot> {
        &self.snapshot
    }

    fn exec(&self, cmd: &Cmd) -> Result<Output> {
        self.cancel.check()?;
        run_local(cmd)
    }

    fn stat(&self, path: &Path) -> Result<Option<FileStat>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(FileStat {
                mode: meta.mode() & 0o7777,
                uid: meta.uid(),
                gid: meta.gid(),
                size: meta.len(),
                dir: meta.is_dir(),
            })),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(path_err(path, err)),
        }
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let file = fs::File::open(path).map_err(|err| path_err(path, err))?;
        Ok(Box::new(file))
    }

    fn create(&self, path: &Path) -> Result<Box<dyn Write + Send>> {
        let file = fs::File::create(path).map_err(|err| path_err(path, err))?;
        Ok(Box::new(file))
    }

    fn remove(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|err| path_err(path, err))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).map_err(|err| path_err(from, err))
    }

    fn mkdir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|err| path_err(path, err))
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|err| path_err(path, err))
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        std::os::unix::fs::chown(path, uid, gid).map_err(|err| path_err(path, err))
    }
}
