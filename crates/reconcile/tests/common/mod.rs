//! Shared test host: records every command and file mutation so tests can
//! assert on the exact host calls an apply issued.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use reconcile::{
    ApplyContext, CancelToken, Cmd, FileStat, Host, HostInfo, Output, Snapshot,
};

#[derive(Debug, Default)]
pub struct MockHost {
    cancel: CancelToken,
    snapshot: Mutex<Snapshot>,
    files: Arc<Mutex<HashMap<PathBuf, (FileStat, Vec<u8>)>>>,
    commands: Mutex<Vec<String>>,
    stdins: Mutex<Vec<(String, Vec<u8>)>>,
    mutations: Arc<Mutex<Vec<String>>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a regular file with root ownership.
    pub fn seed_file(&self, path: &str, mode: u32, content: &str) {
        self.files.lock().unwrap().insert(
            PathBuf::from(path),
            (
                FileStat {
                    mode,
                    uid: 0,
                    gid: 0,
                    size: content.len() as u64,
                    dir: false,
                },
                content.as_bytes().to_vec(),
            ),
        );
    }

    /// Seed the account snapshot directly and mark it loaded.
    pub fn seed_accounts(&self, fill: impl FnOnce(&mut Snapshot)) {
        let mut snap = self.snapshot.lock().unwrap();
        fill(&mut snap);
        snap.mark_loaded();
    }

    pub fn command_log(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn stdin_log(&self) -> Vec<(String, Vec<u8>)> {
        self.stdins.lock().unwrap().clone()
    }

    /// Every file-surface mutation, in issue order.
    pub fn mutation_log(&self) -> Vec<String> {
        self.mutations.lock().unwrap().clone()
    }

    pub fn file_content(&self, path: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(Path::new(path))
            .map(|(_, content)| content.clone())
    }

    pub fn file_stat(&self, path: &str) -> Option<FileStat> {
        self.files
            .lock()
            .unwrap()
            .get(Path::new(path))
            .map(|(stat, _)| *stat)
    }

    fn log_mutation(&self, entry: String) {
        self.mutations.lock().unwrap().push(entry);
    }
}

struct MockWriter {
    path: PathBuf,
    buf: Vec<u8>,
    files: Arc<Mutex<HashMap<PathBuf, (FileStat, Vec<u8>)>>>,
}

impl Write for MockWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MockWriter {
    fn drop(&mut self) {
        let mut files = self.files.lock().unwrap();
        let mode = files
            .get(&self.path)
            .map(|(stat, _)| stat.mode)
            .unwrap_or(0o644);
        files.insert(
            self.path.clone(),
            (
                FileStat {
                    mode,
                    uid: 0,
                    gid: 0,
                    size: self.buf.len() as u64,
                    dir: false,
                },
                std::mem::take(&mut self.buf),
            ),
        );
    }
}

fn missing(path: &Path) -> reconcile::Error {
    reconcile::Error::Path {
        path: path.to_path_buf(),
        err: io::Error::from(io::ErrorKind::NotFound),
    }
}

impl Host for MockHost {
    fn describe(&self) -> String {
        "mock".to_string()
    }

    fn info(&self) -> reconcile::Result<HostInfo> {
        Ok(HostInfo {
            uname: "Linux mock 6.1.0 x86_64".to_string(),
            hostname: "mock".to_string(),
            kernel: "6.1.0".to_string(),
            os: "linux".to_string(),
            arch: "x86_64".to_string(),
        })
    }

    fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    fn snapshot(&self) -> &Mutex<Snapshot> {
        &self.snapshot
    }

    fn exec(&self, cmd: &Cmd) -> reconcile::Result<Output> {
        let line = cmd.line();
        if let Some(stdin) = &cmd.stdin {
            self.stdins.lock().unwrap().push((line.clone(), stdin.clone()));
        }
        self.commands.lock().unwrap().push(line);
        Ok(Output::default())
    }

    fn stat(&self, path: &Path) -> reconcile::Result<Option<FileStat>> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(path)
            .map(|(stat, _)| *stat))
    }

    fn open(&self, path: &Path) -> reconcile::Result<Box<dyn Read + Send>> {
        let files = self.files.lock().unwrap();
        let (_, content) = files.get(path).ok_or_else(|| missing(path))?;
        Ok(Box::new(io::Cursor::new(content.clone())))
    }

    fn create(&self, path: &Path) -> reconcile::Result<Box<dyn Write + Send>> {
        self.log_mutation(format!("write {}", path.display()));
        Ok(Box::new(MockWriter {
            path: path.to_path_buf(),
            buf: Vec::new(),
            files: Arc::clone(&self.files),
        }))
    }

    fn remove(&self, path: &Path) -> reconcile::Result<()> {
        self.log_mutation(format!("remove {}", path.display()));
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| missing(path))
    }

    fn rename(&self, from: &Path, to: &Path) -> reconcile::Result<()> {
        self.log_mutation(format!("rename {} -> {}", from.display(), to.display()));
        let mut files = self.files.lock().unwrap();
        let entry = files.remove(from).ok_or_else(|| missing(from))?;
        files.insert(to.to_path_buf(), entry);
        Ok(())
    }

    fn mkdir_all(&self, path: &Path) -> reconcile::Result<()> {
        self.log_mutation(format!("mkdir -p {}", path.display()));
        self.files.lock().unwrap().insert(
            path.to_path_buf(),
            (
                FileStat {
                    mode: 0o755,
                    uid: 0,
                    gid: 0,
                    size: 0,
                    dir: true,
                },
                Vec::new(),
            ),
        );
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> reconcile::Result<()> {
        self.log_mutation(format!("chmod {:o} {}", mode, path.display()));
        let mut files = self.files.lock().unwrap();
        let (stat, _) = files.get_mut(path).ok_or_else(|| missing(path))?;
        stat.mode = mode & 0o7777;
        Ok(())
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> reconcile::Result<()> {
        self.log_mutation(format!(
            "chown {}:{} {}",
            uid.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
            gid.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
            path.display()
        ));
        let mut files = self.files.lock().unwrap();
        let (stat, _) = files.get_mut(path).ok_or_else(|| missing(path))?;
        if let Some(uid) = uid {
            stat.uid = uid;
        }
        if let Some(gid) = gid {
            stat.gid = gid;
        }
        Ok(())
    }
}

/// Apply context against a host with everything else defaulted.
pub fn ctx(host: &dyn Host) -> ApplyContext<'_> {
    ApplyContext {
        host,
        dry: false,
        diff: false,
        verbose: false,
        renderer: None,
        cancel: CancelToken::new(),
    }
}
