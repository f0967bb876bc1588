//! Host reached over SSH: commands through a pooled session, files over
//! SFTP.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::io::Write;
use std::net::TcpStream;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use ssh2::Session;

use super::{probe_info, FileStat, Host, HostInfo};
use crate::exec::{CancelToken, Cmd, Output};
use crate::model::Snapshot;
use crate::{Error, Result};

/// Shared pool of authenticated sessions, keyed by host address.
///
/// `get` hands out an idle session or dials a new one; dropping the guard
/// returns the session for reuse. Safe for concurrent `get` calls, though
/// today's sequential driver issues one at a time.
pub struct SessionPool {
    user: String,
    idle: Mutex<HashMap<String, Vec<Session>>>,
}

impl SessionPool {
    pub fn new(user: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            user: user.into(),
            idle: Mutex::new(HashMap::new()),
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn get(self: &Arc<Self>, host: &str) -> Result<PooledSession> {
        let idle = self.idle.lock().unwrap().get_mut(host).and_then(Vec::pop);
        let session = match idle {
            Some(session) => session,
            None => self.connect(host)?,
        };
        Ok(PooledSession {
            pool: Arc::clone(self),
            host: host.to_string(),
            session: Some(session),
        })
    }

    /// Dial, handshake and authenticate through the SSH agent.
    fn connect(&self, host: &str) -> Result<Session> {
        let addr = if host.contains(':') {
            host.to_string()
        } else {
            format!("{host}:22")
        };
        log::debug!("ssh: dialing {addr} as {}", self.user);
        let tcp = TcpStream::connect(&addr)?;
        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;
        session.userauth_agent(&self.user)?;
        Ok(session)
    }

    fn put(&self, host: &str, session: Session) {
        self.idle
            .lock()
            .unwrap()
            .entry(host.to_string())
            .or_default()
            .push(session);
    }
}

/// Guard around a checked-out session; returns it to the pool on drop.
pub struct PooledSession {
    pool: Arc<SessionPool>,
    host: String,
    session: Option<Session>,
}

impl Deref for PooledSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session.as_ref().expect("session already returned")
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.put(&self.host, session);
        }
    }
}

pub struct SshHost {
    host: String,
    pool: Arc<SessionPool>,
    cancel: CancelToken,
    snapshot: Mutex<Snapshot>,
    info: OnceLock<HostInfo>,
}

impl SshHost {
    pub fn new(host: impl Into<String>, pool: Arc<SessionPool>, cancel: CancelToken) -> Self {
        Self {
            host: host.into(),
            pool,
            cancel,
            snapshot: Mutex::new(Snapshot::new()),
            info: OnceLock::new(),
        }
    }

    fn sftp(&self) -> Result<(PooledSession, ssh2::Sftp)> {
        let session = self.pool.get(&self.host)?;
        let sftp = session.sftp()?;
        Ok((session, sftp))
    }
}

impl fmt::Debug for SshHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshHost")
            .field("host", &self.host)
            .field("user", &self.pool.user())
            .finish()
    }
}

/// The SFTP status libssh2 reports for a missing path.
fn sftp_missing(err: &ssh2::Error) -> bool {
    matches!(err.code(), ssh2::ErrorCode::SFTP(2))
}

fn shell_quote(cmd: &Cmd) -> Result<String> {
    let mut line = String::new();
    for (index, part) in std::iter::once(&cmd.program).chain(cmd.args.iter()).enumerate() {
        if index > 0 {
            line.push(' ');
        }
        let quoted = shlex::try_quote(part).map_err(|_| Error::Argv(part.clone()))?;
        line.push_str(&quoted);
    }
    Ok(line)
}

impl Host for SshHost {
    fn describe(&self) -> String {
        format!("ssh {}@{}", self.pool.user(), self.host)
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
        cmd.cancel.check()?;

        let session = self.pool.get(&self.host)?;
        let mut channel = session.channel_session()?;
        for (key, value) in &cmd.env {
            channel.setenv(key, value)?;
        }

        let line = shell_quote(cmd)?;
        log::debug!("ssh {}: {line}", self.host);
        channel.exec(&line)?;

        if let Some(data) = &cmd.stdin {
            channel.write_all(data)?;
        }
        channel.send_eof()?;

        let mut stdout = Vec::new();
        channel.read_to_end(&mut stdout)?;
        let mut stderr = Vec::new();
        channel.stderr().read_to_end(&mut stderr)?;
        channel.wait_close()?;

        let status = channel.exit_status()?;
        if status != 0 {
            return Err(Error::CommandFailed {
                command: line,
                status,
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        Ok(Output { stdout, stderr })
    }

    fn stat(&self, path: &Path) -> Result<Option<FileStat>> {
        let (_session, sftp) = self.sftp()?;
        match sftp.stat(path) {
            Ok(stat) => Ok(Some(FileStat {
                mode: stat.perm.unwrap_or(0) & 0o7777,
                uid: stat.uid.unwrap_or(0),
                gid: stat.gid.unwrap_or(0),
                size: stat.size.unwrap_or(0),
                dir: stat.is_dir(),
            })),
            Err(err) if sftp_missing(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let (_session, sftp) = self.sftp()?;
        let file = sftp.open(path)?;
        Ok(Box::new(file))
    }

    fn create(&self, path: &Path) -> Result<Box<dyn Write + Send>> {
        let (_session, sftp) = self.sftp()?;
        let file = sftp.create(path)?;
        Ok(Box::new(file))
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let (_session, sftp) = self.sftp()?;
        sftp.unlink(path)?;
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let (_session, sftp) = self.sftp()?;
        sftp.rename(from, to, None)?;
        Ok(())
    }

    fn mkdir_all(&self, path: &Path) -> Result<()> {
        let (_session, sftp) = self.sftp()?;
        let mut missing: Vec<PathBuf> = Vec::new();
        let mut cursor = Some(path);
        while let Some(dir) = cursor {
            if dir.as_os_str().is_empty() || dir == Path::new("/") {
                break;
            }
            match sftp.stat(dir) {
                Ok(_) => break,
                Err(err) if sftp_missing(&err) => {
                    missing.push(dir.to_path_buf());
                    cursor = dir.parent();
                }
                Err(err) => return Err(err.into()),
            }
        }
        for dir in missing.iter().rev() {
            sftp.mkdir(dir, 0o755)?;
        }
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        let (_session, sftp) = self.sftp()?;
        sftp.setstat(
            path,
            ssh2::FileStat {
                size: None,
                uid: None,
                gid: None,
                perm: Some(mode),
                atime: None,
                mtime: None,
            },
        )?;
        Ok(())
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        let (_session, sftp) = self.sftp()?;
        // setstat wants both ids; fill the unmanaged side from the live stat
        let (uid, gid) = match (uid, gid) {
            (Some(uid), Some(gid)) => (uid, gid),
            (uid, gid) => {
                let stat = sftp.stat(path)?;
                (
                    uid.or(stat.uid).unwrap_or(0),
                    gid.or(stat.gid).unwrap_or(0),
                )
            }
        };
        sftp.setstat(
            path,
            ssh2::FileStat {
                size: None,
                uid: Some(uid),
                gid: Some(gid),
                perm: None,
                atime: None,
                mtime: None,
            },
        )?;
        Ok(())
    }
}
