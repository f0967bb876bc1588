//! Command plumbing: argv descriptions, captured output and cancellation.

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::{Error, Result};

/// Cooperative cancellation flag for a run. Clones share the flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Error out if the token has been tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A command to run on a host: argv, environment pairs and optional stdin.
#[derive(Debug, Clone, Default)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
    pub cancel: CancelToken,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    pub fn cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// The command as one displayable line (unquoted; for logs and errors).
    pub fn line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default)]
pub struct Output {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Output {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Run a command as a local subprocess, killing it if the token trips.
///
/// When explicit environment pairs are given only PATH is carried over from
/// the parent; otherwise the full environment is inherited.
pub(crate) fn run_local(cmd: &Cmd) -> Result<Output> {
    cmd.cancel.check()?;

    let mut command = Command::new(&cmd.program);
    command.args(&cmd.args);
    if !cmd.env.is_empty() {
        command.env_clear();
        if let Ok(path) = std::env::var("PATH") {
            command.env("PATH", path);
        }
        for (key, value) in &cmd.env {
            command.env(key, value);
        }
    }
    command.stdin(if cmd.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    log::debug!("exec: {}", cmd.line());

    let mut child = command.spawn().map_err(|err| Error::CommandFailed {
        command: cmd.line(),
        status: -1,
        stderr: err.to_string(),
    })?;

    if let Some(data) = &cmd.stdin {
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(data)?;
        }
    }

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_reader = thread::spawn(move || read_all(stdout));
    let err_reader = thread::spawn(move || read_all(stderr));

    let status = loop {
        if cmd.cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Cancelled);
        }
        match child.try_wait()? {
            Some(status) => break status,
            None => thread::sleep(Duration::from_millis(20)),
        }
    };

    let stdout = out_reader.join().unwrap_or_default();
    let stderr = err_reader.join().unwrap_or_default();

    if !status.success() {
        return Err(Error::CommandFailed {
            command: cmd.line(),
            status: status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        });
    }

    Ok(Output { stdout, stderr })
}

fn read_all<R: Read>(stream: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        let _ = stream.read_to_end(&mut buf);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_captures_stdout() {
        let out = run_local(&Cmd::new("echo").arg("hello")).unwrap();
        assert_eq!(out.stdout_str().trim(), "hello");
    }

    #[test]
    fn run_nonzero_exit_is_error() {
        let err = run_local(&Cmd::new("false")).unwrap_err();
        match err {
            Error::CommandFailed { status, .. } => assert_eq!(status, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn run_forwards_stdin() {
        let out = run_local(&Cmd::new("cat").stdin("piped\n".as_bytes())).unwrap();
        assert_eq!(out.stdout_str(), "piped\n");
    }

    #[test]
    fn tripped_token_cancels_before_spawn() {
        let token = CancelToken::new();
        token.cancel();
        let err = run_local(&Cmd::new("echo").arg("nope").cancel(token)).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn line_joins_argv() {
        let cmd = Cmd::new("groupadd").arg("-g").arg("101").arg("web");
        assert_eq!(cmd.line(), "groupadd -g 101 web");
    }
}
