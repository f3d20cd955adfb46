//! Shell command tasks

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Lines of stderr kept for the failure message
const STDERR_TAIL: usize = 20;

/// A command run through `sh -c`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub command: String,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    /// Prefix for logged output lines
    pub label: String,
}

impl ShellCommand {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
            label: String::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Run to completion, streaming output to the log.
    ///
    /// The child is killed if the returned future is dropped.
    pub async fn run(self) -> anyhow::Result<()> {
        debug!(label = %self.label, command = %self.command, cwd = %self.cwd.display(), "spawning");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.cwd)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", self.command))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (_, stderr_tail, status) = tokio::join!(
            forward_lines(stdout, &self.label, false),
            forward_lines(stderr, &self.label, true),
            child.wait(),
        );
        let status = status.with_context(|| format!("failed to wait for `{}`", self.command))?;

        if status.success() {
            return Ok(());
        }

        let code = status
            .code()
            .map_or_else(|| "a signal".to_string(), |c| format!("code {}", c));
        let tail: Vec<String> = stderr_tail.into_iter().collect();
        if tail.is_empty() {
            bail!("`{}` exited with {}", self.command, code);
        }
        bail!("`{}` exited with {}: {}", self.command, code, tail.join("\n"));
    }
}

/// Log every line of a stream, returning the last few
async fn forward_lines<R>(stream: Option<R>, label: &str, is_stderr: bool) -> VecDeque<String>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::new();
    let Some(stream) = stream else {
        return tail;
    };

    // Raw bytes so a line that is not UTF-8 never stops the pipe from draining
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("[{}] output stream closed: {}", label, e);
                break;
            }
        }
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        if is_stderr {
            warn!("[{}] {}", label, line);
            if tail.len() == STDERR_TAIL {
                tail.pop_front();
            }
            tail.push_back(line);
        } else {
            debug!("[{}] {}", label, line);
        }
    }
    tail
}
