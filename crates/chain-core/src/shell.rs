use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Outcome of one `sh -c` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellOutput {
    /// `None` when the process was killed or could not be spawned.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    fn spawn_failure(message: String, started: Instant) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: message,
            duration: started.elapsed(),
            timed_out: false,
        }
    }
}

enum Event {
    Exited(std::io::Result<ExitStatus>),
    Stdout(String),
    Stderr(String),
}

/// Run `command` through `sh -c` in `cwd`.
///
/// The shell leads its own process group. stdout and stderr are drained on
/// dedicated threads so a chatty process cannot deadlock on a full pipe.
/// `timeout` bounds both the exit and the end of output: a background child
/// still holding a pipe open counts against it. When it elapses the whole
/// group is killed and the result is marked `timed_out`. `None` waits
/// indefinitely. Each stream is capped to `max_output` bytes, keeping the tail.
pub fn run_shell(
    command: &str,
    cwd: &Path,
    env: &[(String, String)],
    timeout: Option<Duration>,
    max_output: usize,
) -> ShellOutput {
    let started = Instant::now();

    if command.trim().is_empty() {
        return ShellOutput::spawn_failure("command is empty".to_string(), started);
    }

    let mut child = match Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
    {
        Ok(c) => c,
        Err(e) => return ShellOutput::spawn_failure(format!("failed to spawn: {e}"), started),
    };

    let group = child.id();
    let (tx, rx) = mpsc::channel();

    let stdout_handle = child.stdout.take();
    let out_tx = tx.clone();
    std::thread::spawn(move || {
        let _ = out_tx.send(Event::Stdout(drain(stdout_handle)));
    });
    let stderr_handle = child.stderr.take();
    let err_tx = tx.clone();
    std::thread::spawn(move || {
        let _ = err_tx.send(Event::Stderr(drain(stderr_handle)));
    });
    std::thread::spawn(move || {
        let _ = tx.send(Event::Exited(child.wait()));
    });

    let deadline = timeout.map(|limit| started + limit);
    let mut status = None;
    let mut stdout = None;
    let mut stderr = None;
    while status.is_none() || stdout.is_none() || stderr.is_none() {
        let event = match deadline {
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(at) => rx.recv_timeout(at.saturating_duration_since(Instant::now())),
        };
        match event {
            Ok(Event::Exited(result)) => status = Some(result),
            Ok(Event::Stdout(s)) => stdout = Some(s),
            Ok(Event::Stderr(s)) => stderr = Some(s),
            Err(RecvTimeoutError::Timeout) => {
                kill_group(group);
                let limit = timeout.unwrap_or_default();
                tracing::warn!(pgid = group, command, "command timed out, process group killed");
                return ShellOutput {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("timed out after {}", format_duration(limit)),
                    duration: started.elapsed(),
                    timed_out: true,
                };
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    match status {
        Some(Ok(status)) => ShellOutput {
            exit_code: status.code(),
            stdout: cap_tail(stdout.unwrap_or_default(), max_output),
            stderr: cap_tail(stderr.unwrap_or_default(), max_output),
            duration: started.elapsed(),
            timed_out: false,
        },
        Some(Err(e)) => ShellOutput::spawn_failure(format!("wait failed: {e}"), started),
        None => ShellOutput::spawn_failure("lost track of the process".to_string(), started),
    }
}

fn drain(handle: Option<impl Read>) -> String {
    let mut buf = String::new();
    if let Some(mut r) = handle {
        let _ = r.read_to_string(&mut buf);
    }
    buf
}

/// Keep at most `max` bytes from the end of `s`, on a char boundary.
fn cap_tail(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut cut = s.len() - max;
    while !s.is_char_boundary(cut) {
        cut += 1;
    }
    s[cut..].to_string()
}

pub fn format_duration(d: Duration) -> String {
    if d.as_secs() == 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}s", d.as_secs())
    }
}

/// SIGKILL every process in group `pgid`. Best-effort; errors are ignored.
fn kill_group(pgid: u32) {
    let _ = Command::new("kill")
        .args(["-9", "--", &format!("-{pgid}")])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

/// Whether a process with `pid` still exists (`kill -0`).
pub fn process_alive(pid: u32) -> bool {
    Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
