//! Child process supervision for run trials
//!
//! One function, [`run`]: spawn the program with piped stdio, feed it one
//! line of stdin, drain stdout/stderr on reader threads, and enforce the
//! wall-clock limit. Every failure mode is folded into a [`RunOutcome`];
//! a misbehaving child never surfaces as an error to the caller.

use serde::Serialize;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wait_timeout::ChildExt;

/// How one supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    /// Exit code 0
    Success,
    /// Killed at the wall-clock limit
    TimedOut,
    /// Nonzero exit, spawn failure, or supervision failure
    RuntimeError,
}

/// Captured result of one supervised process
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub kind: ExitKind,
    /// Captured stdout; for `RuntimeError`, stderr is appended as
    /// diagnostic text
    pub stdout: String,
}

impl RunOutcome {
    fn runtime_error(message: String) -> Self {
        Self {
            kind: ExitKind::RuntimeError,
            stdout: message,
        }
    }
}

/// One process launch: argv, working directory, stdin text, time limit
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub stdin: String,
    /// `None` waits forever
    pub timeout: Option<Duration>,
}

/// Launch and supervise one child process.
///
/// Stdin is written as `stdin + newline`, emulating a user typing one
/// line, then closed so a blocking read terminates. On timeout the whole
/// process group is killed and whatever stdout was produced so far is
/// kept. A spawn failure reports the executable as not built rather than
/// failing the batch.
pub fn run(request: &RunRequest) -> RunOutcome {
    let mut command = Command::new(&request.program);
    command
        .args(&request.args)
        .current_dir(&request.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        // Lead a fresh process group so the timeout kill reaches
        // grandchildren too.
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            return RunOutcome::runtime_error(format!(
                "Cannot execute '{}' (may not be built yet): {}",
                request.program.display(),
                err
            ));
        }
    };

    // All three pipes are serviced on dedicated threads before the wait
    // begins: a full stdout pipe, or a stdin write the child never reads,
    // would otherwise block with no timeout armed yet.
    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());
    let stdin_writer = feed(child.stdin.take(), request.stdin.clone());

    let status = match request.timeout {
        Some(limit) => match child.wait_timeout(limit) {
            Ok(Some(status)) => status,
            Ok(None) => {
                terminate(&mut child);
                let _ = child.wait();
                let stdout = join_reader(stdout_reader);
                let _ = join_reader(stderr_reader);
                join_writer(stdin_writer);
                return RunOutcome {
                    kind: ExitKind::TimedOut,
                    stdout,
                };
            }
            Err(err) => {
                terminate(&mut child);
                let _ = child.wait();
                let _ = join_reader(stdout_reader);
                let _ = join_reader(stderr_reader);
                join_writer(stdin_writer);
                return RunOutcome::runtime_error(format!(
                    "Failed waiting for '{}': {}",
                    request.program.display(),
                    err
                ));
            }
        },
        None => match child.wait() {
            Ok(status) => status,
            Err(err) => {
                let _ = join_reader(stdout_reader);
                let _ = join_reader(stderr_reader);
                join_writer(stdin_writer);
                return RunOutcome::runtime_error(format!(
                    "Failed waiting for '{}': {}",
                    request.program.display(),
                    err
                ));
            }
        },
    };

    let stdout = join_reader(stdout_reader);
    let stderr = join_reader(stderr_reader);
    join_writer(stdin_writer);

    if status.success() {
        RunOutcome {
            kind: ExitKind::Success,
            stdout,
        }
    } else {
        let mut diagnostic = stdout;
        diagnostic.push_str(&stderr);
        RunOutcome {
            kind: ExitKind::RuntimeError,
            stdout: diagnostic,
        }
    }
}

/// Collect a pipe to a string on its own thread, so a full pipe buffer
/// never deadlocks against the wait.
fn drain(pipe: Option<impl Read + Send + 'static>) -> Option<JoinHandle<String>> {
    pipe.map(|mut stream| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stream.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

/// Write the stdin text plus a trailing newline on its own thread, then
/// drop the handle to close the pipe. A child that never reads its stdin
/// closes the pipe early; the resulting broken-pipe write is not an error
/// of the trial. The timeout kill closes the read end, so a backed-up
/// write always unblocks.
fn feed(pipe: Option<impl Write + Send + 'static>, text: String) -> Option<JoinHandle<()>> {
    pipe.map(|mut stream| {
        thread::spawn(move || {
            let _ = stream.write_all(text.as_bytes());
            let _ = stream.write_all(b"\n");
        })
    })
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn join_writer(handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        let _ = handle.join();
    }
}

/// Force-kill the whole process tree rooted at `child`.
#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // The child leads its own group; one signal reaches the tree.
    if killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL).is_err() {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.kill();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str, stdin: &str, timeout: Option<Duration>) -> RunRequest {
        RunRequest {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), script.to_string()],
            cwd: std::env::temp_dir(),
            stdin: stdin.to_string(),
            timeout,
        }
    }

    #[test]
    fn test_success_captures_stdout() {
        let outcome = run(&sh("printf hello", "", Some(Duration::from_secs(5))));
        assert_eq!(outcome.kind, ExitKind::Success);
        assert_eq!(outcome.stdout, "hello");
    }

    #[test]
    fn test_stdin_line_reaches_child() {
        let outcome = run(&sh(
            "read x && printf 'got %s' \"$x\"",
            "42",
            Some(Duration::from_secs(5)),
        ));
        assert_eq!(outcome.kind, ExitKind::Success);
        assert_eq!(outcome.stdout, "got 42");
    }

    #[test]
    fn test_child_ignoring_stdin_still_succeeds() {
        let outcome = run(&sh("printf ok", "unread input", Some(Duration::from_secs(5))));
        assert_eq!(outcome.kind, ExitKind::Success);
        assert_eq!(outcome.stdout, "ok");
    }

    #[test]
    fn test_nonzero_exit_appends_stderr() {
        let outcome = run(&sh(
            "printf out; printf err 1>&2; exit 3",
            "",
            Some(Duration::from_secs(5)),
        ));
        assert_eq!(outcome.kind, ExitKind::RuntimeError);
        assert!(outcome.stdout.contains("out"));
        assert!(outcome.stdout.contains("err"));
    }

    #[test]
    fn test_timeout_kills_and_keeps_partial_stdout() {
        let started = Instant::now();
        let outcome = run(&sh(
            "printf early; sleep 30",
            "",
            Some(Duration::from_millis(200)),
        ));
        assert_eq!(outcome.kind, ExitKind::TimedOut);
        assert_eq!(outcome.stdout, "early");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_timeout_kills_grandchildren() {
        // `sleep` runs as a grandchild holding the stdout pipe; the group
        // kill must take it down or the reader join would block for 30s.
        let started = Instant::now();
        let outcome = run(&sh("sleep 30 & wait", "", Some(Duration::from_millis(200))));
        assert_eq!(outcome.kind, ExitKind::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_timeout_enforced_while_stdin_backs_up() {
        // Stdin larger than a pipe buffer, against a child that never
        // reads it: the write backs up, and the limit must still apply.
        let big = "x".repeat(256 * 1024);
        let started = Instant::now();
        let outcome = run(&sh("sleep 30", &big, Some(Duration::from_millis(200))));
        assert_eq!(outcome.kind, ExitKind::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_no_timeout_waits_for_exit() {
        let outcome = run(&sh("sleep 0.1; printf done", "", None));
        assert_eq!(outcome.kind, ExitKind::Success);
        assert_eq!(outcome.stdout, "done");
    }

    #[test]
    fn test_missing_executable_reports_not_built() {
        let request = RunRequest {
            program: PathBuf::from("/no/such/program"),
            args: Vec::new(),
            cwd: std::env::temp_dir(),
            stdin: String::new(),
            timeout: Some(Duration::from_secs(1)),
        };
        let outcome = run(&request);
        assert_eq!(outcome.kind, ExitKind::RuntimeError);
        assert!(outcome.stdout.contains("may not be built yet"));
    }

    #[test]
    fn test_exit_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&ExitKind::TimedOut).unwrap(),
            "\"timed_out\""
        );
        assert_eq!(
            serde_json::to_string(&ExitKind::RuntimeError).unwrap(),
            "\"runtime_error\""
        );
    }
}
