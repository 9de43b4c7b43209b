use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::SecurityError;

/// Hard deadline for allowlisted commands.
pub const EXEC_TIMEOUT: Duration = Duration::from_secs(15);
/// Per-stream capture cap (stdout and stderr each).
pub const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// Rejection produced by an argument-shape validator.
enum ArgError {
    Shape(String),
    Escape(String),
}

type ArgValidator = fn(&Path, &[String]) -> Result<(), ArgError>;

/// One entry of the compiled-in command allowlist.
#[derive(Debug)]
pub struct AllowedCommand {
    pub name: &'static str,
    pub summary: &'static str,
    validate: ArgValidator,
}

pub static ALLOWED_COMMANDS: &[AllowedCommand] = &[
    AllowedCommand {
        name: "ls",
        summary: "list directory contents",
        validate: path_args,
    },
    AllowedCommand {
        name: "pwd",
        summary: "print working directory",
        validate: no_args,
    },
    AllowedCommand {
        name: "whoami",
        summary: "print current user",
        validate: no_args,
    },
    AllowedCommand {
        name: "date",
        summary: "print date and time",
        validate: date_args,
    },
    AllowedCommand {
        name: "uname",
        summary: "print system information",
        validate: uname_args,
    },
    AllowedCommand {
        name: "echo",
        summary: "print arguments",
        validate: text_args,
    },
    AllowedCommand {
        name: "cat",
        summary: "print file contents",
        validate: path_args,
    },
    AllowedCommand {
        name: "head",
        summary: "print first lines of a file",
        validate: path_args,
    },
    AllowedCommand {
        name: "tail",
        summary: "print last lines of a file",
        validate: path_args,
    },
    AllowedCommand {
        name: "wc",
        summary: "count lines, words and bytes",
        validate: path_args,
    },
    AllowedCommand {
        name: "git",
        summary: "read-only git: status, log, diff, branch, show, rev-parse",
        validate: git_args,
    },
];

const SHELL_OPERATORS: &[&str] = &["&&", "||", "$(", "|", ";", "&", "`", ">", "<", "\n", "\r"];
const WILDCARDS: &[char] = &['*', '?', '[', '{'];
const GIT_SUBCOMMANDS: &[(&str, ArgValidator)] = &[
    ("status", git_read_args),
    ("log", git_read_args),
    ("diff", git_read_args),
    ("show", git_read_args),
    ("rev-parse", git_read_args),
    ("branch", git_branch_args),
];
/// `git branch` is listing-only; `--contains`, `--merged` and `--no-merged` take
/// their commit as `--flag=<rev>`.
const GIT_BRANCH_FLAGS: &[&str] = &[
    "--list",
    "-l",
    "-a",
    "--all",
    "-r",
    "--remotes",
    "-v",
    "-vv",
    "--verbose",
    "--show-current",
    "--contains",
    "--merged",
    "--no-merged",
];
const GIT_DENIED_FLAGS: &[&str] = &[
    "--output",
    "-o",
    "-c",
    "--exec",
    "--config",
    "--upload-pack",
    "--ext-diff",
    "--textconv",
    "--git-dir",
    "--work-tree",
];

pub fn lookup(command: &str) -> Option<&'static AllowedCommand> {
    ALLOWED_COMMANDS.iter().find(|c| c.name == command)
}

fn no_args(_cwd: &Path, args: &[String]) -> Result<(), ArgError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(ArgError::Shape("takes no arguments".into()))
    }
}

fn text_args(_cwd: &Path, args: &[String]) -> Result<(), ArgError> {
    if args.len() > 64 {
        return Err(ArgError::Shape("too many arguments".into()));
    }
    Ok(())
}

fn flags_from(args: &[String], allowed: &[&str]) -> Result<(), ArgError> {
    match args.iter().find(|a| !allowed.contains(&a.as_str())) {
        Some(bad) => Err(ArgError::Shape(format!("unsupported argument {bad:?}"))),
        None => Ok(()),
    }
}

fn date_args(_cwd: &Path, args: &[String]) -> Result<(), ArgError> {
    flags_from(args, &["-u", "-R", "-I", "--utc", "--iso-8601", "--rfc-3339=seconds"])
}

fn uname_args(_cwd: &Path, args: &[String]) -> Result<(), ArgError> {
    flags_from(args, &["-a", "-s", "-n", "-r", "-v", "-m", "-o"])
}

/// Flags pass through; every other argument (and any `--flag=value` value) is a path
/// that must stay inside `cwd`.
fn path_args(cwd: &Path, args: &[String]) -> Result<(), ArgError> {
    for arg in args {
        if let Some(flag) = arg.strip_prefix('-') {
            if let Some((_, value)) = flag.split_once('=') {
                resolve_within(cwd, value)?;
            }
            continue;
        }
        resolve_within(cwd, arg)?;
    }
    Ok(())
}

fn git_args(cwd: &Path, args: &[String]) -> Result<(), ArgError> {
    let Some(sub) = args.first() else {
        return Err(ArgError::Shape("missing subcommand".into()));
    };
    let Some((_, validate)) = GIT_SUBCOMMANDS.iter().find(|(name, _)| *name == sub.as_str()) else {
        let names: Vec<&str> = GIT_SUBCOMMANDS.iter().map(|(name, _)| *name).collect();
        return Err(ArgError::Shape(format!(
            "subcommand {sub:?} not allowed (allowed: {})",
            names.join(", ")
        )));
    };
    validate(cwd, &args[1..])
}

fn git_read_args(cwd: &Path, args: &[String]) -> Result<(), ArgError> {
    for arg in args {
        let flag_name = arg.split('=').next().unwrap_or(arg.as_str());
        if GIT_DENIED_FLAGS.contains(&flag_name) {
            return Err(ArgError::Shape(format!("flag {arg:?} not allowed")));
        }
    }
    path_args(cwd, args)
}

fn git_branch_args(_cwd: &Path, args: &[String]) -> Result<(), ArgError> {
    for arg in args {
        if !arg.starts_with('-') {
            return Err(ArgError::Shape(format!(
                "branch is listing-only, {arg:?} not allowed"
            )));
        }
        let flag_name = arg.split('=').next().unwrap_or(arg.as_str());
        if !GIT_BRANCH_FLAGS.contains(&flag_name) {
            return Err(ArgError::Shape(format!("flag {arg:?} not allowed for branch")));
        }
    }
    Ok(())
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the longest existing ancestor of `path` and re-append the rest,
/// so symlinks are followed even when the final component does not exist yet.
fn canonicalize_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut rest = Vec::new();
    loop {
        if let Ok(mut resolved) = std::fs::canonicalize(existing) {
            resolved.extend(rest.iter().rev());
            return resolved;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

fn resolve_within(cwd: &Path, arg: &str) -> Result<PathBuf, ArgError> {
    let candidate = Path::new(arg);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        cwd.join(candidate)
    };
    let resolved = canonicalize_existing_prefix(&normalize(&joined));
    if resolved.starts_with(cwd) {
        Ok(resolved)
    } else {
        Err(ArgError::Escape(arg.to_string()))
    }
}

/// Captured result of an allowlisted command.
#[derive(Clone, Debug)]
pub struct ExecResult {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub truncated: bool,
    pub duration: Duration,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr, with truncation and exit-code markers.
    pub fn combined_output(&self) -> String {
        let mut output = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&self.stderr);
        }
        if self.truncated {
            output.push_str("\n[truncated]");
        }
        match self.exit_code {
            Some(0) => {}
            Some(code) => output.push_str(&format!("\n[exit code: {code}]")),
            None => output.push_str("\n[terminated by signal]"),
        }
        output
    }
}

/// Runs allowlisted commands directly (argument vector, no shell) inside one directory.
pub struct SafeExecutor {
    cwd: PathBuf,
    timeout: Duration,
    max_capture: usize,
}

impl SafeExecutor {
    /// Executor rooted at the process working directory.
    pub fn new() -> std::io::Result<Self> {
        Self::with_cwd(std::env::current_dir()?)
    }

    pub fn with_cwd(cwd: impl Into<PathBuf>) -> std::io::Result<Self> {
        let cwd = std::fs::canonicalize(cwd.into())?;
        Ok(Self {
            cwd,
            timeout: EXEC_TIMEOUT,
            max_capture: MAX_CAPTURE_BYTES,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_capture(mut self, bytes: usize) -> Self {
        self.max_capture = bytes;
        self
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Validate `command` and `args` without running anything.
    pub fn check(
        &self,
        command: &str,
        args: &[String],
    ) -> Result<&'static AllowedCommand, SecurityError> {
        for token in std::iter::once(command).chain(args.iter().map(String::as_str)) {
            if let Some(op) = SHELL_OPERATORS.iter().find(|op| token.contains(**op)) {
                return Err(SecurityError::ShellOperator(format!("{op:?} in {token:?}")));
            }
            if token.contains(WILDCARDS) {
                return Err(SecurityError::Wildcard(token.to_string()));
            }
            if token.contains('\0') {
                return Err(SecurityError::InvalidArgs {
                    command: command.to_string(),
                    reason: "NUL byte in argument".into(),
                });
            }
        }
        let allowed =
            lookup(command).ok_or_else(|| SecurityError::CommandNotAllowed(command.to_string()))?;
        (allowed.validate)(&self.cwd, args).map_err(|e| match e {
            ArgError::Shape(reason) => SecurityError::InvalidArgs {
                command: command.to_string(),
                reason,
            },
            ArgError::Escape(arg) => SecurityError::PathEscape(arg),
        })?;
        Ok(allowed)
    }

    /// Validate and execute. The child is killed if the deadline passes.
    pub async fn run(&self, command: &str, args: &[String]) -> Result<ExecResult, SecurityError> {
        let allowed = self.check(command, args)?;
        let shown = std::iter::once(allowed.name)
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(command = %shown, "safe_exec");

        let mut child = tokio::process::Command::new(allowed.name)
            .args(args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SecurityError::Spawn {
                command: allowed.name.to_string(),
                reason: e.to_string(),
            })?;

        let start = Instant::now();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let cap = self.max_capture;

        let collected = tokio::time::timeout(self.timeout, async {
            let (out, err, status) = tokio::join!(
                read_capped(stdout, cap),
                read_capped(stderr, cap),
                child.wait()
            );
            (out, err, status)
        })
        .await;

        let (out, err, status) = match collected {
            Ok(parts) => parts,
            Err(_) => {
                let _ = child.start_kill();
                tracing::warn!(command = %shown, "safe_exec timed out");
                return Err(SecurityError::Timeout(self.timeout.as_secs()));
            }
        };

        let status = status.map_err(|e| SecurityError::Spawn {
            command: allowed.name.to_string(),
            reason: e.to_string(),
        })?;
        let (stdout, out_truncated) = out;
        let (stderr, err_truncated) = err;

        Ok(ExecResult {
            command: shown,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: status.code(),
            truncated: out_truncated || err_truncated,
            duration: start.elapsed(),
        })
    }
}

/// Drain `reader` to EOF, keeping at most `cap` bytes. Read errors end the stream.
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, cap: usize) -> (Vec<u8>, bool) {
    let mut kept = Vec::new();
    let mut truncated = false;
    let Some(mut reader) = reader else {
        return (kept, truncated);
    };
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let room = cap.saturating_sub(kept.len());
        if n > room {
            truncated = true;
        }
        kept.extend_from_slice(&buf[..n.min(room)]);
    }
    (kept, truncated)
}

/// Free-function form of [`SafeExecutor::run`] rooted at the current directory.
pub async fn safe_exec(command: &str, args: &[String]) -> Result<ExecResult, SecurityError> {
    let executor = SafeExecutor::new().map_err(|e| SecurityError::Spawn {
        command: command.to_string(),
        reason: format!("cannot resolve working directory: {e}"),
    })?;
    executor.run(command, args).await
}
