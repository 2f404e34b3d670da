//! Screen session directory.
//!
//! Lists, creates and detaches GNU screen sessions by driving the `screen`
//! command line, and builds the PTY request used to attach to one.

use std::io;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};

use futures_util::future::BoxFuture;
use protocol::ScreenSession;
use regex::Regex;
use thiserror::Error;
use tokio::process::Command;

use super::pty::{SpawnRequest, TerminalSize};

/// Matches listing lines such as `\t12345.work\t(Detached)`.
static SESSION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\.(\S+)\s+\(([^)]+)\)").expect("session line pattern must compile")
});

/// Errors returned by directory operations.
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// The caller supplied an empty session name.
    #[error("Session name is required")]
    NameRequired,

    /// The screen command ran but reported failure.
    #[error("`{command}` failed with {}: {stderr}", describe_status(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The screen command could not be started.
    #[error("failed to run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
}

fn describe_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "signal".to_string(),
    }
}

impl DirectoryError {
    /// Whether the error was caused by invalid caller input.
    pub fn is_validation(&self) -> bool {
        matches!(self, DirectoryError::NameRequired)
    }
}

/// Captured result of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external commands.
pub trait CommandRunner: Send + Sync {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [String],
    ) -> BoxFuture<'a, io::Result<CommandOutput>>;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [String],
    ) -> BoxFuture<'a, io::Result<CommandOutput>> {
        Box::pin(async move {
            let output = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await?;

            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}

/// Result of listing screen sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionListing {
    /// Screen reported at least one session.
    Sessions(Vec<ScreenSession>),
    /// Screen reported that no sessions exist.
    Empty,
}

impl SessionListing {
    pub fn into_sessions(self) -> Vec<ScreenSession> {
        match self {
            SessionListing::Sessions(sessions) => sessions,
            SessionListing::Empty => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            SessionListing::Sessions(sessions) => sessions.is_empty(),
            SessionListing::Empty => true,
        }
    }
}

/// Parses `screen -ls` output. Lines that do not describe a session are skipped.
pub fn parse_session_list(output: &str) -> Vec<ScreenSession> {
    output
        .lines()
        .filter_map(|line| SESSION_LINE.captures(line))
        .map(|caps| ScreenSession {
            pid: caps[1].to_string(),
            name: caps[2].to_string(),
            status: caps[3].to_string(),
        })
        .collect()
}

/// Front end to the `screen` command line.
#[derive(Clone)]
pub struct SessionDirectory {
    runner: Arc<dyn CommandRunner>,
    binary: String,
}

impl std::fmt::Debug for SessionDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDirectory")
            .field("binary", &self.binary)
            .finish_non_exhaustive()
    }
}

impl SessionDirectory {
    /// Creates a directory that runs the given screen binary directly.
    pub fn new(binary: impl Into<String>) -> Self {
        Self::with_runner(Arc::new(SystemCommandRunner), binary)
    }

    /// Creates a directory with a custom command runner.
    pub fn with_runner(runner: Arc<dyn CommandRunner>, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
        }
    }

    /// Lists the screen sessions visible to this user.
    ///
    /// Screen exits with status 1 both when there are no sessions and, on
    /// some builds, when sessions are listed; the output is parsed in either
    /// case and an empty result maps to [`SessionListing::Empty`].
    pub async fn list(&self) -> Result<SessionListing, DirectoryError> {
        let args = vec!["-ls".to_string()];
        let output = self.execute(&args).await?;

        match output.code {
            Some(0) => Ok(SessionListing::Sessions(parse_session_list(&output.stdout))),
            Some(1) => {
                let sessions = parse_session_list(&output.stdout);
                if sessions.is_empty() {
                    Ok(SessionListing::Empty)
                } else {
                    Ok(SessionListing::Sessions(sessions))
                }
            }
            code => Err(self.command_failed(&args, code, output.stderr)),
        }
    }

    /// Creates a new detached session with the given name.
    pub async fn create(&self, name: &str) -> Result<(), DirectoryError> {
        if name.trim().is_empty() {
            return Err(DirectoryError::NameRequired);
        }

        let args = vec!["-dmS".to_string(), name.to_string()];
        let output = self.execute(&args).await?;
        if !output.success() {
            return Err(self.command_failed(&args, output.code, output.stderr));
        }

        tracing::info!(session = %name, "Created screen session");
        Ok(())
    }

    /// Asks screen to detach the displays attached to the named session.
    pub async fn detach(&self, name: &str) -> Result<(), DirectoryError> {
        let args = vec![
            "-S".to_string(),
            name.to_string(),
            "-X".to_string(),
            "detach".to_string(),
        ];
        let output = self.execute(&args).await?;
        if !output.success() {
            return Err(self.command_failed(&args, output.code, output.stderr));
        }

        tracing::debug!(session = %name, "Detached screen session");
        Ok(())
    }

    /// Builds the PTY request that attaches to the named session.
    ///
    /// Uses multi-display mode (`-x`) so attaching never steals the session
    /// from another client.
    pub fn attach_request(&self, name: &str, size: TerminalSize, term: &str) -> SpawnRequest {
        SpawnRequest {
            program: self.binary.clone(),
            args: vec!["-x".to_string(), name.to_string()],
            size,
            env: vec![("TERM".to_string(), term.to_string())],
        }
    }

    async fn execute(&self, args: &[String]) -> Result<CommandOutput, DirectoryError> {
        self.runner
            .run(&self.binary, args)
            .await
            .map_err(|source| DirectoryError::Io {
                command: self.describe(args),
                source,
            })
    }

    fn command_failed(&self, args: &[String], code: Option<i32>, stderr: String) -> DirectoryError {
        DirectoryError::CommandFailed {
            command: self.describe(args),
            code,
            stderr: stderr.trim().to_string(),
        }
    }

    fn describe(&self, args: &[String]) -> String {
        std::iter::once(self.binary.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
