//! Scryer Prolog adapter.
//!
//! The program is written to a private temp file and consulted on the
//! command line. Goals then go to the toplevel over stdin, one per line,
//! wrapped so that every answer is printed with protocol markers:
//!
//! ```text
//! ?- once((catch((once(G) -> (write('@@SOLUTION'), nl, ...) ; ...), E, ...),
//!          write('@@END'), nl, ..., write(user_error, '@@END'), ...)).
//! ```
//!
//! `@@END` is written to both stdout and stderr, so both pipes are drained
//! up to a known point after every goal and nothing the engine printed can
//! be mistaken for the next answer.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;

use tierlogic_core::parser::{MARKER_END, MARKER_READY};
use tierlogic_core::{compile_diagnostic, Goal, RawResult};

use crate::backend::{SolverBackend, SolverConnection, SolverError};
use crate::config::SolverConfig;

const EXECUTABLE: &str = "scryer-prolog";

/// How long a candidate executable has to answer `--version`.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Variable that receives a caught exception. Unlikely to clash with goals.
const CAUGHT: &str = "TierlogicCaught__";

const READY_PROBE: &str = "write('@@READY'), nl, flush_output, \
     write(user_error, '@@READY'), nl(user_error), flush_output(user_error).\n";

/// Launches Scryer Prolog processes.
#[derive(Debug, Clone)]
pub struct ScryerBackend {
    executable: PathBuf,
    args: Vec<String>,
}

impl ScryerBackend {
    /// Use a known executable without probing it.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Find a working executable: the configured one, or the first
    /// well-known location that answers `--version`.
    pub async fn discover(config: &SolverConfig) -> Result<Self, SolverError> {
        let candidates = match &config.executable {
            Some(path) => vec![path.clone()],
            None => default_candidates(),
        };

        for candidate in &candidates {
            if probe(candidate).await {
                tracing::info!(executable = %candidate.display(), "Found Scryer Prolog");
                return Ok(Self::new(candidate.clone()).with_args(config.args.clone()));
            }
            tracing::debug!(executable = %candidate.display(), "Not a working Scryer Prolog");
        }

        let tried: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
        Err(SolverError::NotFound(format!(
            "tried {}; install with `cargo install scryer-prolog`",
            tried.join(", ")
        )))
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

fn default_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(EXECUTABLE)];
    if let Some(home) = std::env::var_os("HOME") {
        candidates.push(PathBuf::from(home).join(".cargo").join("bin").join(EXECUTABLE));
    }
    candidates.push(PathBuf::from("/usr/local/bin/scryer-prolog"));
    candidates.push(PathBuf::from("/usr/bin/scryer-prolog"));
    candidates
}

async fn probe(executable: &Path) -> bool {
    let mut cmd = Command::new(executable);
    cmd.arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    matches!(
        timeout(PROBE_TIMEOUT, cmd.status()).await,
        Ok(Ok(status)) if status.success()
    )
}

/// Toplevel query text for a goal.
pub(crate) fn wrap_goal(goal: &Goal) -> String {
    let bindings: String = goal
        .variables()
        .map(|v| format!(", write('@@BIND {v}='), writeq({v}), nl"))
        .collect();

    format!(
        "once((catch((once({goal}) -> (write('@@SOLUTION'), nl{bindings}) ; \
         (write('@@NO_SOLUTION'), nl)), {CAUGHT}, (write('@@ERROR '), writeq({CAUGHT}), nl)), \
         write('@@END'), nl, flush_output, \
         write(user_error, '@@END'), nl(user_error), flush_output(user_error))).\n",
        goal = goal.render(),
    )
}

#[async_trait]
impl SolverBackend for ScryerBackend {
    fn name(&self) -> &str {
        EXECUTABLE
    }

    async fn launch(&self, program: &str) -> Result<Box<dyn SolverConnection>, SolverError> {
        let mut file = tempfile::Builder::new()
            .prefix("tierlogic-")
            .suffix(".pl")
            .tempfile()?;
        file.write_all(program.as_bytes())?;
        file.flush()?;

        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args)
            .arg(file.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| SolverError::Launch(format!("{}: {}", self.executable.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SolverError::Launch("stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SolverError::Launch("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SolverError::Launch("stderr was not captured".to_string()))?;

        tracing::debug!(pid = ?child.id(), program = %file.path().display(), "Scryer Prolog started");

        let mut connection = ScryerConnection {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
            stderr: BufReader::new(stderr).lines(),
            _program: file,
        };
        connection.await_ready().await?;

        Ok(Box::new(connection))
    }
}

/// One running Scryer Prolog toplevel.
struct ScryerConnection {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Lines<BufReader<ChildStderr>>,
    /// Removed from disk when the connection is dropped
    _program: NamedTempFile,
}

impl ScryerConnection {
    async fn send(&mut self, text: &str) -> Result<(), SolverError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SolverError::Io("stdin already closed".to_string()))?;
        stdin.write_all(text.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Consume consult output up to the readiness marker on both pipes.
    async fn await_ready(&mut self) -> Result<(), SolverError> {
        self.send(READY_PROBE).await?;

        let mut output = Vec::new();
        let mut markers = Vec::new();
        read_until(&mut self.stdout, MARKER_READY, &mut markers, &mut output).await?;
        read_until(&mut self.stderr, MARKER_READY, &mut markers, &mut output).await?;

        match compile_diagnostic(output.as_slice()) {
            Some(diagnostic) => Err(SolverError::Compile {
                line: diagnostic.line,
                message: diagnostic.message,
            }),
            None => Ok(()),
        }
    }
}

/// Read lines until `terminator`. Marker lines go to `markers`, anything
/// else non-blank to `other`. Text printed ahead of a marker on the same
/// line (a toplevel prompt, say) is split off.
async fn read_until<R>(
    reader: &mut Lines<BufReader<R>>,
    terminator: &str,
    markers: &mut Vec<String>,
    other: &mut Vec<String>,
) -> Result<(), SolverError>
where
    R: AsyncRead + Unpin,
{
    loop {
        let Some(line) = reader.next_line().await? else {
            let detail = other
                .last()
                .cloned()
                .unwrap_or_else(|| "output closed".to_string());
            return Err(SolverError::Exited(detail));
        };

        match line.find("@@") {
            Some(start) => {
                let prefix = line[..start].trim();
                if !prefix.is_empty() {
                    other.push(prefix.to_string());
                }
                let marker = line[start..].trim_end().to_string();
                let done = marker == terminator;
                markers.push(marker);
                if done {
                    return Ok(());
                }
            }
            None if !line.trim().is_empty() => other.push(line),
            None => {}
        }
    }
}

#[async_trait]
impl SolverConnection for ScryerConnection {
    async fn submit(&mut self, goal: &Goal) -> Result<RawResult, SolverError> {
        self.send(&wrap_goal(goal)).await?;

        let mut raw = RawResult::default();
        read_until(&mut self.stdout, MARKER_END, &mut raw.lines, &mut raw.diagnostics).await?;

        // stderr carries only the mirrored end marker and engine warnings
        let mut mirrored = Vec::new();
        read_until(&mut self.stderr, MARKER_END, &mut mirrored, &mut raw.diagnostics).await?;

        Ok(raw)
    }

    async fn shutdown(&mut self, grace: Duration) {
        // EOF on stdin ends the toplevel
        drop(self.stdin.take());

        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(status = %status, "Scryer Prolog exited"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to wait for Scryer Prolog"),
            Err(_) => {
                tracing::warn!(grace = ?grace, "Scryer Prolog did not exit, killing");
                if let Err(e) = self.child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill Scryer Prolog");
                }
            }
        }
    }

    fn abort(&mut self) {
        drop(self.stdin.take());
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(error = %e, "Scryer Prolog already gone");
        }
    }
}
