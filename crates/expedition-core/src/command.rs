//! Stage adapters backed by external programs.
//!
//! A [`CommandAdapter`] spawns its program once per call, writes the stage
//! input as JSON to stdin, closes it, and parses the program's stdout as the
//! stage output. A non-zero exit status is a stage failure carrying the last
//! lines of stderr. The child is killed if the call is dropped (e.g. on timeout).

use std::marker::PhantomData;
use std::process::Stdio;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::adapter::{StageAdapter, StageFailure};
use crate::domain::StageKind;

/// Lines of stderr kept in a failure.
const STDERR_TAIL_LINES: usize = 20;

/// Program and arguments for one stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Optional command overrides per stage, as found under `[stages]` in config.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StageCommands {
    pub extraction: Option<CommandSpec>,
    pub generation: Option<CommandSpec>,
    pub execution: Option<CommandSpec>,
    pub packaging: Option<CommandSpec>,
    pub learning_capture: Option<CommandSpec>,
}

/// Adapter that runs an external program for a stage.
pub struct CommandAdapter<I, O> {
    kind: StageKind,
    spec: CommandSpec,
    _io: PhantomData<fn(&I) -> O>,
}

impl<I, O> CommandAdapter<I, O> {
    pub fn new(kind: StageKind, spec: CommandSpec) -> Self {
        Self {
            kind,
            spec,
            _io: PhantomData,
        }
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }
}

impl<I, O> std::fmt::Debug for CommandAdapter<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandAdapter")
            .field("kind", &self.kind)
            .field("spec", &self.spec)
            .finish()
    }
}

#[async_trait]
impl<I, O> StageAdapter<I, O> for CommandAdapter<I, O>
where
    I: Serialize + Send + Sync + 'static,
    O: DeserializeOwned + Send + 'static,
{
    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn execute(&self, input: &I) -> Result<O, StageFailure> {
        let payload = serde_json::to_vec(input)
            .map_err(|e| StageFailure::new(format!("cannot encode stage input: {}", e)))?;

        debug!(stage = %self.kind, program = %self.spec.program, "Spawning stage command");
        let mut child = Command::new(&self.spec.program)
            .args(&self.spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                StageFailure::new(format!("cannot spawn '{}': {}", self.spec.program, e))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| StageFailure::new("child stdin unavailable"))?;
        let feed = async move {
            let written = stdin.write_all(&payload).await;
            drop(stdin);
            written
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| {
            StageFailure::new(format!("'{}' did not complete: {}", self.spec.program, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut errors = vec![format!("'{}' exited with {}", self.spec.program, output.status)];
            let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
            let skip = lines.len().saturating_sub(STDERR_TAIL_LINES);
            errors.extend(lines[skip..].iter().map(|l| l.to_string()));
            return Err(StageFailure::with_errors(errors));
        }
        // A program may exit successfully without reading its input.
        if let Err(e) = fed {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(StageFailure::new(format!("cannot write stage input: {}", e)));
            }
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            StageFailure::new(format!(
                "'{}' produced invalid {} output: {}",
                self.spec.program, self.kind, e
            ))
        })
    }
}
