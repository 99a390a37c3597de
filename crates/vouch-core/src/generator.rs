//! Generators: the external collaborator that produces candidates
//!
//! The decode loop only needs [`Generator::generate`]. Two implementations
//! ship with the core:
//!
//! - [`ReplayGenerator`] plays back a fixed script, for tests and offline
//!   reproduction of recorded sessions.
//! - [`CommandGenerator`] runs an external program per round, writing the
//!   prompt to its stdin and reading the candidate from its stdout.

use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::Violation;

/// Why a generation call failed; always retryable by the decode loop
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    /// The generator reported a failure
    #[error("generator failed: {0}")]
    Failed(String),

    /// The call did not finish within the per-call timeout
    #[error("generation timed out after {0}ms")]
    Timeout(u64),

    /// The generator could not be started or talked to
    #[error("generator I/O error: {0}")]
    Io(String),
}

/// Everything a generator is told about one round
#[derive(Debug, Clone, serde::Serialize)]
pub struct GenerationRequest<'a> {
    pub prompt: &'a str,
    /// Zero-based round index
    pub round: u32,
    /// `true` for every round after the first
    pub repair_round: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    /// Violations of the previous round's last candidate
    pub violations: &'a [Violation],
}

/// Produces one candidate per call
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<Value, GenerationError>;
}

#[async_trait]
impl<G: Generator + ?Sized> Generator for std::sync::Arc<G> {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<Value, GenerationError> {
        (**self).generate(request).await
    }
}

// ── Replay ────────────────────────────────────────────────

/// One scripted generator outcome
///
/// On disk: `{"output": ...}`, `{"error": "..."}` or
/// `{"delayed": {"delay_ms": 50, "output": ...}}`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStep {
    Output(Value),
    Error(String),
    Delayed { delay_ms: u64, output: Value },
}

/// What a [`ReplayGenerator`] was asked, for assertions
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayCall {
    pub round: u32,
    pub repair_round: bool,
    pub violations: usize,
}

/// Plays back a script; the last step repeats once the script runs out
#[derive(Debug, Default)]
pub struct ReplayGenerator {
    steps: Vec<ReplayStep>,
    calls: AtomicUsize,
    log: Mutex<Vec<ReplayCall>>,
}

impl ReplayGenerator {
    pub fn new(steps: Vec<ReplayStep>) -> Self {
        ReplayGenerator {
            steps,
            ..Default::default()
        }
    }

    /// Script that returns the given outputs in order
    pub fn outputs(outputs: impl IntoIterator<Item = Value>) -> Self {
        Self::new(outputs.into_iter().map(ReplayStep::Output).collect())
    }

    /// Parse a replay file: a JSON array of steps.
    ///
    /// # Errors
    /// Returns `ContractError` if the text is not a valid script.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        let steps: Vec<ReplayStep> = serde_json::from_str(text)
            .map_err(|e| crate::Error::ContractError(format!("invalid replay script: {}", e)))?;
        Ok(Self::new(steps))
    }

    /// Number of `generate` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ReplayCall> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Generator for ReplayGenerator {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<Value, GenerationError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.log.lock() {
            log.push(ReplayCall {
                round: request.round,
                repair_round: request.repair_round,
                violations: request.violations.len(),
            });
        }
        let step = self
            .steps
            .get(index)
            .or_else(|| self.steps.last())
            .ok_or_else(|| GenerationError::Failed("replay script is empty".into()))?;
        match step {
            ReplayStep::Output(value) => Ok(value.clone()),
            ReplayStep::Error(message) => Err(GenerationError::Failed(message.clone())),
            ReplayStep::Delayed { delay_ms, output } => {
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                Ok(output.clone())
            }
        }
    }
}

// ── External command ──────────────────────────────────────

/// Runs a program once per round.
///
/// The prompt goes to stdin. The round context is passed in the
/// environment: `VOUCH_ROUND`, `VOUCH_REPAIR_ROUND` (`0`/`1`),
/// `VOUCH_MODEL`, `VOUCH_TEMPERATURE` and `VOUCH_VIOLATIONS` (a JSON array).
/// Stdout is parsed as JSON; if that fails the trimmed text is used as a
/// string candidate. A non-zero exit status is a generation failure.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    pub fn new(program: impl Into<String>) -> Self {
        CommandGenerator {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl Generator for CommandGenerator {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<Value, GenerationError> {
        let violations = serde_json::to_string(request.violations)
            .map_err(|e| GenerationError::Io(e.to_string()))?;
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .env("VOUCH_ROUND", request.round.to_string())
            .env("VOUCH_REPAIR_ROUND", if request.repair_round { "1" } else { "0" })
            .env("VOUCH_MODEL", request.model.unwrap_or_default())
            .env(
                "VOUCH_TEMPERATURE",
                request.temperature.map(|t| t.to_string()).unwrap_or_default(),
            )
            .env("VOUCH_VIOLATIONS", violations)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd
            .spawn()
            .map_err(|e| GenerationError::Io(format!("failed to spawn '{}': {}", self.program, e)))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| GenerationError::Io("failed to access generator stdin".into()))?;
        let prompt = request.prompt.as_bytes();
        // Stdin is fed while stdout and stderr drain, and closed once written
        let feed = async move {
            // A generator that ignores its prompt may exit before reading it
            if let Err(e) = stdin.write_all(prompt).await {
                tracing::debug!(error = %e, "generator closed stdin early");
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| GenerationError::Io(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GenerationError::Failed(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        parse_candidate(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Read generator or user text as a candidate: JSON if it parses,
/// otherwise the trimmed text as a string.
pub fn candidate_from_text(text: &str) -> Value {
    let text = text.trim();
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn parse_candidate(stdout: &str) -> Result<Value, GenerationError> {
    if stdout.trim().is_empty() {
        return Err(GenerationError::Failed("generator produced no output".into()));
    }
    Ok(candidate_from_text(stdout))
}
