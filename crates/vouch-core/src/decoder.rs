//! Decode loop: generate, verify, repair, within a fixed budget
//!
//! # State machine
//!
//! ```text
//! Generating → Validating → Accepted
//!     ↑            ↓
//!     │        Repairing → Validating → Accepted
//!     │            ↓
//!     └──── next round          (round == max_repairs) → Exhausted
//! ```
//!
//! One counter bounds the loop: rounds run from `0` to `max_repairs`
//! inclusive, each with one generation and, except on the last round, at
//! most one repair. A failed generation consumes its round. Exhaustion is
//! a normal return (`valid == false`); only configuration errors, a failed
//! generation on the last round and an elapsed deadline are errors.

use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use tracing::Instrument;

use crate::generator::{GenerationError, GenerationRequest, Generator};
use crate::hasher::is_stale;
use crate::repair::Repairer;
use crate::schema::SchemaLoader;
use crate::verifier::CompiledContract;
use crate::{Contract, Error, Result, ValidationVerdict, Violation};

/// Default repair budget
pub const DEFAULT_MAX_REPAIRS: u32 = 2;

/// Per-decode knobs
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecodeOptions {
    /// Upper bound on repairs and on regeneration rounds
    pub max_repairs: u32,
    pub temperature: Option<f64>,
    pub model: Option<String>,
    /// Per generator call; an elapsed call is a retryable failure
    pub generation_timeout_ms: Option<u64>,
    /// Whole loop; an elapsed deadline aborts the decode
    pub deadline_ms: Option<u64>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            max_repairs: DEFAULT_MAX_REPAIRS,
            temperature: None,
            model: None,
            generation_timeout_ms: None,
            deadline_ms: None,
        }
    }
}

impl DecodeOptions {
    pub fn with_max_repairs(mut self, max_repairs: u32) -> Self {
        self.max_repairs = max_repairs;
        self
    }

    pub fn generation_timeout(&self) -> Option<Duration> {
        self.generation_timeout_ms.map(Duration::from_millis)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

/// Loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Generating,
    Validating,
    Repairing,
    Accepted,
    Exhausted,
}

/// One step of the loop: a generation or a repair
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RoundRecord {
    pub round: u32,
    /// `Generating` or `Repairing`
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<ValidationVerdict>,
    /// Generation failure, if this step failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal artifact of one decode
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DecodeResult {
    pub output: Value,
    pub valid: bool,
    pub repairs_attempted: u32,
    /// Verdict for `output`
    pub verification: ValidationVerdict,
    pub spec_hash: String,
    pub latency_ms: u64,
    /// Generator calls made, including failed ones
    pub generations: u32,
    /// Provenance, in order
    pub rounds: Vec<RoundRecord>,
}

impl DecodeResult {
    /// Terminal state of the loop
    pub fn phase(&self) -> Phase {
        if self.valid {
            Phase::Accepted
        } else {
            Phase::Exhausted
        }
    }
}

/// Runs decode loops against one generator
pub struct Decoder<G> {
    generator: G,
    loader: Box<dyn SchemaLoader>,
    repairer: Repairer,
}

impl<G> std::fmt::Debug for Decoder<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("repairer", &self.repairer)
            .finish_non_exhaustive()
    }
}

impl<G: Generator> Decoder<G> {
    /// Decoder with the default repair catalog
    pub fn new(generator: G, loader: impl SchemaLoader + 'static) -> Self {
        Decoder {
            generator,
            loader: Box::new(loader),
            repairer: Repairer::default(),
        }
    }

    pub fn with_repairer(mut self, repairer: Repairer) -> Self {
        self.repairer = repairer;
        self
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Compile the contract and run one decode loop.
    ///
    /// # Errors
    /// Configuration errors (contract, schema, invariant syntax) before the
    /// first generation; `GenerationError` if the last round's generation
    /// fails; `DeadlineExceeded` if the deadline elapses first.
    pub async fn decode(
        &self,
        prompt: &str,
        contract: &Contract,
        options: &DecodeOptions,
    ) -> Result<DecodeResult> {
        let compiled = CompiledContract::compile(contract, self.loader.as_ref())?;
        self.decode_compiled(prompt, &compiled, options).await
    }

    /// Run one decode loop against an already compiled contract.
    ///
    /// # Errors
    /// Same as [`Decoder::decode`], minus configuration errors.
    pub async fn decode_compiled(
        &self,
        prompt: &str,
        compiled: &CompiledContract,
        options: &DecodeOptions,
    ) -> Result<DecodeResult> {
        if is_stale(&compiled.contract) {
            tracing::warn!(
                contract = %compiled.contract.name,
                stored = compiled.contract.spec_hash.as_deref().unwrap_or_default(),
                computed = %compiled.spec_hash,
                "stored spec_hash is stale"
            );
        }
        let span = tracing::info_span!(
            "decode",
            contract = %compiled.contract.name,
            spec_hash = %compiled.spec_hash,
            max_repairs = options.max_repairs
        );
        let started = Instant::now();
        let run = self.run(prompt, compiled, options, started).instrument(span);
        match options.deadline() {
            Some(deadline) => tokio::time::timeout(deadline, run).await.map_err(|_| {
                tracing::warn!(contract = %compiled.contract.name, "decode deadline exceeded");
                Error::DeadlineExceeded {
                    deadline_ms: duration_ms(deadline),
                }
            })?,
            None => run.await,
        }
    }

    async fn run(
        &self,
        prompt: &str,
        compiled: &CompiledContract,
        options: &DecodeOptions,
        started: Instant,
    ) -> Result<DecodeResult> {
        let max = options.max_repairs;
        let mut round: u32 = 0;
        let mut repairs: u32 = 0;
        let mut generations: u32 = 0;
        let mut rounds = Vec::new();
        let mut context: Vec<Violation> = Vec::new();

        loop {
            // Generating
            let request = GenerationRequest {
                prompt,
                round,
                repair_round: round > 0,
                temperature: options.temperature,
                model: options.model.as_deref(),
                violations: &context,
            };
            generations += 1;
            let candidate = match self.generate_once(&request, options.generation_timeout()).await {
                Ok(candidate) => candidate,
                Err(err) => {
                    tracing::warn!(round, error = %err, "generation failed");
                    rounds.push(RoundRecord {
                        round,
                        phase: Phase::Generating,
                        candidate: None,
                        verdict: None,
                        error: Some(err.to_string()),
                    });
                    if round < max {
                        round += 1;
                        continue;
                    }
                    return Err(Error::GenerationError {
                        rounds: round + 1,
                        message: err.to_string(),
                    });
                }
            };

            // Validating
            let verdict = compiled.verify(&candidate);
            tracing::debug!(
                round,
                schema_pass = verdict.schema_pass,
                invariants_pass = verdict.invariants_pass,
                violations = verdict.violations.len(),
                "validated candidate"
            );
            rounds.push(RoundRecord {
                round,
                phase: Phase::Generating,
                candidate: Some(candidate.clone()),
                verdict: Some(verdict.clone()),
                error: None,
            });
            if verdict.passed() || round >= max {
                let outcome = Outcome {
                    output: candidate,
                    verdict,
                    repairs,
                    generations,
                };
                return Ok(outcome.finish(compiled, rounds, started));
            }

            // Repairing
            repairs += 1;
            let repaired = self
                .repairer
                .repair(&candidate, &verdict.violations, &compiled.schema);
            let (candidate, verdict) = if repaired == candidate {
                tracing::debug!(round, "no applicable repair");
                (candidate, verdict)
            } else {
                let verdict = compiled.verify(&repaired);
                (repaired, verdict)
            };
            rounds.push(RoundRecord {
                round,
                phase: Phase::Repairing,
                candidate: Some(candidate.clone()),
                verdict: Some(verdict.clone()),
                error: None,
            });
            if verdict.passed() {
                let outcome = Outcome {
                    output: candidate,
                    verdict,
                    repairs,
                    generations,
                };
                return Ok(outcome.finish(compiled, rounds, started));
            }
            context = verdict.violations;
            round += 1;
        }
    }

    async fn generate_once(
        &self,
        request: &GenerationRequest<'_>,
        timeout: Option<Duration>,
    ) -> std::result::Result<Value, GenerationError> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.generator.generate(request))
                .await
                .map_err(|_| GenerationError::Timeout(duration_ms(limit)))?,
            None => self.generator.generate(request).await,
        }
    }
}

struct Outcome {
    output: Value,
    verdict: ValidationVerdict,
    repairs: u32,
    generations: u32,
}

impl Outcome {
    fn finish(self, compiled: &CompiledContract, rounds: Vec<RoundRecord>, started: Instant) -> DecodeResult {
        let valid = self.verdict.passed();
        let result = DecodeResult {
            output: self.output,
            valid,
            repairs_attempted: self.repairs,
            verification: self.verdict,
            spec_hash: compiled.spec_hash.clone(),
            latency_ms: duration_ms(started.elapsed()),
            generations: self.generations,
            rounds,
        };
        tracing::info!(
            phase = ?result.phase(),
            repairs = result.repairs_attempted,
            generations = result.generations,
            latency_ms = result.latency_ms,
            "decode finished"
        );
        result
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// One entry of a [`decode_many`] batch
#[derive(Debug, Clone)]
pub struct DecodeRequest {
    pub prompt: String,
    pub contract: Contract,
    pub options: DecodeOptions,
}

/// Run independent decodes concurrently, at most `concurrency` at a time.
///
/// Results come back in request order.
pub async fn decode_many<G: Generator>(
    decoder: &Decoder<G>,
    requests: &[DecodeRequest],
    concurrency: usize,
) -> Vec<Result<DecodeResult>> {
    stream::iter(requests)
        .map(|req| decoder.decode(&req.prompt, &req.contract, &req.options))
        .buffered(concurrency.max(1))
        .collect()
        .await
}
