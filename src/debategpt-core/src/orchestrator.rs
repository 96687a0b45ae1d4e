//! Batch prompting.
//!
//! Walks the debates in order, prompts the model once per debate or once per
//! voter, and appends results to the result file in batches. Debates already in
//! the file are skipped, so an interrupted run resumes where it stopped.

use std::time::Duration;

use tracing::{info, warn};

use crate::client::ChatModel;
use crate::config::BatchConfig;
use crate::debates::DebateRecord;
use crate::error::{DebateGptError, Result};
use crate::prompt::{ChatMessage, PromptAssembler};
use crate::results::{ResultRecord, ResultStore};
use crate::votes::VoteCategory;

/// Pacing and retry settings of a batch run.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub flush_every: usize,
    /// Pause after each debate.
    pub delay: Duration,
    /// Attempts per model call, the first one included.
    pub max_attempts: u32,
    /// Wait before the first retry; doubled for every further retry.
    pub base_backoff: Duration,
}

impl From<&BatchConfig> for BatchSettings {
    fn from(config: &BatchConfig) -> Self {
        Self {
            flush_every: config.flush_every.max(1),
            delay: Duration::from_millis(config.delay_ms),
            max_attempts: config.max_retries.max(1),
            base_backoff: Duration::from_secs(1),
        }
    }
}

/// Callback for batch events.
pub type BatchCallback = Box<dyn Fn(BatchEvent) + Send + Sync>;

/// Events emitted during a batch run.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    /// The run is starting.
    RunStart { pending: usize, already_done: usize },
    /// A debate is about to be prompted.
    DebateStart { debate_id: String, index: usize, total: usize },
    /// A debate produced no prompt.
    DebateSkipped { debate_id: String, reason: String },
    /// A model call failed and will be attempted again.
    Retry { debate_id: String, attempt: u32, error: String },
    /// A debate has been fully prompted.
    DebateDone { debate_id: String, results: usize },
    /// Results were written to the result file.
    Flushed { count: usize },
    /// The run has finished.
    RunEnd { results: usize },
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub debates_prompted: usize,
    pub debates_skipped: usize,
    pub already_done: usize,
    pub results: usize,
}

/// Drives one task over a list of debates.
pub struct BatchOrchestrator<'a> {
    assembler: PromptAssembler<'a>,
    model: &'a dyn ChatModel,
    store: ResultStore,
    settings: BatchSettings,
    /// Event callback.
    callback: Option<BatchCallback>,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(
        assembler: PromptAssembler<'a>,
        model: &'a dyn ChatModel,
        store: ResultStore,
        settings: BatchSettings,
    ) -> Self {
        Self {
            assembler,
            model,
            store,
            settings,
            callback: None,
        }
    }

    /// Set a callback for batch events.
    pub fn with_callback(mut self, callback: BatchCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Prompt every debate in `debates` that has no results yet.
    ///
    /// On a fatal error the results gathered so far are written before the
    /// error is returned.
    pub async fn run(&self, debates: &[DebateRecord]) -> Result<BatchSummary> {
        let completed = self.store.completed_debate_ids()?;
        let pending: Vec<&DebateRecord> = debates
            .iter()
            .filter(|d| !completed.contains(&d.debate_id))
            .collect();

        let mut summary = BatchSummary {
            already_done: debates.len() - pending.len(),
            ..BatchSummary::default()
        };
        info!(
            task = %self.assembler.task(),
            model = self.model.name(),
            pending = pending.len(),
            already_done = summary.already_done,
            "Starting batch"
        );
        self.emit_event(BatchEvent::RunStart {
            pending: pending.len(),
            already_done: summary.already_done,
        });

        let mut buffer: Vec<ResultRecord> = Vec::new();
        for (index, debate) in pending.iter().enumerate() {
            self.emit_event(BatchEvent::DebateStart {
                debate_id: debate.debate_id.clone(),
                index,
                total: pending.len(),
            });

            match self.debate_results(debate).await {
                Ok(records) if records.is_empty() => {
                    summary.debates_skipped += 1;
                    self.emit_event(BatchEvent::DebateSkipped {
                        debate_id: debate.debate_id.clone(),
                        reason: "no prompt could be built".to_string(),
                    });
                    continue;
                }
                Ok(records) => {
                    summary.debates_prompted += 1;
                    summary.results += records.len();
                    self.emit_event(BatchEvent::DebateDone {
                        debate_id: debate.debate_id.clone(),
                        results: records.len(),
                    });
                    buffer.extend(records);
                    if buffer.len() >= self.settings.flush_every {
                        self.flush(&mut buffer)?;
                    }
                }
                Err(DebateGptError::InvalidDate { value, .. }) => {
                    warn!(
                        debate_id = %debate.debate_id,
                        date = %value,
                        "Unparseable start date, skipping debate"
                    );
                    summary.debates_skipped += 1;
                    self.emit_event(BatchEvent::DebateSkipped {
                        debate_id: debate.debate_id.clone(),
                        reason: format!("unparseable start date '{}'", value),
                    });
                    continue;
                }
                Err(e) => {
                    warn!(debate_id = %debate.debate_id, error = %e, "Batch aborted");
                    if let Err(flush_error) = self.flush(&mut buffer) {
                        warn!(error = %flush_error, "Could not save completed results");
                    }
                    return Err(e);
                }
            }

            tokio::time::sleep(self.settings.delay).await;
        }

        self.flush(&mut buffer)?;
        self.emit_event(BatchEvent::RunEnd {
            results: summary.results,
        });
        info!(
            prompted = summary.debates_prompted,
            skipped = summary.debates_skipped,
            results = summary.results,
            "Batch finished"
        );
        Ok(summary)
    }

    /// Results of one debate. Empty when no prompt could be built for it.
    ///
    /// Results are only returned once every voter has been prompted.
    async fn debate_results(&self, debate: &DebateRecord) -> Result<Vec<ResultRecord>> {
        let Some(prepared) = self.assembler.prepare(debate)? else {
            return Ok(Vec::new());
        };
        let max_tokens = self.assembler.max_response_tokens();

        if !self.assembler.task().per_voter() {
            let Some(messages) = self.assembler.messages(&prepared, None)? else {
                return Ok(Vec::new());
            };
            let response = self
                .complete_with_retry(&messages, max_tokens, &debate.debate_id)
                .await?;
            return Ok(vec![ResultRecord {
                debate_id: debate.debate_id.clone(),
                voter_id: None,
                message: messages,
                gpt_response: response,
                agreed_before: None,
                agreed_after: None,
            }]);
        }

        let mut records = Vec::new();
        for vote in self.assembler.dataset().votes(&debate.debate_id) {
            let Some(messages) = self.assembler.messages(&prepared, Some(&vote.voter_id))? else {
                continue;
            };
            let response = self
                .complete_with_retry(&messages, max_tokens, &debate.debate_id)
                .await?;
            records.push(ResultRecord {
                debate_id: debate.debate_id.clone(),
                voter_id: Some(vote.voter_id.clone()),
                message: messages,
                gpt_response: response,
                agreed_before: Some(vote.outcome(VoteCategory::AgreedBefore)),
                agreed_after: Some(vote.outcome(VoteCategory::AgreedAfter)),
            });
        }
        Ok(records)
    }

    /// Call the model, retrying transient failures with exponential backoff.
    async fn complete_with_retry(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        debate_id: &str,
    ) -> Result<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.model.complete(messages, max_tokens).await {
                Ok(response) => return Ok(response),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.settings.max_attempts => {
                    return Err(DebateGptError::RetriesExhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => {
                    // Backoff: base, 2x base, 4x base, ...
                    let delay = self.settings.base_backoff * (1u32 << (attempt - 1).min(6));
                    warn!(
                        debate_id,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Model call failed, retrying"
                    );
                    self.emit_event(BatchEvent::Retry {
                        debate_id: debate_id.to_string(),
                        attempt,
                        error: e.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn flush(&self, buffer: &mut Vec<ResultRecord>) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        self.store.append(buffer)?;
        self.emit_event(BatchEvent::Flushed {
            count: buffer.len(),
        });
        buffer.clear();
        Ok(())
    }

    /// Emit an event if a callback is registered.
    fn emit_event(&self, event: BatchEvent) {
        if let Some(ref callback) = self.callback {
            callback(event);
        }
    }
}
