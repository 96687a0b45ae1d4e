//! Prompt assembly for the three research questions.
//!
//! An assembler is built once per run. Construction works out the token
//! budget left for the debate transcript, so a model whose context cannot hold
//! the fixed task texts fails before any request is sent.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{Config, PropositionVoterTask};
use crate::dataset::Dataset;
use crate::debates::DebateRecord;
use crate::error::{DebateGptError, Result};
use crate::tokens::TokenCounter;
use crate::transcript::TranscriptBuilder;
use crate::users::{IssueStance, UserRecord, column_label};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn parse(role: &str) -> Result<Self> {
        match role {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(DebateGptError::InvalidRole(other.to_string())),
        }
    }
}

/// One message of a chat prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Message with a role given by name; unknown roles are rejected.
    pub fn new(role: &str, content: impl Into<String>) -> Result<Self> {
        Ok(Self {
            role: Role::parse(role)?,
            content: content.into(),
        })
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// The research question a prompt asks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// q1: which side argued better.
    WhoWon,
    /// q2: the voter's stance before the debate, from their profile alone.
    PropositionVoter { reasoning: bool, big_issues: bool },
    /// q3: the voter's stance after reading the debate.
    DebateDemographics,
}

impl Task {
    /// Whether one prompt is built per voter rather than per debate.
    pub fn per_voter(&self) -> bool {
        !matches!(self, Task::WhoWon)
    }

    pub fn needs_transcript(&self) -> bool {
        !matches!(self, Task::PropositionVoter { .. })
    }

    pub fn max_response_tokens(&self, config: &Config) -> u32 {
        match self {
            Task::WhoWon => config.tasks.who_won.max_response_tokens,
            Task::DebateDemographics => config.tasks.debate_demographics.max_response_tokens,
            Task::PropositionVoter { reasoning, .. } => {
                voter_task(config, *reasoning).max_response_tokens
            }
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::WhoWon => write!(f, "q1 (who won)"),
            Task::PropositionVoter { reasoning: false, .. } => write!(f, "q2 (proposition voter)"),
            Task::PropositionVoter { reasoning: true, .. } => {
                write!(f, "q2 (proposition voter, reasoning)")
            }
            Task::DebateDemographics => write!(f, "q3 (debate demographics)"),
        }
    }
}

fn voter_task(config: &Config, reasoning: bool) -> &PropositionVoterTask {
    if reasoning {
        &config.tasks.proposition_voter_reasoning
    } else {
        &config.tasks.proposition_voter_role
    }
}

/// First character upper-cased, the rest lower-cased.
pub fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Knowledge-cutoff disclaimer for a platform date (`MM/DD/YYYY`).
pub fn date_cutoff(start_date: &str) -> Result<String> {
    let cleaned = start_date.replace('\\', "");
    let date = NaiveDate::parse_from_str(cleaned.trim(), "%m/%d/%Y").map_err(|source| {
        DebateGptError::InvalidDate {
            value: start_date.to_string(),
            source,
        }
    })?;
    Ok(format!(
        "The date is {}. You have no information on any events that happened after this date. \
         You have no access to information released after this date.",
        date.format("%B %d, %Y")
    ))
}

/// `Label: value` lines for the user's known demographics.
pub fn user_info(user: &UserRecord, columns: &[String]) -> String {
    columns
        .iter()
        .filter_map(|c| user.demographic(c).map(|v| format!("{}: {}", column_label(c), v)))
        .collect::<Vec<String>>()
        .join("\n")
}

/// Second-person sentences describing the user's known demographics.
pub fn demographics_narrative(user: &UserRecord, config: &Config) -> String {
    let mut text = String::new();
    for column in &config.users.demographic_columns {
        if let (Some(value), Some(phrase)) = (
            user.demographic(column),
            config.users.demographic_map.get(column),
        ) {
            text.push_str(phrase);
            text.push_str(&value.to_lowercase());
            text.push_str(". ");
        }
    }
    text
}

/// Sentences listing the big issues the user is for, against and undecided about.
pub fn big_issues_narrative(user: &UserRecord, columns: &[String]) -> String {
    let mut pro = Vec::new();
    let mut con = Vec::new();
    let mut undecided = Vec::new();
    for column in columns {
        match user.issue(column) {
            Some(IssueStance::Pro) => pro.push(column_label(column)),
            Some(IssueStance::Con) => con.push(column_label(column)),
            Some(IssueStance::Undecided) => undecided.push(column_label(column)),
            _ => {}
        }
    }

    let mut text = String::new();
    if !pro.is_empty() {
        text.push_str(&format!("You are for the following issues: {}. ", pro.join(", ")));
    }
    if !con.is_empty() {
        text.push_str(&format!("You are against the following issues: {}. ", con.join(", ")));
    }
    if !undecided.is_empty() {
        text.push_str(&format!(
            "You are undecided about the following issues: {}. ",
            undecided.join(", ")
        ));
    }
    text
}

/// Per-debate parts shared by every voter's prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedDebate {
    pub debate_id: String,
    pub proposition: String,
    pub transcript: Option<String>,
    pub date_cutoff: Option<String>,
}

pub struct PromptAssembler<'a> {
    task: Task,
    config: &'a Config,
    dataset: &'a Dataset,
    counter: &'a dyn TokenCounter,
    max_debate_tokens: Option<usize>,
}

impl<'a> PromptAssembler<'a> {
    /// Build an assembler and compute the transcript budget for `task`.
    pub fn new(
        task: Task,
        config: &'a Config,
        dataset: &'a Dataset,
        counter: &'a dyn TokenCounter,
    ) -> Result<Self> {
        let mut assembler = Self {
            task,
            config,
            dataset,
            counter,
            max_debate_tokens: None,
        };
        if task.needs_transcript() {
            let budget = assembler.compute_budget()?;
            info!(%task, max_debate_tokens = budget, "Computed transcript budget");
            assembler.max_debate_tokens = Some(budget);
        }
        Ok(assembler)
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn dataset(&self) -> &'a Dataset {
        self.dataset
    }

    /// Completion limit requested for each prompt of this task.
    pub fn max_response_tokens(&self) -> u32 {
        self.task.max_response_tokens(self.config)
    }

    /// Token ceiling for transcripts, `None` for tasks without one.
    pub fn max_debate_tokens(&self) -> Option<usize> {
        self.max_debate_tokens
    }

    fn count_all<'t>(&self, texts: impl IntoIterator<Item = &'t str>) -> usize {
        texts.into_iter().map(|t| self.counter.count(t)).sum()
    }

    fn compute_budget(&self) -> Result<usize> {
        let context_window = self.config.context_window(&self.config.model.name)?;
        let response = self.task.max_response_tokens(self.config) as usize;
        let reserved = match self.task {
            Task::WhoWon => self.count_all(self.config.tasks.who_won.fixed_texts()) + response,
            Task::DebateDemographics => {
                self.count_all(self.config.tasks.debate_demographics.fixed_texts())
                    + self.worst_case_date_cutoff_tokens()
                    + self.worst_case_user_info_tokens()
                    + 2 * response
            }
            Task::PropositionVoter { .. } => 0,
        };
        match context_window.checked_sub(reserved) {
            Some(budget) if budget > 0 => Ok(budget),
            _ => Err(DebateGptError::ConfigError(format!(
                "model {} has a {} token context window, but {} tokens are reserved for \
                 the {} prompt; no room is left for the debate",
                self.config.model.name, context_window, reserved, self.task
            ))),
        }
    }

    /// Tokens of the longest date disclaimer over the loaded debates.
    fn worst_case_date_cutoff_tokens(&self) -> usize {
        self.dataset
            .debates()
            .iter()
            .filter_map(|d| d.start_date.as_deref())
            .filter_map(|d| date_cutoff(d).ok())
            .map(|text| self.counter.count(&text))
            .max()
            .unwrap_or(0)
    }

    /// Tokens of a user info block holding, for every demographic column, the
    /// value that tokenizes longest among all users.
    fn worst_case_user_info_tokens(&self) -> usize {
        let mut users: Vec<&UserRecord> = self.dataset.users().collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        let lines: Vec<String> = self
            .config
            .users
            .demographic_columns
            .iter()
            .filter_map(|column| {
                let mut longest: Option<(&str, usize)> = None;
                for value in users.iter().filter_map(|u| u.demographic(column)) {
                    let tokens = self.counter.count(value);
                    if longest.is_none_or(|(_, best)| tokens > best) {
                        longest = Some((value, tokens));
                    }
                }
                longest.map(|(value, _)| format!("{}: {}", column_label(column), value))
            })
            .collect();
        self.counter.count(&lines.join("\n"))
    }

    /// Proposition, transcript and date disclaimer of `debate`.
    ///
    /// The start date is only read for the per-voter tasks. Returns `None`
    /// when the debate has no proposition or when not even one round of its
    /// transcript fits the budget.
    pub fn prepare(&self, debate: &DebateRecord) -> Result<Option<PreparedDebate>> {
        let Some(proposition) = debate.proposition.as_deref() else {
            debug!(debate_id = %debate.debate_id, "No proposition, skipping");
            return Ok(None);
        };

        let transcript = match self.max_debate_tokens {
            Some(max) => {
                let rounds = self.dataset.rounds(&debate.debate_id);
                let transcript = TranscriptBuilder::new(self.counter, max).build(rounds)?;
                if transcript.is_empty() {
                    debug!(debate_id = %debate.debate_id, max, "Transcript does not fit, skipping");
                    return Ok(None);
                }
                Some(transcript.to_json()?)
            }
            None => None,
        };

        // q1 prompts carry no date disclaimer.
        let date_cutoff = match self.task {
            Task::WhoWon => None,
            _ => debate.start_date.as_deref().map(date_cutoff).transpose()?,
        };

        Ok(Some(PreparedDebate {
            debate_id: debate.debate_id.clone(),
            proposition: capitalize(proposition),
            transcript,
            date_cutoff,
        }))
    }

    /// Messages for a prepared debate, and for `voter_id` on per-voter tasks.
    ///
    /// Returns `None` when the voter is unknown or when their profile gives
    /// nothing to personalize the prompt with.
    pub fn messages(
        &self,
        prepared: &PreparedDebate,
        voter_id: Option<&str>,
    ) -> Result<Option<Vec<ChatMessage>>> {
        let transcript = || {
            prepared.transcript.clone().ok_or_else(|| {
                DebateGptError::ConfigError(format!(
                    "debate {} was prepared without a transcript",
                    prepared.debate_id
                ))
            })
        };

        match self.task {
            Task::WhoWon => {
                let task = &self.config.tasks.who_won;
                Ok(Some(vec![
                    ChatMessage::system(&task.role_message),
                    ChatMessage::user(&task.proposition_prefix),
                    ChatMessage::user(&prepared.proposition),
                    ChatMessage::user(&task.debate_prefix),
                    ChatMessage::user(transcript()?),
                    ChatMessage::user(&task.question),
                    ChatMessage::user(&task.constraint),
                ]))
            }
            Task::DebateDemographics => {
                let Some(user) = self.voter(voter_id) else {
                    return Ok(None);
                };
                let info = user_info(user, &self.config.users.demographic_columns);
                if info.is_empty() {
                    debug!(debate_id = %prepared.debate_id, voter_id, "No known demographics");
                    return Ok(None);
                }
                let task = &self.config.tasks.debate_demographics;
                let mut messages = vec![ChatMessage::system(&task.role_message)];
                if let Some(cutoff) = &prepared.date_cutoff {
                    messages.push(ChatMessage::system(cutoff));
                }
                messages.extend([
                    ChatMessage::user(&task.proposition_prefix),
                    ChatMessage::user(&prepared.proposition),
                    ChatMessage::user(&task.debate_prefix),
                    ChatMessage::user(transcript()?),
                    ChatMessage::user(&task.user_demographics_prefix),
                    ChatMessage::user(info),
                    ChatMessage::user(&task.question),
                    ChatMessage::user(&task.constraint),
                ]);
                Ok(Some(messages))
            }
            Task::PropositionVoter {
                reasoning,
                big_issues,
            } => {
                let Some(user) = self.voter(voter_id) else {
                    return Ok(None);
                };
                let mut role_text = demographics_narrative(user, self.config);
                if big_issues {
                    role_text.push_str(&big_issues_narrative(
                        user,
                        &self.config.users.big_issue_columns,
                    ));
                }
                if role_text.is_empty() {
                    debug!(
                        debate_id = %prepared.debate_id,
                        voter_id,
                        "Nothing to personalize with"
                    );
                    return Ok(None);
                }
                if let Some(cutoff) = &prepared.date_cutoff {
                    role_text.push_str(cutoff);
                }

                let task = voter_task(self.config, reasoning);
                Ok(Some(vec![
                    ChatMessage::system(role_text),
                    ChatMessage::user(&task.context),
                    ChatMessage::user(&prepared.proposition),
                    ChatMessage::user(&task.question),
                    ChatMessage::user(&task.constraint),
                ]))
            }
        }
    }

    fn voter(&self, voter_id: Option<&str>) -> Option<&'a UserRecord> {
        let user = voter_id.and_then(|id| self.dataset.user(id));
        if user.is_none() {
            debug!(voter_id, "Unknown voter, skipping");
        }
        user
    }

    /// Prepare `debate` and build the messages for `voter_id` in one step.
    pub fn assemble(
        &self,
        debate: &DebateRecord,
        voter_id: Option<&str>,
    ) -> Result<Option<Vec<ChatMessage>>> {
        match self.prepare(debate)? {
            Some(prepared) => self.messages(&prepared, voter_id),
            None => Ok(None),
        }
    }
}
