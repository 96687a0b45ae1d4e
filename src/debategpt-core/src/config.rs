//! Configuration module for loading TOML config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::DebateGptError;
use crate::users::DEFAULT_PLACEHOLDERS;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    /// Context window in tokens, keyed by model name.
    #[serde(default = "default_context_windows")]
    pub context_windows: BTreeMap<String, usize>,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub filters: FiltersConfig,
    pub users: UsersConfig,
    pub tasks: TasksConfig,
}

/// Where completions come from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ModelSource {
    /// The OpenAI API; requires `OPENAI_API_KEY`.
    Openai,
    /// A self-hosted OpenAI-compatible server; no key required.
    OpenSource,
}

/// The model prompted and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(default = "default_source")]
    pub source: ModelSource,
    /// Model whose tokenizer is used for budgeting. Defaults to `name`, or to
    /// `gpt-3.5-turbo` for the self-hosted `llama` and `mistral` models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    /// Model name sent in requests, when it differs from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ModelConfig {
    pub fn encoding_model(&self) -> &str {
        match (&self.encoding, self.name.as_str()) {
            (Some(encoding), _) => encoding,
            (None, "llama" | "mistral") => "gpt-3.5-turbo",
            (None, name) => name,
        }
    }

    pub fn request_model(&self) -> &str {
        self.request_name.as_deref().unwrap_or(&self.name)
    }
}

/// Batch prompting loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Results are written to disk whenever this many have accumulated.
    pub flush_every: usize,
    /// Pause between debates, in milliseconds.
    pub delay_ms: u64,
    /// Attempts per model call before giving up.
    pub max_retries: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            flush_every: 50,
            delay_ms: 500,
            max_retries: 5,
        }
    }
}

/// Thresholds of the debate and vote filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiltersConfig {
    pub percentage: f64,
    pub min_tokens: usize,
    pub min_num_votes: usize,
    pub min_num_flipped_votes: usize,
    pub min_num_demographics: usize,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            percentage: 25.0,
            min_tokens: 300,
            min_num_votes: 3,
            min_num_flipped_votes: 0,
            min_num_demographics: 5,
        }
    }
}

/// User profile columns and how they are phrased in prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersConfig {
    pub demographic_columns: Vec<String>,
    /// Big issues named in the q2 narrative, as column names.
    #[serde(default)]
    pub big_issue_columns: Vec<String>,
    /// Sentence prefix per demographic column, e.g. `"Your gender is "`.
    pub demographic_map: BTreeMap<String, String>,
    #[serde(default = "default_placeholders")]
    pub placeholders: Vec<String>,
}

/// Texts of the "who won" task (q1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoWonTask {
    pub role_message: String,
    pub proposition_prefix: String,
    pub debate_prefix: String,
    pub question: String,
    pub constraint: String,
    #[serde(default = "default_who_won_tokens")]
    pub max_response_tokens: u32,
}

/// Texts of the "debate demographics" task (q3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateDemographicsTask {
    pub role_message: String,
    pub proposition_prefix: String,
    pub debate_prefix: String,
    pub user_demographics_prefix: String,
    pub question: String,
    pub constraint: String,
    #[serde(default = "default_demographics_tokens")]
    pub max_response_tokens: u32,
}

/// Texts of the "proposition voter" task (q2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropositionVoterTask {
    pub context: String,
    pub question: String,
    pub constraint: String,
    #[serde(default = "default_voter_tokens")]
    pub max_response_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    pub who_won: WhoWonTask,
    pub debate_demographics: DebateDemographicsTask,
    pub proposition_voter_role: PropositionVoterTask,
    pub proposition_voter_reasoning: PropositionVoterTask,
}

impl WhoWonTask {
    pub fn fixed_texts(&self) -> [&str; 5] {
        [
            &self.role_message,
            &self.proposition_prefix,
            &self.debate_prefix,
            &self.question,
            &self.constraint,
        ]
    }
}

impl DebateDemographicsTask {
    pub fn fixed_texts(&self) -> [&str; 6] {
        [
            &self.role_message,
            &self.proposition_prefix,
            &self.debate_prefix,
            &self.user_demographics_prefix,
            &self.question,
            &self.constraint,
        ]
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DebateGptError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| DebateGptError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    pub fn from_str(content: &str) -> Result<Self, DebateGptError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| DebateGptError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML, e.g. to seed a config file.
    pub fn to_toml(&self) -> Result<String, DebateGptError> {
        toml::to_string_pretty(self)
            .map_err(|e| DebateGptError::ConfigError(format!("Failed to render config: {}", e)))
    }

    fn validate(&self) -> Result<(), DebateGptError> {
        if let Some(column) = self
            .users
            .demographic_columns
            .iter()
            .find(|c| !self.users.demographic_map.contains_key(*c))
        {
            return Err(DebateGptError::ConfigError(format!(
                "demographic column '{}' has no entry in users.demographic_map",
                column
            )));
        }
        if self.batch.flush_every == 0 {
            return Err(DebateGptError::ConfigError(
                "batch.flush_every must be at least 1".to_string(),
            ));
        }
        if self.batch.max_retries == 0 {
            return Err(DebateGptError::ConfigError(
                "batch.max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Context window of `model`.
    pub fn context_window(&self, model: &str) -> Result<usize, DebateGptError> {
        self.context_windows
            .get(model)
            .copied()
            .ok_or_else(|| DebateGptError::UnknownModel(model.to_string()))
    }
}

fn default_source() -> ModelSource {
    ModelSource::Openai
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_who_won_tokens() -> u32 {
    1000
}

fn default_demographics_tokens() -> u32 {
    50
}

fn default_voter_tokens() -> u32 {
    500
}

fn default_placeholders() -> Vec<String> {
    DEFAULT_PLACEHOLDERS.iter().map(|s| s.to_string()).collect()
}

fn default_context_windows() -> BTreeMap<String, usize> {
    [
        ("gpt-3.5-turbo-1106", 16385),
        ("gpt-3.5-turbo-0613", 4096),
        ("gpt-3.5-turbo", 4096),
        ("llama", 4096),
        ("mistral", 4096),
        ("gpt-4", 8192),
        ("gpt-4-32k", 32768),
    ]
    .into_iter()
    .map(|(model, window)| (model.to_string(), window))
    .collect()
}

const DEMOGRAPHICS: [(&str, &str); 8] = [
    ("birthday", "You were born on "),
    ("education", "Your education level is "),
    ("ethnicity", "Your ethnicity is "),
    ("gender", "Your gender is "),
    ("income", "Your income is "),
    ("political_ideology", "Your political ideology is "),
    ("religious_ideology", "Your religious ideology is "),
    ("party", "Your political party is "),
];

const BIG_ISSUES: [&str; 12] = [
    "abortion",
    "affirmative_action",
    "animal_rights",
    "death_penalty",
    "drug_legalization",
    "environmental_protection",
    "gay_marriage",
    "global_warming_exists",
    "gun_rights",
    "medical_marijuana",
    "minimum_wage",
    "national_health_care",
];

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config {
        model: ModelConfig {
            name: "gpt-3.5-turbo-1106".to_string(),
            source: ModelSource::Openai,
            encoding: None,
            request_name: None,
            api_base: None,
            timeout_secs: default_timeout_secs(),
        },
        context_windows: default_context_windows(),
        batch: BatchConfig::default(),
        filters: FiltersConfig::default(),
        users: UsersConfig {
            demographic_columns: DEMOGRAPHICS.iter().map(|(c, _)| c.to_string()).collect(),
            big_issue_columns: BIG_ISSUES.iter().map(|c| c.to_string()).collect(),
            demographic_map: DEMOGRAPHICS
                .iter()
                .map(|(c, phrase)| (c.to_string(), phrase.to_string()))
                .collect(),
            placeholders: default_placeholders(),
        },
        tasks: TasksConfig {
            who_won: WhoWonTask {
                role_message: "You are a fair and impartial judge of a formal online debate."
                    .to_string(),
                proposition_prefix: "The proposition of the debate is:".to_string(),
                debate_prefix: "Here is the debate, round by round:".to_string(),
                question: "Which side made the more convincing arguments?".to_string(),
                constraint: ANSWER_CONSTRAINT.to_string(),
                max_response_tokens: default_who_won_tokens(),
            },
            debate_demographics: DebateDemographicsTask {
                role_message: "You predict how a particular person reacts to a debate."
                    .to_string(),
                proposition_prefix: "The proposition of the debate is:".to_string(),
                debate_prefix: "Here is the debate, round by round:".to_string(),
                user_demographics_prefix: "Here is some information about the person:"
                    .to_string(),
                question: "After reading the debate, which side does this person agree with?"
                    .to_string(),
                constraint: ANSWER_CONSTRAINT.to_string(),
                max_response_tokens: default_demographics_tokens(),
            },
            proposition_voter_role: PropositionVoterTask {
                context: "You are about to read a debate proposition.".to_string(),
                question: "Before any debate, which side of the proposition do you agree with?"
                    .to_string(),
                constraint: ANSWER_CONSTRAINT.to_string(),
                max_response_tokens: default_voter_tokens(),
            },
            proposition_voter_reasoning: PropositionVoterTask {
                context: "You are about to read a debate proposition.".to_string(),
                question: "Before any debate, which side of the proposition do you agree with?"
                    .to_string(),
                constraint: REASONING_CONSTRAINT.to_string(),
                max_response_tokens: default_voter_tokens(),
            },
        },
    }
}

const ANSWER_CONSTRAINT: &str =
    "Answer with exactly one word: Pro, Con or Tie. Do not explain your answer.";

const REASONING_CONSTRAINT: &str = "Explain your reasoning in a few sentences, then finish \
with a final line of the form 'Answer: <Pro, Con or Tie>'.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips() {
        let rendered = default_config().to_toml().unwrap();
        let parsed = Config::from_str(&rendered).unwrap();
        assert_eq!(parsed.model.name, "gpt-3.5-turbo-1106");
        assert_eq!(parsed.batch.flush_every, 50);
        assert_eq!(parsed.users.demographic_columns.len(), 8);
        assert_eq!(parsed.tasks.who_won.max_response_tokens, 1000);
    }

    #[test]
    fn test_context_windows() {
        let config = default_config();
        assert_eq!(config.context_window("gpt-3.5-turbo-1106").unwrap(), 16385);
        assert_eq!(config.context_window("mistral").unwrap(), 4096);
        assert_eq!(config.context_window("gpt-4-32k").unwrap(), 32768);
        assert!(matches!(
            config.context_window("gpt-5"),
            Err(DebateGptError::UnknownModel(_))
        ));
    }

    #[test]
    fn test_encoding_model() {
        let mut model = default_config().model;
        assert_eq!(model.encoding_model(), "gpt-3.5-turbo-1106");
        model.name = "llama".to_string();
        assert_eq!(model.encoding_model(), "gpt-3.5-turbo");
        model.encoding = Some("gpt-4".to_string());
        assert_eq!(model.encoding_model(), "gpt-4");
    }

    #[test]
    fn test_missing_demographic_phrase() {
        let mut config = default_config();
        config.users.demographic_map.remove("gender");
        let rendered = config.to_toml().unwrap();
        let err = Config::from_str(&rendered).unwrap_err();
        assert!(matches!(err, DebateGptError::ConfigError(_)));
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let toml = r#"
            [model]
            name = "gpt-4"

            [users]
            demographic_columns = ["gender"]
            demographic_map = { gender = "Your gender is " }

            [tasks.who_won]
            role_message = "r"
            proposition_prefix = "p"
            debate_prefix = "d"
            question = "q"
            constraint = "c"

            [tasks.debate_demographics]
            role_message = "r"
            proposition_prefix = "p"
            debate_prefix = "d"
            user_demographics_prefix = "u"
            question = "q"
            constraint = "c"

            [tasks.proposition_voter_role]
            context = "x"
            question = "q"
            constraint = "c"

            [tasks.proposition_voter_reasoning]
            context = "x"
            question = "q"
            constraint = "c"
        "#;
        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.model.source, ModelSource::Openai);
        assert_eq!(config.filters.min_tokens, 300);
        assert_eq!(config.context_window("gpt-4").unwrap(), 8192);
        assert_eq!(config.users.placeholders.len(), 4);
        assert_eq!(config.tasks.debate_demographics.max_response_tokens, 50);
    }
}
