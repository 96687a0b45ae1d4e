//! DebateGPT Core Library
//!
//! Turns a debate platform export into filtered tables, assembles
//! token-budgeted LLM prompts from them, runs the prompts in resumable
//! batches, and scores the answers against the human votes.

pub mod client;
pub mod comments;
pub mod config;
pub mod dataset;
pub mod debates;
pub mod error;
pub mod evaluation;
pub mod export;
pub mod filter;
pub mod metrics;
pub mod normalize;
pub mod orchestrator;
pub mod participant;
pub mod pipeline;
pub mod prompt;
pub mod results;
pub mod rounds;
pub mod tokens;
pub mod transcript;
pub mod users;
pub mod votes;

pub use client::{ChatModel, Endpoint, OpenAiChatModel};
pub use config::{Config, ModelSource, default_config};
pub use dataset::Dataset;
pub use error::{DebateGptError, Result};
pub use evaluation::{AgreementReport, BootstrapSettings, ScoreReport};
pub use normalize::{Label, ResponseNormalizer};
pub use orchestrator::{BatchCallback, BatchEvent, BatchOrchestrator, BatchSettings, BatchSummary};
pub use participant::Side;
pub use prompt::{ChatMessage, PromptAssembler, Role, Task};
pub use results::{ResultRecord, ResultStore};
pub use tokens::{TiktokenCounter, TokenCounter};
