//! Persistence of the intermediate tables and indexed access for prompting.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

use crate::debates::DebateRecord;
use crate::error::{DebateGptError, Result};
use crate::rounds::RoundRow;
use crate::users::UserRecord;
use crate::votes::VoteRow;

pub const DEBATES_FILE: &str = "debates.json";
pub const USERS_FILE: &str = "users.json";
pub const VOTES_FILE: &str = "votes.json";
pub const ROUNDS_FILE: &str = "rounds.json";
pub const COMMENTS_FILE: &str = "comments.json";
pub const DEBATES_FILTERED_FILE: &str = "debates_filtered.json";
pub const VOTES_FILTERED_FILE: &str = "votes_filtered.json";

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| DebateGptError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| DebateGptError::json(path, e))
}

/// Write `value` as pretty JSON, replacing `path` only once the new content is complete.
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| DebateGptError::io(parent, e))?;
    }
    let tmp = path.with_extension("json.tmp");
    {
        let file = File::create(&tmp).map_err(|e| DebateGptError::io(&tmp, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)
            .map_err(|e| DebateGptError::json(&tmp, e))?;
        writer.flush().map_err(|e| DebateGptError::io(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| DebateGptError::io(path, e))?;
    debug!(path = %path.display(), "Wrote JSON file");
    Ok(())
}

/// Accept ids stored either as JSON strings or as integers.
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// Filtered tables indexed for prompt assembly.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    debates: Vec<DebateRecord>,
    rounds: HashMap<String, Vec<RoundRow>>,
    votes: HashMap<String, Vec<VoteRow>>,
    users: HashMap<String, UserRecord>,
}

impl Dataset {
    /// Index the tables. Rounds are sorted by `order` within each debate.
    pub fn new(
        debates: Vec<DebateRecord>,
        rounds: Vec<RoundRow>,
        votes: Vec<VoteRow>,
        users: Vec<UserRecord>,
    ) -> Self {
        let mut rounds_by_debate: HashMap<String, Vec<RoundRow>> = HashMap::new();
        for row in rounds {
            rounds_by_debate.entry(row.debate_id.clone()).or_default().push(row);
        }
        for rows in rounds_by_debate.values_mut() {
            rows.sort_by_key(|r| r.order);
        }

        let mut votes_by_debate: HashMap<String, Vec<VoteRow>> = HashMap::new();
        for vote in votes {
            votes_by_debate.entry(vote.debate_id.clone()).or_default().push(vote);
        }

        let users = users.into_iter().map(|u| (u.user_id.clone(), u)).collect();

        Self {
            debates,
            rounds: rounds_by_debate,
            votes: votes_by_debate,
            users,
        }
    }

    /// Load the filtered debates and votes plus the rounds and users tables from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let debates: Vec<DebateRecord> = read_json(&dir.join(DEBATES_FILTERED_FILE))?;
        let rounds: Vec<RoundRow> = read_json(&dir.join(ROUNDS_FILE))?;
        let votes: Vec<VoteRow> = read_json(&dir.join(VOTES_FILTERED_FILE))?;
        let users: Vec<UserRecord> = read_json(&dir.join(USERS_FILE))?;
        info!(
            debates = debates.len(),
            turns = rounds.len(),
            votes = votes.len(),
            users = users.len(),
            dir = %dir.display(),
            "Loaded dataset"
        );
        Ok(Self::new(debates, rounds, votes, users))
    }

    /// Keep only debates in `category`.
    pub fn retain_category(&mut self, category: &str) {
        self.debates
            .retain(|d| d.category.as_deref() == Some(category));
    }

    pub fn debates(&self) -> &[DebateRecord] {
        &self.debates
    }

    pub fn rounds(&self, debate_id: &str) -> &[RoundRow] {
        self.rounds.get(debate_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn votes(&self, debate_id: &str) -> &[VoteRow] {
        self.votes.get(debate_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn user(&self, user_id: &str) -> Option<&UserRecord> {
        self.users.get(user_id)
    }

    pub fn users(&self) -> impl Iterator<Item = &UserRecord> {
        self.users.values()
    }
}
