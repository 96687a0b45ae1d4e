//! Schemas of the raw platform export.
//!
//! Both export files are JSON objects keyed by an opaque id (debate id or
//! username). Only the fields the pipeline reads are modelled; everything else
//! in the export is ignored on load.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::dataset::read_json;
use crate::error::Result;

/// Key under which the platform records the "tie" column of a ballot.
pub const TIE_BALLOT_KEY: &str = "Tie";

/// One debate as exported by the platform.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDebate {
    pub participant_1_name: String,
    pub participant_1_position: String,
    pub participant_2_name: String,
    pub participant_2_position: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    /// Each round is a list of turns; well-formed rounds hold one or two.
    #[serde(default)]
    pub rounds: Vec<Vec<RawTurn>>,
    #[serde(default)]
    pub votes: Vec<RawVote>,
    #[serde(default)]
    pub comments: Vec<RawComment>,
}

/// One side's statement within a round.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTurn {
    pub side: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// A ballot: voter plus one per-category record for each ballot column
/// (both participants and the tie column).
#[derive(Debug, Clone, Deserialize)]
pub struct RawVote {
    pub user_name: String,
    #[serde(default)]
    pub votes_map: BTreeMap<String, Value>,
}

impl RawVote {
    /// Ballot columns naming a participant, i.e. every column except the tie column.
    pub fn participant_keys(&self) -> impl Iterator<Item = &str> {
        self.votes_map
            .keys()
            .map(String::as_str)
            .filter(|k| *k != TIE_BALLOT_KEY)
    }

    /// Whether `participant`'s column checks the category captioned `caption`.
    ///
    /// Absent columns and non-boolean values count as unchecked; `0`/`1`
    /// integers are accepted since some export versions store flags that way.
    pub fn is_checked(&self, participant: &str, caption: &str) -> bool {
        match self.votes_map.get(participant).and_then(|m| m.get(caption)) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_u64() == Some(1),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawComment {
    pub user_name: String,
    #[serde(default)]
    pub comment_text: Option<String>,
}

/// One user profile as exported by the platform.
#[derive(Debug, Clone, Deserialize)]
pub struct RawUser {
    #[serde(default)]
    pub big_issues_dict: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub number_of_all_debates: u64,
    #[serde(default)]
    pub number_of_won_debates: u64,
    #[serde(default)]
    pub number_of_voted_debates: u64,
    /// Remaining profile fields, demographics among them.
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl RawUser {
    /// String value of a profile attribute, if present and textual.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }
}

/// Load the debates export, ordered by id (numerically when ids are numbers).
pub fn load_raw_debates(path: &Path) -> Result<Vec<(String, RawDebate)>> {
    let map: BTreeMap<String, RawDebate> = read_json(path)?;
    Ok(sorted_by_id(map))
}

/// Load the users export, ordered by username.
pub fn load_raw_users(path: &Path) -> Result<Vec<(String, RawUser)>> {
    let map: BTreeMap<String, RawUser> = read_json(path)?;
    Ok(map.into_iter().collect())
}

fn sorted_by_id<T>(map: BTreeMap<String, T>) -> Vec<(String, T)> {
    let mut entries: Vec<(String, T)> = map.into_iter().collect();
    // Numeric ids first, in numeric order, then the rest lexicographically.
    entries.sort_by(|(a, _), (b, _)| {
        let key = |id: &str| (id.parse::<u64>().map_or(1, |_| 0), id.parse::<u64>().unwrap_or(0));
        key(a).cmp(&key(b)).then_with(|| a.cmp(b))
    });
    entries
}
