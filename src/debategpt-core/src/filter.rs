//! Debate and vote filters.
//!
//! Every filter takes its inputs by reference and returns new collections.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::debates::DebateRecord;
use crate::normalize::Label;
use crate::participant::Side;
use crate::rounds::RoundRow;
use crate::users::UserRecord;
use crate::votes::{VoteCategory, VoteRow};

/// Token totals of one debate's transcript.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscriptStats {
    pub pro_tokens: Option<usize>,
    pub con_tokens: Option<usize>,
    pub turns: usize,
}

impl TranscriptStats {
    /// Whether the two sides are balanced and long enough.
    ///
    /// The longer side may exceed the shorter by at most `percentage` percent,
    /// the sides together must reach `min_tokens`, and there must be at least
    /// four turns. A side that never spoke fails.
    pub fn is_balanced(&self, percentage: f64, min_tokens: usize) -> bool {
        let (Some(pro), Some(con)) = (self.pro_tokens, self.con_tokens) else {
            return false;
        };
        let (low, high) = (pro.min(con) as f64, pro.max(con) as f64);
        (1.0 + percentage / 100.0) * low >= high && pro + con >= min_tokens && self.turns >= 4
    }
}

fn transcript_stats(rounds: &[RoundRow]) -> HashMap<&str, TranscriptStats> {
    let mut stats: HashMap<&str, TranscriptStats> = HashMap::new();
    for row in rounds {
        let entry = stats.entry(row.debate_id.as_str()).or_default();
        let total = match row.side {
            Side::Pro => &mut entry.pro_tokens,
            Side::Con => &mut entry.con_tokens,
        };
        *total = Some(total.unwrap_or(0) + row.token_count);
        entry.turns += 1;
    }
    stats
}

/// Keep debates whose transcripts are balanced between the sides.
pub fn filter_by_rounds(
    rounds: &[RoundRow],
    debates: &[DebateRecord],
    percentage: f64,
    min_tokens: usize,
) -> Vec<DebateRecord> {
    let stats = transcript_stats(rounds);
    let kept: Vec<DebateRecord> = debates
        .iter()
        .filter(|d| {
            stats
                .get(d.debate_id.as_str())
                .is_some_and(|s| s.is_balanced(percentage, min_tokens))
        })
        .cloned()
        .collect();
    info!(
        before = debates.len(),
        after = kept.len(),
        percentage,
        min_tokens,
        "Filtered debates by rounds"
    );
    kept
}

/// Vote tallies of one debate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DebateVoteStats {
    pub num_votes: usize,
    pub num_flipped_votes: usize,
    pub agreed_before_pro: usize,
    pub agreed_before_con: usize,
    pub agreed_before_tie: usize,
    pub agreed_after_pro: usize,
    pub agreed_after_con: usize,
    pub agreed_after_tie: usize,
}

impl DebateVoteStats {
    fn add(&mut self, vote: &VoteRow) {
        self.num_votes += 1;
        if vote.flipped {
            self.num_flipped_votes += 1;
        }
        match vote.outcome(VoteCategory::AgreedBefore) {
            Label::Pro => self.agreed_before_pro += 1,
            Label::Con => self.agreed_before_con += 1,
            _ => self.agreed_before_tie += 1,
        }
        match vote.outcome(VoteCategory::AgreedAfter) {
            Label::Pro => self.agreed_after_pro += 1,
            Label::Con => self.agreed_after_con += 1,
            _ => self.agreed_after_tie += 1,
        }
    }
}

/// A debate that passed the vote filter, with its tallies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilteredDebate {
    #[serde(flatten)]
    pub debate: DebateRecord,
    #[serde(flatten)]
    pub stats: DebateVoteStats,
}

/// Keep debates with at least `min_num_votes` votes and `min_num_flipped_votes` flips.
pub fn filter_by_votes(
    votes: &[VoteRow],
    debates: &[DebateRecord],
    min_num_votes: usize,
    min_num_flipped_votes: usize,
) -> Vec<FilteredDebate> {
    let mut stats: HashMap<&str, DebateVoteStats> = HashMap::new();
    for vote in votes {
        stats.entry(vote.debate_id.as_str()).or_default().add(vote);
    }

    let kept: Vec<FilteredDebate> = debates
        .iter()
        .filter_map(|d| {
            let s = stats.get(d.debate_id.as_str())?;
            (s.num_votes >= min_num_votes && s.num_flipped_votes >= min_num_flipped_votes).then(
                || FilteredDebate {
                    debate: d.clone(),
                    stats: s.clone(),
                },
            )
        })
        .collect();
    info!(
        before = debates.len(),
        after = kept.len(),
        min_num_votes,
        min_num_flipped_votes,
        "Filtered debates by votes"
    );
    kept
}

/// A vote joined with its voter's profile counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilteredVote {
    #[serde(flatten)]
    pub vote: VoteRow,
    pub num_big_issues: usize,
    pub num_demographics: usize,
    pub number_participated: u64,
}

/// Keep votes in `debate_ids` cast by known voters with enough demographics.
pub fn filter_votes_by_users(
    users: &[UserRecord],
    votes: &[VoteRow],
    debate_ids: &BTreeSet<String>,
    min_num_demographics: usize,
) -> Vec<FilteredVote> {
    let by_id: HashMap<&str, &UserRecord> =
        users.iter().map(|u| (u.user_id.as_str(), u)).collect();

    let kept: Vec<FilteredVote> = votes
        .iter()
        .filter(|v| debate_ids.contains(&v.debate_id))
        .filter_map(|v| {
            let user = by_id.get(v.voter_id.as_str())?;
            (user.num_demographics >= min_num_demographics).then(|| FilteredVote {
                vote: v.clone(),
                num_big_issues: user.num_big_issues,
                num_demographics: user.num_demographics,
                number_participated: user.number_participated,
            })
        })
        .collect();
    info!(
        before = votes.len(),
        after = kept.len(),
        min_num_demographics,
        "Filtered votes by users"
    );
    kept
}
