//! Vote extraction, validation and resolution.
//!
//! A raw ballot carries a yes/no flag per category for each participant. The
//! extractor flattens ballots into [`BallotRow`]s, the validator refuses any
//! ballot that checks both sides of a category, and resolution turns the
//! flags into one winner per category ([`VoteRow`]).

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::debates::resolve_participants;
use crate::error::{DebateGptError, Result};
use crate::export::{RawDebate, RawVote};
use crate::normalize::Label;
use crate::participant::Participants;

/// Value stored in a resolved category when neither side was checked.
pub const TIE: &str = "Tie";

/// The six categories of a ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteCategory {
    AgreedBefore,
    AgreedAfter,
    BetterConduct,
    BetterSpellingAndGrammar,
    MoreConvincingArguments,
    MostReliableSources,
}

impl VoteCategory {
    pub const ALL: [VoteCategory; 6] = [
        VoteCategory::AgreedBefore,
        VoteCategory::AgreedAfter,
        VoteCategory::BetterConduct,
        VoteCategory::BetterSpellingAndGrammar,
        VoteCategory::MoreConvincingArguments,
        VoteCategory::MostReliableSources,
    ];

    /// Caption of the category on the platform's ballot.
    pub fn caption(&self) -> &'static str {
        match self {
            VoteCategory::AgreedBefore => "Agreed with before the debate",
            VoteCategory::AgreedAfter => "Agreed with after the debate",
            VoteCategory::BetterConduct => "Who had better conduct",
            VoteCategory::BetterSpellingAndGrammar => "Had better spelling and grammar",
            VoteCategory::MoreConvincingArguments => "Made more convincing arguments",
            VoteCategory::MostReliableSources => "Used the most reliable sources",
        }
    }

    /// Column name of the resolved category in the votes table.
    pub fn column(&self) -> &'static str {
        match self {
            VoteCategory::AgreedBefore => "agreed_before",
            VoteCategory::AgreedAfter => "agreed_after",
            VoteCategory::BetterConduct => "better_conduct",
            VoteCategory::BetterSpellingAndGrammar => "better_spelling_and_grammar",
            VoteCategory::MoreConvincingArguments => "more_convincing_arguments",
            VoteCategory::MostReliableSources => "most_reliable_sources",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// One extracted ballot before validation, flags indexed like [`VoteCategory::ALL`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BallotRow {
    pub debate_id: String,
    pub pro_user_id: String,
    pub con_user_id: String,
    pub voter_id: String,
    pub pro_votes: [bool; 6],
    pub con_votes: [bool; 6],
}

impl BallotRow {
    /// At most one side checked in every category.
    pub fn is_valid(&self) -> bool {
        VoteCategory::ALL
            .iter()
            .all(|c| {
                u8::from(self.pro_votes[c.index()]) + u8::from(self.con_votes[c.index()]) <= 1
            })
    }

    /// User id that won `category`, or [`TIE`] when neither side was checked.
    pub fn winner(&self, category: VoteCategory) -> &str {
        if self.pro_votes[category.index()] {
            &self.pro_user_id
        } else if self.con_votes[category.index()] {
            &self.con_user_id
        } else {
            TIE
        }
    }

    fn is_self_vote(&self) -> bool {
        self.voter_id == self.pro_user_id || self.voter_id == self.con_user_id
    }
}

/// A validated vote with one resolved winner per category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoteRow {
    pub debate_id: String,
    pub pro_user_id: String,
    pub con_user_id: String,
    pub voter_id: String,
    pub agreed_before: String,
    pub agreed_after: String,
    pub better_conduct: String,
    pub better_spelling_and_grammar: String,
    pub more_convincing_arguments: String,
    pub most_reliable_sources: String,
    pub flipped: bool,
}

impl VoteRow {
    fn from_ballot(ballot: &BallotRow) -> Self {
        let agreed_before = ballot.winner(VoteCategory::AgreedBefore).to_string();
        let agreed_after = ballot.winner(VoteCategory::AgreedAfter).to_string();
        Self {
            debate_id: ballot.debate_id.clone(),
            pro_user_id: ballot.pro_user_id.clone(),
            con_user_id: ballot.con_user_id.clone(),
            voter_id: ballot.voter_id.clone(),
            flipped: agreed_before != agreed_after,
            agreed_before,
            agreed_after,
            better_conduct: ballot.winner(VoteCategory::BetterConduct).to_string(),
            better_spelling_and_grammar: ballot
                .winner(VoteCategory::BetterSpellingAndGrammar)
                .to_string(),
            more_convincing_arguments: ballot
                .winner(VoteCategory::MoreConvincingArguments)
                .to_string(),
            most_reliable_sources: ballot.winner(VoteCategory::MostReliableSources).to_string(),
        }
    }

    pub fn winner(&self, category: VoteCategory) -> &str {
        match category {
            VoteCategory::AgreedBefore => &self.agreed_before,
            VoteCategory::AgreedAfter => &self.agreed_after,
            VoteCategory::BetterConduct => &self.better_conduct,
            VoteCategory::BetterSpellingAndGrammar => &self.better_spelling_and_grammar,
            VoteCategory::MoreConvincingArguments => &self.more_convincing_arguments,
            VoteCategory::MostReliableSources => &self.most_reliable_sources,
        }
    }

    /// Winner of `category` expressed as a side label.
    pub fn outcome(&self, category: VoteCategory) -> Label {
        let winner = self.winner(category);
        if winner == self.pro_user_id {
            Label::Pro
        } else if winner == self.con_user_id {
            Label::Con
        } else {
            Label::Tie
        }
    }
}

/// Flatten the ballots of one debate.
///
/// Ballots whose participant columns are not exactly this debate's two
/// participants belong to another ballot layout and are skipped.
pub fn extract_ballots(
    debate_id: &str,
    participants: &Participants,
    votes: &[RawVote],
) -> Vec<BallotRow> {
    let mut rows = Vec::with_capacity(votes.len());
    for vote in votes {
        let keys: Vec<&str> = vote.participant_keys().collect();
        let matches_debate = keys.len() == 2
            && keys.contains(&participants.pro_user_id.as_str())
            && keys.contains(&participants.con_user_id.as_str());
        if !matches_debate {
            debug!(
                debate_id,
                voter = %vote.user_name,
                columns = keys.len(),
                "Skipping malformed ballot"
            );
            continue;
        }

        let flags = |participant: &str| {
            VoteCategory::ALL.map(|c| vote.is_checked(participant, c.caption()))
        };
        rows.push(BallotRow {
            debate_id: debate_id.to_string(),
            pro_user_id: participants.pro_user_id.clone(),
            con_user_id: participants.con_user_id.clone(),
            voter_id: vote.user_name.clone(),
            pro_votes: flags(&participants.pro_user_id),
            con_votes: flags(&participants.con_user_id),
        });
    }
    rows
}

/// Fail if any ballot checks both sides of a category.
///
/// Such a ballot means the export does not follow the ballot rules the
/// statistics rely on, so the whole build stops instead of dropping rows.
pub fn validate_ballots(ballots: &[BallotRow]) -> Result<()> {
    let mut invalid = ballots.iter().filter(|b| !b.is_valid());
    if let Some(first) = invalid.next() {
        return Err(DebateGptError::InvalidVotes {
            count: 1 + invalid.count(),
            debate_id: first.debate_id.clone(),
            voter_id: first.voter_id.clone(),
        });
    }
    Ok(())
}

/// Resolve validated ballots into votes, dropping votes cast by a participant.
pub fn resolve_votes(ballots: &[BallotRow]) -> Vec<VoteRow> {
    ballots
        .iter()
        .filter(|b| !b.is_self_vote())
        .map(VoteRow::from_ballot)
        .collect()
}

/// Build the votes table from the raw export.
pub fn create_votes(raw: &[(String, RawDebate)]) -> Result<Vec<VoteRow>> {
    let mut ballots = Vec::new();
    for (debate_id, debate) in raw {
        let participants = resolve_participants(debate_id, debate)?;
        ballots.extend(extract_ballots(debate_id, &participants, &debate.votes));
    }
    validate_ballots(&ballots)?;
    let votes = resolve_votes(&ballots);
    info!(
        ballots = ballots.len(),
        votes = votes.len(),
        self_votes = ballots.len() - votes.len(),
        "Built votes table"
    );
    Ok(votes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn ballot(voter: &str, pro: &[&str], con: &[&str]) -> Value {
        let flags = |checked: &[&str]| {
            let mut map = serde_json::Map::new();
            for c in VoteCategory::ALL {
                map.insert(c.caption().to_string(), json!(checked.contains(&c.caption())));
            }
            Value::Object(map)
        };
        json!({
            "user_name": voter,
            "votes_map": {"alice": flags(pro), "bob": flags(con), "Tie": flags(&[])}
        })
    }

    fn debate(votes: Vec<Value>) -> (String, RawDebate) {
        let raw = serde_json::from_value(json!({
            "participant_1_name": "alice",
            "participant_1_position": "Pro",
            "participant_2_name": "bob",
            "participant_2_position": "Con",
            "votes": votes
        }))
        .unwrap();
        ("1".to_string(), raw)
    }

    const BEFORE: &str = "Agreed with before the debate";
    const AFTER: &str = "Agreed with after the debate";
    const ARGS: &str = "Made more convincing arguments";

    #[test]
    fn test_resolves_winners() {
        let raw = debate(vec![ballot("carol", &[BEFORE, ARGS], &[AFTER])]);
        let votes = create_votes(&[raw]).unwrap();
        assert_eq!(votes.len(), 1);
        let v = &votes[0];
        assert_eq!(v.agreed_before, "alice");
        assert_eq!(v.agreed_after, "bob");
        assert_eq!(v.more_convincing_arguments, "alice");
        assert_eq!(v.better_conduct, TIE);
        assert!(v.flipped);
        assert_eq!(v.outcome(VoteCategory::AgreedAfter), Label::Con);
        assert_eq!(v.outcome(VoteCategory::MostReliableSources), Label::Tie);
    }

    #[test]
    fn test_winner_is_total() {
        let raw = debate(vec![
            ballot("carol", &[BEFORE], &[]),
            ballot("dave", &[], &[BEFORE, AFTER]),
            ballot("erin", &[], &[]),
        ]);
        let votes = create_votes(&[raw]).unwrap();
        for v in &votes {
            for c in VoteCategory::ALL {
                let w = v.winner(c);
                assert!(w == "alice" || w == "bob" || w == TIE);
            }
        }
    }

    #[test]
    fn test_tie_change_counts_as_flip() {
        let raw = debate(vec![
            ballot("carol", &[], &[AFTER]),
            ballot("dave", &[], &[]),
        ]);
        let votes = create_votes(&[raw]).unwrap();
        assert!(votes[0].flipped);
        assert!(!votes[1].flipped);
    }

    #[test]
    fn test_both_sides_checked_is_fatal() {
        let raw = debate(vec![
            ballot("carol", &[ARGS], &[ARGS]),
            ballot("dave", &[BEFORE], &[BEFORE]),
            ballot("erin", &[BEFORE], &[]),
        ]);
        match create_votes(&[raw]) {
            Err(DebateGptError::InvalidVotes { count, voter_id, .. }) => {
                assert_eq!(count, 2);
                assert_eq!(voter_id, "carol");
            }
            other => panic!("expected InvalidVotes, got {other:?}"),
        }
    }

    #[test]
    fn test_self_votes_are_dropped() {
        let raw = debate(vec![
            ballot("alice", &[BEFORE, AFTER], &[]),
            ballot("bob", &[], &[ARGS]),
            ballot("carol", &[ARGS], &[]),
        ]);
        let votes = create_votes(&[raw]).unwrap();
        assert_eq!(votes.len(), 1);
        assert!(votes.iter().all(|v| v.voter_id != "alice" && v.voter_id != "bob"));
    }

    #[test]
    fn test_ballot_for_other_participants_is_skipped() {
        let mut stray = ballot("carol", &[ARGS], &[]);
        stray["votes_map"]["zed"] = json!({});
        let mut missing = ballot("dave", &[ARGS], &[]);
        missing["votes_map"].as_object_mut().unwrap().remove("bob");
        let raw = debate(vec![stray, missing, ballot("erin", &[], &[ARGS])]);
        let votes = create_votes(&[raw]).unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].voter_id, "erin");
    }

    #[test]
    fn test_ballot_validity() {
        let mut row = BallotRow {
            debate_id: "1".into(),
            pro_user_id: "alice".into(),
            con_user_id: "bob".into(),
            voter_id: "carol".into(),
            pro_votes: [false; 6],
            con_votes: [false; 6],
        };
        assert!(row.is_valid());
        row.pro_votes[3] = true;
        assert!(row.is_valid());
        row.con_votes[3] = true;
        assert!(!row.is_valid());
    }
}
