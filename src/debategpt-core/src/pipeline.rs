//! End-to-end runs over the data directory: building the intermediate tables
//! from the raw export, then filtering them for prompting.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::info;

use crate::comments::{CommentRow, create_comments};
use crate::config::{FiltersConfig, UsersConfig};
use crate::dataset::{
    COMMENTS_FILE, DEBATES_FILE, DEBATES_FILTERED_FILE, ROUNDS_FILE, USERS_FILE, VOTES_FILE,
    VOTES_FILTERED_FILE, read_json, write_json,
};
use crate::debates::{DebateRecord, PropositionEntry, attach_propositions, create_debates};
use crate::error::Result;
use crate::export::{load_raw_debates, load_raw_users};
use crate::filter::{filter_by_rounds, filter_by_votes, filter_votes_by_users};
use crate::rounds::{RoundRow, create_rounds};
use crate::tokens::TokenCounter;
use crate::users::{UserRecord, create_users};
use crate::votes::{VoteRow, create_votes};

/// Row counts of the tables written by [`process_export`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub debates: usize,
    pub users: usize,
    pub votes: usize,
    pub turns: usize,
    pub comments: usize,
}

/// Build every intermediate table from the raw export and write them to `out_dir`.
///
/// Fails without writing anything if the export violates an integrity check.
pub fn process_export(
    debates_path: &Path,
    users_path: &Path,
    out_dir: &Path,
    users_config: &UsersConfig,
    counter: &dyn TokenCounter,
) -> Result<ProcessSummary> {
    let raw_debates = load_raw_debates(debates_path)?;
    let raw_users = load_raw_users(users_path)?;
    info!(
        debates = raw_debates.len(),
        users = raw_users.len(),
        "Loaded raw export"
    );

    let debates = create_debates(&raw_debates)?;
    let votes = create_votes(&raw_debates)?;
    let rounds = create_rounds(&raw_debates, counter)?;
    let comments: Vec<CommentRow> = create_comments(&raw_debates)?;
    let users = create_users(
        &raw_users,
        &users_config.demographic_columns,
        &users_config.placeholders,
    );

    write_json(&out_dir.join(DEBATES_FILE), &debates)?;
    write_json(&out_dir.join(USERS_FILE), &users)?;
    write_json(&out_dir.join(VOTES_FILE), &votes)?;
    write_json(&out_dir.join(ROUNDS_FILE), &rounds)?;
    write_json(&out_dir.join(COMMENTS_FILE), &comments)?;

    Ok(ProcessSummary {
        debates: debates.len(),
        users: users.len(),
        votes: votes.len(),
        turns: rounds.len(),
        comments: comments.len(),
    })
}

/// Sizes at each stage of [`filter_tables`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterSummary {
    pub debates: usize,
    pub with_propositions: usize,
    pub balanced: usize,
    pub enough_votes: usize,
    pub votes: usize,
}

/// Filter the tables in `dir` and write the filtered debates and votes next to them.
///
/// Debates are kept when they have a usable proposition, a balanced
/// transcript and enough votes; votes are kept when they belong to a kept
/// debate and their voter has enough demographics.
pub fn filter_tables(
    dir: &Path,
    propositions_path: &Path,
    filters: &FiltersConfig,
) -> Result<FilterSummary> {
    let debates: Vec<DebateRecord> = read_json(&dir.join(DEBATES_FILE))?;
    let rounds: Vec<RoundRow> = read_json(&dir.join(ROUNDS_FILE))?;
    let votes: Vec<VoteRow> = read_json(&dir.join(VOTES_FILE))?;
    let users: Vec<UserRecord> = read_json(&dir.join(USERS_FILE))?;
    let propositions: Vec<PropositionEntry> = read_json(propositions_path)?;

    let with_propositions = attach_propositions(&debates, &propositions);
    let balanced = filter_by_rounds(
        &rounds,
        &with_propositions,
        filters.percentage,
        filters.min_tokens,
    );
    let kept = filter_by_votes(
        &votes,
        &balanced,
        filters.min_num_votes,
        filters.min_num_flipped_votes,
    );
    let kept_ids: BTreeSet<String> = kept.iter().map(|d| d.debate.debate_id.clone()).collect();
    let kept_votes = filter_votes_by_users(&users, &votes, &kept_ids, filters.min_num_demographics);

    write_json(&dir.join(DEBATES_FILTERED_FILE), &kept)?;
    write_json(&dir.join(VOTES_FILTERED_FILE), &kept_votes)?;

    Ok(FilterSummary {
        debates: debates.len(),
        with_propositions: with_propositions.len(),
        balanced: balanced.len(),
        enough_votes: kept.len(),
        votes: kept_votes.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;
    use crate::dataset::Dataset;
    use crate::tokens::WordCounter;
    use crate::votes::VoteCategory;
    use serde_json::{Value, json};
    use tempfile::tempdir;

    fn ballot(voter: &str, pro: &[VoteCategory], con: &[VoteCategory]) -> Value {
        let flags = |checked: &[VoteCategory]| -> Value {
            VoteCategory::ALL
                .iter()
                .map(|c| (c.caption().to_string(), json!(checked.contains(c))))
                .collect::<serde_json::Map<String, Value>>()
                .into()
        };
        json!({
            "user_name": voter,
            "votes_map": {"alice": flags(pro), "bob": flags(con), "Tie": flags(&[])}
        })
    }

    fn write(path: &Path, value: &Value) {
        std::fs::write(path, serde_json::to_string(value).unwrap()).unwrap();
    }

    fn export(dir: &Path) {
        use VoteCategory::*;
        let debates = json!({
            "1": {
                "participant_1_name": "alice", "participant_1_position": "Pro",
                "participant_2_name": "bob", "participant_2_position": "Con",
                "category": "Education", "start_date": "03/02/2012",
                "rounds": [
                    [{"side": "Pro", "text": "uniforms help students focus"},
                     {"side": "Con", "text": "uniforms limit\nself expression"}],
                    [{"side": "Pro", "text": "they also reduce bullying"},
                     {"side": "Con", "text": "bullying has other causes"}]
                ],
                "votes": [
                    ballot("carol", &[AgreedAfter, MoreConvincingArguments], &[AgreedBefore]),
                    ballot("dave", &[AgreedBefore, AgreedAfter], &[]),
                    ballot("erin", &[], &[MoreConvincingArguments])
                ],
                "comments": [
                    {"user_name": "alice", "comment_text": "thanks"},
                    {"user_name": "carol", "comment_text": "good debate"}
                ]
            },
            "2": {
                "participant_1_name": "bob", "participant_1_position": "Con",
                "participant_2_name": "alice", "participant_2_position": "Pro",
                "rounds": [
                    [{"side": "Pro", "text": "yes"},
                     {"side": "Con", "text": "no because of many reasons that matter"}]
                ],
                "votes": [ballot("carol", &[], &[])]
            }
        });
        let users = json!({
            "carol": {"gender": "Female", "party": "Not Saying",
                      "big_issues_dict": {"Abortion": "Con"}},
            "dave": {"gender": "Male", "religious_ideology": "Atheist"}
        });
        write(&dir.join("debates_raw.json"), &debates);
        write(&dir.join("users_raw.json"), &users);
        write(
            &dir.join("propositions.json"),
            &json!([
                {"debate_id": 1, "proposition": "school uniforms should be mandatory"},
                {"debate_id": 2, "proposition": "skip"}
            ]),
        );
    }

    #[test]
    fn test_process_then_filter() {
        let dir = tempdir().unwrap();
        export(dir.path());
        let out = dir.path().join("tables");
        let config = default_config();

        let summary = process_export(
            &dir.path().join("debates_raw.json"),
            &dir.path().join("users_raw.json"),
            &out,
            &config.users,
            &WordCounter,
        )
        .unwrap();
        assert_eq!(
            summary,
            ProcessSummary {
                debates: 2,
                users: 2,
                votes: 4,
                turns: 6,
                comments: 1,
            }
        );
        let rounds: Vec<RoundRow> = read_json(&out.join(ROUNDS_FILE)).unwrap();
        assert_eq!(rounds[1].text, "uniforms limitself expression");

        let filters = FiltersConfig {
            percentage: 25.0,
            min_tokens: 10,
            min_num_votes: 2,
            min_num_flipped_votes: 0,
            min_num_demographics: 1,
        };
        let summary = filter_tables(&out, &dir.path().join("propositions.json"), &filters).unwrap();
        assert_eq!(
            summary,
            FilterSummary {
                debates: 2,
                with_propositions: 1,
                balanced: 1,
                enough_votes: 1,
                votes: 2,
            }
        );

        let dataset = Dataset::load(&out).unwrap();
        assert_eq!(dataset.debates().len(), 1);
        assert_eq!(
            dataset.debates()[0].proposition.as_deref(),
            Some("school uniforms should be mandatory")
        );
        let voters: Vec<&str> = dataset
            .votes("1")
            .iter()
            .map(|v| v.voter_id.as_str())
            .collect();
        assert_eq!(voters, vec!["carol", "dave"]);
        assert_eq!(
            dataset.user("carol").and_then(|u| u.demographic("party")),
            None
        );
    }

    #[test]
    fn test_process_leaves_no_tables_on_invalid_ballots() {
        let dir = tempdir().unwrap();
        let both = ballot(
            "carol",
            &[VoteCategory::BetterConduct],
            &[VoteCategory::BetterConduct],
        );
        write(
            &dir.path().join("debates_raw.json"),
            &json!({"1": {
                "participant_1_name": "alice", "participant_1_position": "Pro",
                "participant_2_name": "bob", "participant_2_position": "Con",
                "votes": [both]
            }}),
        );
        write(&dir.path().join("users_raw.json"), &json!({}));
        let out = dir.path().join("tables");

        let result = process_export(
            &dir.path().join("debates_raw.json"),
            &dir.path().join("users_raw.json"),
            &out,
            &default_config().users,
            &WordCounter,
        );
        assert!(result.is_err());
        assert!(!out.join(DEBATES_FILE).exists());
    }
}
