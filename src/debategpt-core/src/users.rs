//! The users table: demographics, big-issue stances and activity counters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::export::RawUser;

/// Profile values the platform shows when a user did not disclose an attribute.
pub const DEFAULT_PLACEHOLDERS: [&str; 4] =
    ["- Private -", "Not Saying", "Prefer not to say", "No Answer"];

/// A user's declared stance on a big issue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IssueStance {
    Pro,
    Con,
    Undecided,
    NoOpinion,
    /// An answer in a code this crate does not know. Counted, never narrated.
    Unrecognized,
}

impl IssueStance {
    /// Parse the platform code. Only `N/S` (not saying) is unanswered.
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "N/S" => None,
            "Pro" => Some(IssueStance::Pro),
            "Con" => Some(IssueStance::Con),
            "Und" => Some(IssueStance::Undecided),
            "N/O" => Some(IssueStance::NoOpinion),
            _ => Some(IssueStance::Unrecognized),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub user_id: String,
    /// Configured demographic columns; `None` is an undisclosed value.
    pub demographics: BTreeMap<String, Option<String>>,
    pub num_demographics: usize,
    /// Answered big issues keyed by column name (`drug_legalization`).
    pub big_issues: BTreeMap<String, IssueStance>,
    pub num_big_issues: usize,
    pub number_of_all_debates: u64,
    pub number_of_won_debates: u64,
    pub number_of_voted_debates: u64,
    /// Debates authored plus debates voted on.
    pub number_participated: u64,
}

impl UserRecord {
    pub fn demographic(&self, column: &str) -> Option<&str> {
        self.demographics.get(column).and_then(|v| v.as_deref())
    }

    pub fn issue(&self, column: &str) -> Option<IssueStance> {
        self.big_issues.get(column).copied()
    }
}

/// Column name for a big issue caption: lower-cased, spaces to underscores.
pub fn issue_column(caption: &str) -> String {
    caption.to_lowercase().replace(' ', "_")
}

/// Human-readable name for a column: underscores to spaces, title-cased.
pub fn column_label(column: &str) -> String {
    column
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Build the users table from the raw export.
pub fn create_users(
    raw: &[(String, RawUser)],
    demographic_columns: &[String],
    placeholders: &[String],
) -> Vec<UserRecord> {
    let users: Vec<UserRecord> = raw
        .iter()
        .map(|(user_id, user)| {
            let demographics: BTreeMap<String, Option<String>> = demographic_columns
                .iter()
                .map(|column| {
                    let value = user
                        .attribute(column)
                        .map(str::trim)
                        .filter(|v| !v.is_empty() && !placeholders.iter().any(|p| p == v))
                        .map(str::to_string);
                    (column.clone(), value)
                })
                .collect();
            let num_demographics = demographics.values().filter(|v| v.is_some()).count();

            let big_issues: BTreeMap<String, IssueStance> = user
                .big_issues_dict
                .iter()
                .filter_map(|(caption, code)| {
                    let stance = IssueStance::parse(code.as_deref()?)?;
                    Some((issue_column(caption), stance))
                })
                .collect();

            UserRecord {
                user_id: user_id.clone(),
                num_demographics,
                num_big_issues: big_issues.len(),
                demographics,
                big_issues,
                number_of_all_debates: user.number_of_all_debates,
                number_of_won_debates: user.number_of_won_debates,
                number_of_voted_debates: user.number_of_voted_debates,
                number_participated: user.number_of_all_debates + user.number_of_voted_debates,
            }
        })
        .collect();

    info!(users = users.len(), "Built users table");
    users
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn placeholders() -> Vec<String> {
        DEFAULT_PLACEHOLDERS.iter().map(|s| s.to_string()).collect()
    }

    fn columns() -> Vec<String> {
        ["gender", "party", "religious_ideology", "income"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_create_users() {
        let raw: RawUser = serde_json::from_value(json!({
            "gender": "Male",
            "party": "Not Saying",
            "religious_ideology": "Atheist",
            "big_issues_dict": {
                "Abortion": "Con",
                "Drug Legalization": "N/S",
                "Gay Marriage": "Und",
                "Global Warming Exists": "N/O"
            },
            "number_of_all_debates": 3,
            "number_of_won_debates": 1,
            "number_of_voted_debates": 10
        }))
        .unwrap();
        let users = create_users(&[("joe".to_string(), raw)], &columns(), &placeholders());
        let u = &users[0];
        assert_eq!(u.num_demographics, 2);
        assert_eq!(u.demographic("gender"), Some("Male"));
        assert_eq!(u.demographic("party"), None);
        assert_eq!(u.demographic("income"), None);
        assert_eq!(u.num_big_issues, 3);
        assert_eq!(u.issue("abortion"), Some(IssueStance::Con));
        assert_eq!(u.issue("drug_legalization"), None);
        assert_eq!(u.issue("global_warming_exists"), Some(IssueStance::NoOpinion));
        assert_eq!(u.number_participated, 13);
    }

    #[test]
    fn test_unknown_stance_codes_are_counted() {
        let raw: RawUser = serde_json::from_value(json!({
            "big_issues_dict": {
                "Abortion": "Pro",
                "Border Fence": "Maybe",
                "Drug Legalization": "N/S",
                "Gay Marriage": null
            }
        }))
        .unwrap();
        let users = create_users(&[("joe".to_string(), raw)], &columns(), &placeholders());
        let u = &users[0];
        assert_eq!(u.num_big_issues, 2);
        assert_eq!(u.issue("border_fence"), Some(IssueStance::Unrecognized));
        assert_eq!(u.issue("drug_legalization"), None);
        assert_eq!(u.issue("gay_marriage"), None);
    }

    #[test]
    fn test_column_label() {
        assert_eq!(column_label("political_ideology"), "Political Ideology");
        assert_eq!(column_label("gender"), "Gender");
        assert_eq!(column_label("drug_legalization"), "Drug Legalization");
    }
}
