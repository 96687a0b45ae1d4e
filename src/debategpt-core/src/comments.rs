//! The comments table.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::debates::resolve_participants;
use crate::error::Result;
use crate::export::RawDebate;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentRow {
    pub debate_id: String,
    pub user_id: String,
    pub text: String,
}

/// Build the comments table. Comments posted by the debaters themselves are left out.
pub fn create_comments(raw: &[(String, RawDebate)]) -> Result<Vec<CommentRow>> {
    let mut rows = Vec::new();
    for (debate_id, debate) in raw {
        let participants = resolve_participants(debate_id, debate)?;
        rows.extend(
            debate
                .comments
                .iter()
                .filter(|c| !participants.is_participant(&c.user_name))
                .map(|c| CommentRow {
                    debate_id: debate_id.clone(),
                    user_id: c.user_name.clone(),
                    text: c.comment_text.clone().unwrap_or_default(),
                }),
        );
    }
    info!(comments = rows.len(), "Built comments table");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_participant_comments_are_dropped() {
        let raw: RawDebate = serde_json::from_value(json!({
            "participant_1_name": "alice",
            "participant_1_position": "Pro",
            "participant_2_name": "bob",
            "participant_2_position": "Con",
            "comments": [
                {"user_name": "alice", "comment_text": "thanks for the debate"},
                {"user_name": "carol", "comment_text": "good points on both sides"},
                {"user_name": "bob", "comment_text": "gg"},
                {"user_name": "dave", "comment_text": null}
            ]
        }))
        .unwrap();
        let rows = create_comments(&[("5".to_string(), raw)]).unwrap();
        let authors: Vec<&str> = rows.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(authors, vec!["carol", "dave"]);
        assert_eq!(rows[1].text, "");
    }
}
