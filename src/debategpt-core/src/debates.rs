//! The debates table: one row of metadata per debate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::deserialize_id;
use crate::error::{DebateGptError, Result};
use crate::export::RawDebate;
use crate::participant::{Participants, Side};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebateRecord {
    pub debate_id: String,
    pub pro_user_id: String,
    pub con_user_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Platform date, `MM/DD/YYYY`.
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposition: Option<String>,
}

impl DebateRecord {
    pub fn participants(&self) -> Participants {
        Participants::new(&self.pro_user_id, &self.con_user_id)
    }
}

/// Hand-written proposition for a debate, as stored in the propositions file.
#[derive(Debug, Clone, Deserialize)]
pub struct PropositionEntry {
    #[serde(deserialize_with = "deserialize_id")]
    pub debate_id: String,
    pub proposition: String,
}

/// Work out who argues Pro and who argues Con.
///
/// The export lists participants with a position each; anything other than
/// exactly one `Pro` and one `Con` means the export schema is not the one this
/// pipeline understands.
pub fn resolve_participants(debate_id: &str, raw: &RawDebate) -> Result<Participants> {
    let first = Side::parse(&raw.participant_1_position);
    let second = Side::parse(&raw.participant_2_position);
    match (first, second) {
        (Some(Side::Pro), Some(Side::Con)) => Ok(Participants::new(
            &raw.participant_1_name,
            &raw.participant_2_name,
        )),
        (Some(Side::Con), Some(Side::Pro)) => Ok(Participants::new(
            &raw.participant_2_name,
            &raw.participant_1_name,
        )),
        _ => Err(DebateGptError::DataIntegrity(format!(
            "debate {debate_id} has positions '{}'/'{}', expected one Pro and one Con",
            raw.participant_1_position, raw.participant_2_position
        ))),
    }
}

/// Build the debates table from the raw export.
pub fn create_debates(raw: &[(String, RawDebate)]) -> Result<Vec<DebateRecord>> {
    raw.iter()
        .map(|(debate_id, debate)| {
            let participants = resolve_participants(debate_id, debate)?;
            Ok(DebateRecord {
                debate_id: debate_id.clone(),
                pro_user_id: participants.pro_user_id,
                con_user_id: participants.con_user_id,
                title: debate.title.clone(),
                category: debate.category.clone(),
                start_date: debate.start_date.clone(),
                proposition: None,
            })
        })
        .collect()
}

/// Join propositions onto `debates`.
///
/// Debates without a usable proposition are left out: entries marked `drop`
/// or `skip` were judged unsuitable by the annotators.
pub fn attach_propositions(
    debates: &[DebateRecord],
    propositions: &[PropositionEntry],
) -> Vec<DebateRecord> {
    let usable: HashMap<&str, &str> = propositions
        .iter()
        .filter(|p| {
            let lowered = p.proposition.trim().to_lowercase();
            lowered != "drop" && lowered != "skip"
        })
        .map(|p| (p.debate_id.as_str(), p.proposition.as_str()))
        .collect();

    let joined: Vec<DebateRecord> = debates
        .iter()
        .filter_map(|d| {
            usable.get(d.debate_id.as_str()).map(|prop| DebateRecord {
                proposition: Some(prop.to_string()),
                ..d.clone()
            })
        })
        .collect();

    debug!(
        debates = debates.len(),
        with_proposition = joined.len(),
        "Attached propositions"
    );
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(p1_pos: &str, p2_pos: &str) -> RawDebate {
        serde_json::from_value(json!({
            "participant_1_name": "alice",
            "participant_1_position": p1_pos,
            "participant_2_name": "bob",
            "participant_2_position": p2_pos,
            "category": "Politics",
            "start_date": "10/3/2012"
        }))
        .unwrap()
    }

    #[test]
    fn test_create_debates() {
        let debates = create_debates(&[("7".to_string(), raw("Pro", "Con"))]).unwrap();
        assert_eq!(debates.len(), 1);
        assert_eq!(debates[0].pro_user_id, "alice");
        assert_eq!(debates[0].con_user_id, "bob");
        assert_eq!(debates[0].category.as_deref(), Some("Politics"));
    }

    #[test]
    fn test_swapped_positions() {
        let p = resolve_participants("1", &raw("Con", "Pro")).unwrap();
        assert_eq!(p.pro_user_id, "bob");
        assert_eq!(p.con_user_id, "alice");
    }

    #[test]
    fn test_invalid_positions_are_fatal() {
        let err = create_debates(&[("1".to_string(), raw("Pro", "Pro"))]).unwrap_err();
        assert!(matches!(err, DebateGptError::DataIntegrity(_)));
    }

    #[test]
    fn test_attach_propositions_skips_drop_and_skip() {
        let debates = create_debates(&[
            ("1".to_string(), raw("Pro", "Con")),
            ("2".to_string(), raw("Pro", "Con")),
            ("3".to_string(), raw("Pro", "Con")),
        ])
        .unwrap();
        let props: Vec<PropositionEntry> = serde_json::from_value(json!([
            {"debate_id": 1, "proposition": "abortion should be legal"},
            {"debate_id": "2", "proposition": "Drop"},
            {"debate_id": 3, "proposition": "skip"}
        ]))
        .unwrap();
        let joined = attach_propositions(&debates, &props);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].debate_id, "1");
        assert_eq!(
            joined[0].proposition.as_deref(),
            Some("abortion should be legal")
        );
    }
}
