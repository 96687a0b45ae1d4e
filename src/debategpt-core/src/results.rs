//! Model results and the JSON file they accumulate in.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::{deserialize_id, read_json, write_json};
use crate::error::Result;
use crate::normalize::Label;
use crate::prompt::ChatMessage;

/// One prompt sent and the raw response it got.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultRecord {
    #[serde(deserialize_with = "deserialize_id")]
    pub debate_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voter_id: Option<String>,
    pub message: Vec<ChatMessage>,
    pub gpt_response: String,
    /// The voter's recorded stance before the debate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agreed_before: Option<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agreed_after: Option<Label>,
}

/// A result file: a JSON array that new batches are appended to.
#[derive(Debug, Clone)]
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every record in the file; none if the file does not exist yet.
    pub fn load(&self) -> Result<Vec<ResultRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        read_json(&self.path)
    }

    /// Append `records` after the ones already stored.
    pub fn append(&self, records: &[ResultRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut all = self.load()?;
        all.extend_from_slice(records);
        write_json(&self.path, &all)?;
        info!(
            path = %self.path.display(),
            appended = records.len(),
            total = all.len(),
            "Saved results"
        );
        Ok(())
    }

    /// Debates that already have results, used to resume an interrupted run.
    pub fn completed_debate_ids(&self) -> Result<BTreeSet<String>> {
        Ok(self.load()?.into_iter().map(|r| r.debate_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(debate_id: &str, voter_id: Option<&str>) -> ResultRecord {
        ResultRecord {
            debate_id: debate_id.into(),
            voter_id: voter_id.map(str::to_string),
            message: vec![ChatMessage::user("Which side won?")],
            gpt_response: "Pro".into(),
            agreed_before: voter_id.map(|_| Label::Con),
            agreed_after: voter_id.map(|_| Label::Pro),
        }
    }

    #[test]
    fn test_append_keeps_existing_records() {
        let dir = tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("q3.json"));
        assert!(store.load().unwrap().is_empty());

        store.append(&[record("1", Some("carol"))]).unwrap();
        store
            .append(&[record("2", Some("dave")), record("2", Some("erin"))])
            .unwrap();
        store.append(&[]).unwrap();

        let all = store.load().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].voter_id.as_deref(), Some("carol"));
        assert_eq!(all[2].agreed_after, Some(Label::Pro));
        let ids: Vec<String> = store.completed_debate_ids().unwrap().into_iter().collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_reads_numeric_ids_and_skips_absent_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q1.json");
        std::fs::write(
            &path,
            r#"[{"debate_id": 42, "message": [{"role": "system", "content": "judge"}], "gpt_response": "Con"}]"#,
        )
        .unwrap();
        let all = ResultStore::new(&path).load().unwrap();
        assert_eq!(all[0].debate_id, "42");
        assert_eq!(all[0].voter_id, None);

        let json = serde_json::to_value(&all[0]).unwrap();
        assert!(json.get("voter_id").is_none());
        assert!(json.get("agreed_before").is_none());
    }
}
