//! Round extraction: one row per turn, in speaking order, with token counts.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::debates::resolve_participants;
use crate::error::Result;
use crate::export::{RawDebate, RawTurn};
use crate::participant::{Participants, Side};
use crate::tokens::TokenCounter;

/// One side's statement within a round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundRow {
    pub debate_id: String,
    /// Index of the round in the raw export, skipped rounds included.
    pub round: usize,
    /// 1-based position of the turn among the surviving turns of the debate.
    pub order: usize,
    pub user_id: String,
    pub side: Side,
    pub text: String,
    #[serde(default)]
    pub token_count: usize,
    /// Running total of `token_count` within the debate, this row included.
    #[serde(default)]
    pub cum_sum: usize,
}

/// Turn rows of one debate, token fields left at zero.
///
/// Rounds without turns, with more than two turns, or with a turn for an
/// unknown side are skipped; their index is still consumed.
pub fn extract_rounds(
    debate_id: &str,
    participants: &Participants,
    rounds: &[Vec<RawTurn>],
) -> Vec<RoundRow> {
    let mut rows = Vec::new();
    let mut order = 0;
    for (index, turns) in rounds.iter().enumerate() {
        if turns.is_empty() || turns.len() > 2 {
            debug!(debate_id, round = index, turns = turns.len(), "Skipping malformed round");
            continue;
        }
        let Some(sides) = turns
            .iter()
            .map(|t| Side::parse(&t.side))
            .collect::<Option<Vec<Side>>>()
        else {
            debug!(debate_id, round = index, "Skipping round with unknown side");
            continue;
        };

        for (turn, side) in turns.iter().zip(sides) {
            order += 1;
            rows.push(RoundRow {
                debate_id: debate_id.to_string(),
                round: index,
                order,
                user_id: participants.user_for(side).to_string(),
                side,
                text: clean_text(turn.text.as_deref().unwrap_or_default()),
                token_count: 0,
                cum_sum: 0,
            });
        }
    }
    rows
}

fn clean_text(text: &str) -> String {
    text.replace(['\n', '\r'], "")
}

/// Fill `token_count` and the per-debate running `cum_sum`.
///
/// Rows must be grouped by debate and in `order` within each debate, as
/// [`extract_rounds`] produces them.
pub fn add_token_counts(rows: &mut [RoundRow], counter: &dyn TokenCounter) {
    let mut current_debate: Option<String> = None;
    let mut running = 0;
    for row in rows.iter_mut() {
        if current_debate.as_deref() != Some(row.debate_id.as_str()) {
            current_debate = Some(row.debate_id.clone());
            running = 0;
        }
        row.token_count = counter.count(&row.text);
        running += row.token_count;
        row.cum_sum = running;
    }
}

/// Build the rounds table from the raw export.
pub fn create_rounds(
    raw: &[(String, RawDebate)],
    counter: &dyn TokenCounter,
) -> Result<Vec<RoundRow>> {
    let mut rows = Vec::new();
    for (debate_id, debate) in raw {
        let participants = resolve_participants(debate_id, debate)?;
        rows.extend(extract_rounds(debate_id, &participants, &debate.rounds));
    }
    add_token_counts(&mut rows, counter);
    info!(turns = rows.len(), debates = raw.len(), "Built rounds table");
    Ok(rows)
}
