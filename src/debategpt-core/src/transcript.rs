//! Token-budgeted debate transcripts.
//!
//! A transcript is the round-keyed structure
//! `{"Round 0": {"Pro": "...", "Con": "..."}, "Round 1": {...}}` serialized as
//! compact JSON with `", "`/`": "` separators and every non-ASCII character
//! escaped as `\uXXXX`. Token counts are taken on that exact text.

use std::io;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::ser::Formatter;
use tracing::debug;

use crate::error::Result;
use crate::participant::Side;
use crate::rounds::RoundRow;
use crate::tokens::TokenCounter;

/// The debate turns that fit in a prompt, grouped by round in speaking order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    rounds: Vec<(String, Vec<(Side, String)>)>,
}

impl Transcript {
    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    /// Number of rounds kept.
    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    /// Add a turn. A side speaking twice in one round keeps its latest text.
    fn push(&mut self, row: &RoundRow) {
        let key = format!("Round {}", row.round);
        let turns = match self.rounds.iter().position(|(k, _)| *k == key) {
            Some(idx) => &mut self.rounds[idx].1,
            None => {
                self.rounds.push((key, Vec::with_capacity(2)));
                let last = self.rounds.len() - 1;
                &mut self.rounds[last].1
            }
        };
        match turns.iter_mut().find(|(side, _)| *side == row.side) {
            Some((_, text)) => *text = row.text.clone(),
            None => turns.push((row.side, row.text.clone())),
        }
    }

    fn pop_round(&mut self) {
        self.rounds.pop();
    }

    /// Serialized form used in prompts.
    pub fn to_json(&self) -> Result<String> {
        to_ascii_json(self)
    }
}

struct RoundTurns<'a>(&'a [(Side, String)]);

impl Serialize for RoundTurns<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (side, text) in self.0 {
            map.serialize_entry(side.display_name(), text)?;
        }
        map.end()
    }
}

impl Serialize for Transcript {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.rounds.len()))?;
        for (key, turns) in &self.rounds {
            map.serialize_entry(key, &RoundTurns(turns))?;
        }
        map.end()
    }
}

/// Compact JSON with spaced separators and ASCII-only output.
#[derive(Debug, Default, Clone, Copy)]
pub struct AsciiSpacedFormatter;

impl Formatter for AsciiSpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        let mut start = 0;
        for (idx, ch) in fragment.char_indices() {
            if (' '..='~').contains(&ch) {
                continue;
            }
            writer.write_all(fragment[start..idx].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = idx + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

/// Serialize `value` with [`AsciiSpacedFormatter`].
pub fn to_ascii_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, AsciiSpacedFormatter);
    value.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Builds the longest transcript prefix that fits a token ceiling.
pub struct TranscriptBuilder<'a> {
    counter: &'a dyn TokenCounter,
    max_debate_tokens: usize,
}

impl<'a> TranscriptBuilder<'a> {
    pub fn new(counter: &'a dyn TokenCounter, max_debate_tokens: usize) -> Self {
        Self {
            counter,
            max_debate_tokens,
        }
    }

    fn count(&self, transcript: &Transcript) -> Result<usize> {
        Ok(self.counter.count(&transcript.to_json()?))
    }

    /// Build from a debate's turns, which must be in `order`.
    ///
    /// Turns are added until the serialized transcript reaches the ceiling.
    /// While it is above the ceiling, the last round is removed whole. An
    /// empty transcript means nothing fits.
    pub fn build(&self, turns: &[RoundRow]) -> Result<Transcript> {
        let mut transcript = Transcript::default();
        for row in turns {
            transcript.push(row);
            if self.count(&transcript)? >= self.max_debate_tokens {
                break;
            }
        }

        while !transcript.is_empty() && self.count(&transcript)? > self.max_debate_tokens {
            transcript.pop_round();
        }

        debug!(
            rounds = transcript.len(),
            max_debate_tokens = self.max_debate_tokens,
            "Built transcript"
        );
        Ok(transcript)
    }
}
