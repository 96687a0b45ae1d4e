//! Mapping free-text model output onto the answer labels.
//!
//! Classification runs in stages, stopping at the first that decides:
//!
//! 1. the whole response is one of `pro`/`con`/`tie` (any case);
//! 2. exactly one of the three labels occurs as a whole word;
//! 3. none of them occurs at all, which means `Other`;
//! 4. an explicit phrase such as "my answer is con" names the label;
//! 5. an [`AmbiguityResolver`] decides. The default resolver answers `Other`.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Answer label shared by votes, ground truth and model responses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Label {
    Pro,
    Con,
    Tie,
    Other,
}

impl Label {
    /// Labels a model is allowed to answer with.
    pub const ANSWERS: [Label; 3] = [Label::Pro, Label::Con, Label::Tie];
    /// Every label, in confusion-matrix order.
    pub const ALL: [Label; 4] = [Label::Pro, Label::Con, Label::Tie, Label::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Pro => "Pro",
            Label::Con => "Con",
            Label::Tie => "Tie",
            Label::Other => "Other",
        }
    }

    /// Parse a canonical label string. Case-sensitive.
    pub fn from_canonical(value: &str) -> Option<Self> {
        Label::ALL.into_iter().find(|l| l.as_str() == value)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stage of the normalizer produced a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPath {
    Exact,
    SingleLabel,
    NoLabel,
    Phrase,
    Resolver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub label: Label,
    pub path: MatchPath,
}

/// Decides responses that mention several labels without a decisive phrase.
pub trait AmbiguityResolver: Send + Sync {
    fn resolve(&self, text: &str) -> Label;
}

/// Deterministic fallback: ambiguous answers count as `Other`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OtherResolver;

impl AmbiguityResolver for OtherResolver {
    fn resolve(&self, _text: &str) -> Label {
        Label::Other
    }
}

static LABEL_WORDS: LazyLock<[(Label, Regex); 3]> = LazyLock::new(|| {
    [
        (Label::Pro, Regex::new(r"(?i)\bpro\b").unwrap()),
        (Label::Con, Regex::new(r"(?i)\bcon\b").unwrap()),
        (Label::Tie, Regex::new(r"(?i)\btie\b").unwrap()),
    ]
});

static PHRASES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\bagree with the (pro|con|tie) side\b").unwrap(),
        Regex::new(r#"(?i)\bmy answer is:?\s*["']?(pro|con|tie)\b"#).unwrap(),
    ]
});

pub struct ResponseNormalizer {
    resolver: Box<dyn AmbiguityResolver>,
}

impl Default for ResponseNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseNormalizer {
    pub fn new() -> Self {
        Self {
            resolver: Box::new(OtherResolver),
        }
    }

    /// Replace the fallback used for ambiguous responses.
    pub fn with_resolver(mut self, resolver: Box<dyn AmbiguityResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn normalize(&self, text: &str) -> Label {
        self.classify(text).label
    }

    pub fn classify(&self, text: &str) -> Classification {
        let trimmed = text.trim();
        if let Some(label) = exact_label(trimmed) {
            return Classification {
                label,
                path: MatchPath::Exact,
            };
        }

        let present: Vec<Label> = LABEL_WORDS
            .iter()
            .filter(|(_, re)| re.is_match(trimmed))
            .map(|(label, _)| *label)
            .collect();

        match present.as_slice() {
            [only] => Classification {
                label: *only,
                path: MatchPath::SingleLabel,
            },
            [] => Classification {
                label: Label::Other,
                path: MatchPath::NoLabel,
            },
            _ => match phrase_label(trimmed) {
                Some(label) => Classification {
                    label,
                    path: MatchPath::Phrase,
                },
                None => Classification {
                    label: self.resolver.resolve(trimmed),
                    path: MatchPath::Resolver,
                },
            },
        }
    }
}

fn exact_label(text: &str) -> Option<Label> {
    match text.to_lowercase().as_str() {
        "pro" => Some(Label::Pro),
        "con" => Some(Label::Con),
        "tie" => Some(Label::Tie),
        _ => None,
    }
}

fn phrase_label(text: &str) -> Option<Label> {
    PHRASES.iter().find_map(|re| {
        re.captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| exact_label(m.as_str()))
    })
}

/// Text after the last `Answer:` marker of a reasoning response.
///
/// Responses without the marker are returned whole.
pub fn extract_reasoned_answer(text: &str) -> &str {
    const MARKER: &str = "answer:";
    match text.to_ascii_lowercase().rfind(MARKER) {
        Some(idx) => text[idx + MARKER.len()..].trim(),
        None => text.trim(),
    }
}
