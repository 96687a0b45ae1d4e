//! Debate sides and the participant pair behind them.

use serde::{Deserialize, Serialize};

/// Side a participant argues for the whole debate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    /// Arguing in favor of the proposition.
    Pro,
    /// Arguing against the proposition.
    Con,
}

impl Side {
    pub fn display_name(&self) -> &'static str {
        match self {
            Side::Pro => "Pro",
            Side::Con => "Con",
        }
    }

    /// Parse the platform's side caption. Anything other than `Pro`/`Con` is rejected.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pro" => Some(Side::Pro),
            "Con" => Some(Side::Con),
            _ => None,
        }
    }
}

/// The two debaters of a debate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participants {
    pub pro_user_id: String,
    pub con_user_id: String,
}

impl Participants {
    pub fn new(pro_user_id: impl Into<String>, con_user_id: impl Into<String>) -> Self {
        Self {
            pro_user_id: pro_user_id.into(),
            con_user_id: con_user_id.into(),
        }
    }

    /// User id arguing `side`.
    pub fn user_for(&self, side: Side) -> &str {
        match side {
            Side::Pro => &self.pro_user_id,
            Side::Con => &self.con_user_id,
        }
    }

    /// Side argued by `user_id`, if they are one of the debaters.
    pub fn side_of(&self, user_id: &str) -> Option<Side> {
        if user_id == self.pro_user_id {
            Some(Side::Pro)
        } else if user_id == self.con_user_id {
            Some(Side::Con)
        } else {
            None
        }
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.side_of(user_id).is_some()
    }
}
