//! Account identity and political alignment, as cached from the account service.

use crate::domain::{AccountId, TimeMs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Persona type of an account. Closed set: unknown values fail validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonaType {
    Politician,
    Influencer,
    Journalist,
    Activist,
    Business,
    Entertainer,
}

impl PersonaType {
    pub const ALL: [PersonaType; 6] = [
        PersonaType::Politician,
        PersonaType::Influencer,
        PersonaType::Journalist,
        PersonaType::Activist,
        PersonaType::Business,
        PersonaType::Entertainer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PersonaType::Politician => "politician",
            PersonaType::Influencer => "influencer",
            PersonaType::Journalist => "journalist",
            PersonaType::Activist => "activist",
            PersonaType::Business => "business",
            PersonaType::Entertainer => "entertainer",
        }
    }
}

impl FromStr for PersonaType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PersonaType::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim().to_ascii_lowercase())
            .ok_or(())
    }
}

impl std::fmt::Display for PersonaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Political alignment. Positions and dispositions are on a 0..=100 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoliticalAlignment {
    pub economic_position: f64,
    pub social_position: f64,
    #[serde(default)]
    pub primary_issues: BTreeSet<String>,
    #[serde(default = "neutral_position")]
    pub debate_willingness: f64,
    #[serde(default = "neutral_position")]
    pub controversy_tolerance: f64,
}

fn neutral_position() -> f64 {
    50.0
}

impl PoliticalAlignment {
    /// Centre of both axes.
    pub fn neutral() -> Self {
        Self {
            economic_position: 50.0,
            social_position: 50.0,
            primary_issues: BTreeSet::new(),
            debate_willingness: 50.0,
            controversy_tolerance: 50.0,
        }
    }

    /// Validate every scalar lies in [0, 100].
    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("economicPosition", self.economic_position),
            ("socialPosition", self.social_position),
            ("debateWillingness", self.debate_willingness),
            ("controversyTolerance", self.controversy_tolerance),
        ];
        for (name, value) in fields {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(format!("{} must be within [0, 100]", name));
            }
        }
        Ok(())
    }

    /// Euclidean distance on the (economic, social) plane, rescaled to [0, 100].
    pub fn distance(&self, other: &PoliticalAlignment) -> f64 {
        let de = self.economic_position - other.economic_position;
        let ds = self.social_position - other.social_position;
        (de * de + ds * ds).sqrt() / std::f64::consts::SQRT_2
    }

    /// Signed lean in [-1, 1]: negative for left/liberal, positive for right/conservative.
    pub fn bias(&self) -> f64 {
        (((self.economic_position + self.social_position) / 2.0 - 50.0) / 50.0).clamp(-1.0, 1.0)
    }
}

/// Read-only cached copy of an account, keyed by id and alignment version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProfile {
    pub id: AccountId,
    pub persona_type: PersonaType,
    pub alignment: PoliticalAlignment,
    pub alignment_version: u32,
    pub effective_at: TimeMs,
}
