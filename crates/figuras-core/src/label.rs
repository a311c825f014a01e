//! Rhetorical-figure labels.
//!
//! The label set is closed: the structured-output schema enumerates the
//! same values, and anything else is rejected at deserialization time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a string does not name a known figure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown figure label: {0}")]
pub struct UnknownLabel(pub String);

/// A rhetorical figure of speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    #[serde(rename = "metafora")]
    Metafora,
    #[serde(rename = "metonimia")]
    Metonimia,
    #[serde(rename = "hiperbole")]
    Hiperbole,
    #[serde(rename = "ironia")]
    Ironia,
    #[serde(rename = "sarcasmo")]
    Sarcasmo,
    #[serde(rename = "antitese")]
    Antitese,
    #[serde(rename = "paradoxo")]
    Paradoxo,
    #[serde(rename = "anafora")]
    Anafora,
    #[serde(rename = "aliteracao")]
    Aliteracao,
    #[serde(rename = "eufemismo")]
    Eufemismo,
    #[serde(rename = "gradacao")]
    Gradacao,
    #[serde(rename = "prosopopeia")]
    Prosopopeia,
    #[serde(rename = "pergunta_retórica", alias = "pergunta_retorica")]
    PerguntaRetorica,
    #[serde(rename = "apelo_popular")]
    ApeloPopular,
    #[serde(rename = "analogia")]
    Analogia,
    #[serde(rename = "assonancia")]
    Assonancia,
    #[serde(rename = "pleonasmo")]
    Pleonasmo,
}

impl Label {
    /// Every label, in declaration order.
    pub const ALL: [Label; 17] = [
        Label::Metafora,
        Label::Metonimia,
        Label::Hiperbole,
        Label::Ironia,
        Label::Sarcasmo,
        Label::Antitese,
        Label::Paradoxo,
        Label::Anafora,
        Label::Aliteracao,
        Label::Eufemismo,
        Label::Gradacao,
        Label::Prosopopeia,
        Label::PerguntaRetorica,
        Label::ApeloPopular,
        Label::Analogia,
        Label::Assonancia,
        Label::Pleonasmo,
    ];

    /// Labels the annotation model may emit.
    ///
    /// `sarcasmo` only appears in hand-curated references, so it is left
    /// out of the structured-output enum.
    pub fn annotatable() -> impl Iterator<Item = Label> {
        Self::ALL.into_iter().filter(|l| *l != Label::Sarcasmo)
    }

    /// Wire name used in JSON payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Metafora => "metafora",
            Label::Metonimia => "metonimia",
            Label::Hiperbole => "hiperbole",
            Label::Ironia => "ironia",
            Label::Sarcasmo => "sarcasmo",
            Label::Antitese => "antitese",
            Label::Paradoxo => "paradoxo",
            Label::Anafora => "anafora",
            Label::Aliteracao => "aliteracao",
            Label::Eufemismo => "eufemismo",
            Label::Gradacao => "gradacao",
            Label::Prosopopeia => "prosopopeia",
            Label::PerguntaRetorica => "pergunta_retórica",
            Label::ApeloPopular => "apelo_popular",
            Label::Analogia => "analogia",
            Label::Assonancia => "assonancia",
            Label::Pleonasmo => "pleonasmo",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept the unaccented spelling as well; model output is not always faithful.
        let wanted = s.trim();
        if wanted == "pergunta_retorica" {
            return Ok(Label::PerguntaRetorica);
        }
        Self::ALL
            .into_iter()
            .find(|l| l.as_str() == wanted)
            .ok_or_else(|| UnknownLabel(s.to_string()))
    }
}
