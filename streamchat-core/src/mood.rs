use serde::{Deserialize, Serialize};

/// Emotional register inferred from what the user last wrote.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    /// Stillness; nothing more specific was detected.
    #[default]
    Santa,
    Karuna,
    Adbhuta,
    Raudra,
}

impl Mood {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Santa => "santa",
            Self::Karuna => "karuna",
            Self::Adbhuta => "adbhuta",
            Self::Raudra => "raudra",
        }
    }
}

impl std::fmt::Display for Mood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Checked in order; the first table with a hit wins.
const CUES: &[(Mood, &[&str])] = &[
    (Mood::Raudra, &["fear", "anxious", "scared"]),
    (Mood::Adbhuta, &["wonder", "amazed", "curious"]),
    (Mood::Karuna, &["sad", "hurt", "pain"]),
];

/// Case-insensitive substring scan, so "painting" reads as karuna too.
pub fn detect_mood(text: &str) -> Mood {
    let lower = text.to_lowercase();
    CUES.iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(mood, _)| *mood)
        .unwrap_or_default()
}
