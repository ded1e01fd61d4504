//! Key-fact extraction from recognized label text.
//!
//! Text is lowercased, stripped of diacritics and given one trailing space,
//! so markers such as `"per "` only match at a word end without needing a
//! regex. Markers cover English and French label vocabulary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyFact {
    Title,
    Serving,
    Calories,
    Fat,
    Carbs,
    Sugar,
    Protein,
    Sodium,
}

impl KeyFact {
    pub const ALL: [KeyFact; 8] = [
        KeyFact::Title,
        KeyFact::Serving,
        KeyFact::Calories,
        KeyFact::Fat,
        KeyFact::Carbs,
        KeyFact::Sugar,
        KeyFact::Protein,
        KeyFact::Sodium,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            KeyFact::Title => "title",
            KeyFact::Serving => "serving",
            KeyFact::Calories => "calories",
            KeyFact::Fat => "fat",
            KeyFact::Carbs => "carbs",
            KeyFact::Sugar => "sugar",
            KeyFact::Protein => "protein",
            KeyFact::Sodium => "sodium",
        }
    }

    /// Substrings of normalized text that establish this fact
    pub fn markers(&self) -> &'static [&'static str] {
        match self {
            KeyFact::Title => &["nutrit"],
            KeyFact::Serving => &["serving", "per ", "pour ", "amount", "teneur"],
            KeyFact::Calories => &["calorie", "energy"],
            KeyFact::Fat => &["fat", "lipid"],
            KeyFact::Carbs => &["carb", "gluc"],
            KeyFact::Sugar => &["sugar", "sucre"],
            KeyFact::Protein => &["protein"],
            KeyFact::Sodium => &["sodium"],
        }
    }

    pub fn is_present_in(&self, normalized: &str) -> bool {
        self.markers().iter().any(|marker| normalized.contains(marker))
    }
}

impl fmt::Display for KeyFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lowercase, fold diacritics, append one space
pub fn normalize_text(text: &str) -> String {
    let mut normalized: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    normalized.push(' ');
    normalized
}

/// Recognized text plus the facts found in it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextRecognition {
    text: String,
    contains_key_facts: BTreeMap<KeyFact, bool>,
}

impl TextRecognition {
    /// Normalize `raw` and evaluate every key fact against it
    pub fn new(raw: &str) -> Self {
        let text = normalize_text(raw);
        let contains_key_facts = KeyFact::ALL
            .iter()
            .map(|fact| (*fact, fact.is_present_in(&text)))
            .collect();

        Self {
            text,
            contains_key_facts,
        }
    }

    /// Normalized text, trailing space included
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn contains_key_facts(&self) -> &BTreeMap<KeyFact, bool> {
        &self.contains_key_facts
    }

    pub fn has(&self, fact: KeyFact) -> bool {
        self.contains_key_facts.get(&fact).copied().unwrap_or(false)
    }

    pub fn found_count(&self) -> usize {
        self.contains_key_facts.values().filter(|found| **found).count()
    }
}
