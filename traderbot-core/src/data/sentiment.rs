//! Comment scoring and crypto-entity detection.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Scores a piece of text in `[-1, 1]`.
pub trait SentimentScorer: Send + Sync {
    fn score(&self, text: &str) -> f64;
}

const POSITIVE: &[&str] = &[
    "bull", "bullish", "moon", "mooning", "pump", "gain", "gains", "up", "buy", "buying", "good",
    "great", "love", "profit", "rally", "surge", "strong", "win", "hodl", "breakout", "adoption",
    "optimistic", "rocket", "green", "high", "ath",
];

const NEGATIVE: &[&str] = &[
    "bear", "bearish", "dump", "crash", "loss", "losses", "down", "sell", "selling", "bad",
    "hate", "scam", "fear", "panic", "weak", "drop", "fall", "red", "bubble", "fud", "rekt",
    "hack", "hacked", "ban", "dead", "low",
];

/// Word-list scorer: `(positive - negative) / (positive + negative)`, zero
/// when no listed word appears.
#[derive(Debug, Clone)]
pub struct LexiconScorer {
    positive: HashSet<&'static str>,
    negative: HashSet<&'static str>,
}

impl Default for LexiconScorer {
    fn default() -> Self {
        Self {
            positive: POSITIVE.iter().copied().collect(),
            negative: NEGATIVE.iter().copied().collect(),
        }
    }
}

impl SentimentScorer for LexiconScorer {
    fn score(&self, text: &str) -> f64 {
        let (mut pos, mut neg) = (0u32, 0u32);
        for word in words(text) {
            if self.positive.contains(word.as_str()) {
                pos += 1;
            } else if self.negative.contains(word.as_str()) {
                neg += 1;
            }
        }
        if pos + neg == 0 {
            0.0
        } else {
            (f64::from(pos) - f64::from(neg)) / f64::from(pos + neg)
        }
    }
}

/// Lowercased alphanumeric tokens.
fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

/// Coin a comment can be about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Entity {
    Btc,
    Eth,
    Ltc,
}

impl Entity {
    /// Spellings (including common misspellings) treated as a mention.
    pub fn synonyms(&self) -> &'static [&'static str] {
        match self {
            Entity::Btc => &["btc", "bitcoin", "bitcoins", "bitc", "xbt"],
            Entity::Eth => &["eth", "ethereum", "etherium", "ether", "ethers"],
            Entity::Ltc => &["ltc", "litecoin", "litcoin", "litecoins"],
        }
    }

    pub fn mentioned_in(&self, text: &str) -> bool {
        let syn = self.synonyms();
        words(text).any(|w| syn.contains(&w.as_str()))
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Btc => "BTC",
            Entity::Eth => "ETH",
            Entity::Ltc => "LTC",
        })
    }
}

impl FromStr for Entity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BTC" => Ok(Entity::Btc),
            "ETH" => Ok(Entity::Eth),
            "LTC" => Ok(Entity::Ltc),
            other => Err(format!("unknown entity '{other}'")),
        }
    }
}
