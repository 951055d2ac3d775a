//! Capacity-lane routing
//!
//! Generation and editing take far longer than detection or VQA, so jobs are
//! split into two worker lanes by a keyword heuristic over the prompt. A
//! misrouted job still runs correctly, just in the other lane.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Light,
    Heavy,
}

impl Lane {
    pub const ALL: [Lane; 2] = [Lane::Light, Lane::Heavy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Light => "light",
            Lane::Heavy => "heavy",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lane {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(Lane::Light),
            "heavy" => Ok(Lane::Heavy),
            other => Err(format!("unknown lane '{}'", other)),
        }
    }
}

pub const DEFAULT_HEAVY_KEYWORDS: &[&str] =
    &["create", "generate", "transform", "change", "draw", "make"];

#[derive(Debug, Clone)]
pub struct QueueRouter {
    keywords: Vec<String>,
}

impl QueueRouter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Heavy iff the prompt contains any keyword, case-insensitively
    pub fn route(&self, user_prompt: &str) -> Lane {
        let prompt = user_prompt.to_lowercase();
        if self.keywords.iter().any(|k| prompt.contains(k.as_str())) {
            Lane::Heavy
        } else {
            Lane::Light
        }
    }
}

impl Default for QueueRouter {
    fn default() -> Self {
        Self::new(DEFAULT_HEAVY_KEYWORDS)
    }
}
