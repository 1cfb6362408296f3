//! Engine configuration
//!
//! Behaviors with more than one reasonable answer are explicit settings
//! here instead of hard-coded guesses. Every field has a default, so an empty
//! JSON object (or no config at all) yields the standard behavior.

use serde::{Deserialize, Serialize};

use crate::error::{DocSiftError, Result};

/// How a `$regex` pattern without a leading `^` is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegexMode {
    /// Pattern may match anywhere in the string (explicit anchors still apply)
    #[default]
    Search,
    /// Unanchored patterns are implicitly anchored at the start of the string
    Prefix,
}

/// What `$push` / `$addToSet` do when the target field holds `null`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullArrayPolicy {
    /// Report a type mismatch, same as any other non-array value
    #[default]
    Reject,
    /// Treat `null` like an absent field and start from an empty array
    Initialize,
}

/// How `insert_one` generates `_id` for documents that don't carry one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Per-collection integer counter starting at 1
    #[default]
    AutoIncrement,
    /// Random UUID v4 strings
    Uuid,
}

/// Settings shared by a database and all of its collections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub regex_mode: RegexMode,
    pub null_array_policy: NullArrayPolicy,
    pub id_strategy: IdStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            regex_mode: RegexMode::Search,
            null_array_policy: NullArrayPolicy::Reject,
            id_strategy: IdStrategy::AutoIncrement,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_regex_mode(mut self, mode: RegexMode) -> Self {
        self.regex_mode = mode;
        self
    }

    pub fn with_null_array_policy(mut self, policy: NullArrayPolicy) -> Self {
        self.null_array_policy = policy;
        self
    }

    pub fn with_id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    /// Parse a JSON config document; missing keys fall back to defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| DocSiftError::Config(format!("Invalid engine config: {}", e)))
    }
}
