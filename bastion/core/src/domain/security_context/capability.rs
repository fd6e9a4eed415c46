// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Capability Value Object
//!
//! A `Capability` is a permission entry carried by a [`super::SecurityContext`],
//! copied verbatim from the verified session proof's `caps` claim.
//!
//! ## Pattern Matching
//!
//! `pattern` supports:
//! - `"*"` matches any action
//! - `"ledger.*"` matches any action starting with `"ledger."`
//! - `"providers.bank-api"` exact match only
//!
//! Actions used by the core:
//!
//! | Action | Checked by |
//! |--------|-----------|
//! | `ledger.read` / `ledger.write` | HTTP handlers before opening a scoped transaction |
//! | `providers.<name>` | `OutboundProxy::call` |

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability {
    pub pattern: String,
}

impl Capability {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self { pattern: pattern.into() }
    }

    /// Capability required to call a partner API through the outbound proxy.
    pub fn provider(name: &str) -> String {
        format!("providers.{}", name)
    }

    pub fn matches(&self, action: &str) -> bool {
        if self.pattern == "*" {
            return true;
        }
        if self.pattern.ends_with(".*") {
            let prefix = self.pattern.trim_end_matches('*');
            return action.starts_with(prefix);
        }
        action == self.pattern
    }
}

impl From<&str> for Capability {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_matches_everything() {
        assert!(Capability::new("*").matches("ledger.read"));
        assert!(Capability::new("*").matches("providers.bank-api"));
    }

    #[test]
    fn test_prefix_pattern() {
        let cap = Capability::new("ledger.*");
        assert!(cap.matches("ledger.read"));
        assert!(cap.matches("ledger.write"));
        assert!(!cap.matches("ledgers.read"));
        assert!(!cap.matches("providers.bank-api"));
    }

    #[test]
    fn test_exact_pattern() {
        let cap = Capability::new(Capability::provider("bank-api"));
        assert!(cap.matches("providers.bank-api"));
        assert!(!cap.matches("providers.tax-api"));
    }
}
