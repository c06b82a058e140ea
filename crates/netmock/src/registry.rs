//! The per-session set of mock rules and best-match resolution.

use crate::error::Result;
use crate::matcher::UrlPattern;
use crate::mock::{MockDefaults, MockOptions, MockRule, RuleSignature};
use crate::record::RequestDescriptor;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Holds all mock rules for one session.
///
/// Rules are kept in registration order. Resolution ([`MockRegistry::find_match`])
/// is a pure function of that order, the rules and the request: it filters by
/// URL, method and query constraints, then picks the most specific rule, with
/// the earliest registration winning exact ties.
#[derive(Debug, Default)]
pub struct MockRegistry {
    rules: RwLock<Vec<Arc<MockRule>>>,
    defaults: MockDefaults,
}

impl MockRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(defaults: MockDefaults) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            defaults,
        }
    }

    /// Registers a rule, replacing any rule with the same `(url, method, query)`.
    ///
    /// # Errors
    ///
    /// Returns a programming error if the options are invalid; the registry is
    /// left unchanged in that case.
    pub fn register(&self, pattern: impl Into<UrlPattern>, options: MockOptions) -> Result<Arc<MockRule>> {
        let rule = Arc::new(MockRule::build(pattern.into(), options, &self.defaults)?);

        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|existing| {
            let duplicate = existing.signature() == rule.signature();
            if duplicate {
                existing.gate().close();
            }
            !duplicate
        });
        if rules.len() < before {
            debug!(pattern = %rule.pattern(), "replaced existing mock with identical signature");
        }
        rules.push(rule.clone());
        debug!(
            pattern = %rule.pattern(),
            method = rule.method().unwrap_or("*"),
            auto = rule.is_auto(),
            "registered mock"
        );
        Ok(rule)
    }

    /// Removes rules for `pattern`.
    ///
    /// Without options every rule with that pattern goes; with options only the
    /// rule with the same method and query constraint does. Requests held by a
    /// removed manual rule are discarded. Returns the number of rules removed.
    pub fn remove(&self, pattern: impl Into<UrlPattern>, options: Option<&MockOptions>) -> usize {
        let pattern = pattern.into();
        let signature = options.map(|options| RuleSignature::new(pattern.clone(), options));

        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|existing| {
            let remove = match &signature {
                Some(signature) => existing.signature() == signature,
                None => existing.signature().pattern() == &pattern,
            };
            if remove {
                existing.gate().close();
            }
            !remove
        });
        let removed = before - rules.len();
        debug!(pattern = %pattern, removed, "removed mocks");
        removed
    }

    /// Removes every rule.
    pub fn clear(&self) {
        let mut rules = self.rules.write();
        for rule in rules.iter() {
            rule.gate().close();
        }
        rules.clear();
        debug!("cleared all mocks");
    }

    /// Resolves the single best rule for a request, if any matches.
    #[must_use]
    pub fn find_match(&self, request: &RequestDescriptor) -> Option<Arc<MockRule>> {
        self.rules
            .read()
            .iter()
            .filter(|rule| rule.matches(request))
            // `reduce` keeps the accumulator on ties, so the earliest registration wins.
            .reduce(|best, candidate| {
                if candidate.specificity() > best.specificity() {
                    candidate
                } else {
                    best
                }
            })
            .cloned()
    }

    /// Snapshot of the active rules in registration order.
    #[must_use]
    pub fn rules(&self) -> Vec<Arc<MockRule>> {
        self.rules.read().clone()
    }

    /// Number of active rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Returns true if no rules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards held requests and fails pending triggers on every rule.
    pub(crate) fn close(&self) {
        for rule in self.rules.read().iter() {
            rule.gate().close();
        }
    }
}
