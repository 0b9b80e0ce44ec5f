//! remex access-control policy engine.
//!
//! Policies evaluate a per-call context to a `(verdict, applies)` pair:
//! `applies` records whether any rule condition matched the context at all,
//! and `verdict` is the allow/deny outcome. The enforcer treats a
//! non-applying evaluation as a deny, so the engine is deny-by-default:
//! - any applying deny rule wins immediately;
//! - an allow requires at least one applying allow rule and no applying deny;
//! - an empty or non-matching chain denies.
//!
//! Rules are `(principal, action, effect)` triples. The principal and action
//! patterns are either the wildcard `*` or an exact literal; wildcards are
//! meaningful only inside rules, never in the evaluated context.

#![deny(unsafe_code)]

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use remex_core::context::CallContext;

/// Allow/deny outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The applying rules permit the call.
    Allow,
    /// The applying rules (or the absence of any) reject the call.
    Deny,
}

/// Result of evaluating a policy against a call context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// The allow/deny outcome.
    pub verdict: Verdict,
    /// Whether any rule condition matched the context.
    pub applies: bool,
}

impl Decision {
    fn no_match() -> Self {
        Self { verdict: Verdict::Deny, applies: false }
    }

    /// True only for an applying allow; everything else is a rejection.
    #[must_use]
    pub fn permits(&self) -> bool {
        self.applies && self.verdict == Verdict::Allow
    }
}

/// Effect declared by a rule, normalized from case-insensitive input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// The rule grants access when it applies.
    Allow,
    /// The rule revokes access when it applies.
    Deny,
}

impl<'de> Deserialize<'de> for Effect {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match raw.to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            other => Err(serde::de::Error::unknown_variant(other, &["allow", "deny"])),
        }
    }
}

impl From<Effect> for Verdict {
    fn from(effect: Effect) -> Self {
        match effect {
            Effect::Allow => Self::Allow,
            Effect::Deny => Self::Deny,
        }
    }
}

/// Errors rejected at rule load time.
#[derive(Debug, Error)]
pub enum RuleError {
    /// The rule document is not valid JSON or carries an unknown effect.
    #[error("malformed rule: {0}")]
    Json(#[from] serde_json::Error),
    /// The principal pattern is empty.
    #[error("rule principal must be non-empty")]
    EmptyPrincipal,
    /// The action pattern is empty.
    #[error("rule action must be non-empty")]
    EmptyAction,
    /// The action names no known method and is not the wildcard.
    #[error("unknown action {0:?}")]
    UnknownAction(String),
}

/// A single access rule: "principal is/is not allowed to invoke action".
///
/// Immutable after load; construct via [`AccessRule::new`] or the JSON
/// ingestion functions, all of which validate the patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    #[serde(rename = "Principal")]
    principal: String,
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "Effect")]
    effect: Effect,
}

impl AccessRule {
    /// Build a validated rule.
    pub fn new(
        principal: impl Into<String>,
        action: impl Into<String>,
        effect: Effect,
    ) -> Result<Self, RuleError> {
        let rule = Self { principal: principal.into(), action: action.into(), effect };
        rule.validate()?;
        Ok(rule)
    }

    /// Parse a rule from its JSON representation:
    /// `{"Principal": "...", "Action": "...", "Effect": "allow"|"deny"}`.
    pub fn from_json(raw: &str) -> Result<Self, RuleError> {
        let rule: Self = serde_json::from_str(raw)?;
        rule.validate()?;
        Ok(rule)
    }

    /// Like [`AccessRule::from_json`], but additionally requires the action
    /// to be the wildcard or one of `known_actions`. Servers pass their
    /// method table so typo'd rules fail at startup instead of never
    /// applying.
    pub fn from_json_checked(raw: &str, known_actions: &[&str]) -> Result<Self, RuleError> {
        let rule = Self::from_json(raw)?;
        if rule.action != "*" && !known_actions.contains(&rule.action.as_str()) {
            return Err(RuleError::UnknownAction(rule.action));
        }
        Ok(rule)
    }

    fn validate(&self) -> Result<(), RuleError> {
        if self.principal.is_empty() {
            return Err(RuleError::EmptyPrincipal);
        }
        if self.action.is_empty() {
            return Err(RuleError::EmptyAction);
        }
        Ok(())
    }

    /// The principal pattern (`*` or an exact literal).
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// The action pattern (`*` or a full method name).
    pub fn action(&self) -> &str {
        &self.action
    }

    /// The declared effect.
    pub fn effect(&self) -> Effect {
        self.effect
    }

    /// Evaluate this rule against a context. A context missing either the
    /// principal or the method never applies.
    pub fn evaluate(&self, ctx: &CallContext) -> Decision {
        let Some(principal) = ctx.principal() else {
            return Decision::no_match();
        };
        let Some(method) = ctx.method() else {
            return Decision::no_match();
        };
        let applies =
            wildcard_match(&self.principal, principal) && wildcard_match(&self.action, method);
        Decision { verdict: self.effect.into(), applies }
    }
}

// Wildcards live in the rule only: a context value of "*" is a literal.
fn wildcard_match(pattern: &str, value: &str) -> bool {
    pattern == "*" || pattern == value
}

/// A policy is either a single rule or an ordered chain of policies.
#[derive(Debug, Clone)]
pub enum Policy {
    /// Leaf rule.
    Rule(AccessRule),
    /// Ordered composition; order matters only for the deny short-circuit.
    Chain(Vec<Policy>),
}

impl Policy {
    /// Convenience: a chain of leaf rules in the given order.
    #[must_use]
    pub fn chain(rules: impl IntoIterator<Item = AccessRule>) -> Self {
        Self::Chain(rules.into_iter().map(Self::Rule).collect())
    }

    /// Evaluate the policy. For a chain: any applying deny short-circuits
    /// to `(Deny, true)`; otherwise an applying allow yields
    /// `(Allow, true)`; a chain nothing applied to yields `(Deny, false)`.
    pub fn evaluate(&self, ctx: &CallContext) -> Decision {
        match self {
            Self::Rule(rule) => rule.evaluate(ctx),
            Self::Chain(members) => {
                let mut applies = false;
                for member in members {
                    let decision = member.evaluate(ctx);
                    if decision.applies {
                        if decision.verdict == Verdict::Deny {
                            return Decision { verdict: Verdict::Deny, applies: true };
                        }
                        applies = true;
                    }
                }
                let verdict = if applies { Verdict::Allow } else { Verdict::Deny };
                Decision { verdict, applies }
            }
        }
    }
}

impl From<AccessRule> for Policy {
    fn from(rule: AccessRule) -> Self {
        Self::Rule(rule)
    }
}
