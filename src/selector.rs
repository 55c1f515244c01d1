//! Model selection.
//!
//! A [`ModelSelector`] picks the model for an invocation when none was fixed
//! on the prompt function. Selection can be narrowed by a named rule key and
//! a hint of how many tokens the answer is expected to need.

use std::sync::Arc;

use crate::model::LanguageModel;

/// Hints passed to a [`ModelSelector`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionConstraints {
    /// Named selection rule, if any.
    pub rule_key: Option<String>,
    /// Expected number of generated tokens.
    pub expected_gen_tokens: Option<u32>,
}

pub trait ModelSelector: Send + Sync {
    /// Choose a model, or `None` to fall back to the configured default.
    fn select(&self, constraints: &SelectionConstraints) -> Option<Arc<dyn LanguageModel>>;
}

#[derive(Debug, Clone)]
struct Rule {
    key: Option<String>,
    max_gen_tokens: Option<u32>,
    model: Arc<dyn LanguageModel>,
}

impl Rule {
    fn matches(&self, constraints: &SelectionConstraints) -> bool {
        let key_ok = match (&self.key, &constraints.rule_key) {
            (Some(rule), Some(wanted)) => rule == wanted,
            (Some(_), None) => false,
            (None, _) => true,
        };
        let size_ok = match (self.max_gen_tokens, constraints.expected_gen_tokens) {
            (Some(max), Some(expected)) => expected <= max,
            _ => true,
        };
        key_ok && size_ok
    }
}

/// Rule table evaluated in insertion order; the first matching rule wins.
///
/// A keyed rule only matches when the caller asked for that key. Rules
/// without a key match any request whose token hint fits.
///
/// ```
/// use std::sync::Arc;
/// use llm_prompt_fn::model::MockModel;
/// use llm_prompt_fn::selector::{ModelSelector, RuleKeySelector, SelectionConstraints};
///
/// let selector = RuleKeySelector::new()
///     .rule("reasoning", Arc::new(MockModel::fixed("big").with_name("big")))
///     .fallback(Arc::new(MockModel::fixed("small").with_name("small")));
///
/// let model = selector.select(&SelectionConstraints::default()).unwrap();
/// assert_eq!(model.name(), "small");
/// ```
#[derive(Debug, Clone, Default)]
pub struct RuleKeySelector {
    rules: Vec<Rule>,
}

impl RuleKeySelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `model` for requests carrying `key`.
    pub fn rule(mut self, key: impl Into<String>, model: Arc<dyn LanguageModel>) -> Self {
        self.rules.push(Rule {
            key: Some(key.into()),
            max_gen_tokens: None,
            model,
        });
        self
    }

    /// Use `model` when the expected output fits in `max_gen_tokens`.
    pub fn sized(mut self, max_gen_tokens: u32, model: Arc<dyn LanguageModel>) -> Self {
        self.rules.push(Rule {
            key: None,
            max_gen_tokens: Some(max_gen_tokens),
            model,
        });
        self
    }

    /// Catch-all rule.
    pub fn fallback(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.rules.push(Rule {
            key: None,
            max_gen_tokens: None,
            model,
        });
        self
    }
}

impl ModelSelector for RuleKeySelector {
    fn select(&self, constraints: &SelectionConstraints) -> Option<Arc<dyn LanguageModel>> {
        self.rules
            .iter()
            .find(|r| r.matches(constraints))
            .map(|r| r.model.clone())
    }
}
