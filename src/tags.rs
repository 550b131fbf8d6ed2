//! Dataset classification labels.
//!
//! Tag rules are small functions attached to a class. Each one inspects a
//! data handle and either contributes a [`TagSet`] or declines. A single
//! evaluation pass walks the merged rule table of the resolved class,
//! most derived class first, and folds every contribution into one final
//! label set.

use std::collections::BTreeSet;

use log::debug;

use crate::core::AstroData;
use crate::error::{Error, Result};

// ── TagSet ──

/// The contribution of one rule: labels to assert plus the conditions
/// and vetoes that travel with them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagSet {
    /// Labels asserted by this rule.
    pub add: BTreeSet<String>,
    /// Labels retracted for the rest of the pass.
    pub remove: BTreeSet<String>,
    /// If any of these is already asserted, the whole rule is skipped.
    pub blocked_by: BTreeSet<String>,
    /// Labels vetoed for the rest of the pass.
    pub blocks: BTreeSet<String>,
    /// The rule applies only once all of these are asserted.
    pub if_present: BTreeSet<String>,
}

fn labels<'a, I: IntoIterator<Item = &'a str>>(items: I) -> BTreeSet<String> {
    items.into_iter().map(String::from).collect()
}

impl TagSet {
    /// A contribution asserting the given labels.
    pub fn adding<'a, I: IntoIterator<Item = &'a str>>(items: I) -> Self {
        TagSet {
            add: labels(items),
            ..TagSet::default()
        }
    }

    /// Retract labels for the rest of the pass.
    pub fn removing<'a, I: IntoIterator<Item = &'a str>>(mut self, items: I) -> Self {
        self.remove = labels(items);
        self
    }

    /// Skip this whole rule when any of the given labels is already
    /// asserted.
    pub fn unless<'a, I: IntoIterator<Item = &'a str>>(mut self, items: I) -> Self {
        self.blocked_by = labels(items);
        self
    }

    /// Veto labels for the rest of the pass.
    pub fn blocking<'a, I: IntoIterator<Item = &'a str>>(mut self, items: I) -> Self {
        self.blocks = labels(items);
        self
    }

    /// Apply this rule only once all of the given labels are asserted.
    pub fn requiring<'a, I: IntoIterator<Item = &'a str>>(mut self, items: I) -> Self {
        self.if_present = labels(items);
        self
    }
}

// ── TagRule ──

/// Signature of a tag rule body. `Ok(None)` means the rule does not
/// apply to this dataset; `Err` aborts the whole evaluation pass.
pub type RuleFn = fn(&AstroData) -> Result<Option<TagSet>>;

/// One classification rule, identified by a stable id.
///
/// A derived class replaces an ancestor's rule by reusing its `id` or by
/// naming it in `overrides`. Identity is explicit; a rule never shadows
/// another just by sharing a function name.
#[derive(Debug, Clone, Copy)]
pub struct TagRule {
    /// Stable identifier, unique within its class.
    pub id: &'static str,
    /// Ids of ancestor rules this rule replaces.
    pub overrides: &'static [&'static str],
    /// The rule body.
    pub func: RuleFn,
}

// ── Evaluation ──

/// Run one evaluation pass over a merged rule table.
///
/// `rules` must already be linearized most-derived-first with overridden
/// entries removed; each entry carries the name of the class that
/// declared it, for error reporting.
pub(crate) fn evaluate(
    handle: &AstroData,
    rules: &[(String, TagRule)],
) -> Result<BTreeSet<String>> {
    let mut asserted: BTreeSet<String> = BTreeSet::new();
    let mut blocked: BTreeSet<String> = BTreeSet::new();
    let mut removed: BTreeSet<String> = BTreeSet::new();

    for (class, rule) in rules {
        let contribution = (rule.func)(handle).map_err(|e| Error::TagRule {
            class: class.clone(),
            rule: String::from(rule.id),
            reason: e.to_string(),
        })?;
        let Some(tagset) = contribution else {
            continue;
        };
        if !tagset.if_present.iter().all(|l| asserted.contains(l)) {
            debug!("rule '{}' skipped: prerequisites not asserted", rule.id);
            continue;
        }
        if tagset.blocked_by.iter().any(|l| asserted.contains(l)) {
            debug!("rule '{}' skipped: blocked by an asserted label", rule.id);
            continue;
        }
        // Vetoes and retractions fold in first, so a rule cannot assert
        // a label its own output blocks.
        blocked.extend(tagset.blocks);
        removed.extend(tagset.remove);
        for label in tagset.add {
            if !blocked.contains(&label) && !removed.contains(&label) {
                asserted.insert(label);
            }
        }
    }

    // A late veto still beats an early assertion.
    Ok(&(&asserted - &blocked) - &removed)
}

// ── Tests ──
