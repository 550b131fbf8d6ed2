//! Class registration and resolution.
//!
//! Candidate classes are declarative `'static` descriptors: a name, a
//! parent list, an optional matcher predicate, and the tag rules,
//! descriptors and keyword mappings the class contributes. A [`Registry`]
//! holds the candidates and resolves a source to the unique maximally
//! specific class that claims it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use indexmap::IndexMap;
use log::debug;

use crate::core::AstroData;
use crate::error::{Error, Result};
use crate::fits::DataFile;
use crate::header::Value;
use crate::tags::TagRule;

// ── Declarative class descriptors ──

/// Predicate deciding whether a class claims a source.
pub type MatcherFn = fn(&DataFile) -> bool;

/// A named metadata accessor contributed by a class. `Ok(None)` means
/// the quantity is not available for this dataset.
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    /// Accessor name, unique within the merged table.
    pub name: &'static str,
    /// The accessor body.
    pub func: fn(&AstroData) -> Result<Option<Value>>,
}

/// One registrable class.
///
/// `matcher: None` means the class claims every source; only the base
/// class uses that, making it the fallback when nothing more specific
/// matches.
#[derive(Debug)]
pub struct CandidateClass {
    /// Unique class name.
    pub name: &'static str,
    /// Parent class names. Multiple parents are allowed.
    pub parents: &'static [&'static str],
    /// The claim predicate.
    pub matcher: Option<MatcherFn>,
    /// Tag rules declared directly on this class.
    pub tag_rules: &'static [TagRule],
    /// Descriptors declared directly on this class.
    pub descriptors: &'static [Descriptor],
    /// Accessor-name to header-keyword mappings.
    pub keywords: &'static [(&'static str, &'static str)],
}

// ── The base class ──

fn desc_instrument(handle: &AstroData) -> Result<Option<Value>> {
    Ok(handle.phu().get("INSTRUME").cloned())
}

fn desc_object(handle: &AstroData) -> Result<Option<Value>> {
    Ok(handle.phu().get("OBJECT").cloned())
}

fn desc_telescope(handle: &AstroData) -> Result<Option<Value>> {
    Ok(handle.phu().get("TELESCOP").cloned())
}

/// The root of every class hierarchy. It has no matcher, so it claims
/// every source and wins only when nothing more specific does.
pub static BASE_CLASS: CandidateClass = CandidateClass {
    name: "AstroData",
    parents: &[],
    matcher: None,
    tag_rules: &[],
    descriptors: &[
        Descriptor {
            name: "instrument",
            func: desc_instrument,
        },
        Descriptor {
            name: "object",
            func: desc_object,
        },
        Descriptor {
            name: "telescope",
            func: desc_telescope,
        },
    ],
    keywords: &[
        ("instrument", "INSTRUME"),
        ("object", "OBJECT"),
        ("telescope", "TELESCOP"),
    ],
};

// ── Resolved classes ──

/// A class after resolution: its linearized ancestry and the merged
/// rule, descriptor and keyword tables.
#[derive(Debug)]
pub struct ResolvedClass {
    name: String,
    ancestry: Vec<String>,
    rules: Vec<(String, TagRule)>,
    descriptors: BTreeMap<String, Descriptor>,
    keywords: BTreeMap<String, String>,
}

impl ResolvedClass {
    /// The resolved class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Linearized ancestry, most derived class first.
    pub fn ancestry(&self) -> impl Iterator<Item = &str> {
        self.ancestry.iter().map(String::as_str)
    }

    /// Returns `true` if `name` appears anywhere in the ancestry.
    pub fn is_a(&self, name: &str) -> bool {
        self.ancestry.iter().any(|a| a == name)
    }

    /// The merged rule table in evaluation order, each entry tagged with
    /// the declaring class.
    pub(crate) fn rules(&self) -> &[(String, TagRule)] {
        &self.rules
    }

    /// Look up a merged descriptor by name.
    pub fn descriptor(&self, name: &str) -> Option<&Descriptor> {
        self.descriptors.get(name)
    }

    /// Merged descriptor names, sorted.
    pub fn descriptor_names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }

    /// The header keyword a named quantity reads from, if mapped.
    pub fn keyword_for(&self, name: &str) -> Option<&str> {
        self.keywords.get(name).map(String::as_str)
    }
}

// ── Registry ──

/// The set of registrable classes.
///
/// Each registry instance is fully isolated; tests can build their own
/// hierarchies without touching any shared state.
#[derive(Debug)]
pub struct Registry {
    classes: IndexMap<&'static str, &'static CandidateClass>,
}

impl Registry {
    /// A registry holding only the base class.
    pub fn new() -> Self {
        let mut classes = IndexMap::new();
        classes.insert(BASE_CLASS.name, &BASE_CLASS);
        Registry { classes }
    }

    /// Register a class. The name must be new and every parent must
    /// already be registered.
    pub fn add_class(&mut self, class: &'static CandidateClass) -> Result<()> {
        if self.classes.contains_key(class.name) {
            return Err(Error::StructuralConflict(String::from(class.name)));
        }
        for parent in class.parents {
            if !self.classes.contains_key(parent) {
                return Err(Error::UnknownClass(String::from(*parent)));
            }
        }
        self.classes.insert(class.name, class);
        Ok(())
    }

    /// Unregister a class by name. The base class cannot be removed.
    pub fn remove_class(&mut self, name: &str) -> Result<()> {
        if name == BASE_CLASS.name {
            return Err(Error::InvalidOperation("the base class cannot be removed"));
        }
        self.classes
            .shift_remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::UnknownClass(String::from(name)))
    }

    /// Returns `true` if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Registered class names in registration order.
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().copied()
    }

    /// Linearized ancestry of `name`: depth-first pre-order over the
    /// parent lists, left to right, first occurrence kept. Stable across
    /// runs; the class itself comes first.
    pub fn linearize(&self, name: &str) -> Result<Vec<&'static CandidateClass>> {
        let mut out: Vec<&'static CandidateClass> = Vec::new();
        self.walk_ancestry(name, &mut out)?;
        Ok(out)
    }

    fn walk_ancestry(&self, name: &str, out: &mut Vec<&'static CandidateClass>) -> Result<()> {
        let class = self
            .classes
            .get(name)
            .ok_or_else(|| Error::UnknownClass(String::from(name)))?;
        if out.iter().any(|c| c.name == class.name) {
            return Ok(());
        }
        out.push(class);
        for parent in class.parents {
            self.walk_ancestry(parent, out)?;
        }
        Ok(())
    }

    /// Resolve a source to its unique maximally specific class.
    ///
    /// Every matcher runs; candidates that are strict ancestors of
    /// another candidate are pruned. Exactly one class must remain.
    pub fn resolve(&self, source: &DataFile) -> Result<Arc<ResolvedClass>> {
        let mut matched: Vec<&'static CandidateClass> = Vec::new();
        for class in self.classes.values() {
            let claims = match class.matcher {
                Some(matcher) => matcher(source),
                None => true,
            };
            if claims {
                matched.push(class);
            }
        }

        // Drop every candidate that another candidate descends from.
        let ancestries: Vec<BTreeSet<&str>> = matched
            .iter()
            .map(|c| {
                self.linearize(c.name)
                    .map(|lin| lin.iter().skip(1).map(|a| a.name).collect())
            })
            .collect::<Result<_>>()?;
        let finalists: Vec<&'static CandidateClass> = matched
            .iter()
            .enumerate()
            .filter(|(i, c)| {
                !matched
                    .iter()
                    .enumerate()
                    .any(|(j, _)| j != *i && ancestries[j].contains(c.name))
            })
            .map(|(_, c)| *c)
            .collect();

        match finalists.len() {
            0 => Err(Error::NoMatch),
            1 => {
                let winner = finalists[0];
                if winner.name == BASE_CLASS.name && self.classes.len() > 1 {
                    debug!("no specific class claimed the source, using the base class");
                }
                self.build_resolved(winner.name)
            }
            _ => {
                let mut names: Vec<String> =
                    finalists.iter().map(|c| String::from(c.name)).collect();
                names.sort();
                Err(Error::AmbiguousMatch(names))
            }
        }
    }

    /// Build the merged tables for a registered class.
    pub fn build_resolved(&self, name: &str) -> Result<Arc<ResolvedClass>> {
        let lineage = self.linearize(name)?;

        let mut rules: Vec<(String, TagRule)> = Vec::new();
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut overridden: BTreeSet<&str> = BTreeSet::new();
        for class in &lineage {
            for rule in class.tag_rules {
                if seen.contains(rule.id) || overridden.contains(rule.id) {
                    continue;
                }
                seen.insert(rule.id);
                overridden.extend(rule.overrides.iter().copied());
                rules.push((String::from(class.name), *rule));
            }
        }

        let mut descriptors: BTreeMap<String, Descriptor> = BTreeMap::new();
        let mut keywords: BTreeMap<String, String> = BTreeMap::new();
        for class in &lineage {
            for desc in class.descriptors {
                descriptors
                    .entry(String::from(desc.name))
                    .or_insert(*desc);
            }
            for (name, keyword) in class.keywords {
                keywords
                    .entry(String::from(*name))
                    .or_insert_with(|| String::from(*keyword));
            }
        }

        Ok(Arc::new(ResolvedClass {
            name: String::from(name),
            ancestry: lineage.iter().map(|c| String::from(c.name)).collect(),
            rules,
            descriptors,
            keywords,
        }))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

// ── Tests ──
