//! Outage classification of error kinds.
//!
//! An [`ErrorKind`] is a dotted lowercase path (`io`, `io.timed_out`,
//! `db.replica.timeout`). A kind is outage-indicating when the kind itself,
//! any dotted prefix of it, or any ancestor reached through declared parent
//! edges is a member of the classification set.

use common::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Identifier for a category of application error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ErrorKind(String);

impl ErrorKind {
    /// Parse and validate an error kind.
    pub fn new(kind: impl Into<String>) -> Result<Self> {
        let kind = kind.into();
        let well_formed = !kind.is_empty()
            && kind.split('.').all(|segment| {
                !segment.is_empty()
                    && segment
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            });

        if !well_formed {
            return Err(Error::config(format!("malformed error kind {kind:?}")));
        }
        Ok(Self(kind))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The dotted prefix of this kind, if any (`io` for `io.timed_out`).
    pub fn parent(&self) -> Option<ErrorKind> {
        self.0
            .rsplit_once('.')
            .map(|(prefix, _)| ErrorKind(prefix.to_string()))
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ErrorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ErrorKind::new(s)
    }
}

impl TryFrom<String> for ErrorKind {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        ErrorKind::new(value)
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        kind.0
    }
}

impl From<std::io::ErrorKind> for ErrorKind {
    fn from(kind: std::io::ErrorKind) -> Self {
        ErrorKind(format!("io.{}", snake_case(&format!("{kind:?}"))))
    }
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else if c.is_ascii_alphanumeric() {
            out.push(c);
        }
    }
    out
}

/// Errors that know their own kind.
pub trait Classified {
    fn error_kind(&self) -> ErrorKind;
}

impl Classified for std::io::Error {
    fn error_kind(&self) -> ErrorKind {
        ErrorKind::from(self.kind())
    }
}

/// Extracts a kind from one link of an error chain.
pub type KindExtractor = Arc<dyn Fn(&(dyn StdError + 'static)) -> Option<ErrorKind> + Send + Sync>;

/// Extractor for a concrete [`Classified`] error type found in a chain.
pub fn extractor<T>() -> KindExtractor
where
    T: Classified + StdError + 'static,
{
    Arc::new(|err: &(dyn StdError + 'static)| err.downcast_ref::<T>().map(Classified::error_kind))
}

/// Kinds of every `std::io::Error` in `err`'s source chain, outermost first.
pub fn kinds_in_chain(err: &(dyn StdError + 'static)) -> Vec<ErrorKind> {
    kinds_in_chain_with(err, &[])
}

/// Kinds in `err`'s source chain, outermost first, consulting `extractors`
/// before the built-in `std::io::Error` mapping. At most one kind per link.
pub fn kinds_in_chain_with(
    err: &(dyn StdError + 'static),
    extractors: &[KindExtractor],
) -> Vec<ErrorKind> {
    std::iter::successors(Some(err), |e| (*e).source())
        .filter_map(|e| {
            extractors
                .iter()
                .find_map(|extract| extract(e))
                .or_else(|| e.downcast_ref::<std::io::Error>().map(Classified::error_kind))
        })
        .collect()
}

/// Immutable set of outage-indicating kinds with declared supertypes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindSet {
    kinds: HashSet<ErrorKind>,
    parents: HashMap<ErrorKind, ErrorKind>,
}

impl KindSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`KindSet::insert`].
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.insert(kind);
        self
    }

    /// Add a kind; returns false if it was already present.
    pub fn insert(&mut self, kind: ErrorKind) -> bool {
        self.kinds.insert(kind)
    }

    pub fn remove(&mut self, kind: &ErrorKind) -> bool {
        self.kinds.remove(kind)
    }

    /// Declare `parent` as a supertype of `kind`.
    pub fn declare_parent(&mut self, kind: ErrorKind, parent: ErrorKind) -> Result<()> {
        if kind == parent {
            return Err(Error::config(format!("{kind} cannot be its own parent")));
        }
        self.parents.insert(kind, parent);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Whether `kind` is, or is a subtype of, a member of this set.
    pub fn is_outage_indicating(&self, kind: &ErrorKind) -> bool {
        if self.kinds.is_empty() {
            return false;
        }

        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([kind.clone()]);

        while let Some(current) = queue.pop_front() {
            if self.kinds.contains(&current) {
                return true;
            }
            // Declared parents may form cycles.
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(parent) = self.parents.get(&current) {
                queue.push_back(parent.clone());
            }
            if let Some(prefix) = current.parent() {
                queue.push_back(prefix);
            }
        }
        false
    }
}

/// Shared, swappable outage classification.
///
/// Readers work on a snapshot; writers publish a whole new set, so a
/// classification change never tears an in-flight evaluation.
#[derive(Debug, Default)]
pub struct OutageClassification {
    current: RwLock<Arc<KindSet>>,
}

impl OutageClassification {
    pub fn new(kinds: KindSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(kinds)),
        }
    }

    /// Current set of kinds.
    pub fn snapshot(&self) -> Arc<KindSet> {
        self.current.read().clone()
    }

    /// Replace the whole set.
    pub fn replace(&self, kinds: KindSet) {
        *self.current.write() = Arc::new(kinds);
    }

    /// Copy, modify and publish the set.
    pub fn update(&self, f: impl FnOnce(&mut KindSet)) {
        let mut current = self.current.write();
        let mut next = KindSet::clone(&current);
        f(&mut next);
        *current = Arc::new(next);
    }

    pub fn insert(&self, kind: ErrorKind) {
        self.update(|set| {
            set.insert(kind);
        });
    }

    pub fn remove(&self, kind: &ErrorKind) {
        self.update(|set| {
            set.remove(kind);
        });
    }

    pub fn is_outage_indicating(&self, kind: &ErrorKind) -> bool {
        self.snapshot().is_outage_indicating(kind)
    }
}
