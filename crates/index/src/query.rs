//! Index query forms
//!
//! Two query surfaces: a simple predicate string (`*`, `container:<id>`,
//! `pool:<name>`, ...) and a composite filter record (field, operator,
//! value). The predicate string is the wire-friendly form; the filter record
//! is what programmatic callers compose.

use silo_core::{ContainerId, Error, Manifest, ManifestId, Result};

/// Parsed predicate string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Every manifest
    All,
    /// Exactly one manifest
    Manifest(ManifestId),
    /// Manifests in one container
    Container(ContainerId),
    /// Manifests whose relative path starts with a prefix
    PathPrefix(String),
    /// Manifests in containers assigned to one pool
    Pool(String),
    /// Manifests in containers assigned to any of several pools
    Pools(Vec<String>),
    /// Manifests in containers assigned to one storage layer
    Layer(String),
}

impl Predicate {
    /// Parse the string form.
    ///
    /// Accepted: `*`, `manifest:<uuid>`, `container:<uuid>`, `path:<prefix>`,
    /// `pool:<name>`, `pools:<a,b,c>`, `layer:<name>`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "*" {
            return Ok(Predicate::All);
        }
        let (kind, value) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidArgument(format!("bad predicate: {s}")))?;
        match kind {
            "manifest" => ManifestId::parse(value)
                .map(Predicate::Manifest)
                .ok_or_else(|| Error::InvalidArgument(format!("bad manifest id: {value}"))),
            "container" => ContainerId::parse(value)
                .map(Predicate::Container)
                .ok_or_else(|| Error::InvalidArgument(format!("bad container id: {value}"))),
            "path" => Ok(Predicate::PathPrefix(value.to_string())),
            "pool" => Ok(Predicate::Pool(value.to_string())),
            "pools" => Ok(Predicate::Pools(
                value.split(',').map(|p| p.trim().to_string()).collect(),
            )),
            "layer" => Ok(Predicate::Layer(value.to_string())),
            other => Err(Error::InvalidArgument(format!(
                "unknown predicate kind: {other}"
            ))),
        }
    }
}

/// Field a composite filter tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    /// Relative path
    Path,
    /// Owning container id (compared as its string form)
    Container,
    /// Content hash (hex)
    ContentHash,
    /// Byte length
    Size,
}

/// Comparison operator of a composite filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// Exact match
    Equals,
    /// Negated exact match
    NotEquals,
    /// Substring match
    Contains,
    /// Prefix match
    StartsWith,
    /// Numeric greater-than (Size only)
    GreaterThan,
    /// Numeric less-than (Size only)
    LessThan,
}

/// One composite filter clause; clauses AND together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFilter {
    /// Field under test
    pub field: FilterField,
    /// Operator
    pub op: FilterOp,
    /// Comparison value, rendered as a string
    pub value: String,
}

impl FieldFilter {
    /// Create a filter clause.
    pub fn new(field: FilterField, op: FilterOp, value: impl Into<String>) -> Self {
        Self {
            field,
            op,
            value: value.into(),
        }
    }

    /// Whether `manifest` satisfies this clause.
    pub fn matches(&self, manifest: &Manifest) -> bool {
        let actual = match self.field {
            FilterField::Path => manifest.relative_path.clone(),
            FilterField::Container => manifest.container.to_string(),
            FilterField::ContentHash => manifest.content_hash.to_hex(),
            FilterField::Size => manifest.size.to_string(),
        };
        match self.op {
            FilterOp::Equals => actual == self.value,
            FilterOp::NotEquals => actual != self.value,
            FilterOp::Contains => actual.contains(&self.value),
            FilterOp::StartsWith => actual.starts_with(&self.value),
            FilterOp::GreaterThan | FilterOp::LessThan => {
                let (Ok(a), Ok(b)) = (actual.parse::<u64>(), self.value.parse::<u64>()) else {
                    return false;
                };
                if self.op == FilterOp::GreaterThan {
                    a > b
                } else {
                    a < b
                }
            }
        }
    }
}
