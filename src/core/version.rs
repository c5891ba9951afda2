//! Version parsing and constraint handling.
//!
//! Supports release versions with up to three numeric components plus an optional
//! pre-release and build suffix, and the constraint operators:
//! - `==`, `!=` - Exact match (a shorter version matches as a prefix)
//! - `>=`, `>`, `<=`, `<` - Standard comparisons
//! - `~=` - Compatible release (`~=1.4.5` means `>=1.4.5, ==1.4.*`)
//!
//! Requirements combine a package name with a comma-separated clause list:
//!
//! ```text
//! numpy>=1.20,<2.0
//! requests ~= 2.31
//! attrs
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version format: {0}")]
    InvalidFormat(String),
}

/// A version with major, minor, patch, and optional pre-release and build tags.
///
/// Build metadata is ignored for ordering and equality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
    pub build: Option<String>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: None,
            build: None,
        }
    }

    pub fn with_pre(mut self, pre: impl Into<String>) -> Self {
        self.pre = Some(pre.into());
        self
    }

    pub fn release(&self) -> [u64; 3] {
        [self.major, self.minor, self.patch]
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    /// Parse a version and report how many numeric components were written.
    ///
    /// `"1.2"` parses to `1.2.0` with precision 2.
    pub fn parse_with_precision(s: &str) -> Result<(Self, usize), VersionError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VersionError::InvalidFormat("empty version".to_string()));
        }
        let invalid = || VersionError::InvalidFormat(s.to_string());

        let (head, build) = match s.split_once('+') {
            Some((head, build)) if is_tag(build) => (head, Some(build.to_string())),
            Some(_) => return Err(invalid()),
            None => (s, None),
        };

        // Numeric release part: digits separated by dots, ending where a
        // non-digit follows.
        let mut components = Vec::with_capacity(3);
        let mut rest = head;
        loop {
            let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
            if digits == 0 {
                return Err(invalid());
            }
            components.push(rest[..digits].parse::<u64>().map_err(|_| invalid())?);
            rest = &rest[digits..];
            match rest.strip_prefix('.') {
                Some(after) if after.starts_with(|c: char| c.is_ascii_digit()) => rest = after,
                _ => break,
            }
        }
        if components.len() > 3 {
            return Err(invalid());
        }

        let pre = rest.strip_prefix(['-', '.', '_']).unwrap_or(rest);
        let pre = if pre.is_empty() {
            if !rest.is_empty() {
                return Err(invalid());
            }
            None
        } else if is_tag(pre) && pre.starts_with(|c: char| c.is_ascii_alphanumeric()) {
            // Post and dev releases do not order as pre-releases.
            if matches!(pre_tokens(pre).first(), Some(PreToken::Text(t)) if is_post_or_dev(t)) {
                return Err(invalid());
            }
            Some(pre.to_string())
        } else {
            return Err(invalid());
        };

        let precision = components.len();
        components.resize(3, 0);
        Ok((
            Version {
                major: components[0],
                minor: components[1],
                patch: components[2],
                pre,
                build,
            },
            precision,
        ))
    }

    /// Render with only the first `precision` numeric components.
    fn fmt_with_precision(&self, f: &mut fmt::Formatter<'_>, precision: usize) -> fmt::Result {
        let release = self.release();
        let shown = precision.clamp(1, 3);
        for (i, part) in release[..shown].iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", part)?;
        }
        if let Some(ref pre) = self.pre {
            write!(f, "-{}", pre)?;
        }
        if let Some(ref build) = self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

fn is_post_or_dev(tag: &str) -> bool {
    ["post", "dev", "rev", "r"].iter().any(|k| tag.eq_ignore_ascii_case(k))
}

fn is_tag(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse_with_precision(s).map(|(v, _)| v)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with_precision(f, 3)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.release().hash(state);
        self.pre.as_deref().map(pre_tokens).hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.release().cmp(&other.release()).then_with(|| {
            // Pre-release versions sort before the release they lead up to
            match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => cmp_pre(a, b),
            }
        })
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum PreToken<'a> {
    Num(u64),
    Text(&'a str),
}

/// Split a pre-release tag into alternating digit and text runs: `rc10` -> [rc, 10].
fn pre_tokens(s: &str) -> Vec<PreToken<'_>> {
    let mut tokens = Vec::new();
    for part in s.split(['.', '-', '_']).filter(|p| !p.is_empty()) {
        let mut start = 0;
        let bytes = part.as_bytes();
        while start < bytes.len() {
            let numeric = bytes[start].is_ascii_digit();
            let len = bytes[start..]
                .iter()
                .take_while(|b| b.is_ascii_digit() == numeric)
                .count();
            let run = &part[start..start + len];
            tokens.push(match run.parse::<u64>() {
                Ok(n) if numeric => PreToken::Num(n),
                _ => PreToken::Text(run),
            });
            start += len;
        }
    }
    tokens
}

fn cmp_pre(a: &str, b: &str) -> Ordering {
    pre_tokens(a).cmp(&pre_tokens(b))
}

/// Version constraint operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// Compatible release (`~=`)
    Compatible,
}

impl Operator {
    /// Longest tokens first so `>=` is not read as `>`.
    const TOKENS: [(&'static str, Operator); 7] = [
        ("==", Operator::Eq),
        ("!=", Operator::Ne),
        (">=", Operator::Ge),
        ("<=", Operator::Le),
        ("~=", Operator::Compatible),
        (">", Operator::Gt),
        ("<", Operator::Lt),
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Compatible => "~=",
        }
    }

    /// Sort rank used to keep simplified sets in a canonical order.
    fn rank(self) -> u8 {
        match self {
            Operator::Eq => 0,
            Operator::Compatible => 1,
            Operator::Gt | Operator::Ge => 2,
            Operator::Lt | Operator::Le => 3,
            Operator::Ne => 4,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(operator, version)` comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstraintClause {
    pub op: Operator,
    pub version: Version,
    precision: usize,
}

impl ConstraintClause {
    pub fn new(op: Operator, version: Version) -> Self {
        Self {
            op,
            version,
            precision: 3,
        }
    }

    /// Number of numeric components written in the clause (`==1.2` has 2).
    pub fn precision(&self) -> usize {
        self.precision
    }

    /// An exact pin that admits a single version, as opposed to a prefix pin.
    pub fn is_full_pin(&self) -> bool {
        self.op == Operator::Eq && (self.precision == 3 || self.version.pre.is_some())
    }

    /// Parse a clause like `>= 1.2.3` or `~=2.0`.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        let (op, rest) = Operator::TOKENS
            .iter()
            .find_map(|(token, op)| s.strip_prefix(token).map(|rest| (*op, rest)))
            .ok_or_else(|| Error::malformed(s, "expected one of ==, !=, >=, <=, ~=, >, <"))?;

        let (version, precision) = Version::parse_with_precision(rest)
            .map_err(|e| Error::malformed(s, e.to_string()))?;

        if op == Operator::Compatible && precision < 2 {
            return Err(Error::malformed(s, "~= needs at least major.minor"));
        }

        Ok(Self {
            op,
            version,
            precision,
        })
    }

    /// Check if a version satisfies this clause.
    pub fn matches(&self, candidate: &Version) -> bool {
        match self.op {
            Operator::Eq => self.prefix_matches(candidate),
            Operator::Ne => !self.prefix_matches(candidate),
            Operator::Gt => candidate > &self.version,
            Operator::Ge => candidate >= &self.version,
            Operator::Lt => candidate < &self.version,
            Operator::Le => candidate <= &self.version,
            Operator::Compatible => {
                let fixed = self.precision - 1;
                candidate >= &self.version
                    && candidate.release()[..fixed] == self.version.release()[..fixed]
            }
        }
    }

    /// `==1.2` matches `1.2.0rc1` and `1.2.3`; `==1.2.3` matches only `1.2.3`.
    fn prefix_matches(&self, candidate: &Version) -> bool {
        if self.is_full_pin() {
            return candidate == &self.version;
        }
        candidate.release()[..self.precision] == self.version.release()[..self.precision]
    }

    fn canonical_key(&self) -> (u8, &Version, bool, usize) {
        (
            self.op.rank(),
            &self.version,
            matches!(self.op, Operator::Gt | Operator::Le),
            self.precision,
        )
    }
}

impl fmt::Display for ConstraintClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.op.as_str())?;
        self.version.fmt_with_precision(f, self.precision)
    }
}

/// Clauses that must all hold for a single package. An empty set matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConstraintSet {
    clauses: Vec<ConstraintClause>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_clauses(clauses: impl IntoIterator<Item = ConstraintClause>) -> Self {
        Self {
            clauses: clauses.into_iter().collect(),
        }
    }

    /// Parse a comma-separated clause list such as `>=3.10,<3.12`.
    ///
    /// An empty string yields the empty (unconstrained) set; empty items between
    /// commas are rejected.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(Self::new());
        }
        s.split(',')
            .map(|part| {
                if part.trim().is_empty() {
                    Err(Error::malformed(s, "empty clause"))
                } else {
                    ConstraintClause::parse(part)
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self::from_clauses)
    }

    pub fn clauses(&self) -> &[ConstraintClause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// True when every clause accepts `version`.
    pub fn matches(&self, version: &Version) -> bool {
        self.clauses.iter().all(|c| c.matches(version))
    }

    /// Sort into canonical order and drop duplicates.
    pub(crate) fn canonicalize(mut self) -> Self {
        self.clauses.sort_by(|a, b| a.canonical_key().cmp(&b.canonical_key()));
        self.clauses.dedup();
        self
    }
}

impl FromStr for ConstraintSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConstraintSet::parse(s)
    }
}

impl TryFrom<String> for ConstraintSet {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        ConstraintSet::parse(&s)
    }
}

impl From<ConstraintSet> for String {
    fn from(set: ConstraintSet) -> Self {
        set.to_string()
    }
}

impl fmt::Display for ConstraintSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return f.write_str("*");
        }
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", clause)?;
        }
        Ok(())
    }
}

/// A package name with a version constraint set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Requirement {
    pub name: String,
    pub constraint: ConstraintSet,
}

impl Requirement {
    pub fn new(name: impl Into<String>, constraint: ConstraintSet) -> Self {
        Self {
            name: name.into(),
            constraint,
        }
    }

    /// Parse a requirement string like `"numpy>=1.20,<2.0"` or just `"attrs"`.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::malformed(s, "empty requirement"));
        }

        let name_end = s
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
            .unwrap_or(s.len());
        let name = &s[..name_end];
        if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
            return Err(Error::malformed(s, "missing package name"));
        }

        let constraint = ConstraintSet::parse(&s[name_end..]).map_err(|e| match e {
            Error::MalformedRequirement { reason, .. } => Error::malformed(s, reason),
            other => other,
        })?;

        Ok(Self {
            name: name.to_string(),
            constraint,
        })
    }

    /// Normalized name used to compare packages.
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }
}

impl FromStr for Requirement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Requirement::parse(s)
    }
}

impl TryFrom<String> for Requirement {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Requirement::parse(&s)
    }
}

impl From<Requirement> for String {
    fn from(req: Requirement) -> Self {
        req.to_string()
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraint.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}{}", self.name, self.constraint)
        }
    }
}

/// Lowercase a package name and collapse runs of `-`, `_` and `.` into `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('-');
        }
        pending_sep = false;
        out.push(c.to_ascii_lowercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_version_parse() {
        assert_eq!(v("1.2.3"), Version::new(1, 2, 3));
        assert_eq!(v("1.2"), Version::new(1, 2, 0));
        assert_eq!(v("1"), Version::new(1, 0, 0));
        assert_eq!(v("1.0.0-alpha"), Version::new(1, 0, 0).with_pre("alpha"));
        assert_eq!(v("1.2.0rc1"), Version::new(1, 2, 0).with_pre("rc1"));
        assert_eq!(v("1.0.0+build.5").build.as_deref(), Some("build.5"));
    }

    #[test]
    fn test_version_parse_rejects_garbage() {
        assert!("".parse::<Version>().is_err());
        assert!("v1.0".parse::<Version>().is_err());
        assert!("1.2.3.4".parse::<Version>().is_err());
        assert!("1..2".parse::<Version>().is_err());
        assert!("1.0-".parse::<Version>().is_err());
        assert!("1.0+".parse::<Version>().is_err());
        assert!("1.0 beta".parse::<Version>().is_err());
    }

    #[test]
    fn test_version_rejects_post_and_dev_releases() {
        assert!("1.0.post1".parse::<Version>().is_err());
        assert!("2.0.dev3".parse::<Version>().is_err());
        assert!("2.0-DEV".parse::<Version>().is_err());
        assert!("1.0r2".parse::<Version>().is_err());
        assert!("1.0rc1".parse::<Version>().is_ok());
    }

    #[test]
    fn test_equal_prereleases_hash_equal() {
        use std::collections::HashSet;

        let a = v("1.0.0rc1");
        let b = v("1.0.0rc.1");
        assert_eq!(a, b);
        let set: HashSet<Version> = [a, b, v("1.0.0-rc.1")].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_version_precision() {
        assert_eq!(Version::parse_with_precision("3").unwrap().1, 1);
        assert_eq!(Version::parse_with_precision("3.11").unwrap().1, 2);
        assert_eq!(Version::parse_with_precision("3.11.4rc2").unwrap().1, 3);
    }

    #[test]
    fn test_version_ordering() {
        assert!(v("1.0.0") < v("1.0.1"));
        assert!(v("1.0.1") < v("1.1.0"));
        assert!(v("1.1.0") < v("2.0.0"));
        assert!(v("1.0.0-alpha") < v("1.0.0"));
        assert!(v("1.0.0rc2") < v("1.0.0rc10"));
        assert!(v("1.0.0a1") < v("1.0.0b1"));
        assert_eq!(v("1.0.0+local"), v("1.0.0"));
    }

    #[test]
    fn test_clause_parse() {
        let c = ConstraintClause::parse(">= 1.2.3").unwrap();
        assert_eq!(c.op, Operator::Ge);
        assert_eq!(c.version, Version::new(1, 2, 3));

        let c = ConstraintClause::parse("~=1.5").unwrap();
        assert_eq!(c.op, Operator::Compatible);
        assert_eq!(c.precision(), 2);
        assert_eq!(c.to_string(), "~=1.5");
    }

    #[test]
    fn test_clause_parse_rejects_malformed() {
        for bad in ["1.0", "=1.0", "=>1.0", "===1.0", "<>1.0", ">=", "~=1", ">=abc"] {
            let err = ConstraintClause::parse(bad).unwrap_err();
            assert!(
                matches!(err, Error::MalformedRequirement { .. }),
                "{bad} should be malformed, got {err:?}"
            );
        }
    }

    #[test]
    fn test_clause_matches() {
        let x = Version::new(1, 5, 3);
        assert!(ConstraintClause::parse(">=1.5").unwrap().matches(&x));
        assert!(ConstraintClause::parse("<=2.0").unwrap().matches(&x));
        assert!(!ConstraintClause::parse("<1.5").unwrap().matches(&x));
        assert!(ConstraintClause::parse("!=1.5.2").unwrap().matches(&x));
        assert!(!ConstraintClause::parse("!=1.5").unwrap().matches(&x));
    }

    #[test]
    fn test_compatible_release() {
        let c = ConstraintClause::parse("~=1.4.5").unwrap();
        assert!(c.matches(&v("1.4.5")));
        assert!(c.matches(&v("1.4.9")));
        assert!(!c.matches(&v("1.5.0")));
        assert!(!c.matches(&v("1.4.4")));

        let c = ConstraintClause::parse("~=2.2").unwrap();
        assert!(c.matches(&v("2.9.1")));
        assert!(!c.matches(&v("3.0.0")));
        assert!(!c.matches(&v("2.1.0")));
    }

    #[test]
    fn test_exact_prefix_match() {
        let c = ConstraintClause::parse("==1.2").unwrap();
        assert!(c.matches(&v("1.2.0rc1")));
        assert!(c.matches(&v("1.2.3")));
        assert!(!c.matches(&v("1.20.0")));
        assert!(!c.matches(&v("2.0.0")));

        let full = ConstraintClause::parse("==1.2.3").unwrap();
        assert!(full.matches(&v("1.2.3")));
        assert!(!full.matches(&v("1.2.3rc1")));

        let pre = ConstraintClause::parse("==1.2.0rc1").unwrap();
        assert!(pre.matches(&v("1.2.0rc1")));
        assert!(!pre.matches(&v("1.2.0")));
    }

    #[test]
    fn test_set_parse_and_display() {
        let set = ConstraintSet::parse(">=3.10, <3.12").unwrap();
        assert_eq!(set.clauses().len(), 2);
        assert_eq!(set.to_string(), ">=3.10,<3.12");
        assert!(set.matches(&v("3.11.4")));
        assert!(!set.matches(&v("3.9.18")));

        assert!(ConstraintSet::parse("").unwrap().is_empty());
        assert_eq!(ConstraintSet::new().to_string(), "*");
        assert!(ConstraintSet::parse(">=1.0,").is_err());
    }

    #[test]
    fn test_requirement_parse() {
        let req = Requirement::parse("numpy>=1.20,<2.0").unwrap();
        assert_eq!(req.name, "numpy");
        assert_eq!(req.constraint.to_string(), ">=1.20,<2.0");

        let req = Requirement::parse("zope.interface ~= 6.0").unwrap();
        assert_eq!(req.name, "zope.interface");

        let req = Requirement::parse("attrs").unwrap();
        assert!(req.constraint.is_empty());
        assert_eq!(req.to_string(), "attrs");
    }

    #[test]
    fn test_requirement_parse_errors_carry_input() {
        let err = Requirement::parse("numpy >> 1.0").unwrap_err();
        assert!(err.to_string().contains("numpy >> 1.0"));
        assert!(Requirement::parse("").is_err());
        assert!(Requirement::parse(">=1.0").is_err());
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Zope.Interface"), "zope-interface");
        assert_eq!(normalize_name("typing__extensions"), "typing-extensions");
        assert_eq!(normalize_name("ruamel-yaml"), "ruamel-yaml");
    }

    #[test]
    fn test_constraint_set_serde_roundtrip_through_toml() {
        #[derive(Serialize, Deserialize)]
        struct Doc {
            runtime: ConstraintSet,
            version: Version,
        }
        let doc: Doc = toml::from_str("runtime = \">=3.10,<3.12\"\nversion = \"3.11.4\"").unwrap();
        assert_eq!(doc.runtime.to_string(), ">=3.10,<3.12");
        assert_eq!(doc.version, Version::new(3, 11, 4));
    }
}
