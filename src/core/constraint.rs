//! Constraint set algebra: merge, simplify, satisfiability and best-version selection.
//!
//! Constraint sets range over an unbounded version space, so satisfiability is
//! approximated by probing a bounded lattice of `major.minor.patch` versions in
//! descending order. The lattice covers `0..=max_component` on every axis, plus
//! the neighbours of every version a clause mentions so that bounds such as
//! `>=1.20` are still reachable with a small range. A set whose only solutions
//! lie outside the lattice is reported unsatisfiable (a false negative); a set
//! reported satisfiable always has a concrete witness.

use std::collections::BTreeSet;

use tracing::debug;

use super::version::{ConstraintClause, ConstraintSet, Operator, Version};
use crate::error::{Error, Result};

/// Default upper bound for each probed version component.
pub const DEFAULT_PROBE_MAX: u64 = 9;

/// Bounds of the synthetic version lattice used for satisfiability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeRange {
    pub max_component: u64,
}

impl Default for ProbeRange {
    fn default() -> Self {
        Self {
            max_component: DEFAULT_PROBE_MAX,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConstraintAlgebra {
    probe: ProbeRange,
}

impl ConstraintAlgebra {
    pub fn new(probe: ProbeRange) -> Self {
        Self { probe }
    }

    pub fn probe(&self) -> ProbeRange {
        self.probe
    }

    /// Union the clauses of `a` and `b` for `package` and simplify.
    ///
    /// Fails with [`Error::Conflict`] when the union has no witness in the probe lattice.
    pub fn merge(&self, package: &str, a: &ConstraintSet, b: &ConstraintSet) -> Result<ConstraintSet> {
        let union = ConstraintSet::from_clauses(a.clauses().iter().chain(b.clauses()).cloned());
        if !self.satisfiable(&union) {
            return Err(Error::Conflict {
                package: package.to_string(),
                clauses: union.canonicalize(),
            });
        }
        Ok(self.simplify(&union))
    }

    pub fn satisfiable(&self, set: &ConstraintSet) -> bool {
        set.is_empty() || self.highest_in_probe(set).is_some()
    }

    /// Highest lattice version satisfying every clause of `set`.
    pub fn highest_in_probe(&self, set: &ConstraintSet) -> Option<Version> {
        // Pre-release pins can never be hit by the numeric lattice, so the
        // versions named by the clauses are tried as witnesses too.
        let named = set
            .clauses()
            .iter()
            .map(|c| &c.version)
            .filter(|v| v.is_prerelease() && set.matches(v))
            .max()
            .cloned();

        let axes: [Vec<u64>; 3] = std::array::from_fn(|axis| self.axis_values(set, axis));
        let mut probed = 0usize;
        for &major in &axes[0] {
            for &minor in &axes[1] {
                for &patch in &axes[2] {
                    probed += 1;
                    let candidate = Version::new(major, minor, patch);
                    if set.matches(&candidate) {
                        debug!(%set, %candidate, probed, "probe hit");
                        return Some(match named {
                            Some(pre) if pre > candidate => pre,
                            _ => candidate,
                        });
                    }
                }
            }
        }
        debug!(%set, probed, "probe exhausted");
        named
    }

    /// Descending probe values for one version component.
    fn axis_values(&self, set: &ConstraintSet, axis: usize) -> Vec<u64> {
        let mut values: BTreeSet<u64> = (0..=self.probe.max_component).collect();
        for clause in set.clauses() {
            let anchor = clause.version.release()[axis];
            values.insert(anchor.saturating_sub(1));
            values.insert(anchor);
            values.insert(anchor.saturating_add(1));
        }
        values.into_iter().rev().collect()
    }

    /// Reduce redundant clauses into a canonical set.
    ///
    /// A full `==` pin wins over prefix pins and absorbs every other clause;
    /// otherwise the highest prefix pin is kept. Without a full pin only the tightest lower
    /// and upper bounds are kept. `!=` and `~=` clauses are kept verbatim.
    pub fn simplify(&self, set: &ConstraintSet) -> ConstraintSet {
        let (exact, rest): (Vec<&ConstraintClause>, Vec<&ConstraintClause>) =
            set.clauses().iter().partition(|c| c.op == Operator::Eq);

        // A full pin admits one version, so it outranks every prefix pin.
        let pin = exact
            .iter()
            .filter(|c| c.is_full_pin())
            .max_by(|a, b| a.version.cmp(&b.version))
            .or_else(|| {
                exact.iter().max_by(|a, b| {
                    a.version
                        .cmp(&b.version)
                        .then(a.precision().cmp(&b.precision()))
                })
            })
            .copied();

        let mut kept = Vec::new();
        if let Some(pin) = pin {
            kept.push(pin.clone());
            if pin.is_full_pin() {
                return ConstraintSet::from_clauses(kept);
            }
        }

        let lower = rest
            .iter()
            .filter(|c| matches!(c.op, Operator::Gt | Operator::Ge))
            .max_by(|a, b| {
                a.version
                    .cmp(&b.version)
                    .then((a.op == Operator::Gt).cmp(&(b.op == Operator::Gt)))
            });
        let upper = rest
            .iter()
            .filter(|c| matches!(c.op, Operator::Lt | Operator::Le))
            .min_by(|a, b| {
                a.version
                    .cmp(&b.version)
                    .then((a.op == Operator::Le).cmp(&(b.op == Operator::Le)))
            });

        kept.extend(lower.map(|c| (*c).clone()));
        kept.extend(upper.map(|c| (*c).clone()));
        kept.extend(
            rest.iter()
                .filter(|c| matches!(c.op, Operator::Ne | Operator::Compatible))
                .map(|c| (*c).clone()),
        );
        ConstraintSet::from_clauses(kept).canonicalize()
    }

    /// Highest version in `available` that satisfies `set`.
    ///
    /// Returns `None` rather than an error so the caller decides whether a miss is fatal.
    pub fn select_best<'v>(&self, set: &ConstraintSet, available: &'v [Version]) -> Option<&'v Version> {
        available.iter().filter(|v| set.matches(v)).max()
    }
}
