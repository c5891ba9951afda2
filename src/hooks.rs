//! Named hook registry.
//!
//! Hooks are keyed by `(category, name)`. Registering a key twice replaces the
//! earlier hook and records the replacement, so callers can see which
//! registration won instead of relying on load order.

use std::collections::HashMap;

use tracing::debug;

use crate::env::metadata::InstalledRelease;

/// Category for hooks run before a release is uninstalled.
pub const BEFORE_UNINSTALL: &str = "before_uninstall";

/// Hook run against one installed release before it is uninstalled.
pub type UninstallHook = Box<dyn Fn(&InstalledRelease) -> anyhow::Result<()> + Send + Sync>;

/// A replaced registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    pub category: String,
    pub name: String,
    /// Who registered the hook that was replaced.
    pub replaced: String,
    /// Who registered the hook that now wins.
    pub by: String,
}

struct Entry<H> {
    source: String,
    hook: H,
}

/// Last-writer-wins table of hooks with an audit log of overrides.
pub struct HookTable<H> {
    entries: HashMap<(String, String), Entry<H>>,
    overrides: Vec<Override>,
}

impl<H> Default for HookTable<H> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            overrides: Vec::new(),
        }
    }
}

impl<H> HookTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` under `(category, name)`; `source` identifies the registrant.
    pub fn register(&mut self, category: &str, name: &str, source: &str, hook: H) {
        let key = (category.to_string(), name.to_string());
        let entry = Entry {
            source: source.to_string(),
            hook,
        };
        if let Some(previous) = self.entries.insert(key, entry) {
            debug!(category, name, replaced = %previous.source, by = source, "hook overridden");
            self.overrides.push(Override {
                category: category.to_string(),
                name: name.to_string(),
                replaced: previous.source,
                by: source.to_string(),
            });
        }
    }

    pub fn get(&self, category: &str, name: &str) -> Option<&H> {
        self.entries
            .get(&(category.to_string(), name.to_string()))
            .map(|entry| &entry.hook)
    }

    /// Registrant of the hook currently in effect.
    pub fn source_of(&self, category: &str, name: &str) -> Option<&str> {
        self.entries
            .get(&(category.to_string(), name.to_string()))
            .map(|entry| entry.source.as_str())
    }

    /// Every replacement, oldest first.
    pub fn overrides(&self) -> &[Override] {
        &self.overrides
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H> std::fmt::Debug for HookTable<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        f.debug_struct("HookTable")
            .field("keys", &keys)
            .field("overrides", &self.overrides)
            .finish()
    }
}
