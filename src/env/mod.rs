//! Environment lifecycle: install, reinstall, remove and touch one isolated
//! environment root.
//!
//! ```text
//! NotInstalled --install--> Installed --remove--> NotInstalled
//!                              |  ^
//!                              +--+ install (re-sync, or recreate when the
//!                                   runtime no longer satisfies the spec)
//! ```
//!
//! `env.toml` inside the root is the only record of an installed environment.
//! Install and remove run under an exclusive [`EnvLock`] from the
//! reinstall check through the metadata write, so concurrent processes never
//! observe a half-built or half-removed root.

pub mod lock;
pub mod metadata;
pub mod spec_file;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::core::artifact::CompatibilityProfile;
use crate::core::release::Release;
use crate::core::resolve::ClosureBuilder;
use crate::core::version::{ConstraintSet, normalize_name};
use crate::error::{Error, ProvisionError, Result};
use crate::hooks::{BEFORE_UNINSTALL, HookTable, UninstallHook};
use crate::provider::events::{self, EventSink, NullSink};
use crate::provider::RuntimeProvisioner;

pub use lock::EnvLock;
pub use metadata::{EnvMetadata, InstalledRelease};
pub use spec_file::SpecFile;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_LOCK_STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

pub const DEFAULT_VARIANT: &str = "default";

/// What to install into one environment. Immutable for the duration of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSpec {
    /// Stable environment identity, e.g. a revision identifier.
    pub id: String,
    pub variant: String,
    /// Required runtime version keyed by host OS (`linux`, `macos`, `windows`).
    pub runtime: BTreeMap<String, ConstraintSet>,
    pub releases: Vec<Release>,
}

impl EnvironmentSpec {
    pub fn new(id: impl Into<String>, releases: Vec<Release>) -> Self {
        Self {
            id: id.into(),
            variant: DEFAULT_VARIANT.to_string(),
            runtime: BTreeMap::new(),
            releases,
        }
    }

    #[must_use]
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = variant.into();
        self
    }

    #[must_use]
    pub fn with_runtime(mut self, os: impl Into<String>, constraint: ConstraintSet) -> Self {
        self.runtime.insert(os.into(), constraint);
        self
    }

    pub fn runtime_for(&self, os: &str) -> Option<&ConstraintSet> {
        self.runtime.get(os)
    }

    /// Digest of the root release ids and the runtime requirement for `os`.
    pub fn digest(&self, os: &str) -> String {
        let runtime = self.runtime_for(os).cloned().unwrap_or_default();
        let ids: Vec<String> = self.releases.iter().map(Release::id).collect();
        metadata::spec_digest(&runtime, ids.iter().map(String::as_str))
    }
}

/// Root directory for an environment: `<envs_root>/<id>-<variant>`.
pub fn environment_root(envs_root: &Path, id: &str, variant: &str) -> PathBuf {
    envs_root.join(format!("{id}-{variant}"))
}

/// Observed state of an environment relative to a spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvState {
    NotInstalled,
    Installed,
    /// Installed, but from a different spec or with a runtime that no longer
    /// satisfies it.
    Drifted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// Recreate the runtime even when the existing one still satisfies the spec.
    pub clean: bool,
    /// Ask the installer not to use its download cache.
    pub no_cache: bool,
}

/// Owns one environment root and drives it through its lifecycle.
pub struct EnvironmentManager {
    root: PathBuf,
    resolver: ClosureBuilder,
    provisioner: Arc<dyn RuntimeProvisioner>,
    events: Arc<dyn EventSink>,
    hooks: HookTable<UninstallHook>,
    profile: CompatibilityProfile,
    os: String,
    lock_timeout: Duration,
    lock_stale_after: Duration,
}

impl EnvironmentManager {
    pub fn new(
        root: impl Into<PathBuf>,
        resolver: ClosureBuilder,
        provisioner: Arc<dyn RuntimeProvisioner>,
        profile: CompatibilityProfile,
    ) -> Self {
        Self {
            root: root.into(),
            resolver,
            provisioner,
            events: Arc::new(NullSink),
            hooks: HookTable::new(),
            profile,
            os: std::env::consts::OS.to_string(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_stale_after: DEFAULT_LOCK_STALE_AFTER,
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: HookTable<UninstallHook>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Host OS key used to pick the runtime requirement from a spec.
    #[must_use]
    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = os.into();
        self
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration, stale_after: Duration) -> Self {
        self.lock_timeout = timeout;
        self.lock_stale_after = stale_after;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn hooks(&self) -> &HookTable<UninstallHook> {
        &self.hooks
    }

    pub fn is_installed(&self) -> bool {
        EnvMetadata::exists(&self.root)
    }

    /// Persisted metadata, or `None` when not installed.
    pub fn metadata(&self) -> Result<Option<EnvMetadata>> {
        if self.is_installed() {
            EnvMetadata::read(&self.root).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn last_used(&self) -> Option<SystemTime> {
        metadata::last_used(&self.root)
    }

    /// True when not installed, or when the provisioned runtime does not
    /// satisfy the spec's requirement for this host OS.
    pub fn needs_reinstall(&self, spec: &EnvironmentSpec) -> bool {
        let meta = match EnvMetadata::read(&self.root) {
            Ok(meta) => meta,
            Err(e) => {
                if self.is_installed() {
                    warn!(root = %self.root.display(), error = %e, "unreadable metadata, forcing reinstall");
                }
                return true;
            }
        };
        let Some(required) = spec.runtime_for(&self.os) else {
            return false;
        };
        match self.provisioner.runtime_version(&meta.runtime_path) {
            Ok(version) => {
                let satisfied = required.matches(&version);
                debug!(%version, %required, satisfied, "checked runtime version");
                !satisfied
            }
            Err(e) => {
                warn!(runtime = %meta.runtime_path.display(), error = %e, "runtime unusable, forcing reinstall");
                true
            }
        }
    }

    pub fn status(&self, spec: &EnvironmentSpec) -> Result<EnvState> {
        let Some(meta) = self.metadata()? else {
            return Ok(EnvState::NotInstalled);
        };
        if meta.spec_digest != spec.digest(&self.os) || self.needs_reinstall(spec) {
            Ok(EnvState::Drifted)
        } else {
            Ok(EnvState::Installed)
        }
    }

    /// Resolve `spec`, (re)create the runtime when needed and install every
    /// release of the closure. Metadata is written only after all packages
    /// installed.
    pub fn install(&self, spec: &EnvironmentSpec, options: InstallOptions, cancel: &CancelToken) -> Result<()> {
        let _lock = self.lock()?;
        self.install_locked(spec, options, cancel)
    }

    /// Returns `false` when there was nothing to remove. Unless `fast`, every
    /// installed release is uninstalled first and its before-uninstall hook run.
    pub fn remove(&self, fast: bool, cancel: &CancelToken) -> Result<bool> {
        let _lock = self.lock()?;
        self.remove_locked(fast, cancel)
    }

    /// Full remove followed by install under one lock. Install does not run
    /// when the remove fails.
    pub fn reinstall(&self, spec: &EnvironmentSpec, options: InstallOptions, cancel: &CancelToken) -> Result<()> {
        let _lock = self.lock()?;
        self.remove_locked(false, cancel)?;
        self.install_locked(spec, options, cancel)
    }

    /// Mark the environment as used now.
    pub fn touch(&self) -> Result<()> {
        if !self.is_installed() {
            return Err(Error::NotInstalled {
                path: self.root.clone(),
            });
        }
        metadata::touch_last_used(&self.root)
    }

    fn lock(&self) -> Result<EnvLock> {
        EnvLock::acquire(&self.root, self.lock_timeout, self.lock_stale_after)
    }

    fn install_locked(&self, spec: &EnvironmentSpec, options: InstallOptions, cancel: &CancelToken) -> Result<()> {
        self.emit(events::BEFORE_INSTALL, self.payload(spec, &[]));

        cancel.check("resolving dependencies")?;
        let closure = self.resolver.resolve(&spec.releases)?;
        if closure.is_empty() {
            return Err(Error::NoPackagesToInstall);
        }
        let locators = closure
            .iter()
            .map(|release| release.installable_locator(&self.profile))
            .collect::<Result<Vec<_>>>()?;

        let runtime_constraint = spec.runtime_for(&self.os).cloned().unwrap_or_default();
        let existing = if options.clean || self.needs_reinstall(spec) {
            None
        } else {
            self.metadata()?
        };

        let runtime = match existing {
            Some(meta) => {
                debug!(runtime = %meta.runtime_path.display(), "reusing runtime");
                let wanted: HashSet<String> = closure.iter().map(|r| normalize_name(&r.name)).collect();
                let dropped: Vec<InstalledRelease> = meta
                    .releases
                    .iter()
                    .filter(|r| !wanted.contains(&normalize_name(&r.name)))
                    .cloned()
                    .collect();
                if !dropped.is_empty() {
                    cancel.check("uninstalling dropped packages")?;
                    info!(count = dropped.len(), "uninstalling releases no longer in the closure");
                    self.uninstall_releases(&meta.runtime_path, &dropped);
                }
                meta.runtime_path
            }
            None => self.recreate_runtime(&runtime_constraint, cancel)?,
        };

        for (release, locator) in closure.iter().zip(&locators) {
            cancel.check("installing packages")?;
            debug!(release = %release, %locator, "installing");
            self.provisioner
                .install_artifacts(&runtime, std::slice::from_ref(locator), options.no_cache)
                .map_err(|source| self.provision_error(format!("installing {}", release.id()), source))?;
        }

        let meta = EnvMetadata {
            id: spec.id.clone(),
            variant: spec.variant.clone(),
            runtime_constraint,
            runtime_path: runtime,
            spec_digest: spec.digest(&self.os),
            installed_at: metadata::unix_now(),
            releases: closure.iter().map(InstalledRelease::from).collect(),
        };
        meta.write(&self.root)?;
        metadata::touch_last_used(&self.root)?;

        info!(root = %self.root.display(), releases = closure.len(), "environment installed");
        let ids: Vec<String> = closure.iter().map(Release::id).collect();
        self.emit(events::INSTALLED, self.payload(spec, &ids));
        Ok(())
    }

    /// Tear down whatever is at the root and provision a fresh runtime.
    fn recreate_runtime(&self, constraint: &ConstraintSet, cancel: &CancelToken) -> Result<PathBuf> {
        if self.is_installed() {
            self.remove_locked(false, cancel)?;
        } else if self.root.exists() {
            debug!(root = %self.root.display(), "clearing leftover environment directory");
            self.delete_tree(cancel)?;
        }

        cancel.check("creating runtime")?;
        std::fs::create_dir_all(&self.root).map_err(|e| Error::io(&self.root, e))?;
        info!(root = %self.root.display(), %constraint, "creating runtime");
        self.provisioner
            .create_runtime(&self.root, constraint)
            .map_err(|source| self.provision_error("creating runtime".to_string(), source))
    }

    fn remove_locked(&self, fast: bool, cancel: &CancelToken) -> Result<bool> {
        if !self.is_installed() {
            return Ok(false);
        }
        cancel.check("removing environment")?;
        let meta = match EnvMetadata::read(&self.root) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(error = %e, "removing environment with unreadable metadata");
                None
            }
        };

        let ids = meta.as_ref().map(EnvMetadata::release_ids).unwrap_or_default();
        let payload = json!({
            "root": self.root.display().to_string(),
            "fast": fast,
            "releases": ids,
        });
        self.emit(events::BEFORE_REMOVE, payload.clone());

        if !fast && let Some(meta) = &meta {
            self.uninstall_releases(&meta.runtime_path, &meta.releases);
        }

        self.delete_tree(cancel)?;
        info!(root = %self.root.display(), fast, "environment removed");
        self.emit(events::REMOVED, payload);
        Ok(true)
    }

    /// Run before-uninstall hooks and uninstall `releases`; failures are logged.
    fn uninstall_releases(&self, runtime: &Path, releases: &[InstalledRelease]) {
        for release in releases {
            if let Some(hook) = self.hooks.get(BEFORE_UNINSTALL, &normalize_name(&release.name))
                && let Err(e) = hook(release)
            {
                warn!(release = %release.id(), error = %e, "before-uninstall hook failed");
            }
        }

        let names: Vec<String> = releases.iter().map(|r| r.name.clone()).collect();
        if let Err(e) = self.provisioner.uninstall_packages(runtime, &names) {
            warn!(error = %e, "uninstalling packages failed, continuing");
        }
    }

    /// Delete metadata first so an interrupted removal never looks installed.
    fn delete_tree(&self, cancel: &CancelToken) -> Result<()> {
        cancel.check("deleting environment")?;

        let meta_path = EnvMetadata::path(&self.root);
        match std::fs::remove_file(&meta_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(meta_path, e)),
        }

        self.provisioner
            .delete_runtime(&self.root)
            .map_err(|source| self.provision_error("deleting runtime".to_string(), source))?;

        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(&self.root, e)),
        }
    }

    fn provision_error(&self, step: String, source: ProvisionError) -> Error {
        Error::RuntimeProvision {
            step,
            path: self.root.clone(),
            source,
        }
    }

    fn payload(&self, spec: &EnvironmentSpec, releases: &[String]) -> Value {
        json!({
            "id": spec.id,
            "variant": spec.variant,
            "root": self.root.display().to_string(),
            "releases": releases,
        })
    }

    fn emit(&self, event: &str, payload: Value) {
        if let Err(e) = self.events.emit(event, &payload) {
            warn!(event, error = %e, "event sink failed");
        }
    }
}
