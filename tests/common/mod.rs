//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use levitate_env::core::artifact::ReleaseFile;
use levitate_env::core::version::normalize_name;
use levitate_env::error::{ProviderError, ProvisionError};
use levitate_env::{
    ConstraintSet, EventSink, Release, ReleaseProvider, Requirement, RuntimeProvisioner, Version,
};
use parking_lot::Mutex;
use serde_json::Value;

pub fn version(s: &str) -> Version {
    s.parse().unwrap()
}

pub fn constraint(s: &str) -> ConstraintSet {
    ConstraintSet::parse(s).unwrap()
}

/// Release with one pure-Python wheel and the given requirements.
pub fn release(name: &str, ver: &str, requires: &[&str]) -> Release {
    let filename = format!("{}-{}-py3-none-any.whl", name.replace('-', "_"), ver);
    let locator = format!("https://files.example/{filename}");
    let mut release = Release::new(name, version(ver)).with_file(ReleaseFile::new(filename, 1024, locator));
    for req in requires {
        release = release.with_requirement(Requirement::parse(req).unwrap());
    }
    release
}

/// Release index held in memory. Counts calls and can fail the first
/// `flaky` listings with a connection error.
#[derive(Default)]
pub struct FakeIndex {
    releases: BTreeMap<String, Vec<Release>>,
    pub list_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    flaky: AtomicUsize,
}

impl FakeIndex {
    pub fn new(releases: impl IntoIterator<Item = Release>) -> Self {
        let mut index = Self::default();
        for release in releases {
            index.releases.entry(release.key()).or_default().push(release);
        }
        index
    }

    pub fn flaky(self, failures: usize) -> Self {
        self.flaky.store(failures, Ordering::SeqCst);
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl ReleaseProvider for FakeIndex {
    fn list_versions(&self, package: &str) -> Result<Vec<Version>, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .flaky
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::Connection("connection reset".into()));
        }
        self.releases
            .get(&normalize_name(package))
            .map(|list| list.iter().map(|r| r.version.clone()).collect())
            .ok_or_else(|| ProviderError::NotFound(package.to_string()))
    }

    fn get_release(&self, package: &str, version: &Version) -> Result<Release, ProviderError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.releases
            .get(&normalize_name(package))
            .and_then(|list| list.iter().find(|r| &r.version == version))
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("{package} {version}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(ConstraintSet),
    Delete,
    Install(Vec<String>),
    Uninstall(Vec<String>),
}

/// Provisioner that records every call and fakes a runtime on disk.
///
/// New runtimes report `next_version`; `fail_install_of` makes installing
/// that locator fail.
pub struct RecordingProvisioner {
    pub calls: Mutex<Vec<Call>>,
    next_version: Mutex<Version>,
    current: Mutex<Option<Version>>,
    fail_install_of: Mutex<Option<String>>,
}

impl RecordingProvisioner {
    pub fn new(runtime_version: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_version: Mutex::new(version(runtime_version)),
            current: Mutex::new(None),
            fail_install_of: Mutex::new(None),
        }
    }

    pub fn set_next_version(&self, v: &str) {
        *self.next_version.lock() = version(v);
    }

    pub fn fail_install_of(&self, locator: &str) {
        *self.fail_install_of.lock() = Some(locator.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn creates(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, Call::Create(_))).count()
    }

    pub fn installed_locators(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Install(locators) => Some(locators),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

impl RuntimeProvisioner for RecordingProvisioner {
    fn create_runtime(&self, root: &Path, constraint: &ConstraintSet) -> Result<PathBuf, ProvisionError> {
        self.calls.lock().push(Call::Create(constraint.clone()));
        let next = self.next_version.lock().clone();
        if !constraint.matches(&next) {
            return Err(ProvisionError::NoInterpreter(constraint.clone()));
        }
        let bin = root.join("runtime").join("bin");
        std::fs::create_dir_all(&bin)?;
        let exe = bin.join("python");
        std::fs::write(&exe, next.to_string())?;
        *self.current.lock() = Some(next);
        Ok(exe)
    }

    fn delete_runtime(&self, root: &Path) -> Result<(), ProvisionError> {
        self.calls.lock().push(Call::Delete);
        match std::fs::remove_dir_all(root.join("runtime")) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        *self.current.lock() = None;
        Ok(())
    }

    fn install_artifacts(&self, _runtime: &Path, locators: &[String], _no_cache: bool) -> Result<(), ProvisionError> {
        self.calls.lock().push(Call::Install(locators.to_vec()));
        if let Some(bad) = self.fail_install_of.lock().as_deref()
            && locators.iter().any(|l| l == bad)
        {
            return Err(ProvisionError::CommandFailed {
                cmd: format!("pip install {bad}"),
                code: Some(1),
                stderr: "ERROR: could not install".into(),
            });
        }
        Ok(())
    }

    fn uninstall_packages(&self, _runtime: &Path, names: &[String]) -> Result<(), ProvisionError> {
        self.calls.lock().push(Call::Uninstall(names.to_vec()));
        Ok(())
    }

    fn runtime_version(&self, runtime: &Path) -> Result<Version, ProvisionError> {
        let raw = std::fs::read_to_string(runtime)?;
        raw.trim().parse().map_err(|_| ProvisionError::BadVersion(raw))
    }
}

/// Sink that records event names; optionally fails on every emit.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<(String, Value)>>,
    pub fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(|(name, _)| name.clone()).collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &str, payload: &Value) -> anyhow::Result<()> {
        self.events.lock().push((event.to_string(), payload.clone()));
        if self.fail {
            anyhow::bail!("sink unavailable");
        }
        Ok(())
    }
}
