//! envctl - manage isolated package environments
//!
//! Usage:
//!   envctl install <spec.toml>     Resolve and install an environment
//!   envctl reinstall <spec.toml>   Remove, then install from scratch
//!   envctl remove <spec.toml>      Remove an environment
//!   envctl status <spec.toml>      Show whether an environment is current
//!   envctl touch <spec.toml>       Mark an environment as recently used
//!   envctl resolve <spec.toml>     Print the release closure without installing

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use levitate_env::core::artifact::CompatibilityProfile;
use levitate_env::core::constraint::ConstraintAlgebra;
use levitate_env::core::resolve::{ClosureBuilder, VersionCache};
use levitate_env::core::version::Version;
use levitate_env::env::{EnvState, EnvironmentManager, EnvironmentSpec, InstallOptions, SpecFile, environment_root};
use levitate_env::error::ProviderError;
use levitate_env::provider::{CommandProvisioner, IndexProvider, ReleaseProvider, TracingSink};
use levitate_env::{CancelToken, Release, Settings, output};

#[derive(Parser)]
#[command(name = "envctl")]
#[command(about = "Resolve package requirements into isolated runtime environments")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (merged over the XDG config files)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding environment roots
    #[arg(long, global = true)]
    envs_root: Option<PathBuf>,

    /// Package index base URL
    #[arg(long, global = true)]
    index: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Give up at the next lifecycle step after this many seconds
    #[arg(long, global = true, env = "LEVITATE_ENV_DEADLINE")]
    deadline: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve and install an environment
    Install {
        spec: PathBuf,

        /// Recreate the runtime even if it still satisfies the spec
        #[arg(long)]
        clean: bool,

        /// Do not use the installer's download cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Remove the environment, then install it from scratch
    Reinstall {
        spec: PathBuf,

        #[arg(long)]
        no_cache: bool,
    },

    /// Remove an environment
    Remove {
        spec: PathBuf,

        /// Skip per-package uninstall and hooks, just delete the directory
        #[arg(long)]
        fast: bool,
    },

    /// Show whether an environment matches its spec
    Status { spec: PathBuf },

    /// Mark an environment as recently used
    Touch { spec: PathBuf },

    /// Print the release closure without installing anything
    Resolve { spec: PathBuf },
}

/// Stand-in provider for commands that never resolve.
struct Offline;

impl ReleaseProvider for Offline {
    fn list_versions(&self, package: &str) -> std::result::Result<Vec<Version>, ProviderError> {
        Err(ProviderError::NotFound(format!("{package} (offline)")))
    }

    fn get_release(&self, package: &str, version: &Version) -> std::result::Result<Release, ProviderError> {
        Err(ProviderError::NotFound(format!("{package} {version} (offline)")))
    }
}

fn setup_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("LEVITATE_ENV_LOG").unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("levitate_env=debug,info")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

struct App {
    settings: Settings,
    provisioner: Arc<CommandProvisioner>,
}

impl App {
    fn index(&self) -> Result<Arc<dyn ReleaseProvider>> {
        let Some(url) = self.settings.index_url.as_deref() else {
            bail!("no package index configured (use --index, LEVITATE_ENV_INDEX or index_url in config.toml)");
        };
        Ok(Arc::new(IndexProvider::new(url, self.settings.http_timeout)))
    }

    fn resolver(&self, provider: Arc<dyn ReleaseProvider>) -> ClosureBuilder {
        ClosureBuilder::new(provider)
            .with_algebra(ConstraintAlgebra::new(self.settings.probe_range()))
            .with_cache(Arc::new(VersionCache::new(self.settings.cache_ttl)))
            .with_retry(self.settings.retry_policy())
            .with_parallelism(self.settings.parallelism)
    }

    /// Compatibility profile of the interpreter that would back `spec`.
    fn profile(&self, spec: &EnvironmentSpec) -> Result<CompatibilityProfile> {
        let constraint = spec.runtime_for(std::env::consts::OS).cloned().unwrap_or_default();
        let (program, version) = self
            .provisioner
            .find_interpreter(&constraint)
            .with_context(|| format!("No interpreter for environment {}", spec.id))?;
        output::detail(&format!("using {} ({})", program, version));
        Ok(CompatibilityProfile::for_host(&version))
    }

    fn manager(&self, spec: &EnvironmentSpec, resolver: ClosureBuilder, profile: CompatibilityProfile) -> EnvironmentManager {
        let root = environment_root(&self.settings.envs_root, &spec.id, &spec.variant);
        EnvironmentManager::new(root, resolver, self.provisioner.clone(), profile)
            .with_events(Arc::new(TracingSink))
            .with_lock_timeout(self.settings.lock_timeout, self.settings.lock_stale_after)
    }

    fn offline_manager(&self, spec: &EnvironmentSpec) -> EnvironmentManager {
        self.manager(spec, self.resolver(Arc::new(Offline)), CompatibilityProfile::default())
    }

    /// Load the spec file and fetch its roots from the index.
    fn online(&self, path: &Path) -> Result<(EnvironmentSpec, EnvironmentManager)> {
        let file = load_spec(path)?;
        let provider = self.index()?;
        let spec = file
            .fetch(provider.as_ref(), &self.settings.retry_policy())
            .with_context(|| format!("Failed to fetch root releases for {}", file.id))?;
        let profile = self.profile(&spec)?;
        let manager = self.manager(&spec, self.resolver(provider), profile);
        Ok((spec, manager))
    }
}

fn load_spec(path: &Path) -> Result<SpecFile> {
    SpecFile::load(path).with_context(|| format!("Failed to load environment spec: {}", path.display()))
}

fn env_name(spec: &EnvironmentSpec) -> String {
    format!("{}-{}", spec.id, spec.variant)
}

fn main() {
    if let Err(e) = run() {
        output::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(root) = cli.envs_root {
        settings.envs_root = root;
    }
    if let Some(index) = cli.index {
        settings.index_url = Some(index);
    }
    let provisioner = Arc::new(CommandProvisioner::new(settings.interpreters.clone()));
    let app = App { settings, provisioner };
    let cancel = CancelToken::new();
    if let Some(secs) = cli.deadline {
        cancel.cancel_after(Duration::from_secs(secs));
    }

    match cli.command {
        Commands::Install { spec, clean, no_cache } => {
            let (spec, manager) = app.online(&spec)?;
            output::action(&format!("Installing {}", env_name(&spec)));
            let pb = output::spinner("resolving and installing");
            match manager.install(&spec, InstallOptions { clean, no_cache }, &cancel) {
                Ok(()) => output::progress_success(pb, "done"),
                Err(e) => {
                    output::progress_fail(pb, "failed");
                    return Err(e).with_context(|| format!("Failed to install {}", env_name(&spec)));
                }
            }
            output::success(&format!("{} installed at {}", env_name(&spec), manager.root().display()));
        }

        Commands::Reinstall { spec, no_cache } => {
            let (spec, manager) = app.online(&spec)?;
            output::action(&format!("Reinstalling {}", env_name(&spec)));
            let options = InstallOptions { clean: false, no_cache };
            manager
                .reinstall(&spec, options, &cancel)
                .with_context(|| format!("Failed to reinstall {}", env_name(&spec)))?;
            output::success(&format!("{} reinstalled", env_name(&spec)));
        }

        Commands::Remove { spec, fast } => {
            let spec = load_spec(&spec)?.offline();
            let manager = app.offline_manager(&spec);
            let removed = manager
                .remove(fast, &cancel)
                .with_context(|| format!("Failed to remove {}", env_name(&spec)))?;
            if removed {
                output::success(&format!("{} removed", env_name(&spec)));
            } else {
                output::skip(&format!("{} not installed, nothing to remove", env_name(&spec)));
            }
        }

        Commands::Status { spec } => {
            let spec = load_spec(&spec)?.offline();
            let manager = app.offline_manager(&spec);
            let state = manager.status(&spec)?;
            output::state_line(&env_name(&spec), state);
            if state == EnvState::Drifted {
                output::warning("environment no longer matches its spec file; run `envctl install` to re-sync");
            }
            if state != EnvState::NotInstalled
                && let Some(meta) = manager.metadata()?
            {
                output::detail(&format!("runtime {} ({})", meta.runtime_path.display(), meta.runtime_constraint));
                for id in meta.release_ids() {
                    output::detail(&id);
                }
            }
        }

        Commands::Touch { spec } => {
            let spec = load_spec(&spec)?.offline();
            app.offline_manager(&spec).touch()?;
            output::info(&format!("{} marked as used", env_name(&spec)));
        }

        Commands::Resolve { spec } => {
            let file = load_spec(&spec)?;
            let provider = app.index()?;
            let spec = file.fetch(provider.as_ref(), &app.settings.retry_policy())?;
            let closure = app
                .resolver(provider)
                .resolve(&spec.releases)
                .with_context(|| format!("Failed to resolve {}", env_name(&spec)))?;
            output::action(&format!("{} release(s) for {}", closure.len(), env_name(&spec)));
            for (i, release) in closure.iter().enumerate() {
                output::release_item(&release.id(), i < spec.releases.len());
            }
        }
    }

    Ok(())
}
