//! Site builders and the registry they are resolved from.
//!
//! The registry maps a builder id (`build.builder` in `folio.yaml`) to a
//! factory. It is validated once at startup; an unknown id is a
//! configuration error, not a build failure.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::thread;

use folio_core::Settings;
use folio_release::Release;

use crate::error::{io_err, BuildError};

/// What a builder is given to work on.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub release: &'a Release,
    pub settings: &'a Settings,
}

pub trait Builder: Send + Sync {
    fn id(&self) -> &str;

    /// Build the site inside `ctx.release`. Errors fail the release.
    fn build(&self, ctx: &BuildContext<'_>) -> Result<(), BuildError>;
}

type BuilderFactory = Box<dyn Fn(&Settings) -> Result<Box<dyn Builder>, BuildError> + Send + Sync>;

pub struct BuilderRegistry {
    factories: BTreeMap<String, BuilderFactory>,
}

impl std::fmt::Debug for BuilderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

impl Default for BuilderRegistry {
    /// The built-in `command` and `noop` builders.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(CommandBuilder::ID, |settings| {
            Ok(Box::new(CommandBuilder::from_settings(settings)?) as Box<dyn Builder>)
        });
        registry.register(NoopBuilder::ID, |_| Ok(Box::new(NoopBuilder) as Box<dyn Builder>));
        registry
    }
}

impl BuilderRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register (or replace) the factory for `id`.
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn(&Settings) -> Result<Box<dyn Builder>, BuildError> + Send + Sync + 'static,
    {
        let id = id.into();
        tracing::debug!(builder = %id, "registered builder");
        self.factories.insert(id, Box::new(factory));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Check that the configured builder exists and accepts its settings.
    pub fn validate(&self, settings: &Settings) -> Result<(), BuildError> {
        self.create(settings).map(|_| ())
    }

    pub fn create(&self, settings: &Settings) -> Result<Box<dyn Builder>, BuildError> {
        let id = &settings.build.builder;
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| BuildError::UnknownBuilder {
                id: id.clone(),
                known: self.ids(),
            })?;
        factory(settings)
    }
}

// ---------------------------------------------------------------------------
// command
// ---------------------------------------------------------------------------

/// Runs an external command inside the release directory.
///
/// The command sees `FOLIO_RELEASE_ID` and `FOLIO_RELEASE_DIR` plus the
/// configured `build.env`. Its output is forwarded line by line to the log.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    argv: Vec<String>,
    env: BTreeMap<String, String>,
}

impl CommandBuilder {
    pub const ID: &'static str = "command";

    pub fn new(argv: Vec<String>, env: BTreeMap<String, String>) -> Result<Self, BuildError> {
        if argv.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(BuildError::BuilderConfig {
                builder: Self::ID.to_string(),
                message: "build.command must name a program".to_string(),
            });
        }
        Ok(Self { argv, env })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, BuildError> {
        Self::new(settings.build.command.clone(), settings.build.env.clone())
    }
}

impl Builder for CommandBuilder {
    fn id(&self) -> &str {
        Self::ID
    }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<(), BuildError> {
        let program = &self.argv[0];
        let release = ctx.release;
        tracing::info!(release = %release.id(), command = ?self.argv, "running build command");

        let mut child = Command::new(program)
            .args(&self.argv[1..])
            .current_dir(release.dir())
            .envs(&self.env)
            .env("FOLIO_RELEASE_ID", release.id().as_str())
            .env("FOLIO_RELEASE_DIR", release.dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| io_err(program, e))?;

        let stderr = child.stderr.take().map(|stderr| {
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    tracing::warn!(target: "folio::builder", "{line}");
                }
            })
        });
        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                tracing::info!(target: "folio::builder", "{line}");
            }
        }
        let status = child.wait().map_err(|e| io_err(program, e))?;
        if let Some(handle) = stderr {
            let _ = handle.join();
        }

        if !status.success() {
            return Err(BuildError::BuilderFailed {
                builder: Self::ID.to_string(),
                message: format!("{program} exited with {status}"),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// noop
// ---------------------------------------------------------------------------

/// Publishes the data snapshot as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBuilder;

impl NoopBuilder {
    pub const ID: &'static str = "noop";
}

impl Builder for NoopBuilder {
    fn id(&self) -> &str {
        Self::ID
    }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<(), BuildError> {
        tracing::debug!(release = %ctx.release.id(), "noop builder");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::UniqueId;
    use folio_release::ReleaseManager;
    use tempfile::TempDir;

    fn settings_with(base: &TempDir, builder: &str, command: &[&str]) -> Settings {
        let mut settings = Settings::for_base(base.path());
        settings.build.builder = builder.to_string();
        settings.build.command = command.iter().map(|s| s.to_string()).collect();
        settings
    }

    #[test]
    fn unknown_builder_lists_known_ids() {
        let base = TempDir::new().unwrap();
        let err = BuilderRegistry::default()
            .validate(&settings_with(&base, "jekyll", &[]))
            .unwrap_err();
        match err {
            BuildError::UnknownBuilder { id, known } => {
                assert_eq!(id, "jekyll");
                assert_eq!(known, vec!["command", "noop"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn command_builder_requires_a_program() {
        let base = TempDir::new().unwrap();
        let err = BuilderRegistry::default()
            .validate(&settings_with(&base, "command", &[]))
            .unwrap_err();
        assert!(matches!(err, BuildError::BuilderConfig { .. }));
    }

    #[test]
    fn custom_builders_can_be_registered() {
        let base = TempDir::new().unwrap();
        let mut registry = BuilderRegistry::empty();
        registry.register("static", |_| Ok(Box::new(NoopBuilder) as Box<dyn Builder>));
        assert!(registry.contains("static"));
        assert_eq!(
            registry.create(&settings_with(&base, "static", &[])).unwrap().id(),
            "noop"
        );
    }

    #[cfg(unix)]
    fn release_in(base: &TempDir) -> Release {
        let manager = ReleaseManager::open(base.path()).unwrap();
        let release = manager.create(&UniqueId::generate());
        manager.create_release_dir(&release).unwrap();
        release
    }

    #[test]
    #[cfg(unix)]
    fn command_runs_in_release_dir_with_env() {
        let base = TempDir::new().unwrap();
        let settings = settings_with(
            &base,
            "command",
            &["sh", "-c", "printf '%s' \"$FOLIO_RELEASE_ID\" > built.txt"],
        );
        let release = release_in(&base);
        let builder = BuilderRegistry::default().create(&settings).unwrap();
        builder
            .build(&BuildContext {
                release: &release,
                settings: &settings,
            })
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(release.dir().join("built.txt")).unwrap(),
            release.id().as_str()
        );
    }

    #[test]
    #[cfg(unix)]
    fn failing_command_is_a_builder_failure() {
        let base = TempDir::new().unwrap();
        let settings = settings_with(&base, "command", &["sh", "-c", "echo nope >&2; exit 3"]);
        let release = release_in(&base);
        let err = CommandBuilder::from_settings(&settings)
            .unwrap()
            .build(&BuildContext {
                release: &release,
                settings: &settings,
            })
            .unwrap_err();
        assert!(matches!(err, BuildError::BuilderFailed { .. }));
        assert!(err.is_systemic());
    }
}
