//! Extension points of the build loop.
//!
//! Hooks run in registration order. Any hook may stop the run by returning
//! [`HookOutcome::Abort`]; the remaining hooks of that stage are skipped.

use folio_core::Settings;
use folio_release::Release;

use crate::error::BuildError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Continue,
    Abort(String),
}

/// What a pre/post-build hook gets to see.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub release: &'a Release,
    pub settings: &'a Settings,
    /// 1-based iteration of the current run.
    pub iteration: u32,
}

pub trait BuildHook: Send + Sync {
    fn name(&self) -> &str;

    /// Before the build lock is taken. Aborting here ends the run cleanly.
    fn preflight(&self, _settings: &Settings) -> Result<HookOutcome, BuildError> {
        Ok(HookOutcome::Continue)
    }

    /// After the data snapshot, before the builder runs.
    fn pre_build(&self, _ctx: &HookContext<'_>) -> Result<HookOutcome, BuildError> {
        Ok(HookOutcome::Continue)
    }

    /// After the builder succeeded, before the task is marked done.
    fn post_build(&self, _ctx: &HookContext<'_>) -> Result<HookOutcome, BuildError> {
        Ok(HookOutcome::Continue)
    }
}

#[derive(Default)]
pub struct HookChain {
    hooks: Vec<Box<dyn BuildHook>>,
}

impl std::fmt::Debug for HookChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|h| h.name()))
            .finish()
    }
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: Box<dyn BuildHook>) {
        tracing::debug!(hook = hook.name(), "registered build hook");
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// First abort wins; `Continue` when every hook passed.
    pub fn preflight(&self, settings: &Settings) -> Result<HookOutcome, BuildError> {
        for hook in &self.hooks {
            if let HookOutcome::Abort(reason) = hook.preflight(settings)? {
                tracing::info!(hook = hook.name(), %reason, "preflight aborted build run");
                return Ok(HookOutcome::Abort(reason));
            }
        }
        Ok(HookOutcome::Continue)
    }

    pub fn pre_build(&self, ctx: &HookContext<'_>) -> Result<(), BuildError> {
        self.run_stage("pre-build", |hook| hook.pre_build(ctx))
    }

    pub fn post_build(&self, ctx: &HookContext<'_>) -> Result<(), BuildError> {
        self.run_stage("post-build", |hook| hook.post_build(ctx))
    }

    fn run_stage(
        &self,
        stage: &'static str,
        call: impl Fn(&dyn BuildHook) -> Result<HookOutcome, BuildError>,
    ) -> Result<(), BuildError> {
        for hook in &self.hooks {
            if let HookOutcome::Abort(reason) = call(hook.as_ref())? {
                return Err(BuildError::HookAborted {
                    hook: hook.name().to_string(),
                    stage,
                    reason,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        abort_pre_build: bool,
    }

    impl BuildHook for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn preflight(&self, _settings: &Settings) -> Result<HookOutcome, BuildError> {
            self.log.lock().unwrap().push(format!("{}:preflight", self.name));
            Ok(HookOutcome::Continue)
        }

        fn pre_build(&self, _ctx: &HookContext<'_>) -> Result<HookOutcome, BuildError> {
            self.log.lock().unwrap().push(format!("{}:pre", self.name));
            if self.abort_pre_build {
                Ok(HookOutcome::Abort("not today".into()))
            } else {
                Ok(HookOutcome::Continue)
            }
        }
    }

    #[test]
    fn hooks_run_in_order_and_abort_stops_the_stage() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HookChain::new();
        for (name, abort_pre_build) in [("first", true), ("second", false)] {
            chain.push(Box::new(Recorder {
                name,
                log: Arc::clone(&log),
                abort_pre_build,
            }));
        }

        let dir = tempfile::TempDir::new().unwrap();
        let settings = Settings::for_base(dir.path());
        let releases = folio_release::ReleaseManager::open(dir.path()).unwrap();
        let release = releases.create(&folio_core::UniqueId::generate());
        let ctx = HookContext {
            release: &release,
            settings: &settings,
            iteration: 1,
        };

        assert_eq!(chain.preflight(&settings).unwrap(), HookOutcome::Continue);
        let err = chain.pre_build(&ctx).unwrap_err();
        assert!(matches!(err, BuildError::HookAborted { stage: "pre-build", .. }));
        chain.post_build(&ctx).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:preflight", "second:preflight", "first:pre"]
        );
    }
}
