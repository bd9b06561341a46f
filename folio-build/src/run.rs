//! The build loop.
//!
//! ## One run
//!
//! 1. Preflight hooks (may abort the run cleanly).
//! 2. Take the build lock without waiting; a held lock means another build
//!    is running and the run ends as [`BuildOutcome::Busy`].
//! 3. Per iteration (lock renewed from the second one on):
//!    decide → create release → copy data under the output lock →
//!    pre-build hooks → builder → post-build hooks → task done → publish →
//!    prune.
//! 4. Stop as soon as no build is required, or after `max_iterations`.
//!
//! Any failure marks the in-flight task failed and, when nothing servable is
//! current, publishes the newest `done` release that will publish. Pruning
//! and lock release happen on every path. Held leases are registered with the
//! [`InFlight`] slot so a shutdown hook can drop them for an abandoned run.

use std::fmt;

use folio_commit::DiskCommitWriter;
use folio_core::{paths, NamedLock, Settings, UniqueId};
use folio_release::ReleaseManager;

use crate::builder::{BuildContext, Builder, BuilderRegistry};
use crate::copy::copy_tree;
use crate::decision::{decide, BuildDecision, DecisionInputs};
use crate::error::BuildError;
use crate::hooks::{BuildHook, HookChain, HookContext, HookOutcome};
use crate::in_flight::InFlight;
use crate::triggers::TriggerSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    LockAcquired,
    ReleaseCreating,
    DataCopying,
    PreBuild,
    Building,
    PostBuild,
    Publishing,
    Cleanup,
    Failed,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildState::Idle => "idle",
            BuildState::LockAcquired => "lock-acquired",
            BuildState::ReleaseCreating => "release-creating",
            BuildState::DataCopying => "data-copying",
            BuildState::PreBuild => "pre-build",
            BuildState::Building => "building",
            BuildState::PostBuild => "post-build",
            BuildState::Publishing => "publishing",
            BuildState::Cleanup => "cleanup",
            BuildState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Another process holds the build lock.
    Busy,
    /// A preflight hook declined the run.
    Aborted { reason: String },
    /// The loop ran to completion. `published` lists the releases made
    /// current, oldest first; `decision` is why the loop stopped.
    Completed {
        published: Vec<UniqueId>,
        decision: BuildDecision,
    },
}

pub struct BuildLoop {
    settings: Settings,
    releases: ReleaseManager,
    writer: DiskCommitWriter,
    builder: Box<dyn Builder>,
    hooks: HookChain,
    triggers: TriggerSet,
    in_flight: InFlight,
    state: BuildState,
    /// Trigger and current release ids seen by the last decision.
    last_seen: Option<(UniqueId, Option<UniqueId>)>,
}

impl fmt::Debug for BuildLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildLoop")
            .field("base_dir", &self.settings.base_dir)
            .field("builder", &self.builder.id())
            .field("hooks", &self.hooks)
            .field("state", &self.state)
            .finish()
    }
}

impl BuildLoop {
    /// Validate `settings` against `registry` and set up a loop.
    pub fn new(settings: Settings, registry: &BuilderRegistry) -> Result<Self, BuildError> {
        settings.validate()?;
        let triggers = TriggerSet::compile(&settings.build.trigger_patterns)?;
        let builder = registry.create(&settings)?;
        let releases = ReleaseManager::open(&settings.base_dir)?;
        let writer = DiskCommitWriter::new(&settings);
        Ok(Self {
            settings,
            releases,
            writer,
            builder,
            hooks: HookChain::new(),
            triggers,
            in_flight: InFlight::new(),
            state: BuildState::Idle,
            last_seen: None,
        })
    }

    pub fn with_hook(mut self, hook: impl BuildHook + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Share `slot` with a shutdown hook.
    pub fn with_in_flight(mut self, slot: InFlight) -> Self {
        self.in_flight = slot;
        self
    }

    pub fn in_flight(&self) -> InFlight {
        self.in_flight.clone()
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn releases(&self) -> &ReleaseManager {
        &self.releases
    }

    /// Decide whether the latest change needs a build.
    ///
    /// Two consecutive calls that see the same trigger and current release
    /// never both answer [`BuildDecision::BuildRequired`]; the second one
    /// trips the loop guard. Returns the decision and the trigger id it was
    /// made for.
    pub fn must_build(&mut self) -> Result<(BuildDecision, UniqueId), BuildError> {
        let trigger = self
            .writer
            .control()
            .last_executed(self.settings.build.audience)?;
        let current = self.releases.current_id()?;
        let changed_paths = if self.triggers.is_empty() {
            Vec::new()
        } else {
            let since = current.clone().unwrap_or_default();
            self.writer.changes().changed_paths_since(&since)?
        };
        let seen = (trigger.clone(), current.clone());
        let repeated = self.last_seen.as_ref() == Some(&seen);
        let decision = decide(&DecisionInputs {
            trigger: &trigger,
            current: current.as_ref(),
            attempted: self.releases.exists(&trigger),
            repeated,
            changed_paths: &changed_paths,
            triggers: &self.triggers,
        });
        self.last_seen = Some(seen);
        tracing::debug!(trigger = %trigger, decision = ?decision, "build decision");
        Ok((decision, trigger))
    }

    pub fn run(&mut self) -> Result<BuildOutcome, BuildError> {
        self.state = BuildState::Idle;
        if let HookOutcome::Abort(reason) = self.hooks.preflight(&self.settings)? {
            return Ok(BuildOutcome::Aborted { reason });
        }

        let mut lock = NamedLock::new(
            &paths::locks_dir(&self.settings.work_dir()),
            paths::BUILD_LOCK,
            self.settings.locks.build_lease(),
        )
        .with_retry_interval(self.settings.locks.retry_interval());
        if !lock.try_acquire()? {
            tracing::info!("another build is in progress; skipping run");
            return Ok(BuildOutcome::Busy);
        }
        self.in_flight.hold(lock.handle());

        let mut published = Vec::new();
        let result = self.iterate(&mut lock, &mut published);
        let result = match result {
            Ok(decision) => Ok(decision),
            Err(err) => {
                self.state = BuildState::Failed;
                Err(self.recover(err))
            }
        };

        self.state = BuildState::Cleanup;
        self.prune();
        if let Err(err) = lock.release() {
            tracing::warn!(error = %err, "failed to release build lock");
        }
        self.in_flight.forget(lock.name());
        self.state = BuildState::Idle;

        result.map(|decision| BuildOutcome::Completed {
            published,
            decision,
        })
    }

    fn iterate(
        &mut self,
        lock: &mut NamedLock,
        published: &mut Vec<UniqueId>,
    ) -> Result<BuildDecision, BuildError> {
        let mut decision = BuildDecision::AlreadyCurrent;
        for iteration in 1..=self.settings.build.max_iterations {
            if iteration > 1 {
                lock.renew()?;
            }
            self.state = BuildState::LockAcquired;

            let (next, trigger) = self.must_build()?;
            decision = next;
            if !decision.must_build() {
                tracing::info!(trigger = %trigger, decision = ?decision, "no build required");
                return Ok(decision);
            }

            self.build_release(&trigger, iteration)?;
            published.push(trigger);

            self.state = BuildState::Cleanup;
            self.prune();
        }
        tracing::warn!(
            max_iterations = self.settings.build.max_iterations,
            "build loop stopped at iteration limit",
        );
        Ok(decision)
    }

    fn build_release(&mut self, id: &UniqueId, iteration: u32) -> Result<(), BuildError> {
        let task_name = self.settings.releases.task.clone();

        self.state = BuildState::ReleaseCreating;
        let release = self.releases.create(id);
        self.releases.create_release_dir(&release)?;
        let task = release.task(&task_name);
        task.set_started()?;
        self.in_flight.set(task.clone());
        tracing::info!(release = %id, iteration, "building release");

        self.state = BuildState::DataCopying;
        {
            let mut data_lock = self.writer.output_lock();
            data_lock.acquire(self.writer.output_wait())?;
            self.in_flight.hold(data_lock.handle());
            let exclude = [
                self.settings.work_dir(),
                self.releases.releases_dir(),
                self.releases.current_link(),
            ];
            let copied = copy_tree(&self.settings.data_dir(), release.dir(), &exclude);
            self.in_flight.forget(data_lock.name());
            copied?;
            data_lock.release()?;
        }

        let ctx = HookContext {
            release: &release,
            settings: &self.settings,
            iteration,
        };
        self.state = BuildState::PreBuild;
        self.hooks.pre_build(&ctx)?;

        self.state = BuildState::Building;
        self.builder.build(&BuildContext {
            release: &release,
            settings: &self.settings,
        })?;

        self.state = BuildState::PostBuild;
        self.hooks.post_build(&ctx)?;

        task.set_done()?;
        self.in_flight.clear();

        self.state = BuildState::Publishing;
        if !self.releases.publish(id, &task_name)? {
            return Err(BuildError::PublishUnconfirmed { id: id.clone() });
        }
        Ok(())
    }

    /// Failure path: mark the in-flight task failed and make sure something
    /// servable is current. Returns the error to surface.
    fn recover(&mut self, err: BuildError) -> BuildError {
        tracing::error!(error = %err, state = %self.state, "build failed");
        self.in_flight.mark_failed();

        let task = self.settings.releases.task.as_str();
        let servable = match self.releases.current_release() {
            Ok(Some(current)) => current.exists() && current.task(task).is_done().unwrap_or(false),
            Ok(None) => false,
            Err(lookup) => {
                tracing::warn!(error = %lookup, "cannot read current release");
                false
            }
        };
        if servable {
            return err;
        }

        let restored = self.restore_last_good(task);
        if restored {
            return err;
        }

        tracing::error!(error = %err, "SYSTEM HAS NO SERVABLE RELEASE");
        BuildError::NoServableRelease {
            cause: err.to_string(),
        }
    }

    /// Publish the newest `done` release that will publish, walking back
    /// through older ones when a publish fails.
    fn restore_last_good(&self, task: &str) -> bool {
        let releases = match self.releases.all_releases() {
            Ok(releases) => releases,
            Err(lookup) => {
                tracing::error!(error = %lookup, "cannot list releases for rollback");
                return false;
            }
        };
        for release in releases {
            match release.task(task).is_done() {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    tracing::warn!(release = %release.id(), error = %err, "skipping unreadable release");
                    continue;
                }
            }
            match self.releases.publish(release.id(), task) {
                Ok(true) => {
                    tracing::warn!(release = %release.id(), "restored last good release");
                    return true;
                }
                Ok(false) => {
                    tracing::error!(release = %release.id(), "rollback publish not confirmed");
                }
                Err(publish) => {
                    tracing::error!(release = %release.id(), error = %publish, "rollback publish failed");
                }
            }
        }
        false
    }

    fn prune(&self) {
        match self
            .releases
            .delete_old_releases(self.settings.releases.retention)
        {
            Ok(deleted) if !deleted.is_empty() => {
                tracing::info!(count = deleted.len(), "pruned old releases");
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "failed to prune old releases"),
        }
    }
}
