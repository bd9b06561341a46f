//! The "should I build?" decision, as a pure function of its inputs.

use std::path::PathBuf;

use folio_core::UniqueId;

use crate::triggers::TriggerSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildDecision {
    BuildRequired,
    /// The current release was built from the latest change.
    AlreadyCurrent,
    /// A release for the latest change exists but is not current; an
    /// earlier attempt already ran for this exact input.
    AlreadyAttempted,
    /// The previous decision of this loop saw the same trigger and current
    /// release.
    LoopGuardTripped,
    /// Trigger patterns are configured and no changed path matches them.
    NoTriggerMatch,
}

impl BuildDecision {
    pub fn must_build(self) -> bool {
        self == BuildDecision::BuildRequired
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DecisionInputs<'a> {
    /// Id of the last change that should trigger a build.
    pub trigger: &'a UniqueId,
    pub current: Option<&'a UniqueId>,
    /// A release directory named `trigger` already exists.
    pub attempted: bool,
    /// The previous decision saw exactly these trigger and current ids.
    pub repeated: bool,
    /// Paths changed since the current release.
    pub changed_paths: &'a [PathBuf],
    pub triggers: &'a TriggerSet,
}

pub fn decide(inputs: &DecisionInputs<'_>) -> BuildDecision {
    if inputs.current == Some(inputs.trigger) {
        return BuildDecision::AlreadyCurrent;
    }
    if inputs.attempted {
        return BuildDecision::AlreadyAttempted;
    }
    if inputs.repeated {
        return BuildDecision::LoopGuardTripped;
    }
    if !inputs.triggers.is_empty() && !inputs.triggers.matches_any(inputs.changed_paths) {
        return BuildDecision::NoTriggerMatch;
    }
    BuildDecision::BuildRequired
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn id(n: u16) -> UniqueId {
        format!("2024-03-01_12-00-00.000000__{n:04}").parse().unwrap()
    }

    #[rstest]
    #[case::fresh(Some(1), false, false, BuildDecision::BuildRequired)]
    #[case::first_release(None, false, false, BuildDecision::BuildRequired)]
    #[case::current(Some(2), false, false, BuildDecision::AlreadyCurrent)]
    #[case::current_wins_over_guard(Some(2), false, true, BuildDecision::AlreadyCurrent)]
    #[case::attempted(Some(1), true, false, BuildDecision::AlreadyAttempted)]
    #[case::loop_guard(Some(1), false, true, BuildDecision::LoopGuardTripped)]
    fn decision_table(
        #[case] current: Option<u16>,
        #[case] attempted: bool,
        #[case] repeated: bool,
        #[case] expected: BuildDecision,
    ) {
        let trigger = id(2);
        let current = current.map(id);
        let triggers = TriggerSet::default();
        let inputs = DecisionInputs {
            trigger: &trigger,
            current: current.as_ref(),
            attempted,
            repeated,
            changed_paths: &[],
            triggers: &triggers,
        };
        assert_eq!(decide(&inputs), expected);
    }

    #[test]
    fn trigger_patterns_filter_changes() {
        let trigger = id(2);
        let current = id(1);
        let triggers = TriggerSet::compile(&[r"\.html$"]).unwrap();
        let json = vec![PathBuf::from("/srv/data/feed.json")];
        let html = vec![PathBuf::from("/srv/data/feed.json"), PathBuf::from("/srv/data/a.html")];

        let mut inputs = DecisionInputs {
            trigger: &trigger,
            current: Some(&current),
            attempted: false,
            repeated: false,
            changed_paths: &json,
            triggers: &triggers,
        };
        assert_eq!(decide(&inputs), BuildDecision::NoTriggerMatch);

        inputs.changed_paths = html.as_slice();
        assert_eq!(decide(&inputs), BuildDecision::BuildRequired);
    }
}
