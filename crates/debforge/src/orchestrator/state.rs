//! Phase identities and the run state machine.
//!
//! `Pending -> Running(clean) -> ... -> Running(package) -> Succeeded`, with
//! `Failed` reachable from any `Running` state. Both terminal states are final.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PhaseName {
    Clean,
    Configure,
    Build,
    Install,
    Package,
}

impl PhaseName {
    pub const ALL: [PhaseName; 5] = [
        PhaseName::Clean,
        PhaseName::Configure,
        PhaseName::Build,
        PhaseName::Install,
        PhaseName::Package,
    ];

    /// 1-based position in the workflow.
    pub fn ordinal(self) -> usize {
        self as usize + 1
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseName::Clean => "clean",
            PhaseName::Configure => "configure",
            PhaseName::Build => "build",
            PhaseName::Install => "install",
            PhaseName::Package => "package",
        }
    }

    pub fn next(self) -> Option<PhaseName> {
        Self::ALL.get(self.ordinal()).copied()
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim())
            .ok_or_else(|| Error::config(format!("unknown phase '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running(PhaseName),
    Failed { phase: PhaseName, kind: ErrorKind },
    Succeeded,
}

impl RunState {
    pub fn can_transition_to(&self, next: &RunState) -> bool {
        match (self, next) {
            (RunState::Pending, RunState::Running(p)) => *p == PhaseName::Clean,
            (RunState::Running(cur), RunState::Running(p)) => cur.next() == Some(*p),
            (RunState::Running(cur), RunState::Failed { phase, .. }) => cur == phase,
            (RunState::Running(PhaseName::Package), RunState::Succeeded) => true,
            _ => false,
        }
    }

    pub fn transition_to(&mut self, next: RunState) -> Result<()> {
        if !self.can_transition_to(&next) {
            return Err(Error::msg(format!(
                "invalid run state transition {self} -> {next}"
            )));
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => f.write_str("pending"),
            RunState::Running(p) => write!(f, "running({p})"),
            RunState::Failed { phase, kind } => write!(f, "failed({phase}, {kind})"),
            RunState::Succeeded => f.write_str("succeeded"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Succeeded,
    Failed(ErrorKind),
}

/// One executed phase of a run. Phases that never started have no record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseRecord {
    pub phase: PhaseName,
    pub ordinal: usize,
    pub outcome: PhaseOutcome,
    pub elapsed_ms: u128,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_follow_workflow_order() {
        let ords: Vec<usize> = PhaseName::ALL.iter().map(|p| p.ordinal()).collect();
        assert_eq!(ords, vec![1, 2, 3, 4, 5]);
        assert_eq!(PhaseName::Install.next(), Some(PhaseName::Package));
        assert_eq!(PhaseName::Package.next(), None);
        assert_eq!("build".parse::<PhaseName>().expect("parse"), PhaseName::Build);
    }

    #[test]
    fn happy_path_walks_every_phase() {
        let mut s = RunState::Pending;
        for p in PhaseName::ALL {
            s.transition_to(RunState::Running(p)).expect("advance");
        }
        s.transition_to(RunState::Succeeded).expect("finish");
        assert_eq!(s, RunState::Succeeded);
        assert!(!s.can_transition_to(&RunState::Running(PhaseName::Clean)));
    }

    #[test]
    fn phases_cannot_be_skipped_or_resumed_after_failure() {
        let mut s = RunState::Pending;
        assert!(s.transition_to(RunState::Running(PhaseName::Build)).is_err());

        s.transition_to(RunState::Running(PhaseName::Clean)).expect("clean");
        assert!(!s.can_transition_to(&RunState::Running(PhaseName::Build)));
        assert!(!s.can_transition_to(&RunState::Succeeded));
        assert!(!s.can_transition_to(&RunState::Failed {
            phase: PhaseName::Build,
            kind: ErrorKind::BuildStepFailure,
        }));

        let failed = RunState::Failed {
            phase: PhaseName::Clean,
            kind: ErrorKind::Io,
        };
        s.transition_to(failed).expect("fail");
        assert!(!s.can_transition_to(&RunState::Succeeded));
        assert!(!s.can_transition_to(&RunState::Running(PhaseName::Configure)));
        assert!(!s.can_transition_to(&RunState::Pending));
    }
}
