use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::orchestrator::PhaseName;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPhase {
    pub phase: PhaseName,
    pub label: String,
    pub config_path: String,
}

/// The workflow phases of one run, keyed by phase so iteration is always in
/// ordinal order regardless of registration order.
#[derive(Debug, Default)]
pub struct Plan {
    phases: BTreeMap<PhaseName, PlannedPhase>,
}

impl Plan {
    pub fn add(&mut self, phase: PlannedPhase) -> Result<()> {
        if self.phases.contains_key(&phase.phase) {
            return Err(Error::msg(format!("duplicate phase '{}'", phase.phase)));
        }
        self.phases.insert(phase.phase, phase);
        Ok(())
    }

    pub fn get(&self, phase: PhaseName) -> Option<&PlannedPhase> {
        self.phases.get(&phase)
    }

    pub fn ordered(&self) -> impl Iterator<Item = &PlannedPhase> {
        self.phases.values()
    }

    /// A runnable plan contains every workflow phase exactly once.
    pub fn finalize(&self) -> Result<()> {
        let missing: Vec<&str> = PhaseName::ALL
            .iter()
            .filter(|p| !self.phases.contains_key(p))
            .map(|p| p.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(Error::msg(format!(
                "plan is missing phases: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planned(phase: PhaseName) -> PlannedPhase {
        PlannedPhase {
            phase,
            label: phase.as_str().to_string(),
            config_path: format!("phases.{phase}"),
        }
    }

    #[test]
    fn ordered_follows_ordinals_not_insertion() {
        let mut plan = Plan::default();
        for p in PhaseName::ALL.iter().rev() {
            plan.add(planned(*p)).expect("add");
        }
        plan.finalize().expect("complete");
        let order: Vec<PhaseName> = plan.ordered().map(|p| p.phase).collect();
        assert_eq!(order, PhaseName::ALL.to_vec());
    }

    #[test]
    fn duplicates_and_gaps_are_rejected() {
        let mut plan = Plan::default();
        plan.add(planned(PhaseName::Clean)).expect("add");
        assert!(plan.add(planned(PhaseName::Clean)).is_err());

        let err = plan.finalize().unwrap_err();
        assert!(err.to_string().contains("configure"), "unexpected err: {err}");
    }
}
