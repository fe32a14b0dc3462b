//! Stage progression.
//!
//! Each participant is a small state machine over `(stage, quota_count)`.
//! The only input is "received one transfer":
//!
//!   q' = q + 1
//!   q' >= quota && s < max_stage  →  (s + 1, 0)      promotion
//!   otherwise                      →  (s, q')
//!
//! At `max_stage` no promotion happens; what the counter does there is
//! governed by `TerminalPolicy`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{
    FIRST_STAGE, MAX_COMMIT_ATTEMPTS, MAX_STAGE, QUOTA, STAGE_1_AMOUNT_CENTS,
    STAGE_2_AMOUNT_CENTS, STAGE_3_AMOUNT_CENTS,
};
use crate::error::AmigaError;
use crate::types::Cents;

/// Counter behaviour once a participant sits at `max_stage`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalPolicy {
    /// Keep counting without bound.
    #[default]
    Accumulate,
    /// Stop at `quota - 1`.
    Saturate,
    /// Wrap to zero at `quota`, without promotion.
    Reset,
}

/// Tunable cycle rules. Loaded from JSON by the node; defaults match the
/// production constants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleParams {
    pub quota: u32,
    pub max_stage: u8,
    /// Stage → amount a beneficiary at that stage receives per transfer.
    pub stage_amounts: BTreeMap<u8, Cents>,
    pub terminal_policy: TerminalPolicy,
    pub max_commit_attempts: u32,
}

impl Default for CycleParams {
    fn default() -> Self {
        Self {
            quota: QUOTA,
            max_stage: MAX_STAGE,
            stage_amounts: BTreeMap::from([
                (1, STAGE_1_AMOUNT_CENTS),
                (2, STAGE_2_AMOUNT_CENTS),
                (3, STAGE_3_AMOUNT_CENTS),
            ]),
            terminal_policy: TerminalPolicy::Accumulate,
            max_commit_attempts: MAX_COMMIT_ATTEMPTS,
        }
    }
}

/// Result of feeding one transfer into the machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageTransition {
    pub stage: u8,
    pub quota_count: u32,
    /// `Some((from, to))` when this transfer closed the cycle.
    pub promoted: Option<(u8, u8)>,
}

impl CycleParams {
    pub fn validate(&self) -> Result<(), AmigaError> {
        if self.quota == 0 {
            return Err(AmigaError::InvalidInput("quota must be at least 1".into()));
        }
        if self.max_stage < FIRST_STAGE {
            return Err(AmigaError::InvalidInput("max_stage must be at least 1".into()));
        }
        if self.max_commit_attempts == 0 {
            return Err(AmigaError::InvalidInput(
                "max_commit_attempts must be at least 1".into(),
            ));
        }
        for stage in FIRST_STAGE..=self.max_stage {
            if !self.stage_amounts.contains_key(&stage) {
                return Err(AmigaError::InvalidInput(format!(
                    "no amount configured for stage {stage}"
                )));
            }
        }
        Ok(())
    }

    /// Amount a beneficiary at `stage` receives. Unknown stages fall back to
    /// the first stage's amount.
    pub fn amount_for(&self, stage: u8) -> Cents {
        self.stage_amounts
            .get(&stage)
            .or_else(|| self.stage_amounts.get(&FIRST_STAGE))
            .copied()
            .unwrap_or(STAGE_1_AMOUNT_CENTS)
    }

    pub fn is_terminal(&self, stage: u8) -> bool {
        stage >= self.max_stage
    }

    /// Whether a participant at `(stage, quota_count)` may still be picked
    /// by the fair-queue fallback.
    pub fn has_open_slot(&self, quota_count: u32) -> bool {
        quota_count < self.quota
    }

    /// Apply one received transfer.
    pub fn receive(&self, stage: u8, quota_count: u32) -> StageTransition {
        let next = quota_count.saturating_add(1);

        if next >= self.quota && stage < self.max_stage {
            return StageTransition {
                stage: stage + 1,
                quota_count: 0,
                promoted: Some((stage, stage + 1)),
            };
        }

        let quota_count = if self.is_terminal(stage) && next >= self.quota {
            match self.terminal_policy {
                TerminalPolicy::Accumulate => next,
                TerminalPolicy::Saturate => self.quota - 1,
                TerminalPolicy::Reset => 0,
            }
        } else {
            next
        };
        StageTransition { stage, quota_count, promoted: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_are_valid() {
        let p = CycleParams::default();
        p.validate().unwrap();
        assert_eq!(p.quota, 12);
        assert_eq!(p.max_stage, 3);
        assert_eq!(p.amount_for(2), 10_000);
    }

    #[test]
    fn missing_stage_amount_rejected() {
        let mut p = CycleParams::default();
        p.stage_amounts.remove(&3);
        assert!(matches!(p.validate(), Err(AmigaError::InvalidInput(_))));
    }

    #[test]
    fn eleven_transfers_do_not_promote() {
        let p = CycleParams::default();
        let (mut stage, mut q) = (1u8, 0u32);
        for _ in 0..11 {
            let t = p.receive(stage, q);
            assert!(t.promoted.is_none());
            stage = t.stage;
            q = t.quota_count;
        }
        assert_eq!((stage, q), (1, 11));
    }

    #[test]
    fn twelfth_transfer_promotes_and_resets() {
        let p = CycleParams::default();
        let t = p.receive(1, 11);
        assert_eq!(t, StageTransition { stage: 2, quota_count: 0, promoted: Some((1, 2)) });
    }

    #[test]
    fn quota_count_tracks_total_mod_quota() {
        let p = CycleParams::default();
        let (mut stage, mut q) = (1u8, 0u32);
        for _ in 0..17 {
            let t = p.receive(stage, q);
            stage = t.stage;
            q = t.quota_count;
        }
        assert_eq!(stage, 2);
        assert_eq!(q, 17 % 12);
    }

    #[test]
    fn terminal_stage_accumulates_by_default() {
        let p = CycleParams::default();
        let t = p.receive(3, 11);
        assert_eq!(t, StageTransition { stage: 3, quota_count: 12, promoted: None });
        let t = p.receive(3, 40);
        assert_eq!(t.quota_count, 41);
    }

    #[test]
    fn terminal_policies() {
        let mut p = CycleParams { terminal_policy: TerminalPolicy::Saturate, ..Default::default() };
        assert_eq!(p.receive(3, 11).quota_count, 11);
        p.terminal_policy = TerminalPolicy::Reset;
        assert_eq!(p.receive(3, 11).quota_count, 0);
        assert_eq!(p.receive(3, 4).quota_count, 5);
    }

    #[test]
    fn params_parse_from_partial_json() {
        let p: CycleParams =
            serde_json::from_str(r#"{"quota": 3, "terminal_policy": "saturate"}"#).unwrap();
        assert_eq!(p.quota, 3);
        assert_eq!(p.max_stage, 3);
        assert_eq!(p.terminal_policy, TerminalPolicy::Saturate);
    }
}
