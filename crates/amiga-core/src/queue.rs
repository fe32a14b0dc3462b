//! Fair-queue ordering for donors without an explicit referrer.

use std::cmp::Ordering;

use crate::cycle::CycleParams;
use crate::participant::Participant;

/// Queue order: fewest transfers received, then oldest, then lowest id.
///
/// The state database keeps each stage's queue in this order, so the
/// fallback pick is the first open slot of a prefix scan.
pub fn fair_order(a: &Participant, b: &Participant) -> Ordering {
    a.quota_count
        .cmp(&b.quota_count)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

/// Whether `candidate` may receive a fallback transfer from `donor`.
///
/// Same stage only, never the donor itself, and only while a quota slot is
/// still open.
pub fn is_eligible(params: &CycleParams, donor: &Participant, candidate: &Participant) -> bool {
    candidate.id != donor.id
        && candidate.stage == donor.stage
        && params.has_open_slot(candidate.quota_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParticipantId;

    fn p(id: u64, stage: u8, quota_count: u32, created_at: i64) -> Participant {
        let mut p = Participant::new(ParticipantId(id), format!("u{id}"), format!("User {id}"), created_at);
        p.stage = stage;
        p.quota_count = quota_count;
        p
    }

    #[test]
    fn fewest_received_then_oldest_then_id() {
        let mut pool = vec![p(1, 1, 2, 100), p(2, 1, 0, 300), p(3, 1, 0, 200), p(4, 1, 0, 200)];
        pool.sort_by(fair_order);
        let ids: Vec<_> = pool.iter().map(|x| x.id.0).collect();
        assert_eq!(ids, vec![3, 4, 2, 1]);
    }

    #[test]
    fn eligibility_rules() {
        let params = CycleParams::default();
        let donor = p(9, 2, 0, 500);
        assert!(is_eligible(&params, &donor, &p(4, 2, 5, 4)));
        assert!(!is_eligible(&params, &donor, &p(1, 1, 0, 1)));
        assert!(!is_eligible(&params, &donor, &p(2, 2, 12, 2)));
        assert!(!is_eligible(&params, &donor, &donor));
    }
}
