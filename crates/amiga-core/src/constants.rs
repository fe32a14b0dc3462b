/// ─── Mão Amiga Cycle Constants ──────────────────────────────────────────────
///
/// "Give to the one ahead of you; receive from the ones behind."
///
/// Amounts are integer centavos (1 BRL = 100 centavos).

// ── Money ────────────────────────────────────────────────────────────────────

/// 1 BRL expressed in centavos.
pub const CENTS_PER_BRL: u64 = 100;

// ── Stages ───────────────────────────────────────────────────────────────────

/// Every participant enters at this stage.
pub const FIRST_STAGE: u8 = 1;

/// Highest reachable stage. Participants here never promote again.
pub const MAX_STAGE: u8 = 3;

/// Incoming transfers required to close a stage cycle and promote.
pub const QUOTA: u32 = 12;

/// Amount owed to a stage-1 beneficiary (centavos).
pub const STAGE_1_AMOUNT_CENTS: u64 = 50 * CENTS_PER_BRL;

/// Amount owed to a stage-2 beneficiary (centavos).
pub const STAGE_2_AMOUNT_CENTS: u64 = 100 * CENTS_PER_BRL;

/// Amount owed to a stage-3 beneficiary (centavos).
pub const STAGE_3_AMOUNT_CENTS: u64 = 300 * CENTS_PER_BRL;

// ── Engine ───────────────────────────────────────────────────────────────────

/// Optimistic commit attempts before a stale read is surfaced as
/// `ConcurrentUpdateConflict`.
pub const MAX_COMMIT_ATTEMPTS: u32 = 5;

/// Upper bound on referral-chain walks; a chain longer than this is
/// treated as cyclic.
pub const MAX_REFERRAL_DEPTH: usize = 100_000;

// ── Accounts ─────────────────────────────────────────────────────────────────

/// Username of the administrator seeded on a fresh database.
pub const DEFAULT_ADMIN_USERNAME: &str = "admin";

/// Membership plan labels. Display only; the engine never reads them.
pub const DEFAULT_PLAN: &str = "Bronze";
pub const ADMIN_PLAN: &str = "Diamante";

pub const MAX_USERNAME_LEN: usize = 64;
pub const MAX_FULL_NAME_LEN: usize = 128;
pub const MAX_PIX_KEY_LEN: usize = 140;
