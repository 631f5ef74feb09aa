/// Pull rates are stored in thousandths of a percent.
pub const PULL_RATE_SCALE: u32 = 1_000;

/// A full table of pull rates (100%).
pub const PULL_RATE_TOTAL: u32 = 100 * PULL_RATE_SCALE;

/// Allowed deviation of a table's rate sum from 100%, in thousandths (0.001%).
pub const PULL_RATE_TOLERANCE: u32 = 1;

/// Smallest rate a single card may carry (0.001%).
pub const MIN_PULL_RATE: u32 = 1;

/// Maximum number of packs a single open request may draw.
pub const MAX_OPEN_QUANTITY: u32 = 50;

/// Maximum cards a pack may contain.
pub const MAX_CARDS_PER_PACK: u32 = 32;

/// Battle bounds.
pub const MIN_BATTLE_PARTICIPANTS: u32 = 2;
pub const MAX_BATTLE_PARTICIPANTS: u32 = 8;
pub const MAX_BATTLE_ROUNDS: u32 = 50;

/// Basis point denominator used for the house edge.
pub const BASIS_POINTS: u64 = 10_000;

/// Coins credited per USD cent for provider prices quoted in currency.
pub const COINS_PER_CENT: u64 = 1;

/// Prefix of synthetic user ids assigned to bot participants.
pub const BOT_USER_PREFIX: &str = "bot-";
