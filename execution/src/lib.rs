//! Packbattle execution layer.
//!
//! Weighted pack draws, the battle state machine, round resolution and the
//! coin ledger behind all of them. The primary entrypoint is [`Engine`].
//!
//! ## Atomicity
//! Every mutating [`Engine`] call is one unit of work against a [`Pending`]
//! overlay. The overlay's change set reaches the store in a single
//! [`State::apply`] call, and only when the whole operation succeeded.
//! `start` therefore either draws, resolves and settles everything, or leaves
//! the battle WAITING with its entry fees still held.
//!
//! ## Determinism
//! The draw log is written once, round-major and in seat order. Status polls
//! and replays recompute round results from that log and never touch the RNG.
//! Seeding the engine reproduces the whole draw sequence.
//!
//! ## Minimal flow (example)
//! ```rust,ignore
//! use packbattle_execution::{mocks::test_engine, Engine};
//! use packbattle_types::{api::CreateBattleRequest, pack::BattleMode, Actor};
//!
//! let engine = test_engine(7).engine;
//! engine.grant(&Actor::admin("ops"), "alice", 100, "seed-alice")?;
//! let opened = engine.open_packs(&Actor::user("alice"), 1, 2, "req-1")?;
//! let battle = engine.create_battle(
//!     &Actor::user("alice"),
//!     CreateBattleRequest {
//!         box_id: 1,
//!         mode: BattleMode::HighestWins,
//!         rounds: 3,
//!         max_participants: 2,
//!         share_rewards: false,
//!     },
//! )?;
//! ```

pub mod cache;
pub mod catalog;
pub mod engine;
pub mod ledger;
pub mod lottery;
pub mod metrics;
pub mod pull_rate;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod sqlite;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;


mod state;

pub use catalog::{Catalog, MemoryCatalog};
pub use engine::{Clock, Engine, EngineConfig, SystemClock};
pub use ledger::CoinLedger;
pub use lottery::{draw, FixedRolls, RandomSource};
pub use pull_rate::{validate, PullRateTable};
pub use session::{BattleRecord, BattleSession, BattleSettings};
pub use sqlite::{Backend, Sqlite};
pub use state::{Key, Memory, Pending, State, Status, Value};
