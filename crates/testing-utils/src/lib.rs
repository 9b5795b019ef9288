//! Shared test utilities: fixture builders, raw attempt helpers and
//! mock capability implementations.

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::{seed_xyzzy_scenario, JobFixture, JobFixtureBuilder, XyzzyScenario};
pub use helpers::{attempt_count, insert_attempt, latest_attempt_id, set_attempt_exit};
pub use mocks::{MockExecutor, MockFilesystemDriver};
