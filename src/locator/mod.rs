//! Regression fault location
//!
//! Bisects repository history with a build oracle to find the commit that
//! introduced a compile failure.

pub mod engine;
pub mod git;
pub mod oracle;
pub mod simulated;

pub use engine::{
    CancelHandle, FaultAnalysisTask, FaultLocator, LocatorReport, LocatorSettings, LocatorState,
};
pub use git::{GitOracle, GitOracleConfig};
pub use oracle::{RevisionOracle, TreeSnapshot, WorkingTree};
pub use simulated::SimulatedOracle;
