//! Evidence fusion: Dempster-Shafer mass combination and the split
//! gate/soft patch ledger with time decay and dynamic merge weights.

pub mod ledger;
pub mod mass;

pub use ledger::{
    LedgerConfig, Observation, ObservationErrorKind, PatchEntry, PruneStrategy, SplitLedger,
    Verdict,
};
pub use mass::{CombineOutcome, DsMass, MASS_EPSILON};
