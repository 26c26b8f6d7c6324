//! Single-use download staging: archive a set of paths, hand out a token,
//! serve the artifact once.

pub mod stager;

pub use stager::{DownloadStager, PrepareOutcome, RedeemedArtifact, StagerError};
