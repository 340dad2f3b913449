//! Honeypot decoys.
//!
//! Any interaction with a decoy route or field is conclusive evidence of
//! hostile probing: legitimate clients never see them. The pipeline
//! answers with a randomized, plausible fake response and feeds the
//! reputation tracker; the real handler never runs.

pub mod trap;

pub use trap::{decoy_response, extract_filled_decoy_fields, is_decoy_route, DecoyResponse};
