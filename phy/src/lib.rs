//! Physical Downlink Control Channel Library
//!
//! This crate implements the 5G NR PDCCH transmit and receive chains and the
//! companion DM-RS channel estimator according to 3GPP TS 38.211, 38.212 and
//! 38.213 (Release 15).

pub mod crc;
pub mod dmrs_pdcch;
pub mod equalizer;
pub mod modem;
pub mod pdcch;
pub mod polar;
pub mod sequence;

// Re-export commonly used types
pub use dmrs_pdcch::{DmrsPdcchCe, DmrsPdcchEstimator, DmrsPdcchMeasure};
pub use pdcch::{DciMessage, PdcchArgs, PdcchRes, PdcchRx, PdcchTx};

use thiserror::Error;

/// Errors reported by the PDCCH processing chain
#[derive(Error, Debug)]
pub enum PhyError {
    #[error("Invalid inputs: {0}")]
    InvalidInputs(String),

    #[error("Allocation failed: {0}")]
    Allocation(String),

    #[error("Upstream primitive failed: {0}")]
    UpstreamPrimitive(String),

    #[error("Resource mapping mismatch: mapped {actual} REs, expected {expected}")]
    Mapping { expected: usize, actual: usize },

    #[error("Channel estimate size mismatch: got {actual} REs, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}
