//! Common Types for the 5G NR PDCCH stack
//!
//! Defines the carrier, CORESET and search-space configuration types shared
//! by the transmit and receive chains (3GPP TS 38.211/38.213).

use serde::{Deserialize, Serialize};

/// Subcarriers per resource block
pub const NRE: usize = 12;

/// OFDM symbols per slot (normal cyclic prefix)
pub const NSYMB_PER_SLOT: usize = 14;

/// Size of the CORESET frequency-domain resource bitmap (six-PRB groups)
pub const CORESET_FREQ_DOMAIN_RES_SIZE: usize = 45;

/// Number of PDCCH aggregation-level exponents (L = 2^0 .. 2^4)
pub const NOF_AGGREGATION_LEVELS: usize = 5;

/// Maximum number of PDCCH candidates monitored per aggregation level
pub const MAX_NOF_CANDIDATES: usize = 8;

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }
}

/// Physical Cell Identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI value (0-1007)
    pub const MAX: u16 = 1007;

    /// Create a new PCI with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Get the PCI value
    pub fn value(&self) -> u16 {
        self.0
    }
}

/// Downlink carrier configuration, immutable per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Carrier {
    /// Physical cell identity
    pub id: Pci,
    /// Carrier bandwidth in physical resource blocks (1-275)
    pub nof_prb: u16,
    /// Subcarrier spacing exponent mu (0-4, SCS = 15 kHz * 2^mu)
    pub numerology: u8,
}

impl Carrier {
    /// Maximum carrier bandwidth in PRB
    pub const MAX_NOF_PRB: u16 = 275;

    /// Slots per 10 ms frame for this numerology
    pub fn nof_slots_per_frame(&self) -> u32 {
        10u32 << self.numerology
    }

    /// Subcarrier spacing in Hz
    pub fn scs_hz(&self) -> f64 {
        15_000.0 * f64::from(1u32 << self.numerology)
    }

    /// Resource elements in one slot grid
    pub fn slot_grid_len(&self) -> usize {
        self.nof_prb as usize * NRE * NSYMB_PER_SLOT
    }
}

impl Default for Carrier {
    fn default() -> Self {
        Self {
            id: Pci(0),
            nof_prb: 52,
            numerology: 0,
        }
    }
}

/// CORESET CCE-to-REG mapping type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoresetMappingType {
    #[default]
    NonInterleaved,
    Interleaved,
}

/// Control-resource set configuration (TS 38.211 7.3.2.2)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coreset {
    /// CORESET identifier (0-11)
    pub id: u8,
    /// Duration in OFDM symbols (1-3)
    pub duration: u8,
    /// Bitmap of six-PRB groups, bit r covers PRBs [6r, 6r+6)
    pub freq_resources: u64,
    /// CCE-to-REG mapping type
    pub mapping_type: CoresetMappingType,
    /// PDCCH DM-RS scrambling identity is configured
    pub dmrs_scrambling_id_present: bool,
    /// PDCCH DM-RS scrambling identity (0-65535)
    pub dmrs_scrambling_id: u16,
}

impl Coreset {
    /// Whether six-PRB group `r` belongs to this CORESET
    pub fn freq_resource(&self, r: usize) -> bool {
        r < CORESET_FREQ_DOMAIN_RES_SIZE && (self.freq_resources >> r) & 1 == 1
    }

    /// Enable or disable six-PRB group `r`
    pub fn set_freq_resource(&mut self, r: usize, enabled: bool) {
        if r < CORESET_FREQ_DOMAIN_RES_SIZE {
            if enabled {
                self.freq_resources |= 1u64 << r;
            } else {
                self.freq_resources &= !(1u64 << r);
            }
        }
    }

    /// CORESET bandwidth in PRB (6 PRB per enabled group)
    pub fn bw_in_prb(&self) -> u32 {
        6 * (self.freq_resources & ((1u64 << CORESET_FREQ_DOMAIN_RES_SIZE) - 1)).count_ones()
    }

    /// Number of control channel elements (one CCE is 6 REGs of 1 PRB each)
    pub fn nof_cce(&self) -> u32 {
        self.bw_in_prb() * u32::from(self.duration) / 6
    }
}

/// Search space type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchSpaceType {
    /// Cell-wide common search space
    #[default]
    Common,
    /// UE-specific search space
    Ue,
}

/// PDCCH search space configuration (TS 38.213 10.1)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub kind: SearchSpaceType,
    /// Candidates monitored per aggregation-level exponent
    pub nof_candidates: [u32; NOF_AGGREGATION_LEVELS],
}

/// PDCCH candidate location within a CORESET
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DciLocation {
    /// Aggregation-level exponent (L = 2^aggregation_level, 0-4)
    pub aggregation_level: u8,
    /// First CCE index of the candidate
    pub ncce: u32,
}

/// Downlink slot timing configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotCfg {
    /// Slot index within the frame
    pub idx: u32,
}
