//! Physical Downlink Control Channel processing (TS 38.211/38.212/38.213)
//!
//! Candidate location computation, CCE-to-RE mapping and the full encode and
//! decode pipelines. Transmitter and receiver are distinct handles sharing a
//! common body of scratch buffers sized once at initialisation.

use crate::crc::{Crc24C, CRC24_LEN};
use crate::dmrs_pdcch::DmrsPdcchCe;
use crate::equalizer;
use crate::modem::{EvmBuffer, QpskModem};
use crate::polar::{PolarCode, PolarDecoder, PolarEncoder, RateMatcherRx, RateMatcherTx};
use crate::polar::decoder::DEFAULT_LIST_SIZE;
use crate::polar::NMAX_LOG;
use crate::sequence;
use crate::PhyError;
use common::types::{
    Carrier, Coreset, CoresetMappingType, DciLocation, Rnti, SearchSpace, SearchSpaceType,
    CORESET_FREQ_DOMAIN_RES_SIZE, MAX_NOF_CANDIDATES, NOF_AGGREGATION_LEVELS, NRE,
};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Data REs of the largest candidate (L = 16, 9 data REs per REG, 6 REGs
/// per CCE)
pub const PDCCH_MAX_RE: usize = (NRE - 3) * 6 * 16;

/// Maximum DCI payload size in bits, CRC excluded
pub const MAX_DCI_BITS: usize = 140;

/// Y_p,n multipliers indexed by CORESET id modulo 3 (TS 38.213 10.1)
const Y_P_A: [u64; 3] = [39827, 39829, 39839];

/// Y_p,n modulus
const Y_P_D: u64 = 65537;

/// Downlink control information message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DciMessage {
    /// RNTI the CRC is masked with
    pub rnti: Rnti,
    /// Search space the candidate belongs to
    pub search_space: SearchSpaceType,
    /// Candidate location within the CORESET
    pub location: DciLocation,
    /// Payload size in bits
    pub nof_bits: usize,
    /// Unpacked payload bits; decode resizes it to `nof_bits`
    pub payload: Vec<u8>,
}

/// Handle initialisation arguments
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PdcchArgs {
    /// Allocate the EVM buffer on receiver handles
    pub measure_evm: bool,
    /// Successive-cancellation list size of the polar decoder
    pub decoder_list_size: usize,
}

impl Default for PdcchArgs {
    fn default() -> Self {
        Self {
            measure_evm: false,
            decoder_list_size: DEFAULT_LIST_SIZE,
        }
    }
}

/// Decode outcome
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PdcchRes {
    /// CRC matched after RNTI de-masking
    pub crc: bool,
    /// Error vector magnitude, NaN when not measured
    pub evm: f32,
}

/// Compute the PDCCH candidate start CCEs for one aggregation level
/// (TS 38.213 10.1)
pub fn locations(
    coreset: &Coreset,
    search_space: &SearchSpace,
    rnti: Rnti,
    aggregation_level: u32,
    slot_idx: u32,
) -> Result<Vec<u32>, PhyError> {
    if aggregation_level as usize >= NOF_AGGREGATION_LEVELS {
        return Err(PhyError::InvalidInputs(format!(
            "aggregation level {} out of range",
            aggregation_level
        )));
    }

    let l = 1u32 << aggregation_level;
    let m_max = search_space.nof_candidates[aggregation_level as usize]
        .min(MAX_NOF_CANDIDATES as u32);
    if m_max == 0 {
        return Err(PhyError::InvalidInputs(format!(
            "no candidates configured for aggregation level {}",
            aggregation_level
        )));
    }

    let n_cce = coreset.nof_cce();
    if n_cce < l {
        return Err(PhyError::InvalidInputs(format!(
            "CORESET has {} CCEs, below aggregation level {}",
            n_cce, l
        )));
    }

    // Y_p,n folded iteratively from Y_p,-1 = RNTI (UE search spaces only)
    let y_p_n = match search_space.kind {
        SearchSpaceType::Common => 0u64,
        SearchSpaceType::Ue => {
            let a = Y_P_A[usize::from(coreset.id) % 3];
            let mut y = u64::from(rnti.value());
            for _ in 0..=slot_idx {
                y = (a * y) % Y_P_D;
            }
            y
        }
    };

    let n_ci = 0u64;
    let mut ncce = Vec::with_capacity(m_max as usize);
    for m in 0..u64::from(m_max) {
        let span = u64::from(n_cce / l);
        let offset = (m * u64::from(n_cce)) / u64::from(l * m_max);
        ncce.push(l * ((y_p_n + offset + n_ci) % span) as u32);
    }

    Ok(ncce)
}

/// Walk the data REs of a candidate in mapping order, invoking `visit` with
/// the running RE count and the flat grid index of each RE. Returns the
/// number of REs visited.
///
/// The walk advances a packed subcarrier index `k` across the enabled
/// six-PRB groups; positions with `k % 4 == 1` belong to the DM-RS.
fn for_each_data_re(
    carrier: &Carrier,
    coreset: &Coreset,
    location: &DciLocation,
    mut visit: impl FnMut(usize, usize),
) -> usize {
    let l = 1usize << location.aggregation_level;
    let duration = usize::from(coreset.duration);

    let k_begin = (location.ncce as usize * NRE * 6) / duration;
    let k_end = k_begin + (l * 6 * NRE) / duration;

    let mut count = 0usize;
    for sym in 0..duration {
        let mut k = 0usize;
        for r in 0..CORESET_FREQ_DOMAIN_RES_SIZE {
            if !coreset.freq_resource(r) {
                continue;
            }
            for i in r * 6 * NRE..(r + 1) * 6 * NRE {
                if k >= k_begin && k < k_end && k % 4 != 1 {
                    visit(count, sym * usize::from(carrier.nof_prb) * NRE + i);
                    count += 1;
                }
                k += 1;
            }
        }
    }

    count
}

/// Scrambling seed (TS 38.211 7.3.2.3): the UE-specific scrambling identity
/// applies only in UE search spaces with a configured DM-RS scrambling id
fn c_init(carrier: &Carrier, coreset: &Coreset, dci: &DciMessage) -> u32 {
    let ue_scrambling =
        dci.search_space == SearchSpaceType::Ue && coreset.dmrs_scrambling_id_present;

    let (n_rnti, n_id) = if ue_scrambling {
        (u32::from(dci.rnti.value()), u32::from(coreset.dmrs_scrambling_id))
    } else {
        (0, u32::from(carrier.id.value()))
    };

    ((n_rnti << 16) + n_id) & 0x7FFF_FFFF
}

/// State shared by transmitter and receiver handles
#[derive(Debug, Clone)]
struct PdcchCommon {
    carrier: Carrier,
    coreset: Coreset,
    configured: bool,
    crc24c: Crc24C,
    modem: QpskModem,
    /// Cached polar code descriptor, reused while (K, E) is unchanged
    code: Option<PolarCode>,
    /// Payload-plus-CRC working bits
    c: Vec<u8>,
    /// Modulated or extracted candidate symbols
    symbols: Vec<Complex32>,
}

impl PdcchCommon {
    fn new() -> Self {
        Self {
            carrier: Carrier::default(),
            coreset: Coreset::default(),
            configured: false,
            crc24c: Crc24C::new(),
            modem: QpskModem::new(),
            code: None,
            c: vec![0u8; MAX_DCI_BITS + CRC24_LEN],
            symbols: vec![Complex32::new(0.0, 0.0); PDCCH_MAX_RE],
        }
    }

    fn set_carrier(&mut self, carrier: &Carrier, coreset: &Coreset) -> Result<(), PhyError> {
        if carrier.id.value() > common::types::Pci::MAX {
            return Err(PhyError::InvalidInputs(format!(
                "carrier id {} above {}",
                carrier.id.value(),
                common::types::Pci::MAX
            )));
        }
        if carrier.nof_prb == 0 || carrier.nof_prb > Carrier::MAX_NOF_PRB {
            return Err(PhyError::InvalidInputs(format!(
                "carrier bandwidth {} PRB out of range",
                carrier.nof_prb
            )));
        }
        if coreset.mapping_type != CoresetMappingType::NonInterleaved {
            return Err(PhyError::InvalidInputs(
                "interleaved CORESET mapping is not supported".into(),
            ));
        }
        if coreset.duration == 0 || coreset.duration > 3 {
            return Err(PhyError::InvalidInputs(format!(
                "CORESET duration {} out of range",
                coreset.duration
            )));
        }

        self.carrier = *carrier;
        self.coreset = *coreset;
        self.configured = true;
        Ok(())
    }

    /// Validate the per-slot inputs and derive (K, M, E)
    fn message_sizes(
        &self,
        dci: &DciMessage,
        grid_len: usize,
    ) -> Result<(usize, usize, usize), PhyError> {
        if !self.configured {
            return Err(PhyError::InvalidInputs(
                "carrier and CORESET are not configured".into(),
            ));
        }
        if dci.nof_bits == 0 || dci.nof_bits > MAX_DCI_BITS {
            return Err(PhyError::InvalidInputs(format!(
                "DCI size {} bits out of range",
                dci.nof_bits
            )));
        }
        if usize::from(dci.location.aggregation_level) >= NOF_AGGREGATION_LEVELS {
            return Err(PhyError::InvalidInputs(format!(
                "aggregation level {} out of range",
                dci.location.aggregation_level
            )));
        }
        if grid_len < self.carrier.slot_grid_len() {
            return Err(PhyError::InvalidInputs(format!(
                "slot grid holds {} REs, carrier needs {}",
                grid_len,
                self.carrier.slot_grid_len()
            )));
        }

        let l = 1usize << dci.location.aggregation_level;
        if (dci.location.ncce as usize + l) > self.coreset.nof_cce() as usize
            || dci.location.ncce as usize % l != 0
        {
            return Err(PhyError::InvalidInputs(format!(
                "candidate ncce={} L={} does not fit {} CCEs",
                dci.location.ncce,
                l,
                self.coreset.nof_cce()
            )));
        }

        let k = dci.nof_bits + CRC24_LEN;
        let m = (NRE - 3) * 6 * l;
        Ok((k, m, 2 * m))
    }
}

/// Refresh the cached polar code descriptor when (K, E) changed
fn ensure_code(
    slot: &mut Option<PolarCode>,
    k: usize,
    e: usize,
) -> Result<&PolarCode, PhyError> {
    let stale = !matches!(slot, Some(code) if code.k == k && code.e == e);
    if stale {
        *slot = Some(PolarCode::get(k, e, NMAX_LOG)?);
    }
    Ok(slot.as_ref().expect("polar code descriptor present"))
}

/// XOR the 16 MSB-first RNTI bits onto the tail of the CRC field
fn mask_crc_with_rnti(c: &mut [u8], k: usize, rnti: Rnti) {
    let mut rnti_bits = [0u8; 16];
    common::bit_unpack(u32::from(rnti.value()), &mut rnti_bits);
    for (bit, mask) in c[k - 16..k].iter_mut().zip(rnti_bits.iter()) {
        *bit ^= mask;
    }
}

/// PDCCH transmitter handle
#[derive(Debug, Clone)]
pub struct PdcchTx {
    common: PdcchCommon,
    encoder: PolarEncoder,
    rm: RateMatcherTx,
    /// Polar-coded bits
    d: Vec<u8>,
    /// Rate-matched and scrambled bits
    f: Vec<u8>,
}

impl PdcchTx {
    pub fn new(_args: &PdcchArgs) -> Result<Self, PhyError> {
        Ok(Self {
            common: PdcchCommon::new(),
            encoder: PolarEncoder::new(NMAX_LOG),
            rm: RateMatcherTx::new(NMAX_LOG),
            d: vec![0u8; 1 << NMAX_LOG],
            f: vec![0u8; PDCCH_MAX_RE * 2],
        })
    }

    pub fn set_carrier(&mut self, carrier: &Carrier, coreset: &Coreset) -> Result<(), PhyError> {
        self.common.set_carrier(carrier, coreset)
    }

    /// Encode a DCI message onto the slot grid. Other REs of the grid are
    /// left untouched; on a mapping failure the grid content for this slot
    /// must be considered discarded.
    pub fn encode(&mut self, dci: &DciMessage, grid: &mut [Complex32]) -> Result<(), PhyError> {
        let (k, m, e) = self.common.message_sizes(dci, grid.len())?;
        if dci.payload.len() < dci.nof_bits {
            return Err(PhyError::InvalidInputs(format!(
                "payload holds {} bits, header claims {}",
                dci.payload.len(),
                dci.nof_bits
            )));
        }

        let PdcchCommon {
            carrier,
            coreset,
            crc24c,
            modem,
            code,
            c,
            symbols,
            ..
        } = &mut self.common;

        let code = ensure_code(code, k, e)?;
        debug!(
            "PDCCH encode: K={} M={} E={} N={} ncce={} L=2^{}",
            k, m, e, code.n, dci.location.ncce, dci.location.aggregation_level
        );

        // CRC attachment and RNTI masking of its last 16 bits
        c[..dci.nof_bits].copy_from_slice(&dci.payload[..dci.nof_bits]);
        crc24c.attach(c, dci.nof_bits);
        mask_crc_with_rnti(c, k, dci.rnti);

        // Polar encoding and rate matching
        self.encoder.encode(code, &c[..k], &mut self.d);
        self.rm.apply(code, &self.d, &mut self.f[..e]);

        // Scrambling and modulation
        sequence::apply_bit(&mut self.f[..e], c_init(carrier, coreset, dci));
        modem.modulate(&self.f[..e], &mut symbols[..m]);

        // Put symbols in the grid
        let count = for_each_data_re(carrier, coreset, &dci.location, |re, idx| {
            grid[idx] = symbols[re];
        });
        if count != m {
            return Err(PhyError::Mapping {
                expected: m,
                actual: count,
            });
        }

        Ok(())
    }
}

/// PDCCH receiver handle
#[derive(Debug, Clone)]
pub struct PdcchRx {
    common: PdcchCommon,
    decoder: PolarDecoder,
    rm: RateMatcherRx,
    /// Demodulated and descrambled LLRs
    f: Vec<i8>,
    /// Rate-dematched LLRs
    d: Vec<i8>,
    /// Equalised candidate symbols
    eq_symbols: Vec<Complex32>,
    evm_buffer: Option<EvmBuffer>,
}

impl PdcchRx {
    pub fn new(args: &PdcchArgs) -> Result<Self, PhyError> {
        let evm_buffer = if args.measure_evm {
            Some(EvmBuffer::new(PDCCH_MAX_RE * 2)?)
        } else {
            None
        };

        Ok(Self {
            common: PdcchCommon::new(),
            decoder: PolarDecoder::new(args.decoder_list_size, NMAX_LOG)?,
            rm: RateMatcherRx::new(NMAX_LOG),
            f: vec![0i8; PDCCH_MAX_RE * 2],
            d: vec![0i8; 1 << NMAX_LOG],
            eq_symbols: vec![Complex32::new(0.0, 0.0); PDCCH_MAX_RE],
            evm_buffer,
        })
    }

    pub fn set_carrier(&mut self, carrier: &Carrier, coreset: &Coreset) -> Result<(), PhyError> {
        self.common.set_carrier(carrier, coreset)
    }

    /// Attempt to decode one candidate. A failed CRC is a normal outcome
    /// reported through the result, not an error.
    pub fn decode(
        &mut self,
        grid: &[Complex32],
        ce: &DmrsPdcchCe,
        dci: &mut DciMessage,
    ) -> Result<PdcchRes, PhyError> {
        let (k, m, e) = self.common.message_sizes(dci, grid.len())?;
        if ce.nof_re != m || ce.ce.len() < m {
            return Err(PhyError::SizeMismatch {
                expected: m,
                actual: ce.nof_re.min(ce.ce.len()),
            });
        }

        let PdcchCommon {
            carrier,
            coreset,
            crc24c,
            modem,
            code,
            c,
            symbols,
            ..
        } = &mut self.common;

        let code = ensure_code(code, k, e)?;
        debug!(
            "PDCCH decode: K={} M={} E={} N={} ncce={} L=2^{}",
            k, m, e, code.n, dci.location.ncce, dci.location.aggregation_level
        );

        // Get symbols from the grid
        let count = for_each_data_re(carrier, coreset, &dci.location, |re, idx| {
            symbols[re] = grid[idx];
        });
        if count != m {
            return Err(PhyError::Mapping {
                expected: m,
                actual: count,
            });
        }

        // Equalise and demodulate
        equalizer::predecoding_single(
            &symbols[..m],
            &ce.ce[..m],
            &mut self.eq_symbols[..m],
            1.0,
            ce.noise_var,
        );
        modem.demodulate_soft(&self.eq_symbols[..m], &mut self.f[..e]);

        let evm = match &self.evm_buffer {
            Some(buffer) => buffer.run(modem, &self.eq_symbols[..m], &self.f[..e], e),
            None => f32::NAN,
        };

        // Descramble, dematch and decode
        sequence::apply_llr(&mut self.f[..e], c_init(carrier, coreset, dci));
        self.rm.apply(code, &self.f[..e], &mut self.d);
        self.decoder.decode(code, &self.d, c)?;

        // Remove the RNTI mask and check the CRC
        mask_crc_with_rnti(c, k, dci.rnti);
        let checksum = crc24c.checksum(c, dci.nof_bits);
        let received = common::bit_pack(&c[dci.nof_bits..k]);
        let crc = checksum == received;

        dci.payload.clear();
        dci.payload.extend_from_slice(&c[..dci.nof_bits]);

        Ok(PdcchRes { crc, evm })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::SlotCfg;

    fn test_carrier() -> Carrier {
        Carrier {
            id: common::types::Pci(0),
            nof_prb: 50,
            numerology: 0,
        }
    }

    fn coreset_with_groups(duration: u8, nof_groups: usize) -> Coreset {
        let mut coreset = Coreset {
            duration,
            ..Default::default()
        };
        for r in 0..nof_groups {
            coreset.set_freq_resource(r, true);
        }
        coreset
    }

    fn search_space(kind: SearchSpaceType, coreset: &Coreset) -> SearchSpace {
        let mut ss = SearchSpace {
            kind,
            ..Default::default()
        };
        for (i, count) in ss.nof_candidates.iter_mut().enumerate() {
            let l = 1u32 << i;
            *count = (coreset.nof_cce() / l).min(MAX_NOF_CANDIDATES as u32);
        }
        ss
    }

    #[test]
    fn test_locations_single_cce_coreset() {
        // One six-PRB group, one symbol: N_CCE = 1, the only candidate is 0
        let coreset = coreset_with_groups(1, 1);
        let ss = search_space(SearchSpaceType::Ue, &coreset);

        let ncce = locations(&coreset, &ss, Rnti(0x1234), 0, 0).unwrap();
        assert_eq!(ncce, vec![0]);
    }

    #[test]
    fn test_locations_aligned_and_bounded() {
        // Eight groups over three symbols: N_CCE = 24, four candidates at L=4
        let coreset = coreset_with_groups(3, 8);
        assert_eq!(coreset.nof_cce(), 24);
        let ss = search_space(SearchSpaceType::Ue, &coreset);

        let ncce = locations(&coreset, &ss, Rnti(0x1234), 2, 0).unwrap();
        assert_eq!(ncce.len(), 4);

        let mut seen = std::collections::HashSet::new();
        for &n in &ncce {
            assert_eq!(n % 4, 0);
            assert!(n <= 20);
            assert!(seen.insert(n));
        }
    }

    #[test]
    fn test_locations_common_ignores_rnti() {
        let coreset = coreset_with_groups(2, 4);
        let ss = search_space(SearchSpaceType::Common, &coreset);

        let a = locations(&coreset, &ss, Rnti(0x0001), 1, 3).unwrap();
        let b = locations(&coreset, &ss, Rnti(0xFFFE), 1, 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_locations_invalid_inputs() {
        let coreset = coreset_with_groups(1, 1);
        let ss = search_space(SearchSpaceType::Ue, &coreset);

        assert!(locations(&coreset, &ss, Rnti(1), 5, 0).is_err());
        // N_CCE = 1 cannot fit L = 2
        assert!(locations(&coreset, &ss, Rnti(1), 1, 0).is_err());

        let empty = SearchSpace {
            kind: SearchSpaceType::Ue,
            nof_candidates: [0; NOF_AGGREGATION_LEVELS],
        };
        assert!(locations(&coreset, &empty, Rnti(1), 0, 0).is_err());
    }

    #[test]
    fn test_mapping_count_and_dmrs_gap() {
        let carrier = test_carrier();
        for (duration, groups, l_exp) in [(1u8, 2usize, 1u8), (2, 4, 2), (3, 8, 3)] {
            let coreset = coreset_with_groups(duration, groups);
            let location = DciLocation {
                aggregation_level: l_exp,
                ncce: 0,
            };

            let mut indices = Vec::new();
            let count = for_each_data_re(&carrier, &coreset, &location, |_, idx| {
                indices.push(idx);
            });

            assert_eq!(count, 54 << l_exp);
            let unique: std::collections::HashSet<usize> = indices.iter().copied().collect();
            assert_eq!(unique.len(), indices.len());
        }
    }

    fn roundtrip(
        nof_bits: usize,
        l_exp: u8,
        tx_rnti: u16,
        rx_rnti: u16,
        kind: SearchSpaceType,
    ) -> (PdcchRes, DciMessage, DciMessage) {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(u64::from(tx_rnti) + nof_bits as u64);

        let carrier = test_carrier();
        let mut coreset = coreset_with_groups(3, 8);
        coreset.dmrs_scrambling_id_present = true;
        coreset.dmrs_scrambling_id = 0x123;
        let ss = search_space(kind, &coreset);

        let args = PdcchArgs {
            measure_evm: true,
            ..Default::default()
        };
        let mut tx = PdcchTx::new(&args).unwrap();
        let mut rx = PdcchRx::new(&args).unwrap();
        tx.set_carrier(&carrier, &coreset).unwrap();
        rx.set_carrier(&carrier, &coreset).unwrap();

        let ncce = locations(&coreset, &ss, Rnti(tx_rnti), u32::from(l_exp), 0).unwrap();
        let location = DciLocation {
            aggregation_level: l_exp,
            ncce: ncce[0],
        };

        let tx_dci = DciMessage {
            rnti: Rnti(tx_rnti),
            search_space: kind,
            location,
            nof_bits,
            payload: (0..nof_bits).map(|_| rng.gen_range(0..=1u8)).collect(),
        };

        let mut grid = vec![Complex32::new(0.0, 0.0); carrier.slot_grid_len()];
        tx.encode(&tx_dci, &mut grid).unwrap();

        // Ideal channel: unit taps, no noise
        let m = (NRE - 3) * 6 * (1usize << l_exp);
        let ce = DmrsPdcchCe {
            ce: vec![Complex32::new(1.0, 0.0); m],
            nof_re: m,
            noise_var: 0.0,
        };

        let mut rx_dci = DciMessage {
            rnti: Rnti(rx_rnti),
            search_space: kind,
            location,
            nof_bits,
            payload: Vec::new(),
        };
        let res = rx.decode(&grid, &ce, &mut rx_dci).unwrap();
        (res, tx_dci, rx_dci)
    }

    #[test]
    fn test_encode_re_count() {
        // 40-bit payload at L = 2: exactly 108 REs written, zeros elsewhere
        let carrier = test_carrier();
        let coreset = coreset_with_groups(3, 8);
        let ss = search_space(SearchSpaceType::Ue, &coreset);

        let mut tx = PdcchTx::new(&PdcchArgs::default()).unwrap();
        tx.set_carrier(&carrier, &coreset).unwrap();

        let ncce = locations(&coreset, &ss, Rnti(0x1234), 1, 0).unwrap();
        let dci = DciMessage {
            rnti: Rnti(0x1234),
            search_space: SearchSpaceType::Ue,
            location: DciLocation {
                aggregation_level: 1,
                ncce: ncce[0],
            },
            nof_bits: 40,
            payload: vec![1, 0, 1, 1, 0].repeat(8),
        };

        let mut grid = vec![Complex32::new(0.0, 0.0); carrier.slot_grid_len()];
        tx.encode(&dci, &mut grid).unwrap();

        let nonzero = grid.iter().filter(|re| re.norm_sqr() > 0.0).count();
        assert_eq!(nonzero, 108);
    }

    #[test]
    fn test_roundtrip_ideal_channel() {
        for (nof_bits, l_exp) in [(12usize, 0u8), (40, 1), (64, 2), (100, 3), (140, 4)] {
            for kind in [SearchSpaceType::Common, SearchSpaceType::Ue] {
                let (res, tx_dci, rx_dci) = roundtrip(nof_bits, l_exp, 0x1234, 0x1234, kind);
                assert!(res.crc, "nof_bits={} L=2^{}", nof_bits, l_exp);
                assert!(res.evm < 1e-3);
                assert_eq!(tx_dci.payload, rx_dci.payload);
            }
        }
    }

    #[test]
    fn test_roundtrip_rnti_values() {
        for rnti in [1u16, 0xFFFE, 0x1234] {
            let (res, tx_dci, rx_dci) =
                roundtrip(48, 1, rnti, rnti, SearchSpaceType::Ue);
            assert!(res.crc);
            assert_eq!(tx_dci.payload, rx_dci.payload);
        }
    }

    #[test]
    fn test_rnti_mismatch_fails_crc() {
        let (res, _, _) = roundtrip(40, 1, 0x1234, 0x4321, SearchSpaceType::Common);
        assert!(!res.crc);
    }

    #[test]
    fn test_decode_rejects_wrong_estimate_size() {
        let carrier = test_carrier();
        let coreset = coreset_with_groups(1, 2);

        let mut rx = PdcchRx::new(&PdcchArgs::default()).unwrap();
        rx.set_carrier(&carrier, &coreset).unwrap();

        let grid = vec![Complex32::new(0.0, 0.0); carrier.slot_grid_len()];
        let ce = DmrsPdcchCe {
            ce: vec![Complex32::new(1.0, 0.0); 10],
            nof_re: 10,
            noise_var: 0.0,
        };
        let mut dci = DciMessage {
            rnti: Rnti(1),
            search_space: SearchSpaceType::Common,
            location: DciLocation {
                aggregation_level: 0,
                ncce: 0,
            },
            nof_bits: 40,
            payload: Vec::new(),
        };

        match rx.decode(&grid, &ce, &mut dci) {
            Err(PhyError::SizeMismatch { expected, actual }) => {
                assert_eq!(expected, 54);
                assert_eq!(actual, 10);
            }
            other => panic!("expected size mismatch, got {:?}", other.map(|r| r.crc)),
        }
    }

    #[test]
    fn test_encode_requires_configuration() {
        let mut tx = PdcchTx::new(&PdcchArgs::default()).unwrap();
        let dci = DciMessage {
            nof_bits: 40,
            payload: vec![0; 40],
            ..Default::default()
        };
        let mut grid = vec![Complex32::new(0.0, 0.0); 100];
        assert!(matches!(
            tx.encode(&dci, &mut grid),
            Err(PhyError::InvalidInputs(_))
        ));
    }

    #[test]
    fn test_slot_cfg_varies_ue_locations() {
        // The Y_p,n fold advances with the slot index
        let coreset = coreset_with_groups(3, 8);
        let ss = search_space(SearchSpaceType::Ue, &coreset);

        let slots: Vec<Vec<u32>> = (0..4)
            .map(|slot| {
                let cfg = SlotCfg { idx: slot };
                locations(&coreset, &ss, Rnti(0x1234), 0, cfg.idx).unwrap()
            })
            .collect();
        assert!(slots.windows(2).any(|w| w[0] != w[1]));
    }
}
