//! PDCCH demodulation reference signals (TS 38.211 7.4.1.3)
//!
//! Pilot generation and placement for the transmitter and the least-squares
//! channel estimator consumed by the PDCCH receiver. Pilots occupy every
//! `k % 4 == 1` subcarrier of the CORESET in each of its OFDM symbols; the
//! sequence is referenced to CRB0, so the generator is advanced across PRBs
//! that do not belong to the CORESET.

use crate::sequence::GoldSequence;
use crate::PhyError;
use common::types::{
    Carrier, Coreset, CoresetMappingType, DciLocation, SlotCfg, CORESET_FREQ_DOMAIN_RES_SIZE,
    NOF_AGGREGATION_LEVELS, NRE, NSYMB_PER_SLOT,
};
use common::utils::time;
use ndarray::Array2;
use num_complex::Complex32;
use serde::Serialize;
use tracing::trace;

/// Pilot amplitude for unit power per DM-RS RE
const DMRS_AMP: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Pilots per PRB per symbol (subcarriers 1, 5 and 9)
const DMRS_PER_PRB: usize = 3;

/// Channel estimate for one PDCCH candidate
#[derive(Debug, Clone, Default)]
pub struct DmrsPdcchCe {
    /// One estimate per candidate data RE, in mapping order
    pub ce: Vec<Complex32>,
    /// Number of valid entries in `ce`
    pub nof_re: usize,
    /// Residual noise variance after the least-squares fit
    pub noise_var: f32,
}

/// DM-RS based measurements over one candidate
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DmrsPdcchMeasure {
    /// Energy per resource element
    pub epre: f32,
    /// Reference signal received power
    pub rsrp: f32,
    /// Carrier frequency offset in Hz
    pub cfo_hz: f32,
    /// Time synchronisation error in microseconds
    pub sync_error_us: f32,
}

/// Scrambling initialisation for one DM-RS symbol
fn dmrs_c_init(slot_idx: u32, symbol: usize, n_id: u16) -> u32 {
    let l = symbol as u64;
    let n = u64::from(slot_idx);
    let id = u64::from(n_id);
    let c_init =
        (1u64 << 17) * (NSYMB_PER_SLOT as u64 * n + l + 1) * (2 * id + 1) + 2 * id;
    (c_init & 0x7FFF_FFFF) as u32
}

/// Pilot sequence of one CORESET symbol, aligned with the packed pilot
/// order. The gold sequence is referenced to CRB0 and advanced over PRBs
/// outside the CORESET.
fn reference_sequence(
    carrier: &Carrier,
    coreset: &Coreset,
    slot_idx: u32,
    symbol: usize,
) -> Vec<Complex32> {
    let n_id = if coreset.dmrs_scrambling_id_present {
        coreset.dmrs_scrambling_id
    } else {
        carrier.id.value()
    };

    let mut seq = GoldSequence::new(dmrs_c_init(slot_idx, symbol, n_id));
    let mut out = Vec::with_capacity(coreset.bw_in_prb() as usize * DMRS_PER_PRB);

    let mut next_prb = 0usize;
    for r in 0..CORESET_FREQ_DOMAIN_RES_SIZE {
        if !coreset.freq_resource(r) {
            continue;
        }
        let first_prb = 6 * r;
        if first_prb > next_prb {
            seq.skip((first_prb - next_prb) * DMRS_PER_PRB * 2);
        }
        for _ in 0..6 * DMRS_PER_PRB {
            out.push(seq.next_qpsk(DMRS_AMP));
        }
        next_prb = first_prb + 6;
    }

    out
}

/// Packed subcarrier window `[k_begin, k_end)` of a candidate
fn candidate_window(coreset: &Coreset, location: &DciLocation) -> (usize, usize) {
    let l = 1usize << location.aggregation_level;
    let duration = usize::from(coreset.duration);
    let k_begin = location.ncce as usize * NRE * 6 / duration;
    (k_begin, k_begin + l * 6 * NRE / duration)
}

/// Shared validation of the carrier/CORESET pair
fn validate_config(carrier: &Carrier, coreset: &Coreset) -> Result<(), PhyError> {
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
    if coreset.bw_in_prb() == 0 {
        return Err(PhyError::InvalidInputs(
            "CORESET has no frequency resources".into(),
        ));
    }
    for r in 0..CORESET_FREQ_DOMAIN_RES_SIZE {
        if coreset.freq_resource(r) && 6 * (r + 1) > usize::from(carrier.nof_prb) {
            return Err(PhyError::InvalidInputs(format!(
                "frequency resource {} exceeds the {} PRB carrier",
                r, carrier.nof_prb
            )));
        }
    }
    Ok(())
}

fn validate_location(coreset: &Coreset, location: &DciLocation) -> Result<(), PhyError> {
    if usize::from(location.aggregation_level) >= NOF_AGGREGATION_LEVELS {
        return Err(PhyError::InvalidInputs(format!(
            "aggregation level {} out of range",
            location.aggregation_level
        )));
    }
    let l = 1u32 << location.aggregation_level;
    if location.ncce + l > coreset.nof_cce() || location.ncce % l != 0 {
        return Err(PhyError::InvalidInputs(format!(
            "candidate ncce={} L={} does not fit {} CCEs",
            location.ncce,
            l,
            coreset.nof_cce()
        )));
    }
    Ok(())
}

/// Write the DM-RS pilots of one candidate into the slot grid
pub fn put(
    carrier: &Carrier,
    coreset: &Coreset,
    slot: &SlotCfg,
    location: &DciLocation,
    grid: &mut [Complex32],
) -> Result<(), PhyError> {
    validate_config(carrier, coreset)?;
    validate_location(coreset, location)?;
    if grid.len() < carrier.slot_grid_len() {
        return Err(PhyError::InvalidInputs(format!(
            "slot grid holds {} REs, carrier needs {}",
            grid.len(),
            carrier.slot_grid_len()
        )));
    }

    let (k_begin, k_end) = candidate_window(coreset, location);
    let nof_prb = usize::from(carrier.nof_prb);

    for sym in 0..usize::from(coreset.duration) {
        let reference = reference_sequence(carrier, coreset, slot.idx, sym);

        let mut q = 0usize; // packed PRB index
        for r in 0..CORESET_FREQ_DOMAIN_RES_SIZE {
            if !coreset.freq_resource(r) {
                continue;
            }
            for prb in 6 * r..6 * (r + 1) {
                for (j, off) in [1usize, 5, 9].into_iter().enumerate() {
                    let k = NRE * q + off;
                    if k >= k_begin && k < k_end {
                        grid[sym * nof_prb * NRE + prb * NRE + off] =
                            reference[DMRS_PER_PRB * q + j];
                    }
                }
                q += 1;
            }
        }
    }

    Ok(())
}

/// Least-squares PDCCH channel estimator over one CORESET
#[derive(Debug, Clone)]
pub struct DmrsPdcchEstimator {
    carrier: Carrier,
    coreset: Coreset,
    /// Absolute subcarrier of each packed pilot
    pilot_sc: Vec<usize>,
    /// Raw least-squares estimates, one row per CORESET symbol
    lse: Array2<Complex32>,
    /// Interpolated channel over the packed CORESET band
    ce: Array2<Complex32>,
    /// Lazily built reference sequences, indexed slot * duration + symbol
    refs: Vec<Option<Vec<Complex32>>>,
}

impl DmrsPdcchEstimator {
    pub fn new(carrier: &Carrier, coreset: &Coreset) -> Result<Self, PhyError> {
        validate_config(carrier, coreset)?;

        let duration = usize::from(coreset.duration);
        let bw_sc = coreset.bw_in_prb() as usize * NRE;

        let mut pilot_sc = Vec::with_capacity(coreset.bw_in_prb() as usize * DMRS_PER_PRB);
        for r in 0..CORESET_FREQ_DOMAIN_RES_SIZE {
            if !coreset.freq_resource(r) {
                continue;
            }
            for prb in 6 * r..6 * (r + 1) {
                for off in [1usize, 5, 9] {
                    pilot_sc.push(prb * NRE + off);
                }
            }
        }

        let nof_slots = carrier.nof_slots_per_frame() as usize;
        Ok(Self {
            carrier: *carrier,
            coreset: *coreset,
            pilot_sc,
            lse: Array2::from_elem((duration, bw_sc / 4), Complex32::new(0.0, 0.0)),
            ce: Array2::from_elem((duration, bw_sc), Complex32::new(0.0, 0.0)),
            refs: vec![None; nof_slots * duration],
        })
    }

    /// Estimate the CORESET channel from one received slot grid
    pub fn estimate(&mut self, slot: &SlotCfg, grid: &[Complex32]) -> Result<(), PhyError> {
        if grid.len() < self.carrier.slot_grid_len() {
            return Err(PhyError::InvalidInputs(format!(
                "slot grid holds {} REs, carrier needs {}",
                grid.len(),
                self.carrier.slot_grid_len()
            )));
        }

        let Self {
            carrier,
            coreset,
            pilot_sc,
            lse,
            ce,
            refs,
        } = self;

        let duration = usize::from(coreset.duration);
        let nof_prb = usize::from(carrier.nof_prb);
        let slot_idx = slot.idx % carrier.nof_slots_per_frame();
        let nof_pilots = pilot_sc.len();

        for sym in 0..duration {
            let cache = &mut refs[slot_idx as usize * duration + sym];
            if cache.is_none() {
                *cache = Some(reference_sequence(carrier, coreset, slot_idx, sym));
            }
            let reference = cache.as_ref().expect("reference sequence cached");

            // Least squares: divide by the unit-power reference
            for (p, (&sc, r)) in pilot_sc.iter().zip(reference.iter()).enumerate() {
                let y = grid[sym * nof_prb * NRE + sc];
                lse[(sym, p)] = y * r.conj();
            }

            // Linear interpolation across the packed band; pilots sit at
            // packed position 4p + 1
            let row_len = ce.ncols();
            for k in 0..row_len {
                let value = if k <= 1 {
                    lse[(sym, 0)]
                } else {
                    let p = (k - 1) / 4;
                    if p + 1 >= nof_pilots {
                        lse[(sym, nof_pilots - 1)]
                    } else {
                        let frac = (k as f32 - (4 * p + 1) as f32) / 4.0;
                        lse[(sym, p)] * (1.0 - frac) + lse[(sym, p + 1)] * frac
                    }
                };
                ce[(sym, k)] = value;
            }
        }

        // Average over symbols once the band is interpolated
        if duration > 1 {
            let scale = 1.0 / duration as f32;
            for k in 0..ce.ncols() {
                let mut acc = Complex32::new(0.0, 0.0);
                for sym in 0..duration {
                    acc += ce[(sym, k)];
                }
                let avg = acc * scale;
                for sym in 0..duration {
                    ce[(sym, k)] = avg;
                }
            }
        }

        trace!(
            "PDCCH DM-RS estimate: slot={} pilots={} duration={}",
            slot_idx,
            nof_pilots,
            duration
        );
        Ok(())
    }

    /// Pilot-domain window of a candidate: packed pilot indices per symbol
    fn pilot_window(&self, location: &DciLocation) -> (usize, usize) {
        let (k_begin, k_end) = candidate_window(&self.coreset, location);
        (k_begin / 4, k_end / 4)
    }

    /// DM-RS based measurements over the candidate's CCEs
    pub fn get_measure(&self, location: &DciLocation) -> Result<DmrsPdcchMeasure, PhyError> {
        validate_location(&self.coreset, location)?;

        let duration = usize::from(self.coreset.duration);
        let (p_begin, p_end) = self.pilot_window(location);
        let nof_pilots = p_end - p_begin;

        let mut epre = 0.0f32;
        let mut rsrp = 0.0f32;
        for sym in 0..duration {
            let mut corr = Complex32::new(0.0, 0.0);
            for p in p_begin..p_end {
                let h = self.lse[(sym, p)];
                epre += h.norm_sqr();
                corr += h;
            }
            corr /= nof_pilots as f32;
            rsrp += corr.norm_sqr();
        }
        epre /= (duration * nof_pilots) as f32;
        rsrp /= duration as f32;

        // CFO from the symbol-to-symbol phase slope
        let mut cfo_hz = 0.0f32;
        if duration > 1 {
            let mut acc = Complex32::new(0.0, 0.0);
            for sym in 0..duration - 1 {
                for p in p_begin..p_end {
                    acc += self.lse[(sym + 1, p)] * self.lse[(sym, p)].conj();
                }
            }
            let t_sym = time::symbol_duration_s(self.carrier.numerology) as f32;
            cfo_hz = acc.arg() / (2.0 * std::f32::consts::PI * t_sym);
        }

        // Synchronisation error from the phase slope across pilots
        let mut acc = Complex32::new(0.0, 0.0);
        for sym in 0..duration {
            for p in p_begin..p_end.saturating_sub(1) {
                acc += self.lse[(sym, p + 1)] * self.lse[(sym, p)].conj();
            }
        }
        let pilot_spacing_hz = 4.0 * self.carrier.scs_hz() as f32;
        let sync_error_us =
            -acc.arg() / (2.0 * std::f32::consts::PI * pilot_spacing_hz) * 1e6;

        Ok(DmrsPdcchMeasure {
            epre,
            rsrp,
            cfo_hz,
            sync_error_us,
        })
    }

    /// Copy the candidate's data-RE channel estimates into `out`
    pub fn get_ce(&self, location: &DciLocation, out: &mut DmrsPdcchCe) -> Result<(), PhyError> {
        validate_location(&self.coreset, location)?;

        let duration = usize::from(self.coreset.duration);
        let (k_begin, k_end) = candidate_window(&self.coreset, location);

        out.ce.clear();
        for sym in 0..duration {
            for k in k_begin..k_end {
                if k % 4 != 1 {
                    out.ce.push(self.ce[(sym, k)]);
                }
            }
        }
        out.nof_re = out.ce.len();

        // Residual of the raw pilots against the fitted channel
        let (p_begin, p_end) = self.pilot_window(location);
        let mut residual = 0.0f32;
        for sym in 0..duration {
            for p in p_begin..p_end {
                residual += (self.lse[(sym, p)] - self.ce[(sym, 4 * p + 1)]).norm_sqr();
            }
        }
        out.noise_var = residual / (duration * (p_end - p_begin)) as f32;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::{Pci, SearchSpace, SearchSpaceType};

    fn test_carrier() -> Carrier {
        Carrier {
            id: Pci(0),
            nof_prb: 50,
            numerology: 0,
        }
    }

    fn coreset_from_mask(duration: u8, mask: u64) -> Coreset {
        Coreset {
            duration,
            freq_resources: mask,
            ..Default::default()
        }
    }

    #[test]
    fn test_put_pilot_count() {
        let carrier = test_carrier();
        let coreset = coreset_from_mask(2, 0b1111);
        let location = DciLocation {
            aggregation_level: 2,
            ncce: 4,
        };

        let mut grid = vec![Complex32::new(0.0, 0.0); carrier.slot_grid_len()];
        put(&carrier, &coreset, &SlotCfg { idx: 0 }, &location, &mut grid).unwrap();

        let nof_pilots = grid.iter().filter(|re| re.norm_sqr() > 0.0).count();
        // 3 pilots per REG, 6 REGs per CCE, L = 4
        assert_eq!(nof_pilots, 3 * 6 * 4);

        for (idx, re) in grid.iter().enumerate() {
            if re.norm_sqr() > 0.0 {
                assert!((re.norm_sqr() - 1.0).abs() < 1e-5);
                let sc = idx % (usize::from(carrier.nof_prb) * NRE);
                assert_eq!(sc % 4, 1);
            }
        }
    }

    fn ideal_estimate(
        duration: u8,
        mask: u64,
        l_exp: u8,
        slot: u32,
    ) -> (DmrsPdcchMeasure, DmrsPdcchCe) {
        let carrier = test_carrier();
        let coreset = coreset_from_mask(duration, mask);
        let nof_cce = coreset.nof_cce();
        assert!(nof_cce >= 1 << l_exp);

        let location = DciLocation {
            aggregation_level: l_exp,
            ncce: 0,
        };
        let slot_cfg = SlotCfg { idx: slot };

        let mut grid = vec![Complex32::new(0.0, 0.0); carrier.slot_grid_len()];
        put(&carrier, &coreset, &slot_cfg, &location, &mut grid).unwrap();

        let mut estimator = DmrsPdcchEstimator::new(&carrier, &coreset).unwrap();
        estimator.estimate(&slot_cfg, &grid).unwrap();

        let measure = estimator.get_measure(&location).unwrap();
        let mut ce = DmrsPdcchCe::default();
        estimator.get_ce(&location, &mut ce).unwrap();
        (measure, ce)
    }

    #[test]
    fn test_ideal_channel_measurements() {
        for (duration, mask, l_exp) in [(1u8, 0b1u64, 0u8), (2, 0b11, 1), (3, 0b1011, 2)] {
            let (measure, ce) = ideal_estimate(duration, mask, l_exp, 0);

            assert!((measure.epre - 1.0).abs() < 1e-3, "epre={}", measure.epre);
            assert!((measure.rsrp - 1.0).abs() < 1e-3, "rsrp={}", measure.rsrp);
            assert!(measure.cfo_hz.abs() < 1e-3);
            assert!(measure.sync_error_us.abs() < 1e-3);

            assert_eq!(ce.nof_re, (NRE - 3) * 6 * (1 << l_exp));
            let avg_pow: f32 =
                ce.ce.iter().map(|h| h.norm_sqr()).sum::<f32>() / ce.nof_re as f32;
            assert!((avg_pow - 1.0).abs() < 0.1, "avg_pow={}", avg_pow);
            assert!(ce.noise_var < 1e-6);
        }
    }

    #[test]
    fn test_estimate_with_group_gap() {
        // Disabled group between two enabled ones exercises the sequence skip
        let (measure, ce) = ideal_estimate(3, 0b101, 0, 7);
        assert!((measure.epre - 1.0).abs() < 1e-3);
        assert!((measure.rsrp - 1.0).abs() < 1e-3);
        assert!(ce.noise_var < 1e-6);
    }

    #[test]
    fn test_estimator_roundtrip_with_decoder() {
        use crate::pdcch::{locations, DciMessage, PdcchArgs, PdcchRx, PdcchTx};
        use common::types::Rnti;

        let carrier = test_carrier();
        let coreset = coreset_from_mask(3, 0xFF);
        let mut ss = SearchSpace {
            kind: SearchSpaceType::Ue,
            ..Default::default()
        };
        ss.nof_candidates = [8, 8, 4, 2, 1];

        let args = PdcchArgs {
            measure_evm: true,
            ..Default::default()
        };
        let mut tx = PdcchTx::new(&args).unwrap();
        let mut rx = PdcchRx::new(&args).unwrap();
        tx.set_carrier(&carrier, &coreset).unwrap();
        rx.set_carrier(&carrier, &coreset).unwrap();

        let mut estimator = DmrsPdcchEstimator::new(&carrier, &coreset).unwrap();
        let slot = SlotCfg { idx: 3 };
        let rnti = Rnti(0x1234);

        let ncce = locations(&coreset, &ss, rnti, 1, slot.idx).unwrap();
        let location = DciLocation {
            aggregation_level: 1,
            ncce: ncce[0],
        };

        let payload: Vec<u8> = (0..40).map(|i| (i % 5 < 2) as u8).collect();
        let dci = DciMessage {
            rnti,
            search_space: SearchSpaceType::Ue,
            location,
            nof_bits: 40,
            payload: payload.clone(),
        };

        let mut grid = vec![Complex32::new(0.0, 0.0); carrier.slot_grid_len()];
        tx.encode(&dci, &mut grid).unwrap();
        put(&carrier, &coreset, &slot, &location, &mut grid).unwrap();

        estimator.estimate(&slot, &grid).unwrap();
        let mut ce = DmrsPdcchCe::default();
        estimator.get_ce(&location, &mut ce).unwrap();

        let mut rx_dci = DciMessage {
            rnti,
            search_space: SearchSpaceType::Ue,
            location,
            nof_bits: 40,
            payload: Vec::new(),
        };
        let res = rx.decode(&grid, &ce, &mut rx_dci).unwrap();

        assert!(res.crc);
        assert!(res.evm < 1e-3);
        assert_eq!(rx_dci.payload, payload);
    }

    #[test]
    fn test_reference_cache_is_lazy() {
        let carrier = test_carrier();
        let coreset = coreset_from_mask(1, 0b1);
        let mut estimator = DmrsPdcchEstimator::new(&carrier, &coreset).unwrap();
        assert!(estimator.refs.iter().all(|r| r.is_none()));

        let grid = vec![Complex32::new(0.0, 0.0); carrier.slot_grid_len()];
        estimator.estimate(&SlotCfg { idx: 2 }, &grid).unwrap();
        assert_eq!(estimator.refs.iter().filter(|r| r.is_some()).count(), 1);
    }

    #[test]
    fn test_invalid_coreset_rejected() {
        let carrier = test_carrier();

        // Frequency resource beyond the carrier bandwidth (50 PRB = 8 groups)
        let coreset = coreset_from_mask(1, 1 << 9);
        assert!(DmrsPdcchEstimator::new(&carrier, &coreset).is_err());

        let coreset = coreset_from_mask(0, 0b1);
        assert!(DmrsPdcchEstimator::new(&carrier, &coreset).is_err());

        let mut coreset = coreset_from_mask(1, 0b1);
        coreset.mapping_type = CoresetMappingType::Interleaved;
        assert!(DmrsPdcchEstimator::new(&carrier, &coreset).is_err());
    }
}
