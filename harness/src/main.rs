//! PDCCH test harness
//!
//! Sweeps every CORESET frequency allocation, duration, search-space type
//! and aggregation level supported by the configured carrier, checking the
//! DM-RS estimator invariants and the encode-decode round trip on an ideal
//! channel. Exit code is zero only when every test passes.

use anyhow::Result;
use clap::Parser;
use num_complex::Complex32;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

use common::types::{
    Carrier, Coreset, DciLocation, Pci, Rnti, SearchSpace, SearchSpaceType, SlotCfg,
    CORESET_FREQ_DOMAIN_RES_SIZE, MAX_NOF_CANDIDATES, NOF_AGGREGATION_LEVELS, NRE,
};
use phy::{DciMessage, DmrsPdcchCe, DmrsPdcchEstimator, PdcchArgs, PdcchRx, PdcchTx, PhyError};

/// PDCCH DM-RS and codec test sweep
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Carrier bandwidth in PRB
    #[arg(short = 'r', long, default_value = "50")]
    nof_prb: u16,

    /// Physical cell identity (0-1007)
    #[arg(short = 'c', long, default_value = "0")]
    cell_id: u16,

    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

struct TestCounter {
    passed: u32,
    total: u32,
}

impl TestCounter {
    fn new() -> Self {
        Self {
            passed: 0,
            total: 0,
        }
    }

    fn record(&mut self, name: &str, outcome: Result<()>) {
        self.total += 1;
        match outcome {
            Ok(()) => self.passed += 1,
            Err(err) => error!("Test {} ({}) failed: {:#}", self.total, name, err),
        }
    }
}

/// DM-RS estimation sweep over one CORESET and search-space configuration
fn run_dmrs_test(
    carrier: &Carrier,
    coreset: &Coreset,
    search_space: &SearchSpace,
    rnti: Rnti,
    aggregation_level: u32,
    grid: &mut [Complex32],
) -> Result<()> {
    let mut estimator = DmrsPdcchEstimator::new(carrier, coreset)?;
    let mut ce = DmrsPdcchCe::default();

    for idx in 0..carrier.nof_slots_per_frame() {
        let slot = SlotCfg { idx };
        let ncce_list = phy::pdcch::locations(coreset, search_space, rnti, aggregation_level, idx)?;
        anyhow::ensure!(
            ncce_list.len() as u32
                == search_space.nof_candidates[aggregation_level as usize]
                    .min(MAX_NOF_CANDIDATES as u32),
            "unexpected candidate count {}",
            ncce_list.len()
        );

        for &ncce in &ncce_list {
            let location = DciLocation {
                aggregation_level: aggregation_level as u8,
                ncce,
            };

            grid.fill(Complex32::new(0.0, 0.0));
            phy::dmrs_pdcch::put(carrier, coreset, &slot, &location, grid)?;
            estimator.estimate(&slot, grid)?;

            let measure = estimator.get_measure(&location)?;
            debug!(
                "slot={} ncce={} epre={:.6} rsrp={:.6} cfo={:.6} sync={:.6}",
                idx, ncce, measure.epre, measure.rsrp, measure.cfo_hz, measure.sync_error_us
            );
            anyhow::ensure!((measure.epre - 1.0).abs() < 1e-3, "EPRE {}", measure.epre);
            anyhow::ensure!((measure.rsrp - 1.0).abs() < 1e-3, "RSRP {}", measure.rsrp);
            anyhow::ensure!(measure.cfo_hz.abs() < 1e-3, "CFO {}", measure.cfo_hz);
            anyhow::ensure!(
                measure.sync_error_us.abs() < 1e-3,
                "sync error {}",
                measure.sync_error_us
            );

            estimator.get_ce(&location, &mut ce)?;
            let expected_re = (NRE - 3) * 6 * (1usize << aggregation_level);
            anyhow::ensure!(
                ce.nof_re == expected_re,
                "channel estimate holds {} REs, expected {}",
                ce.nof_re,
                expected_re
            );
            let avg_pow: f32 = ce.ce.iter().map(|h| h.norm_sqr()).sum::<f32>() / ce.nof_re as f32;
            anyhow::ensure!((avg_pow - 1.0).abs() < 0.1, "estimate power {}", avg_pow);
        }
    }

    Ok(())
}

/// Encode-decode round trip over an ideal channel using the estimator output
fn run_codec_test(
    carrier: &Carrier,
    coreset: &Coreset,
    search_space: &SearchSpace,
    rnti: Rnti,
    aggregation_level: u32,
    nof_bits: usize,
    grid: &mut [Complex32],
) -> Result<()> {
    let args = PdcchArgs {
        measure_evm: true,
        ..Default::default()
    };
    let mut tx = PdcchTx::new(&args)?;
    let mut rx = PdcchRx::new(&args)?;
    tx.set_carrier(carrier, coreset)?;
    rx.set_carrier(carrier, coreset)?;

    let mut estimator = DmrsPdcchEstimator::new(carrier, coreset)?;
    let slot = SlotCfg { idx: 1 };

    let ncce_list =
        phy::pdcch::locations(coreset, search_space, rnti, aggregation_level, slot.idx)?;
    let location = DciLocation {
        aggregation_level: aggregation_level as u8,
        ncce: ncce_list[0],
    };

    let payload: Vec<u8> = (0..nof_bits).map(|i| ((i * 3 + 1) % 7 < 3) as u8).collect();
    let dci = DciMessage {
        rnti,
        search_space: search_space.kind,
        location,
        nof_bits,
        payload: payload.clone(),
    };

    grid.fill(Complex32::new(0.0, 0.0));
    tx.encode(&dci, grid)?;
    phy::dmrs_pdcch::put(carrier, coreset, &slot, &location, grid)?;

    estimator.estimate(&slot, grid)?;
    let mut ce = DmrsPdcchCe::default();
    estimator.get_ce(&location, &mut ce)?;

    let mut rx_dci = DciMessage {
        rnti,
        search_space: search_space.kind,
        location,
        nof_bits,
        payload: Vec::new(),
    };
    let res = rx.decode(grid, &ce, &mut rx_dci)?;
    anyhow::ensure!(res.crc, "CRC failed on matched RNTI");
    anyhow::ensure!(res.evm < 1e-3, "EVM {} above tolerance", res.evm);
    anyhow::ensure!(rx_dci.payload == payload, "payload mismatch");
    debug!(
        "codec ok: L=2^{} nof_bits={} payload={}",
        aggregation_level,
        nof_bits,
        common::bytes_to_hex(&common::pack_bits(&rx_dci.payload))
    );

    // A mismatched RNTI must be reported as a CRC failure
    let mut wrong_dci = DciMessage {
        rnti: Rnti(rnti.value() ^ 0x5050),
        search_space: search_space.kind,
        location,
        nof_bits,
        payload: Vec::new(),
    };
    let res = rx.decode(grid, &ce, &mut wrong_dci)?;
    anyhow::ensure!(!res.crc, "CRC passed on mismatched RNTI");

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt().with_env_filter(env_filter).with_target(false).init();

    let Some(cell_id) = Pci::new(args.cell_id) else {
        anyhow::bail!("cell id {} above {}", args.cell_id, Pci::MAX);
    };
    let carrier = Carrier {
        id: cell_id,
        nof_prb: args.nof_prb,
        numerology: 0,
    };
    let rnti = Rnti(0x1234);

    let mut grid = vec![Complex32::new(0.0, 0.0); carrier.slot_grid_len()];
    let mut counter = TestCounter::new();

    let nof_freq_res =
        CORESET_FREQ_DOMAIN_RES_SIZE.min(usize::from(carrier.nof_prb) / 6);
    info!(
        "Sweeping {} PRB carrier, cell id {}, {} frequency resource groups",
        carrier.nof_prb,
        carrier.id.value(),
        nof_freq_res
    );

    for freq_resources in 1u64..(1u64 << nof_freq_res) {
        for duration in 1u8..=3 {
            let coreset = Coreset {
                duration,
                freq_resources,
                ..Default::default()
            };
            let nof_cce = coreset.nof_cce();

            for kind in [SearchSpaceType::Common, SearchSpaceType::Ue] {
                let mut search_space = SearchSpace {
                    kind,
                    ..Default::default()
                };
                for (i, count) in search_space.nof_candidates.iter_mut().enumerate() {
                    *count = (nof_cce / (1u32 << i)).min(MAX_NOF_CANDIDATES as u32);
                }

                for aggregation_level in 0..NOF_AGGREGATION_LEVELS as u32 {
                    if nof_cce < (1u32 << aggregation_level) {
                        // Candidate cannot fit: the locator must refuse it
                        let refused = phy::pdcch::locations(
                            &coreset,
                            &search_space,
                            rnti,
                            aggregation_level,
                            0,
                        );
                        counter.record(
                            "locations-refusal",
                            match refused {
                                Err(PhyError::InvalidInputs(_)) => Ok(()),
                                other => Err(anyhow::anyhow!(
                                    "expected InvalidInputs, got {:?}",
                                    other
                                )),
                            },
                        );
                        continue;
                    }

                    counter.record(
                        "dmrs-estimation",
                        run_dmrs_test(
                            &carrier,
                            &coreset,
                            &search_space,
                            rnti,
                            aggregation_level,
                            &mut grid,
                        ),
                    );
                }
            }
        }
    }

    // Codec round trips on the widest CORESET of the sweep
    let mut coreset = Coreset {
        duration: 3,
        ..Default::default()
    };
    for r in 0..nof_freq_res {
        coreset.set_freq_resource(r, true);
    }
    for kind in [SearchSpaceType::Common, SearchSpaceType::Ue] {
        let mut search_space = SearchSpace {
            kind,
            ..Default::default()
        };
        for (i, count) in search_space.nof_candidates.iter_mut().enumerate() {
            *count = (coreset.nof_cce() / (1u32 << i)).min(MAX_NOF_CANDIDATES as u32);
        }

        for aggregation_level in 0..NOF_AGGREGATION_LEVELS as u32 {
            let l = 1u32 << aggregation_level;
            if coreset.nof_cce() < l {
                continue;
            }
            for nof_bits in [12usize, 40, 64, 100, 140] {
                // The polar code needs E > K
                if 2 * 54 * l as usize <= nof_bits + 24 {
                    continue;
                }
                counter.record(
                    "codec-roundtrip",
                    run_codec_test(
                        &carrier,
                        &coreset,
                        &search_space,
                        rnti,
                        aggregation_level,
                        nof_bits,
                        &mut grid,
                    ),
                );
            }
        }
    }

    let ok = counter.passed == counter.total;
    println!(
        "{}, {} of {} tests passed successfully.",
        if ok { "Passed" } else { "Failed" },
        counter.passed,
        counter.total
    );

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
