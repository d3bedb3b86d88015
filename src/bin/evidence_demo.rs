//! evidence_demo - Synthetic capture session against the evidence kernel
//!
//! Drives the full pipeline with generated sensor samples: grid batches,
//! ledger updates, smoothing, state transitions, provenance, audit log, and
//! a final admission decision. Useful for demos and for producing a WAL
//! that `audit_verify` can check independently.

use anyhow::Result;
use clap::Parser;
use rand::{rngs::StdRng, Rng, SeedableRng};
use uuid::Uuid;

use evidence_kernel::grid::{DimensionalScores, GridCell, GridLevel, GridOp};
use evidence_kernel::numeric::q16::Q16_ONE;
use evidence_kernel::{
    AdmissionInputs, BuildMode, DsMass, EvidenceKernel, FpsTier, FrameSample, FrameStats,
    KernelConfig, Observation, Verdict,
};

#[derive(Parser, Debug)]
#[command(
    name = "evidence_demo",
    about = "Run a synthetic capture session through the evidence kernel"
)]
struct Args {
    /// Number of frames to process
    #[arg(long, default_value_t = 120)]
    frames: u32,

    /// Sensor samples per frame
    #[arg(long, default_value_t = 6)]
    samples_per_frame: u32,

    /// Write the audit WAL here (in-memory when omitted)
    #[arg(long)]
    wal: Option<String>,

    /// Persist Merkle tiles here (in-memory when omitted)
    #[arg(long)]
    tile_store: Option<String>,

    /// Device key seed; fixed seeds make reruns reproducible
    #[arg(long, default_value = "devkey:demo")]
    device_key_seed: String,

    /// Deterministic RNG seed for the synthetic scene
    #[arg(long, default_value_t = 7)]
    scene_seed: u64,

    /// Fatal strictness for overflow, leaks, and reentrancy
    #[arg(long)]
    strict: bool,
}

fn synthetic_sample(rng: &mut StdRng, frame: u32, index: u32, t_ms: i64) -> FrameSample {
    let quality: f64 = 0.55 + rng.gen::<f64>() * 0.4;
    let patch_id = format!("patch:scan_{}_{}", frame % 40, index);
    let position = (
        (frame % 40) as i32 - 20,
        index as i32,
        rng.gen_range(-3..3),
    );
    let cell = GridCell::new(
        patch_id.clone(),
        position,
        DimensionalScores {
            brightness: quality,
            laplacian: quality * 0.95,
            parallax: rng.gen::<f64>(),
        },
        DsMass::new(quality, (1.0 - quality) / 2.0, (1.0 - quality) / 2.0),
        GridLevel::ALL[(frame as usize + index as usize) % 7],
        1 << (index % 6),
        t_ms,
    );
    let key = cell.key().expect("demo positions stay in volume");
    FrameSample {
        observation: Observation {
            patch_id,
            gate_quality: quality,
            soft_quality: (quality + 0.05).min(1.0),
            verdict: if quality > 0.8 {
                Verdict::Pass
            } else if quality > 0.6 {
                Verdict::Marginal
            } else {
                Verdict::Fail
            },
            frame_id: frame as u64,
            t_ms,
            error: None,
        },
        grid_ops: vec![GridOp::Insert { key, cell }],
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    evidence_kernel::frame::reset_frame_counter();

    let mut config = KernelConfig::ephemeral(&args.device_key_seed, args.scene_seed);
    config.expected_cells = (args.frames * args.samples_per_frame / 2).max(16) as usize;
    config.strict_determinism = args.strict;
    config.wal_path = args.wal.clone();
    config.merkle_tile_store_path = args.tile_store.clone();

    let mut kernel = EvidenceKernel::open(config)?;
    let mut rng = StdRng::seed_from_u64(args.scene_seed);

    println!(
        "evidence_demo: {} frames x {} samples",
        args.frames, args.samples_per_frame
    );

    for frame in 0..args.frames {
        let t_ms = frame as i64 * 33;
        let samples: Vec<FrameSample> = (0..args.samples_per_frame)
            .map(|index| synthetic_sample(&mut rng, frame, index, t_ms))
            .collect();
        let stats = FrameStats {
            fps_tier: FpsTier::Full,
            brightness_confidence: 0.9,
            laplacian_confidence: 0.88,
        };
        let report = kernel.process_frame(samples, stats)?;
        if let Some(hash) = &report.transition_hash {
            println!(
                "  frame {:4}: {} (coverage {:.3}, audit entry {}, hash {})",
                report.frame_id,
                report.color_state.raw(),
                report.smoothed_coverage,
                report.audit_entry_id.unwrap_or(0),
                &hash[..12]
            );
        }
    }

    // One admission decision over the finished session.
    let inputs = AdmissionInputs {
        candidate_id: Uuid::new_v4(),
        capacity: kernel.capacity_metrics(),
        eeb_delta_q16: -5 * Q16_ONE,
        build_mode: BuildMode::Full,
        reject_reason: None,
        hard_fuse: None,
        policy_hash: 0x00e1_dece_0000_0001,
        session_stable_id: args.scene_seed,
        candidate_stable_id: 1,
        value_score: 5_000,
        per_flow_counters: vec![0; 8],
        flow_bucket_count: 8,
        throttle: None,
        degradation_level: 0,
        degradation_reason_code: None,
        schema_version: 0x0204,
    };
    let outcome = kernel.evaluate_admission(&inputs)?;
    println!(
        "  admission: {} hash={}",
        outcome.decision.classification.as_str(),
        outcome.decision_hash_hex()
    );

    assert!(kernel.verify_provenance(), "provenance chain must verify");
    let sth = kernel.audit_log().get_signed_tree_head()?;
    sth.verify(&kernel.audit_log().verifying_key())?;

    println!("{}", kernel.session_report()?);
    kernel.close()?;
    println!("evidence_demo: done");
    Ok(())
}
