//! Kernel configuration.
//!
//! The core exposes no CLI or environment surface: driver programs build a
//! `KernelConfig` explicitly, optionally populated from a TOML file. Every
//! recognized option has a default so a bare `[kernel]` table is valid.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::fusion::ledger::LedgerConfig;
use crate::numeric::softmax::SoftmaxMode;
use crate::smoother::SmootherConfig;

const DEFAULT_CELL_SIZE: f64 = 0.25;
const DEFAULT_MAX_CELLS: usize = 100_000;
const DEFAULT_EXPECTED_CELLS: usize = 4_096;
const DEFAULT_SOFTMAX_MODE: &str = "strict";
const DEFAULT_STRICT_DETERMINISM: bool = false;

fn config_f64(value: Option<f64>, default: f64) -> f64 {
    value.unwrap_or(default)
}

fn config_usize(value: Option<usize>, default: usize) -> usize {
    value.unwrap_or(default)
}

#[derive(Debug, Deserialize, Default)]
struct KernelConfigFile {
    cell_size: Option<f64>,
    max_cells: Option<usize>,
    expected_cells: Option<usize>,
    softmax_mode: Option<String>,
    strict_determinism: Option<bool>,
    wal_path: Option<String>,
    merkle_tile_store_path: Option<String>,
    device_key_seed: Option<String>,
    session_stable_id: Option<u64>,
}

/// Explicit kernel configuration.
#[derive(Clone, Debug)]
pub struct KernelConfig {
    /// World units per grid cell.
    pub cell_size: f64,
    /// Grid capacity before deterministic eviction.
    pub max_cells: usize,
    /// Cell count at which coverage normalizes to 1.0.
    pub expected_cells: usize,
    pub softmax_mode: SoftmaxMode,
    /// When set, Tier0 overflow, consumed-frame access, and reentrancy are
    /// fatal rather than logged.
    pub strict_determinism: bool,
    /// WAL file; in-memory when absent.
    pub wal_path: Option<String>,
    /// Merkle tile SQLite store; in-memory when absent.
    pub merkle_tile_store_path: Option<String>,
    /// Seed for the audit signing key.
    pub device_key_seed: String,
    pub session_stable_id: u64,
    pub ledger: LedgerConfig,
    pub smoother: SmootherConfig,
}

impl KernelConfig {
    /// In-memory configuration with defaults; drivers override fields.
    pub fn ephemeral(device_key_seed: &str, session_stable_id: u64) -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
            max_cells: DEFAULT_MAX_CELLS,
            expected_cells: DEFAULT_EXPECTED_CELLS,
            softmax_mode: SoftmaxMode::Strict,
            strict_determinism: DEFAULT_STRICT_DETERMINISM,
            wal_path: None,
            merkle_tile_store_path: None,
            device_key_seed: device_key_seed.to_string(),
            session_stable_id,
            ledger: LedgerConfig::default(),
            smoother: SmootherConfig::default(),
        }
    }

    /// Load from a TOML file; absent keys take defaults.
    pub fn load(path: impl AsRef<Path>, session_stable_id: u64) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read config {}: {}", path.display(), e))?;
        let file: KernelConfigFile = toml::from_str(&contents)
            .map_err(|e| anyhow!("failed to parse config {}: {}", path.display(), e))?;

        let softmax_mode = parse_softmax_mode(
            file.softmax_mode.as_deref().unwrap_or(DEFAULT_SOFTMAX_MODE),
        )?;
        let cell_size = config_f64(file.cell_size, DEFAULT_CELL_SIZE);
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(anyhow!("cell_size must be positive and finite"));
        }
        let max_cells = config_usize(file.max_cells, DEFAULT_MAX_CELLS);
        if max_cells == 0 {
            return Err(anyhow!("max_cells must be nonzero"));
        }
        let device_key_seed = file
            .device_key_seed
            .ok_or_else(|| anyhow!("device_key_seed is required in {}", path.display()))?;

        Ok(Self {
            cell_size,
            max_cells,
            expected_cells: config_usize(file.expected_cells, DEFAULT_EXPECTED_CELLS),
            softmax_mode,
            strict_determinism: file
                .strict_determinism
                .unwrap_or(DEFAULT_STRICT_DETERMINISM),
            wal_path: file.wal_path,
            merkle_tile_store_path: file.merkle_tile_store_path,
            device_key_seed,
            session_stable_id: file.session_stable_id.unwrap_or(session_stable_id),
            ledger: LedgerConfig::default(),
            smoother: SmootherConfig::default(),
        })
    }

    /// Canonical digest of the decision-relevant policy knobs.
    pub fn policy_digest(&self) -> String {
        hex::encode(self.params_hash())
    }

    /// Hash of the log-shaping parameters, carried in signed tree heads.
    pub fn params_hash(&self) -> [u8; 32] {
        let canonical = format!(
            "cell_size={}\nmax_cells={}\nexpected_cells={}\nsoftmax_mode={}\nstrict_determinism={}",
            self.cell_size,
            self.max_cells,
            self.expected_cells,
            match self.softmax_mode {
                SoftmaxMode::Strict => "strict",
                SoftmaxMode::Fast => "fast",
            },
            self.strict_determinism
        );
        Sha256::digest(canonical.as_bytes()).into()
    }
}

fn parse_softmax_mode(raw: &str) -> Result<SoftmaxMode> {
    match raw {
        "strict" => Ok(SoftmaxMode::Strict),
        "fast" => Ok(SoftmaxMode::Fast),
        other => Err(anyhow!(
            "softmax_mode must be \"strict\" or \"fast\", got {:?}",
            other
        )),
    }
}
