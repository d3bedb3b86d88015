//! Platform description leaf.
//!
//! The kernel itself is platform-neutral; the descriptor exists so boundary
//! modules can tag reports and tests can pin a fixed environment. It carries
//! no behavior.

use serde::{Deserialize, Serialize};

/// Static description of the host platform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlatformDescriptor {
    pub platform_tag: String,
    pub screen_scale: f64,
    pub screen_bounds: (u32, u32),
    pub is_simulator: bool,
}

impl PlatformDescriptor {
    /// Descriptor for the compiling host.
    pub fn host() -> Self {
        Self {
            platform_tag: std::env::consts::OS.to_string(),
            screen_scale: 1.0,
            screen_bounds: (0, 0),
            is_simulator: false,
        }
    }

    /// Fixed descriptor for deterministic tests.
    pub fn fixed_for_tests() -> Self {
        Self {
            platform_tag: "test".to_string(),
            screen_scale: 2.0,
            screen_bounds: (1920, 1080),
            is_simulator: true,
        }
    }
}
