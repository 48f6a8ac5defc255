//! Boilerplate wrapping for user-authored synthesis code.
//!
//! User code is WGSL and must define:
//!
//! ```wgsl
//! fn main_sound(time: f32) -> vec2<f32> { ... }
//! ```
//!
//! `time` is seconds since engine start; the result is `(left, right)`.
//! The template converts the integer sample index to time and clamps the
//! output before storing it.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Name of the function user code must define.
pub const USER_ENTRY_POINT: &str = "main_sound";

/// Compute entry point generated by the template.
pub const COMPUTE_ENTRY_POINT: &str = "synth_main";

/// Threads per workgroup in the generated compute shader.
pub const WORKGROUP_SIZE: u32 = 64;

const TEMPLATE: &str = include_str!("../gpu/shaders/synth.wgsl");
const USER_CODE_MARKER: &str = "{{USER_CODE}}";

/// A synthesis program ready to hand to a compute unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    /// The code as the user wrote it.
    pub user_code: String,
    /// User code spliced into the compute boilerplate.
    pub wrapped: String,
    pub hash: u64,
}

impl ProgramSource {
    pub fn new(user_code: impl Into<String>) -> Self {
        let user_code = user_code.into();
        let wrapped = wrap_user_code(&user_code);
        let mut hasher = DefaultHasher::new();
        user_code.hash(&mut hasher);
        Self {
            user_code,
            wrapped,
            hash: hasher.finish(),
        }
    }

    /// Number of template lines preceding the user code in `wrapped`.
    pub fn user_line_offset(&self) -> u32 {
        template_prefix_lines()
    }
}

/// Splice user code into the compute boilerplate.
pub fn wrap_user_code(user_code: &str) -> String {
    TEMPLATE.replacen(USER_CODE_MARKER, user_code, 1)
}

fn template_prefix_lines() -> u32 {
    TEMPLATE
        .find(USER_CODE_MARKER)
        .map(|pos| TEMPLATE[..pos].lines().count() as u32)
        .unwrap_or(0)
}

/// Split an absolute sample offset into `(whole_seconds, remainder_samples)`.
///
/// Integer-only so long-running streams keep full time precision.
pub fn split_offset(sample_offset: u64, sample_rate: u32) -> (u64, u32) {
    let rate = u64::from(sample_rate.max(1));
    (sample_offset / rate, (sample_offset % rate) as u32)
}
