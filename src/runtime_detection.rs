//! Host SIMD detection, cached for the process lifetime.
//!
//! `AFQ_SIMD` overrides detection: `off`, `scalar` or `0` force the scalar
//! kernels, `auto`, `on` or `1` keep the detected level. Anything else is
//! ignored with a warning.

use std::env;
use std::sync::OnceLock;

pub const SIMD_ENV: &str = "AFQ_SIMD";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IsaLevel {
    Scalar,
    Sse2,
    Avx2,
    Neon,
}

impl IsaLevel {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Sse2 => "sse2",
            Self::Avx2 => "avx2",
            Self::Neon => "neon",
        }
    }

    #[inline]
    pub fn has_simd(&self) -> bool {
        !matches!(self, Self::Scalar)
    }
}

static ISA_LEVEL: OnceLock<IsaLevel> = OnceLock::new();

/// Effective ISA level: detected once, then the environment override applied.
pub fn get_isa_level() -> IsaLevel {
    *ISA_LEVEL.get_or_init(|| {
        let detected = detect_isa_features();
        let level = resolve_override(env::var(SIMD_ENV).ok().as_deref(), detected);
        log::debug!("isa level {} (detected {})", level.name(), detected.name());
        level
    })
}

#[inline]
pub fn simd_enabled() -> bool {
    get_isa_level().has_simd()
}

/// Apply an `AFQ_SIMD` value to a detected level.
pub fn resolve_override(value: Option<&str>, detected: IsaLevel) -> IsaLevel {
    let Some(raw) = value else {
        return detected;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "off" | "scalar" | "0" => IsaLevel::Scalar,
        "" | "auto" | "on" | "1" => detected,
        other => {
            log::warn!("{SIMD_ENV}={other:?} not recognised, fallback: {}", detected.name());
            detected
        }
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn detect_isa_features() -> IsaLevel {
    if is_x86_feature_detected!("avx2") {
        IsaLevel::Avx2
    } else if is_x86_feature_detected!("sse2") {
        IsaLevel::Sse2
    } else {
        IsaLevel::Scalar
    }
}

#[cfg(target_arch = "aarch64")]
fn detect_isa_features() -> IsaLevel {
    if std::arch::is_aarch64_feature_detected!("neon") {
        IsaLevel::Neon
    } else {
        IsaLevel::Scalar
    }
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
fn detect_isa_features() -> IsaLevel {
    IsaLevel::Scalar
}
