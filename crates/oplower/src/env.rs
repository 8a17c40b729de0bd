use std::env;
use std::path::PathBuf;

pub(crate) const ENABLE_PROFILING: &str = "OPLOWER_ENABLE_PROFILING";
pub(crate) const CUSTOM_KERNELS: &str = "OPLOWER_CUSTOM_KERNELS";
pub(crate) const GLOBAL_CUSTOM_KERNELS: &str = "OPLOWER_GLOBAL_CUSTOM_KERNELS";

pub(crate) fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Reads a boolean flag; unset or blank variables yield `None`.
pub(crate) fn flag(name: &str) -> Option<bool> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(parse_bool(&value)),
        _ => None,
    }
}

pub(crate) fn path(name: &str) -> Option<PathBuf> {
    match env::var_os(name) {
        Some(value) if !value.is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}
