#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod fanout;
mod routing;
mod weights;

pub use self::{
    routing::{Capabilities, TrafficRoutingReconciler, WeightVerification},
    weights::{WeightDestination, WeightError, WeightSplit},
};

/// Kubernetes object names are limited to 253 characters.
pub const MAX_NAME_LEN: usize = 253;

const CANARY_SUFFIX: &str = "-canary";

/// Names the child resource derived from `base`, truncating the base name so
/// that the suffix always fits.
pub fn canary_name(base: &str) -> String {
    let mut end = base.len().min(MAX_NAME_LEN - CANARY_SUFFIX.len());
    while !base.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &base[..end], CANARY_SUFFIX)
}
