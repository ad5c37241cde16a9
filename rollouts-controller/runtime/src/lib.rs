pub use rollouts_controller_core as core;
pub use rollouts_controller_k8s_api as k8s;
pub use rollouts_controller_trafficrouting as trafficrouting;
pub use rollouts_controller_validation as validation;

mod args;
mod operation;
mod references;

pub use self::args::Args;
