mod registry;
mod scoring;
mod switcher;
#[cfg(test)]
mod tests;

pub use registry::{DeviceRegistry, DeviceSnapshot};
pub use scoring::{rank_devices, score_label, RankedDevice, BACK_BONUS, BASE_SCORE, FRONT_BONUS, WIDE_BONUS};
pub use switcher::{acquire_preferred, CameraSwitcher, SwitchOutcome, SwitchTrigger};
