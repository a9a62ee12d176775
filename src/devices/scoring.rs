//! Camera preference scoring.
//!
//! The label keywords are a best-effort heuristic: device labels are free
//! text and differ between platforms and locales. The rule itself is fixed
//! behavior and must not drift.

use crate::media::Device;
use serde::Serialize;

pub const BASE_SCORE: i32 = 50;
pub const BACK_BONUS: i32 = 40;
pub const FRONT_BONUS: i32 = 30;
pub const WIDE_BONUS: i32 = 10;

/// A device together with its derived ordering score
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedDevice {
    pub device: Device,
    pub score: i32,
}

/// Score a device label. Matching is case-insensitive substring matching.
pub fn score_label(label: &str) -> i32 {
    let label = label.to_lowercase();
    let wide = label.contains("wide") || label.contains("ultra");

    if label.contains("back") && !wide {
        BASE_SCORE + BACK_BONUS
    } else if label.contains("front") || label.contains("selfie") {
        BASE_SCORE + FRONT_BONUS
    } else if wide {
        BASE_SCORE + WIDE_BONUS
    } else {
        BASE_SCORE
    }
}

/// Sort descending by score. The sort is stable, so equal scores keep
/// enumeration order.
pub fn rank_devices(devices: Vec<Device>) -> Vec<RankedDevice> {
    let mut ranked: Vec<RankedDevice> = devices
        .into_iter()
        .map(|device| RankedDevice {
            score: score_label(&device.label),
            device,
        })
        .collect();
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked
}
