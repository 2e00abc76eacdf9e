//! Exclusive (hog mode) access to the output device, with shared fallback.
//!
//! Only CoreAudio offers a per-device exclusive lock that works alongside CPAL. Elsewhere
//! the stream always opens shared.

/// Hog pid reported by CoreAudio when nobody holds the device.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
const NO_HOG_PID: i32 = -1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub(crate) enum HogDecision {
    /// Device is free; try to take it.
    Acquire,
    /// This process already holds the device.
    AlreadyOwned,
    /// Another process holds the device; open shared.
    HeldBy(i32),
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub(crate) fn hog_decision(hog_pid: i32, own_pid: i32) -> HogDecision {
    if hog_pid == NO_HOG_PID {
        HogDecision::Acquire
    } else if hog_pid == own_pid {
        HogDecision::AlreadyOwned
    } else {
        HogDecision::HeldBy(hog_pid)
    }
}

#[cfg(target_os = "macos")]
mod macos {
    use coreaudio::audio_unit::macos_helpers::{
        get_device_id_from_name, get_hogging_pid, set_device_sample_rate, toggle_hog_mode,
    };
    use cpal::traits::DeviceTrait;
    use objc2_core_audio::AudioDeviceID;

    use super::{HogDecision, NO_HOG_PID, hog_decision};

    /// Holds hog mode on a device until dropped.
    pub struct ExclusiveGuard {
        device_id: AudioDeviceID,
        owned: bool,
    }

    impl Drop for ExclusiveGuard {
        fn drop(&mut self) {
            if !self.owned {
                return;
            }
            let pid = get_hogging_pid(self.device_id).unwrap_or(NO_HOG_PID);
            if pid == own_pid() {
                let _ = toggle_hog_mode(self.device_id);
                tracing::debug!(device_id = self.device_id, "released exclusive mode");
            }
        }
    }

    fn own_pid() -> i32 {
        std::process::id() as i32
    }

    pub fn maybe_acquire(
        device: &cpal::Device,
        sample_rate: u32,
        enabled: bool,
    ) -> Option<ExclusiveGuard> {
        if !enabled {
            return None;
        }
        let name = device.description().ok()?.name().to_string();
        let Some(device_id) = get_device_id_from_name(&name, false) else {
            tracing::warn!(
                device = %name,
                "exclusive mode: unable to resolve device id; using shared"
            );
            return None;
        };

        let hog_pid = get_hogging_pid(device_id).unwrap_or(NO_HOG_PID);
        match hog_decision(hog_pid, own_pid()) {
            HogDecision::HeldBy(pid) => {
                tracing::warn!(
                    device = %name,
                    hog_pid = pid,
                    "exclusive mode: device hogged by another process; using shared"
                );
                return None;
            }
            HogDecision::AlreadyOwned => {}
            HogDecision::Acquire => match toggle_hog_mode(device_id) {
                Ok(pid) if pid == own_pid() => {}
                Ok(pid) => {
                    tracing::warn!(
                        device = %name,
                        hog_pid = pid,
                        "exclusive mode: hog mode not granted; using shared"
                    );
                    return None;
                }
                Err(err) => {
                    tracing::warn!(
                        device = %name,
                        error = ?err,
                        "exclusive mode: failed to enable hog mode; using shared"
                    );
                    return None;
                }
            },
        }

        if let Err(err) = set_device_sample_rate(device_id, f64::from(sample_rate)) {
            tracing::warn!(
                device = %name,
                rate_hz = sample_rate,
                error = ?err,
                "exclusive mode: failed to set device sample rate"
            );
        }
        tracing::info!(device = %name, "exclusive mode acquired");

        Some(ExclusiveGuard {
            device_id,
            owned: true,
        })
    }
}

#[cfg(target_os = "macos")]
pub use macos::{ExclusiveGuard, maybe_acquire};

#[cfg(not(target_os = "macos"))]
pub struct ExclusiveGuard;

#[cfg(not(target_os = "macos"))]
pub fn maybe_acquire(
    _device: &cpal::Device,
    _sample_rate: u32,
    enabled: bool,
) -> Option<ExclusiveGuard> {
    if enabled {
        tracing::debug!("exclusive mode unavailable on this platform; using shared");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_device_is_acquired() {
        assert_eq!(hog_decision(NO_HOG_PID, 4321), HogDecision::Acquire);
    }

    #[test]
    fn own_hog_is_reused() {
        assert_eq!(hog_decision(4321, 4321), HogDecision::AlreadyOwned);
    }

    #[test]
    fn device_hogged_by_another_pid_falls_back() {
        assert_eq!(hog_decision(99, 4321), HogDecision::HeldBy(99));
    }
}
