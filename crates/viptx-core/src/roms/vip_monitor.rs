use super::{RomPatch, RomProfile};

/// The 512 byte COSMAC VIP monitor.
#[derive(Debug, Default, Clone)]
pub struct VipMonitor;

impl RomProfile for VipMonitor {
    fn name(&self) -> &'static str {
        "vip-monitor"
    }

    fn symbol(&self) -> Option<&'static str> {
        Some("_monitor")
    }

    fn patches(&self) -> &'static [RomPatch] {
        VIP_MONITOR_PATCHES
    }
}

/// The monitor sizes RAM in 1K steps while the emulator can provide any amount.
pub const RAM_SIZE_STEP_OFFSET: usize = 0x1c;

pub const VIP_MONITOR_PATCHES: &[RomPatch] = &[RomPatch::new(
    RAM_SIZE_STEP_OFFSET,
    1,
    "accept RAM in non-1K units",
)];
