use super::{RomPatch, RomProfile};

/// The RCA Studio II system ROM.
#[derive(Debug, Default, Clone)]
pub struct Studio2;

impl RomProfile for Studio2 {
    fn name(&self) -> &'static str {
        "studio2"
    }

    fn symbol(&self) -> Option<&'static str> {
        Some("_studio2")
    }

    fn patches(&self) -> &'static [RomPatch] {
        STUDIO2_PATCHES
    }
}

pub const WAIT_FOR_B1_OFFSET: usize = 0x3e;

pub const STUDIO2_PATCHES: &[RomPatch] = &[RomPatch::new(
    WAIT_FOR_B1_OFFSET,
    56,
    "do not wait for B1 at startup",
)];
