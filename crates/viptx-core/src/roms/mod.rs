pub use studio2::Studio2;
pub use vip_monitor::VipMonitor;

use crate::ConvertError;

pub mod studio2;
pub mod vip_monitor;

/// A single byte changed in a ROM image before it is embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomPatch {
    pub offset: usize,
    pub value: u8,
    pub description: &'static str,
}

impl RomPatch {
    pub const fn new(offset: usize, value: u8, description: &'static str) -> Self {
        Self {
            offset,
            value,
            description,
        }
    }
}

/// This trait describes a known ROM image and the fixes it needs to run
/// under the emulator.
pub trait RomProfile {
    /// Name used on the command line
    fn name(&self) -> &'static str;

    /// Symbol of the generated array, `None` to derive it from the file name
    fn symbol(&self) -> Option<&'static str> {
        None
    }

    /// Optional, most images are embedded as is
    fn patches(&self) -> &'static [RomPatch] {
        &[]
    }
}

/// Embeds the image unchanged.
#[derive(Debug, Default, Clone)]
pub struct Plain;

impl RomProfile for Plain {
    fn name(&self) -> &'static str {
        "plain"
    }
}

/// This is a helper struct, which allows you to iterate over every known profile
pub struct RomIter {
    inner: std::vec::IntoIter<Box<dyn RomProfile>>,
}

impl RomIter {
    pub fn new() -> Self {
        Self {
            inner: vec![
                Box::new(Plain) as Box<dyn RomProfile>,
                Box::new(VipMonitor),
                Box::new(Studio2),
            ]
            .into_iter(),
        }
    }

    pub fn find_by_name(name: &str) -> Option<Box<dyn RomProfile>> {
        Self::new().find(|profile| profile.name().eq_ignore_ascii_case(name))
    }

    pub fn names() -> Vec<&'static str> {
        Self::new().map(|profile| profile.name()).collect()
    }
}

impl Default for RomIter {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for RomIter {
    type Item = Box<dyn RomProfile>;
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// Applies every patch of `profile`. The image is left untouched if any
/// patch falls outside it.
pub fn apply_patches(image: &mut [u8], profile: &dyn RomProfile) -> Result<(), ConvertError> {
    let patches = profile.patches();

    if let Some(patch) = patches.iter().find(|patch| patch.offset >= image.len()) {
        return Err(ConvertError::PatchOutOfRange {
            offset: patch.offset,
            len: image.len(),
        });
    }

    for patch in patches {
        log::debug!(
            "{}: {:#06x} {:#04x} -> {:#04x} ({})",
            profile.name(),
            patch.offset,
            image[patch.offset],
            patch.value,
            patch.description
        );
        image[patch.offset] = patch.value;
    }

    Ok(())
}
