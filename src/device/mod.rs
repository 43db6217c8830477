//! driver boundary for the physical peripherals
//!
//! keyfob never implements sensor image processing or rf protocol internals;
//! a driver only has to surface the handful of operations below. the
//! [`software`] backends implement the same traits against plain files and
//! stdin so the binary runs end-to-end without hardware.

pub mod software;

use crate::Result;

/// uid of a detected proximity tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagUid(pub [u8; 4]);

impl std::fmt::Display for TagUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a}-{b}-{c}-{d}")
    }
}

/// fingerprint sensor driver.
///
/// two capture slots: enrollment captures the same finger into slot 1 and 2
/// and compares them. per-call transient failures are `Error::Capture`; an
/// unreachable or wrongly-credentialed sensor fails construction with
/// `Error::DeviceInit`.
pub trait FingerprintDevice {
    /// poll for a finger image; false means nothing on the sensor yet
    fn read_image(&mut self) -> Result<bool>;

    /// convert the last image into the given characteristics slot (1 or 2)
    fn convert(&mut self, slot: u8) -> Result<()>;

    /// search the template store for slot 1, returning the match position
    fn search(&mut self) -> Result<Option<u16>>;

    /// compare the two capture slots
    fn compare(&mut self) -> Result<bool>;

    /// build a template from the two slots
    fn create_template(&mut self) -> Result<()>;

    /// persist the template, returning its position
    fn store_template(&mut self) -> Result<u16>;
}

/// proximity tag reader driver (16-byte block medium).
pub trait TagReader {
    /// block until a tag enters the field, returning its uid
    fn wait_for_tag(&mut self) -> Result<TagUid>;

    /// select the tag for subsequent block operations
    fn select(&mut self, uid: &TagUid) -> Result<()>;

    /// authenticate the sector containing `block`
    fn auth_block(&mut self, block: u8) -> Result<()>;

    fn read_block(&mut self, block: u8) -> Result<[u8; 16]>;

    fn write_block(&mut self, block: u8, data: &[u8; 16]) -> Result<()>;

    /// deauthenticate and idle the antenna. idempotent.
    fn halt(&mut self);
}
