//! LE-specific types.

use std::fmt::{Debug, Display, Formatter};

/// Address type classification ([Vol 6] Part B, Section 1.3).
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    strum::Display,
)]
#[repr(u8)]
pub enum AddrType {
    #[default]
    Public = 0x00,
    Random = 0x01,
}

/// 48-bit untyped device address stored in little-endian byte order.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct RawAddr([u8; 6]);

impl RawAddr {
    /// Resolvable private addresses have `0b01` in the two most significant
    /// bits ([Vol 6] Part B, Section 1.3.2.2).
    const RESOLVE_MASK: u8 = 0xC0;
    const RESOLVE_MSB: u8 = 0x40;

    /// Returns whether the address is a resolvable private address. Only
    /// meaningful for random addresses.
    #[inline]
    #[must_use]
    pub const fn is_resolvable(self) -> bool {
        self.0[5] & Self::RESOLVE_MASK == Self::RESOLVE_MSB
    }
}

impl From<[u8; 6]> for RawAddr {
    #[inline]
    fn from(v: [u8; 6]) -> Self {
        Self(v)
    }
}

impl AsRef<[u8]> for RawAddr {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl Debug for RawAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // [Vol 3] Part C, Section 3.2.1.3
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[5], self.0[4], self.0[3], self.0[2], self.0[1], self.0[0]
        )
    }
}

impl Display for RawAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}
