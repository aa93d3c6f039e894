//! Implementations of the container formats that define how a program image
//! is laid out on the platform it runs on.
//!
//! Each child module knows how to recognise and load one format. They are
//! dispatched to through `loader::Handler`.

pub mod amiga;
pub mod atarist;
pub mod binary;
pub mod human68k;
pub mod snes;
pub mod zxspectrum;

#[cfg(test)]
pub mod tests;

use serde::Serialize;
use std::{fmt, str};

/// Enumeration of all platforms that ship with Peasauce.
#[derive(Copy, Clone, Serialize, Debug, PartialEq, Eq, Hash)]
pub enum PlatformName {
    Amiga,
    AtariSt,
    Snes,
    X68000,
    ZxSpectrum,
}

impl PlatformName {
    /// Iterate all valid platform names.
    pub fn iter() -> impl IntoIterator<Item = PlatformName> {
        vec![
            Self::Amiga,
            Self::AtariSt,
            Self::Snes,
            Self::X68000,
            Self::ZxSpectrum,
        ]
    }

    /// The stable numeric identity of this platform.
    pub fn id(self) -> u32 {
        match self {
            Self::Amiga => 1000,
            Self::AtariSt => 2000,
            Self::Snes => 6000,
            Self::X68000 => 7000,
            Self::ZxSpectrum => 8000,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::iter().into_iter().find(|p| p.id() == id)
    }

    /// Yield a name for this platform.
    pub fn friendly_name(self) -> &'static str {
        match self {
            Self::Amiga => "Amiga",
            Self::AtariSt => "Atari ST",
            Self::Snes => "Super Nintendo",
            Self::X68000 => "X68000",
            Self::ZxSpectrum => "ZX Spectrum",
        }
    }
}

impl fmt::Display for PlatformName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.friendly_name())
    }
}

impl str::FromStr for PlatformName {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_ref() {
            "amiga" => Ok(PlatformName::Amiga),
            "atarist" => Ok(PlatformName::AtariSt),
            "atari st" => Ok(PlatformName::AtariSt),
            "snes" => Ok(PlatformName::Snes),
            "sfc" => Ok(PlatformName::Snes),
            "x68000" => Ok(PlatformName::X68000),
            "x68k" => Ok(PlatformName::X68000),
            "zxspectrum" => Ok(PlatformName::ZxSpectrum),
            "zx spectrum" => Ok(PlatformName::ZxSpectrum),
            _ => Err(()),
        }
    }
}

derive_deserialize_from_str!(PlatformName, "valid platform name");
