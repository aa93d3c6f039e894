//! Data type tags used to classify regions of a program.

use serde::{Deserialize, Serialize};
use std::{fmt, str};

/// Classification of a region of bytes.
///
/// The numeric tags are stable; they are packed into block flags and written
/// into project files.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum DataType {
    Code = 1,
    Ascii = 2,
    Data08 = 3,
    Data16 = 4,
    Data32 = 5,
}

/// Numeric data types paired with their width in bytes, widest first.
pub const DATA_TYPE_SIZES: [(DataType, u32); 3] = [
    (DataType::Data32, 4),
    (DataType::Data16, 2),
    (DataType::Data08, 1),
];

impl DataType {
    pub fn iter() -> impl IntoIterator<Item = Self> {
        vec![
            Self::Code,
            Self::Ascii,
            Self::Data08,
            Self::Data16,
            Self::Data32,
        ]
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(Self::Code),
            2 => Some(Self::Ascii),
            3 => Some(Self::Data08),
            4 => Some(Self::Data16),
            5 => Some(Self::Data32),
            _ => None,
        }
    }

    /// The largest tag value any data type uses.
    pub fn max_tag() -> u8 {
        Self::iter()
            .into_iter()
            .map(|t| t.tag())
            .max()
            .unwrap_or(0)
    }

    /// Width in bytes of a single unit of this type, if it is numeric.
    pub fn size(self) -> Option<u32> {
        DATA_TYPE_SIZES
            .iter()
            .find(|(t, _)| *t == self)
            .map(|(_, size)| *size)
    }

    pub fn is_numeric(self) -> bool {
        self.size().is_some()
    }

    pub fn friendly_name(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Ascii => "ASCII",
            Self::Data08 => "8-bit data",
            Self::Data16 => "16-bit data",
            Self::Data32 => "32-bit data",
        }
    }
}

impl From<DataType> for u8 {
    fn from(t: DataType) -> u8 {
        t.tag()
    }
}

impl std::convert::TryFrom<u8> for DataType {
    type Error = String;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        DataType::from_tag(tag as u32).ok_or_else(|| format!("unknown data type tag {}", tag))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.friendly_name())
    }
}

impl str::FromStr for DataType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_ref() {
            "code" => Ok(DataType::Code),
            "ascii" => Ok(DataType::Ascii),
            "data08" | "byte" => Ok(DataType::Data08),
            "data16" | "word" => Ok(DataType::Data16),
            "data32" | "long" => Ok(DataType::Data32),
            _ => Err(()),
        }
    }
}
