use crate::error::{Error, ErrorKind};
use std::str::FromStr;

/// Transfer mode, as negotiated with the `MODE` command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, derive_more::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransferMode {
    /// Raw bytes; end of file is the connection closing (`MODE S`).
    #[default]
    #[display("S")]
    Stream,
    /// Header-framed blocks (`MODE B`).
    #[display("B")]
    Block,
    /// Run-length compressed (`MODE C`). Recognised, never supported.
    #[display("C")]
    Compressed,
}

/// File structure, as negotiated with the `STRU` command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, derive_more::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransferStructure {
    /// Continuous sequence of bytes (`STRU F`).
    #[default]
    #[display("F")]
    File,
    /// Sequence of records (`STRU R`).
    #[display("R")]
    Record,
    /// Indexed pages (`STRU P`). Recognised, never supported.
    #[display("P")]
    Page,
}

impl FromStr for TransferMode {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "s" | "stream" => Ok(TransferMode::Stream),
            "b" | "block" => Ok(TransferMode::Block),
            "c" | "compressed" => Ok(TransferMode::Compressed),
            _ => exn::bail!(ErrorKind::UnsupportedMode(s.to_string())),
        }
    }
}

impl FromStr for TransferStructure {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "f" | "file" => Ok(TransferStructure::File),
            "r" | "record" => Ok(TransferStructure::Record),
            "p" | "page" => Ok(TransferStructure::Page),
            _ => exn::bail!(ErrorKind::UnsupportedStructure(s.to_string())),
        }
    }
}

impl TransferMode {
    #[must_use]
    pub fn is_supported(self) -> bool {
        !matches!(self, TransferMode::Compressed)
    }
}

impl TransferStructure {
    #[must_use]
    pub fn is_supported(self) -> bool {
        !matches!(self, TransferStructure::Page)
    }
}
