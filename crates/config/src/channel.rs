use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use drover_ftpdata::{ModeCodec, TransferMode, TransferStructure};
use serde::{Deserialize, Serialize};

/// The `[data_channel]` section: the FTP `MODE` and `STRU` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataChannelConfig {
    pub mode: String,
    pub structure: String,
}

impl Default for DataChannelConfig {
    fn default() -> Self {
        Self { mode: TransferMode::default().to_string(), structure: TransferStructure::default().to_string() }
    }
}

impl DataChannelConfig {
    /// Parse both codes and make sure a codec can be built for them.
    pub fn validate(&self) -> Result<(TransferMode, TransferStructure)> {
        let mode = self
            .mode
            .parse::<TransferMode>()
            .or_raise(|| ErrorKind::Invalid(format!("data_channel.mode: {:?}", self.mode)))?;
        let structure = self
            .structure
            .parse::<TransferStructure>()
            .or_raise(|| ErrorKind::Invalid(format!("data_channel.structure: {:?}", self.structure)))?;
        Self::codec_for(mode, structure)?;
        Ok((mode, structure))
    }

    pub fn codec(&self) -> Result<ModeCodec> {
        let (mode, structure) = self.validate()?;
        Self::codec_for(mode, structure)
    }

    fn codec_for(mode: TransferMode, structure: TransferStructure) -> Result<ModeCodec> {
        ModeCodec::new(mode, structure)
            .or_raise(|| ErrorKind::Invalid(format!("data_channel: MODE {mode} with STRU {structure} is not supported")))
    }
}
