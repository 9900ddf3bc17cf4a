use bytes::Bytes;
use std::fmt;

/// BLOCK mode descriptor bits (RFC 959 §3.4.2).
///
/// The restart bit is not stored here: it follows from the block's
/// [`Content`], so a block can never claim to be a restart marker while
/// carrying file data (or the other way around).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Descriptor(u8);

impl Descriptor {
    /// End of data block is EOR.
    pub const EOR: u8 = 0x80;
    /// End of data block is EOF.
    pub const EOF: u8 = 0x40;
    /// Suspected errors in data block.
    pub const SUSPECT: u8 = 0x20;
    /// Data block is a restart marker.
    pub const RESTART: u8 = 0x10;

    /// Keep the EOR, EOF and SUSPECT bits of a raw descriptor byte.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & (Self::EOR | Self::EOF | Self::SUSPECT))
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn is_eor(self) -> bool {
        self.0 & Self::EOR != 0
    }

    #[must_use]
    pub const fn is_eof(self) -> bool {
        self.0 & Self::EOF != 0
    }

    #[must_use]
    pub const fn is_suspect(self) -> bool {
        self.0 & Self::SUSPECT != 0
    }

    /// Whether a block with this descriptor must reach the wire even when it
    /// carries no bytes.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        self.is_eor() || self.is_eof()
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = f.debug_set();
        for (bit, name) in [(Self::EOR, "EOR"), (Self::EOF, "EOF"), (Self::SUSPECT, "SUSPECT")] {
            if self.0 & bit != 0 {
                flags.entry(&name);
            }
        }
        flags.finish()
    }
}

/// What a [`DataBlock`] carries: file bytes or restart-marker bytes, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Data(Bytes),
    Restart(Bytes),
}

/// One unit of the data stream, as seen by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    descriptor: Descriptor,
    content: Content,
}

impl DataBlock {
    /// A block of plain file data with no flags set.
    pub fn data(payload: impl Into<Bytes>) -> Self {
        Self { descriptor: Descriptor::default(), content: Content::Data(payload.into()) }
    }

    /// A restart marker. Only BLOCK mode can carry these.
    pub fn restart(markers: impl Into<Bytes>) -> Self {
        Self { descriptor: Descriptor::default(), content: Content::Restart(markers.into()) }
    }

    /// An empty block that only signals end of file.
    #[must_use]
    pub fn eof() -> Self {
        Self::data(Bytes::new()).with_eof()
    }

    pub(crate) fn from_parts(descriptor: Descriptor, content: Content) -> Self {
        Self { descriptor, content }
    }

    #[must_use]
    pub fn with_eor(mut self) -> Self {
        self.descriptor.0 |= Descriptor::EOR;
        self
    }

    #[must_use]
    pub fn with_eof(mut self) -> Self {
        self.descriptor.0 |= Descriptor::EOF;
        self
    }

    #[must_use]
    pub fn with_suspect(mut self) -> Self {
        self.descriptor.0 |= Descriptor::SUSPECT;
        self
    }

    #[must_use]
    pub fn descriptor(&self) -> Descriptor {
        self.descriptor
    }

    /// The full descriptor byte as it appears in a BLOCK header.
    #[must_use]
    pub fn descriptor_byte(&self) -> u8 {
        match self.content {
            Content::Data(_) => self.descriptor.bits(),
            Content::Restart(_) => self.descriptor.bits() | Descriptor::RESTART,
        }
    }

    #[must_use]
    pub fn content(&self) -> &Content {
        &self.content
    }

    /// Raw bytes of whichever content the block carries.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        match &self.content {
            Content::Data(bytes) | Content::Restart(bytes) => bytes,
        }
    }

    /// File data, or `None` for restart markers.
    #[must_use]
    pub fn data_bytes(&self) -> Option<&Bytes> {
        match &self.content {
            Content::Data(bytes) => Some(bytes),
            Content::Restart(_) => None,
        }
    }

    /// Restart-marker bytes, or `None` for file data.
    #[must_use]
    pub fn markers(&self) -> Option<&Bytes> {
        match &self.content {
            Content::Restart(bytes) => Some(bytes),
            Content::Data(_) => None,
        }
    }

    #[must_use]
    pub fn is_restart(&self) -> bool {
        matches!(self.content, Content::Restart(_))
    }

    #[must_use]
    pub fn is_eor(&self) -> bool {
        self.descriptor.is_eor()
    }

    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.descriptor.is_eof()
    }

    /// Length of the payload in bytes.
    #[must_use]
    pub fn byte_count(&self) -> usize {
        self.payload().len()
    }

    #[must_use]
    pub fn into_payload(self) -> Bytes {
        match self.content {
            Content::Data(bytes) | Content::Restart(bytes) => bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(DataBlock::data("abc"), 0x00, 3)]
    #[case(DataBlock::data("abc").with_eor(), 0x80, 3)]
    #[case(DataBlock::eof(), 0x40, 0)]
    #[case(DataBlock::data("x").with_eor().with_eof().with_suspect(), 0xE0, 1)]
    #[case(DataBlock::restart("00123"), 0x10, 5)]
    #[case(DataBlock::restart("1").with_eof(), 0x50, 1)]
    fn test_descriptor_byte(#[case] block: DataBlock, #[case] byte: u8, #[case] count: usize) {
        assert_eq!(block.descriptor_byte(), byte);
        assert_eq!(block.byte_count(), count);
    }

    #[test]
    fn test_content_is_exclusive() {
        let data = DataBlock::data("payload");
        assert_eq!(data.data_bytes().map(|b| b.as_ref()), Some(&b"payload"[..]));
        assert!(data.markers().is_none());

        let restart = DataBlock::restart("42");
        assert!(restart.is_restart());
        assert!(restart.data_bytes().is_none());
        assert_eq!(restart.markers().map(|b| b.as_ref()), Some(&b"42"[..]));
    }

    #[test]
    fn test_from_bits_drops_restart_and_reserved() {
        let descriptor = Descriptor::from_bits(0xFF);
        assert_eq!(descriptor.bits(), 0xE0);
        assert!(descriptor.is_terminal());
        assert!(!Descriptor::from_bits(Descriptor::SUSPECT).is_terminal());
        assert_eq!(format!("{:?}", Descriptor::from_bits(0xC0)), r#"{"EOR", "EOF"}"#);
    }
}
