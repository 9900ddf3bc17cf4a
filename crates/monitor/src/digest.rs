use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const READ_BUFFER: usize = 64 * 1024;

/// Content digest used to confirm that a file has stopped changing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgo {
    #[default]
    #[display("blake3")]
    Blake3,
    #[display("crc32")]
    Crc32,
}

impl FromStr for DigestAlgo {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "blake3" | "b3" => Ok(DigestAlgo::Blake3),
            "crc32" | "crc" => Ok(DigestAlgo::Crc32),
            other => Err(format!("unknown digest algorithm: {other}")),
        }
    }
}

enum Hasher {
    Blake3(Box<blake3::Hasher>),
    Crc32(crc32fast::Hasher),
}

impl Hasher {
    fn update(&mut self, bytes: &[u8]) {
        match self {
            Hasher::Blake3(hasher) => {
                hasher.update(bytes);
            },
            Hasher::Crc32(hasher) => hasher.update(bytes),
        }
    }

    fn finalize(self) -> String {
        match self {
            Hasher::Blake3(hasher) => hasher.finalize().to_hex().to_string(),
            Hasher::Crc32(hasher) => format!("{:08x}", hasher.finalize()),
        }
    }
}

impl DigestAlgo {
    fn hasher(self) -> Hasher {
        match self {
            DigestAlgo::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
            DigestAlgo::Crc32 => Hasher::Crc32(crc32fast::Hasher::new()),
        }
    }

    /// Hex digest of in-memory bytes.
    #[must_use]
    pub fn hash_bytes(self, bytes: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(bytes);
        hasher.finalize()
    }

    /// Hex digest of a file, read in chunks on the current thread.
    pub fn hash_file_blocking(self, path: &Path) -> Result<String> {
        let mut file = std::fs::File::open(path).or_raise(|| ErrorKind::Io)?;
        let mut hasher = self.hasher();
        let mut buffer = vec![0u8; READ_BUFFER];
        loop {
            let read = file.read(&mut buffer).or_raise(|| ErrorKind::Io)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hasher.finalize())
    }

    /// Hex digest of a file, computed on the blocking thread pool.
    pub async fn hash_file(self, path: impl Into<PathBuf>) -> Result<String> {
        let path = path.into();
        tokio::task::spawn_blocking(move || self.hash_file_blocking(&path))
            .await
            .or_raise(|| ErrorKind::Digest)?
            .or_raise(|| ErrorKind::Digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(DigestAlgo::Crc32, b"123456789", "cbf43926")]
    #[case(DigestAlgo::Crc32, b"", "00000000")]
    #[case(DigestAlgo::Blake3, b"", "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262")]
    fn test_hash_bytes(#[case] algo: DigestAlgo, #[case] input: &[u8], #[case] expected: &str) {
        assert_eq!(algo.hash_bytes(input), expected);
    }

    #[rstest]
    #[case("blake3", DigestAlgo::Blake3)]
    #[case("CRC32", DigestAlgo::Crc32)]
    fn test_from_str(#[case] input: &str, #[case] expected: DigestAlgo) {
        assert_eq!(input.parse::<DigestAlgo>().unwrap(), expected);
        assert!("md5".parse::<DigestAlgo>().is_err());
    }

    #[tokio::test]
    async fn test_hash_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        for algo in [DigestAlgo::Blake3, DigestAlgo::Crc32] {
            assert_eq!(algo.hash_file(&path).await.unwrap(), algo.hash_bytes(&data));
        }
        let err = DigestAlgo::Blake3.hash_file(dir.path().join("missing")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Digest);
    }
}
