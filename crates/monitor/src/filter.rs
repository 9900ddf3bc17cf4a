use crate::error::{ErrorKind, Result};
use regex::Regex;
use std::fmt::Debug;
use std::fs::Metadata;
use std::path::Path;

/// Matches paths ending in `.xml`.
pub const REGEX_XML_EXTENSION: &str = r".*\.xml$";

/// Decides which directory entries the monitor tracks.
pub trait FileFilter: Debug + Send + Sync {
    fn accept(&self, path: &Path, metadata: &Metadata) -> bool;
}

/// Accept every regular file.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegularFiles;

impl FileFilter for RegularFiles {
    fn accept(&self, _path: &Path, metadata: &Metadata) -> bool {
        metadata.is_file()
    }
}

/// Accept regular files of at least `min_size` bytes whose full path
/// matches a regular expression. The expression must match the whole path,
/// not just part of it.
#[derive(Debug, Clone)]
pub struct RegexFileFilter {
    regex: Option<Regex>,
    min_size: u64,
}

impl RegexFileFilter {
    pub fn new(pattern: Option<&str>, min_size: u64) -> Result<Self> {
        let regex = pattern
            .map(|pattern| Regex::new(&format!("^(?:{pattern})$")))
            .transpose()
            .map_err(|err| ErrorKind::InvalidFilter(err.to_string()))?;
        Ok(Self { regex, min_size })
    }

    /// Only a size threshold, any name.
    pub fn min_size(min_size: u64) -> Self {
        Self { regex: None, min_size }
    }

    pub fn matches_name(&self, path: &Path) -> bool {
        self.regex.as_ref().is_none_or(|regex| regex.is_match(&path.to_string_lossy()))
    }
}

impl FileFilter for RegexFileFilter {
    fn accept(&self, path: &Path, metadata: &Metadata) -> bool {
        metadata.is_file() && metadata.len() >= self.min_size && self.matches_name(path)
    }
}
