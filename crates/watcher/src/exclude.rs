//! Exclude filter for watched trees
//!
//! An ordered list of regular expressions matched against absolute path
//! strings. Matching paths are skipped at watch registration (no watch,
//! no events ever) and dropped per event as a second line of defense for
//! files inside otherwise-watched directories.

use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::Path;

/// Ordered exclude patterns
#[derive(Debug, Clone, Default)]
pub struct ExcludeFilter {
    patterns: Vec<Regex>,
}

impl ExcludeFilter {
    /// Filter that excludes nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile an ordered list of patterns
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                Regex::new(p).with_context(|| format!("invalid exclude pattern '{p}'"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Load patterns from a file, one per line
    ///
    /// Blank lines and lines starting with `#` are skipped.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read exclude file '{}'", path.display()))?;

        Self::new(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
        .with_context(|| format!("exclude file '{}'", path.display()))
    }

    /// True if no pattern is configured
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// True if any pattern matches the path
    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let path_str = path.to_string_lossy();
        self.patterns.iter().any(|p| p.is_match(&path_str))
    }
}
