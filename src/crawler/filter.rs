//! Include/exclude filename patterns and the size cap applied while crawling.

use glob::{MatchOptions, Pattern, PatternError};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Decides whether a listed file is cataloged.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    max_size: Option<u64>,
}

/// Why a file was passed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotIncluded,
    Excluded,
    TooLarge,
}

impl FileFilter {
    /// Compiles the patterns. An empty include list admits every name.
    ///
    /// # Errors
    ///
    /// Returns the glob error for the first malformed pattern.
    pub fn new(
        include: &[String],
        exclude: &[String],
        max_size: Option<u64>,
    ) -> Result<Self, PatternError> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
            max_size,
        })
    }

    /// Checks a decoded filename and its listed size, when known.
    ///
    /// # Errors
    ///
    /// Returns the first [`Rejection`] that applies.
    pub fn check(&self, name: &str, size: Option<u64>) -> Result<(), Rejection> {
        if !self.include.is_empty()
            && !self
                .include
                .iter()
                .any(|p| p.matches_with(name, MATCH_OPTIONS))
        {
            return Err(Rejection::NotIncluded);
        }
        if self
            .exclude
            .iter()
            .any(|p| p.matches_with(name, MATCH_OPTIONS))
        {
            return Err(Rejection::Excluded);
        }
        if let (Some(max), Some(size)) = (self.max_size, size)
            && size > max
        {
            return Err(Rejection::TooLarge);
        }
        Ok(())
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>, PatternError> {
    patterns.iter().map(|p| Pattern::new(p)).collect()
}
