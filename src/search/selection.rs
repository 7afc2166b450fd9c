//! Parser for interactive range selections such as `1,3,5-7`.

use std::collections::BTreeSet;

use thiserror::Error;

/// Errors from [`parse_selection`]. Any bad token rejects the whole input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("selection is empty")]
    Empty,

    #[error("'{token}' is not a number or a range like 5-7")]
    InvalidToken { token: String },

    #[error("'{token}': selections are 1-indexed, 0 is not a valid position")]
    ZeroIndex { token: String },

    #[error("'{token}': range start is greater than its end")]
    DescendingRange { token: String },

    #[error("{index} is out of range: only {max} results are shown")]
    OutOfRange { index: usize, max: usize },
}

/// Parses a comma-separated list of 1-indexed positions and inclusive ranges.
///
/// Returns the selected positions in ascending order without duplicates.
///
/// # Errors
///
/// Returns a [`SelectionError`] naming the first offending token.
///
/// # Examples
///
/// ```
/// use myrient_core::search::parse_selection;
///
/// assert_eq!(parse_selection("1,3,5-7", 10).unwrap(), vec![1, 3, 5, 6, 7]);
/// assert!(parse_selection("0", 10).is_err());
/// assert!(parse_selection("3-1", 10).is_err());
/// ```
pub fn parse_selection(input: &str, max: usize) -> Result<Vec<usize>, SelectionError> {
    if input.trim().is_empty() {
        return Err(SelectionError::Empty);
    }

    let mut selected = BTreeSet::new();
    for raw in input.split(',') {
        let token = raw.trim();
        if token.is_empty() {
            return Err(SelectionError::InvalidToken {
                token: raw.to_string(),
            });
        }

        let (start, end) = match token.split_once('-') {
            Some((start, end)) => (parse_position(start, token)?, parse_position(end, token)?),
            None => {
                let position = parse_position(token, token)?;
                (position, position)
            }
        };
        if start > end {
            return Err(SelectionError::DescendingRange {
                token: token.to_string(),
            });
        }
        if end > max {
            return Err(SelectionError::OutOfRange { index: end, max });
        }
        selected.extend(start..=end);
    }

    Ok(selected.into_iter().collect())
}

fn parse_position(text: &str, token: &str) -> Result<usize, SelectionError> {
    let text = text.trim();
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
        return Err(SelectionError::InvalidToken {
            token: token.to_string(),
        });
    }
    let position: usize = text.parse().map_err(|_| SelectionError::InvalidToken {
        token: token.to_string(),
    })?;
    if position == 0 {
        return Err(SelectionError::ZeroIndex {
            token: token.to_string(),
        });
    }
    Ok(position)
}
