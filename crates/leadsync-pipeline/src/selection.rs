use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::error::PipelineError;

/// An operator-selected, contiguous block of sheet rows (1-based, inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSelection {
    pub start: usize,
    pub end: usize,
}

impl RowSelection {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    /// Every data row of the sheet.
    pub fn all() -> Self {
        Self::new(2, usize::MAX)
    }

    /// The data rows covered, given the sheet's last populated row.
    ///
    /// A selection that includes the header drops it; a selection of only the header
    /// is refused.
    pub fn data_rows(&self, last_row: usize) -> Result<RangeInclusive<usize>, PipelineError> {
        let mut start = self.start.max(1);
        if start == 1 {
            if self.end <= 1 {
                return Err(PipelineError::HeaderOnlySelection);
            }
            start = 2;
        }
        let end = self.end.min(last_row);
        if start > end {
            return Err(PipelineError::EmptySelection(self.to_string()));
        }
        Ok(start..=end)
    }
}

impl fmt::Display for RowSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.end == usize::MAX {
            write!(f, "{}:", self.start)
        } else if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

impl FromStr for RowSelection {
    type Err = PipelineError;

    /// Accepts `N`, `START:END`, or `START:` for "to the last row".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PipelineError::InvalidSelection(s.to_string());
        let parse = |part: &str| -> Result<usize, PipelineError> {
            part.trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(invalid)
        };
        match s.split_once(':') {
            None => {
                let row = parse(s)?;
                Ok(Self::new(row, row))
            }
            Some((start, end)) if end.trim().is_empty() => Ok(Self::new(parse(start)?, usize::MAX)),
            Some((start, end)) => Ok(Self::new(parse(start)?, parse(end)?)),
        }
    }
}
