//! Work-size arithmetic and range splitting.
//!
//! Everything here is pure: the scheduler calls into it while planning a
//! job and never afterwards.

use crate::error::{Error, Result};
use std::fmt;
use std::ops::Range;

/// Half-open interval `[start, end)` over the 64-bit work domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkRange {
    pub start: u64,
    pub end: u64,
}

impl WorkRange {
    /// Bounds are taken as given; [`validate`](Self::validate) rejects an
    /// inverted pair.
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Range of `len` items beginning at `start`.
    pub fn with_len(start: u64, len: u64) -> Result<Self> {
        let end = start.checked_add(len).ok_or_else(|| {
            Error::partition(format!("range of {} items at {} overflows u64", len, start))
        })?;
        Ok(Self::new(start, end))
    }

    /// `Error::Config` when `start > end`.
    pub fn validate(&self) -> Result<()> {
        if self.start > self.end {
            return Err(Error::config(format!(
                "inverted work range {}..{}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    /// Item count. An inverted range counts as empty.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, item: u64) -> bool {
        self.start <= item && item < self.end
    }

    /// Shift both bounds by `by`.
    pub fn offset(self, by: u64) -> Result<Self> {
        match (self.start.checked_add(by), self.end.checked_add(by)) {
            (Some(start), Some(end)) => Ok(Self::new(start, end)),
            _ => Err(Error::partition(format!("range {} shifted by {} overflows u64", self, by))),
        }
    }
}

impl From<Range<u64>> for WorkRange {
    fn from(r: Range<u64>) -> Self {
        Self::new(r.start, r.end)
    }
}

impl From<WorkRange> for Range<u64> {
    fn from(r: WorkRange) -> Self {
        r.start..r.end
    }
}

impl fmt::Display for WorkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Round `requested` up to the next multiple of `group_size`.
pub fn compute_global_size(requested: u64, group_size: u64) -> Result<u64> {
    if group_size == 0 {
        return Err(Error::partition("group size must be > 0"));
    }

    let r = requested % group_size;
    if r == 0 {
        return Ok(requested);
    }

    requested
        .checked_add(group_size - r)
        .ok_or_else(|| Error::partition(format!(
            "global size {} rounded to group {} overflows u64",
            requested, group_size
        )))
}

/// Largest value `<= max_group_size` that divides `global_size` evenly.
///
/// Computed once per job: it depends on the total size, not on the size of
/// any one chunk.
pub fn compute_local_size(global_size: u64, max_group_size: u64) -> Result<u64> {
    if global_size == 0 || max_group_size == 0 {
        return Err(Error::partition(format!(
            "local size undefined for global {} / max group {}",
            global_size, max_group_size
        )));
    }

    // no divisor of global_size exceeds it
    let mut candidate = max_group_size.min(global_size);
    while candidate > 0 {
        if global_size % candidate == 0 {
            return Ok(candidate);
        }
        candidate -= 1;
    }

    Err(Error::partition("local size search did not terminate at 1"))
}

/// Split `[0, total)` into `parts` equal ranges plus a trailing remainder.
///
/// The remainder, when present, is always the numerically last range. If
/// `total < parts` the equal share is zero and the whole interval comes
/// back as a single range.
pub fn split_range(total: u64, parts: usize) -> Result<Vec<WorkRange>> {
    if parts == 0 {
        return Err(Error::partition("part count must be > 0"));
    }

    let parts = parts as u64;
    let delta = total / parts;
    let mut ranges = Vec::with_capacity(parts as usize + 1);

    if delta > 0 {
        for i in 0..parts {
            ranges.push(WorkRange::new(i * delta, (i + 1) * delta));
        }
    }

    let covered = parts * delta;
    if covered != total {
        ranges.push(WorkRange::new(covered, total));
    }

    Ok(ranges)
}

/// Split `[0, total)` into exactly `parts` shares with the remainder folded
/// into the last one. Shares may be empty when `total < parts`.
pub fn split_static(total: u64, parts: usize) -> Result<Vec<WorkRange>> {
    if parts == 0 {
        return Err(Error::partition("part count must be > 0"));
    }

    let n = parts as u64;
    let base = total / n;
    let remainder = total % n;

    (0..n)
        .map(|i| {
            let len = if i == n - 1 { base + remainder } else { base };
            WorkRange::with_len(base * i, len)
        })
        .collect()
}
