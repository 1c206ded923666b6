//! Per-job search parameters passed to every chunk.

use super::args::KernelArg;
use crate::error::{Error, Result};

/// Which key halves advance with the completed count.
///
/// Bit 0 varies the lower bound, bit 1 the upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IncrementMode(u8);

impl IncrementMode {
    pub const NONE: Self = Self(0);
    pub const LOWER: Self = Self(1);
    pub const UPPER: Self = Self(2);
    pub const BOTH: Self = Self(3);

    pub fn from_bits(bits: u8) -> Result<Self> {
        if bits > Self::BOTH.0 {
            return Err(Error::config(format!(
                "increment mode {} out of range (0..=3)",
                bits
            )));
        }
        Ok(Self(bits))
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn varies_lower(self) -> bool {
        self.0 & Self::LOWER.0 != 0
    }

    pub const fn varies_upper(self) -> bool {
        self.0 & Self::UPPER.0 != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchParams {
    pub lower: u64,
    pub upper: u64,
    pub mode: IncrementMode,
    pub completed: u64,
}

impl SearchParams {
    pub fn new(lower: u64, upper: u64, mode: IncrementMode) -> Self {
        Self {
            lower,
            upper,
            mode,
            completed: 0,
        }
    }

    /// Arguments in kernel order: lower, upper, mode, completed.
    pub fn to_args(&self) -> Vec<KernelArg> {
        vec![
            KernelArg::U64(self.lower),
            KernelArg::U64(self.upper),
            KernelArg::U8(self.mode.bits()),
            KernelArg::U64(self.completed),
        ]
    }

    /// Key bounds the kernel starts from after `completed` items.
    ///
    /// Offsets wrap around the 64-bit domain.
    pub fn current_offsets(&self) -> (u64, u64) {
        let lower = if self.mode.varies_lower() {
            self.lower.wrapping_add(self.completed)
        } else {
            self.lower
        };
        let upper = if self.mode.varies_upper() {
            self.upper.wrapping_add(self.completed)
        } else {
            self.upper
        };
        (lower, upper)
    }

    pub fn advance(&mut self, items: u64) {
        self.completed = self.completed.wrapping_add(items);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_mode_bits() {
        assert!(IncrementMode::from_bits(3).unwrap().varies_lower());
        assert!(IncrementMode::from_bits(3).unwrap().varies_upper());
        assert!(!IncrementMode::UPPER.varies_lower());
        assert!(IncrementMode::from_bits(4).unwrap_err().is_config());
    }

    #[test]
    fn test_args_order() {
        let mut p = SearchParams::new(10, 20, IncrementMode::LOWER);
        p.advance(5);
        assert_eq!(
            p.to_args(),
            vec![
                KernelArg::U64(10),
                KernelArg::U64(20),
                KernelArg::U8(1),
                KernelArg::U64(5),
            ]
        );
    }

    #[test]
    fn test_current_offsets() {
        let mut p = SearchParams::new(u64::MAX, 7, IncrementMode::BOTH);
        p.advance(2);
        assert_eq!(p.current_offsets(), (1, 9));

        let p = SearchParams {
            completed: 100,
            ..SearchParams::new(1, 2, IncrementMode::NONE)
        };
        assert_eq!(p.current_offsets(), (1, 2));
    }
}
