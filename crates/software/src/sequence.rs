//! Wrap-safe sequence numbers used to detect "something newer is available" without queuing.

/// A monotonically advancing 32-bit sequence number.
///
/// Ordering uses serial-number arithmetic: `a` is newer than `b` when the wrapping distance from `b` to `a` is
/// positive as a signed 32-bit integer. This stays correct across the wrap from `u32::MAX` to `0`, provided two
/// compared values are never more than 2^31 steps apart.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sequence(pub u32);

impl Sequence {
    /// Returns the following sequence number, wrapping at `u32::MAX`.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Returns `true` if `self` was issued after `other`.
    pub fn is_newer_than(self, other: Self) -> bool {
        (self.0.wrapping_sub(other.0) as i32) > 0
    }

    /// Returns `true` if `self` is `target` or was issued after it.
    pub fn reached(self, target: Self) -> bool {
        self == target || self.is_newer_than(target)
    }
}

impl From<u32> for Sequence {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Sequence> for u32 {
    fn from(value: Sequence) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_wraps() {
        assert_eq!(Sequence(0), Sequence(u32::MAX).next());
        assert_eq!(Sequence(8), Sequence(7).next());
    }

    #[test]
    fn newer_within_range() {
        assert!(Sequence(5).is_newer_than(Sequence(4)));
        assert!(!Sequence(4).is_newer_than(Sequence(5)));
        assert!(!Sequence(4).is_newer_than(Sequence(4)));
    }

    #[test]
    fn newer_across_wrap() {
        let before_wrap = Sequence(u32::MAX - 1);
        let after_wrap = before_wrap.next().next().next();
        assert_eq!(Sequence(1), after_wrap);
        assert!(
            after_wrap.is_newer_than(before_wrap),
            "Sequence issued after the wrap should still be newer"
        );
        assert!(!before_wrap.is_newer_than(after_wrap));
    }

    #[test]
    fn reached() {
        assert!(Sequence(3).reached(Sequence(3)));
        assert!(Sequence(4).reached(Sequence(3)));
        assert!(!Sequence(2).reached(Sequence(3)));
        assert!(Sequence(0).reached(Sequence(u32::MAX)));
    }
}
