use std::fmt;
use std::ops::BitOr;

use mio::Interest;
use mio::event::Event;

/// The readiness conditions reported for one socket by one selector wakeup.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness(u8);

impl Readiness {
    pub const EMPTY: Self = Self(0);
    pub const READABLE: Self = Self(0b0001);
    pub const WRITABLE: Self = Self(0b0010);
    pub const ERROR: Self = Self(0b0100);
    pub const HANG_UP: Self = Self(0b1000);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn is_readable(self) -> bool {
        self.contains(Self::READABLE)
    }

    #[inline]
    pub fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    /// True for error and hang-up conditions.
    #[inline]
    pub fn is_exceptional(self) -> bool {
        self.0 & (Self::ERROR.0 | Self::HANG_UP.0) != 0
    }
}

impl BitOr for Readiness {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl From<&Event> for Readiness {
    fn from(event: &Event) -> Self {
        let mut readiness = Self::EMPTY;
        if event.is_readable() || event.is_read_closed() {
            readiness = readiness | Self::READABLE;
        }
        if event.is_writable() {
            readiness = readiness | Self::WRITABLE;
        }
        if event.is_error() {
            readiness = readiness | Self::ERROR;
        }
        if event.is_read_closed() && event.is_write_closed() {
            readiness = readiness | Self::HANG_UP;
        }
        readiness
    }
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [(Self::READABLE, "READABLE"), (Self::WRITABLE, "WRITABLE"), (Self::ERROR, "ERROR"), (Self::HANG_UP, "HANG_UP")];
        let mut set = f.debug_set();
        for (flag, name) in names {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

/// Maps a pair of wanted conditions to a selector interest. `None` means "wait for nothing".
pub fn interest_of(readable: bool, writable: bool) -> Option<Interest> {
    match (readable, writable) {
        (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
        (true, false) => Some(Interest::READABLE),
        (false, true) => Some(Interest::WRITABLE),
        (false, false) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combines_and_queries_flags() {
        let readiness = Readiness::READABLE | Readiness::HANG_UP;
        assert!(readiness.is_readable());
        assert!(!readiness.is_writable());
        assert!(readiness.is_exceptional());
        assert!(!Readiness::WRITABLE.is_exceptional());
        assert_eq!(format!("{readiness:?}"), "{READABLE, HANG_UP}");
    }

    #[test]
    fn interest_follows_wanted_conditions() {
        assert_eq!(interest_of(false, false), None);
        assert_eq!(interest_of(true, false), Some(Interest::READABLE));
        assert_eq!(interest_of(true, true), Some(Interest::READABLE | Interest::WRITABLE));
    }
}
