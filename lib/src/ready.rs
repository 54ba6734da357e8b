use std::{fmt, ops};

use mio::{event::Event, Interest};

/// A set of readiness flags, used both for the interest a socket is
/// registered with and for the events the reactor reports.
#[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord, Hash)]
pub struct Ready(pub u16);

const READABLE: u16 = 0b00001;
const WRITABLE: u16 = 0b00010;
const ERROR: u16 = 0b00100;
const HUP: u16 = 0b01000;

impl Ready {
    pub const EMPTY: Ready = Ready(0);
    pub const READABLE: Ready = Ready(READABLE);
    pub const WRITABLE: Ready = Ready(WRITABLE);
    pub const ERROR: Ready = Ready(ERROR);
    pub const HUP: Ready = Ready(HUP);

    #[inline]
    pub fn is_empty(&self) -> bool {
        *self == Ready::EMPTY
    }

    #[inline]
    pub fn is_readable(&self) -> bool {
        self.contains(Ready::READABLE)
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.contains(Ready::WRITABLE)
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.contains(Ready::ERROR)
    }

    #[inline]
    pub fn is_hup(&self) -> bool {
        self.contains(Ready::HUP)
    }

    #[inline]
    pub fn insert<T: Into<Self>>(&mut self, other: T) {
        let other = other.into();
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove<T: Into<Self>>(&mut self, other: T) {
        let other = other.into();
        self.0 &= !other.0;
    }

    #[inline]
    pub fn contains<T: Into<Self>>(&self, other: T) -> bool {
        let other = other.into();
        (*self & other) == other
    }

    /// The mio interest matching the readable and writable flags.
    /// Errors and hang-ups are always reported, so they carry no interest.
    pub fn to_interest(self) -> Option<Interest> {
        match (self.is_readable(), self.is_writable()) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

impl From<&Event> for Ready {
    fn from(event: &Event) -> Self {
        let mut ready = Ready::EMPTY;
        if event.is_readable() {
            ready.insert(Ready::READABLE);
        }
        if event.is_writable() {
            ready.insert(Ready::WRITABLE);
        }
        if event.is_error() {
            ready.insert(Ready::ERROR);
        }
        if event.is_read_closed() || event.is_write_closed() {
            ready.insert(Ready::HUP);
        }
        ready
    }
}

impl<T: Into<Ready>> ops::BitOr<T> for Ready {
    type Output = Ready;

    #[inline]
    fn bitor(self, other: T) -> Ready {
        Ready(self.0 | other.into().0)
    }
}

impl<T: Into<Ready>> ops::BitOrAssign<T> for Ready {
    #[inline]
    fn bitor_assign(&mut self, other: T) {
        self.0 |= other.into().0;
    }
}

impl<T: Into<Ready>> ops::BitAnd<T> for Ready {
    type Output = Ready;

    #[inline]
    fn bitand(self, other: T) -> Ready {
        Ready(self.0 & other.into().0)
    }
}

impl fmt::Debug for Ready {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let mut one = false;
        let flags = [
            (Ready::READABLE, "Readable"),
            (Ready::WRITABLE, "Writable"),
            (Ready::ERROR, "Error"),
            (Ready::HUP, "Hup"),
        ];

        for (flag, msg) in &flags {
            if self.contains(*flag) {
                if one {
                    write!(fmt, " | ")?
                }
                write!(fmt, "{msg}")?;

                one = true
            }
        }

        if !one {
            fmt.write_str("(empty)")?;
        }

        Ok(())
    }
}

impl fmt::Display for Ready {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            if self.is_readable() { "R" } else { "-" },
            if self.is_writable() { "W" } else { "-" },
            if self.is_error() { "E" } else { "-" },
            if self.is_hup() { "H" } else { "-" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_remove_contains() {
        let mut ready = Ready::READABLE;
        ready.insert(Ready::WRITABLE);
        assert!(ready.is_readable() && ready.is_writable());
        assert!(!ready.is_hup());

        ready.remove(Ready::READABLE);
        assert_eq!(ready, Ready::WRITABLE);
        assert_eq!(format!("{ready:?}"), "Writable");
        assert_eq!(format!("{:?}", Ready::EMPTY), "(empty)");
        assert_eq!((Ready::READABLE | Ready::HUP).to_string(), "R--H");
    }

    #[test]
    fn interest_conversion() {
        assert_eq!(Ready::READABLE.to_interest(), Some(Interest::READABLE));
        assert_eq!(
            (Ready::READABLE | Ready::WRITABLE).to_interest(),
            Some(Interest::READABLE | Interest::WRITABLE)
        );
        assert_eq!((Ready::HUP | Ready::ERROR).to_interest(), None);
    }
}
