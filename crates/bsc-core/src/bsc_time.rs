use core::fmt;

/// Monotonic BSC time in milliseconds, advanced by the message router on each tick.
/// Used for all supervision timers; state machines store deadlines and compare
/// them against the current time in their tick handlers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct BscTime {
    pub ms: u64,
}

impl BscTime {
    pub fn from_ms(ms: u64) -> Self {
        Self { ms }
    }

    /// Add a number of milliseconds to a BscTime
    pub fn add_ms(self, ms: u64) -> Self {
        Self { ms: self.ms.saturating_add(ms) }
    }

    /// Milliseconds elapsed since `earlier`, zero if `earlier` lies in the future
    pub fn age(self, earlier: BscTime) -> u64 {
        self.ms.saturating_sub(earlier.ms)
    }

    /// True when the deadline has been reached
    pub fn reached(self, deadline: BscTime) -> bool {
        self.ms >= deadline.ms
    }
}

impl fmt::Display for BscTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:03}", self.ms / 1000, self.ms % 1000)
    }
}

impl fmt::Debug for BscTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadlines() {
        let t = BscTime::from_ms(1500);
        let deadline = t.add_ms(500);
        assert!(!t.reached(deadline));
        assert!(deadline.reached(deadline));
        assert_eq!(deadline.age(t), 500);
        assert_eq!(t.age(deadline), 0);
        assert_eq!(format!("{}", deadline), "2.000");
    }
}
