//! Thread Scheduling Classes
//!
//! Lanes run elevated while they have work and drop to idle once drained.
//! This is a latency optimization only: where the platform offers no
//! per-thread control every call reports failure and lanes carry on at the
//! default priority.

/// OS scheduling class of a lane thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SchedulingClass {
    /// Drained, waiting for work
    Idle = 0,
    /// Background work pending
    Normal = 1,
    /// Latency-critical work pending
    Critical = 2,
}

impl SchedulingClass {
    /// Get class name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Normal => "normal",
            Self::Critical => "critical",
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            2 => Self::Critical,
            _ => Self::Normal,
        }
    }

    /// Nice value used on Linux
    #[cfg(target_os = "linux")]
    fn nice(self) -> libc::c_int {
        match self {
            Self::Idle => 10,
            Self::Normal => 0,
            Self::Critical => -10,
        }
    }
}

/// Kernel id of the calling thread, 0 where unsupported
#[cfg(target_os = "linux")]
pub fn current_os_tid() -> i32 {
    // SAFETY: gettid has no preconditions.
    unsafe { libc::syscall(libc::SYS_gettid) as i32 }
}

/// Kernel id of the calling thread, 0 where unsupported
#[cfg(not(target_os = "linux"))]
pub fn current_os_tid() -> i32 {
    0
}

/// Move thread `tid` to `class`. Returns whether the OS accepted it.
#[cfg(target_os = "linux")]
pub fn set_scheduling_class(tid: i32, class: SchedulingClass) -> bool {
    if tid <= 0 {
        return false;
    }
    // SAFETY: setpriority only reads its arguments; an unknown tid fails
    // with ESRCH.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid as libc::id_t, class.nice()) };
    rc == 0
}

/// Move thread `tid` to `class`. Returns whether the OS accepted it.
#[cfg(not(target_os = "linux"))]
pub fn set_scheduling_class(_tid: i32, _class: SchedulingClass) -> bool {
    false
}

/// Check that `tid` can be moved freely between all classes
///
/// An unprivileged Linux thread may lower its priority but not raise it
/// back, so a lane only demotes itself if it can reach `Critical`. Leaves
/// the thread at `Normal` on success.
pub fn probe(tid: i32) -> bool {
    set_scheduling_class(tid, SchedulingClass::Critical)
        && set_scheduling_class(tid, SchedulingClass::Normal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_ordering() {
        assert!(SchedulingClass::Critical > SchedulingClass::Normal);
        assert!(SchedulingClass::Normal > SchedulingClass::Idle);
    }

    #[test]
    fn test_class_round_trips_through_u8() {
        for class in [
            SchedulingClass::Idle,
            SchedulingClass::Normal,
            SchedulingClass::Critical,
        ] {
            assert_eq!(SchedulingClass::from_u8(class as u8), class);
        }
        assert_eq!(SchedulingClass::Critical.name(), "critical");
    }

    #[test]
    fn test_invalid_tid_rejected() {
        assert!(!set_scheduling_class(0, SchedulingClass::Normal));
        assert!(!set_scheduling_class(-1, SchedulingClass::Idle));
    }

    #[test]
    fn test_current_tid_matches_platform() {
        let tid = current_os_tid();
        if cfg!(target_os = "linux") {
            assert!(tid > 0);
        } else {
            assert_eq!(tid, 0);
        }
    }
}
