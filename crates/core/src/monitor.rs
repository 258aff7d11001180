//! Monitor layout snapshots.

use crate::window_system::WindowSystem;
use crate::{PlatformError, Rect};
use serde::{Deserialize, Serialize};

/// Ordered monitor rectangles as returned by enumeration.
///
/// Equality is order-sensitive: the same rects in a different order are a
/// different layout. No sorting or normalization is applied.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MonitorSetting {
    monitors: Vec<Rect>,
}

impl MonitorSetting {
    pub fn new(monitors: Vec<Rect>) -> Self {
        Self { monitors }
    }

    /// Enumerate the current monitor layout.
    pub fn capture<W: WindowSystem + ?Sized>(ws: &W) -> Result<Self, PlatformError> {
        let monitors = ws.enumerate_monitors().map_err(|e| match e {
            PlatformError::EnumerationFailed(_) => e,
            other => PlatformError::EnumerationFailed(other.to_string()),
        })?;
        Ok(Self::new(monitors))
    }

    /// Same count and pairwise-equal rects in enumeration order.
    pub fn matches(&self, other: &MonitorSetting) -> bool {
        self.monitors.len() == other.monitors.len()
            && self
                .monitors
                .iter()
                .zip(&other.monitors)
                .all(|(a, b)| a == b)
    }

    pub fn monitors(&self) -> &[Rect] {
        &self.monitors
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }
}

impl std::fmt::Display for MonitorSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} monitor(s)", self.monitors.len())?;
        for rect in &self.monitors {
            write!(f, " [{}]", rect)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window_system::mock::{dual_monitors, single_monitor, MockWindowSystem};

    #[test]
    fn test_capture_returns_enumeration_order() {
        let ws = MockWindowSystem::new().with_monitors(dual_monitors());
        let setting = MonitorSetting::capture(&ws).unwrap();
        assert_eq!(setting.monitors(), dual_monitors().as_slice());
    }

    #[test]
    fn test_capture_zero_monitors_is_not_an_error() {
        let ws = MockWindowSystem::new();
        let setting = MonitorSetting::capture(&ws).unwrap();
        assert!(setting.is_empty());
    }

    #[test]
    fn test_capture_failure() {
        let ws = MockWindowSystem::new().with_monitors(dual_monitors());
        ws.set_monitor_enumeration_fails(true);
        let err = MonitorSetting::capture(&ws).unwrap_err();
        assert!(matches!(err, PlatformError::EnumerationFailed(_)));
    }

    #[test]
    fn test_equal_layouts_match() {
        let a = MonitorSetting::new(dual_monitors());
        let b = MonitorSetting::new(dual_monitors());
        assert!(a.matches(&b));
        assert_eq!(a, b);
    }

    #[test]
    fn test_swapped_monitors_do_not_match() {
        let mut swapped = dual_monitors();
        swapped.reverse();
        let a = MonitorSetting::new(dual_monitors());
        let b = MonitorSetting::new(swapped);
        assert!(!a.matches(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_different_count_does_not_match() {
        let a = MonitorSetting::new(dual_monitors());
        let b = MonitorSetting::new(single_monitor());
        assert!(!a.matches(&b));
        assert!(!b.matches(&a));
    }

    #[test]
    fn test_moved_monitor_does_not_match() {
        let a = MonitorSetting::new(dual_monitors());
        let b = MonitorSetting::new(vec![
            Rect::new(0, 0, 1920, 1080),
            Rect::new(-1920, 0, 0, 1080),
        ]);
        assert!(!a.matches(&b));
    }

    #[test]
    fn test_display_lists_rects() {
        let setting = MonitorSetting::new(single_monitor());
        assert_eq!(
            setting.to_string(),
            "1 monitor(s) [left 0, top 0, right 1920, bottom 1080]"
        );
    }
}
