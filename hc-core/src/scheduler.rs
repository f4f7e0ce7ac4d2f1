//! Weekday/hour/minute schedule lookup.
//!
//! Entries are kept as an owning, sorted `Vec` indexed by [`ScheduleId`]
//! rather than a circular linked list, with lookup done by binary search
//! instead of list traversal.

use hc_proto::Runmode;

use crate::ids::ScheduleId;

/// A point in the weekly cycle: weekday 0 (Monday) through 6 (Sunday),
/// hour 0..23, minute 0..59.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WallTime {
    pub weekday: u8,
    pub hour: u8,
    pub minute: u8,
}

impl WallTime {
    pub fn new(weekday: u8, hour: u8, minute: u8) -> Self {
        WallTime { weekday: weekday % 7, hour: hour % 24, minute: minute % 60 }
    }

    /// Minutes since the start of the week (Monday 00:00), used as the
    /// sort/lookup key.
    fn minutes_since_week_start(self) -> u32 {
        self.weekday as u32 * 24 * 60 + self.hour as u32 * 60 + self.minute as u32
    }
}

/// One schedule entry: a point in the week plus the mode transition that
/// takes effect at that point, held until the next entry.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleEntry {
    pub at: WallTime,
    pub runmode: Runmode,
    pub dhwmode: Runmode,
    pub legionella: bool,
    pub recycle: bool,
}

/// A named weekly schedule: entries sorted by time-of-week, looked up by
/// "most recent entry at or before now", wrapping around the week
/// boundary.
pub struct Schedule {
    pub name: String,
    entries: Vec<ScheduleEntry>,
}

impl Schedule {
    pub fn new(name: impl Into<String>) -> Self {
        Schedule { name: name.into(), entries: Vec::new() }
    }

    pub fn with_entries(mut self, mut entries: Vec<ScheduleEntry>) -> Self {
        entries.sort_by_key(|e| e.at.minutes_since_week_start());
        self.entries = entries;
        self
    }

    pub fn add_entry(&mut self, entry: ScheduleEntry) {
        let key = entry.at.minutes_since_week_start();
        let pos = self.entries.partition_point(|e| e.at.minutes_since_week_start() <= key);
        self.entries.insert(pos, entry);
    }

    /// Most recent entry at or before `now`, wrapping to the last entry
    /// of the week if `now` precedes every entry (the week is circular).
    pub fn lookup(&self, now: WallTime) -> Option<&ScheduleEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let key = now.minutes_since_week_start();
        let pos = self.entries.partition_point(|e| e.at.minutes_since_week_start() <= key);
        if pos == 0 {
            self.entries.last()
        } else {
            self.entries.get(pos - 1)
        }
    }
}

#[derive(Default)]
pub struct ScheduleRegistry {
    schedules: Vec<Schedule>,
}

impl ScheduleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, schedule: Schedule) -> ScheduleId {
        self.schedules.push(schedule);
        ScheduleId::from_index(self.schedules.len() - 1)
    }

    pub fn get(&self, id: ScheduleId) -> &Schedule {
        &self.schedules[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(weekday: u8, hour: u8, minute: u8, mode: Runmode) -> ScheduleEntry {
        ScheduleEntry { at: WallTime::new(weekday, hour, minute), runmode: mode, dhwmode: mode, legionella: false, recycle: false }
    }

    #[test]
    fn lookup_returns_most_recent_entry_at_or_before_now() {
        let schedule = Schedule::new("weekdays").with_entries(vec![
            entry(0, 6, 0, Runmode::Comfort),
            entry(0, 22, 0, Runmode::Eco),
            entry(5, 8, 0, Runmode::Frostfree),
        ]);
        let hit = schedule.lookup(WallTime::new(0, 12, 0)).unwrap();
        assert_eq!(hit.runmode, Runmode::Comfort);
    }

    #[test]
    fn lookup_wraps_to_last_entry_before_the_first() {
        let schedule = Schedule::new("weekdays").with_entries(vec![entry(1, 6, 0, Runmode::Comfort), entry(3, 22, 0, Runmode::Eco)]);
        // Monday 00:00 precedes both entries in the week; must wrap to
        // Wednesday 22:00's entry from the *previous* cycle.
        let hit = schedule.lookup(WallTime::new(0, 0, 0)).unwrap();
        assert!(matches!(hit.runmode, Runmode::Eco));
    }

    #[test]
    fn exact_match_is_inclusive() {
        let schedule = Schedule::new("s").with_entries(vec![entry(2, 6, 0, Runmode::Comfort)]);
        let hit = schedule.lookup(WallTime::new(2, 6, 0)).unwrap();
        assert!(matches!(hit.runmode, Runmode::Comfort));
    }
}
