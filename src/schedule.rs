use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// A calendar day without a year, written `"MM-DD"` in schedule files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonthDay {
    pub month: u32,
    pub day: u32,
}

impl MonthDay {
    pub const fn new(month: u32, day: u32) -> Self {
        Self { month, day }
    }

    fn of(date: NaiveDate) -> Self {
        Self::new(date.month(), date.day())
    }
}

impl fmt::Display for MonthDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

impl FromStr for MonthDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("invalid month-day {s:?}, expected MM-DD");
        let (month, day) = s.split_once('-').ok_or_else(invalid)?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        let day: u32 = day.parse().map_err(|_| invalid())?;
        // 2000 is a leap year, so 02-29 is accepted.
        NaiveDate::from_ymd_opt(2000, month, day).ok_or_else(invalid)?;
        Ok(Self::new(month, day))
    }
}

impl TryFrom<String> for MonthDay {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MonthDay> for String {
    fn from(md: MonthDay) -> Self {
        md.to_string()
    }
}

/// Departure times flown between two calendar days (inclusive). A season whose
/// `to` is before its `from` wraps over new year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Season {
    pub from: MonthDay,
    pub to: MonthDay,
    pub slots: Vec<String>,
}

impl Season {
    fn covers(&self, md: MonthDay) -> bool {
        if self.from <= self.to {
            self.from <= md && md <= self.to
        } else {
            md >= self.from || md <= self.to
        }
    }
}

/// The date-dependent list of flight departure times a `time_index` points into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlotSchedule {
    pub seasons: Vec<Season>,
    pub fallback: Vec<String>,
}

impl Default for TimeSlotSchedule {
    fn default() -> Self {
        let slots = |times: &[&str]| times.iter().map(|t| (*t).to_string()).collect::<Vec<_>>();
        Self {
            seasons: vec![Season {
                from: MonthDay::new(4, 1),
                to: MonthDay::new(10, 31),
                slots: slots(&[
                    "07:30", "08:45", "10:00", "11:15", "12:30", "13:45", "15:00", "16:15", "17:30",
                ]),
            }],
            fallback: slots(&["09:00", "10:15", "11:30", "12:45", "14:00", "15:15"]),
        }
    }
}

impl TimeSlotSchedule {
    pub fn from_json(json: &str) -> Result<Self, String> {
        let schedule: Self = serde_json::from_str(json).map_err(|e| e.to_string())?;
        schedule.validate()?;
        Ok(schedule)
    }

    fn validate(&self) -> Result<(), String> {
        if self.fallback.is_empty() {
            return Err("fallback slot list is empty".into());
        }
        for season in &self.seasons {
            if season.slots.is_empty() {
                return Err(format!("season {} has no slots", season.from));
            }
        }
        Ok(())
    }

    /// First matching season wins.
    pub fn slots_for(&self, date: NaiveDate) -> &[String] {
        let md = MonthDay::of(date);
        self.seasons
            .iter()
            .find(|s| s.covers(md))
            .map_or(self.fallback.as_slice(), |s| s.slots.as_slice())
    }

    pub fn time_at(&self, date: NaiveDate, time_index: u32) -> Option<&str> {
        self.slots_for(date)
            .get(time_index as usize)
            .map(String::as_str)
    }
}
