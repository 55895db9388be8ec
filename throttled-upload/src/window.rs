//! Daily recurring clock-time windows during which rate limiting applies.

use crate::error::LimitError;
use jiff::civil::Time;
use jiff::{SignedDuration, ToSpan, Zoned};
use std::fmt;

const DAY: SignedDuration = SignedDuration::from_hours(24);

/// A `start..end` interval of local clock time that repeats every day.
///
/// Both ends are anchored to the calendar day the window was parsed on. When the window crosses
/// midnight (`22:00-02:00`), `end` falls on the following day. Instead of relying on a scheduler
/// to re-parse the window every day, [`TimeWindow::contains`] moves both ends forward by whole
/// days once `start` lies 24 hours or more in the past.
///
/// The absence of a window (`Option<TimeWindow>::None` wherever one is configured) means "no
/// time restriction".
#[derive(Debug, Clone)]
pub struct TimeWindow {
    start: Zoned,
    end: Zoned,
}

impl TimeWindow {
    /// Parses `"HH:MM-HH:MM"` relative to today in the system time zone.
    ///
    /// `clock_format` is a `strftime`-style format for each clock time, such as `"%H:%M"`.
    pub fn parse(range: &str, clock_format: &str) -> Result<Self, LimitError> {
        Self::parse_at(range, clock_format, &Zoned::now())
    }

    /// Like [`TimeWindow::parse`], but anchors to the calendar day and time zone of `now`.
    pub fn parse_at(range: &str, clock_format: &str, now: &Zoned) -> Result<Self, LimitError> {
        let parts: Vec<&str> = range.split('-').collect();
        let [start, end] = parts.as_slice() else {
            return Err(LimitError::WindowFormat(range.to_string()));
        };

        let start = anchor(now, parse_clock(start, clock_format, "start")?)?;
        let mut end = anchor(now, parse_clock(end, clock_format, "end")?)?;

        // range spans midnight
        if end.timestamp() <= start.timestamp() {
            end = end.checked_add(1.day()).map_err(LimitError::WindowAnchor)?;
        }

        Ok(Self { start, end })
    }

    /// Reports whether `start <= now < end`.
    ///
    /// If `now` is 24 hours or more past `start`, the window is first rolled forward one day at a
    /// time until it is not, so a long-lived window keeps matching the right calendar day.
    pub fn contains(&mut self, now: &Zoned) -> bool {
        while now.timestamp().duration_since(self.start.timestamp()) >= DAY {
            let (Ok(start), Ok(end)) = (
                self.start.checked_add(1.day()),
                self.end.checked_add(1.day()),
            ) else {
                break;
            };
            self.start = start;
            self.end = end;
        }

        self.start.timestamp() <= now.timestamp() && now.timestamp() < self.end.timestamp()
    }

    pub fn start(&self) -> &Zoned {
        &self.start
    }

    pub fn end(&self) -> &Zoned {
        &self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.strftime("%H:%M"),
            self.end.strftime("%H:%M")
        )
    }
}

fn parse_clock(input: &str, clock_format: &str, which: &'static str) -> Result<Time, LimitError> {
    Time::strptime(clock_format, input).map_err(|source| LimitError::WindowTime {
        which,
        input: input.to_string(),
        source,
    })
}

fn anchor(now: &Zoned, clock: Time) -> Result<Zoned, LimitError> {
    now.date()
        .at(clock.hour(), clock.minute(), 0, 0)
        .to_zoned(now.time_zone().clone())
        .map_err(LimitError::WindowAnchor)
}
