use crate::error::Error;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::fmt;

/// Kind of a tracked user event, as stored in `user_events.event_type`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    Deposit,
    Click,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Deposit => "deposit",
            EventType::Click => "click",
            EventType::Other(name) => name,
        }
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "deposit" => EventType::Deposit,
            "click" => EventType::Click,
            other => EventType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single recorded user event. Events are never updated once recorded.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub user_id: String,
    pub event_type: EventType,
    pub timestamp: NaiveDateTime,
    pub publisher_id: Option<i64>,
    pub amount: Option<f64>,
}

#[cfg(test)]
impl Event {
    pub fn deposit(user_id: &str, timestamp: NaiveDateTime) -> Self {
        Event {
            user_id: user_id.to_string(),
            event_type: EventType::Deposit,
            timestamp,
            publisher_id: None,
            amount: None,
        }
    }

    pub fn with_publisher(mut self, publisher_id: i64) -> Self {
        self.publisher_id = Some(publisher_id);
        self
    }
}

/// Inclusive calendar-date window an analysis runs over.
///
/// A timestamp is inside the window when its date falls in `[start, end]`, so
/// anything recorded on the boundary days counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReactivationWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl ReactivationWindow {
    /// # Errors
    /// [`Error::StartDateAfterEndDate`] when `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, Error> {
        if start > end {
            return Err(Error::StartDateAfterEndDate {
                start_date: start.to_string(),
                end_date: end.to_string(),
            });
        }

        Ok(ReactivationWindow { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, timestamp: &NaiveDateTime) -> bool {
        let date = timestamp.date();
        date >= self.start && date <= self.end
    }

    pub fn lower_bound(&self) -> NaiveDateTime {
        self.start.and_time(NaiveTime::MIN)
    }

    /// Midnight after the last day of the window.
    pub fn upper_bound_exclusive(&self) -> NaiveDateTime {
        self.end
            .succ_opt()
            .unwrap_or(NaiveDate::MAX)
            .and_time(NaiveTime::MIN)
    }
}

impl fmt::Display for ReactivationWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

#[cfg(test)]
pub(crate) fn ts(value: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").unwrap()
}

#[cfg(test)]
pub(crate) fn window(start: &str, end: &str) -> ReactivationWindow {
    ReactivationWindow::new(
        NaiveDate::parse_from_str(start, "%Y-%m-%d").unwrap(),
        NaiveDate::parse_from_str(end, "%Y-%m-%d").unwrap(),
    )
    .unwrap()
}
