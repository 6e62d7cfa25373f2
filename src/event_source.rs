use crate::error::Error;
use crate::event::{Event, EventType, ReactivationWindow};
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap};

/// Events of one publisher inside a window, split by whether the event was its
/// user's first of that type ever.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublisherSplit {
    pub publisher_id: i64,
    pub total: u64,
    /// First-time events (FTD for deposits).
    pub first: u64,
    /// Repeat events (RD for deposits).
    pub repeat: u64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    /// Fetches every event of `event_type` that falls inside the window.
    /// # Arguments
    /// * `event_type` - The kind of event to return.
    /// * `window` - The inclusive date window.
    /// # Returns
    /// A Result containing `(user_id, timestamp)` pairs ordered by timestamp, or an Error.
    async fn events_of_type_in_range(
        &self,
        event_type: &EventType,
        window: &ReactivationWindow,
    ) -> Result<Vec<(String, NaiveDateTime)>, Error>;

    /// Finds the latest event of `event_type` for `user_id` strictly before `before`.
    /// # Returns
    /// A Result containing the timestamp, `None` when the user has no earlier event.
    async fn latest_event_before(
        &self,
        user_id: &str,
        event_type: &EventType,
        before: NaiveDateTime,
    ) -> Result<Option<NaiveDateTime>, Error>;

    /// Batched form of [`EventSource::latest_event_before`]. The result is aligned
    /// with `anchors`.
    async fn latest_events_before(
        &self,
        event_type: &EventType,
        anchors: &[(String, NaiveDateTime)],
    ) -> Result<Vec<Option<NaiveDateTime>>, Error> {
        let mut priors = Vec::with_capacity(anchors.len());
        for (user_id, anchor) in anchors {
            priors.push(self.latest_event_before(user_id, event_type, *anchor).await?);
        }
        Ok(priors)
    }

    /// Counts events of `event_type` inside the window per publisher. Events
    /// without a publisher are not counted.
    async fn count_by_publisher(
        &self,
        event_type: &EventType,
        window: &ReactivationWindow,
    ) -> Result<Vec<(i64, u64)>, Error>;

    /// Like [`EventSource::count_by_publisher`], with each count split into
    /// events that fall on their user's first-ever timestamp and repeats.
    /// Ordered by publisher id.
    async fn first_and_repeat_by_publisher(
        &self,
        event_type: &EventType,
        window: &ReactivationWindow,
    ) -> Result<Vec<PublisherSplit>, Error>;
}

/// Read-only, in-memory snapshot of an event log.
#[derive(Clone, Debug, Default)]
pub struct EventHistory {
    events: HashMap<EventType, Vec<Event>>,
    timelines: HashMap<EventType, HashMap<String, Vec<NaiveDateTime>>>,
}

impl EventHistory {
    pub fn from_events(events: impl IntoIterator<Item = Event>) -> Self {
        let mut history = EventHistory::default();

        for event in events {
            history
                .timelines
                .entry(event.event_type.clone())
                .or_default()
                .entry(event.user_id.clone())
                .or_default()
                .push(event.timestamp);
            history
                .events
                .entry(event.event_type.clone())
                .or_default()
                .push(event);
        }

        for events in history.events.values_mut() {
            events.sort_by(|a, b| {
                a.timestamp
                    .cmp(&b.timestamp)
                    .then_with(|| a.user_id.cmp(&b.user_id))
            });
        }
        for timeline in history.timelines.values_mut().flat_map(|t| t.values_mut()) {
            timeline.sort_unstable();
        }

        history
    }

    pub fn len(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn in_window<'a>(
        &'a self,
        event_type: &EventType,
        window: &ReactivationWindow,
    ) -> &'a [Event] {
        let Some(events) = self.events.get(event_type) else {
            return &[];
        };

        let lower = window.lower_bound();
        let upper = window.upper_bound_exclusive();
        let from = events.partition_point(|e| e.timestamp < lower);
        let to = events.partition_point(|e| e.timestamp < upper);

        &events[from..to]
    }

    pub fn events_in(
        &self,
        event_type: &EventType,
        window: &ReactivationWindow,
    ) -> Vec<(String, NaiveDateTime)> {
        self.in_window(event_type, window)
            .iter()
            .map(|e| (e.user_id.clone(), e.timestamp))
            .collect()
    }

    pub fn latest_before(
        &self,
        user_id: &str,
        event_type: &EventType,
        before: NaiveDateTime,
    ) -> Option<NaiveDateTime> {
        let timeline = self.timelines.get(event_type)?.get(user_id)?;
        let idx = timeline.partition_point(|t| *t < before);

        idx.checked_sub(1).and_then(|i| timeline.get(i).copied())
    }

    pub fn publisher_counts(
        &self,
        event_type: &EventType,
        window: &ReactivationWindow,
    ) -> Vec<(i64, u64)> {
        let mut counts: BTreeMap<i64, u64> = BTreeMap::new();
        for publisher_id in self
            .in_window(event_type, window)
            .iter()
            .filter_map(|e| e.publisher_id)
        {
            *counts.entry(publisher_id).or_default() += 1;
        }

        counts.into_iter().collect()
    }

    pub fn publisher_splits(
        &self,
        event_type: &EventType,
        window: &ReactivationWindow,
    ) -> Vec<PublisherSplit> {
        let timelines = self.timelines.get(event_type);
        let mut splits: BTreeMap<i64, PublisherSplit> = BTreeMap::new();

        for event in self.in_window(event_type, window) {
            let Some(publisher_id) = event.publisher_id else {
                continue;
            };
            let first_ever = timelines
                .and_then(|t| t.get(&event.user_id))
                .and_then(|timeline| timeline.first());

            let split = splits.entry(publisher_id).or_insert(PublisherSplit {
                publisher_id,
                ..Default::default()
            });
            split.total += 1;
            if first_ever == Some(&event.timestamp) {
                split.first += 1;
            } else {
                split.repeat += 1;
            }
        }

        splits.into_values().collect()
    }
}

#[async_trait::async_trait]
impl EventSource for EventHistory {
    async fn events_of_type_in_range(
        &self,
        event_type: &EventType,
        window: &ReactivationWindow,
    ) -> Result<Vec<(String, NaiveDateTime)>, Error> {
        Ok(self.events_in(event_type, window))
    }

    async fn latest_event_before(
        &self,
        user_id: &str,
        event_type: &EventType,
        before: NaiveDateTime,
    ) -> Result<Option<NaiveDateTime>, Error> {
        Ok(self.latest_before(user_id, event_type, before))
    }

    async fn count_by_publisher(
        &self,
        event_type: &EventType,
        window: &ReactivationWindow,
    ) -> Result<Vec<(i64, u64)>, Error> {
        Ok(self.publisher_counts(event_type, window))
    }

    async fn first_and_repeat_by_publisher(
        &self,
        event_type: &EventType,
        window: &ReactivationWindow,
    ) -> Result<Vec<PublisherSplit>, Error> {
        Ok(self.publisher_splits(event_type, window))
    }
}
