use crate::bucketing::Band;
use crate::error::Error;
use crate::event::{EventType, ReactivationWindow};
use crate::event_source::{EventHistory, EventSource};
use chrono::NaiveDateTime;
use log::{debug, info};
use std::collections::{BTreeMap, HashSet};

/// A user's first deposit inside the window together with the deposit right
/// before it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reactivation {
    pub user_id: String,
    pub anchor: NaiveDateTime,
    pub prior: NaiveDateTime,
    pub gap_days: i64,
}

impl Reactivation {
    pub fn band(&self) -> Band {
        Band::for_gap(self.gap_days)
    }
}

#[derive(Clone, Debug)]
pub struct ReactivationOptions {
    pub event_type: EventType,
    /// Only users in this set are considered when present.
    pub users: Option<HashSet<String>>,
    /// Length of the user list as given, duplicates included. Falls back to
    /// the size of `users`.
    pub users_requested: Option<usize>,
    /// Reactivations with a shorter gap are dropped and counted as below the floor.
    pub min_gap_days: i64,
}

impl ReactivationOptions {
    /// Restricts the run to `user_ids`. The rate denominator is the list as
    /// given, so repeated ids count every time.
    pub fn with_user_list(mut self, user_ids: Vec<String>) -> Self {
        self.users_requested = Some(user_ids.len());
        self.users = Some(user_ids.into_iter().collect());
        self
    }
}

impl Default for ReactivationOptions {
    fn default() -> Self {
        ReactivationOptions {
            event_type: EventType::Deposit,
            users: None,
            users_requested: None,
            min_gap_days: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReactivationSet {
    pub window: ReactivationWindow,
    pub records: Vec<Reactivation>,
    /// Distinct users with at least one qualifying event in the window.
    pub depositors: usize,
    /// Depositors with no earlier event at all.
    pub new_count: usize,
    pub below_floor_count: usize,
    pub users_requested: Option<usize>,
}

/// Whole days between two timestamps, truncated.
pub fn gap_days(anchor: NaiveDateTime, prior: NaiveDateTime) -> i64 {
    (anchor - prior).num_days()
}

/// Earliest event per user, restricted to `users` when given.
fn anchors(
    events: Vec<(String, NaiveDateTime)>,
    window: &ReactivationWindow,
    users: Option<&HashSet<String>>,
) -> BTreeMap<String, NaiveDateTime> {
    let mut anchors: BTreeMap<String, NaiveDateTime> = BTreeMap::new();

    for (user_id, timestamp) in events {
        if !window.contains(&timestamp) {
            debug!("ignoring event of {} outside {}: {}", user_id, window, timestamp);
            continue;
        }
        if users.is_some_and(|users| !users.contains(&user_id)) {
            continue;
        }
        anchors
            .entry(user_id)
            .and_modify(|anchor| {
                if timestamp < *anchor {
                    *anchor = timestamp;
                }
            })
            .or_insert(timestamp);
    }

    anchors
}

fn assemble(
    window: &ReactivationWindow,
    options: &ReactivationOptions,
    anchors: Vec<(String, NaiveDateTime)>,
    priors: Vec<Option<NaiveDateTime>>,
) -> ReactivationSet {
    let depositors = anchors.len();
    let mut records = Vec::new();
    let mut below_floor_count = 0;

    for ((user_id, anchor), prior) in anchors.into_iter().zip(priors) {
        let Some(prior) = prior.filter(|prior| *prior < anchor) else {
            continue;
        };

        let gap_days = gap_days(anchor, prior);
        if gap_days < options.min_gap_days {
            below_floor_count += 1;
            continue;
        }

        records.push(Reactivation {
            user_id,
            anchor,
            prior,
            gap_days,
        });
    }

    records.sort_by(|a, b| {
        a.gap_days
            .cmp(&b.gap_days)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    ReactivationSet {
        window: *window,
        new_count: depositors - records.len() - below_floor_count,
        records,
        depositors,
        below_floor_count,
        users_requested: options
            .users_requested
            .or_else(|| options.users.as_ref().map(HashSet::len)),
    }
}

/// Computes the reactivations of a window against any [`EventSource`].
///
/// Nothing is returned unless every lookup succeeded.
///
/// # Errors
/// Any error raised by `source`.
pub async fn calculate_reactivations(
    source: &dyn EventSource,
    window: &ReactivationWindow,
    options: &ReactivationOptions,
) -> Result<ReactivationSet, Error> {
    let events = source
        .events_of_type_in_range(&options.event_type, window)
        .await?;
    info!("found {} {} events in {}", events.len(), options.event_type, window);

    let anchors: Vec<_> = anchors(events, window, options.users.as_ref()).into_iter().collect();
    info!("found {} distinct users in {}", anchors.len(), window);

    let priors = source
        .latest_events_before(&options.event_type, &anchors)
        .await?;

    if priors.len() != anchors.len() {
        return Err(Error::NoData {
            message: format!(
                "event source returned {} prior lookups for {} users",
                priors.len(),
                anchors.len()
            ),
        });
    }

    Ok(assemble(window, options, anchors, priors))
}

/// Synchronous variant of [`calculate_reactivations`] over an in-memory history.
pub fn reactivations_from_history(
    history: &EventHistory,
    window: &ReactivationWindow,
    options: &ReactivationOptions,
) -> ReactivationSet {
    let events = history.events_in(&options.event_type, window);
    let anchors: Vec<_> = anchors(events, window, options.users.as_ref()).into_iter().collect();
    let priors = anchors
        .iter()
        .map(|(user_id, anchor)| history.latest_before(user_id, &options.event_type, *anchor))
        .collect();

    assemble(window, options, anchors, priors)
}
