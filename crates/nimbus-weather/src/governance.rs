//! Fetch bookkeeping for the weather controller.
//!
//! Decides which triggers lead to a fetch, hands out sequence numbers and
//! tells completions apart from stale ones. Pure state; the controller holds
//! it behind a lock and never across an await.

use std::collections::BTreeMap;

use nimbus_services::{Units, DEFAULT_LANGUAGE};

use crate::provider::WeatherQuery;
use crate::types::Coordinate;

/// Result of asking to start a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStart {
    /// A new request was issued under this sequence number.
    Started(u64),
    /// The newest in-flight request already asks for the same thing.
    Coalesced(u64),
}

#[derive(Debug, Default)]
pub struct FetchGovernance {
    has_fetched_once: bool,
    /// Preferences have been delivered and not torn down since.
    active: bool,
    last_units: Option<Units>,
    last_language: Option<String>,
    last_coordinate: Option<Coordinate>,
    next_seq: u64,
    applied_seq: u64,
    in_flight: BTreeMap<u64, WeatherQuery>,
}

impl FetchGovernance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_fetched_once(&self) -> bool {
        self.has_fetched_once
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn units(&self) -> Units {
        self.last_units.unwrap_or_default()
    }

    pub fn language(&self) -> &str {
        self.last_language.as_deref().unwrap_or(DEFAULT_LANGUAGE)
    }

    pub fn coordinate(&self) -> Option<Coordinate> {
        self.last_coordinate
    }

    /// Record delivered preferences. True when they warrant a fetch now:
    /// the first delivery since the last reset, or a change of units or
    /// language. Manual fetches made before that do not count.
    pub fn on_preferences(&mut self, units: Units, language: &str) -> bool {
        let first = !self.active;
        let changed = self.last_units != Some(units) || self.language() != language;

        self.active = true;
        self.last_units = Some(units);
        self.last_language = Some(language.to_string());
        first || changed
    }

    /// Record a granted coordinate. True when it is new and preferences are
    /// available; otherwise it is only kept for the next fetch.
    pub fn on_coordinate(&mut self, coordinate: Coordinate) -> bool {
        if self.last_coordinate == Some(coordinate) {
            return false;
        }
        self.last_coordinate = Some(coordinate);
        self.active
    }

    pub fn on_tick(&self) -> bool {
        self.active && self.has_fetched_once
    }

    pub fn remember_units(&mut self, units: Units) {
        self.last_units = Some(units);
    }

    pub fn remember_coordinate(&mut self, coordinate: Coordinate) {
        self.last_coordinate = Some(coordinate);
    }

    /// Register a request about to be issued.
    pub fn begin(&mut self, query: &WeatherQuery) -> FetchStart {
        let newest_issued = self.next_seq;
        if let Some((&seq, pending)) = self.in_flight.last_key_value() {
            if seq == newest_issued && seq > self.applied_seq && pending == query {
                return FetchStart::Coalesced(seq);
            }
        }

        self.next_seq += 1;
        self.has_fetched_once = true;
        self.in_flight.insert(self.next_seq, query.clone());
        FetchStart::Started(self.next_seq)
    }

    /// Record a completion. True when its result should be published, i.e.
    /// nothing triggered later has been applied yet.
    pub fn complete(&mut self, seq: u64) -> bool {
        self.in_flight.remove(&seq);
        if seq > self.applied_seq {
            self.applied_seq = seq;
            true
        } else {
            false
        }
    }

    /// Forget a request that will never complete. No-op once completed.
    pub fn settle(&mut self, seq: u64) {
        self.in_flight.remove(&seq);
    }

    /// True while a request newer than the last applied one is outstanding.
    pub fn is_loading(&self) -> bool {
        self.in_flight.keys().any(|&seq| seq > self.applied_seq)
    }

    /// Forget preferences and outstanding requests. Completions of requests
    /// issued before the reset are treated as stale. The session coordinate
    /// is kept.
    pub fn reset(&mut self) {
        self.has_fetched_once = false;
        self.active = false;
        self.last_units = None;
        self.last_language = None;
        self.applied_seq = self.next_seq;
        self.in_flight.clear();
    }
}
