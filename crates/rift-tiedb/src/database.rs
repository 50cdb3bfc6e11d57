//! Per-node store of topology elements

use crate::error::{Result, TieDbError};
use rift_protocol::{
    compare_tie_headers, Direction, FabricConfig, HeaderAge, IeeeTimestamp, SystemId, Tie,
    TieElement, TieHeader, TieId,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the change notification channel
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Why an update was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleOrDuplicate {
    /// The stored copy is newer
    Older,
    /// The stored copy is the same version
    Same,
}

/// Result of offering a TIE to the database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Accepted,
    Rejected(StaleOrDuplicate),
}

impl UpdateOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, UpdateOutcome::Accepted)
    }
}

/// Notification emitted on every accepted change
#[derive(Debug, Clone, PartialEq)]
pub enum TieChange {
    Added(TieHeader),
    Updated {
        old: TieHeader,
        new: TieHeader,
        /// Payload differs, route computation must rerun
        content_changed: bool,
    },
    Withdrawn(TieHeader),
}

impl TieChange {
    /// Header describing the database state after the change
    pub fn header(&self) -> &TieHeader {
        match self {
            TieChange::Added(header) => header,
            TieChange::Updated { new, .. } => new,
            TieChange::Withdrawn(header) => header,
        }
    }

    pub fn tie_id(&self) -> &TieId {
        &self.header().tie_id
    }

    pub fn is_withdrawal(&self) -> bool {
        matches!(self, TieChange::Withdrawn(_))
    }
}

/// TIE database
///
/// Holds exactly one TIE per TIEID, ordered by TIEID. It also remembers the
/// highest sequence number ever held for each TIEID, so a TIE that expired
/// can never be replaced by an older one.
#[derive(Debug)]
pub struct TieDatabase {
    /// Local node
    system_id: SystemId,

    /// Local level, used when flushing foreign copies of our Node TIEs
    level: u8,

    config: Arc<FabricConfig>,

    /// Stored TIEs by TIEID
    ties: BTreeMap<TieId, Tie>,

    /// Highest sequence number ever stored per TIEID
    highest_seq: HashMap<TieId, u32>,

    /// Own TIEs originated empty to flush a stale copy; left to expire
    flushing: HashSet<TieId>,

    changes: broadcast::Sender<TieChange>,
}

impl TieDatabase {
    /// Create an empty database for the node `system_id`
    pub fn new(system_id: SystemId, level: u8, config: Arc<FabricConfig>) -> Result<Self> {
        system_id.validate()?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(TieDatabase {
            system_id,
            level,
            config,
            ties: BTreeMap::new(),
            highest_seq: HashMap::new(),
            flushing: HashSet::new(),
            changes,
        })
    }

    pub fn system_id(&self) -> SystemId {
        self.system_id
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn config(&self) -> &Arc<FabricConfig> {
        &self.config
    }

    /// Number of stored TIEs
    pub fn len(&self) -> usize {
        self.ties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ties.is_empty()
    }

    pub fn contains(&self, tie_id: &TieId) -> bool {
        self.ties.contains_key(tie_id)
    }

    /// Receive a notification for every accepted insert, origination and expiry
    pub fn subscribe(&self) -> broadcast::Receiver<TieChange> {
        self.changes.subscribe()
    }

    /// Look up the current TIE for `tie_id`
    pub fn get(&self, tie_id: &TieId) -> Result<&Tie> {
        self.ties
            .get(tie_id)
            .ok_or(TieDbError::UnknownTieId(*tie_id))
    }

    /// Level advertised in the Node TIE `tie_id`, if we hold it
    pub fn node_level(&self, tie_id: &TieId) -> Option<u8> {
        self.ties
            .get(tie_id)
            .and_then(|tie| tie.element.node())
            .map(|node| node.level)
    }

    /// Headers of all stored TIEs, optionally restricted to one direction.
    ///
    /// The iterator borrows the database; holding it under a read lock
    /// gives a consistent view.
    pub fn snapshot(
        &self,
        direction_filter: Option<Direction>,
    ) -> impl Iterator<Item = &TieHeader> + '_ {
        self.ties
            .values()
            .map(|tie| &tie.header)
            .filter(move |header| {
                direction_filter.map_or(true, |direction| header.tie_id.direction == direction)
            })
    }

    /// Headers with TIEIDs in the given range, in TIEID order
    pub fn headers_in_range(
        &self,
        start: Bound<TieId>,
        end: Bound<TieId>,
    ) -> impl Iterator<Item = &TieHeader> + '_ {
        let non_empty = match (&start, &end) {
            (Bound::Included(s), Bound::Included(e)) => s <= e,
            (Bound::Included(s) | Bound::Excluded(s), Bound::Included(e) | Bound::Excluded(e)) => {
                s < e
            }
            _ => true,
        };
        // BTreeMap::range panics on an inverted range
        non_empty
            .then(|| self.ties.range((start, end)))
            .into_iter()
            .flatten()
            .map(|(_, tie)| &tie.header)
    }

    /// Offer a received TIE.
    ///
    /// Only a strictly newer version replaces the stored one. An accepted TIE
    /// with remaining lifetime 0 purges the entry.
    pub fn insert_or_update(&mut self, mut tie: Tie) -> Result<UpdateOutcome> {
        tie.validate(&self.config)?;
        tie.header.remaining_lifetime = self.config.clamp_lifetime(tie.header.remaining_lifetime);
        let tie_id = tie.header.tie_id;

        if let Some(existing) = self.ties.get(&tie_id) {
            match compare_tie_headers(&tie.header, &existing.header, self.config.lifetime_diff2ignore) {
                HeaderAge::Newer => {}
                HeaderAge::Same => {
                    debug!("Rejected TIE {}: same as stored", tie.header);
                    return Ok(UpdateOutcome::Rejected(StaleOrDuplicate::Same));
                }
                HeaderAge::Older => {
                    debug!("Rejected TIE {}: stored copy is newer", tie.header);
                    return Ok(UpdateOutcome::Rejected(StaleOrDuplicate::Older));
                }
            }
        } else if let Some(&highest) = self.highest_seq.get(&tie_id) {
            if tie.header.seq_nr < highest {
                debug!(
                    "Rejected TIE {}: sequence below previously held {}",
                    tie.header, highest
                );
                return Ok(UpdateOutcome::Rejected(StaleOrDuplicate::Older));
            }
        }

        self.record_seq(&tie.header);

        if tie.header.remaining_lifetime == 0 {
            if self.ties.remove(&tie_id).is_some() {
                self.flushing.remove(&tie_id);
                debug!("Purged TIE {}", tie.header);
                self.notify(TieChange::Withdrawn(tie.header));
            } else {
                debug!("Purge of TIE {} not held", tie.header);
            }
            return Ok(UpdateOutcome::Accepted);
        }

        self.store(tie);
        Ok(UpdateOutcome::Accepted)
    }

    /// Originate (or re-originate) a TIE owned by this node.
    ///
    /// The sequence number is one above anything held before for the TIEID
    /// and the lifetime is the configured default.
    pub fn originate(&mut self, tie_id: TieId, element: TieElement) -> Result<Tie> {
        if tie_id.originator != self.system_id {
            return Err(TieDbError::NotLocallyOriginated(tie_id));
        }
        let seq_nr = self.next_seq(&tie_id, 0)?;
        let tie = Tie::new(self.fresh_header(tie_id, seq_nr, self.config.default_lifetime), element)?;
        tie.element.validate(&self.config)?;

        info!("Originated TIE {}", tie.header);
        self.flushing.remove(&tie_id);
        self.store(tie.clone());
        Ok(tie)
    }

    /// Re-originate one of our own TIEs above a version a neighbor holds.
    ///
    /// If we no longer hold the TIE, an empty payload of the same type is
    /// originated with the short flush lifetime so the stale copy ages out
    /// of the fabric quickly.
    pub fn bump_own(&mut self, rx_header: &TieHeader) -> Result<TieHeader> {
        let tie_id = rx_header.tie_id;
        if tie_id.originator != self.system_id {
            return Err(TieDbError::NotLocallyOriginated(tie_id));
        }
        let seq_nr = self.next_seq(&tie_id, rx_header.seq_nr)?;
        let (element, flush) = match self.ties.get(&tie_id) {
            Some(tie) => (tie.element.clone(), self.flushing.contains(&tie_id)),
            None => (TieElement::empty(tie_id.tie_type, self.level), true),
        };
        let lifetime = if flush {
            self.config.flush_lifetime()
        } else {
            self.config.default_lifetime
        };
        let tie = Tie::new(self.fresh_header(tie_id, seq_nr, lifetime), element)?;
        let header = tie.header.clone();

        info!("Re-originated own TIE {} above received seq {}", header, rx_header.seq_nr);
        if flush {
            self.flushing.insert(tie_id);
        }
        self.store(tie);
        Ok(header)
    }

    /// Re-originate own TIEs whose remaining lifetime fell to the refresh
    /// threshold, keeping their payload. Flush TIEs are left to expire.
    pub fn refresh_own(&mut self) -> Vec<TieHeader> {
        let threshold = self.config.refresh_threshold();
        let due: Vec<TieId> = self
            .ties
            .values()
            .filter(|tie| {
                tie.header.tie_id.originator == self.system_id
                    && tie.header.remaining_lifetime <= threshold
                    && !self.flushing.contains(&tie.header.tie_id)
            })
            .map(|tie| tie.header.tie_id)
            .collect();

        let mut refreshed = Vec::with_capacity(due.len());
        for tie_id in due {
            let seq_nr = match self.next_seq(&tie_id, 0) {
                Ok(seq_nr) => seq_nr,
                Err(e) => {
                    warn!("Cannot refresh own TIE {}: {}", tie_id, e);
                    continue;
                }
            };
            let element = match self.ties.get(&tie_id) {
                Some(tie) => tie.element.clone(),
                None => continue,
            };
            let header = self.fresh_header(tie_id, seq_nr, self.config.default_lifetime);
            debug!("Refreshed own TIE {}", header);
            refreshed.push(header.clone());
            self.store(Tie { header, element });
        }
        refreshed
    }

    /// Remove a TIE, e.g. one this node stops originating
    pub fn remove(&mut self, tie_id: &TieId) -> Option<Tie> {
        let removed = self.ties.remove(tie_id)?;
        self.flushing.remove(tie_id);
        debug!("Removed TIE {}", removed.header);
        self.notify(TieChange::Withdrawn(removed.header.clone()));
        Some(removed)
    }

    /// Age every TIE by `elapsed_secs` and purge those that reach zero.
    ///
    /// Returns the headers of the purged TIEs, each also announced as
    /// `TieChange::Withdrawn`.
    pub fn expire_tick(&mut self, elapsed_secs: u32) -> Vec<TieHeader> {
        let mut expired = Vec::new();

        for (tie_id, tie) in self.ties.iter_mut() {
            tie.header.remaining_lifetime = tie.header.remaining_lifetime.saturating_sub(elapsed_secs);
            if tie.header.remaining_lifetime == 0 {
                expired.push(*tie_id);
            }
        }

        let mut withdrawn = Vec::with_capacity(expired.len());
        for tie_id in expired {
            if let Some(tie) = self.ties.remove(&tie_id) {
                self.flushing.remove(&tie_id);
                debug!("Expired TIE {}", tie.header);
                self.notify(TieChange::Withdrawn(tie.header.clone()));
                withdrawn.push(tie.header);
            }
        }
        withdrawn
    }

    /// Highest sequence number ever held for `tie_id`
    pub fn highest_seq(&self, tie_id: &TieId) -> Option<u32> {
        let stored = self.ties.get(tie_id).map(|tie| tie.header.seq_nr);
        let remembered = self.highest_seq.get(tie_id).copied();
        stored.max(remembered)
    }

    fn next_seq(&self, tie_id: &TieId, floor: u32) -> Result<u32> {
        let current = self.highest_seq(tie_id).unwrap_or(0).max(floor);
        current
            .checked_add(1)
            .ok_or(TieDbError::SequenceExhausted(*tie_id))
    }

    fn fresh_header(&self, tie_id: TieId, seq_nr: u32, lifetime: u32) -> TieHeader {
        let mut header = TieHeader::new(tie_id, seq_nr, lifetime);
        header.origination_time = Some(IeeeTimestamp::now());
        header.origination_lifetime = Some(lifetime);
        header
    }

    fn record_seq(&mut self, header: &TieHeader) {
        let entry = self.highest_seq.entry(header.tie_id).or_insert(0);
        *entry = (*entry).max(header.seq_nr);
    }

    fn store(&mut self, tie: Tie) {
        self.record_seq(&tie.header);
        let new_header = tie.header.clone();
        let change = match self.ties.get(&new_header.tie_id) {
            None => TieChange::Added(new_header),
            Some(old) => TieChange::Updated {
                old: old.header.clone(),
                content_changed: old.element != tie.element,
                new: new_header,
            },
        };
        self.ties.insert(tie.header.tie_id, tie);
        self.notify(change);
    }

    fn notify(&self, change: TieChange) {
        // No subscribers is not an error
        let _ = self.changes.send(change);
    }
}
