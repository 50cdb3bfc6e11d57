//! Per-link flooding reconciliation
//!
//! A `LinkReconciler` keeps the database of this node and that of one
//! neighbor eventually consistent. It exchanges three kinds of packets:
//! - TIDE: the headers we hold that are in flooding scope for the link
//! - TIRE: headers we request from the neighbor, or acknowledge
//! - TIE: the full element
//!
//! The reconciler performs no I/O. It reads and mutates the database it is
//! handed and collects outgoing packet contents in an outbox, which the
//! caller drains after every step.

use rift_protocol::{
    compare_tie_headers, HeaderAge, PacketContent, ProtocolPacket, Tide, Tie, TieHeader, TieId,
    Tire,
};
use rift_tiedb::{TieChange, TieDatabase, UpdateOutcome};
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::error::{FloodingError, Result};
use crate::link::LinkInfo;
use crate::policy::FloodRepeaterPolicy;
use crate::scope::{flood_allowed_from_neighbor, flood_allowed_to_neighbor};

/// Largest encoded TIE header, used to size TIDEs to the link MTU
const MAX_ENCODED_HEADER_BYTES: usize = 48;

/// Encoded packet header plus TIDE range, subtracted from the MTU
const TIDE_OVERHEAD_BYTES: usize = 128;

/// Why a TIE is queued for the neighbor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendReason {
    /// Unsolicited flooding, subject to flood reduction
    Flood,
    /// The neighbor requested the TIE or holds an older copy of it
    Solicited,
}

/// Per-link counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkStats {
    pub ties_sent: u64,
    pub ties_received: u64,
    pub tides_sent: u64,
    pub tides_received: u64,
    pub tires_sent: u64,
    pub tires_received: u64,
    pub malformed_dropped: u64,
}

/// Reconciliation state for one adjacency
pub struct LinkReconciler {
    link: LinkInfo,

    policy: Arc<dyn FloodRepeaterPolicy>,

    /// TIEs to send at the next opportunity
    ties_tx: BTreeMap<TieId, TieHeader>,

    /// TIEs sent and awaiting acknowledgement
    ties_rtx: BTreeMap<TieId, TieHeader>,

    /// TIEs requested from the neighbor, keyed to the header we request with
    ties_req: BTreeMap<TieId, TieHeader>,

    /// TIEs received and still to be acknowledged
    ties_ack: BTreeMap<TieId, TieHeader>,

    /// End of the range covered by the last TIDE received, for gap detection
    last_received_tide_end: TieId,

    /// A summary should go out at the next service tick
    summary_pending: bool,

    outbox: VecDeque<PacketContent>,

    stats: LinkStats,
}

impl LinkReconciler {
    pub fn new(link: LinkInfo, policy: Arc<dyn FloodRepeaterPolicy>) -> Self {
        LinkReconciler {
            link,
            policy,
            ties_tx: BTreeMap::new(),
            ties_rtx: BTreeMap::new(),
            ties_req: BTreeMap::new(),
            ties_ack: BTreeMap::new(),
            last_received_tide_end: TieId::MIN,
            summary_pending: true,
            outbox: VecDeque::new(),
            stats: LinkStats::default(),
        }
    }

    pub fn link(&self) -> &LinkInfo {
        &self.link
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn tx_queue(&self) -> impl Iterator<Item = &TieHeader> {
        self.ties_tx.values()
    }

    pub fn rtx_queue(&self) -> impl Iterator<Item = &TieHeader> {
        self.ties_rtx.values()
    }

    pub fn req_queue(&self) -> impl Iterator<Item = &TieHeader> {
        self.ties_req.values()
    }

    pub fn ack_queue(&self) -> impl Iterator<Item = &TieHeader> {
        self.ties_ack.values()
    }

    /// True when no TIE is waiting to be sent, acknowledged or received
    pub fn is_idle(&self) -> bool {
        self.ties_tx.is_empty()
            && self.ties_rtx.is_empty()
            && self.ties_req.is_empty()
            && self.ties_ack.is_empty()
    }

    /// Summary of the headers in flooding scope for this link.
    ///
    /// A header is included when we may flood the TIE to the neighbor, or
    /// when the neighbor may flood it to us and should learn which version
    /// we already hold. The summary is split into consecutive TIDEs that
    /// each fit the link MTU; together they cover the whole TIEID space.
    pub fn generate_tides(&self, db: &TieDatabase) -> Vec<Tide> {
        let headers: Vec<TieHeader> = db
            .snapshot(None)
            .filter(|header| {
                let to_neighbor = flood_allowed_to_neighbor(db, &self.link, header);
                if to_neighbor.allowed {
                    trace!("Include {} in TIDE: {}", header, to_neighbor.rule);
                    return true;
                }
                let from_neighbor = flood_allowed_from_neighbor(db, &self.link, header);
                trace!(
                    "{} {} in TIDE: {}",
                    if from_neighbor.allowed { "Include" } else { "Exclude" },
                    header,
                    from_neighbor.rule
                );
                from_neighbor.allowed
            })
            .cloned()
            .collect();

        let per_tide = max_headers_per_tide(db.config().default_mtu_size);
        if headers.len() <= per_tide {
            return vec![Tide::full_range(headers)];
        }

        let chunks: Vec<Vec<TieHeader>> = headers.chunks(per_tide).map(<[TieHeader]>::to_vec).collect();
        let last = chunks.len() - 1;
        chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                // Chunks are never empty
                let start_range = if index == 0 { TieId::MIN } else { chunk[0].tie_id };
                let end_range = if index == last {
                    TieId::MAX
                } else {
                    chunk[chunk.len() - 1].tie_id
                };
                Tide {
                    start_range,
                    end_range,
                    headers: chunk,
                }
            })
            .collect()
    }

    /// Put a fresh summary in the outbox
    pub fn queue_tide(&mut self, db: &TieDatabase) {
        let tides = self.generate_tides(db);
        if tides.len() > 1 {
            trace!("{}: summary split into {} TIDEs", self.link.link_id, tides.len());
        }
        self.summary_pending = false;
        for tide in tides {
            self.stats.tides_sent += 1;
            self.outbox.push_back(PacketContent::Tide(tide));
        }
    }

    /// Dispatch a decoded packet received on this link
    pub fn handle_packet(&mut self, db: &mut TieDatabase, packet: ProtocolPacket) -> Result<()> {
        if packet.header.sender != self.link.neighbor {
            self.stats.malformed_dropped += 1;
            return Err(FloodingError::UnexpectedSender {
                expected: self.link.neighbor,
                actual: packet.header.sender,
            });
        }
        match packet.content {
            PacketContent::Tide(tide) => self.process_tide(db, &tide),
            PacketContent::Tire(tire) => {
                self.process_tire(db, &tire);
                Ok(())
            }
            PacketContent::Tie(tie) => self.process_tie(db, tie),
        }
    }

    /// Reconcile against a neighbor's summary.
    ///
    /// Every header is compared with the local copy: newer remote versions
    /// are requested, newer local versions are sent, equal versions stop
    /// any pending transmission. Local TIEs inside the summary's range that
    /// the summary does not list are flooded as well (gap processing), as
    /// are those between the end of the previous summary and this one.
    pub fn process_tide(&mut self, db: &mut TieDatabase, tide: &Tide) -> Result<()> {
        if let Err(e) = tide.validate() {
            self.stats.malformed_dropped += 1;
            return Err(e.into());
        }
        self.stats.tides_received += 1;

        let mut flood: Vec<TieHeader> = Vec::new();
        let mut correct: Vec<TieHeader> = Vec::new();
        let mut request: Vec<TieHeader> = Vec::new();
        let mut stop_sending: Vec<TieHeader> = Vec::new();

        // The neighbor wrapped around to the start of the TIEID space
        if tide.start_range < self.last_received_tide_end {
            self.last_received_tide_end = TieId::MIN;
        }
        if tide.start_range > self.last_received_tide_end {
            flood.extend(
                db.headers_in_range(
                    Bound::Excluded(self.last_received_tide_end),
                    Bound::Excluded(tide.start_range),
                )
                .cloned(),
            );
        }
        self.last_received_tide_end = tide.end_range;

        let mut gap_start = Bound::Included(tide.start_range);
        for rx_header in &tide.headers {
            let tie_id = rx_header.tie_id;
            flood.extend(
                db.headers_in_range(gap_start, Bound::Excluded(tie_id))
                    .cloned(),
            );
            gap_start = Bound::Excluded(tie_id);

            let own = tie_id.originator == db.system_id();
            let local_header = db.get(&tie_id).ok().map(|tie| tie.header.clone());
            match local_header {
                None if own => correct.extend(self.bump_own(db, rx_header)),
                None => request.push(TieHeader::unknown(tie_id)),
                Some(local) => {
                    match compare_tie_headers(rx_header, &local, db.config().lifetime_diff2ignore) {
                        HeaderAge::Newer if own => correct.extend(self.bump_own(db, rx_header)),
                        HeaderAge::Newer => request.push(local),
                        HeaderAge::Older => correct.push(local),
                        HeaderAge::Same => stop_sending.push(local),
                    }
                }
            }
        }
        flood.extend(
            db.headers_in_range(gap_start, Bound::Included(tide.end_range))
                .cloned(),
        );

        debug!(
            "{}: TIDE with {} header(s): flood {}, correct {}, request {}, in sync {}",
            self.link.link_id,
            tide.headers.len(),
            flood.len(),
            correct.len(),
            request.len(),
            stop_sending.len()
        );

        for header in &flood {
            self.transmit(db, header, SendReason::Flood);
        }
        for header in &correct {
            self.transmit(db, header, SendReason::Solicited);
        }
        for header in request {
            self.request_tie(db, header);
        }
        for header in &stop_sending {
            self.remove_from_all_queues(&header.tie_id);
        }
        Ok(())
    }

    /// Re-originate an own TIE above the neighbor's copy, logging failures
    fn bump_own(&self, db: &mut TieDatabase, rx_header: &TieHeader) -> Option<TieHeader> {
        match db.bump_own(rx_header) {
            Ok(header) => Some(header),
            Err(e) => {
                warn!(
                    "{}: cannot re-originate own TIE {}: {}",
                    self.link.link_id, rx_header, e
                );
                None
            }
        }
    }

    /// Handle a neighbor's requests and acknowledgements.
    ///
    /// A header equal to our copy acknowledges it; an older one asks for our
    /// copy; a newer one means we should request theirs. Headers for TIEs we
    /// do not hold are ignored.
    pub fn process_tire(&mut self, db: &TieDatabase, tire: &Tire) {
        self.stats.tires_received += 1;

        for rx_header in &tire.headers {
            let local = match db.get(&rx_header.tie_id) {
                Ok(tie) => tie.header.clone(),
                Err(e) => {
                    debug!("{}: ignoring TIRE entry: {}", self.link.link_id, e);
                    continue;
                }
            };
            match compare_tie_headers(rx_header, &local, db.config().lifetime_diff2ignore) {
                HeaderAge::Newer => self.request_tie(db, local),
                HeaderAge::Older => self.transmit(db, &local, SendReason::Solicited),
                HeaderAge::Same => {
                    trace!("{}: {} acknowledged", self.link.link_id, local);
                    self.remove_from_all_queues(&local.tie_id);
                }
            }
        }
    }

    /// Handle a full TIE from the neighbor.
    ///
    /// A newer foreign TIE is stored and acknowledged. A newer copy of one
    /// of our own TIEs makes us re-originate above it. When our copy is
    /// newer we send it back; when it is the same we acknowledge.
    pub fn process_tie(&mut self, db: &mut TieDatabase, tie: Tie) -> Result<()> {
        if let Err(e) = tie.validate(db.config()) {
            self.stats.malformed_dropped += 1;
            return Err(e.into());
        }
        self.stats.ties_received += 1;

        let rx_header = tie.header.clone();
        let tie_id = rx_header.tie_id;
        let own = tie_id.originator == db.system_id();
        let local_header = db.get(&tie_id).ok().map(|local| local.header.clone());

        let age = match &local_header {
            None => HeaderAge::Newer,
            Some(local) => compare_tie_headers(&rx_header, local, db.config().lifetime_diff2ignore),
        };

        match (age, local_header) {
            (HeaderAge::Newer, _) if own => {
                let bumped = db.bump_own(&rx_header)?;
                self.transmit(db, &bumped, SendReason::Solicited);
            }
            (HeaderAge::Newer, _) => match db.insert_or_update(tie)? {
                UpdateOutcome::Accepted => self.ack_tie(rx_header),
                UpdateOutcome::Rejected(reason) => {
                    debug!(
                        "{}: received TIE {} not stored ({:?})",
                        self.link.link_id, rx_header, reason
                    );
                }
            },
            (HeaderAge::Older, Some(local)) => self.transmit(db, &local, SendReason::Solicited),
            (HeaderAge::Same, Some(local)) => self.ack_tie(local),
            (_, None) => {}
        }
        Ok(())
    }

    /// React to a change in the local database
    pub fn on_db_change(&mut self, change: &TieChange) {
        if let TieChange::Withdrawn(header) = change {
            self.remove_from_all_queues(&header.tie_id);
        }
        self.summary_pending = true;
    }

    /// Force a summary at the next service tick, e.g. after missed notifications
    pub fn mark_summary_pending(&mut self) {
        self.summary_pending = true;
    }

    /// Queue `header` for flooding if scope and flood reduction allow it
    pub fn try_to_transmit(&mut self, db: &TieDatabase, header: &TieHeader) {
        self.transmit(db, header, SendReason::Flood);
    }

    /// Flood reduction only holds back unsolicited flooding; requested TIEs
    /// and corrections of a stale neighbor copy always go out.
    fn transmit(&mut self, db: &TieDatabase, header: &TieHeader, reason: SendReason) {
        let decision = flood_allowed_to_neighbor(db, &self.link, header);
        if !decision.allowed {
            trace!("{}: not sending {}: {}", self.link.link_id, header, decision.rule);
            return;
        }
        if reason == SendReason::Flood
            && db.config().flood_reduction
            && !self.policy.should_flood(&self.link, header)
        {
            trace!("{}: not sending {}: not a flood repeater", self.link.link_id, header);
            return;
        }

        self.ties_rtx.remove(&header.tie_id);
        let pending_ack = self.ties_ack.get(&header.tie_id).map(|ack| ack.seq_nr);
        match pending_ack {
            Some(ack_seq_nr) if ack_seq_nr >= header.seq_nr => {
                // We owe an ack for this version or a newer one
            }
            Some(_) => {
                self.ties_ack.remove(&header.tie_id);
                self.add_to_tx(db, header.clone());
            }
            None => self.add_to_tx(db, header.clone()),
        }
    }

    fn add_to_tx(&mut self, db: &TieDatabase, header: TieHeader) {
        let send_now = self
            .ties_tx
            .get(&header.tie_id)
            .map_or(true, |queued| header.seq_nr > queued.seq_nr);
        let tie_id = header.tie_id;
        self.ties_tx.insert(tie_id, header);
        if send_now {
            self.send_tie(db, &tie_id);
        }
    }

    fn request_tie(&mut self, db: &TieDatabase, header: TieHeader) {
        let decision = flood_allowed_from_neighbor(db, &self.link, &header);
        if !decision.allowed {
            trace!("{}: not requesting {}: {}", self.link.link_id, header, decision.rule);
            return;
        }
        self.remove_from_all_queues(&header.tie_id);
        self.ties_req.insert(header.tie_id, header);
    }

    fn ack_tie(&mut self, header: TieHeader) {
        self.remove_from_all_queues(&header.tie_id);
        self.ties_ack.insert(header.tie_id, header);
    }

    fn remove_from_all_queues(&mut self, tie_id: &TieId) {
        self.ties_tx.remove(tie_id);
        self.ties_rtx.remove(tie_id);
        self.ties_req.remove(tie_id);
        self.ties_ack.remove(tie_id);
    }

    /// Discard all pending work, e.g. on adjacency teardown
    pub fn clear_queues(&mut self) {
        self.ties_tx.clear();
        self.ties_rtx.clear();
        self.ties_req.clear();
        self.ties_ack.clear();
        self.outbox.clear();
    }

    /// Periodic servicing of the queues.
    ///
    /// Acknowledgements go out once. Unacknowledged TIEs are resent, newly
    /// queued ones are sent and move to the retransmit queue. Outstanding
    /// requests are repeated until the TIE arrives.
    pub fn service_queues(&mut self, db: &TieDatabase) {
        if !self.ties_ack.is_empty() {
            let headers: Vec<TieHeader> = std::mem::take(&mut self.ties_ack).into_values().collect();
            self.push_tire(headers);
        }

        let rtx: Vec<TieId> = self.ties_rtx.keys().copied().collect();
        for tie_id in rtx {
            if !self.send_tie(db, &tie_id) {
                self.ties_rtx.remove(&tie_id);
            }
        }

        let tx = std::mem::take(&mut self.ties_tx);
        for (tie_id, header) in tx {
            if self.send_tie(db, &tie_id) {
                self.ties_rtx.insert(tie_id, header);
            }
        }

        if !self.ties_req.is_empty() {
            let allowed: Vec<TieHeader> = self
                .ties_req
                .values()
                .filter(|header| flood_allowed_from_neighbor(db, &self.link, header).allowed)
                .cloned()
                .collect();
            if !allowed.is_empty() {
                self.push_tire(allowed);
            }
        }

        if self.summary_pending {
            self.queue_tide(db);
        }
    }

    /// Put the current database copy of `tie_id` in the outbox
    fn send_tie(&mut self, db: &TieDatabase, tie_id: &TieId) -> bool {
        match db.get(tie_id) {
            Ok(tie) => {
                self.stats.ties_sent += 1;
                self.outbox.push_back(PacketContent::Tie(tie.clone()));
                true
            }
            Err(_) => {
                trace!("{}: {} no longer held, not sending", self.link.link_id, tie_id);
                false
            }
        }
    }

    fn push_tire(&mut self, headers: Vec<TieHeader>) {
        self.stats.tires_sent += 1;
        self.outbox.push_back(PacketContent::Tire(Tire { headers }));
    }

    /// Take everything queued for the neighbor, wrapped as packets from us
    pub fn take_packets(&mut self, db: &TieDatabase) -> Vec<ProtocolPacket> {
        let sender = db.system_id();
        let level = Some(db.level());
        self.outbox
            .drain(..)
            .map(|content| ProtocolPacket::new(sender, level, content))
            .collect()
    }

    /// Count a packet that failed to decode
    pub fn record_malformed(&mut self) {
        self.stats.malformed_dropped += 1;
        if self.stats.malformed_dropped % 100 == 0 {
            warn!(
                "{}: {} malformed packets dropped so far",
                self.link.link_id, self.stats.malformed_dropped
            );
        }
    }
}

/// How many headers one TIDE may carry on a link with `mtu` bytes
fn max_headers_per_tide(mtu: u32) -> usize {
    let mtu = usize::try_from(mtu).unwrap_or(usize::MAX);
    (mtu.saturating_sub(TIDE_OVERHEAD_BYTES) / MAX_ENCODED_HEADER_BYTES).max(1)
}
