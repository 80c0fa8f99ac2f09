//! Typed event streams with end-of-tick finalization.
//!
//! Three streams are kept: logistics, lane security and fleet. Systems emit
//! through the [`EventSink`] trait during a tick; every event is appended with
//! `seq == 0` and a per-stream emit order. At tick advance each stream is
//! finalized independently:
//!
//! 1. Collect the indices of unfinalized events for the current tick.
//! 2. Sort them with the stream comparator (index is the final tie-break).
//! 3. Assign strictly increasing sequence numbers.
//! 4. Write the events back into their original slots.
//! 5. Drop the oldest entries past the stream cap.
//!
//! Finalized events are never reordered, so list order equals sequence order.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::fixed::Ticks;
use crate::id::*;
use crate::route::RiskBand;

/// Current event schema version stamped into every header.
pub const EVENT_VERSION: u32 = 1;

/// Retention cap shared by all three streams.
pub const EVENT_LOG_CAP: usize = 2000;

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    pub version: u32,
    /// Global sequence number. Zero until finalized.
    pub seq: u64,
    /// Per-stream emission counter.
    pub emit_order: u64,
    pub tick: Ticks,
}

// ---------------------------------------------------------------------------
// Logistics events
// ---------------------------------------------------------------------------

/// Logistics event kinds. Declaration order matches the numeric codes so the
/// derived `Ord` sorts by code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogisticsEventType {
    JobPlanned,
    PhaseChangedToDeliver,
    JobCompleted,
    JobCanceled,
    ManualOverrideSet,
    PickupIssued,
    DeliveryIssued,
    ReservationCreated,
    ReservationReleased,
}

impl LogisticsEventType {
    pub fn code(self) -> u32 {
        match self {
            LogisticsEventType::JobPlanned => 1,
            LogisticsEventType::PhaseChangedToDeliver => 2,
            LogisticsEventType::JobCompleted => 3,
            LogisticsEventType::JobCanceled => 4,
            LogisticsEventType::ManualOverrideSet => 5,
            LogisticsEventType::PickupIssued => 10,
            LogisticsEventType::DeliveryIssued => 11,
            LogisticsEventType::ReservationCreated => 12,
            LogisticsEventType::ReservationReleased => 13,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogisticsEvent {
    pub header: EventHeader,
    pub event_type: LogisticsEventType,
    pub fleet_id: FleetId,
    pub good_id: GoodId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub amount: u32,
    pub note: String,
}

impl LogisticsEvent {
    pub fn new(event_type: LogisticsEventType, fleet_id: &FleetId) -> Self {
        Self {
            header: EventHeader::default(),
            event_type,
            fleet_id: fleet_id.clone(),
            good_id: GoodId::default(),
            source_node_id: NodeId::default(),
            target_node_id: NodeId::default(),
            amount: 0,
            note: String::new(),
        }
    }

    pub fn good(mut self, good: &GoodId) -> Self {
        self.good_id = good.clone();
        self
    }

    pub fn nodes(mut self, source: &NodeId, target: &NodeId) -> Self {
        self.source_node_id = source.clone();
        self.target_node_id = target.clone();
        self
    }

    pub fn amount(mut self, amount: u32) -> Self {
        self.amount = amount;
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Security events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SecurityEventType {
    Delay,
    Loss,
    Inspection,
}

impl SecurityEventType {
    pub fn code(self) -> u32 {
        match self {
            SecurityEventType::Delay => 1,
            SecurityEventType::Loss => 2,
            SecurityEventType::Inspection => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub header: EventHeader,
    pub event_type: SecurityEventType,
    pub edge_id: EdgeId,
    pub from_node_id: NodeId,
    pub to_node_id: NodeId,
    pub risk_band: RiskBand,
    pub delay_ticks: u32,
    pub loss_units: u32,
    pub inspection_ticks: u32,
    pub cause_chain: String,
    pub note: String,
}

// ---------------------------------------------------------------------------
// Fleet events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FleetEventType {
    RouteChoice,
    DiscoverySeen,
}

impl FleetEventType {
    pub fn code(self) -> u32 {
        match self {
            FleetEventType::RouteChoice => 1,
            FleetEventType::DiscoverySeen => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetEvent {
    pub header: EventHeader,
    pub event_type: FleetEventType,
    pub fleet_id: FleetId,
    pub discovery_id: String,
    pub node_id: NodeId,
    pub chosen_route_id: String,
    pub role: u8,
    pub profit: i64,
    pub capacity: u32,
    pub risk: u32,
    pub reason_code: String,
    pub phase_after: String,
    pub note: String,
}

impl FleetEvent {
    pub fn new(event_type: FleetEventType, fleet_id: &FleetId) -> Self {
        Self {
            header: EventHeader::default(),
            event_type,
            fleet_id: fleet_id.clone(),
            discovery_id: String::new(),
            node_id: NodeId::default(),
            chosen_route_id: String::new(),
            role: 0,
            profit: 0,
            capacity: 0,
            risk: 0,
            reason_code: String::new(),
            phase_after: String::new(),
            note: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stream ordering
// ---------------------------------------------------------------------------

/// An event that can live in an [`EventLog`].
pub trait StreamEvent: Clone {
    fn header(&self) -> &EventHeader;
    fn header_mut(&mut self) -> &mut EventHeader;
    /// Finalization order, excluding the slot index tie-break.
    fn finalize_cmp(&self, other: &Self) -> Ordering;
}

impl StreamEvent for LogisticsEvent {
    fn header(&self) -> &EventHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EventHeader {
        &mut self.header
    }

    fn finalize_cmp(&self, other: &Self) -> Ordering {
        self.fleet_id
            .cmp(&other.fleet_id)
            .then(self.header.emit_order.cmp(&other.header.emit_order))
            .then(self.event_type.cmp(&other.event_type))
            .then_with(|| self.good_id.cmp(&other.good_id))
            .then_with(|| self.source_node_id.cmp(&other.source_node_id))
            .then_with(|| self.target_node_id.cmp(&other.target_node_id))
            .then(self.amount.cmp(&other.amount))
            .then_with(|| self.note.cmp(&other.note))
    }
}

impl StreamEvent for SecurityEvent {
    fn header(&self) -> &EventHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EventHeader {
        &mut self.header
    }

    fn finalize_cmp(&self, other: &Self) -> Ordering {
        self.edge_id
            .cmp(&other.edge_id)
            .then(self.header.emit_order.cmp(&other.header.emit_order))
            .then(self.event_type.cmp(&other.event_type))
            .then_with(|| self.from_node_id.cmp(&other.from_node_id))
            .then_with(|| self.to_node_id.cmp(&other.to_node_id))
            .then(self.risk_band.cmp(&other.risk_band))
            .then(self.delay_ticks.cmp(&other.delay_ticks))
            .then(self.loss_units.cmp(&other.loss_units))
            .then(self.inspection_ticks.cmp(&other.inspection_ticks))
            .then_with(|| self.cause_chain.cmp(&other.cause_chain))
            .then_with(|| self.note.cmp(&other.note))
    }
}

impl StreamEvent for FleetEvent {
    fn header(&self) -> &EventHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EventHeader {
        &mut self.header
    }

    fn finalize_cmp(&self, other: &Self) -> Ordering {
        self.fleet_id
            .cmp(&other.fleet_id)
            .then(self.header.emit_order.cmp(&other.header.emit_order))
            .then(self.event_type.cmp(&other.event_type))
            .then_with(|| self.discovery_id.cmp(&other.discovery_id))
            .then_with(|| self.node_id.cmp(&other.node_id))
            .then_with(|| self.chosen_route_id.cmp(&other.chosen_route_id))
            .then(self.role.cmp(&other.role))
            .then(self.profit.cmp(&other.profit))
            .then(self.capacity.cmp(&other.capacity))
            .then(self.risk.cmp(&other.risk))
            .then_with(|| self.reason_code.cmp(&other.reason_code))
            .then_with(|| self.phase_after.cmp(&other.phase_after))
            .then_with(|| self.note.cmp(&other.note))
    }
}

// ---------------------------------------------------------------------------
// EventLog
// ---------------------------------------------------------------------------

/// An append-only, capped event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLog<E> {
    events: Vec<E>,
    /// Next sequence number to assign. Starts at 1; zero marks unfinalized.
    next_seq: u64,
    next_emit_order: u64,
    capacity: usize,
    total_written: u64,
    dropped_count: u64,
}

impl<E> Default for EventLog<E> {
    fn default() -> Self {
        Self::new(EVENT_LOG_CAP)
    }
}

impl<E> EventLog<E> {
    /// A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Vec::new(),
            next_seq: 1,
            next_emit_order: 0,
            capacity: capacity.max(1),
            total_written: 0,
            dropped_count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events written since creation, including dropped ones.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Events evicted by the retention cap.
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.events.iter()
    }

    pub fn as_slice(&self) -> &[E] {
        &self.events
    }

    pub fn last(&self) -> Option<&E> {
        self.events.last()
    }

    fn truncate_front(&mut self) {
        let excess = self.events.len().saturating_sub(self.capacity);
        if excess > 0 {
            self.events.drain(..excess);
            self.dropped_count += excess as u64;
        }
    }
}

impl<E: StreamEvent> EventLog<E> {
    /// Append an event, stamping its header for `tick`.
    pub fn push(&mut self, mut event: E, tick: Ticks) {
        *event.header_mut() = EventHeader {
            version: EVENT_VERSION,
            seq: 0,
            emit_order: self.next_emit_order,
            tick,
        };
        self.next_emit_order += 1;
        self.total_written += 1;
        self.events.push(event);
    }

    /// Assign sequence numbers to this tick's events and apply the cap.
    ///
    /// `indices` and `scratch` are caller-owned buffers reused across ticks.
    /// Returns the number of events finalized.
    pub fn finalize(&mut self, tick: Ticks, indices: &mut Vec<usize>, scratch: &mut Vec<E>) -> usize {
        indices.clear();
        scratch.clear();

        indices.extend(
            self.events
                .iter()
                .enumerate()
                .filter(|(_, e)| e.header().seq == 0 && e.header().tick == tick)
                .map(|(i, _)| i),
        );

        // `indices` is ascending, so a stable sort keeps slot index as the
        // last tie-break.
        scratch.extend(indices.iter().map(|&i| self.events[i].clone()));
        scratch.sort_by(|a, b| a.finalize_cmp(b));

        let count = indices.len();
        for (&slot, mut event) in indices.iter().zip(scratch.drain(..)) {
            event.header_mut().seq = self.next_seq;
            self.next_seq += 1;
            self.events[slot] = event;
        }

        self.truncate_front();
        count
    }
}

// ---------------------------------------------------------------------------
// Sink and arena
// ---------------------------------------------------------------------------

/// Emission surface used by systems. Implemented by `SimState`, which stamps
/// the current tick.
pub trait EventSink {
    fn emit_logistics(&mut self, event: LogisticsEvent);
    fn emit_security(&mut self, event: SecurityEvent);
    fn emit_fleet(&mut self, event: FleetEvent);
}

/// Scratch buffers for finalization, owned by the kernel and reused every
/// tick so finalization does not allocate in steady state.
#[derive(Debug, Default)]
pub struct FinalizeArena {
    indices: Vec<usize>,
    logistics: Vec<LogisticsEvent>,
    security: Vec<SecurityEvent>,
    fleet: Vec<FleetEvent>,
}

impl FinalizeArena {
    /// Preallocate for `per_tick` events per stream.
    pub fn with_capacity(per_tick: usize) -> Self {
        Self {
            indices: Vec::with_capacity(per_tick),
            logistics: Vec::with_capacity(per_tick),
            security: Vec::with_capacity(per_tick),
            fleet: Vec::with_capacity(per_tick),
        }
    }

    /// Finalize all three streams for `tick`.
    pub fn finalize_all(
        &mut self,
        tick: Ticks,
        logistics: &mut EventLog<LogisticsEvent>,
        security: &mut EventLog<SecurityEvent>,
        fleet: &mut EventLog<FleetEvent>,
    ) -> usize {
        logistics.finalize(tick, &mut self.indices, &mut self.logistics)
            + security.finalize(tick, &mut self.indices, &mut self.security)
            + fleet.finalize(tick, &mut self.indices, &mut self.fleet)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
