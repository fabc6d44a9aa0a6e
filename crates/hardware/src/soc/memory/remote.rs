//! Remote-forwarded backend, node locality and thread migration messages.
//!
//! With this backend the node holds no memory of its own. Every access becomes
//! a `RemoteRequest` tagged with a fresh request id and handed to a
//! `RemoteLink`; the matching `RemoteResponse` completes it later. Requests stay
//! in the in-flight map until their response folds back in, so the scheduler
//! can hold the run open while any are outstanding.
//!
//! A request the link refuses waits in a backlog and is resent, in issue
//! order, on every tick until the link takes it. Later requests queue behind
//! it, so the fabric sees one hart's accesses in program order.
//!
//! The same link carries thread migration payloads, which are fire-and-forget.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::common::{DataFlag, MemFault, PhysAddr, ReqKind};
use crate::config::NodeConfig;
use crate::core::units::lsu::atomic::{AmoWidth, AtomicOp, apply_atomic};

use super::backend::MemoryBackend;
use super::buffer::DramBuffer;
use super::request::{MemReq, TargetSlice};

/// Identity of a node on the remote fabric.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Zone number.
    pub zone: u32,
    /// Precinct number within the zone.
    pub precinct: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "z{}p{}", self.zone, self.precinct)
    }
}

/// Where an address lives relative to this node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Locality {
    /// Served by this node.
    Local,
    /// Owned by another node; a thread touching it should migrate there.
    Remote(NodeId),
}

/// Decoder for the node fields of a virtual address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeLayout {
    local: NodeId,
    zone_shift: u32,
    zone_mask: u64,
    precinct_shift: u32,
    precinct_mask: u64,
    view_bit: u32,
}

impl NodeLayout {
    /// Builds the layout from validated node configuration.
    pub const fn from_config(config: &NodeConfig) -> Self {
        Self {
            local: NodeId {
                zone: config.zone,
                precinct: config.precinct,
            },
            zone_shift: config.zone_shift,
            zone_mask: (1u64 << config.zone_bits) - 1,
            precinct_shift: config.precinct_shift,
            precinct_mask: (1u64 << config.precinct_bits) - 1,
            view_bit: config.view_bit,
        }
    }

    /// This node's identity.
    pub const fn local(&self) -> NodeId {
        self.local
    }

    /// The node encoded in `vaddr`.
    pub const fn node_of(&self, vaddr: u64) -> NodeId {
        NodeId {
            zone: ((vaddr >> self.zone_shift) & self.zone_mask) as u32,
            precinct: ((vaddr >> self.precinct_shift) & self.precinct_mask) as u32,
        }
    }

    /// Classifies `vaddr`: remote only if its view bit is set and it names
    /// another zone or precinct.
    pub const fn locality(&self, vaddr: u64) -> Locality {
        let global = (vaddr >> self.view_bit) & 1 == 1;
        let node = self.node_of(vaddr);
        if global && (node.zone != self.local.zone || node.precinct != self.local.precinct) {
            Locality::Remote(node)
        } else {
            Locality::Local
        }
    }
}

/// Architectural state of a thread shipped to another node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPayload {
    /// Thread id on the sending node.
    pub tid: u32,
    /// Program counter.
    pub pc: u64,
    /// Registers `x1..x31`.
    pub gprs: Vec<u64>,
}

/// Operation carried by a remote request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteOp {
    /// Read `len` bytes.
    Read {
        /// Bytes to read.
        len: usize,
    },
    /// Write the bytes.
    Write {
        /// Bytes to write.
        data: Vec<u8>,
    },
    /// Atomic read-modify-write.
    Amo {
        /// Operation.
        op: AtomicOp,
        /// Width in bytes.
        width: usize,
        /// Operand.
        operand: u64,
    },
    /// Thread migration.
    Migrate {
        /// Shipped thread state.
        payload: MigrationPayload,
    },
}

/// Message sent to a remote node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRequest {
    /// Correlation id, unique per sending node.
    pub id: u64,
    /// Issuing hart.
    pub hart: usize,
    /// Sending node.
    pub src: NodeId,
    /// Receiving node.
    pub dest: NodeId,
    /// Physical address on the receiving node.
    pub paddr: u64,
    /// Operation.
    pub op: RemoteOp,
}

impl RemoteRequest {
    /// Serialises the request for the wire.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses a request from the wire.
    ///
    /// # Errors
    ///
    /// Returns the deserializer's error for malformed input.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Reply to a `RemoteRequest`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteResponse {
    /// Id of the request being answered.
    pub id: u64,
    /// Read data or old atomic value; empty for write acknowledgements.
    pub data: Vec<u8>,
}

/// Transport between this node and the rest of the fabric.
pub trait RemoteLink {
    /// Hands a request to the fabric.
    ///
    /// # Returns
    ///
    /// `false` if the link refused the message.
    fn send(&mut self, msg: RemoteRequest) -> bool;

    /// Takes the next inbound response, if one has arrived.
    fn poll(&mut self) -> Option<RemoteResponse>;
}

struct InFlight {
    kind: ReqKind,
    dest: Option<TargetSlice>,
    req: Option<MemReq>,
}

/// Backend forwarding every access to a remote node.
pub struct RemoteBackend {
    link: Box<dyn RemoteLink>,
    node: NodeId,
    home: NodeId,
    capacity: u64,
    next_id: u64,
    in_flight: HashMap<u64, InFlight>,
    backlog: VecDeque<(RemoteRequest, InFlight)>,
}

impl fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("node", &self.node)
            .field("home", &self.home)
            .field("capacity", &self.capacity)
            .field("next_id", &self.next_id)
            .field("in_flight", &self.in_flight.len())
            .field("backlog", &self.backlog.len())
            .finish_non_exhaustive()
    }
}

impl RemoteBackend {
    /// Creates a backend sending to `home` over `link`.
    ///
    /// # Arguments
    ///
    /// * `link` - Transport to the fabric.
    /// * `node` - This node's identity.
    /// * `home` - Node that owns this node's memory.
    /// * `capacity` - Size of the memory served by `home`.
    pub fn new(link: Box<dyn RemoteLink>, node: NodeId, home: NodeId, capacity: u64) -> Self {
        Self {
            link,
            node,
            home,
            capacity,
            next_id: 0,
            in_flight: HashMap::new(),
            backlog: VecDeque::new(),
        }
    }

    fn check(&self, paddr: PhysAddr, len: usize) -> Result<(), MemFault> {
        match paddr.val().checked_add(len as u64) {
            Some(end) if end <= self.capacity => Ok(()),
            _ => Err(MemFault::PhysicalRange {
                paddr: paddr.val(),
                len,
                mem_size: self.capacity,
            }),
        }
    }

    fn forward(&mut self, hart: usize, paddr: PhysAddr, op: RemoteOp, pending: InFlight) {
        let id = self.next_id;
        self.next_id += 1;
        let msg = RemoteRequest {
            id,
            hart,
            src: self.node,
            dest: self.home,
            paddr: paddr.val(),
            op,
        };
        if !self.backlog.is_empty() {
            debug!(id, hart, backlog = self.backlog.len(), "remote request queued behind backlog");
            self.backlog.push_back((msg, pending));
            return;
        }
        if let Some(entry) = self.try_send(msg, pending) {
            warn!(id, hart, "remote link refused request; will resend");
            self.backlog.push_back(entry);
        }
    }

    /// Hands `msg` to the link, tracking it as in flight once accepted.
    ///
    /// # Returns
    ///
    /// The request and its completion state, if the link refused it.
    fn try_send(&mut self, msg: RemoteRequest, pending: InFlight) -> Option<(RemoteRequest, InFlight)> {
        if !self.link.send(msg.clone()) {
            return Some((msg, pending));
        }
        debug!(id = msg.id, hart = msg.hart, kind = ?pending.kind, "remote request sent");
        let _ = self.in_flight.insert(msg.id, pending);
        None
    }

    fn resend_backlog(&mut self) {
        while let Some((msg, pending)) = self.backlog.pop_front() {
            if let Some(entry) = self.try_send(msg, pending) {
                self.backlog.push_front(entry);
                break;
            }
        }
    }
}

impl MemoryBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn read(
        &mut self,
        hart: usize,
        paddr: PhysAddr,
        dest: TargetSlice,
        req: MemReq,
        _flags: DataFlag,
    ) -> Result<bool, MemFault> {
        self.check(paddr, dest.len())?;
        let op = RemoteOp::Read { len: dest.len() };
        let pending = InFlight {
            kind: ReqKind::Read,
            dest: Some(dest),
            req: Some(req),
        };
        self.forward(hart, paddr, op, pending);
        Ok(true)
    }

    fn write(
        &mut self,
        hart: usize,
        paddr: PhysAddr,
        data: &[u8],
        _flags: DataFlag,
    ) -> Result<bool, MemFault> {
        self.check(paddr, data.len())?;
        let op = RemoteOp::Write {
            data: data.to_vec(),
        };
        let pending = InFlight {
            kind: ReqKind::Write,
            dest: None,
            req: None,
        };
        self.forward(hart, paddr, op, pending);
        Ok(true)
    }

    fn amo(
        &mut self,
        hart: usize,
        paddr: PhysAddr,
        op: AtomicOp,
        operand: u64,
        dest: TargetSlice,
        req: MemReq,
    ) -> Result<bool, MemFault> {
        let width = AmoWidth::from_bytes(dest.len())?.bytes();
        self.check(paddr, width)?;
        let msg = RemoteOp::Amo { op, width, operand };
        let pending = InFlight {
            kind: ReqKind::Atomic,
            dest: Some(dest),
            req: Some(req),
        };
        self.forward(hart, paddr, msg, pending);
        Ok(true)
    }

    fn tick(&mut self, _cycle: u64) -> Result<(), MemFault> {
        self.resend_backlog();
        while let Some(resp) = self.link.poll() {
            let _ = self.handle_response(resp);
        }
        Ok(())
    }

    fn outstanding(&self) -> usize {
        self.in_flight.len() + self.backlog.len()
    }

    fn handle_response(&mut self, resp: RemoteResponse) -> bool {
        let Some(pending) = self.in_flight.remove(&resp.id) else {
            warn!(id = resp.id, "response for unknown remote request ignored");
            return false;
        };
        if let Some(dest) = pending.dest {
            dest.fill(&resp.data);
        }
        debug!(id = resp.id, kind = ?pending.kind, "remote request completed");
        if let Some(req) = pending.req {
            req.complete();
        }
        true
    }

    fn migrate(&mut self, payload: MigrationPayload, dest: NodeId) -> bool {
        let id = self.next_id;
        self.next_id += 1;
        let tid = payload.tid;
        let msg = RemoteRequest {
            id,
            hart: 0,
            src: self.node,
            dest,
            paddr: 0,
            op: RemoteOp::Migrate { payload },
        };
        let sent = self.link.send(msg);
        if sent {
            debug!(tid, %dest, "thread migration sent");
        } else {
            warn!(tid, %dest, "remote link refused migration");
        }
        sent
    }

    fn node(&self) -> Option<NodeId> {
        Some(self.node)
    }
}

#[derive(Debug)]
struct LoopbackState {
    store: DramBuffer,
    outbox: VecDeque<RemoteResponse>,
    migrations: Vec<(NodeId, MigrationPayload)>,
    delivered: u64,
}

/// A link whose far end is an in-process memory node.
///
/// Every request is encoded and decoded as it would be on a real wire, then
/// serviced against a local store; the response becomes available to `poll`
/// at once. Migration payloads are recorded. Clones share one far end, so a
/// test can keep a handle after giving the link to a backend.
#[derive(Clone, Debug)]
pub struct LoopbackLink {
    state: Rc<RefCell<LoopbackState>>,
}

impl LoopbackLink {
    /// Creates a far end holding `mem_size` zeroed bytes.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::BackingAlloc` if the store cannot be allocated.
    pub fn new(mem_size: u64) -> Result<Self, MemFault> {
        let size = usize::try_from(mem_size).map_err(|_| MemFault::BackingAlloc { size: mem_size })?;
        Ok(Self {
            state: Rc::new(RefCell::new(LoopbackState {
                store: DramBuffer::new(size)?,
                outbox: VecDeque::new(),
                migrations: Vec::new(),
                delivered: 0,
            })),
        })
    }

    /// Migration payloads received so far, with their destination.
    pub fn migrations(&self) -> Vec<(NodeId, MigrationPayload)> {
        self.state.borrow().migrations.clone()
    }

    /// Responses waiting to be polled.
    pub fn pending_responses(&self) -> usize {
        self.state.borrow().outbox.len()
    }

    /// Requests serviced so far.
    pub fn delivered(&self) -> u64 {
        self.state.borrow().delivered
    }

    /// Reads bytes straight out of the far end's store.
    pub fn peek(&self, paddr: u64, len: usize) -> Option<Vec<u8>> {
        self.state.borrow().store.read_slice(paddr, len).ok().map(<[u8]>::to_vec)
    }

    fn service(state: &mut LoopbackState, msg: RemoteRequest) -> Result<(), MemFault> {
        let data = match msg.op {
            RemoteOp::Read { len } => state.store.read_slice(msg.paddr, len)?.to_vec(),
            RemoteOp::Write { data } => {
                state.store.write_slice(msg.paddr, &data)?;
                Vec::new()
            }
            RemoteOp::Amo { op, width, operand } => {
                let cell = state.store.slice_mut(msg.paddr, width)?;
                let old = apply_atomic(op, cell, operand)?;
                old.to_le_bytes()[..width].to_vec()
            }
            RemoteOp::Migrate { payload } => {
                state.migrations.push((msg.dest, payload));
                state.delivered += 1;
                return Ok(());
            }
        };
        state.outbox.push_back(RemoteResponse { id: msg.id, data });
        state.delivered += 1;
        Ok(())
    }
}

impl RemoteLink for LoopbackLink {
    fn send(&mut self, msg: RemoteRequest) -> bool {
        let wire = match msg.encode().and_then(|bytes| RemoteRequest::decode(&bytes)) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(%err, "remote request failed to round-trip the wire format");
                return false;
            }
        };
        let mut state = self.state.borrow_mut();
        match Self::service(&mut state, wire) {
            Ok(()) => true,
            Err(fault) => {
                warn!(%fault, "loopback node rejected request");
                false
            }
        }
    }

    fn poll(&mut self) -> Option<RemoteResponse> {
        self.state.borrow_mut().outbox.pop_front()
    }
}
