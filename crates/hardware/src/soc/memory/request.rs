//! Memory request descriptors and destination handles.
//!
//! A memory request travels with two pieces of caller state:
//! 1. **`MemReq`:** The completion descriptor. Its callback runs exactly once,
//!    because completing a request consumes it.
//! 2. **`Target`:** A shared byte buffer the backend fills for reads and atomics.
//!    The issuer keeps a clone and inspects it once the request completes.
//!
//! Both are single-threaded handles; every request is issued and completed on the
//! tick-processing call path.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::common::constants::MAX_SCALAR_BYTES;
use crate::common::{DataFlag, ReqKind};

/// Shared destination buffer for a read, load-reserve or atomic.
#[derive(Clone, Default)]
pub struct Target(Rc<RefCell<Vec<u8>>>);

impl Target {
    /// Creates a zeroed target of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self(Rc::new(RefCell::new(vec![0; len])))
    }

    /// Capacity in bytes.
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    /// Returns `true` for a zero-length target.
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Copy of the current contents.
    pub fn bytes(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    /// Copies `data` into the target starting at `offset`.
    ///
    /// Bytes that would fall past the end are dropped.
    pub fn fill(&self, offset: usize, data: &[u8]) {
        let mut buf = self.0.borrow_mut();
        if offset >= buf.len() {
            return;
        }
        let n = data.len().min(buf.len() - offset);
        buf[offset..offset + n].copy_from_slice(&data[..n]);
    }

    /// Runs `f` over the target bytes `[offset, offset + len)`, clamped to the target.
    pub fn with_bytes_mut<R>(&self, offset: usize, len: usize, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut buf = self.0.borrow_mut();
        let start = offset.min(buf.len());
        let end = offset.saturating_add(len).min(buf.len());
        f(&mut buf[start..end])
    }

    /// The first (up to) eight bytes as a little-endian integer.
    pub fn value(&self) -> u64 {
        let buf = self.0.borrow();
        let n = buf.len().min(MAX_SCALAR_BYTES);
        let mut raw = [0u8; MAX_SCALAR_BYTES];
        raw[..n].copy_from_slice(&buf[..n]);
        u64::from_le_bytes(raw)
    }

    /// `value()` widened to 64 bits according to `flag`.
    pub fn extended(&self, flag: DataFlag) -> u64 {
        flag.extend(self.value(), self.len())
    }

    /// Overwrites the first (up to) eight bytes with `value`, little-endian.
    pub fn set_value(&self, value: u64) {
        let mut buf = self.0.borrow_mut();
        let n = buf.len().min(MAX_SCALAR_BYTES);
        buf[..n].copy_from_slice(&value.to_le_bytes()[..n]);
    }

    /// A view of `len` bytes starting at `offset`.
    pub fn slice(&self, offset: usize, len: usize) -> TargetSlice {
        TargetSlice {
            target: self.clone(),
            offset,
            len,
        }
    }

    /// Returns `true` if both handles share one buffer.
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Target").field(&self.0.borrow()).finish()
    }
}

/// A byte range of a `Target`; the unit a backend fills.
///
/// A page-crossing read is serviced as two slices of the same target.
#[derive(Clone, Debug)]
pub struct TargetSlice {
    target: Target,
    offset: usize,
    len: usize,
}

impl TargetSlice {
    /// Length in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for an empty slice.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies `data` into the slice.
    pub fn fill(&self, data: &[u8]) {
        let n = data.len().min(self.len);
        self.target.fill(self.offset, &data[..n]);
    }

    /// Runs `f` over the slice's bytes.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.target.with_bytes_mut(self.offset, self.len, f)
    }
}

/// Completion descriptor of one memory request.
pub struct MemReq {
    kind: ReqKind,
    hart: usize,
    on_complete: Option<Box<dyn FnOnce()>>,
}

impl MemReq {
    /// Creates a descriptor whose completion runs `on_complete`.
    pub fn new(kind: ReqKind, hart: usize, on_complete: impl FnOnce() + 'static) -> Self {
        Self {
            kind,
            hart,
            on_complete: Some(Box::new(on_complete)),
        }
    }

    /// Creates a descriptor with no completion callback.
    pub const fn untracked(kind: ReqKind, hart: usize) -> Self {
        Self {
            kind,
            hart,
            on_complete: None,
        }
    }

    /// Kind of the request.
    pub const fn kind(&self) -> ReqKind {
        self.kind
    }

    /// Issuing hart.
    pub const fn hart(&self) -> usize {
        self.hart
    }

    /// Marks the request complete, running its callback.
    pub fn complete(mut self) {
        if let Some(callback) = self.on_complete.take() {
            callback();
        }
    }

    /// Splits the request into `parts` descriptors that complete the original
    /// once all of them have completed.
    ///
    /// Used when an access crossing a page boundary is serviced as two
    /// independent physical accesses.
    pub fn split(self, parts: usize) -> Vec<Self> {
        if parts <= 1 {
            return vec![self];
        }
        let (kind, hart) = (self.kind, self.hart);
        let join = Rc::new(RefCell::new((parts, Some(self))));
        (0..parts)
            .map(|_| {
                let join = Rc::clone(&join);
                Self::new(kind, hart, move || {
                    let ready = {
                        let mut state = join.borrow_mut();
                        state.0 -= 1;
                        if state.0 == 0 { state.1.take() } else { None }
                    };
                    if let Some(original) = ready {
                        original.complete();
                    }
                })
            })
            .collect()
    }
}

impl fmt::Debug for MemReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemReq")
            .field("kind", &self.kind)
            .field("hart", &self.hart)
            .field("tracked", &self.on_complete.is_some())
            .finish()
    }
}
