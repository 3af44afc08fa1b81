//! The arena that owns every tree node, vector backing store and long atom string. It's called a
//! "gc" but there's no tracing collector: memory is given back only through explicit calls to
//! [Gc::deallocate] and [Gc::reallocate].
//!
//! The arena is a single [Vec<u8>] addressed by [Addr] offsets. Free memory is threaded into an
//! address ordered free list, whose `{next, len}` headers live inside the free bytes themselves.

use std::fmt::{self, Display};

use crate::tree::{Tree, TreeKind};
use crate::util::{align_down, align_up};

/// Every allocation is rounded up to this boundary.
pub const ALIGN: usize = 8;

/// Size of a free block header: `next: u32` followed by `len: u32`.
pub const HEADER: usize = 8;

/// Bytes that can never be claimed, so the conservative precheck in [Gc::allocate] always keeps
/// room for one free block header.
pub const RESERVED: usize = HEADER;

/// The largest arena we can address with [Addr].
pub const MAX_CAPACITY: usize = align_down(u32::MAX as usize - 1, ALIGN);

const NONE: u32 = u32::MAX;

/// Byte offset inside of the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Addr(u32);

impl Addr {
    /// Returned by zero sized allocations. It's never a valid offset.
    pub const DANGLING: Addr = Addr(NONE);

    pub(crate) fn new(offset: usize) -> Addr {
        Addr(offset as u32)
    }

    pub(crate) fn from_raw(raw: u32) -> Option<Addr> {
        (raw != NONE).then_some(Addr(raw))
    }

    pub(crate) fn raw(self) -> u32 {
        self.0
    }

    pub fn offset(self) -> usize {
        self.0 as usize
    }

    pub fn add(self, bytes: usize) -> Addr {
        Addr::new(self.offset() + bytes)
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Addr::DANGLING {
            write!(f, "<dangling>")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

/// Faults raised by the arena and by the bytecode builder. They mean that some internal
/// consistency rule was broken, and not that the user wrote something wrong.
#[derive(thiserror::Error, miette::Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum AllocatorFault {
    #[error("out of memory: requested {requested} bytes with {remaining} bytes remaining")]
    #[diagnostic(code(nisc::gc::out_of_memory))]
    OutOfMemory { requested: usize, remaining: usize },

    #[error("double free at {addr}")]
    #[diagnostic(code(nisc::gc::double_free))]
    DoubleFree { addr: Addr },

    #[error("invalid free of {size} bytes at {addr}")]
    #[diagnostic(code(nisc::gc::invalid_free))]
    InvalidFree { addr: Addr, size: usize },

    #[error("index {index} out of bounds for length {len}")]
    #[diagnostic(code(nisc::index_out_of_bounds))]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("no insertion point is set")]
    #[diagnostic(code(nisc::no_insertion_point))]
    NoInsertionPoint,

    #[error("node at {addr} is not a {expected}")]
    #[diagnostic(code(nisc::gc::wrong_kind))]
    WrongKind { addr: Addr, expected: TreeKind },
}

pub type Result<T, E = AllocatorFault> = std::result::Result<T, E>;

/// A snapshot of the arena accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub capacity: usize,
    pub live: usize,
    pub peak: usize,
    pub free: usize,
    pub free_blocks: usize,
    pub nodes: usize,
}

impl Display for GcStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "capacity {} live {} peak {} free {} in {} blocks, {} nodes",
            self.capacity, self.live, self.peak, self.free, self.free_blocks, self.nodes
        )
    }
}

/// Arena allocator with an embedded first-fit free list.
pub struct Gc {
    buffer: Vec<u8>,
    head: Option<Addr>,
    live: usize,
    peak: usize,

    pub(crate) nil: Tree,
    pub(crate) t: Tree,
    pub(crate) f: Tree,

    /// The last allocated node, start of the `next` chain.
    pub(crate) last: Option<Tree>,
    pub(crate) nodes: usize,
}

impl Gc {
    /// Creates an arena of `capacity` bytes, rounded down to the alignment, and seeds the `nil`,
    /// `#t` and `#f` singletons.
    pub fn new(capacity: usize) -> Result<Gc> {
        let capacity = align_down(capacity.min(MAX_CAPACITY), ALIGN);

        let mut gc = Gc {
            buffer: vec![0; capacity],
            head: None,
            live: 0,
            peak: 0,
            nil: Tree::DANGLING,
            t: Tree::DANGLING,
            f: Tree::DANGLING,
            last: None,
            nodes: 0,
        };

        if capacity >= HEADER {
            gc.write_header(Addr::new(0), None, capacity);
            gc.head = Some(Addr::new(0));
        }

        gc.seed()?;

        Ok(gc)
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Claims `size` bytes, rounded up to the alignment, from the first free block that fits.
    pub fn allocate(&mut self, size: usize) -> Result<Addr> {
        if size == 0 {
            return Ok(Addr::DANGLING);
        }

        if size > self.capacity() {
            return Err(self.out_of_memory(size));
        }

        let size = align_up(size, ALIGN);

        if self.live + RESERVED + size >= self.capacity() {
            return Err(self.out_of_memory(size));
        }

        let mut prev = None;
        let mut current = self.head;

        while let Some(block) = current {
            let (next, len) = self.read_header(block);

            if len >= size {
                let leftover = len - size;

                // Headers are as large as the alignment, so any remainder can hold one.
                if leftover == 0 {
                    self.link(prev, next);
                } else {
                    let rest = block.add(size);
                    self.write_header(rest, next, leftover);
                    self.link(prev, Some(rest));
                }

                self.live += size;
                self.peak = self.peak.max(self.live);

                tracing::trace!(addr = %block, size, leftover, "allocated");

                return Ok(block);
            }

            prev = Some(block);
            current = next;
        }

        Err(self.out_of_memory(size))
    }

    /// Gives `size` bytes at `addr` back to the free list, merging them with the neighbour blocks
    /// when they touch.
    pub fn deallocate(&mut self, addr: Addr, size: usize) -> Result<()> {
        if size == 0 {
            return Ok(());
        }

        if size > self.capacity() {
            return Err(self.invalid_free(addr, size));
        }

        let size = align_up(size, ALIGN);
        self.check_live(addr, size)?;

        let start = addr.offset();
        let end = start + size;

        let mut prev = None;
        let mut current = self.head;

        while let Some(block) = current {
            if block.offset() >= start {
                break;
            }

            let (next, _) = self.read_header(block);
            prev = Some(block);
            current = next;
        }

        let Some(live) = self.live.checked_sub(size) else {
            return Err(self.invalid_free(addr, size));
        };

        self.live = live;

        // Merge with the following block first, then let the previous one swallow the result.
        let (mut next, mut len) = (current, size);

        if let Some(block) = current.filter(|block| block.offset() == end) {
            let (after, after_len) = self.read_header(block);
            next = after;
            len += after_len;
            tracing::debug!(%addr, with = %block, "coalesced with next block");
        }

        match prev {
            Some(block) if block.offset() + self.read_header(block).1 == start => {
                let (_, prev_len) = self.read_header(block);
                self.write_header(block, next, prev_len + len);
                tracing::debug!(%addr, with = %block, "coalesced with previous block");
            }
            _ => {
                self.write_header(addr, next, len);
                self.link(prev, Some(addr));
            }
        }

        tracing::trace!(%addr, size, "freed");

        Ok(())
    }

    /// Resizes an allocation. Growing first tries to take the free block that follows the
    /// allocation, and only then moves it. Shrinking gives the tail back to the free list.
    pub fn reallocate(&mut self, addr: Addr, old: usize, new: usize) -> Result<Addr> {
        if old == 0 {
            return self.allocate(new);
        }

        if new == 0 {
            self.deallocate(addr, old)?;
            return Ok(Addr::DANGLING);
        }

        if old > self.capacity() {
            return Err(self.invalid_free(addr, old));
        }

        if new > self.capacity() {
            return Err(self.out_of_memory(new));
        }

        let old = align_up(old, ALIGN);
        let new = align_up(new, ALIGN);

        self.check_live(addr, old)?;

        if old == new {
            return Ok(addr);
        }

        if new < old {
            self.deallocate(addr.add(new), old - new)?;
            return Ok(addr);
        }

        let end = addr.add(old);
        let extra = new - old;

        let mut prev = None;
        let mut current = self.head;

        while let Some(block) = current.filter(|block| *block <= end) {
            let (next, len) = self.read_header(block);

            if block == end && len >= extra {
                let leftover = len - extra;

                if leftover == 0 {
                    self.link(prev, next);
                } else {
                    let rest = block.add(extra);
                    self.write_header(rest, next, leftover);
                    self.link(prev, Some(rest));
                }

                self.live += extra;
                self.peak = self.peak.max(self.live);

                tracing::trace!(%addr, old, new, "grew in place");

                return Ok(addr);
            }

            prev = Some(block);
            current = next;
        }

        let moved = self.allocate(new)?;
        self.buffer
            .copy_within(addr.offset()..addr.offset() + old, moved.offset());
        self.deallocate(addr, old)?;

        tracing::trace!(from = %addr, to = %moved, old, new, "moved allocation");

        Ok(moved)
    }

    /// Iterates over the free list as `(address, length)` pairs, lowest address first.
    pub fn free_blocks(&self) -> FreeBlocks<'_> {
        FreeBlocks {
            gc: self,
            current: self.head,
        }
    }

    pub fn stats(&self) -> GcStats {
        let (free, free_blocks) = self
            .free_blocks()
            .fold((0, 0), |(bytes, count), (_, len)| (bytes + len, count + 1));

        GcStats {
            capacity: self.capacity(),
            live: self.live,
            peak: self.peak,
            free,
            free_blocks,
            nodes: self.nodes,
        }
    }

    pub fn bytes(&self, addr: Addr, len: usize) -> &[u8] {
        if len == 0 {
            return &[];
        }
        &self.buffer[addr.offset()..addr.offset() + len]
    }

    pub fn bytes_mut(&mut self, addr: Addr, len: usize) -> &mut [u8] {
        if len == 0 {
            return &mut [];
        }
        &mut self.buffer[addr.offset()..addr.offset() + len]
    }

    pub(crate) fn read_u32(&self, addr: Addr) -> u32 {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(self.bytes(addr, 4));
        u32::from_le_bytes(bytes)
    }

    pub(crate) fn write_u32(&mut self, addr: Addr, value: u32) {
        self.bytes_mut(addr, 4).copy_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn read_u64(&self, addr: Addr) -> u64 {
        let mut bytes = [0; 8];
        bytes.copy_from_slice(self.bytes(addr, 8));
        u64::from_le_bytes(bytes)
    }

    pub(crate) fn write_u64(&mut self, addr: Addr, value: u64) {
        self.bytes_mut(addr, 8).copy_from_slice(&value.to_le_bytes());
    }

    /// Checks that `size` bytes at `addr` are inside of the arena, aligned, and don't share a
    /// byte with any free block.
    fn check_live(&self, addr: Addr, size: usize) -> Result<()> {
        let start = addr.offset();
        let in_bounds = start
            .checked_add(size)
            .is_some_and(|end| end <= self.capacity());

        if addr == Addr::DANGLING || start % ALIGN != 0 || !in_bounds {
            return Err(self.invalid_free(addr, size));
        }

        let end = start + size;

        for (block, len) in self.free_blocks() {
            let (from, to) = (block.offset(), block.offset() + len);

            if from >= end {
                break;
            }

            if (from..to).contains(&start) {
                tracing::debug!(%addr, "double free");
                return Err(AllocatorFault::DoubleFree { addr });
            }

            if to > start {
                return Err(self.invalid_free(addr, size));
            }
        }

        Ok(())
    }

    fn read_header(&self, block: Addr) -> (Option<Addr>, usize) {
        let next = Addr::from_raw(self.read_u32(block));
        let len = self.read_u32(block.add(4)) as usize;
        (next, len)
    }

    fn write_header(&mut self, block: Addr, next: Option<Addr>, len: usize) {
        self.write_u32(block, next.map_or(NONE, Addr::raw));
        self.write_u32(block.add(4), len as u32);
    }

    /// Points `prev` (or the list head) at `next`.
    fn link(&mut self, prev: Option<Addr>, next: Option<Addr>) {
        match prev {
            Some(block) => self.write_u32(block, next.map_or(NONE, Addr::raw)),
            None => self.head = next,
        }
    }

    fn out_of_memory(&self, requested: usize) -> AllocatorFault {
        let remaining = self.capacity() - self.live;
        tracing::debug!(requested, remaining, "out of memory");
        AllocatorFault::OutOfMemory {
            requested,
            remaining,
        }
    }

    fn invalid_free(&self, addr: Addr, size: usize) -> AllocatorFault {
        tracing::debug!(%addr, size, "invalid free");
        AllocatorFault::InvalidFree { addr, size }
    }
}

pub struct FreeBlocks<'gc> {
    gc: &'gc Gc,
    current: Option<Addr>,
}

impl Iterator for FreeBlocks<'_> {
    type Item = (Addr, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current?;
        let (next, len) = self.gc.read_header(block);
        self.current = next;
        Some((block, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// An arena with nothing but the singletons inside of it.
    fn arena(capacity: usize) -> (Gc, usize) {
        let gc = Gc::new(capacity).unwrap();
        let base = gc.stats().live;
        (gc, base)
    }

    fn assert_accounting(gc: &Gc) {
        let stats = gc.stats();
        assert_eq!(stats.free + stats.live, stats.capacity);

        let blocks = gc.free_blocks().collect::<Vec<_>>();
        for pair in blocks.windows(2) {
            let (a, len) = pair[0];
            let (b, _) = pair[1];
            assert!(a.offset() + len < b.offset(), "{blocks:?} not sorted or not merged");
        }
    }

    #[test]
    fn zero_sized_allocation_is_dangling() {
        let (mut gc, base) = arena(1024);

        assert_eq!(gc.allocate(0).unwrap(), Addr::DANGLING);
        assert_eq!(gc.stats().live, base);
        gc.deallocate(Addr::DANGLING, 0).unwrap();
    }

    #[test]
    fn sizes_are_aligned() {
        let (mut gc, base) = arena(1024);

        let a = gc.allocate(1).unwrap();
        let b = gc.allocate(13).unwrap();
        let c = gc.allocate(8).unwrap();

        assert_eq!(b.offset() - a.offset(), 8);
        assert_eq!(c.offset() - b.offset(), 16);
        assert_eq!(gc.stats().live, base + 32);
        assert_accounting(&gc);
    }

    #[test]
    fn first_fit_takes_the_lowest_block() {
        let (mut gc, _) = arena(1024);

        let a = gc.allocate(32).unwrap();
        let _b = gc.allocate(8).unwrap();
        let c = gc.allocate(64).unwrap();
        let _d = gc.allocate(8).unwrap();

        gc.deallocate(a, 32).unwrap();
        gc.deallocate(c, 64).unwrap();

        // Both holes fit 24 bytes, the lower one wins and keeps an 8 byte remainder.
        let e = gc.allocate(24).unwrap();
        assert_eq!(e, a);

        let blocks = gc.free_blocks().collect::<Vec<_>>();
        assert_eq!(blocks[0], (a.add(24), 8));
        assert_eq!(blocks[1], (c, 64));

        // Only the second hole fits 40 bytes.
        let f = gc.allocate(40).unwrap();
        assert_eq!(f, c);
        assert_accounting(&gc);
    }

    #[test]
    fn exact_fit_consumes_the_block() {
        let (mut gc, _) = arena(1024);

        let a = gc.allocate(16).unwrap();
        let _guard = gc.allocate(8).unwrap();
        gc.deallocate(a, 16).unwrap();

        let before = gc.stats().free_blocks;
        assert_eq!(gc.allocate(16).unwrap(), a);
        assert_eq!(gc.stats().free_blocks, before - 1);
        assert_accounting(&gc);
    }

    #[test]
    fn frees_coalesce_in_any_order() {
        let (mut gc, base) = arena(1024);

        let a = gc.allocate(16).unwrap();
        let b = gc.allocate(16).unwrap();
        let c = gc.allocate(16).unwrap();

        gc.deallocate(c, 16).unwrap();
        gc.deallocate(a, 16).unwrap();
        assert_accounting(&gc);
        gc.deallocate(b, 16).unwrap();

        assert_eq!(gc.stats().live, base);
        assert_eq!(gc.stats().free_blocks, 1);
        assert_accounting(&gc);
    }

    #[test]
    fn double_free_is_detected() {
        let (mut gc, _) = arena(1024);

        let a = gc.allocate(24).unwrap();
        let _guard = gc.allocate(8).unwrap();

        gc.deallocate(a, 24).unwrap();
        assert_eq!(
            gc.deallocate(a, 24),
            Err(AllocatorFault::DoubleFree { addr: a })
        );

        // Freeing from the middle of a free block is a double free too.
        assert_eq!(
            gc.deallocate(a.add(8), 8),
            Err(AllocatorFault::DoubleFree { addr: a.add(8) })
        );
    }

    #[test]
    fn invalid_frees_are_rejected() {
        let (mut gc, _) = arena(1024);

        let a = gc.allocate(16).unwrap();

        assert!(matches!(
            gc.deallocate(a.add(3), 8),
            Err(AllocatorFault::InvalidFree { .. })
        ));
        assert!(matches!(
            gc.deallocate(Addr::new(1024), 8),
            Err(AllocatorFault::InvalidFree { .. })
        ));

        // Overlaps the free block that follows the allocation.
        assert!(matches!(
            gc.deallocate(a, 32),
            Err(AllocatorFault::InvalidFree { .. })
        ));
    }

    #[test]
    fn out_of_memory_is_conservative() {
        let (mut gc, base) = arena(256);
        let remaining = 256 - base;

        // The precheck keeps one header in reserve.
        assert!(matches!(
            gc.allocate(remaining),
            Err(AllocatorFault::OutOfMemory { .. })
        ));
        assert!(matches!(
            gc.allocate(remaining - RESERVED),
            Err(AllocatorFault::OutOfMemory { .. })
        ));
        gc.allocate(remaining - RESERVED - ALIGN).unwrap();
        assert_accounting(&gc);
    }

    #[test]
    fn out_of_memory_when_fragmented() {
        let (mut gc, base) = arena(256);
        let room = 256 - base;

        let holes = (0..3)
            .map(|_| {
                let hole = gc.allocate(16).unwrap();
                gc.allocate(16).unwrap();
                hole
            })
            .collect::<Vec<_>>();

        for hole in holes {
            gc.deallocate(hole, 16).unwrap();
        }

        // Takes the whole tail, leaving three separate 16 byte holes.
        gc.allocate(room - 96).unwrap();

        assert_eq!(gc.stats().free, 48);
        assert_eq!(gc.stats().free_blocks, 3);
        assert!(matches!(
            gc.allocate(32),
            Err(AllocatorFault::OutOfMemory { .. })
        ));
    }

    #[test]
    fn grows_in_place() {
        let (mut gc, _) = arena(1024);

        let a = gc.allocate(16).unwrap();
        let b = gc.reallocate(a, 16, 48).unwrap();

        assert_eq!(a, b);
        assert_accounting(&gc);
    }

    #[test]
    fn grows_by_moving() {
        let (mut gc, base) = arena(1024);

        let a = gc.allocate(16).unwrap();
        gc.bytes_mut(a, 16).copy_from_slice(b"sixteen bytes!!!");
        let _guard = gc.allocate(8).unwrap();

        let b = gc.reallocate(a, 16, 32).unwrap();

        assert_ne!(a, b);
        assert_eq!(gc.bytes(b, 16), b"sixteen bytes!!!");
        assert_eq!(gc.stats().live, base + 32 + 8);
        assert_accounting(&gc);
    }

    #[test]
    fn shrinks_by_freeing_the_tail() {
        let (mut gc, base) = arena(1024);

        let a = gc.allocate(64).unwrap();
        let _guard = gc.allocate(8).unwrap();

        assert_eq!(gc.reallocate(a, 64, 20).unwrap(), a);
        assert_eq!(gc.stats().live, base + 24 + 8);
        assert_eq!(gc.free_blocks().next(), Some((a.add(24), 40)));
        assert_accounting(&gc);
    }

    #[test]
    fn same_size_reallocation_is_a_noop() {
        let (mut gc, _) = arena(1024);

        let a = gc.allocate(10).unwrap();
        let stats = gc.stats();

        assert_eq!(gc.reallocate(a, 10, 16).unwrap(), a);
        assert_eq!(gc.stats(), stats);
    }

    #[test]
    fn reallocating_freed_memory_faults() {
        let (mut gc, _) = arena(1024);

        let a = gc.allocate(16).unwrap();
        gc.deallocate(a, 16).unwrap();
        let stats = gc.stats();

        assert_eq!(
            gc.reallocate(a, 16, 48),
            Err(AllocatorFault::DoubleFree { addr: a })
        );
        assert_eq!(
            gc.reallocate(a, 16, 16),
            Err(AllocatorFault::DoubleFree { addr: a })
        );
        assert_eq!(gc.stats(), stats);

        // Nothing was handed out twice.
        assert_eq!(gc.allocate(16).unwrap(), a);
        assert_ne!(gc.allocate(16).unwrap(), a);
        assert_accounting(&gc);
    }

    #[test]
    fn reallocating_outside_of_an_allocation_faults() {
        let (mut gc, _) = arena(1024);

        assert_eq!(
            gc.reallocate(Addr::DANGLING, 8, 16),
            Err(AllocatorFault::InvalidFree {
                addr: Addr::DANGLING,
                size: 8
            })
        );

        let a = gc.allocate(32).unwrap();
        let _guard = gc.allocate(8).unwrap();
        gc.deallocate(a.add(16), 16).unwrap();

        // The upper half of `a` is free already.
        assert!(matches!(
            gc.reallocate(a, 32, 64),
            Err(AllocatorFault::InvalidFree { .. })
        ));
        assert!(matches!(
            gc.reallocate(a.add(4), 8, 16),
            Err(AllocatorFault::InvalidFree { .. })
        ));
        assert_accounting(&gc);
    }

    #[test]
    fn huge_sizes_fault_instead_of_overflowing() {
        let (mut gc, _) = arena(1024);

        assert!(matches!(
            gc.allocate(usize::MAX),
            Err(AllocatorFault::OutOfMemory { .. })
        ));

        let a = gc.allocate(16).unwrap();
        let stats = gc.stats();

        assert!(matches!(
            gc.deallocate(a, usize::MAX - 3),
            Err(AllocatorFault::InvalidFree { .. })
        ));
        assert!(matches!(
            gc.reallocate(a, 16, usize::MAX),
            Err(AllocatorFault::OutOfMemory { .. })
        ));
        assert!(matches!(
            gc.reallocate(a, usize::MAX, 16),
            Err(AllocatorFault::InvalidFree { .. })
        ));
        assert_eq!(gc.stats(), stats);
    }
}
