use crate::{ranges, Error, Result};
use core::{
    cell::UnsafeCell,
    cmp::min,
    fmt,
    marker::PhantomData,
    mem::{forget, needs_drop, MaybeUninit},
    ops::{Deref, DerefMut},
    ptr::{self, NonNull},
    result::Result as CoreResult,
    slice::{from_raw_parts, from_raw_parts_mut},
    sync::atomic::{
        AtomicBool, AtomicUsize,
        Ordering::{AcqRel, Acquire, Relaxed, Release},
    },
};

/// Cursor state shared between the two sides.
///
/// Kept free of the element type and the capacity so grants can hold a
/// reference to it without dragging `N` along.
struct Control {
    /// First unread element. Owned by the consumer.
    read: AtomicUsize,

    /// One-past the last published element. Owned by the producer; this is
    /// the boundary the consumer trusts.
    committed: AtomicUsize,

    /// One-past the end of the outstanding write reservation. Owned by the
    /// producer, "private"; equals `committed` whenever no write grant is
    /// outstanding.
    reserve: AtomicUsize,

    /// Marks where valid data logically ends when the producer has wrapped
    /// back to offset 0 while the consumer still drains the tail. Equals the
    /// capacity while no wrap is pending. The producer stamps it on the
    /// commit that wraps; the consumer moves it back when its cursor crosses
    /// it.
    watermark: AtomicUsize,

    /// Is there an active read grant?
    read_in_progress: AtomicBool,

    /// Is there an active write grant?
    write_in_progress: AtomicBool,

    /// Have we already split?
    already_split: AtomicBool,
}

impl Control {
    const fn new(capacity: usize) -> Self {
        Self {
            read: AtomicUsize::new(0),
            committed: AtomicUsize::new(0),
            reserve: AtomicUsize::new(0),
            watermark: AtomicUsize::new(capacity),
            read_in_progress: AtomicBool::new(false),
            write_in_progress: AtomicBool::new(false),
            already_split: AtomicBool::new(false),
        }
    }
}

/// A backing structure for a bip buffer over elements of type `T`. Split it
/// into a [`Producer`]/[`Consumer`] pair to move data between two threads
/// without locks or copies.
///
/// Slots only ever hold a live `T` between the `write_commit` that publishes
/// them and the `read_commit` (or [`BipBuffer::clear`] / drop of the buffer)
/// that retires them, so non-trivial element types are dropped exactly once.
pub struct BipBuffer<T, const N: usize> {
    buf: UnsafeCell<MaybeUninit<[T; N]>>,
    ctrl: Control,
}

unsafe impl<T: Send, const N: usize> Sync for BipBuffer<T, N> {}

impl<T, const N: usize> BipBuffer<T, N> {
    /// Create a new empty buffer.
    ///
    /// The storage is embedded and uninitialized; no element is constructed
    /// until a producer commits one. Being a `const fn`, the buffer can be
    /// placed at `static` scope:
    ///
    /// ```rust,no_run
    /// use bipbuf::BipBuffer;
    ///
    /// static BUF: BipBuffer<u8, 64> = BipBuffer::new();
    ///
    /// fn main() {
    ///     let (prod, cons) = BUF.try_split().unwrap();
    /// }
    /// ```
    pub const fn new() -> Self {
        Self {
            buf: UnsafeCell::new(MaybeUninit::uninit()),
            ctrl: Control::new(N),
        }
    }

    /// Returns the size of the backing storage.
    ///
    /// This is the maximum number of elements the buffer can hold; right
    /// after a wrap up to one element's worth of slack is unusable until the
    /// consumer crosses the watermark.
    ///
    /// ```rust
    /// use bipbuf::BipBuffer;
    ///
    /// let buffer: BipBuffer<u32, 6> = BipBuffer::new();
    /// assert_eq!(buffer.capacity(), 6);
    /// assert_eq!(buffer.max_size(), 6);
    /// ```
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Maximum number of elements the buffer can hold. Always equal to
    /// [`BipBuffer::capacity`]; provided for parity with fixed-capacity
    /// container APIs.
    pub const fn max_size(&self) -> usize {
        N
    }

    /// Number of committed elements waiting for the consumer.
    ///
    /// When a wrap is pending this counts both regions, so a single
    /// [`Consumer::read_reserve`] may return fewer contiguous elements than
    /// `len()` reports. The value is exact on the consumer thread; observed
    /// from elsewhere it may lag by in-flight commits.
    pub fn len(&self) -> usize {
        let committed = self.ctrl.committed.load(Acquire);
        let read = self.ctrl.read.load(Acquire);
        let watermark = self.ctrl.watermark.load(Acquire);
        ranges::occupied(read, committed, watermark)
    }

    /// Size of the largest contiguous reservation [`Producer::write_reserve`]
    /// could currently return.
    ///
    /// This is a lower bound on the total free space: after a wrap the free
    /// slots may be split across the two physical ends, and only the run
    /// reachable by the next reservation is reported. The value is exact on
    /// the producer thread; observed from elsewhere it may lag by in-flight
    /// releases.
    pub fn available(&self) -> usize {
        let committed = self.ctrl.committed.load(Acquire);
        let read = self.ctrl.read.load(Acquire);
        ranges::vacant(read, committed, N)
    }

    /// `true` when no committed element is waiting for the consumer.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` when not a single slot can currently be reserved for writing.
    ///
    /// A full buffer holds at least `capacity() - 1` elements; at most one
    /// slot is lost to wrap bookkeeping.
    pub fn is_full(&self) -> bool {
        self.available() == 0
    }

    /// Reset the buffer to empty, dropping any elements still inside.
    ///
    /// This also forgets a previous split, so the buffer can be split anew
    /// afterwards. Requiring `&mut self` makes the compiler prove that no
    /// producer, consumer, or grant is alive while the reset runs; it is not
    /// a concurrent operation.
    ///
    /// ```rust
    /// use bipbuf::BipBuffer;
    ///
    /// let mut buffer: BipBuffer<u32, 4> = BipBuffer::new();
    /// {
    ///     let (mut prod, _cons) = buffer.try_split().unwrap();
    ///     let mut grant = prod.write_reserve(2);
    ///     grant.push(1).unwrap();
    ///     grant.push(2).unwrap();
    ///     prod.write_commit(grant);
    /// }
    ///
    /// buffer.clear();
    /// assert!(buffer.is_empty());
    ///
    /// // The buffer is ready for a fresh split
    /// assert!(buffer.try_split().is_ok());
    /// ```
    pub fn clear(&mut self) {
        self.drop_live();
        self.ctrl.read.store(0, Release);
        self.ctrl.committed.store(0, Release);
        self.ctrl.reserve.store(0, Release);
        self.ctrl.watermark.store(N, Release);
        self.ctrl.read_in_progress.store(false, Release);
        self.ctrl.write_in_progress.store(false, Release);
        self.ctrl.already_split.store(false, Release);
    }

    /// Base pointer of the element storage.
    fn elems(&self) -> *mut MaybeUninit<T> {
        self.buf.get().cast::<MaybeUninit<T>>()
    }

    /// Drop every element currently owned by the buffer. Caller must hold
    /// `&mut self` (no grants outstanding) and reset or stop using the
    /// cursors afterwards.
    fn drop_live(&mut self) {
        if !needs_drop::<T>() {
            return;
        }

        let read = self.ctrl.read.load(Relaxed);
        let committed = self.ctrl.committed.load(Relaxed);
        let watermark = self.ctrl.watermark.load(Relaxed);
        let base = self.buf.get().cast::<T>();

        unsafe {
            if committed >= read {
                ptr::drop_in_place(ptr::slice_from_raw_parts_mut(
                    base.add(read),
                    committed - read,
                ));
            } else {
                ptr::drop_in_place(ptr::slice_from_raw_parts_mut(
                    base.add(read),
                    watermark - read,
                ));
                ptr::drop_in_place(ptr::slice_from_raw_parts_mut(base, committed));
            }
        }
    }
}

impl<'a, T, const N: usize> BipBuffer<T, N> {
    /// Attempt to split the `BipBuffer` into `Producer` and `Consumer` halves
    /// to gain access to the buffer. If the buffer has already been split, an
    /// error will be returned.
    ///
    /// ```rust
    /// use bipbuf::BipBuffer;
    ///
    /// // Create and split a new buffer
    /// let buffer: BipBuffer<u32, 6> = BipBuffer::new();
    /// let (prod, cons) = buffer.try_split().unwrap();
    ///
    /// // Not possible to split twice
    /// assert!(buffer.try_split().is_err());
    /// ```
    pub fn try_split(&'a self) -> Result<(Producer<'a, T, N>, Consumer<'a, T, N>)> {
        if atomic::swap(&self.ctrl.already_split, true, AcqRel) {
            return Err(Error::AlreadySplit);
        }

        unsafe {
            let nn1 = NonNull::new_unchecked(self as *const _ as *mut _);
            let nn2 = NonNull::new_unchecked(self as *const _ as *mut _);

            Ok((
                Producer {
                    bbq: nn1,
                    pd: PhantomData,
                },
                Consumer {
                    bbq: nn2,
                    pd: PhantomData,
                },
            ))
        }
    }

    /// Attempt to release the Producer and Consumer.
    ///
    /// This allows the buffer to be split again later. There must be no read
    /// or write grants active, or an error will be returned. Elements already
    /// committed stay in the buffer; use [`BipBuffer::clear`] to reset it.
    ///
    /// The `Producer` and `Consumer` must be from THIS `BipBuffer`, or an
    /// error will be returned.
    ///
    /// ```rust
    /// use bipbuf::BipBuffer;
    ///
    /// // Create and split a new buffer
    /// let buffer: BipBuffer<u32, 6> = BipBuffer::new();
    /// let (prod, cons) = buffer.try_split().unwrap();
    ///
    /// // Not possible to split twice
    /// assert!(buffer.try_split().is_err());
    ///
    /// // Release the producer and consumer
    /// assert!(buffer.try_release(prod, cons).is_ok());
    ///
    /// // Split the buffer again
    /// assert!(buffer.try_split().is_ok());
    /// ```
    pub fn try_release(
        &'a self,
        prod: Producer<'a, T, N>,
        cons: Consumer<'a, T, N>,
    ) -> CoreResult<(), (Producer<'a, T, N>, Consumer<'a, T, N>)> {
        // Are these our producer and consumer?
        let our_prod = prod.bbq.as_ptr() as *const Self == self;
        let our_cons = cons.bbq.as_ptr() as *const Self == self;

        if !(our_prod && our_cons) {
            // Can't release, not our producer and consumer
            return Err((prod, cons));
        }

        let wr_in_progress = self.ctrl.write_in_progress.load(Acquire);
        let rd_in_progress = self.ctrl.read_in_progress.load(Acquire);

        if wr_in_progress || rd_in_progress {
            // Can't release, active grant(s) in progress
            return Err((prod, cons));
        }

        // Drop the producer and consumer halves
        drop(prod);
        drop(cons);

        // Mark the buffer as ready to be split
        self.ctrl.already_split.store(false, Release);

        Ok(())
    }
}

impl<T, const N: usize> fmt::Debug for BipBuffer<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BipBuffer")
            .field("capacity", &N)
            .field("read", &self.ctrl.read.load(Relaxed))
            .field("committed", &self.ctrl.committed.load(Relaxed))
            .field("reserve", &self.ctrl.reserve.load(Relaxed))
            .field("watermark", &self.ctrl.watermark.load(Relaxed))
            .finish()
    }
}

impl<T, const N: usize> Drop for BipBuffer<T, N> {
    fn drop(&mut self) {
        self.drop_live();
    }
}

/// `Producer` is the interface for pushing data into a [`BipBuffer`].
///
/// The producer reserves a contiguous block of slots with
/// [`write_reserve`](Producer::write_reserve), fills it in place, and
/// publishes the filled prefix with [`write_commit`](Producer::write_commit).
/// Reservations may come back smaller than requested: as all grants are
/// contiguous, a request that does not fit before the physical end of the
/// storage is either satisfied by the remaining tail run or moved to the
/// freed front of the buffer, whichever is larger.
pub struct Producer<'a, T, const N: usize> {
    bbq: NonNull<BipBuffer<T, N>>,
    pd: PhantomData<&'a ()>,
}

unsafe impl<'a, T: Send, const N: usize> Send for Producer<'a, T, N> {}

impl<'a, T: 'a, const N: usize> Producer<'a, T, N> {
    fn inner(&self) -> &'a BipBuffer<T, N> {
        unsafe { &*self.bbq.as_ptr() }
    }

    /// Request a writable, contiguous section of memory of up to `max`
    /// slots. The returned grant covers `min(max, run)` slots, where `run`
    /// is the largest contiguous free run reachable right now; it is empty
    /// when no space is available, which is the signal to retry later.
    /// This call never blocks.
    ///
    /// Reserving is free of side effects: until the grant is committed (or
    /// dropped), [`BipBuffer::len`] and [`BipBuffer::available`] are
    /// unchanged. Only one write grant may be outstanding at a time;
    /// reserving again while one is live is a caller bug and trips a debug
    /// assertion.
    ///
    /// ```rust
    /// use bipbuf::BipBuffer;
    ///
    /// // Create and split a new buffer of 6 elements
    /// let buffer: BipBuffer<u32, 6> = BipBuffer::new();
    /// let (mut prod, _cons) = buffer.try_split().unwrap();
    ///
    /// // Reserve and publish four elements
    /// let mut grant = prod.write_reserve(4);
    /// assert_eq!(grant.capacity(), 4);
    /// for i in 0..4 {
    ///     grant.push(i).unwrap();
    /// }
    /// prod.write_commit(grant);
    ///
    /// // Ask for three more, get the remaining two
    /// let grant = prod.write_reserve(3);
    /// assert_eq!(grant.capacity(), 2);
    /// ```
    pub fn write_reserve(&mut self, max: usize) -> WriteGrant<'a, T> {
        let inner = self.inner();

        if atomic::swap(&inner.ctrl.write_in_progress, true, AcqRel) {
            debug_assert!(false, "write reservation already outstanding");
            return WriteGrant::detached();
        }

        // Writer component. Must never write to `read`.
        let committed = inner.ctrl.committed.load(Acquire);
        let read = inner.ctrl.read.load(Acquire);

        let span = ranges::write_span(committed, read, N, max);

        if span.len == 0 {
            inner.ctrl.write_in_progress.store(false, Release);
            return WriteGrant::detached();
        }

        // Only consulted again by our own commit; the consumer never reads it
        inner.ctrl.reserve.store(span.start + span.len, Relaxed);

        debug_assert!(span.start + span.len <= N);
        let ptr = unsafe { NonNull::new_unchecked(inner.elems().add(span.start)) };

        WriteGrant {
            ptr,
            cap: span.len,
            filled: 0,
            start: span.start,
            ctrl: Some(&inner.ctrl),
        }
    }

    /// Publish the filled prefix of a grant given by
    /// [`write_reserve`](Producer::write_reserve), making those elements
    /// visible to the consumer. Committing a grant with nothing written into
    /// it is a no-op.
    ///
    /// ```rust
    /// use bipbuf::BipBuffer;
    ///
    /// let buffer: BipBuffer<u32, 6> = BipBuffer::new();
    /// let (mut prod, mut cons) = buffer.try_split().unwrap();
    ///
    /// // Reserve four slots, but only fill two of them
    /// let mut grant = prod.write_reserve(4);
    /// grant.push(7).unwrap();
    /// grant.push(8).unwrap();
    /// prod.write_commit(grant);
    ///
    /// // Exactly the filled prefix was published
    /// let grant = cons.read_reserve(usize::MAX);
    /// assert_eq!(&*grant, &[7, 8]);
    /// ```
    pub fn write_commit(&mut self, grant: WriteGrant<'a, T>) {
        let inner = self.inner();

        let ctrl = match grant.ctrl {
            Some(ctrl) => ctrl,
            None => {
                // Nothing was ever reserved
                forget(grant);
                return;
            }
        };
        debug_assert!(ptr::eq(ctrl, &inner.ctrl), "grant from a different buffer");

        let start = grant.start;
        let used = grant.filled;
        forget(grant);

        // Writer component. Must never write to `read`,
        // be careful writing to `watermark`
        let committed = inner.ctrl.committed.load(Acquire);
        debug_assert!(start + used <= inner.ctrl.reserve.load(Relaxed));

        if used > 0 {
            if start != committed {
                // This commit wrapped: the tail slots past `committed` are
                // abandoned until the consumer crosses the watermark
                inner.ctrl.watermark.store(committed, Release);
            }
            let end = start + used;
            inner.ctrl.reserve.store(end, Relaxed);
            // `committed` must be updated AFTER the watermark, otherwise the
            // consumer could conclude a wrap happened before knowing where
            // the valid data ends
            inner.ctrl.committed.store(end, Release);
        } else {
            inner.ctrl.reserve.store(committed, Relaxed);
        }

        // Allow subsequent grants
        inner.ctrl.write_in_progress.store(false, Release);
    }

    /// Producer-side view of [`BipBuffer::available`].
    pub fn available(&self) -> usize {
        self.inner().available()
    }

    /// Producer-side view of [`BipBuffer::is_full`].
    pub fn is_full(&self) -> bool {
        self.inner().is_full()
    }

    /// Returns the size of the backing storage.
    pub fn capacity(&self) -> usize {
        N
    }
}

/// `Consumer` is the interface for reading data from a [`BipBuffer`].
pub struct Consumer<'a, T, const N: usize> {
    bbq: NonNull<BipBuffer<T, N>>,
    pd: PhantomData<&'a ()>,
}

unsafe impl<'a, T: Send, const N: usize> Send for Consumer<'a, T, N> {}

impl<'a, T: 'a, const N: usize> Consumer<'a, T, N> {
    fn inner(&self) -> &'a BipBuffer<T, N> {
        unsafe { &*self.bbq.as_ptr() }
    }

    /// Obtain a contiguous view of up to `max` committed elements. The view
    /// may not contain ALL committed elements if the producer has wrapped
    /// around; the remaining elements are served once the view preceding the
    /// wrap has been consumed. Returns an empty grant when nothing is
    /// committed; never blocks.
    ///
    /// Only one read grant may be outstanding at a time; reserving again
    /// while one is live is a caller bug and trips a debug assertion.
    ///
    /// ```rust
    /// use bipbuf::BipBuffer;
    ///
    /// let buffer: BipBuffer<u32, 6> = BipBuffer::new();
    /// let (mut prod, mut cons) = buffer.try_split().unwrap();
    ///
    /// // Nothing committed yet
    /// let grant = cons.read_reserve(1);
    /// assert!(grant.is_empty());
    /// drop(grant);
    ///
    /// let mut wgrant = prod.write_reserve(2);
    /// wgrant.push(11).unwrap();
    /// wgrant.push(22).unwrap();
    /// prod.write_commit(wgrant);
    ///
    /// let grant = cons.read_reserve(2);
    /// assert_eq!(&*grant, &[11, 22]);
    /// cons.read_commit(grant);
    /// ```
    pub fn read_reserve(&mut self, max: usize) -> ReadGrant<'a, T> {
        let inner = self.inner();

        if atomic::swap(&inner.ctrl.read_in_progress, true, AcqRel) {
            debug_assert!(false, "read reservation already outstanding");
            return ReadGrant::detached();
        }

        let committed = inner.ctrl.committed.load(Acquire);
        let read = inner.ctrl.read.load(Acquire);
        let watermark = inner.ctrl.watermark.load(Acquire);

        let span = ranges::read_span(read, committed, watermark, max);

        if span.crossed {
            // The tail is fully drained: step back to offset 0 and retire
            // the watermark. The producer cannot be writing the front region
            // while our cursor is still parked on the watermark.
            // MOVING READ BACKWARDS!
            inner.ctrl.read.store(0, Release);
            inner.ctrl.watermark.store(N, Release);
        }

        if span.len == 0 {
            inner.ctrl.read_in_progress.store(false, Release);
            return ReadGrant::detached();
        }

        let ptr = unsafe { NonNull::new_unchecked(inner.elems().add(span.start).cast::<T>()) };

        ReadGrant {
            ptr,
            len: span.len,
            start: span.start,
            ctrl: Some(&inner.ctrl),
        }
    }

    /// Consume the elements of a grant given by
    /// [`read_reserve`](Consumer::read_reserve): drop them in place and hand
    /// their slots back to the producer. Truncate the grant first to consume
    /// only part of it; the rest is served again by the next reservation.
    ///
    /// ```rust
    /// use bipbuf::BipBuffer;
    ///
    /// let buffer: BipBuffer<u32, 6> = BipBuffer::new();
    /// let (mut prod, mut cons) = buffer.try_split().unwrap();
    ///
    /// let mut wgrant = prod.write_reserve(3);
    /// for i in 1..=3 {
    ///     wgrant.push(i).unwrap();
    /// }
    /// prod.write_commit(wgrant);
    ///
    /// // Consume only the first element
    /// let mut grant = cons.read_reserve(3);
    /// grant.truncate(1);
    /// assert_eq!(&*grant, &[1]);
    /// cons.read_commit(grant);
    ///
    /// // The rest is still there
    /// let grant = cons.read_reserve(3);
    /// assert_eq!(&*grant, &[2, 3]);
    /// ```
    pub fn read_commit(&mut self, grant: ReadGrant<'a, T>) {
        let inner = self.inner();

        let ctrl = match grant.ctrl {
            Some(ctrl) => ctrl,
            None => {
                // Nothing was ever reserved
                forget(grant);
                return;
            }
        };
        debug_assert!(ptr::eq(ctrl, &inner.ctrl), "grant from a different buffer");

        let data = grant.ptr;
        let used = grant.len;
        let start = grant.start;
        forget(grant);

        debug_assert_eq!(inner.ctrl.read.load(Relaxed), start);

        // Destructors must finish before the slots are handed back to the
        // producer
        if needs_drop::<T>() {
            unsafe {
                ptr::drop_in_place(ptr::slice_from_raw_parts_mut(data.as_ptr(), used));
            }
        }

        // This should be fine, purely incrementing
        let _ = atomic::fetch_add(&inner.ctrl.read, used, Release);

        inner.ctrl.read_in_progress.store(false, Release);
    }

    /// Consumer-side view of [`BipBuffer::len`].
    pub fn len(&self) -> usize {
        self.inner().len()
    }

    /// Consumer-side view of [`BipBuffer::is_empty`].
    pub fn is_empty(&self) -> bool {
        self.inner().is_empty()
    }

    /// Returns the size of the backing storage.
    pub fn capacity(&self) -> usize {
        N
    }
}

/// A contiguous block of reserved slots that may be filled with elements and
/// then committed to the queue with [`Producer::write_commit`].
///
/// The grant tracks how many slots have been filled and the commit publishes
/// exactly that prefix. `Deref`/`DerefMut` expose the filled prefix as a
/// slice. Dropping the grant without committing abandons the reservation and
/// drops any values already written into it.
pub struct WriteGrant<'a, T> {
    ptr: NonNull<MaybeUninit<T>>,
    cap: usize,
    filled: usize,
    start: usize,
    ctrl: Option<&'a Control>,
}

unsafe impl<'a, T: Send> Send for WriteGrant<'a, T> {}

impl<'a, T> WriteGrant<'a, T> {
    /// A grant over no slots, carrying no reservation.
    fn detached() -> Self {
        WriteGrant {
            ptr: NonNull::dangling(),
            cap: 0,
            filled: 0,
            start: 0,
            ctrl: None,
        }
    }

    /// Number of slots reserved. Zero means the buffer had no contiguous
    /// space; retry later.
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Number of elements written into the grant so far. This is what a
    /// commit will publish.
    pub fn len(&self) -> usize {
        self.filled
    }

    /// `true` while no element has been written into the grant.
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Number of reserved slots not yet filled.
    pub fn remaining(&self) -> usize {
        self.cap - self.filled
    }

    /// Move one element into the next free slot. Returns the value back when
    /// every reserved slot is already filled.
    pub fn push(&mut self, val: T) -> CoreResult<(), T> {
        if self.filled == self.cap {
            return Err(val);
        }
        unsafe {
            self.ptr.as_ptr().add(self.filled).write(MaybeUninit::new(val));
        }
        self.filled += 1;
        Ok(())
    }

    /// Clone elements from `src` into the free slots, front to back, until
    /// either runs out. Returns how many were written.
    pub fn extend_from_slice(&mut self, src: &[T]) -> usize
    where
        T: Clone,
    {
        let n = min(self.remaining(), src.len());
        for val in &src[..n] {
            unsafe {
                self.ptr
                    .as_ptr()
                    .add(self.filled)
                    .write(MaybeUninit::new(val.clone()));
            }
            self.filled += 1;
        }
        n
    }

    /// Retract elements beyond the first `len` written ones, dropping them.
    /// A later commit publishes only what remains.
    pub fn truncate(&mut self, len: usize) {
        while self.filled > len {
            self.filled -= 1;
            unsafe {
                ptr::drop_in_place(self.ptr.as_ptr().add(self.filled).cast::<T>());
            }
        }
    }

    /// The reserved slots past the filled prefix, for bulk initialization
    /// (e.g. by a DMA engine or `ptr::copy`). Pair with
    /// [`set_len`](WriteGrant::set_len).
    pub fn spare_capacity_mut(&mut self) -> &mut [MaybeUninit<T>] {
        unsafe { from_raw_parts_mut(self.ptr.as_ptr().add(self.filled), self.remaining()) }
    }

    /// Declare the first `new_len` slots of the grant initialized.
    ///
    /// # Safety
    ///
    /// `new_len` must not exceed [`capacity`](WriteGrant::capacity), and the
    /// first `new_len` slots must each hold a valid `T`. Shrinking below the
    /// current length forgets elements without dropping them.
    pub unsafe fn set_len(&mut self, new_len: usize) {
        debug_assert!(new_len <= self.cap);
        self.filled = new_len;
    }
}

impl<'a, T> Drop for WriteGrant<'a, T> {
    fn drop(&mut self) {
        let ctrl = match self.ctrl {
            Some(ctrl) => ctrl,
            None => return,
        };

        // Abandoned reservation: retract anything already written, then roll
        // the reservation back so the slots are reserveable again
        self.truncate(0);
        ctrl.reserve.store(ctrl.committed.load(Relaxed), Relaxed);
        ctrl.write_in_progress.store(false, Release);
    }
}

impl<'a, T> Deref for WriteGrant<'a, T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        unsafe { from_raw_parts(self.ptr.as_ptr().cast::<T>(), self.filled) }
    }
}

impl<'a, T> DerefMut for WriteGrant<'a, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        unsafe { from_raw_parts_mut(self.ptr.as_ptr().cast::<T>(), self.filled) }
    }
}

impl<'a, T> fmt::Debug for WriteGrant<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteGrant")
            .field("start", &self.start)
            .field("capacity", &self.cap)
            .field("filled", &self.filled)
            .finish()
    }
}

/// A contiguous view of committed elements, consumed with
/// [`Consumer::read_commit`].
///
/// `Deref` exposes the elements as a slice;
/// [`truncate`](ReadGrant::truncate) acknowledges partial consumption.
/// Dropping the grant without committing abandons the reservation and
/// consumes nothing.
pub struct ReadGrant<'a, T> {
    ptr: NonNull<T>,
    len: usize,
    start: usize,
    ctrl: Option<&'a Control>,
}

unsafe impl<'a, T: Send> Send for ReadGrant<'a, T> {}

impl<'a, T> ReadGrant<'a, T> {
    /// A grant over no elements, carrying no reservation.
    fn detached() -> Self {
        ReadGrant {
            ptr: NonNull::dangling(),
            len: 0,
            start: 0,
            ctrl: None,
        }
    }

    /// Number of elements in the view. Zero means nothing was committed;
    /// retry later.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` when the view holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Keep only the first `len` elements in the view. The commit then
    /// consumes just those; the rest is served again by the next
    /// reservation.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
        }
    }
}

impl<'a, T> Drop for ReadGrant<'a, T> {
    fn drop(&mut self) {
        if let Some(ctrl) = self.ctrl {
            // Abandoned reservation: nothing was consumed
            ctrl.read_in_progress.store(false, Release);
        }
    }
}

impl<'a, T> Deref for ReadGrant<'a, T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        unsafe { from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<'a, T> fmt::Debug for ReadGrant<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadGrant")
            .field("start", &self.start)
            .field("len", &self.len)
            .finish()
    }
}

/// Producer-side contract of a bip buffer, independent of the buffer's
/// compile-time capacity.
///
/// [`Producer`] implements this for every capacity, so code that feeds a
/// buffer can be written against `&mut dyn BipWriter<'a, T>` and reused with
/// buffers of any size:
///
/// ```rust
/// use bipbuf::{BipBuffer, BipWriter};
///
/// fn feed(writer: &mut dyn BipWriter<u32>, vals: &[u32]) -> usize {
///     let mut grant = writer.write_reserve(vals.len());
///     let n = grant.extend_from_slice(vals);
///     writer.write_commit(grant);
///     n
/// }
///
/// let buffer: BipBuffer<u32, 8> = BipBuffer::new();
/// let (mut prod, _cons) = buffer.try_split().unwrap();
/// assert_eq!(feed(&mut prod, &[1, 2, 3]), 3);
/// ```
pub trait BipWriter<'a, T> {
    /// See [`Producer::write_reserve`].
    fn write_reserve(&mut self, max: usize) -> WriteGrant<'a, T>;

    /// See [`Producer::write_commit`].
    fn write_commit(&mut self, grant: WriteGrant<'a, T>);

    /// See [`Producer::available`].
    fn available(&self) -> usize;

    /// Fixed capacity of the underlying buffer.
    fn capacity(&self) -> usize;

    /// `true` when not a single slot can currently be reserved.
    fn is_full(&self) -> bool {
        self.available() == 0
    }
}

impl<'a, T: 'a, const N: usize> BipWriter<'a, T> for Producer<'a, T, N> {
    fn write_reserve(&mut self, max: usize) -> WriteGrant<'a, T> {
        Producer::write_reserve(self, max)
    }

    fn write_commit(&mut self, grant: WriteGrant<'a, T>) {
        Producer::write_commit(self, grant)
    }

    fn available(&self) -> usize {
        Producer::available(self)
    }

    fn capacity(&self) -> usize {
        Producer::capacity(self)
    }
}

/// Consumer-side contract of a bip buffer, independent of the buffer's
/// compile-time capacity. The counterpart of [`BipWriter`].
pub trait BipReader<'a, T> {
    /// See [`Consumer::read_reserve`].
    fn read_reserve(&mut self, max: usize) -> ReadGrant<'a, T>;

    /// See [`Consumer::read_commit`].
    fn read_commit(&mut self, grant: ReadGrant<'a, T>);

    /// See [`Consumer::len`].
    fn len(&self) -> usize;

    /// Fixed capacity of the underlying buffer.
    fn capacity(&self) -> usize;

    /// `true` when no committed element is waiting.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a, T: 'a, const N: usize> BipReader<'a, T> for Consumer<'a, T, N> {
    fn read_reserve(&mut self, max: usize) -> ReadGrant<'a, T> {
        Consumer::read_reserve(self, max)
    }

    fn read_commit(&mut self, grant: ReadGrant<'a, T>) {
        Consumer::read_commit(self, grant)
    }

    fn len(&self) -> usize {
        Consumer::len(self)
    }

    fn capacity(&self) -> usize {
        Consumer::capacity(self)
    }
}

#[cfg(feature = "thumbv6")]
mod atomic {
    use core::sync::atomic::{
        AtomicBool, AtomicUsize,
        Ordering::{self, Acquire, Release},
    };
    use cortex_m::interrupt::free;

    #[inline(always)]
    pub fn fetch_add(atomic: &AtomicUsize, val: usize, _order: Ordering) -> usize {
        free(|_| {
            let prev = atomic.load(Acquire);
            atomic.store(prev.wrapping_add(val), Release);
            prev
        })
    }

    #[inline(always)]
    pub fn swap(atomic: &AtomicBool, val: bool, _order: Ordering) -> bool {
        free(|_| {
            let prev = atomic.load(Acquire);
            atomic.store(val, Release);
            prev
        })
    }
}

#[cfg(not(feature = "thumbv6"))]
mod atomic {
    use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[inline(always)]
    pub fn fetch_add(atomic: &AtomicUsize, val: usize, order: Ordering) -> usize {
        atomic.fetch_add(val, order)
    }

    #[inline(always)]
    pub fn swap(atomic: &AtomicBool, val: bool, order: Ordering) -> bool {
        atomic.swap(val, order)
    }
}
