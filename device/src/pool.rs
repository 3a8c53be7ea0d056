//! Bounded pool of reusable objects.
//!
//! Objects are handed out as [Pooled] handles and return to the pool when the handle is dropped
//! (or passed to [Pool::put], which consumes it). Because a handle cannot be copied, an object can
//! only be returned once.
//!
//! # Thread Safety
//!
//! [Pool] is `Send + Sync` (for `T: Send`) and can be shared across threads. Allocation and
//! return are lock-free, using atomic counters and a lock-free queue
//! ([`crossbeam_queue::ArrayQueue`]).
//!
//! # Pool Lifecycle
//!
//! Handles hold a weak reference to the pool, so:
//! - If a handle is dropped after the pool is dropped, its object is freed instead of being
//!   returned to the freelist.
//! - The pool can be dropped while handles are still in use.
//!
//! # Slots
//!
//! A pool has a fixed number of slots. Idle objects wait in the freelist and are always reused
//! before a new object is constructed; new objects are built lazily, one per slot, until every
//! slot has been filled.
//!
//! When every slot is checked out, [Pool::try_get] returns [Error::Exhausted] and [Pool::get]
//! falls back to an untracked object that is freed (not returned) when dropped.

use crate::Error;
use crossbeam_queue::ArrayQueue;
use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};
use std::{
    mem::ManuallyDrop,
    num::NonZeroUsize,
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
};
use tracing::trace;

/// An object that can be reused after being returned to a [Pool].
pub trait Reset {
    /// Release anything the object holds from its previous use.
    ///
    /// Called exactly once each time the object returns to its pool.
    fn reset(&mut self);
}

/// Metrics for a pool.
struct PoolMetrics {
    /// Number of objects currently checked out of the pool.
    allocated: Gauge,
    /// Number of idle objects waiting in the pool.
    available: Gauge,
    /// Total number of successful tracked allocations.
    allocations_total: Counter,
    /// Total number of allocations that found every slot in use.
    exhausted_total: Counter,
}

impl PoolMetrics {
    fn new(registry: &mut Registry) -> Self {
        let metrics = Self {
            allocated: Gauge::default(),
            available: Gauge::default(),
            allocations_total: Counter::default(),
            exhausted_total: Counter::default(),
        };

        registry.register(
            "allocated",
            "Number of objects currently checked out of the pool",
            metrics.allocated.clone(),
        );
        registry.register(
            "available",
            "Number of idle objects waiting in the pool",
            metrics.available.clone(),
        );
        registry.register(
            "allocations_total",
            "Total number of successful tracked allocations",
            metrics.allocations_total.clone(),
        );
        registry.register(
            "exhausted_total",
            "Total number of allocations that found every slot in use",
            metrics.exhausted_total.clone(),
        );

        metrics
    }
}

/// Internal state of the pool.
pub(crate) struct PoolInner<T> {
    name: &'static str,
    init: fn() -> T,
    /// Idle objects ready for reuse.
    freelist: ArrayQueue<T>,
    /// Number of slots that have been filled with an object (never exceeds the capacity).
    created: AtomicUsize,
    /// Number of tracked objects checked out.
    outstanding: AtomicUsize,
    metrics: PoolMetrics,
}

impl<T: Reset> PoolInner<T> {
    /// Try to take an idle object, or fill an unused slot with a new one.
    fn try_get(&self) -> Option<T> {
        // Reuse an idle object
        if let Some(item) = self.freelist.pop() {
            self.outstanding.fetch_add(1, Ordering::AcqRel);
            self.metrics.allocations_total.inc();
            self.metrics.allocated.inc();
            self.metrics.available.dec();
            return Some(item);
        }

        // Create a new object (if we have a slot)
        let capacity = self.freelist.capacity();
        let claimed = self
            .created
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |created| {
                (created < capacity).then_some(created + 1)
            });
        if claimed.is_err() {
            self.metrics.exhausted_total.inc();
            return None;
        }
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        self.metrics.allocations_total.inc();
        self.metrics.allocated.inc();
        Some((self.init)())
    }

    /// Return an object to the freelist.
    fn put(&self, mut item: T) {
        item.reset();

        let previous = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "{} pool received an object it never handed out", self.name);
        self.metrics.allocated.dec();

        // Every tracked object owns a slot, so the freelist cannot be full
        if self.freelist.push(item).is_ok() {
            self.metrics.available.inc();
        }
    }
}

/// A bounded pool of reusable objects.
pub struct Pool<T: Reset> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Reset> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Reset> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.name)
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

impl<T: Reset> Pool<T> {
    /// Creates a pool with `size` slots, registering its metrics under `name`.
    ///
    /// `init` constructs a new object whenever a free slot (or an untracked fallback) needs one.
    /// If `prefill` is set, every slot is filled up front.
    pub fn new(
        name: &'static str,
        size: NonZeroUsize,
        prefill: bool,
        registry: &mut Registry,
        init: fn() -> T,
    ) -> Self {
        let metrics = PoolMetrics::new(registry.sub_registry_with_prefix(name));

        let freelist = ArrayQueue::new(size.get());
        let created = if prefill { size.get() } else { 0 };
        for _ in 0..created {
            let _ = freelist.push(init());
        }
        metrics.available.set(created as i64);

        Self {
            inner: Arc::new(PoolInner {
                name,
                init,
                freelist,
                created: AtomicUsize::new(created),
                outstanding: AtomicUsize::new(0),
                metrics,
            }),
        }
    }

    /// Takes an object from the pool, never blocking.
    ///
    /// If every slot is checked out, falls back to an untracked object that is freed (rather
    /// than returned) when dropped. Use [Self::try_get] to distinguish the two cases.
    pub fn get(&self) -> Pooled<T> {
        self.try_get().unwrap_or_else(|_| {
            trace!(pool = self.inner.name, "pool exhausted, allocating untracked object");
            // Using Weak::new() means the object won't be returned to the pool on drop.
            Pooled::new((self.inner.init)(), Weak::new())
        })
    }

    /// Takes an object from the pool.
    ///
    /// # Errors
    ///
    /// - [Error::Exhausted]: every slot is checked out
    pub fn try_get(&self) -> Result<Pooled<T>, Error> {
        let item = self.inner.try_get().ok_or(Error::Exhausted)?;
        Ok(Pooled::new(item, Arc::downgrade(&self.inner)))
    }

    /// Returns an object to the pool.
    ///
    /// Equivalent to dropping the handle: the object always goes back to the pool it was drawn
    /// from. Returning a handle to a different pool is a contract violation (checked in debug
    /// builds).
    pub fn put(&self, item: Pooled<T>) {
        debug_assert!(
            !item.is_tracked() || Weak::ptr_eq(&item.pool, &Arc::downgrade(&self.inner)),
            "object returned to {} pool was drawn from another pool",
            self.inner.name
        );
        drop(item);
    }

    /// Returns the number of idle objects waiting in the pool.
    pub fn available(&self) -> usize {
        self.inner.freelist.len()
    }

    /// Returns the number of tracked objects currently checked out.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Returns the number of slots in the pool.
    pub fn capacity(&self) -> usize {
        self.inner.freelist.capacity()
    }

    /// Returns the name the pool's metrics are registered under.
    pub fn name(&self) -> &'static str {
        self.inner.name
    }
}

/// A handle to an object drawn from a [Pool].
///
/// When dropped, the object is reset and returned to its pool if tracked, or freed directly if
/// untracked (fallback allocations, or a pool that no longer exists).
pub struct Pooled<T: Reset> {
    item: ManuallyDrop<T>,
    pool: Weak<PoolInner<T>>,
}

impl<T: Reset> Pooled<T> {
    const fn new(item: T, pool: Weak<PoolInner<T>>) -> Self {
        Self {
            item: ManuallyDrop::new(item),
            pool,
        }
    }

    /// Returns `true` if this object will be returned to a pool when dropped.
    #[inline]
    pub fn is_tracked(&self) -> bool {
        self.pool.strong_count() > 0
    }
}

impl<T: Reset> Deref for Pooled<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.item
    }
}

impl<T: Reset> DerefMut for Pooled<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.item
    }
}

impl<T: Reset + std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled")
            .field("item", &*self.item)
            .field("tracked", &self.is_tracked())
            .finish()
    }
}

impl<T: Reset> Drop for Pooled<T> {
    fn drop(&mut self) {
        // SAFETY: Drop is only called once and `item` is not accessed afterwards.
        let item = unsafe { ManuallyDrop::take(&mut self.item) };
        if let Some(pool) = self.pool.upgrade() {
            pool.put(item);
        }
        // else: item is dropped here
    }
}
