//! Memory arena provider for engine-internal buffers.
//!
//! Every isolate is created with one [`ArrayBufferAllocator`] and must use that
//! same provider for every allocate/free pair during its lifetime. Hosts that
//! supply no provider share the process-wide [`default_allocator`].

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Byte allocation strategy used by an engine for array buffer backing stores.
pub trait ArrayBufferAllocator: Send + Sync {
    /// Allocate `len` zero-initialized bytes.
    fn allocate(&self, len: usize) -> Option<NonNull<u8>>;

    /// Allocate `len` bytes without initializing them.
    fn allocate_uninitialized(&self, len: usize) -> Option<NonNull<u8>>;

    /// Release a block.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator for exactly `len` bytes
    /// and must not be used afterwards.
    unsafe fn free(&self, ptr: NonNull<u8>, len: usize);
}

/// Process heap allocator with optional byte limit and usage tracking.
#[derive(Debug)]
pub struct DefaultAllocator {
    max_bytes: Option<usize>,
    allocated_bytes: AtomicUsize,
}

impl DefaultAllocator {
    /// Allocator with no memory limit.
    pub fn unlimited() -> Self {
        DefaultAllocator {
            max_bytes: None,
            allocated_bytes: AtomicUsize::new(0),
        }
    }

    /// Allocator that refuses requests past `max_bytes` outstanding.
    pub fn with_limit(max_bytes: usize) -> Self {
        DefaultAllocator {
            max_bytes: Some(max_bytes),
            allocated_bytes: AtomicUsize::new(0),
        }
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.load(Ordering::Acquire)
    }

    pub fn max_bytes(&self) -> Option<usize> {
        self.max_bytes
    }

    fn reserve(&self, len: usize) -> bool {
        let mut current = self.allocated_bytes.load(Ordering::Acquire);
        loop {
            let next = match current.checked_add(len) {
                Some(n) => n,
                None => return false,
            };
            if let Some(max) = self.max_bytes {
                if next > max {
                    return false;
                }
            }
            match self.allocated_bytes.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, len: usize) {
        self.allocated_bytes.fetch_sub(len, Ordering::AcqRel);
    }

    fn raw_allocate(&self, len: usize, zeroed: bool) -> Option<NonNull<u8>> {
        if len == 0 {
            return Some(NonNull::dangling());
        }
        if !self.reserve(len) {
            return None;
        }
        let layout = match Layout::from_size_align(len, 1) {
            Ok(l) => l,
            Err(_) => {
                self.release(len);
                return None;
            }
        };
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe {
            if zeroed {
                alloc::alloc_zeroed(layout)
            } else {
                alloc::alloc(layout)
            }
        };
        let ptr = NonNull::new(ptr);
        if ptr.is_none() {
            self.release(len);
        }
        ptr
    }
}

impl Default for DefaultAllocator {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl ArrayBufferAllocator for DefaultAllocator {
    fn allocate(&self, len: usize) -> Option<NonNull<u8>> {
        self.raw_allocate(len, true)
    }

    fn allocate_uninitialized(&self, len: usize) -> Option<NonNull<u8>> {
        self.raw_allocate(len, false)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, len: usize) {
        if len == 0 {
            return;
        }
        // Same size and alignment as the allocation.
        let layout = Layout::from_size_align_unchecked(len, 1);
        alloc::dealloc(ptr.as_ptr(), layout);
        self.release(len);
    }
}

lazy_static! {
    static ref DEFAULT_ALLOCATOR: Arc<DefaultAllocator> = Arc::new(DefaultAllocator::unlimited());
}

/// The allocator shared by every self-created isolate whose host supplied none.
///
/// Initialized on first use and immutable afterwards apart from its usage counter.
pub fn default_allocator() -> Arc<dyn ArrayBufferAllocator> {
    DEFAULT_ALLOCATOR.clone()
}
