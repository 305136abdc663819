use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use std::ptr::NonNull;

pub const CACHE_LINE_SIZE: usize = 64;

/// Arena alignment, two cache lines to also keep adjacent-line prefetch away from the
/// first frame.
pub const ARENA_ALIGNMENT: usize = 2 * CACHE_LINE_SIZE;

/// Fixed size, zero initialised and aligned block of memory that backs the ring buffer.
/// It is allocated once and released on drop.
#[derive(Debug)]
pub(crate) struct Arena {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Arena {
    /// Allocate zeroed arena of `size` bytes.
    ///
    /// ## Panics
    /// When `size` is zero or the layout is invalid.
    pub(crate) fn new(size: usize) -> Self {
        assert!(size > 0, "arena size must be greater than zero");
        let layout = Layout::from_size_align(size, ARENA_ALIGNMENT).expect("invalid arena layout");
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            handle_alloc_error(layout)
        };
        Self { ptr, layout }
    }

    #[inline]
    pub(crate) const fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    #[cfg(test)]
    pub(crate) const fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}
