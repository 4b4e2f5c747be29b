use std::cell::UnsafeCell;

/// Storage for the wrapped resource.
///
/// The cell performs no synchronization of its own. It trusts that whoever
/// calls into it holds the matching admission from the
/// [Coordinator][crate::coordinator::Coordinator].
pub struct ResourceCell<T> {
    value: UnsafeCell<T>,
}

// Safety: the cell hands out `&T` to any number of threads at once and `&mut T`
// to one thread at a time, which is exactly what `Send + Sync` permits.
unsafe impl<T> Sync for ResourceCell<T> where T: Send + Sync {}
unsafe impl<T> Send for ResourceCell<T> where T: Send {}

impl<T> ResourceCell<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
        }
    }

    /// Run `f` with shared access to the resource.
    ///
    /// # Safety
    ///
    /// The caller must hold a read-only or read-write admission.
    #[inline]
    pub(crate) unsafe fn with_read_only<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        f(&*self.value.get())
    }

    /// Run `f` with exclusive access to the resource.
    ///
    /// # Safety
    ///
    /// The caller must hold the read-write admission.
    #[inline]
    pub(crate) unsafe fn with_read_write<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        f(&mut *self.value.get())
    }
}
