use crate::cell::ResourceCell;
use std::fmt;

/// The kind of access an accessor requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Shared access through `&T`. Runs concurrently with other read-only
    /// accessors.
    ReadOnly,
    /// Exclusive access through `&mut T`.
    ReadWrite,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::ReadOnly => f.write_str("read-only"),
            Mode::ReadWrite => f.write_str("read-write"),
        }
    }
}

/// Marker for accessors taking `&T`.
pub enum Read {}

/// Marker for accessors taking `&mut T`.
pub enum Write {}

mod sealed {
    pub trait Sealed<T, M> {}

    impl<T, R, F> Sealed<T, super::Read> for F where F: FnOnce(&T) -> R {}
    impl<T, R, F> Sealed<T, super::Write> for F where F: FnOnce(&mut T) -> R {}
}

/// Something which can access a resource of type `T`.
///
/// This is implemented for any closure taking either `&T` or `&mut T`, and the
/// [Mode] is decided by which one it takes. The marker `M` is [Read] or
/// [Write] and is inferred, so the parameter of the closure needs a type
/// annotation:
///
/// ```rust
/// # fn main() -> anyhow::Result<()> {
/// let value = threadsafe::ThreadSafe::new(1u32)?;
///
/// value.sync(|n: &mut u32| *n += 1);
/// let n = value.sync(|n: &u32| *n);
/// assert_eq!(2, n);
/// # Ok(()) }
/// ```
///
/// Since a read-only accessor only ever sees `&T`, mutating through it fails
/// to compile:
///
/// ```rust,compile_fail
/// # fn main() -> anyhow::Result<()> {
/// let value = threadsafe::ThreadSafe::new(1u32)?;
/// value.sync(|n: &u32| *n += 1);
/// # Ok(()) }
/// ```
///
/// This trait is sealed and cannot be implemented outside of this crate.
pub trait Accessor<T, M>: sealed::Sealed<T, M> {
    /// The value produced by the accessor.
    type Output;

    /// The access mode requested. Fixed for the lifetime of the accessor.
    const MODE: Mode;

    /// Run the accessor over the cell.
    ///
    /// # Safety
    ///
    /// The caller must hold an admission for [MODE][Accessor::MODE] on the
    /// coordinator guarding `cell`.
    #[doc(hidden)]
    unsafe fn access(self, cell: &ResourceCell<T>) -> Self::Output;
}

impl<T, R, F> Accessor<T, Read> for F
where
    F: FnOnce(&T) -> R,
{
    type Output = R;

    const MODE: Mode = Mode::ReadOnly;

    #[inline]
    unsafe fn access(self, cell: &ResourceCell<T>) -> R {
        cell.with_read_only(self)
    }
}

impl<T, R, F> Accessor<T, Write> for F
where
    F: FnOnce(&mut T) -> R,
{
    type Output = R;

    const MODE: Mode = Mode::ReadWrite;

    #[inline]
    unsafe fn access(self, cell: &ResourceCell<T>) -> R {
        cell.with_read_write(self)
    }
}
