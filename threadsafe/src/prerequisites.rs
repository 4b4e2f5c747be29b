use crate::task::{AnyHandle, Handle};

/// Tasks which must settle before a new task becomes eligible to run.
///
/// Implemented for a single handle, for collections of handles, and for tuples
/// of up to six prerequisites which may all have different result types.
///
/// # Examples
///
/// ```rust
/// # fn main() -> anyhow::Result<()> {
/// let value = threadsafe::ThreadSafe::new(Vec::<u32>::new())?;
///
/// let pushes = (0..4)
///     .map(|n| value.spawn(move |v: &mut Vec<u32>| v.push(n)))
///     .collect::<Vec<_>>();
/// let len = value.spawn(|v: &Vec<u32>| v.len());
///
/// let sum = value.spawn_after(|v: &Vec<u32>| v.iter().sum::<u32>(), (&pushes, &len))?;
/// assert_eq!(*sum.wait()?, 6);
/// # Ok(()) }
/// ```
pub trait Prerequisites {
    /// Push every prerequisite onto `out`.
    fn gather(self, out: &mut Vec<AnyHandle>);
}

impl Prerequisites for () {
    #[inline]
    fn gather(self, _: &mut Vec<AnyHandle>) {}
}

impl Prerequisites for AnyHandle {
    #[inline]
    fn gather(self, out: &mut Vec<AnyHandle>) {
        out.push(self);
    }
}

impl Prerequisites for &AnyHandle {
    #[inline]
    fn gather(self, out: &mut Vec<AnyHandle>) {
        out.push(self.clone());
    }
}

impl<R> Prerequisites for Handle<R>
where
    R: 'static + Send + Sync,
{
    #[inline]
    fn gather(self, out: &mut Vec<AnyHandle>) {
        out.push(self.erase());
    }
}

impl<R> Prerequisites for &Handle<R>
where
    R: 'static + Send + Sync,
{
    #[inline]
    fn gather(self, out: &mut Vec<AnyHandle>) {
        out.push(self.erase());
    }
}

impl<P> Prerequisites for Option<P>
where
    P: Prerequisites,
{
    fn gather(self, out: &mut Vec<AnyHandle>) {
        if let Some(p) = self {
            p.gather(out);
        }
    }
}

impl<P> Prerequisites for Vec<P>
where
    P: Prerequisites,
{
    fn gather(self, out: &mut Vec<AnyHandle>) {
        for p in self {
            p.gather(out);
        }
    }
}

impl<'a, P> Prerequisites for &'a Vec<P>
where
    &'a P: Prerequisites,
{
    fn gather(self, out: &mut Vec<AnyHandle>) {
        self.as_slice().gather(out);
    }
}

impl<'a, P> Prerequisites for &'a [P]
where
    &'a P: Prerequisites,
{
    fn gather(self, out: &mut Vec<AnyHandle>) {
        for p in self {
            p.gather(out);
        }
    }
}

impl<P, const N: usize> Prerequisites for [P; N]
where
    P: Prerequisites,
{
    fn gather(self, out: &mut Vec<AnyHandle>) {
        for p in self {
            p.gather(out);
        }
    }
}

macro_rules! impl_tuple {
    ($($ty:ident $var:ident),*) => {
        impl<$($ty,)*> Prerequisites for ($($ty,)*)
        where
            $($ty: Prerequisites,)*
        {
            fn gather(self, out: &mut Vec<AnyHandle>) {
                let ($($var,)*) = self;
                $($var.gather(out);)*
            }
        }
    };
}

impl_tuple!(A a);
impl_tuple!(A a, B b);
impl_tuple!(A a, B b, C c);
impl_tuple!(A a, B b, C c, D d);
impl_tuple!(A a, B b, C c, D d, E e);
impl_tuple!(A a, B b, C c, D d, E e, F f);
