//! Branch prediction hints used on the hot probe/displacement paths.

#[cfg(feature = "nightly")]
#[inline]
pub(crate) fn likely(b: bool) -> bool {
    core::intrinsics::likely(b)
}
#[cfg(not(feature = "nightly"))]
#[inline]
pub(crate) fn likely(b: bool) -> bool {
    b
}

#[cfg(feature = "nightly")]
#[inline]
pub(crate) fn unlikely(b: bool) -> bool {
    core::intrinsics::unlikely(b)
}
#[cfg(not(feature = "nightly"))]
#[inline]
pub(crate) fn unlikely(b: bool) -> bool {
    b
}
