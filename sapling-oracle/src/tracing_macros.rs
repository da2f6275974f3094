//! Logging macros that forward to `tracing` when the `tracing` feature is on,
//! and expand to nothing otherwise. `warning!` forwards to `tracing::warn!`.

#[cfg(feature = "tracing")]
macro_rules! trace {
    ($($tt:tt)*) => { ::tracing::trace!($($tt)*) };
}

#[cfg(feature = "tracing")]
macro_rules! debug {
    ($($tt:tt)*) => { ::tracing::debug!($($tt)*) };
}

#[cfg(feature = "tracing")]
macro_rules! warning {
    ($($tt:tt)*) => { ::tracing::warn!($($tt)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace {
    ($($tt:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug {
    ($($tt:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! warning {
    ($($tt:tt)*) => {};
}

pub(crate) use {debug, trace, warning};
