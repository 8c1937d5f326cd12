// Logging shims: forward to `tracing` when `build-tracing` is enabled, compile to nothing otherwise.

#[cfg(feature = "build-tracing")]
macro_rules! trace {
    ($($any:tt)*) => {
        ::tracing::trace!($($any)*)
    };
}
#[cfg(not(feature = "build-tracing"))]
macro_rules! trace {
    ($($any:tt)*) => {
        ()
    };
}

#[cfg(feature = "build-tracing")]
macro_rules! debug {
    ($($any:tt)*) => {
        ::tracing::debug!($($any)*)
    };
}
#[cfg(not(feature = "build-tracing"))]
macro_rules! debug {
    ($($any:tt)*) => {
        ()
    };
}

#[cfg(feature = "build-tracing")]
macro_rules! info {
    ($($any:tt)*) => {
        ::tracing::info!($($any)*)
    };
}
#[cfg(not(feature = "build-tracing"))]
macro_rules! info {
    ($($any:tt)*) => {
        ()
    };
}

// `warn` collides with the builtin lint attribute, so it's defined under another name and renamed on export
#[cfg(feature = "build-tracing")]
macro_rules! warn_ {
    ($($any:tt)*) => {
        ::tracing::warn!($($any)*)
    };
}
#[cfg(not(feature = "build-tracing"))]
macro_rules! warn_ {
    ($($any:tt)*) => {
        ()
    };
}

#[cfg(feature = "build-tracing")]
macro_rules! error {
    ($($any:tt)*) => {
        ::tracing::error!($($any)*)
    };
}
#[cfg(not(feature = "build-tracing"))]
macro_rules! error {
    ($($any:tt)*) => {
        ()
    };
}

pub(crate) use debug;
pub(crate) use error;
pub(crate) use info;
pub(crate) use trace;
pub(crate) use warn_ as warn;
