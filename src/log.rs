//! Logging interface, contingent on the `log` feature
//!
//! The engine logs through these macros so that builds without a logger
//! carry no logging code at all. Some of these run in the completion
//! context; make sure your logger doesn't block.

macro_rules! debug {
    ($($args:tt)*) => {
        #[cfg(feature = "log")]
        ::log::debug!($($args)*)
    };
}

macro_rules! info {
    ($($args:tt)*) => {
        #[cfg(feature = "log")]
        ::log::info!($($args)*)
    };
}

macro_rules! warn {
    ($($args:tt)*) => {
        #[cfg(feature = "log")]
        ::log::warn!($($args)*)
    };
}

macro_rules! error {
    ($($args:tt)*) => {
        #[cfg(feature = "log")]
        ::log::error!($($args)*)
    };
}
