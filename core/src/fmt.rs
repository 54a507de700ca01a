// Shim so the rest of the crate can call trace!/debug!/info!/warn!/error! regardless of
// which (if any) of the `log`/`defmt` features are enabled. Mirrors the fmt.rs shim used
// throughout the embedded-hal / embassy ecosystem.

#![allow(unused)]

#[cfg(feature = "defmt")]
macro_rules! trace {
    ($($x:tt)*) => { defmt::trace!($($x)*) };
}
#[cfg(all(feature = "log", not(feature = "defmt")))]
macro_rules! trace {
    ($($x:tt)*) => { log::trace!($($x)*) };
}
#[cfg(not(any(feature = "log", feature = "defmt")))]
macro_rules! trace {
    ($($x:tt)*) => {{ let _ = ($($x)*,); }};
}

#[cfg(feature = "defmt")]
macro_rules! debug {
    ($($x:tt)*) => { defmt::debug!($($x)*) };
}
#[cfg(all(feature = "log", not(feature = "defmt")))]
macro_rules! debug {
    ($($x:tt)*) => { log::debug!($($x)*) };
}
#[cfg(not(any(feature = "log", feature = "defmt")))]
macro_rules! debug {
    ($($x:tt)*) => {{ let _ = ($($x)*,); }};
}

#[cfg(feature = "defmt")]
macro_rules! info {
    ($($x:tt)*) => { defmt::info!($($x)*) };
}
#[cfg(all(feature = "log", not(feature = "defmt")))]
macro_rules! info {
    ($($x:tt)*) => { log::info!($($x)*) };
}
#[cfg(not(any(feature = "log", feature = "defmt")))]
macro_rules! info {
    ($($x:tt)*) => {{ let _ = ($($x)*,); }};
}

#[cfg(feature = "defmt")]
macro_rules! warn {
    ($($x:tt)*) => { defmt::warn!($($x)*) };
}
#[cfg(all(feature = "log", not(feature = "defmt")))]
macro_rules! warn {
    ($($x:tt)*) => { log::warn!($($x)*) };
}
#[cfg(not(any(feature = "log", feature = "defmt")))]
macro_rules! warn {
    ($($x:tt)*) => {{ let _ = ($($x)*,); }};
}

#[cfg(feature = "defmt")]
macro_rules! error {
    ($($x:tt)*) => { defmt::error!($($x)*) };
}
#[cfg(all(feature = "log", not(feature = "defmt")))]
macro_rules! error {
    ($($x:tt)*) => { log::error!($($x)*) };
}
#[cfg(not(any(feature = "log", feature = "defmt")))]
macro_rules! error {
    ($($x:tt)*) => {{ let _ = ($($x)*,); }};
}

pub(crate) use {debug, error, info, trace, warn};
