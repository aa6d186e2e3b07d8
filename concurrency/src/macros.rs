// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

/// Compile the wrapped items only when the `loom` feature is enabled for the
/// *concurrency* crate itself (not for the crate invoking the macro).
///
/// # Example
/// ```
/// # use workplane_concurrency::with_loom;
/// with_loom! {
///     fn only_compiled_under_loom() {
///         // code here
///     }
/// }
/// ```
#[cfg(feature = "loom")]
#[macro_export]
macro_rules! with_loom {
    ($($item:item)*) => {
        $(
            $item
        )*
    };
}

/// Compile the wrapped items only when the `loom` feature is enabled for the
/// *concurrency* crate itself (not for the crate invoking the macro).
#[cfg(not(feature = "loom"))]
#[macro_export]
macro_rules! with_loom {
    ($($item:item)*) => {};
}

/// Compile the wrapped items only when the `shuttle` feature is enabled for
/// the *concurrency* crate itself (not for the crate invoking the macro).
///
/// # Example
/// ```
/// # use workplane_concurrency::with_shuttle;
/// with_shuttle! {
///     fn only_compiled_under_shuttle() {
///         // code here
///     }
/// }
/// ```
#[cfg(feature = "shuttle")]
#[macro_export]
macro_rules! with_shuttle {
    ($($item:item)*) => {
        $(
            $item
        )*
    };
}

/// Compile the wrapped items only when the `shuttle` feature is enabled for
/// the *concurrency* crate itself (not for the crate invoking the macro).
#[cfg(not(feature = "shuttle"))]
#[macro_export]
macro_rules! with_shuttle {
    ($($item:item)*) => {};
}

/// Compile the wrapped items only when neither `loom` nor `shuttle` is
/// enabled, i.e. when `sync` resolves to `std::sync`.
#[cfg(not(any(feature = "loom", feature = "shuttle")))]
#[macro_export]
macro_rules! with_std {
    ($($item:item)*) => {
        $(
            $item
        )*
    };
}

/// Compile the wrapped items only when neither `loom` nor `shuttle` is
/// enabled, i.e. when `sync` resolves to `std::sync`.
#[cfg(any(feature = "loom", feature = "shuttle"))]
#[macro_export]
macro_rules! with_std {
    ($($item:item)*) => {};
}
