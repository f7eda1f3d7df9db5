//! Internal logging macros.
//!
//! **Note**: These macros (`mensura_info!`, `mensura_warn!`, `mensura_debug!`
//! and `mensura_error!`) are intended to be used **internally within mensura
//! code** or by **custom meter backends and observation handlers**. They are
//! not designed for general application logging.
//!
//! With the `internal-logs` feature of the *calling* crate enabled, events are
//! forwarded to `tracing` with the crate name as target. When running tests
//! with `--nocapture` they are also printed to stdout.
//!
//! Every event carries a `name` of the form `Component.Event`, followed by
//! optional `key = value` attributes whose values implement `Display`.

#[doc(hidden)]
#[macro_export]
macro_rules! __mensura_log {
    ($level:ident, $label:literal, name: $name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::$level!(
                name: $name,
                target: env!("CARGO_PKG_NAME"),
                name = $name
                $(, $key = { $value })*
            );
        }

        #[cfg(test)]
        {
            print!("{}: name={}", $label, $name);
            $(
                print!(", {}={}", stringify!($key), $value);
            )*
            print!("\n");
        }

        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name, $($value),*); // Compiler will optimize this out as it's unused.
        }
    };
}

/// Logs an informational event.
///
/// # Example:
/// ```rust
/// use mensura_commons::mensura_info;
/// mensura_info!(name: "MeterRegistry.Closed", meter_count = 3);
/// ```
#[macro_export]
macro_rules! mensura_info {
    ($($arg:tt)*) => {
        $crate::__mensura_log!(info, "mensura_info", $($arg)*)
    };
}

/// Logs a warning event.
///
/// # Example:
/// ```rust
/// use mensura_commons::mensura_warn;
/// mensura_warn!(name: "MeterRegistry.LateFilter", meter_count = 12);
/// ```
#[macro_export]
macro_rules! mensura_warn {
    ($($arg:tt)*) => {
        $crate::__mensura_log!(warn, "mensura_warn", $($arg)*)
    };
}

/// Logs a debug event.
///
/// # Example:
/// ```rust
/// use mensura_commons::mensura_debug;
/// mensura_debug!(name: "MeterRegistry.MeterCreated", meter_name = "http.requests");
/// ```
#[macro_export]
macro_rules! mensura_debug {
    ($($arg:tt)*) => {
        $crate::__mensura_log!(debug, "mensura_debug", $($arg)*)
    };
}

/// Logs an error event.
///
/// # Example:
/// ```rust
/// use mensura_commons::mensura_error;
/// mensura_error!(name: "MeterRegistry.KindMismatch", meter_name = "foo");
/// ```
#[macro_export]
macro_rules! mensura_error {
    ($($arg:tt)*) => {
        $crate::__mensura_log!(error, "mensura_error", $($arg)*)
    };
}
