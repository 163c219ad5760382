//! Logging helper macros that prefix every line with the process identity.

use std::sync::OnceLock;

use env_logger::Env;

/// Identity string of this process (e.g., "vs" or "master"), used as the
/// logging prefix. Unset identity prints as "-".
pub static ME: OnceLock<String> = OnceLock::new();

/// Forwards to the `log` macro of the given level, prefixing the message
/// with `(ME)`. Use the level-named wrappers below.
#[doc(hidden)]
#[macro_export]
macro_rules! pf_log {
    ($level:ident, $($fmt_args:tt)*) => {
        log::$level!(
            "({}) {}",
            $crate::ME.get().map_or("-", |me| me.as_str()),
            format!($($fmt_args)*)
        )
    };
}

#[macro_export]
macro_rules! pf_trace {
    ($($fmt_args:tt)*) => { $crate::pf_log!(trace, $($fmt_args)*) };
}

#[macro_export]
macro_rules! pf_debug {
    ($($fmt_args:tt)*) => { $crate::pf_log!(debug, $($fmt_args)*) };
}

#[macro_export]
macro_rules! pf_info {
    ($($fmt_args:tt)*) => { $crate::pf_log!(info, $($fmt_args)*) };
}

#[macro_export]
macro_rules! pf_warn {
    ($($fmt_args:tt)*) => { $crate::pf_log!(warn, $($fmt_args)*) };
}

#[macro_export]
macro_rules! pf_error {
    ($($fmt_args:tt)*) => { $crate::pf_log!(error, $($fmt_args)*) };
}

/// Initialize `env_logger` with the default `info` filter if haven't. Safe
/// to call more than once (e.g., from multiple tests).
pub fn logger_init() {
    let _ =
        env_logger::Builder::from_env(Env::default().default_filter_or("info"))
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .try_init();
}

/// Logs at ERROR level and evaluates to `Err(ViewmasterError)` carrying the
/// same message, e.g. `return logged_err!("invalid dead_pings {}", n);`.
#[macro_export]
macro_rules! logged_err {
    ($($fmt_args:tt)*) => {
        {
            $crate::pf_error!($($fmt_args)*);
            Err($crate::ViewmasterError::msg(format!($($fmt_args)*)))
        }
    };
}
