//! ---
//! ptf_section: "03-diagnostics-logging"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Structured logging adapters and diagnostic sinks."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
//! Context-enriched logging macros.

#[doc(hidden)]
#[macro_export]
macro_rules! __ptf_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            assembly = ctx.assembly.unwrap_or(""),
            class = ctx.class.unwrap_or(""),
            method = ctx.method.unwrap_or(""),
            case = ctx.case.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with case context.
#[macro_export]
macro_rules! ptf_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__ptf_event!(tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__ptf_event!(tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with case context.
#[macro_export]
macro_rules! ptf_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__ptf_event!(tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__ptf_event!(tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with case context.
#[macro_export]
macro_rules! ptf_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__ptf_event!(tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__ptf_event!(tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with case context.
#[macro_export]
macro_rules! ptf_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__ptf_event!(tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__ptf_event!(tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
