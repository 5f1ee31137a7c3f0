//! Timestamped, marker-prefixed logging.
//!
//! No logging framework: every line is a `println!`/`eprintln!` carrying a
//! leading marker (`+` success, `!` warning, `x` error, `>` info) the way
//! the rest of this codebase's ancestry logs, just with a timestamp glued
//! on front so grepping startup/accept/disconnect/ERQ lines out of a long
//! run is possible.

use jiff::Zoned;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Success,
    Info,
    Warning,
    Error,
}

impl Marker {
    fn symbol(self) -> char {
        match self {
            Marker::Success => '+',
            Marker::Info => '>',
            Marker::Warning => '!',
            Marker::Error => 'x',
        }
    }
}

fn timestamp() -> String {
    Zoned::now().strftime("%Y-%m-%d %H:%M:%S").to_string()
}

/// Emit one log line. Errors and warnings go to stderr; everything else to
/// stdout, matching the teacher's split between `println!`/`eprintln!`.
pub fn log_line(marker: Marker, message: &str) {
    let line = format!("[{}] {} {}", timestamp(), marker.symbol(), message);
    match marker {
        Marker::Warning | Marker::Error => eprintln!("{}", line),
        _ => println!("{}", line),
    }
}

#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {
        $crate::log::log_line($crate::log::Marker::Success, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::log::log_line($crate::log::Marker::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::log::log_line($crate::log::Marker::Warning, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::log::log_line($crate::log::Marker::Error, &format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_symbols_match_convention() {
        assert_eq!(Marker::Success.symbol(), '+');
        assert_eq!(Marker::Info.symbol(), '>');
        assert_eq!(Marker::Warning.symbol(), '!');
        assert_eq!(Marker::Error.symbol(), 'x');
    }

    #[test]
    fn timestamp_is_nonempty() {
        assert!(!timestamp().is_empty());
    }
}
