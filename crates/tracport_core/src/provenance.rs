use chrono::{DateTime, Utc};

pub const ANONYMOUS_USER: &str = "anonymous";
pub const TIMESTAMP_SYSTEM: &str = "Trac";

/// `**[<intro> <name>]** `, or an empty string for blank/anonymous authors.
/// Email addresses are cut down to their local part so they are not republished.
pub fn format_author(name: &str, intro: &str) -> String {
    let name = name.trim();
    if name.is_empty() || name == ANONYMOUS_USER {
        return String::new();
    }
    let display = match name.split_once('@') {
        Some((local, _)) => format!("{local}@..."),
        None => name.to_string(),
    };
    format!("**[{intro} {display}]** ")
}

/// Best effort: anything that is not an integer number of seconds inside the
/// representable date range yields an empty string.
pub fn format_timestamp(raw: &str) -> String {
    match raw.trim().parse::<i64>() {
        Ok(seconds) => format_epoch_seconds(seconds),
        Err(_) => String::new(),
    }
}

pub fn format_epoch_seconds(seconds: i64) -> String {
    match DateTime::<Utc>::from_timestamp(seconds, 0) {
        Some(moment) => format!(
            "*[{TIMESTAMP_SYSTEM} time {}]*",
            moment.format("%Y%m%d %H%M%SZ")
        ),
        None => String::new(),
    }
}
