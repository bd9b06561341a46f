pub mod build;
pub mod changes;
pub mod daemon;
pub mod export;
pub mod id;
pub mod queue;
pub mod release;

use std::time::Duration;

/// `42s`, `5m`, `3h`, `2d`.
pub fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3_599 => format!("{}m", secs / 60),
        3_600..=86_399 => format!("{}h", secs / 3_600),
        _ => format!("{}d", secs / 86_400),
    }
}
