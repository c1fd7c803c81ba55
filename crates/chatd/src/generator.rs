//! Sample history for demos and load checks.

use chrono::{DateTime, Duration, Utc};

use chat_core::{NewMessage, UserId};

/// Messages produced when no count is given.
pub const DEFAULT_SAMPLE_COUNT: usize = 50;

/// Sender used when no user is given.
pub const DEFAULT_SAMPLE_USER: UserId = UserId::new(1);

/// Builds `count` messages one second apart, the last one stamped `now`.
pub fn generate_messages(count: usize, user_id: UserId, now: DateTime<Utc>) -> Vec<NewMessage> {
    (1..=count)
        .map(|i| {
            let seconds_before = (count - i) as i64;
            NewMessage::at(
                user_id,
                format!("Sample message #{i}"),
                now - Duration::seconds(seconds_before),
            )
        })
        .collect()
}
