use std::collections::HashMap;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::config::CONFIG;

static GENERATION_COOLDOWNS: Lazy<Mutex<HashMap<i64, Instant>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn check_cooldown(
    cooldowns: &mut HashMap<i64, Instant>,
    user_id: i64,
    now: Instant,
    cooldown: Duration,
) -> Option<Duration> {
    if let Some(last) = cooldowns.get(&user_id) {
        let since = now.duration_since(*last);
        if since < cooldown {
            return Some(cooldown - since);
        }
    }
    cooldowns.retain(|_, last| now.duration_since(*last) < cooldown);
    cooldowns.insert(user_id, now);
    None
}

/// Remaining wait before the user may submit again; `None` starts a new
/// cooldown window.
pub fn generation_cooldown(user_id: i64) -> Option<Duration> {
    let cooldown = Duration::from_secs(CONFIG.generation_cooldown_seconds);
    check_cooldown(
        &mut GENERATION_COOLDOWNS.lock(),
        user_id,
        Instant::now(),
        cooldown,
    )
}
