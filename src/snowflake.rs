//! Snowflake id generation.
//!
//! `(ms_timestamp << 22) | seq22` — monotonically non-decreasing within a
//! process. `seq22` wraps at 2^22 and, on wraparound within the same
//! millisecond, the generator spins forward to the next millisecond rather
//! than emitting a duplicate id.

use std::sync::Mutex;

use chrono::Utc;
use once_cell::sync::Lazy;

const SEQUENCE_BITS: u64 = 22;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

struct GeneratorState {
    last_ms: i64,
    seq: u64,
}

static STATE: Lazy<Mutex<GeneratorState>> = Lazy::new(|| {
    Mutex::new(GeneratorState {
        last_ms: 0,
        seq: 0,
    })
});

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Generate the next snowflake id. Safe to call concurrently from any task —
/// the single mutex is held only for the duration of the increment, never
/// across an `.await`.
pub fn next_id() -> i64 {
    let mut state = STATE.lock().unwrap();
    let mut ms = now_ms();

    if ms < state.last_ms {
        // Clock moved backwards (NTP step); keep using the last-seen ms so
        // ids stay monotonic rather than going backwards.
        ms = state.last_ms;
    }

    if ms == state.last_ms {
        state.seq = (state.seq + 1) & SEQUENCE_MASK;
        if state.seq == 0 {
            // Sequence exhausted within this millisecond — advance the clock.
            ms += 1;
        }
    } else {
        state.seq = 0;
    }

    state.last_ms = ms;
    (ms << SEQUENCE_BITS) | (state.seq as i64)
}

/// Extract the millisecond timestamp a snowflake id was minted at.
pub fn timestamp_ms(id: i64) -> i64 {
    id >> SEQUENCE_BITS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonically_increasing() {
        let mut prev = next_id();
        for _ in 0..10_000 {
            let id = next_id();
            assert!(id > prev, "snowflake ids must strictly increase within a process");
            prev = id;
        }
    }

    #[test]
    fn timestamp_roundtrips() {
        let before = now_ms();
        let id = next_id();
        let after = now_ms();
        let ts = timestamp_ms(id);
        assert!(ts >= before && ts <= after);
    }

    #[test]
    fn sequence_wraps_without_duplicate_ids() {
        use std::collections::HashSet;
        let mut seen = HashSet::new();
        for _ in 0..5000 {
            assert!(seen.insert(next_id()), "snowflake generator must never repeat an id");
        }
    }
}
