//! Identifier & Clock (component A): UID minting and monotonic version
//! timestamps.

use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

/// Reserved UID for the per-tenant self-parenting root directory, disjoint
/// from the v4 minting range (a v4 UUID is never nil).
pub const ROOT_UID: Uuid = Uuid::nil();

/// Mint a new 128-bit opaque identifier with negligible collision
/// probability.
pub fn new_uid() -> Uuid {
    Uuid::new_v4()
}

static SEQ: AtomicU32 = AtomicU32::new(0);
static LAST_MILLIS: std::sync::Mutex<i64> = std::sync::Mutex::new(0);

/// A version timestamp: a string ordering a file's versions lexicographically
/// in creation order on a single host. Realised as `YYYYMMDD_HHMMSS.mmm`
/// with a monotonic counter suffix disambiguating writes that land in the
/// same millisecond.
///
/// Ordering across hosts is not guaranteed; the metadata store resolves
/// concurrent writers by whichever commits first (see §5 of the spec).
pub fn new_version_ts() -> String {
    let now = Utc::now();
    let millis = now.timestamp_millis();

    let seq = {
        let mut last = LAST_MILLIS.lock().expect("version clock mutex poisoned");
        if *last == millis {
            SEQ.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            *last = millis;
            SEQ.store(0, Ordering::SeqCst);
            0
        }
    };

    format!("{}.{:03}_{:04}", now.format("%Y%m%d_%H%M%S"), now.timestamp_subsec_millis(), seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uids_are_unique_and_root_is_reserved() {
        let a = new_uid();
        let b = new_uid();
        assert_ne!(a, b);
        assert_ne!(a, ROOT_UID);
        assert_ne!(b, ROOT_UID);
    }

    #[test]
    fn version_timestamps_sort_in_creation_order() {
        let mut stamps = Vec::new();
        for _ in 0..50 {
            stamps.push(new_version_ts());
        }
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted, "timestamps must already be in creation order");
    }
}
