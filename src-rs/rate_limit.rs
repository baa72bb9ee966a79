use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crc::{Crc, CRC_64_XZ};

use crate::cache::{CountingCache, EntrySnapshot, Transition, WindowStore};

// Reflected ECMA-182 polynomial with inverted init/xorout, identical to the
// fingerprints produced by earlier releases of the service.
const FINGERPRINT_CRC: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Block => "block",
        }
    }
}

pub fn fingerprint(identifier: &str) -> u64 {
    FINGERPRINT_CRC.checksum(identifier.as_bytes())
}

#[derive(Debug)]
pub struct FixedWindowLimiter<S: WindowStore = CountingCache> {
    ttl: Duration,
    threshold: u32,
    store: Arc<S>,
}

impl<S: WindowStore> FixedWindowLimiter<S> {
    pub fn new(store: Arc<S>, ttl: Duration, threshold: u32) -> Self {
        Self {
            ttl,
            threshold,
            store,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn decide(&self, identifier: &str, now: Instant) -> Decision {
        self.decide_fingerprint(fingerprint(identifier), now)
    }

    pub fn decide_fingerprint(&self, fingerprint: u64, now: Instant) -> Decision {
        // Block never writes, so a shared-lock read is enough to answer it.
        if let Some(snapshot) = self.store.lookup(fingerprint) {
            if self.plan(Some(snapshot), now) == Transition::Keep {
                tracing::debug!(fingerprint, count = snapshot.count, "blocked");
                return Decision::Block;
            }
        }

        let transition = self
            .store
            .apply(fingerprint, &mut |snapshot| self.plan(snapshot, now));

        let decision = match transition {
            Transition::Keep => Decision::Block,
            Transition::Insert(_) | Transition::Reset(_) | Transition::Increment => {
                Decision::Allow
            }
        };
        tracing::debug!(
            fingerprint,
            transition = ?transition,
            decision = decision.as_str(),
            "rate limit decision"
        );
        decision
    }

    fn plan(&self, snapshot: Option<EntrySnapshot>, now: Instant) -> Transition {
        match snapshot {
            None => Transition::Insert(now),
            Some(entry) if entry.is_expired(now, self.ttl) => Transition::Reset(now),
            Some(entry) if entry.count >= self.threshold => Transition::Keep,
            Some(_) => Transition::Increment,
        }
    }
}
