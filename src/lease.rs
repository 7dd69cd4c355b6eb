//! Leader lease: a fenced, renewable lock over a single KV key.
//!
//! One named key (`fs_master_lock`) decides who is allowed to mutate file
//! metadata. Acquisition and renewal run on a fixed tick; the 2s tick vs 5s
//! TTL margin tolerates one missed tick before leadership is considered lost.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::kv::KvStore;

pub const LOCK_KEY: &str = "fs_master_lock";

pub struct LeaderLease {
    master_id: String,
    is_leader: AtomicBool,
}

impl LeaderLease {
    pub fn new(master_id: String) -> Arc<Self> {
        Arc::new(Self {
            master_id,
            is_leader: AtomicBool::new(false),
        })
    }

    pub fn master_id(&self) -> &str {
        &self.master_id
    }

    pub fn am_i_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// One acquire-or-renew step. Split out of `run` so tests can drive the
    /// state machine tick by tick without a real timer.
    pub async fn tick(&self, kv: &dyn KvStore, ttl: Duration) {
        if !self.am_i_leader() {
            match kv.set_if_absent(LOCK_KEY, &self.master_id, ttl).await {
                Ok(true) => {
                    info!("{} acquired leadership", self.master_id);
                    self.is_leader.store(true, Ordering::SeqCst);
                }
                Ok(false) => {
                    // someone else holds it; retry next tick
                }
                Err(err) => {
                    debug!("lease acquire failed, retrying next tick: {}", err);
                }
            }
            return;
        }

        match kv.get(LOCK_KEY).await {
            Ok(Some(ref value)) if value == &self.master_id => {
                if let Err(err) = kv.expire(LOCK_KEY, ttl).await {
                    warn!("lease renew failed, dropping leadership: {}", err);
                    self.is_leader.store(false, Ordering::SeqCst);
                }
            }
            Ok(_) => {
                warn!("{} lost leadership: lock held by another master", self.master_id);
                self.is_leader.store(false, Ordering::SeqCst);
            }
            Err(err) => {
                warn!("lease renew read failed, dropping leadership: {}", err);
                self.is_leader.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Spawn the periodic acquire/renew loop. Runs until the process exits.
    pub fn spawn(self: Arc<Self>, kv: Arc<dyn KvStore>, tick_period: Duration, ttl: Duration) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_period);
            loop {
                interval.tick().await;
                self.tick(kv.as_ref(), ttl).await;
            }
        });
    }
}
