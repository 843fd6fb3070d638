//! Temporary keys for emulated operations.
//!
//! Every key handed out by one lease shares a random hash tag, so all of them
//! live in one slot and a native multi-key command can act on them together.

use super::router::ClusterRouter;
use bytes::Bytes;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, warn};

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const TOKEN_LEN: usize = 16;

fn random_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Delete `keys` in one call, counting them as orphaned when that fails
async fn delete_keys(router: &ClusterRouter, tag: &str, keys: &[Bytes]) -> bool {
    match router.route("DEL", keys).await {
        Ok(_) => {
            debug!(tag, count = keys.len(), "Released temporary keys");
            true
        }
        Err(e) => {
            router.metrics().orphaned_keys.inc_by(keys.len() as u64);
            warn!(tag, count = keys.len(), "Failed to delete temporary keys: {}", e);
            false
        }
    }
}

/// Owns the temporary keys created by one emulated invocation.
///
/// [`release`](Self::release) deletes them. A lease dropped while still holding
/// keys, e.g. because the emulated future was cancelled, deletes them from a
/// spawned task instead.
pub struct TemporaryKeyLease {
    router: Arc<ClusterRouter>,
    tag: String,
    keys: Vec<Bytes>,
}

impl TemporaryKeyLease {
    pub fn new(router: Arc<ClusterRouter>) -> Self {
        Self {
            router,
            tag: random_token(),
            keys: Vec::new(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Allocate a fresh key, `{TAG}RANDOMID`
    pub fn next_key(&mut self) -> Bytes {
        let key = Bytes::from(format!("{{{}}}{}", self.tag, random_token()));
        self.keys.push(key.clone());
        key
    }

    pub fn keys(&self) -> &[Bytes] {
        &self.keys
    }

    /// Delete every key handed out. Never fails: a cleanup error is logged and
    /// counted, the keys are then left for the server to hold.
    ///
    /// The keys stay owned by the lease until the delete completes, so a
    /// release that is itself cancelled still falls back to [`Drop`].
    pub async fn release(mut self) {
        if self.keys.is_empty() {
            return;
        }
        delete_keys(&self.router, &self.tag, &self.keys).await;
        self.keys.clear();
    }
}

impl Drop for TemporaryKeyLease {
    fn drop(&mut self) {
        if self.keys.is_empty() {
            return;
        }
        let keys = std::mem::take(&mut self.keys);
        let tag = std::mem::take(&mut self.tag);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(tag = %tag, count = keys.len(), "Lease dropped early, deleting keys in background");
                let router = self.router.clone();
                handle.spawn(async move {
                    delete_keys(&router, &tag, &keys).await;
                });
            }
            Err(_) => {
                self.router.metrics().orphaned_keys.inc_by(keys.len() as u64);
                warn!(tag = %tag, keys = ?keys, "Temporary keys dropped outside a runtime");
            }
        }
    }
}
