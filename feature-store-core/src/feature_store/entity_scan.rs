use crate::error::{FeatureStoreError, Result};
use crate::model::{EntityId, FEATURE_KEY_PATTERN};
use crate::onlinestore::OnlineStore;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lazily scanned entity ids. Not a snapshot: ids may repeat, and ids written
/// or removed while the scan runs may or may not show up.
pub type EntityIdStream = BoxStream<'static, Result<EntityId>>;

struct ScanState {
    online_store: Arc<dyn OnlineStore>,
    count: usize,
    cursor: u64,
    pending: VecDeque<String>,
    finished: bool,
}

/// Walks the keyspace with `SCAN`, one page per poll once the previous page is drained.
/// The first failing page is yielded as an error and ends the stream.
pub(crate) fn scan_entity_ids(online_store: Arc<dyn OnlineStore>, count: usize) -> EntityIdStream {
    let state = ScanState {
        online_store,
        count,
        cursor: 0,
        pending: VecDeque::new(),
        finished: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(key) = state.pending.pop_front() {
                match EntityId::from_feature_key(&key) {
                    Some(entity_id) => return Some((Ok(entity_id), state)),
                    None => {
                        debug!("Skipping key outside the feature namespace: {}", key);
                        continue;
                    }
                }
            }
            if state.finished {
                return None;
            }
            match state
                .online_store
                .scan_page(state.cursor, FEATURE_KEY_PATTERN, state.count)
                .await
            {
                Ok(page) => {
                    debug!(
                        "SCAN page from cursor {} returned {} keys, next cursor {}",
                        state.cursor,
                        page.keys.len(),
                        page.cursor
                    );
                    state.cursor = page.cursor;
                    state.finished = page.cursor == 0;
                    state.pending.extend(page.keys);
                }
                Err(err) => {
                    warn!("Entity id scan failed at cursor {}: {:#}", state.cursor, err);
                    state.finished = true;
                    state.pending.clear();
                    return Some((
                        Err(FeatureStoreError::unavailable("get_all_entity_ids", err)),
                        state,
                    ));
                }
            }
        }
    })
    .boxed()
}
