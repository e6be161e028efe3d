//! Channel-hop scheduler (C5): a single global tick loop drives every
//! hopping source's dwell timer and issues its `SetChannel` command when
//! due, rather than each source running its own timer — this keeps the
//! aggregate tick rate bounded regardless of how many sources are hopping.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config;
use crate::source::SourceRuntime;
use crate::types::HopState;
use crate::wire::CommandKind;

/// Per-source scheduling bookkeeping the tick loop keeps alongside the
/// weak handle, so a dropped source is pruned on its next due tick.
struct HopEntry {
    runtime: Weak<SourceRuntime>,
    next_due: Instant,
    backoff_multiplier: u32,
}

/// Global registry of hopping sources, ticked by one background task.
#[derive(Default)]
pub struct HopScheduler {
    entries: DashMap<Uuid, HopEntry>,
}

impl HopScheduler {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Register a source for hopping. If it's split-sharing a list with
    /// already-registered peers, stagger its starting cursor so the group
    /// visits distinct channels first (spec §4.5) instead of marching in
    /// lockstep.
    pub async fn register(&self, uuid: Uuid, runtime: &Arc<SourceRuntime>) {
        self.stagger_split_index(runtime).await;
        self.entries.insert(
            uuid,
            HopEntry {
                runtime: Arc::downgrade(runtime),
                next_due: Instant::now(),
                backoff_multiplier: 1,
            },
        );
    }

    /// For a source with `hop_state.split` set, count how many currently
    /// registered peers share the identical list and seed this source's
    /// `current_index` at `floor(len/n)*index + offset`, where `index` is
    /// this source's arrival order among that group and `n` includes
    /// itself. Peers already registered keep whatever cursor they started
    /// with; only the newly joining source is staggered against them.
    async fn stagger_split_index(&self, runtime: &Arc<SourceRuntime>) {
        let (split, offset, list) = {
            let source = runtime.source.read().await;
            (source.hop_state.split, source.hop_state.offset, source.hop_state.list.clone())
        };
        if !split || list.is_empty() {
            return;
        }

        let peers: Vec<Arc<SourceRuntime>> = self.entries.iter().filter_map(|e| e.runtime.upgrade()).collect();
        let mut index = 0usize;
        let mut n = 1usize;
        for peer in peers {
            if peer.source.read().await.hop_state.list == list {
                n += 1;
                index += 1;
            }
        }

        let stride = list.len() / n;
        let start = (stride * index + offset) % list.len();
        runtime.source.write().await.hop_state.current_index = start;
    }

    pub fn unregister(&self, uuid: &Uuid) {
        self.entries.remove(uuid);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drive every due source once. Called on every global tick.
    async fn tick_once(&self) {
        let now = Instant::now();
        let due: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|e| now >= e.next_due)
            .map(|e| *e.key())
            .collect();

        for uuid in due {
            let Some(mut entry) = self.entries.get_mut(&uuid) else { continue };
            let Some(runtime) = entry.runtime.upgrade() else {
                drop(entry);
                self.entries.remove(&uuid);
                continue;
            };

            let (dwell, slow) = tick_source(&runtime).await;
            let threshold = config::get().hop.slow_ack_threshold;

            let slow_acks = {
                let mut source = runtime.source.write().await;
                if slow {
                    source.hop_state.slow_acks += 1;
                } else {
                    source.hop_state.slow_acks = 0;
                }
                source.hop_state.slow_acks
            };

            entry.backoff_multiplier = if slow_acks >= threshold {
                (entry.backoff_multiplier * 2).min(8)
            } else {
                1
            };

            entry.next_due = now + dwell.mul_f64(f64::from(entry.backoff_multiplier));
        }
    }

    /// Run the global tick loop until cancelled. Ticks at
    /// `hop.max_tick_hz`, regardless of how many sources are actually due
    /// on any given tick.
    pub async fn run(&self, cancel: CancellationToken) {
        let hz = config::get().hop.max_tick_hz.max(1.0);
        let period = Duration::from_secs_f64(1.0 / hz);
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("hop scheduler stopped");
                    return;
                }
                _ = interval.tick() => {
                    self.tick_once().await;
                }
            }
        }
    }
}

/// Advance one source's hop index (if due and hopping) and send the
/// corresponding `SetChannel` command. Returns the dwell duration to wait
/// before the next tick, and whether this ack round-trip was slow.
async fn tick_source(runtime: &Arc<SourceRuntime>) -> (Duration, bool) {
    let (hopping, rate_hz, channel) = {
        let mut source = runtime.source.write().await;
        if !source.hop_state.hopping || source.hop_state.list.is_empty() {
            (false, 1.0, None)
        } else {
            let channel = advance(&mut source.hop_state);
            (true, source.hop_state.rate_hz.max(0.1), channel)
        }
    };

    let dwell = Duration::from_secs_f64(1.0 / rate_hz);
    if !hopping {
        return (dwell.max(Duration::from_millis(100)), false);
    }

    let Some(channel) = channel else {
        return (dwell, false);
    };

    let engine = runtime.engine_handle().read().await.clone();
    let Some(engine) = engine else {
        return (dwell, false);
    };

    let started = Instant::now();
    let result = engine.send_command(CommandKind::SetChannel { channel: channel.clone() }).await;
    let elapsed = started.elapsed();
    let slow = elapsed > dwell;

    match result {
        Ok(_) => trace!(channel, elapsed_ms = elapsed.as_millis() as u64, "hop ack"),
        Err(e) => warn!(channel, error = %e, "set-channel command failed"),
    }

    (dwell, slow)
}

/// Compute the next channel to tune to and advance `hop.current_index`.
/// `shuffle` reorders the dwell sequence by jumping `1 + shuffle_skip`
/// slots each tick instead of walking the list in order, spreading
/// consecutive dwells across channels that aren't physically adjacent.
/// `split`/`offset` only seed the *starting* index, at registration time
/// (see `HopScheduler::stagger_split_index`) — every source still walks
/// its own full list from there.
fn advance(hop: &mut HopState) -> Option<String> {
    if hop.list.is_empty() {
        return None;
    }
    let step = if hop.shuffle { 1 + hop.shuffle_skip } else { 1 };
    hop.current_index = (hop.current_index + step) % hop.list.len();
    Some(hop.list[hop.current_index].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::VirtualScanDriver;
    use crate::packetchain::BoundedPacketChain;
    use crate::types::SourceDefinition;

    fn init_test_config() {
        let _ = config::init(config::DatasourceConfig::default());
    }

    fn new_runtime(interface: &str) -> Arc<SourceRuntime> {
        let definition = SourceDefinition::parse(interface).unwrap();
        let (chain, _rx) = BoundedPacketChain::new();
        Arc::new(SourceRuntime::new(definition, Arc::new(VirtualScanDriver), Arc::new(chain)))
    }

    #[tokio::test]
    async fn split_registration_staggers_cursor_across_peers_sharing_a_list() {
        init_test_config();
        let scheduler = HopScheduler::new();
        let list = vec!["1".to_string(), "6".to_string(), "11".to_string(), "36".to_string()];

        let first = new_runtime("scan0");
        first.source.write().await.hop_state = HopState { split: true, list: list.clone(), ..Default::default() };
        let first_uuid = first.source.read().await.uuid;
        scheduler.register(first_uuid, &first).await;
        assert_eq!(first.source.read().await.hop_state.current_index, 0, "first of the group starts at index 0");

        let second = new_runtime("scan1");
        second.source.write().await.hop_state = HopState { split: true, list: list.clone(), ..Default::default() };
        let second_uuid = second.source.read().await.uuid;
        scheduler.register(second_uuid, &second).await;
        // n=2, index=1: floor(4/2)*1 + 0 = 2
        assert_eq!(second.source.read().await.hop_state.current_index, 2);
    }

    #[tokio::test]
    async fn split_registration_ignores_peers_on_a_different_list() {
        init_test_config();
        let scheduler = HopScheduler::new();

        let unrelated = new_runtime("scan0");
        unrelated.source.write().await.hop_state =
            HopState { split: true, list: vec!["40".to_string()], ..Default::default() };
        let unrelated_uuid = unrelated.source.read().await.uuid;
        scheduler.register(unrelated_uuid, &unrelated).await;

        let solo = new_runtime("scan1");
        let list = vec!["1".to_string(), "6".to_string()];
        solo.source.write().await.hop_state = HopState { split: true, list, offset: 1, ..Default::default() };
        let solo_uuid = solo.source.read().await.uuid;
        scheduler.register(solo_uuid, &solo).await;
        // no peers share this list, so n=1: floor(2/1)*0 + offset(1) = 1
        assert_eq!(solo.source.read().await.hop_state.current_index, 1);
    }

    #[test]
    fn advance_wraps_around() {
        let mut hop = HopState {
            list: vec!["1".into(), "6".into(), "11".into()],
            current_index: 2,
            ..Default::default()
        };
        let next = advance(&mut hop).unwrap();
        assert_eq!(next, "1");
        assert_eq!(hop.current_index, 0);
    }

    #[test]
    fn shuffle_skip_jumps_multiple_slots() {
        let mut hop = HopState {
            list: vec!["1".into(), "2".into(), "3".into(), "4".into()],
            current_index: 0,
            shuffle: true,
            shuffle_skip: 1,
            ..Default::default()
        };
        advance(&mut hop);
        assert_eq!(hop.current_index, 2);
    }

    #[test]
    fn empty_list_advances_to_none() {
        let mut hop = HopState::default();
        assert!(advance(&mut hop).is_none());
    }
}
