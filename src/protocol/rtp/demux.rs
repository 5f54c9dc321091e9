use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::shared::entities::CallId;

const PENDING_MAX_FRAMES: usize = 50;
const PENDING_MAX_BYTES: usize = 16 * 1024;
const MAX_SEQ_REORDER: u16 = 50;

/// 受信フレームの割り当て結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// 既知の呼に属する
    Bound(CallId),
    /// 同一エンドポイントに別SSRCが既に確定している（混入防止のため破棄）
    Foreign,
    /// まだどの呼にも結びついていない
    Unbound,
}

#[derive(Debug)]
struct CallBinding {
    call_id: CallId,
    ssrc: Option<u32>,
    addr: SocketAddr,
    last_seen: Instant,
}

#[derive(Default)]
struct PendingQueue {
    frames: VecDeque<Vec<u8>>,
    bytes: usize,
}

impl PendingQueue {
    fn push(&mut self, frame: Vec<u8>) {
        self.bytes += frame.len();
        self.frames.push_back(frame);
        while self.frames.len() > PENDING_MAX_FRAMES || self.bytes > PENDING_MAX_BYTES {
            if let Some(dropped) = self.frames.pop_front() {
                self.bytes -= dropped.len();
            } else {
                break;
            }
        }
    }
}

/// 遅延・重複シーケンスの簡易ガード（wrap-around は許容）。
#[derive(Default)]
struct SeqGuard {
    last_seq: Option<u16>,
}

impl SeqGuard {
    fn accept(&mut self, seq: u16, max_reorder: u16) -> bool {
        match self.last_seq {
            None => {
                self.last_seq = Some(seq);
                true
            }
            Some(last) => {
                if seq == last {
                    return false;
                }
                let diff_forward = seq.wrapping_sub(last);
                if diff_forward > max_reorder && last.wrapping_sub(seq) < max_reorder {
                    return false;
                }
                self.last_seq = Some(seq);
                true
            }
        }
    }
}

struct DemuxInner {
    by_ssrc: HashMap<u32, CallId>,
    by_addr: HashMap<SocketAddr, CallId>,
    calls: HashMap<CallId, CallBinding>,
    pending: HashMap<SocketAddr, PendingQueue>,
    seq_guards: HashMap<CallId, SeqGuard>,
}

/// Session Router。SSRC優先・アドレス代替で受信フレームを呼へ割り当てる。
/// 初見のSSRC/アドレスで束縛が確定し、以後は不変（first-writer-wins）。
#[derive(Clone)]
pub struct MediaDemux {
    inner: Arc<Mutex<DemuxInner>>,
}

impl Default for MediaDemux {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaDemux {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(DemuxInner {
                by_ssrc: HashMap::new(),
                by_addr: HashMap::new(),
                calls: HashMap::new(),
                pending: HashMap::new(),
                seq_guards: HashMap::new(),
            })),
        }
    }

    /// 制御プレーンからの呼開始で、アドレス（と分かればSSRC）を呼に結びつける。
    /// 返り値はそのエンドポイント宛に溜まっていた未割り当てフレーム（到着順）。
    pub async fn bind(
        &self,
        call_id: CallId,
        ssrc: Option<u32>,
        addr: SocketAddr,
    ) -> Vec<Vec<u8>> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.calls.get(&call_id) {
            // first-writer-wins: 既存束縛は変更しない
            log::warn!(
                "[demux] bind ignored for already-bound call_id={} (addr={})",
                call_id,
                existing.addr
            );
            return Vec::new();
        }
        if let Some(ssrc) = ssrc {
            inner.by_ssrc.insert(ssrc, call_id.clone());
        }
        inner.by_addr.insert(addr, call_id.clone());
        inner.calls.insert(
            call_id.clone(),
            CallBinding {
                call_id: call_id.clone(),
                ssrc,
                addr,
                last_seen: Instant::now(),
            },
        );
        inner.seq_guards.entry(call_id).or_default();
        inner
            .pending
            .remove(&addr)
            .map(|q| q.frames.into())
            .unwrap_or_default()
    }

    /// 受信フレームの帰属を解決する。アドレス束縛済みでSSRC未確定なら
    /// このフレームのSSRCで確定させる（初見ロック）。
    pub async fn resolve(&self, ssrc: u32, addr: SocketAddr) -> ResolveOutcome {
        let mut inner = self.inner.lock().await;
        if let Some(call_id) = inner.by_ssrc.get(&ssrc).cloned() {
            if let Some(binding) = inner.calls.get_mut(&call_id) {
                binding.last_seen = Instant::now();
            }
            return ResolveOutcome::Bound(call_id);
        }
        if let Some(call_id) = inner.by_addr.get(&addr).cloned() {
            let locked = match inner.calls.get_mut(&call_id) {
                Some(binding) => {
                    binding.last_seen = Instant::now();
                    match binding.ssrc {
                        None => {
                            binding.ssrc = Some(ssrc);
                            true
                        }
                        Some(bound) => bound == ssrc,
                    }
                }
                None => false,
            };
            if locked {
                inner.by_ssrc.insert(ssrc, call_id.clone());
                return ResolveOutcome::Bound(call_id);
            }
            log::warn!(
                "[demux] foreign ssrc={:#010x} on bound endpoint {} (call_id={}), dropping",
                ssrc,
                addr,
                call_id
            );
            return ResolveOutcome::Foreign;
        }
        ResolveOutcome::Unbound
    }

    /// 未割り当てフレームをエンドポイント単位で保留する（上限超過は古い順に破棄）。
    pub async fn buffer_pending(&self, addr: SocketAddr, frame: Vec<u8>) {
        let mut inner = self.inner.lock().await;
        inner.pending.entry(addr).or_default().push(frame);
    }

    /// シーケンス番号ガード。false のフレームは処理しない。
    pub async fn accept_seq(&self, call_id: &CallId, seq: u16) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.seq_guards.get_mut(call_id) {
            Some(guard) => guard.accept(seq, MAX_SEQ_REORDER),
            None => false,
        }
    }

    /// 呼終了時に束縛・保留・ガードを全て外す。二重呼び出しは無害。
    pub async fn unbind(&self, call_id: &CallId) {
        let mut inner = self.inner.lock().await;
        if let Some(binding) = inner.calls.remove(call_id) {
            if let Some(ssrc) = binding.ssrc {
                inner.by_ssrc.remove(&ssrc);
            }
            inner.by_addr.remove(&binding.addr);
            inner.pending.remove(&binding.addr);
        }
        inner.seq_guards.remove(call_id);
    }

    /// 一定時間フレームが来ていない束縛を落としてメモリを抑える。
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let stale: Vec<CallId> = inner
            .calls
            .values()
            .filter(|b| now.duration_since(b.last_seen) >= max_idle)
            .map(|b| b.call_id.clone())
            .collect();
        for call_id in &stale {
            if let Some(binding) = inner.calls.remove(call_id) {
                if let Some(ssrc) = binding.ssrc {
                    inner.by_ssrc.remove(&ssrc);
                }
                inner.by_addr.remove(&binding.addr);
                inner.pending.remove(&binding.addr);
            }
            inner.seq_guards.remove(call_id);
            log::info!("[demux] evicted idle binding call_id={}", call_id);
        }
        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> CallId {
        CallId::new(id).unwrap()
    }

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[tokio::test]
    async fn ssrc_lookup_takes_priority() {
        let demux = MediaDemux::new();
        demux.bind(call("c1"), Some(0x1111), addr(4000)).await;
        demux.bind(call("c2"), None, addr(4002)).await;
        // c1 のSSRCが c2 のアドレスから届いても c1 に解決される
        assert_eq!(
            demux.resolve(0x1111, addr(4002)).await,
            ResolveOutcome::Bound(call("c1"))
        );
    }

    #[tokio::test]
    async fn first_packet_locks_ssrc() {
        let demux = MediaDemux::new();
        demux.bind(call("c1"), None, addr(4000)).await;
        assert_eq!(
            demux.resolve(0xAAAA, addr(4000)).await,
            ResolveOutcome::Bound(call("c1"))
        );
        // 同一エンドポイントの別SSRCは混入としてドロップ
        assert_eq!(
            demux.resolve(0xBBBB, addr(4000)).await,
            ResolveOutcome::Foreign
        );
        // 元のSSRCは引き続き通る
        assert_eq!(
            demux.resolve(0xAAAA, addr(4000)).await,
            ResolveOutcome::Bound(call("c1"))
        );
    }

    #[tokio::test]
    async fn unknown_source_is_unbound() {
        let demux = MediaDemux::new();
        assert_eq!(
            demux.resolve(0x1234, addr(4000)).await,
            ResolveOutcome::Unbound
        );
    }

    #[tokio::test]
    async fn bind_is_first_writer_wins() {
        let demux = MediaDemux::new();
        demux.bind(call("c1"), Some(0x1111), addr(4000)).await;
        demux.bind(call("c1"), Some(0x2222), addr(4002)).await;
        assert_eq!(
            demux.resolve(0x1111, addr(4000)).await,
            ResolveOutcome::Bound(call("c1"))
        );
        assert_eq!(
            demux.resolve(0x2222, addr(4002)).await,
            ResolveOutcome::Unbound
        );
    }

    #[tokio::test]
    async fn pending_frames_returned_on_bind_in_order() {
        let demux = MediaDemux::new();
        demux.buffer_pending(addr(4000), vec![1]).await;
        demux.buffer_pending(addr(4000), vec![2]).await;
        demux.buffer_pending(addr(4000), vec![3]).await;
        let frames = demux.bind(call("c1"), None, addr(4000)).await;
        assert_eq!(frames, vec![vec![1], vec![2], vec![3]]);
    }

    #[tokio::test]
    async fn pending_queue_drops_oldest_beyond_cap() {
        let demux = MediaDemux::new();
        for i in 0..60u8 {
            demux.buffer_pending(addr(4000), vec![i]).await;
        }
        let frames = demux.bind(call("c1"), None, addr(4000)).await;
        assert_eq!(frames.len(), PENDING_MAX_FRAMES);
        assert_eq!(frames[0], vec![10]);
        assert_eq!(frames.last().unwrap(), &vec![59]);
    }

    #[tokio::test]
    async fn pending_queue_bounded_by_bytes() {
        let demux = MediaDemux::new();
        for _ in 0..10 {
            demux.buffer_pending(addr(4000), vec![0u8; 4 * 1024]).await;
        }
        let frames = demux.bind(call("c1"), None, addr(4000)).await;
        let total: usize = frames.iter().map(|f| f.len()).sum();
        assert!(total <= PENDING_MAX_BYTES);
    }

    #[tokio::test]
    async fn seq_guard_drops_duplicates_and_stale() {
        let demux = MediaDemux::new();
        demux.bind(call("c1"), Some(1), addr(4000)).await;
        assert!(demux.accept_seq(&call("c1"), 100).await);
        assert!(!demux.accept_seq(&call("c1"), 100).await);
        assert!(demux.accept_seq(&call("c1"), 101).await);
        // 大きく逆行したフレームは棄却
        assert!(!demux.accept_seq(&call("c1"), 60).await);
        assert!(demux.accept_seq(&call("c1"), 131).await);
    }

    #[tokio::test]
    async fn seq_guard_allows_wrap_around() {
        let demux = MediaDemux::new();
        demux.bind(call("c1"), Some(1), addr(4000)).await;
        assert!(demux.accept_seq(&call("c1"), 65_530).await);
        assert!(demux.accept_seq(&call("c1"), 3).await);
    }

    #[tokio::test]
    async fn unbind_is_idempotent() {
        let demux = MediaDemux::new();
        demux.bind(call("c1"), Some(0x1111), addr(4000)).await;
        demux.unbind(&call("c1")).await;
        demux.unbind(&call("c1")).await;
        assert_eq!(
            demux.resolve(0x1111, addr(4000)).await,
            ResolveOutcome::Unbound
        );
    }

    #[tokio::test]
    async fn idle_bindings_are_evicted() {
        let demux = MediaDemux::new();
        demux.bind(call("c1"), Some(0x1111), addr(4000)).await;
        assert_eq!(demux.evict_idle(Duration::ZERO).await, 1);
        assert_eq!(
            demux.resolve(0x1111, addr(4000)).await,
            ResolveOutcome::Unbound
        );
    }
}
