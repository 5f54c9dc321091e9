use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::types::SessionIn;

/// 無入力タイマと自動切断タイマ。どちらも oneshot で止める。
/// 発火イベントは呼の control チャネルへ流す。
pub struct SessionTimers {
    no_input_stop: Option<oneshot::Sender<()>>,
    auto_hangup_stop: Option<oneshot::Sender<()>>,
}

impl SessionTimers {
    pub fn new() -> Self {
        Self {
            no_input_stop: None,
            auto_hangup_stop: None,
        }
    }

    /// 無入力タイマを張り直す（声・合成完了のたびに呼ぶ）。
    pub fn rearm_no_input(&mut self, tx: mpsc::Sender<SessionIn>, timeout: Duration) {
        self.stop_no_input();
        let (stop_tx, mut stop_rx) = oneshot::channel();
        self.no_input_stop = Some(stop_tx);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    let _ = tx.send(SessionIn::NoInputTimeout).await;
                }
                _ = &mut stop_rx => {}
            }
        });
    }

    pub fn stop_no_input(&mut self) {
        if let Some(stop) = self.no_input_stop.take() {
            let _ = stop.send(());
        }
    }

    /// 粗い保険。既に張ってあれば何もしない。
    pub fn arm_auto_hangup(&mut self, tx: mpsc::Sender<SessionIn>, timeout: Duration) {
        if self.auto_hangup_stop.is_some() {
            return;
        }
        let (stop_tx, mut stop_rx) = oneshot::channel();
        self.auto_hangup_stop = Some(stop_tx);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    let _ = tx.send(SessionIn::AutoHangupTimeout).await;
                }
                _ = &mut stop_rx => {}
            }
        });
    }

    pub fn stop_auto_hangup(&mut self) {
        if let Some(stop) = self.auto_hangup_stop.take() {
            let _ = stop.send(());
        }
    }

    /// teardown 時は必ず両方止める。二重呼び出しは無害。
    pub fn stop_all(&mut self) {
        self.stop_no_input();
        self.stop_auto_hangup();
    }
}

impl Default for SessionTimers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, pause, Duration};

    #[tokio::test]
    async fn no_input_timer_fires_after_timeout() {
        pause();
        let (tx, mut rx) = mpsc::channel(4);
        let mut timers = SessionTimers::new();
        timers.rearm_no_input(tx, Duration::from_secs(10));
        advance(Duration::from_secs(11)).await;
        assert!(matches!(rx.recv().await, Some(SessionIn::NoInputTimeout)));
    }

    #[tokio::test]
    async fn rearm_cancels_previous_timer() {
        pause();
        let (tx, mut rx) = mpsc::channel(4);
        let mut timers = SessionTimers::new();
        timers.rearm_no_input(tx.clone(), Duration::from_secs(10));
        advance(Duration::from_secs(5)).await;
        timers.rearm_no_input(tx, Duration::from_secs(10));
        advance(Duration::from_secs(6)).await;
        // 元のタイマなら発火していた時刻だが、張り直したので鳴らない
        assert!(rx.try_recv().is_err());
        advance(Duration::from_secs(5)).await;
        assert!(matches!(rx.recv().await, Some(SessionIn::NoInputTimeout)));
    }

    #[tokio::test]
    async fn stopped_timer_does_not_fire() {
        pause();
        let (tx, mut rx) = mpsc::channel(4);
        let mut timers = SessionTimers::new();
        timers.rearm_no_input(tx, Duration::from_secs(10));
        timers.stop_no_input();
        advance(Duration::from_secs(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn auto_hangup_is_armed_once() {
        pause();
        let (tx, mut rx) = mpsc::channel(4);
        let mut timers = SessionTimers::new();
        timers.arm_auto_hangup(tx.clone(), Duration::from_secs(60));
        // 二度目は無視される（再設定は stop してから）
        timers.arm_auto_hangup(tx, Duration::from_secs(1));
        advance(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
        advance(Duration::from_secs(60)).await;
        assert!(matches!(rx.recv().await, Some(SessionIn::AutoHangupTimeout)));
    }

    #[tokio::test]
    async fn stop_all_is_idempotent() {
        let (tx, _rx) = mpsc::channel(4);
        let mut timers = SessionTimers::new();
        timers.rearm_no_input(tx.clone(), Duration::from_secs(10));
        timers.arm_auto_hangup(tx, Duration::from_secs(60));
        timers.stop_all();
        timers.stop_all();
    }
}
