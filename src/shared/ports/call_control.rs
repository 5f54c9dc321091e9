use anyhow::Result;

use crate::shared::entities::CallId;

use super::PortFuture;

/// 交換機側に出す制御指示。実装（ESLコマンド発行など）はコア外。
pub trait CallControlPort: Send + Sync {
    fn play(&self, call_id: CallId, audio_ref: String) -> PortFuture<Result<()>>;
    fn transfer(&self, call_id: CallId) -> PortFuture<Result<()>>;
    fn hangup(&self, call_id: CallId) -> PortFuture<Result<()>>;
}

pub struct NoopCallControl;

impl CallControlPort for NoopCallControl {
    fn play(&self, call_id: CallId, audio_ref: String) -> PortFuture<Result<()>> {
        Box::pin(async move {
            log::debug!("[call_control] play (noop) call_id={} ref={}", call_id, audio_ref);
            Ok(())
        })
    }

    fn transfer(&self, call_id: CallId) -> PortFuture<Result<()>> {
        Box::pin(async move {
            log::debug!("[call_control] transfer (noop) call_id={}", call_id);
            Ok(())
        })
    }

    fn hangup(&self, call_id: CallId) -> PortFuture<Result<()>> {
        Box::pin(async move {
            log::debug!("[call_control] hangup (noop) call_id={}", call_id);
            Ok(())
        })
    }
}
