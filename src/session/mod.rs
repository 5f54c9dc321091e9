pub mod coordinator;
pub mod dialogue;
pub mod output;
pub mod state_machine;
pub mod timers;
pub mod types;

use tokio::sync::mpsc;

pub use coordinator::{SessionCoordinator, SessionDeps};
pub use state_machine::{Phase, PhaseEvent, PhaseMachine};
pub use types::{
    CallId, ClientId, SessionHandle, SessionIn, SessionOut, SessionRegistry, SwitchUuid,
};

const SESSION_CONTROL_CHANNEL_CAPACITY: usize = 64;

/// 呼タスクを起動して registry に登録する。戻り値のハンドルで制御イベントを流す。
pub async fn spawn_session(
    call_id: CallId,
    client_id: Option<ClientId>,
    switch_uuid: Option<SwitchUuid>,
    registry: &SessionRegistry,
    deps: SessionDeps,
    session_out_tx: mpsc::Sender<SessionOut>,
) -> SessionHandle {
    let (tx_in, rx_in) = mpsc::channel(SESSION_CONTROL_CHANNEL_CAPACITY);
    let coordinator = SessionCoordinator::new(
        call_id.clone(),
        client_id,
        switch_uuid,
        deps,
        session_out_tx,
        tx_in.clone(),
    );
    tokio::spawn(async move {
        coordinator.run(rx_in).await;
    });
    let handle = SessionHandle { control_tx: tx_in };
    registry.insert(call_id, handle.clone()).await;
    handle
}
