mod media;
mod protocol;
mod service;
mod session;
mod shared;

use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;

use crate::protocol::rtp::demux::MediaDemux;
use crate::protocol::rtp::tx::MediaTxHandle;
use crate::protocol::transport::{
    run_app_event_loop, run_esl_event_loop, run_media_loop, run_switch_event_loop,
};
use crate::service::gateway::GatewayController;
use crate::session::{SessionDeps, SessionIn, SessionOut, SessionRegistry};
use crate::shared::ports::call_control::{CallControlPort, NoopCallControl};
use crate::shared::ports::console::{ConsolePort, HttpConsolePort, NoopConsole};
use crate::shared::ports::recognizer::{NoopRecognizer, RecognizerPort};
use crate::shared::ports::synth::{HttpSynthPort, NoopSynth, SynthPort};
use crate::shared::{config, logging};

const SESSION_OUT_CHANNEL_CAPACITY: usize = 128;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cfg = config::Config::from_env()?;
    let timeouts = config::timeouts().clone();

    // --- 共有状態（registry/demux はプロセスで一つだけ） ---
    let registry = SessionRegistry::new();
    let demux = MediaDemux::new();
    let media_tx = MediaTxHandle::new();

    let recognizer: Arc<dyn RecognizerPort> = {
        // クラウド認識のアダプタは外部クレートとして差し込む。
        // 未設定時は open が失敗し、呼は警告トーン経路に落ちる。
        log::warn!("[main] recognizer adapter not wired, using noop backend");
        Arc::new(NoopRecognizer)
    };
    let synth: Arc<dyn SynthPort> = match cfg.synth_url.clone() {
        Some(url) => Arc::new(HttpSynthPort::new(url, timeouts.synth_http)),
        None => {
            log::warn!("[main] SYNTH_URL not set, synthesis disabled");
            Arc::new(NoopSynth)
        }
    };
    let console: Arc<dyn ConsolePort> = match cfg.console_url.clone() {
        Some(url) => Arc::new(HttpConsolePort::new(url, timeouts.console_http)),
        None => Arc::new(NoopConsole),
    };
    let call_control: Arc<dyn CallControlPort> = Arc::new(NoopCallControl);

    let (session_out_tx, mut session_out_rx) =
        mpsc::channel::<SessionOut>(SESSION_OUT_CHANNEL_CAPACITY);

    let deps = SessionDeps {
        recognizer,
        synth,
        call_control,
        console,
        media_tx: media_tx.clone(),
    };
    let controller = GatewayController::new(
        registry.clone(),
        demux.clone(),
        deps,
        session_out_tx.clone(),
    );

    // --- ソケット準備 ---
    let media_sock = UdpSocket::bind((cfg.media_bind_ip.as_str(), cfg.media_port)).await?;
    let switch_listener = TcpListener::bind(cfg.switch_event_addr.as_str()).await?;
    let app_listener = TcpListener::bind(cfg.app_event_addr.as_str()).await?;
    log::info!(
        "Listening media UDP on {}, switch events on {}, app events on {}",
        media_sock.local_addr()?,
        switch_listener.local_addr()?,
        app_listener.local_addr()?
    );

    {
        let demux = demux.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = run_media_loop(media_sock, demux, registry).await {
                log::error!("[main] media loop error: {:?}", e);
            }
        });
    }
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            if let Err(e) = run_switch_event_loop(switch_listener, controller).await {
                log::error!("[main] switch event loop error: {:?}", e);
            }
        });
    }
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            if let Err(e) = run_app_event_loop(app_listener, controller).await {
                log::error!("[main] app event loop error: {:?}", e);
            }
        });
    }
    if let Some(esl_addr) = cfg.esl_event_addr.clone() {
        let esl_listener = TcpListener::bind(esl_addr.as_str()).await?;
        log::info!("[main] esl events on {}", esl_listener.local_addr()?);
        let controller = controller.clone();
        tokio::spawn(async move {
            if let Err(e) = run_esl_event_loop(esl_listener, controller).await {
                log::error!("[main] esl event loop error: {:?}", e);
            }
        });
    }

    // --- オーケストレータループ ---
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            res = &mut shutdown => {
                if let Err(err) = res {
                    log::warn!("[main] shutdown signal error: {:?}", err);
                }
                log::info!("[main] shutting down, ending {} active calls", registry.len().await);
                for call_id in registry.list().await {
                    if let Some(handle) = registry.get(&call_id).await {
                        let _ = handle.control_tx.send(SessionIn::End).await;
                    }
                }
                break;
            }
            Some(out) = session_out_rx.recv() => {
                match out {
                    SessionOut::Ended { call_id } => {
                        log::info!("[main] call ended: {}", call_id);
                        registry.remove(&call_id).await;
                        demux.unbind(&call_id).await;
                        media_tx.stop(call_id.as_str());
                    }
                    SessionOut::Metrics { name, value } => {
                        log::debug!("[metrics] name={} value={}", name, value);
                    }
                }
            }
            else => break,
        }
    }

    Ok(())
}
