use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::media::vad::VadState;
use crate::media::{resample, warning_tone_mulaw};
use crate::protocol::rtp::codec::{decode_companding, CompandingOutcome};
use crate::protocol::rtp::tx::MediaTxHandle;
use crate::service::asr::RecognitionManager;
use crate::session::dialogue::{DialogueOutcome, DialogueState};
use crate::session::output::OutputPacer;
use crate::session::timers::SessionTimers;
use crate::session::types::*;
use crate::shared::config;
use crate::shared::ports::call_control::CallControlPort;
use crate::shared::ports::console::{spawn_log, ConsolePort, Role, UtteranceRecord};
use crate::shared::ports::recognizer::RecognizerPort;
use crate::shared::ports::synth::SynthPort;

const PACE_TICK_INTERVAL: Duration = Duration::from_millis(20);
const WARNING_TONE_MS: u64 = 500;
const TELEPHONY_RATE: u32 = 8_000;
const RECOGNIZER_RATE: u32 = 16_000;

/// 呼タスクへ注入する外部協調者一式。main で一度組んで配る。
#[derive(Clone)]
pub struct SessionDeps {
    pub recognizer: Arc<dyn RecognizerPort>,
    pub synth: Arc<dyn SynthPort>,
    pub call_control: Arc<dyn CallControlPort>,
    pub console: Arc<dyn ConsolePort>,
    pub media_tx: MediaTxHandle,
}

/// 呼ごとの中枢タスク。フェーズ遷移はこのタスク上で直列化され、
/// 他の呼のタスクからは一切触られない。
pub struct SessionCoordinator {
    call_id: CallId,
    client_id: Option<ClientId>,
    switch_uuid: Option<SwitchUuid>,
    deps: SessionDeps,
    session_out_tx: mpsc::Sender<SessionOut>,
    tx_in: mpsc::Sender<SessionIn>,
    vad: VadState,
    pacer: OutputPacer,
    asr: RecognitionManager,
    timers: SessionTimers,
    dialogue: DialogueState,
    media_started: bool,
    voice_ever_detected: bool,
    unknown_payload_warned: bool,
    synth_cancel: Option<oneshot::Sender<()>>,
    torn_down: bool,
}

impl SessionCoordinator {
    pub(crate) fn new(
        call_id: CallId,
        client_id: Option<ClientId>,
        switch_uuid: Option<SwitchUuid>,
        deps: SessionDeps,
        session_out_tx: mpsc::Sender<SessionOut>,
        tx_in: mpsc::Sender<SessionIn>,
    ) -> Self {
        let asr = RecognitionManager::new(
            call_id.clone(),
            deps.recognizer.clone(),
            tx_in.clone(),
            config::asr_config().clone(),
        );
        Self {
            call_id,
            client_id,
            switch_uuid,
            deps,
            session_out_tx,
            tx_in,
            vad: VadState::new(config::vad_config(), RECOGNIZER_RATE),
            pacer: OutputPacer::new(),
            asr,
            timers: SessionTimers::new(),
            dialogue: DialogueState::new(config::dialogue_config().max_no_input_reminders),
            media_started: false,
            voice_ever_detected: false,
            unknown_payload_warned: false,
            synth_cancel: None,
            torn_down: false,
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<SessionIn>) {
        self.on_call_started().await;

        let mut pace_tick = interval(PACE_TICK_INTERVAL);
        pace_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = pace_tick.tick() => {
                    self.on_pace_tick();
                }
                maybe_ev = rx.recv() => {
                    let Some(ev) = maybe_ev else { break; };
                    if self.handle_event(ev).await {
                        break;
                    }
                }
            }
        }

        // チャネルが先に閉じた場合もここで必ず片付ける
        self.teardown().await;
    }

    async fn on_call_started(&mut self) {
        log::info!("[session {}] call started", self.call_id);
        let dialogue_cfg = config::dialogue_config();
        self.timers
            .arm_auto_hangup(self.tx_in.clone(), dialogue_cfg.auto_hangup_after);
        self.timers
            .rearm_no_input(self.tx_in.clone(), dialogue_cfg.no_input_timeout);
        self.asr.enable();
        if let Some(client_id) = self.client_id.clone() {
            spawn_log(
                "start_call",
                self.deps
                    .console
                    .start_call(self.call_id.clone(), client_id, None),
            );
        }
        let outcome = self.dialogue.on_call_started();
        self.apply_outcome(outcome, false).await;
    }

    /// true を返すとループを抜けて teardown する
    async fn handle_event(&mut self, ev: SessionIn) -> bool {
        match ev {
            SessionIn::MediaFrame {
                seq: _,
                payload_type,
                payload,
            } => {
                self.on_media_frame(payload_type, payload).await;
                false
            }
            SessionIn::RecogInterim { text, confidence } => {
                log::debug!(
                    "[session {}] interim len={} conf={:.2}",
                    self.call_id,
                    text.chars().count(),
                    confidence
                );
                false
            }
            SessionIn::RecogFinal { text, confidence } => {
                self.on_final_transcript(text, confidence).await;
                false
            }
            SessionIn::RecogUnavailable { reason } => {
                log::warn!(
                    "[session {}] recognition unavailable, playing warning tone: {}",
                    self.call_id,
                    reason
                );
                self.play_warning_tone();
                false
            }
            SessionIn::SynthDone {
                text,
                audio,
                low_latency,
            } => {
                self.on_synth_done(text, audio, low_latency);
                false
            }
            SessionIn::SynthFailed { text, reason } => {
                log::warn!(
                    "[session {}] synthesis failed for {:?}: {}",
                    self.call_id,
                    text,
                    reason
                );
                self.play_warning_tone();
                false
            }
            SessionIn::AppInit {
                client_id,
                caller_number,
            } => {
                log::info!(
                    "[session {}] bound to client_id={}",
                    self.call_id,
                    client_id
                );
                self.client_id = Some(client_id.clone());
                spawn_log(
                    "start_call",
                    self.deps.console.start_call(
                        self.call_id.clone(),
                        client_id,
                        caller_number,
                    ),
                );
                false
            }
            SessionIn::SwitchUuidChanged { switch_uuid } => {
                log::info!(
                    "[session {}] switch uuid -> {}",
                    self.call_id,
                    switch_uuid
                );
                self.switch_uuid = Some(switch_uuid);
                false
            }
            SessionIn::NoInputTimeout => {
                let outcome = self.dialogue.on_no_input_timeout();
                let hangup = outcome.hangup_requested;
                self.apply_outcome(outcome, false).await;
                if !hangup {
                    // 次のリマインドに向けて張り直す
                    self.timers.rearm_no_input(
                        self.tx_in.clone(),
                        config::dialogue_config().no_input_timeout,
                    );
                }
                hangup
            }
            SessionIn::AutoHangupTimeout => {
                if self.voice_ever_detected {
                    false
                } else {
                    log::info!(
                        "[session {}] auto hangup (no voice ever detected)",
                        self.call_id
                    );
                    self.request_hangup_callback();
                    true
                }
            }
            SessionIn::Hangup => {
                log::info!("[session {}] hangup requested", self.call_id);
                self.request_hangup_callback();
                true
            }
            SessionIn::End => {
                log::info!("[session {}] call_end received", self.call_id);
                true
            }
        }
    }

    async fn on_media_frame(&mut self, payload_type: u8, payload: Vec<u8>) {
        self.media_started = true;
        let (pcm8k, outcome) = decode_companding(&payload, payload_type);
        if let CompandingOutcome::Passthrough(pt) = outcome {
            if !self.unknown_payload_warned {
                self.unknown_payload_warned = true;
                log::warn!(
                    "[session {}] unknown payload type {}, passing through raw",
                    self.call_id,
                    pt
                );
            }
        }
        let pcm16k = match resample(&pcm8k, TELEPHONY_RATE, RECOGNIZER_RATE) {
            Ok(pcm) => pcm,
            Err(e) => {
                log::warn!("[session {}] resample failed: {}", self.call_id, e);
                return;
            }
        };

        let verdict = self.vad.update(&pcm16k);

        if verdict.is_voice {
            self.voice_ever_detected = true;
            self.dialogue.on_voice_detected();
            self.timers.stop_auto_hangup();
            self.timers.rearm_no_input(
                self.tx_in.clone(),
                config::dialogue_config().no_input_timeout,
            );
        }

        // barge-in: 再生中に十分な音量の声が来たら即時に出力を断つ。
        // キュー消去と合成中断はこのタスク上で行われ、drain と直列化される。
        if self.vad.is_barge_in(verdict.rms, self.pacer.is_speaking()) {
            log::info!(
                "[session {}] barge-in detected (rms={:.3}), interrupting output",
                self.call_id,
                verdict.rms
            );
            self.pacer.interrupt();
            self.cancel_inflight_synthesis();
        }

        if verdict.is_voice {
            if let Some(preroll) = verdict.preroll_flush {
                if !preroll.is_empty() {
                    self.asr.feed(&preroll).await;
                }
            }
            self.asr.feed(&pcm16k).await;
        } else if verdict.backchannel_due && !self.pacer.is_speaking() {
            let outcome = self.dialogue.on_backchannel();
            self.apply_outcome(outcome, true).await;
        }

        let _ = self.session_out_tx.try_send(SessionOut::Metrics {
            name: "media_in",
            value: payload.len() as i64,
        });
    }

    async fn on_final_transcript(&mut self, text: String, confidence: f32) {
        log::info!(
            "[session {}] final transcript ({:.2}): {}",
            self.call_id,
            confidence,
            text
        );
        self.log_utterance(Role::User, &text);
        let outcome = self.dialogue.on_final_transcript(&text);
        let hangup = outcome.hangup_requested;
        self.apply_outcome(outcome, false).await;
        if hangup {
            // teardown はイベントループに戻ってから行う
            let _ = self.tx_in.try_send(SessionIn::End);
        }
    }

    /// 対話ハンドラの出力を実行に移す。
    async fn apply_outcome(&mut self, outcome: DialogueOutcome, low_latency: bool) {
        if outcome.hangup_requested {
            self.request_hangup_callback();
        }
        if outcome.transfer_requested {
            log::info!("[session {}] transfer requested", self.call_id);
            spawn_log(
                "mark_transfer",
                self.deps.console.mark_transfer(self.call_id.clone()),
            );
            let call_control = self.deps.call_control.clone();
            let call_id = self.call_id.clone();
            tokio::spawn(async move {
                if let Err(e) = call_control.transfer(call_id.clone()).await {
                    log::warn!("[session {}] transfer callback failed: {:?}", call_id, e);
                }
            });
        }
        if let Some(reply) = outcome.reply_text {
            self.log_utterance(Role::Bot, &reply);
            self.request_synthesis(reply, low_latency);
        }
    }

    fn request_synthesis(&mut self, text: String, low_latency: bool) {
        // 直前の合成が進行中なら置き換える（結果は捨てる）
        self.cancel_inflight_synthesis();
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.synth_cancel = Some(cancel_tx);
        let synth = self.deps.synth.clone();
        let call_id = self.call_id.to_string();
        let tx = self.tx_in.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = &mut cancel_rx => {}
                res = synth.synthesize(call_id, text.clone()) => {
                    let ev = match res {
                        Ok(audio) => SessionIn::SynthDone { text, audio, low_latency },
                        Err(e) => SessionIn::SynthFailed {
                            text,
                            reason: e.to_string(),
                        },
                    };
                    let _ = tx.send(ev).await;
                }
            }
        });
    }

    fn cancel_inflight_synthesis(&mut self) {
        if let Some(cancel) = self.synth_cancel.take() {
            let _ = cancel.send(());
        }
    }

    fn on_synth_done(&mut self, text: String, audio: Vec<u8>, low_latency: bool) {
        self.synth_cancel = None;
        if !self.pacer.enqueue_reply(&text, &audio) {
            return;
        }
        // 合成完了も無入力タイマの張り直し契機
        self.timers.rearm_no_input(
            self.tx_in.clone(),
            config::dialogue_config().no_input_timeout,
        );
        if low_latency {
            self.flush_output_now();
        }
    }

    fn play_warning_tone(&mut self) {
        self.pacer.enqueue_audio(&warning_tone_mulaw(WARNING_TONE_MS));
        self.flush_output_now();
    }

    /// flush_now 経路。ティック上限を外して今すぐ全フレームを送る。
    fn flush_output_now(&mut self) {
        if !self.media_started {
            return;
        }
        for frame in self.pacer.drain_all() {
            self.deps.media_tx.send_frame(self.call_id.as_str(), frame);
        }
    }

    fn on_pace_tick(&mut self) {
        if !self.media_started {
            return;
        }
        if let Some(frame) = self.pacer.pop_frame() {
            self.deps.media_tx.send_frame(self.call_id.as_str(), frame);
        } else {
            // 無発話中はコンフォートノイズでジッタバッファを維持する
            self.deps
                .media_tx
                .send_frame(self.call_id.as_str(), OutputPacer::comfort_frame());
        }
    }

    fn request_hangup_callback(&mut self) {
        let call_control = self.deps.call_control.clone();
        let call_id = self.call_id.clone();
        tokio::spawn(async move {
            if let Err(e) = call_control.hangup(call_id.clone()).await {
                log::warn!("[session {}] hangup callback failed: {:?}", call_id, e);
            }
        });
    }

    fn log_utterance(&self, role: Role, text: &str) {
        spawn_log(
            "utterance",
            self.deps.console.log_utterance(UtteranceRecord {
                call_id: self.call_id.clone(),
                role,
                text: text.to_string(),
                state: format!("{:?}", self.dialogue.phase()),
                timestamp: SystemTime::now(),
            }),
        );
    }

    /// teardown 順序: タイマ → 認識ストリーム → 出力。冪等。
    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        log::info!("[session {}] teardown", self.call_id);
        self.timers.stop_all();
        self.cancel_inflight_synthesis();
        self.asr.end(config::timeouts().asr_join).await;
        self.pacer.interrupt();
        self.deps.media_tx.stop(self.call_id.as_str());
        spawn_log(
            "complete_call",
            self.deps.console.complete_call(self.call_id.clone()),
        );
        let _ = self
            .session_out_tx
            .send(SessionOut::Ended {
                call_id: self.call_id.clone(),
            })
            .await;
    }
}
