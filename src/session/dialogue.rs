use crate::session::state_machine::{Phase, PhaseEvent, PhaseMachine};

/// 応答テンプレートID。コンソールへの記録や重複抑止の単位。
pub mod template {
    pub const GREETING: &str = "greeting";
    pub const ENTRY_ACK: &str = "entry_ack";
    pub const QA_ANSWER: &str = "qa_answer";
    pub const DIDNT_UNDERSTAND: &str = "didnt_understand";
    pub const PLEASE_REPEAT: &str = "please_repeat";
    pub const RECONFIRM_ESCALATION: &str = "reconfirm_escalation";
    pub const HANDOFF_CONFIRM: &str = "handoff_confirm";
    pub const HANDOFF_ACCEPTED: &str = "handoff_accepted";
    pub const HANDOFF_DECLINED: &str = "handoff_declined";
    pub const CLOSING: &str = "closing";
    pub const GOODBYE: &str = "goodbye";
    pub const NO_INPUT_REMINDER: &str = "no_input_reminder";
    pub const BACKCHANNEL: &str = "backchannel";
}

pub fn reply_text_for(template_id: &str) -> &'static str {
    match template_id {
        template::GREETING => "お電話ありがとうございます。ご用件をお話しください。",
        template::ENTRY_ACK => "かしこまりました。ご質問をどうぞ。",
        template::QA_ANSWER => "ご質問にお答えします。",
        template::DIDNT_UNDERSTAND => "すみません、よくわかりませんでした。もう一度お願いします。",
        template::PLEASE_REPEAT => "恐れ入ります、もう一度おっしゃっていただけますか。",
        template::RECONFIRM_ESCALATION => {
            "聞き取りが難しいようです。オペレーターにおつなぎしましょうか。"
        }
        template::HANDOFF_CONFIRM => "オペレーターにおつなぎしてよろしいですか。",
        template::HANDOFF_ACCEPTED => "オペレーターにおつなぎします。少々お待ちください。",
        template::HANDOFF_DECLINED => "かしこまりました。引き続きご用件をどうぞ。",
        template::CLOSING => "他にご用件はございますか。",
        template::GOODBYE => "お電話ありがとうございました。失礼いたします。",
        template::NO_INPUT_REMINDER => "お客様、聞こえておりますでしょうか。",
        template::BACKCHANNEL => "はい。",
        _ => "",
    }
}

/// 確定転写から推定する発話意図
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Answer,
    Confirm,
    Deny,
    HandoffRequest,
    ClosingRequest,
    NotHeard,
    Unclear,
}

const HANDOFF_KEYWORDS: &[&str] = &["オペレーター", "担当者", "人間", "転送", "代わって"];
const CONFIRM_KEYWORDS: &[&str] = &["はい", "ええ", "お願いします", "そうです", "大丈夫"];
const DENY_KEYWORDS: &[&str] = &["いいえ", "いえ", "違います", "結構です", "けっこうです"];
const CLOSING_KEYWORDS: &[&str] = &[
    "さようなら",
    "失礼します",
    "ありがとうございました",
    "切ります",
    "以上です",
];
// 最小のFAQ表。内容の語彙はテナント側で差し替わる前提の placeholder。
const QA_KEYWORDS: &[&str] = &["営業時間", "場所", "住所", "料金", "予約", "hello", "こんにちは"];

pub fn classify_intent(text: &str) -> Intent {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Intent::NotHeard;
    }
    let contains = |set: &[&str]| set.iter().any(|kw| trimmed.contains(kw));
    if contains(HANDOFF_KEYWORDS) {
        return Intent::HandoffRequest;
    }
    if contains(CLOSING_KEYWORDS) {
        return Intent::ClosingRequest;
    }
    if contains(DENY_KEYWORDS) {
        return Intent::Deny;
    }
    if contains(CONFIRM_KEYWORDS) {
        return Intent::Confirm;
    }
    if contains(QA_KEYWORDS) {
        return Intent::Answer;
    }
    Intent::Unclear
}

/// ハンドオフ副状態機械
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffState {
    Idle,
    Confirming,
    Accepted,
    Declined,
}

/// フェーズハンドラの出力
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DialogueOutcome {
    pub reply_text: Option<String>,
    pub template_ids: Vec<&'static str>,
    pub transfer_requested: bool,
    pub hangup_requested: bool,
}

impl DialogueOutcome {
    fn with_template(template_id: &'static str) -> Self {
        Self {
            reply_text: Some(reply_text_for(template_id).to_string()),
            template_ids: vec![template_id],
            ..Default::default()
        }
    }

    fn silent() -> Self {
        Self::default()
    }
}

const UNCLEAR_STREAK_HANDOFF_THRESHOLD: u32 = 2;
const NOT_HEARD_STREAK_ESCALATION: u32 = 2;
const HANDOFF_CONFIRM_MAX_RETRIES: u32 = 2;

/// 呼ごとの対話状態。フェーズ遷移・ストリーク・ハンドオフ副状態を束ねる。
/// phase の変更は必ずこの型を通る。
pub struct DialogueState {
    machine: PhaseMachine,
    handoff_state: HandoffState,
    handoff_retry_count: u32,
    unclear_streak: u32,
    not_heard_streak: u32,
    transfer_executed: bool,
    reminders_sent: u32,
    max_reminders: u32,
}

impl DialogueState {
    pub fn new(max_reminders: u32) -> Self {
        Self {
            machine: PhaseMachine::new(),
            handoff_state: HandoffState::Idle,
            handoff_retry_count: 0,
            unclear_streak: 0,
            not_heard_streak: 0,
            transfer_executed: false,
            reminders_sent: 0,
            max_reminders,
        }
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    pub fn handoff_state(&self) -> HandoffState {
        self.handoff_state
    }

    pub fn unclear_streak(&self) -> u32 {
        self.unclear_streak
    }

    pub fn not_heard_streak(&self) -> u32 {
        self.not_heard_streak
    }

    pub fn transfer_executed(&self) -> bool {
        self.transfer_executed
    }

    /// 呼開始。挨拶を返し ENTRY へ。
    pub fn on_call_started(&mut self) -> DialogueOutcome {
        self.machine.advance(PhaseEvent::CallStarted);
        DialogueOutcome::with_template(template::GREETING)
    }

    /// 確定転写ごとの主ハンドラ。
    pub fn on_final_transcript(&mut self, text: &str) -> DialogueOutcome {
        if matches!(self.phase(), Phase::Ended | Phase::Handoff) {
            // 転送確定後・終端後の転写は握りつぶす（転送は一度しか実行しない）
            return DialogueOutcome::silent();
        }

        let intent = classify_intent(text);

        let mut outcome = if self.handoff_state == HandoffState::Confirming {
            self.handle_handoff_confirm(intent)
        } else {
            self.handle_phase(intent)
        };

        self.apply_streak_guards(&mut outcome);
        outcome
    }

    /// 無入力タイマ発火。上限までリマインド、その後は通常の切断へ。
    pub fn on_no_input_timeout(&mut self) -> DialogueOutcome {
        self.reminders_sent += 1;
        if self.reminders_sent <= self.max_reminders {
            self.machine.advance(PhaseEvent::ReminderFired);
            DialogueOutcome::with_template(template::NO_INPUT_REMINDER)
        } else {
            self.machine.advance(PhaseEvent::HangupRequested);
            let mut outcome = DialogueOutcome::with_template(template::GOODBYE);
            outcome.hangup_requested = true;
            outcome
        }
    }

    /// 声が戻ったらリマインド回数を戻す
    pub fn on_voice_detected(&mut self) {
        self.reminders_sent = 0;
    }

    pub fn on_backchannel(&mut self) -> DialogueOutcome {
        DialogueOutcome::with_template(template::BACKCHANNEL)
    }

    fn handle_phase(&mut self, intent: Intent) -> DialogueOutcome {
        match self.phase() {
            Phase::Init => {
                // call_start 前に転写が来ることは無いはずだが、来ても落とさない
                self.machine.advance(PhaseEvent::CallStarted);
                DialogueOutcome::with_template(template::GREETING)
            }
            Phase::Entry => {
                if intent == Intent::HandoffRequest {
                    return self.begin_handoff_confirm();
                }
                self.machine.advance(PhaseEvent::GreetingDone);
                DialogueOutcome::with_template(template::ENTRY_ACK)
            }
            Phase::Qa | Phase::Waiting | Phase::NotHeard | Phase::AfterConfirm => {
                self.handle_qa_family(intent)
            }
            Phase::Closing => match intent {
                Intent::HandoffRequest => self.begin_handoff_confirm(),
                Intent::Confirm | Intent::ClosingRequest => {
                    self.machine.advance(PhaseEvent::ClosingRequested);
                    let mut outcome = DialogueOutcome::with_template(template::GOODBYE);
                    outcome.hangup_requested = true;
                    outcome
                }
                Intent::NotHeard => {
                    self.machine.advance(PhaseEvent::NotHeard);
                    DialogueOutcome::with_template(template::PLEASE_REPEAT)
                }
                Intent::Unclear => {
                    self.machine.advance(PhaseEvent::Unclear);
                    DialogueOutcome::with_template(template::DIDNT_UNDERSTAND)
                }
                _ => {
                    self.machine.advance(PhaseEvent::Answered);
                    DialogueOutcome::with_template(template::QA_ANSWER)
                }
            },
            Phase::HandoffConfirm => self.handle_handoff_confirm(intent),
            Phase::Handoff | Phase::Ended => DialogueOutcome::silent(),
        }
    }

    fn handle_qa_family(&mut self, intent: Intent) -> DialogueOutcome {
        match intent {
            Intent::HandoffRequest => self.begin_handoff_confirm(),
            Intent::ClosingRequest => {
                self.machine.advance(PhaseEvent::ClosingRequested);
                DialogueOutcome::with_template(template::CLOSING)
            }
            Intent::Answer => {
                self.machine.advance(PhaseEvent::Answered);
                DialogueOutcome::with_template(template::QA_ANSWER)
            }
            Intent::Confirm => {
                if self.phase() == Phase::AfterConfirm {
                    self.machine.advance(PhaseEvent::Confirmed);
                    DialogueOutcome::with_template(template::CLOSING)
                } else {
                    self.machine.advance(PhaseEvent::Unclear);
                    DialogueOutcome::with_template(template::DIDNT_UNDERSTAND)
                }
            }
            Intent::Deny => {
                if self.phase() == Phase::AfterConfirm {
                    self.machine.advance(PhaseEvent::Denied);
                    DialogueOutcome::with_template(template::ENTRY_ACK)
                } else {
                    self.machine.advance(PhaseEvent::Unclear);
                    DialogueOutcome::with_template(template::DIDNT_UNDERSTAND)
                }
            }
            Intent::NotHeard => {
                self.machine.advance(PhaseEvent::NotHeard);
                DialogueOutcome::with_template(template::PLEASE_REPEAT)
            }
            Intent::Unclear => {
                self.machine.advance(PhaseEvent::Unclear);
                DialogueOutcome::with_template(template::DIDNT_UNDERSTAND)
            }
        }
    }

    fn begin_handoff_confirm(&mut self) -> DialogueOutcome {
        self.machine.advance(PhaseEvent::HandoffRequested);
        self.handoff_state = HandoffState::Confirming;
        self.handoff_retry_count = 0;
        DialogueOutcome::with_template(template::HANDOFF_CONFIRM)
    }

    fn handle_handoff_confirm(&mut self, intent: Intent) -> DialogueOutcome {
        match intent {
            Intent::Confirm | Intent::HandoffRequest => self.accept_handoff(),
            Intent::Deny => {
                self.machine.advance(PhaseEvent::HandoffDeclined);
                // declined は即座に idle へ戻り、再度の要求を受け付ける
                self.handoff_state = HandoffState::Idle;
                self.handoff_retry_count = 0;
                DialogueOutcome::with_template(template::HANDOFF_DECLINED)
            }
            _ => {
                self.handoff_retry_count += 1;
                if self.handoff_retry_count > HANDOFF_CONFIRM_MAX_RETRIES {
                    // 確認が成立しないまま続くなら安全側でつなぐ
                    self.accept_handoff()
                } else {
                    DialogueOutcome::with_template(template::HANDOFF_CONFIRM)
                }
            }
        }
    }

    fn accept_handoff(&mut self) -> DialogueOutcome {
        self.machine.advance(PhaseEvent::HandoffAccepted);
        self.handoff_state = HandoffState::Accepted;
        let mut outcome = DialogueOutcome::with_template(template::HANDOFF_ACCEPTED);
        // 転送コールバックは呼ごとに最大一度（再送転写でも発火しない）
        if !self.transfer_executed {
            self.transfer_executed = true;
            outcome.transfer_requested = true;
        }
        outcome
    }

    /// 聞き取り不能/聞こえないストリークの番人。選ばれたテンプレートを見て更新する。
    fn apply_streak_guards(&mut self, outcome: &mut DialogueOutcome) {
        let chose = |id: &str| outcome.template_ids.iter().any(|t| *t == id);

        if chose(template::DIDNT_UNDERSTAND) {
            self.unclear_streak += 1;
        } else {
            self.unclear_streak = 0;
        }

        if chose(template::PLEASE_REPEAT) {
            self.not_heard_streak += 1;
        } else {
            self.not_heard_streak = 0;
        }

        if self.unclear_streak >= UNCLEAR_STREAK_HANDOFF_THRESHOLD
            && self.handoff_state != HandoffState::Confirming
            && self.handoff_state != HandoffState::Accepted
        {
            // 不明応答が続いたら HANDOFF_REQUEST を強制注入
            self.unclear_streak = 0;
            *outcome = self.begin_handoff_confirm();
            return;
        }

        if self.not_heard_streak >= NOT_HEARD_STREAK_ESCALATION
            && self.handoff_state == HandoffState::Idle
        {
            // 2回連続で聞き返したら、次はエスカレーション予告に切り替える
            self.not_heard_streak = 0;
            self.handoff_state = HandoffState::Confirming;
            *outcome = DialogueOutcome::with_template(template::RECONFIRM_ESCALATION);
        }
    }
}
