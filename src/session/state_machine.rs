/// 対話フェーズ。遷移はこのモジュールの純粋関数のみが決める。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Entry,
    Qa,
    AfterConfirm,
    Waiting,
    NotHeard,
    Closing,
    HandoffConfirm,
    Handoff,
    Ended,
}

/// フェーズ遷移を駆動する対話イベント（確定転写の分類結果など）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    CallStarted,
    GreetingDone,
    Answered,
    Confirmed,
    Denied,
    Unclear,
    NotHeard,
    HandoffRequested,
    HandoffAccepted,
    HandoffDeclined,
    ClosingRequested,
    ReminderFired,
    HangupRequested,
}

/// 純粋な遷移表。副作用は一切持たない。
pub fn next_phase(phase: Phase, event: PhaseEvent) -> Phase {
    use Phase::*;
    use PhaseEvent::*;

    // Handoff 発火は（確定後の終端を除き）どの状態からでも可能
    if matches!(event, HandoffRequested) && !matches!(phase, Handoff | Ended) {
        return HandoffConfirm;
    }
    if matches!(event, HangupRequested) {
        return Ended;
    }

    match (phase, event) {
        (Init, CallStarted) => Entry,
        (Entry, GreetingDone) => Qa,
        (Entry, Answered) => Qa,
        (Qa, Answered) => AfterConfirm,
        (Qa, Unclear) => Qa,
        (Qa, PhaseEvent::NotHeard) => Phase::NotHeard,
        (Qa, ClosingRequested) => Closing,
        (Qa, ReminderFired) => Waiting,
        (AfterConfirm, Confirmed) => Closing,
        (AfterConfirm, Denied) => Qa,
        (AfterConfirm, Unclear) => AfterConfirm,
        (AfterConfirm, PhaseEvent::NotHeard) => Phase::NotHeard,
        (AfterConfirm, ReminderFired) => Waiting,
        (Waiting, Answered) => AfterConfirm,
        (Waiting, Unclear) => Qa,
        (Waiting, PhaseEvent::NotHeard) => Phase::NotHeard,
        (Waiting, ClosingRequested) => Closing,
        (Phase::NotHeard, Answered) => AfterConfirm,
        (Phase::NotHeard, Unclear) => Qa,
        (Phase::NotHeard, PhaseEvent::NotHeard) => Phase::NotHeard,
        (Phase::NotHeard, ClosingRequested) => Closing,
        (Phase::NotHeard, ReminderFired) => Waiting,
        (Closing, Confirmed) => Ended,
        (Closing, ClosingRequested) => Ended,
        (Closing, Answered) => Qa,
        (HandoffConfirm, HandoffAccepted) => Handoff,
        (HandoffConfirm, Confirmed) => Handoff,
        (HandoffConfirm, HandoffDeclined) => Qa,
        (HandoffConfirm, Denied) => Qa,
        (other, _) => other,
    }
}

/// Pure dialogue phase machine: transitions only, no I/O.
pub struct PhaseMachine {
    phase: Phase,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self { phase: Phase::Init }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn advance(&mut self, event: PhaseEvent) -> Phase {
        self.phase = next_phase(self.phase, event);
        self.phase
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_flow() {
        let mut m = PhaseMachine::new();
        assert_eq!(m.phase(), Phase::Init);
        assert_eq!(m.advance(PhaseEvent::CallStarted), Phase::Entry);
        assert_eq!(m.advance(PhaseEvent::GreetingDone), Phase::Qa);
    }

    #[test]
    fn qa_confirm_closing() {
        let mut m = PhaseMachine::new();
        m.advance(PhaseEvent::CallStarted);
        m.advance(PhaseEvent::GreetingDone);
        assert_eq!(m.advance(PhaseEvent::Answered), Phase::AfterConfirm);
        assert_eq!(m.advance(PhaseEvent::Confirmed), Phase::Closing);
        assert_eq!(m.advance(PhaseEvent::ClosingRequested), Phase::Ended);
    }

    #[test]
    fn deny_returns_to_qa() {
        let mut m = PhaseMachine::new();
        m.advance(PhaseEvent::CallStarted);
        m.advance(PhaseEvent::GreetingDone);
        m.advance(PhaseEvent::Answered);
        assert_eq!(m.advance(PhaseEvent::Denied), Phase::Qa);
    }

    #[test]
    fn handoff_reachable_from_any_phase() {
        for phase in [
            Phase::Init,
            Phase::Entry,
            Phase::Qa,
            Phase::AfterConfirm,
            Phase::Waiting,
            Phase::NotHeard,
            Phase::Closing,
        ] {
            assert_eq!(
                next_phase(phase, PhaseEvent::HandoffRequested),
                Phase::HandoffConfirm,
                "from {:?}",
                phase
            );
        }
        // 確定済みhandoffと終端からは遷移しない
        assert_eq!(
            next_phase(Phase::Handoff, PhaseEvent::HandoffRequested),
            Phase::Handoff
        );
        assert_eq!(
            next_phase(Phase::Ended, PhaseEvent::HandoffRequested),
            Phase::Ended
        );
    }

    #[test]
    fn handoff_confirm_branches() {
        assert_eq!(
            next_phase(Phase::HandoffConfirm, PhaseEvent::HandoffAccepted),
            Phase::Handoff
        );
        assert_eq!(
            next_phase(Phase::HandoffConfirm, PhaseEvent::HandoffDeclined),
            Phase::Qa
        );
    }

    #[test]
    fn hangup_is_terminal_from_anywhere() {
        for phase in [Phase::Init, Phase::Qa, Phase::Handoff, Phase::Waiting] {
            assert_eq!(next_phase(phase, PhaseEvent::HangupRequested), Phase::Ended);
        }
    }

    #[test]
    fn unknown_combination_stays_put() {
        assert_eq!(next_phase(Phase::Init, PhaseEvent::Confirmed), Phase::Init);
        assert_eq!(next_phase(Phase::Ended, PhaseEvent::Answered), Phase::Ended);
    }
}
