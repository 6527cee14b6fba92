use chrono::{Duration, TimeZone, Utc};
use sb_controls::*;
use sb_core::Timestamp;

fn t(secs: i64) -> Timestamp {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
}

fn machine_in(state: OperatingState) -> PumpAuthority {
    let mut m = PumpAuthority::new(PumpAuthorityConfig {
        error_threshold: 5,
        ..Default::default()
    })
    .unwrap();
    m.tick(SignalSnapshot::new(t(0), false, false, true), t(0));
    match state {
        OperatingState::NotPumping => {}
        OperatingState::Pumping => {
            m.tick(SignalSnapshot::new(t(1), true, false, false), t(1));
        }
        OperatingState::ManualPumping => {
            m.tick(SignalSnapshot::new(t(1), false, true, false), t(1));
        }
    }
    assert_eq!(m.state(), PumpState::from(state));
    assert_eq!(m.error_count(), 0);
    m
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Delta {
    Inc,
    Zero,
}

struct Case {
    bits: u8,
    from: OperatingState,
    to: OperatingState,
    delta: Delta,
    notice: Option<Severity>,
    pump_event: Option<PumpEventKind>,
}

fn case(
    bits: u8,
    from: OperatingState,
    to: OperatingState,
    delta: Delta,
    notice: Option<Severity>,
    pump_event: Option<PumpEventKind>,
) -> Case {
    Case {
        bits,
        from,
        to,
        delta,
        notice,
        pump_event,
    }
}

fn expected() -> Vec<Case> {
    use Delta::*;
    use OperatingState::{ManualPumping as M, NotPumping as N, Pumping as P};
    use PumpEventKind::*;
    use Severity::{Error as E, Warning as W};
    vec![
        case(0b000, P, P, Zero, None, None),
        case(0b000, M, M, Zero, None, None),
        case(0b000, N, N, Zero, None, None),
        case(0b100, P, P, Inc, Some(W), None),
        case(0b100, M, P, Inc, Some(W), Some(AutoPumpStart)),
        case(0b100, N, P, Zero, None, Some(AutoPumpStart)),
        case(0b010, P, P, Zero, Some(W), None),
        case(0b010, M, M, Zero, None, None),
        case(0b010, N, M, Zero, None, Some(ManualPumpStart)),
        case(0b001, P, N, Zero, None, Some(PumpStop)),
        case(0b001, M, N, Zero, None, Some(PumpStop)),
        case(0b001, N, N, Zero, None, None),
        case(0b110, P, P, Inc, Some(W), None),
        case(0b110, M, P, Inc, Some(W), Some(AutoPumpStart)),
        case(0b110, N, P, Inc, Some(W), Some(AutoPumpStart)),
        case(0b101, P, P, Inc, Some(E), None),
        case(0b101, M, M, Inc, Some(E), None),
        case(0b101, N, P, Inc, Some(E), None),
        case(0b011, P, N, Zero, Some(W), Some(PumpStop)),
        case(0b011, M, N, Zero, Some(W), Some(PumpStop)),
        case(0b011, N, N, Zero, Some(W), None),
        case(0b111, P, P, Inc, Some(E), None),
        case(0b111, M, M, Inc, Some(E), None),
        case(0b111, N, P, Inc, Some(E), None),
    ]
}

#[test]
fn every_input_and_state_matches_table() {
    let cases = expected();
    assert_eq!(cases.len(), 24);

    for c in cases {
        let mut m = machine_in(c.from);
        let inputs = Inputs::from_bits(c.bits);
        let snap = SignalSnapshot::new(t(60), inputs.tank_full, inputs.manual_start, inputs.tank_empty);
        let out = m.tick(snap, t(60));
        let label = format!("{:03b} from {:?}", c.bits, c.from);

        assert_eq!(out.state, PumpState::from(c.to), "{label}: next state");
        let want_count = match c.delta {
            Delta::Inc => 1,
            Delta::Zero => 0,
        };
        assert_eq!(m.error_count(), want_count, "{label}: error count");
        assert_eq!(
            out.command,
            ActuatorCommand::for_state(PumpState::from(c.to)),
            "{label}: command"
        );

        let notices: Vec<Severity> = out
            .events
            .iter()
            .filter_map(|e| e.notice())
            .filter(|(_, msg)| msg.contains("received"))
            .map(|(sev, _)| sev)
            .collect();
        assert_eq!(notices, c.notice.into_iter().collect::<Vec<_>>(), "{label}: notice");

        let kinds: Vec<PumpEventKind> = out
            .events
            .iter()
            .filter_map(|e| match e {
                DomainEvent::PumpEvent(p) => Some(p.kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, c.pump_event.into_iter().collect::<Vec<_>>(), "{label}: pump event");

        let changed = out
            .events
            .iter()
            .any(|e| matches!(e, DomainEvent::StateChanged { .. }));
        assert_eq!(changed, c.from != c.to, "{label}: state change event");
    }
}

#[test]
fn table_rows_agree_with_machine_cases() {
    let table = TransitionTable;
    for c in expected() {
        let row = table.lookup(TransitionKey::new(Inputs::from_bits(c.bits), c.from));
        assert_eq!(row.next, c.to);
        assert_eq!(row.notice.map(|n| n.severity), c.notice);
        let inc = row.counter == CounterEffect::Increment;
        assert_eq!(inc, c.delta == Delta::Inc);
    }
}

#[test]
fn empty_while_idle_keeps_first_end_time() {
    let mut m = machine_in(OperatingState::NotPumping);
    assert_eq!(m.session().pump_end_time, Some(t(0)));
    m.tick(SignalSnapshot::new(t(30), false, false, true), t(30));
    assert_eq!(m.session().pump_end_time, Some(t(0)));
}
