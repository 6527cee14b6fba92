use chrono::{Duration, TimeZone, Utc};
use sb_controls::*;
use sb_core::Timestamp;

fn t(secs: i64) -> Timestamp {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
}

#[test]
fn manual_start_from_idle() {
    let mut m = PumpAuthority::new(PumpAuthorityConfig::default()).unwrap();
    let out = m.tick(SignalSnapshot::new(t(7), false, true, false), t(7));

    assert_eq!(out.state, PumpState::ManualPumping);
    assert_eq!(out.command, ActuatorCommand::On);
    assert_eq!(m.session().pump_start_time, Some(t(7)));
    assert_eq!(m.error_count(), 0);

    let queued: Vec<_> = out
        .events
        .iter()
        .filter_map(|e| match e {
            DomainEvent::PumpEvent(p) => Some(p.kind),
            _ => None,
        })
        .collect();
    assert_eq!(queued, vec![PumpEventKind::ManualPumpStart]);
}

#[test]
fn conflicting_signals_escalate_to_fatal_on_next_tick() {
    let mut m = PumpAuthority::new(PumpAuthorityConfig {
        error_threshold: 3,
        ..Default::default()
    })
    .unwrap();
    m.tick(SignalSnapshot::new(t(0), true, false, false), t(0));
    m.tick(SignalSnapshot::new(t(1), true, false, true), t(1));
    m.tick(SignalSnapshot::new(t(2), true, false, true), t(2));
    assert_eq!(m.state(), PumpState::Pumping);
    assert_eq!(m.error_count(), 2);

    let out = m.tick(SignalSnapshot::new(t(3), true, false, true), t(3));
    assert_eq!(out.state, PumpState::Pumping);
    assert_eq!(m.error_count(), 3);
    assert!(out.events.iter().any(|e| matches!(
        e,
        DomainEvent::Error { message }
            if message.contains("simultaneous tank empty and tank full")
    )));

    let out = m.tick(SignalSnapshot::new(t(4), false, false, false), t(4));
    assert_eq!(out.state, PumpState::ErrorState);
    assert_eq!(out.command, ActuatorCommand::Off);
    assert!(out
        .events
        .iter()
        .any(|e| matches!(e, DomainEvent::FatalStop { .. })));
}

#[test]
fn fill_time_is_difference_of_stop_and_full() {
    let mut m = PumpAuthority::new(PumpAuthorityConfig {
        reserve_volume_gal: 10.0,
        ..Default::default()
    })
    .unwrap();
    m.tick(SignalSnapshot::new(t(0), false, true, false), t(0));
    m.tick(SignalSnapshot::new(t(20), false, false, true), t(20));
    let out = m.tick(SignalSnapshot::new(t(380), true, false, false), t(380));

    let event = out
        .events
        .iter()
        .find_map(|e| match e {
            DomainEvent::PumpEvent(p) => Some(p.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(event.kind, PumpEventKind::AutoPumpStart);
    assert_eq!(event.fill_time_s, Some(360.0));
    assert!((event.gallons_per_hour.unwrap() - 100.0).abs() < 1e-9);
}

#[test]
fn relay_guard_forces_off_after_run() {
    let mut m = PumpAuthority::new(PumpAuthorityConfig::default()).unwrap();
    let mut relay = MemoryRelay::new();
    {
        let mut guard = RelayGuard::new(&mut relay);
        let out = m.tick(SignalSnapshot::new(t(0), true, false, false), t(0));
        guard.apply(out.command).unwrap();
        assert_eq!(guard.current(), ActuatorCommand::On);
    }
    assert_eq!(relay.current(), ActuatorCommand::Off);
    assert_eq!(relay.forced_off, 1);
}
