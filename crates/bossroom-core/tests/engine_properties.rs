//! Property tests for engine accounting under arbitrary operation sequences.

use bossroom_core::{EngineConfig, Event, SessionEngine, SessionState, Task};
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Start { max_secs: u64, focus: bool },
    Pause,
    Resume,
    Freeze,
    Thaw,
    Background,
    Foreground,
    Tick,
    Retreat,
    Advance(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..3000, any::<bool>()).prop_map(|(max_secs, focus)| Op::Start { max_secs, focus }),
        Just(Op::Pause),
        Just(Op::Resume),
        Just(Op::Freeze),
        Just(Op::Thaw),
        Just(Op::Background),
        Just(Op::Foreground),
        Just(Op::Tick),
        Just(Op::Retreat),
        (1i64..900).prop_map(Op::Advance),
    ]
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()
}

proptest! {
    #[test]
    fn accounting_stays_in_bounds(ops in proptest::collection::vec(op(), 1..60)) {
        let config = EngineConfig::default();
        let cap = config.freeze_token_cap;
        let mut engine = SessionEngine::new(config, Default::default());
        let mut now = t0();
        let mut started = 0u32;
        let mut ended = 0u32;

        for op in ops {
            match op {
                Op::Start { max_secs, focus } => {
                    let task = if focus {
                        Task::focus("p", max_secs)
                    } else {
                        Task::passive("p", max_secs)
                    };
                    engine.start_battle(task, now);
                }
                Op::Pause => { engine.pause(now); }
                Op::Resume => { engine.resume(now); }
                Op::Freeze => { engine.freeze(now); }
                Op::Thaw => { engine.resume_from_freeze(now); }
                Op::Background => { engine.handle_backgrounding(now); }
                Op::Foreground => engine.handle_foregrounding(now),
                Op::Tick => { engine.tick(now); }
                Op::Retreat => { engine.retreat(now); }
                Op::Advance(secs) => now += Duration::seconds(secs),
            }

            for event in engine.drain_events() {
                match event {
                    Event::BattleStarted { .. } => started += 1,
                    Event::SessionEnded { .. } => ended += 1,
                    _ => {}
                }
            }

            prop_assert!(engine.freeze_tokens_remaining() <= cap);
            if let Some(task) = engine.current_task() {
                prop_assert!(task.remaining_ms() <= task.max_duration_ms());
                prop_assert!(engine.remaining_ms(now) <= task.max_duration_ms());
                let progress = engine.progress(now);
                prop_assert!((0.0..=1.0).contains(&progress));
            }
            if engine.state().has_active_task() {
                prop_assert!(engine.wasted_ms() <= engine.total_elapsed_ms(now));
            }
            prop_assert!(ended <= started);
            prop_assert!(started - ended <= 1);
        }
    }

    #[test]
    fn ticking_a_focus_battle_always_ends_it(max_secs in 1u64..5000, step in 1i64..120) {
        let mut engine = SessionEngine::default();
        engine.start_battle(Task::focus("p", max_secs), t0());
        let mut now = t0();
        let mut results = Vec::new();
        while now <= t0() + Duration::seconds(max_secs as i64 + step) {
            now += Duration::seconds(step);
            if let Some(result) = engine.tick(now) {
                results.push(result);
            }
        }
        prop_assert_eq!(results.len(), 1);
        prop_assert_eq!(engine.state(), SessionState::Victory);
        prop_assert_eq!(results[0].focused_secs, max_secs);
    }
}
