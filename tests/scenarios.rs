//! End-to-end exploration scenarios: the engine must find the classic
//! concurrency bugs within a modest trial budget, and must stay quiet on
//! correctly synchronized variants of the same programs.

use interweave::{
    AccessKey, Config, HotspotContract, MonitorId, ObjectId, TrialFailure, WakeReason, explore,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[test]
fn opposed_lock_order_is_a_resource_deadlock() {
    let a = MonitorId::named("A");
    let b = MonitorId::named("B");
    let result = explore(
        Config::new().with_seed(0x0a11ce).with_max_trials(200),
        move |h| {
            let first = h.spawn(move |h| {
                h.lock(a);
                h.yield_now();
                h.lock(b);
                h.unlock(b);
                h.unlock(a);
            });
            let second = h.spawn(move |h| {
                h.lock(b);
                h.yield_now();
                h.lock(a);
                h.unlock(a);
                h.unlock(b);
            });
            h.join(first);
            h.join(second);
        },
    )
    .expect("session");

    let failure = result.failure.expect("the opposed order must deadlock");
    assert!(failure.is_deadlock(), "{failure}");
    match failure {
        TrialFailure::ResourceDeadlock { cycle, victims } => {
            assert_eq!(cycle.len(), 2, "two monitors form the cycle");
            assert!(!victims.is_empty());
        }
        other => panic!("expected a resource deadlock, got {other}"),
    }
}

#[test]
fn opposed_lock_order_without_cycle_detection_is_a_wait_deadlock() {
    let a = MonitorId::named("A");
    let b = MonitorId::named("B");
    let result = explore(
        Config::new()
            .with_seed(0x0a11ce)
            .with_max_trials(200)
            .with_resource_deadlock_detection(false),
        move |h| {
            let first = h.spawn(move |h| {
                h.lock(a);
                h.yield_now();
                h.lock(b);
                h.unlock(b);
                h.unlock(a);
            });
            let second = h.spawn(move |h| {
                h.lock(b);
                h.yield_now();
                h.lock(a);
                h.unlock(a);
                h.unlock(b);
            });
            h.join(first);
            h.join(second);
        },
    )
    .expect("session");

    let failure = result.failure.expect("must still deadlock");
    assert!(
        matches!(failure, TrialFailure::WaitDeadlock { .. }),
        "{failure}"
    );
}

#[test]
fn dining_philosophers_ring_deadlocks() {
    let forks: Vec<MonitorId> = (0..4)
        .map(|i| MonitorId::named(&format!("fork-{i}")))
        .collect();
    let result = explore(
        Config::new().with_seed(0xd1e7).with_max_trials(400),
        move |h| {
            let seats: Vec<_> = (0..4)
                .map(|i| {
                    let left = forks[i];
                    let right = forks[(i + 1) % 4];
                    h.spawn(move |h| {
                        h.lock(left);
                        h.yield_now();
                        h.lock(right);
                        h.unlock(right);
                        h.unlock(left);
                    })
                })
                .collect();
            for seat in seats {
                h.join(seat);
            }
        },
    )
    .expect("session");

    let failure = result.failure.expect("the ring must deadlock");
    assert!(failure.is_deadlock(), "{failure}");
}

#[test]
fn consistent_lock_order_never_deadlocks() {
    let a = MonitorId::named("A");
    let b = MonitorId::named("B");
    let result = explore(
        Config::new().with_seed(0xbeef).with_max_trials(100),
        move |h| {
            for _ in 0..2 {
                h.spawn(move |h| {
                    h.lock(a);
                    h.lock(b);
                    h.yield_now();
                    h.unlock(b);
                    h.unlock(a);
                });
            }
        },
    )
    .expect("session");
    assert!(result.is_pass(), "{:?}", result.failure);
}

#[test]
fn unguarded_counter_races_when_throwing() {
    let key = AccessKey::new(ObjectId::named("counter"), "value");
    let result = explore(
        Config::new()
            .with_seed(0x7ace)
            .with_max_trials(200)
            .with_race_detection(true, true),
        move |h| {
            for _ in 0..2 {
                h.spawn(move |h| {
                    h.begin_write(key);
                    h.yield_now();
                    h.end_write(key);
                });
            }
        },
    )
    .expect("session");

    let failure = result.failure.expect("overlapping writes must race");
    assert!(failure.is_race(), "{failure}");
}

#[test]
fn unguarded_counter_race_is_only_logged_by_default() {
    let key = AccessKey::new(ObjectId::named("counter"), "value");
    let result = explore(
        Config::new().with_seed(0x7ace).with_max_trials(50),
        move |h| {
            for _ in 0..2 {
                h.spawn(move |h| {
                    h.begin_write(key);
                    h.yield_now();
                    h.end_write(key);
                });
            }
        },
    )
    .expect("session");
    assert!(result.is_pass(), "{:?}", result.failure);
}

#[test]
fn guarded_counter_never_races() {
    let m = MonitorId::named("guard");
    let key = AccessKey::new(ObjectId::named("counter"), "value");
    let result = explore(
        Config::new()
            .with_seed(0x5eed)
            .with_max_trials(100)
            .with_race_detection(true, true),
        move |h| {
            for _ in 0..2 {
                h.spawn(move |h| {
                    h.lock(m);
                    h.begin_write(key);
                    h.yield_now();
                    h.end_write(key);
                    h.unlock(m);
                });
            }
        },
    )
    .expect("session");
    assert!(result.is_pass(), "{:?}", result.failure);
}

#[test]
fn lost_update_is_a_legitimate_outcome_without_throwing() {
    use interweave::PolicyKind;
    use std::collections::BTreeSet;

    let counter = Arc::new(AtomicU32::new(0));
    let outcomes = Arc::new(Mutex::new(BTreeSet::new()));
    let sink = Arc::clone(&outcomes);
    let result = explore(
        Config::new()
            .with_seed(0x106e)
            .with_max_trials(100)
            .with_policy(PolicyKind::Memoryless),
        move |h| {
            counter.store(0, Ordering::SeqCst);
            let workers: Vec<_> = (0..2)
                .map(|_| {
                    let shared = Arc::clone(&counter);
                    h.spawn(move |h| {
                        let seen = shared.load(Ordering::SeqCst);
                        h.yield_now();
                        shared.store(seen + 1, Ordering::SeqCst);
                    })
                })
                .collect();
            for worker in workers {
                h.join(worker);
            }
            let total = counter.load(Ordering::SeqCst);
            assert!(total == 1 || total == 2, "impossible counter {total}");
            sink.lock().expect("outcomes").insert(total);
        },
    )
    .expect("session");
    assert!(result.is_pass(), "{:?}", result.failure);
    // Exploration must exhibit both the clean schedule and the lost update.
    assert_eq!(
        *outcomes.lock().expect("outcomes"),
        BTreeSet::from([1, 2])
    );
}

#[test]
fn only_one_thread_runs_between_yield_points() {
    let in_region = Arc::new(AtomicBool::new(false));
    let result = explore(
        Config::new().with_seed(0x5010).with_max_trials(50),
        move |h| {
            for _ in 0..3 {
                let region = Arc::clone(&in_region);
                h.spawn(move |h| {
                    for _ in 0..3 {
                        assert!(!region.swap(true, Ordering::SeqCst), "overlap");
                        assert!(region.swap(false, Ordering::SeqCst), "overlap");
                        h.yield_now();
                    }
                });
            }
        },
    )
    .expect("session");
    assert!(result.is_pass(), "{:?}", result.failure);
}

#[test]
fn flag_handoff_is_always_consumed() {
    let m = MonitorId::named("flag");
    let flag = Arc::new(AtomicBool::new(false));
    let result = explore(
        Config::new()
            .with_seed(0xf1a6)
            .with_max_trials(100)
            .with_hotspot(HotspotContract::always("consumed")),
        move |h| {
            flag.store(false, Ordering::SeqCst);
            let shared = Arc::clone(&flag);
            let consumer = h.spawn(move |h| {
                h.lock(m);
                while !shared.load(Ordering::SeqCst) {
                    h.wait(m);
                }
                h.unlock(m);
                h.hotspot("consumed");
            });
            h.lock(m);
            flag.store(true, Ordering::SeqCst);
            h.notify_all(m);
            h.unlock(m);
            h.join(consumer);
        },
    )
    .expect("session");
    assert!(result.is_pass(), "{:?}", result.failure);
}

#[test]
fn missing_notify_is_a_wait_deadlock() {
    let m = MonitorId::named("orphan");
    let result = explore(
        Config::new().with_seed(0xdead).with_max_trials(10),
        move |h| {
            h.lock(m);
            h.wait(m);
            h.unlock(m);
        },
    )
    .expect("session");
    let failure = result.failure.expect("nobody ever notifies");
    assert!(
        matches!(failure, TrialFailure::WaitDeadlock { .. }),
        "{failure}"
    );
    assert_eq!(result.failing_trial, Some(0), "every schedule deadlocks");
}

#[test]
fn wait_timeout_expires_on_the_logical_clock() {
    let m = MonitorId::named("timer");
    let seen = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&seen);
    let result = explore(
        Config::new().with_seed(0x71c5).with_max_trials(5),
        move |h| {
            h.lock(m);
            let reason = h.wait_timeout(m, 5);
            h.unlock(m);
            *slot.lock().expect("slot") = Some(reason);
        },
    )
    .expect("session");
    assert!(result.is_pass(), "{:?}", result.failure);
    assert_eq!(*seen.lock().expect("slot"), Some(WakeReason::Timeout));
}

#[test]
fn interrupt_wakes_an_untimed_wait() {
    let m = MonitorId::named("parked");
    let seen = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&seen);
    let result = explore(
        Config::new().with_seed(0x1177).with_max_trials(20),
        move |h| {
            let slot = Arc::clone(&slot);
            let waiter = h.spawn(move |h| {
                h.lock(m);
                let reason = h.wait(m);
                h.unlock(m);
                *slot.lock().expect("slot") = Some(reason);
            });
            h.interrupt(waiter);
            h.join(waiter);
        },
    )
    .expect("session");
    assert!(result.is_pass(), "{:?}", result.failure);
    assert_eq!(*seen.lock().expect("slot"), Some(WakeReason::Interrupted));
}

#[test]
fn wait_preserves_reentrant_lock_depth() {
    let m = MonitorId::named("nested");
    let result = explore(
        Config::new().with_seed(0x2222).with_max_trials(10),
        move |h| {
            h.lock(m);
            h.lock(m);
            let reason = h.wait_timeout(m, 3);
            assert_eq!(reason, WakeReason::Timeout);
            // Depth was restored: both unlocks must succeed.
            h.unlock(m);
            h.unlock(m);
        },
    )
    .expect("session");
    assert!(result.is_pass(), "{:?}", result.failure);
}

#[test]
fn join_observes_the_joined_threads_writes() {
    let counter = Arc::new(AtomicU32::new(0));
    let result = explore(
        Config::new().with_seed(0x3333).with_max_trials(20),
        move |h| {
            counter.store(0, Ordering::SeqCst);
            let shared = Arc::clone(&counter);
            let worker = h.spawn(move |h| {
                h.yield_now();
                shared.fetch_add(1, Ordering::SeqCst);
            });
            h.join(worker);
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        },
    )
    .expect("session");
    assert!(result.is_pass(), "{:?}", result.failure);
}

#[test]
fn sleeping_threads_advance_the_clock_together() {
    let result = explore(
        Config::new().with_seed(0x4444).with_max_trials(10),
        move |h| {
            let sleeper = h.spawn(move |h| {
                assert_eq!(h.sleep(3), WakeReason::Timeout);
            });
            assert_eq!(h.sleep(7), WakeReason::Timeout);
            h.join(sleeper);
        },
    )
    .expect("session");
    assert!(result.is_pass(), "{:?}", result.failure);
}

#[test]
fn never_hotspot_fails_the_trial_that_reaches_it() {
    let result = explore(
        Config::new()
            .with_seed(0x5555)
            .with_max_trials(10)
            .with_hotspot(HotspotContract::never("forbidden")),
        move |h| {
            h.hotspot("forbidden");
        },
    )
    .expect("session");
    let failure = result.failure.expect("hotspot is reached every trial");
    assert!(failure.to_string().contains("forbidden"), "{failure}");
    assert_eq!(result.failing_trial, Some(0));
}

#[test]
fn unreached_sometimes_hotspot_fails_the_session() {
    let result = explore(
        Config::new()
            .with_seed(0x6666)
            .with_max_trials(10)
            .with_hotspot(HotspotContract::sometimes("rare")),
        move |h| {
            h.yield_now();
        },
    )
    .expect("session");
    let failure = result.failure.expect("the hotspot is never reached");
    assert!(failure.to_string().contains("rare"), "{failure}");
    // Session-level verdicts have no single failing trial.
    assert_eq!(result.failing_trial, None);
}

#[test]
fn identical_seeds_replay_identical_schedules() {
    fn run(seed: u64) -> Vec<String> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let result = explore(
            Config::new().with_seed(seed).with_max_trials(8),
            move |h| {
                let m = MonitorId::named("shared");
                for name in ["first", "second"] {
                    let sink = Arc::clone(&sink);
                    h.spawn(move |h| {
                        h.lock(m);
                        sink.lock().expect("log").push(format!("{name}:enter"));
                        h.yield_now();
                        sink.lock().expect("log").push(format!("{name}:exit"));
                        h.unlock(m);
                    });
                }
            },
        )
        .expect("session");
        assert!(result.is_pass(), "{:?}", result.failure);
        Arc::try_unwrap(log).expect("sole owner").into_inner().expect("log")
    }

    assert_eq!(run(99), run(99));
}

#[test]
fn spurious_wakeups_do_not_break_a_guarded_wait_loop() {
    let m = MonitorId::named("spurious");
    let flag = Arc::new(AtomicBool::new(false));
    let result = explore(
        Config::new()
            .with_seed(0x7777)
            .with_max_trials(50)
            .with_spurious_wakeups(4)
            .with_hotspot(HotspotContract::always("consumed")),
        move |h| {
            flag.store(false, Ordering::SeqCst);
            let shared = Arc::clone(&flag);
            let consumer = h.spawn(move |h| {
                h.lock(m);
                while !shared.load(Ordering::SeqCst) {
                    h.wait(m);
                }
                h.unlock(m);
                h.hotspot("consumed");
            });
            h.lock(m);
            flag.store(true, Ordering::SeqCst);
            h.notify_one(m);
            h.unlock(m);
            h.join(consumer);
        },
    )
    .expect("session");
    assert!(result.is_pass(), "{:?}", result.failure);
}
