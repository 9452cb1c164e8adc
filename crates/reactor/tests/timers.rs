use sg_reactor::EventLoop;
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::{Duration, Instant},
};

#[test]
fn one_shot_fires_exactly_once_and_run_returns() {
    let mut event_loop = EventLoop::new().expect("failed to create event loop");

    let fired = Rc::new(Cell::new(0u32));
    let fired_cb = fired.clone();
    let started = Instant::now();

    let id = event_loop.add_timer(
        Duration::from_millis(100),
        Box::new(move |_, _| fired_cb.set(fired_cb.get() + 1)),
    );
    assert!(event_loop.is_timer_active(id));

    event_loop.run().expect("run failed");

    assert_eq!(fired.get(), 1, "one-shot timer must fire exactly once");
    assert!(
        started.elapsed() >= Duration::from_millis(100),
        "timer fired before its interval elapsed"
    );
    assert!(
        !event_loop.is_timer_active(id),
        "one-shot timer must cancel itself after firing"
    );

    // cancelling an already-cancelled timer is a no-op
    event_loop.cancel_timer(id);
    event_loop.run().expect("run failed");
    assert_eq!(fired.get(), 1);
}

#[test]
fn periodic_fires_until_cancelled_from_its_own_callback() {
    let mut event_loop = EventLoop::new().expect("failed to create event loop");

    let fired = Rc::new(Cell::new(0u32));
    let fired_cb = fired.clone();

    let id = event_loop.add_periodic_timer(
        Duration::from_millis(10),
        Box::new(move |ev, id| {
            fired_cb.set(fired_cb.get() + 1);
            if fired_cb.get() == 3 {
                ev.cancel_timer(id);
            }
        }),
    );

    event_loop.run().expect("run failed");

    assert_eq!(fired.get(), 3, "self-cancel must stop further firings");
    assert!(!event_loop.is_timer_active(id));
}

#[test]
fn cancelled_timer_never_fires() {
    let mut event_loop = EventLoop::new().expect("failed to create event loop");

    let fired = Rc::new(Cell::new(false));
    let fired_cb = fired.clone();

    let id = event_loop.add_timer(
        Duration::from_millis(10),
        Box::new(move |_, _| fired_cb.set(true)),
    );
    event_loop.cancel_timer(id);

    assert!(!event_loop.is_timer_active(id));
    event_loop.run().expect("run failed");
    assert!(!fired.get(), "cancelled timer fired");
}

#[test]
fn due_timers_fire_first_armed_first() {
    let mut event_loop = EventLoop::new().expect("failed to create event loop");

    let order = Rc::new(RefCell::new(Vec::new()));

    let order_a = order.clone();
    let first = event_loop.add_timer(
        Duration::from_millis(10),
        Box::new(move |_, id| order_a.borrow_mut().push(id)),
    );
    let order_b = order.clone();
    let second = event_loop.add_timer(
        Duration::from_millis(10),
        Box::new(move |_, id| order_b.borrow_mut().push(id)),
    );

    // both overdue by the time the pass runs
    std::thread::sleep(Duration::from_millis(30));
    event_loop.tick().expect("tick failed");

    assert_eq!(*order.borrow(), vec![first, second]);
}

#[test]
fn timer_cancelled_by_earlier_callback_in_same_pass_does_not_fire() {
    let mut event_loop = EventLoop::new().expect("failed to create event loop");

    let victim_fired = Rc::new(Cell::new(false));
    let victim_slot = Rc::new(Cell::new(0));

    let victim_slot_cb = victim_slot.clone();
    event_loop.add_timer(
        Duration::from_millis(10),
        Box::new(move |ev, _| ev.cancel_timer(victim_slot_cb.get())),
    );

    let victim_fired_cb = victim_fired.clone();
    let victim = event_loop.add_timer(
        Duration::from_millis(10),
        Box::new(move |_, _| victim_fired_cb.set(true)),
    );
    victim_slot.set(victim);

    std::thread::sleep(Duration::from_millis(30));
    event_loop.tick().expect("tick failed");

    assert!(
        !victim_fired.get(),
        "timer cancelled mid-pass must not be dispatched"
    );
}

#[test]
fn timer_added_inside_callback_runs_on_a_later_pass() {
    let mut event_loop = EventLoop::new().expect("failed to create event loop");

    let sequence = Rc::new(RefCell::new(Vec::new()));

    let seq_outer = sequence.clone();
    event_loop.add_timer(
        Duration::from_millis(10),
        Box::new(move |ev, _| {
            seq_outer.borrow_mut().push("first");
            let seq_inner = seq_outer.clone();
            ev.add_timer(
                Duration::from_millis(10),
                Box::new(move |_, _| seq_inner.borrow_mut().push("second")),
            );
        }),
    );

    event_loop.run().expect("run failed");

    assert_eq!(*sequence.borrow(), vec!["first", "second"]);
}

#[test]
fn periodic_intervals_are_measured_between_firings() {
    let mut event_loop = EventLoop::new().expect("failed to create event loop");

    let timestamps = Rc::new(RefCell::new(Vec::new()));
    let timestamps_cb = timestamps.clone();

    event_loop.add_periodic_timer(
        Duration::from_millis(20),
        Box::new(move |ev, id| {
            timestamps_cb.borrow_mut().push(Instant::now());
            if timestamps_cb.borrow().len() == 3 {
                ev.cancel_timer(id);
            }
        }),
    );

    event_loop.run().expect("run failed");

    let timestamps = timestamps.borrow();
    assert_eq!(timestamps.len(), 3);
    for gap in timestamps.windows(2) {
        assert!(gap[1] >= gap[0], "inter-firing gaps must be non-negative");
    }
}
