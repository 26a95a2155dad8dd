use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use boardio::backend::MockLine;
use boardio::config::Edge;
use boardio::error::HalError;
use boardio::gpio::{
    DEBOUNCE_THRESHOLD, DebounceFilter, DigitalInput, InputSettings, InterruptEvent,
    InterruptListener, Signal,
};

fn input_on(line: &Arc<MockLine>) -> Arc<DigitalInput> {
    DigitalInput::new("P8_12", line.clone(), InputSettings::default())
}

fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Arc<dyn InterruptListener> {
    let log = log.clone();
    Arc::new(move |_: &InterruptEvent| -> Result<(), HalError> {
        log.lock().push(tag);
        Ok(())
    })
}

#[test]
fn filter_counts_down_on_agreement_and_commits_at_threshold() {
    let mut filter = DebounceFilter::new(Signal::Low);

    for _ in 0..DEBOUNCE_THRESHOLD - 1 {
        assert_eq!(filter.sample(Signal::High), None);
    }
    assert_eq!(filter.counter(), DEBOUNCE_THRESHOLD - 1);

    assert_eq!(filter.sample(Signal::Low), None);
    assert_eq!(filter.counter(), DEBOUNCE_THRESHOLD - 2);

    assert_eq!(filter.sample(Signal::High), None);
    assert_eq!(filter.sample(Signal::High), Some(Signal::High));
    assert_eq!(filter.stable(), Signal::High);
    assert_eq!(filter.counter(), 0);
}

#[test]
fn filter_counter_floors_at_zero() {
    let mut filter = DebounceFilter::new(Signal::High);
    for _ in 0..5 {
        assert_eq!(filter.sample(Signal::High), None);
    }
    assert_eq!(filter.counter(), 0);

    filter.sample(Signal::Low);
    assert_eq!(filter.counter(), 1);
}

#[test]
fn filter_ignores_alternating_noise() {
    let mut filter = DebounceFilter::new(Signal::Low);
    for i in 0..100 {
        let s = if i % 2 == 0 { Signal::High } else { Signal::Low };
        assert_eq!(filter.sample(s), None);
    }
    assert_eq!(filter.stable(), Signal::Low);
}

#[test]
fn read_debounced_returns_constant_signal() {
    let line = Arc::new(MockLine::default());
    line.push_samples([Signal::High]);
    let input = input_on(&line);

    assert_eq!(
        input.read_debounced(Duration::from_millis(20)).unwrap(),
        Signal::High
    );
    assert_eq!(input.read_debounced(Duration::ZERO).unwrap(), Signal::High);
}

#[test]
fn read_debounced_commits_after_ten_disagreeing_samples() {
    let line = Arc::new(MockLine::default());
    line.push_samples([Signal::Low]);
    line.push_samples(std::iter::repeat_n(Signal::High, DEBOUNCE_THRESHOLD as usize));
    let input = input_on(&line);

    let start = Instant::now();
    let value = input.read_debounced(Duration::from_secs(5)).unwrap();
    assert_eq!(value, Signal::High);
    assert!(start.elapsed() < Duration::from_secs(5));
    // the initial read plus exactly one sample per counted disagreement
    assert_eq!(line.reads(), 1 + DEBOUNCE_THRESHOLD as usize);
}

#[test]
fn read_debounced_rides_out_short_bursts() {
    let line = Arc::new(MockLine::default());
    line.push_samples([Signal::Low]);
    line.push_samples([Signal::High; 6]);
    line.push_samples([Signal::Low; 8]);
    let input = input_on(&line);

    assert_eq!(
        input.read_debounced(Duration::from_millis(20)).unwrap(),
        Signal::Low
    );
}

#[test]
fn listeners_run_in_order_even_when_one_fails() {
    let line = Arc::new(MockLine::default());
    let input = input_on(&line);
    let log = Arc::new(Mutex::new(Vec::new()));

    input.add_interrupt_listener(recorder(&log, "A"));
    let failing_log = log.clone();
    input.add_interrupt_listener(Arc::new(move |_: &InterruptEvent| -> Result<(), HalError> {
        failing_log.lock().push("B");
        Err(HalError::Listener("B refused".into()))
    }));
    input.add_interrupt_listener(recorder(&log, "C"));

    input.fire_interrupt_event(&InterruptEvent::new("P8_12", Edge::Rising));
    assert_eq!(*log.lock(), vec!["A", "B", "C"]);
}

#[test]
fn panicking_listener_does_not_stop_dispatch() {
    let line = Arc::new(MockLine::default());
    let input = input_on(&line);
    let log = Arc::new(Mutex::new(Vec::new()));

    input.add_interrupt_listener(recorder(&log, "A"));
    input.add_interrupt_listener(Arc::new(|_: &InterruptEvent| -> Result<(), HalError> {
        panic!("listener blew up")
    }));
    input.add_interrupt_listener(recorder(&log, "C"));

    input.fire_interrupt_event(&InterruptEvent::new("P8_12", Edge::Falling));
    assert_eq!(*log.lock(), vec!["A", "C"]);
}

#[test]
fn disabled_interrupts_drop_events() {
    let line = Arc::new(MockLine::default());
    let input = input_on(&line);
    let log = Arc::new(Mutex::new(Vec::new()));
    input.add_interrupt_listener(recorder(&log, "A"));

    input.disable_interrupts().unwrap();
    assert!(!input.are_interrupts_enabled());
    input.fire_interrupt_event(&InterruptEvent::new("P8_12", Edge::Rising));
    assert!(log.lock().is_empty());

    input.enable_interrupts().unwrap();
    assert!(input.are_interrupts_enabled());
    assert!(line.edges_enabled());
    input.fire_interrupt_event(&InterruptEvent::new("P8_12", Edge::Rising));
    assert_eq!(*log.lock(), vec!["A"]);
}

#[test]
fn failed_hook_leaves_flag_unchanged() {
    let line = Arc::new(MockLine::default());
    let input = input_on(&line);
    input.enable_interrupts().unwrap();

    line.fail_interrupt_hooks(true);
    assert!(matches!(input.disable_interrupts(), Err(HalError::Gpio(_))));
    assert!(input.are_interrupts_enabled());

    line.fail_interrupt_hooks(false);
    input.disable_interrupts().unwrap();
    line.fail_interrupt_hooks(true);
    assert!(input.enable_interrupts().is_err());
    assert!(!input.are_interrupts_enabled());
}

#[test]
fn duplicates_allowed_and_remove_takes_first() {
    let line = Arc::new(MockLine::default());
    let input = input_on(&line);
    let log = Arc::new(Mutex::new(Vec::new()));
    let a = recorder(&log, "A");
    let b = recorder(&log, "B");

    input.add_interrupt_listener(a.clone());
    input.add_interrupt_listener(b.clone());
    input.add_interrupt_listener(a.clone());

    input.fire_interrupt_event(&InterruptEvent::new("P8_12", Edge::Rising));
    assert_eq!(*log.lock(), vec!["A", "B", "A"]);

    assert!(input.remove_interrupt_listener(&a));
    log.lock().clear();
    input.fire_interrupt_event(&InterruptEvent::new("P8_12", Edge::Rising));
    assert_eq!(*log.lock(), vec!["B", "A"]);

    input.clear_interrupt_listeners();
    assert!(!input.remove_interrupt_listener(&b));
    assert!(input.interrupt_listeners().is_empty());
}

#[test]
fn listener_may_remove_itself_during_dispatch() {
    let line = Arc::new(MockLine::default());
    let input = input_on(&line);
    let hits = Arc::new(Mutex::new(0));

    let slot: Arc<Mutex<Option<Arc<dyn InterruptListener>>>> = Arc::new(Mutex::new(None));
    let weak_input = Arc::downgrade(&input);
    let slot_ref = slot.clone();
    let hits_ref = hits.clone();
    let once: Arc<dyn InterruptListener> =
        Arc::new(move |_: &InterruptEvent| -> Result<(), HalError> {
            *hits_ref.lock() += 1;
            if let (Some(input), Some(me)) = (weak_input.upgrade(), slot_ref.lock().clone()) {
                input.remove_interrupt_listener(&me);
            }
            Ok(())
        });
    *slot.lock() = Some(once.clone());
    input.add_interrupt_listener(once);

    input.fire_interrupt_event(&InterruptEvent::new("P8_12", Edge::Rising));
    input.fire_interrupt_event(&InterruptEvent::new("P8_12", Edge::Rising));
    assert_eq!(*hits.lock(), 1);
    slot.lock().take();
}

#[test]
fn concurrent_mutation_during_dispatch() {
    let line = Arc::new(MockLine::default());
    let input = input_on(&line);
    let hits = Arc::new(Mutex::new(0usize));

    let mutator = {
        let input = input.clone();
        let hits = hits.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                let hits = hits.clone();
                let l: Arc<dyn InterruptListener> =
                    Arc::new(move |_: &InterruptEvent| -> Result<(), HalError> {
                        *hits.lock() += 1;
                        Ok(())
                    });
                input.add_interrupt_listener(l.clone());
                input.remove_interrupt_listener(&l);
                input.add_interrupt_listener(l);
            }
        })
    };

    for _ in 0..200 {
        input.fire_interrupt_event(&InterruptEvent::new("P8_12", Edge::Rising));
    }
    mutator.join().unwrap();

    assert_eq!(input.interrupt_listeners().len(), 200);
    *hits.lock() = 0;
    input.fire_interrupt_event(&InterruptEvent::new("P8_12", Edge::Rising));
    assert_eq!(*hits.lock(), 200);
}

#[test]
fn edges_are_filtered_by_trigger() {
    let line = Arc::new(MockLine::default());
    let input = input_on(&line);
    input.set_interrupt_trigger(Edge::Rising);
    assert_eq!(input.interrupt_trigger(), Edge::Rising);
    input.enable_interrupts().unwrap();

    let edges = Arc::new(Mutex::new(Vec::new()));
    let sink = edges.clone();
    input.add_interrupt_listener(Arc::new(move |e: &InterruptEvent| -> Result<(), HalError> {
        sink.lock().push(e.edge);
        Ok(())
    }));

    line.set_level(Signal::High);
    line.set_level(Signal::Low);
    assert_eq!(*edges.lock(), vec![Edge::Rising]);

    input.set_interrupt_trigger(Edge::Both);
    line.set_level(Signal::High);
    line.set_level(Signal::Low);
    assert_eq!(
        *edges.lock(),
        vec![Edge::Rising, Edge::Rising, Edge::Falling]
    );
}

#[test]
fn debounce_window_suppresses_bounces() {
    let line = Arc::new(MockLine::default());
    let input = input_on(&line);
    input.enable_interrupts().unwrap();
    let hits = Arc::new(Mutex::new(0));
    let counter = hits.clone();
    input.add_interrupt_listener(Arc::new(move |_: &InterruptEvent| -> Result<(), HalError> {
        *counter.lock() += 1;
        Ok(())
    }));

    input.set_interrupt_debounce_ms(10_000);
    assert_eq!(input.interrupt_debounce_ms(), 10_000);
    line.emit_edge(Edge::Rising);
    line.emit_edge(Edge::Falling);
    line.emit_edge(Edge::Rising);
    assert_eq!(*hits.lock(), 1);

    input.set_interrupt_debounce_ms(0);
    line.emit_edge(Edge::Falling);
    line.emit_edge(Edge::Rising);
    assert_eq!(*hits.lock(), 3);
}

#[test]
fn name_and_raw_read() {
    let line = Arc::new(MockLine::default());
    let input = DigitalInput::new(
        "P9_15",
        line.clone(),
        InputSettings {
            trigger: Edge::Falling,
            debounce_ms: 25,
        },
    );
    assert_eq!(input.name(), "Digital Input on Pin P9_15");
    assert_eq!(input.interrupt_trigger(), Edge::Falling);
    assert_eq!(input.interrupt_debounce_ms(), 25);

    line.set_level(Signal::High);
    assert_eq!(input.read().unwrap(), Signal::High);
}

#[test]
fn disable_stops_new_dispatches_without_waiting_for_running_ones() {
    let line = Arc::new(MockLine::default());
    let input = input_on(&line);
    let (entered_tx, entered_rx) = std::sync::mpsc::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let release_rx = Mutex::new(release_rx);
    let hits = Arc::new(Mutex::new(0usize));
    let counter = hits.clone();
    input.add_interrupt_listener(Arc::new(move |_: &InterruptEvent| -> Result<(), HalError> {
        *counter.lock() += 1;
        let _ = entered_tx.lock().send(());
        let _ = release_rx.lock().recv();
        Ok(())
    }));

    let running = {
        let input = input.clone();
        thread::spawn(move || {
            input.fire_interrupt_event(&InterruptEvent::new("P8_12", Edge::Rising));
        })
    };
    entered_rx.recv().unwrap();

    // the in-flight dispatch holds no lock, so disable completes
    input.disable_interrupts().unwrap();
    input.fire_interrupt_event(&InterruptEvent::new("P8_12", Edge::Falling));

    release_tx.send(()).unwrap();
    running.join().unwrap();
    assert_eq!(*hits.lock(), 1);
}
