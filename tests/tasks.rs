use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use coopkern::{
    EventMask, Kernel, KernelConfig, Mailbox, ManualClock, PoolConfig, PoolId, TaskId, TaskState,
    TimerList,
};

fn kernel() -> Arc<Kernel> {
    let config = KernelConfig::new(4)
        .with_pool(PoolConfig::new(64, 8))
        .with_pool(PoolConfig::restricted(128, 2))
        .with_pool(PoolConfig::new(256, 4));
    Arc::new(Kernel::new(config).unwrap())
}

/// Poll until `task` is parked in a wait with nothing pending
fn wait_until_blocked(kernel: &Kernel, task: TaskId) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let snap = kernel.task_snapshot(task).unwrap();
        if snap.state == TaskState::Blocked && snap.pending.is_empty() {
            break;
        }
        assert!(Instant::now() < deadline, "task {task:?} never blocked");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn producer_consumer_through_mailbox() {
    const MESSAGES: u32 = 200;
    let kernel = kernel();
    let consumer_id = TaskId(1);

    let k = Arc::clone(&kernel);
    let consumer = thread::spawn(move || {
        k.register_task(consumer_id, "consumer").unwrap();
        let mut received = Vec::new();
        while received.len() < MESSAGES as usize {
            let ev = k.wait(EventMask::MBOX_0, 0).unwrap();
            assert_eq!(ev, EventMask::MBOX_0);
            while let Some(buf) = k.read_mbox(Mailbox::Mbox0).unwrap() {
                received.push(u32::from_le_bytes(buf[..4].try_into().unwrap()));
                k.release(buf);
            }
        }
        received
    });

    let k = Arc::clone(&kernel);
    let producer = thread::spawn(move || {
        k.register_task(TaskId(0), "producer").unwrap();
        for seq in 0..MESSAGES {
            // Pool exhaustion is backpressure; retry until the consumer frees one
            let mut buf = loop {
                match k.allocate(4) {
                    Some(buf) => break buf,
                    None => thread::yield_now(),
                }
            };
            buf[..4].copy_from_slice(&seq.to_le_bytes());
            k.send_msg(consumer_id, Mailbox::Mbox0, buf).unwrap();
        }
    });

    producer.join().unwrap();
    let received = consumer.join().unwrap();
    assert_eq!(received, (0..MESSAGES).collect::<Vec<_>>());

    let stats = kernel.pool_stats(PoolId(0)).unwrap();
    assert_eq!(stats.free, stats.total);
    assert!(stats.peak_in_use >= 1);
}

#[test]
fn wait_times_out_after_requested_duration() {
    let kernel = kernel();
    let k = Arc::clone(&kernel);
    let (ev, elapsed) = thread::spawn(move || {
        k.register_task(TaskId(2), "sleeper").unwrap();
        let start = Instant::now();
        let ev = k.wait(EventMask::MBOX_0 | EventMask::TIMER_0, 100).unwrap();
        (ev, start.elapsed())
    })
    .join()
    .unwrap();
    assert_eq!(ev, EventMask::EMPTY);
    assert!(elapsed >= Duration::from_millis(100), "woke early: {elapsed:?}");
}

#[test]
fn signal_sent_before_wait_is_not_lost() {
    let kernel = kernel();
    kernel.send_event(TaskId(3), EventMask::appl(1)).unwrap();

    let k = Arc::clone(&kernel);
    let ev = thread::spawn(move || {
        k.register_task(TaskId(3), "late").unwrap();
        k.wait(EventMask::appl(1), 0).unwrap()
    })
    .join()
    .unwrap();
    assert_eq!(ev, EventMask::appl(1));
}

#[test]
fn concurrent_signals_accumulate() {
    let kernel = kernel();
    let target = TaskId(0);
    let barrier = Arc::new(Barrier::new(4));

    let senders: Vec<_> = (0..4u8)
        .map(|n| {
            let k = Arc::clone(&kernel);
            let b = Arc::clone(&barrier);
            thread::spawn(move || {
                b.wait();
                k.send_event(target, EventMask::appl(n)).unwrap();
            })
        })
        .collect();
    for s in senders {
        s.join().unwrap();
    }

    let pending = kernel.task_snapshot(target).unwrap().pending;
    let expected = EventMask::appl(0) | EventMask::appl(1) | EventMask::appl(2) | EventMask::appl(3);
    assert_eq!(pending, expected);
}

#[test]
fn mark_dead_wakes_blocked_waiter_with_shutdown() {
    let kernel = kernel();
    let id = TaskId(2);

    let k = Arc::clone(&kernel);
    let waiter = thread::spawn(move || {
        k.register_task(id, "victim").unwrap();
        let first = k.wait(EventMask::MBOX_0, 0).unwrap();
        let second = k.wait(EventMask::MBOX_0, 0).unwrap();
        (first, second)
    });

    wait_until_blocked(&kernel, id);
    kernel.mark_dead(id).unwrap();

    let (first, second) = waiter.join().unwrap();
    assert_eq!(first, EventMask::SHUTDOWN);
    assert_eq!(second, EventMask::SHUTDOWN);
    assert_eq!(kernel.task_snapshot(id).unwrap().state, TaskState::Dead);
}

#[test]
fn shutdown_releases_every_task() {
    let kernel = kernel();
    let waiters: Vec<_> = (0..3u8)
        .map(|n| {
            let k = Arc::clone(&kernel);
            thread::spawn(move || {
                k.register_task(TaskId(n), "worker").unwrap();
                k.wait(EventMask::ALL, 0).unwrap()
            })
        })
        .collect();
    for n in 0..3u8 {
        wait_until_blocked(&kernel, TaskId(n));
    }

    let buf = kernel.allocate(200).unwrap();
    kernel.send_msg(TaskId(3), Mailbox::Mbox2, buf).unwrap();
    kernel.shutdown();

    for w in waiters {
        assert_eq!(w.join().unwrap(), EventMask::SHUTDOWN);
    }
    assert_eq!(kernel.pool_stats(PoolId(2)).unwrap().free, 4);
}

#[test]
fn timer_list_posts_to_waiting_task() {
    let clock = Arc::new(ManualClock::new());
    let config = KernelConfig::new(2).with_pool(PoolConfig::new(32, 1));
    let kernel = Arc::new(Kernel::new(config).unwrap().with_clock(clock.clone()));
    let id = TaskId(1);

    let k = Arc::clone(&kernel);
    let waiter = thread::spawn(move || {
        k.register_task(id, "periodic").unwrap();
        (0..3)
            .map(|_| k.wait(EventMask::TIMER_1, 0).unwrap())
            .collect::<Vec<_>>()
    });

    let mut timers = TimerList::new();
    let periodic = timers.create_entry(Some(id));
    timers
        .insert(periodic, 10, EventMask::TIMER_1, None, 0)
        .unwrap();
    timers.update(kernel.tick_count(), &*kernel);

    for _ in 0..3 {
        wait_until_blocked(&kernel, id);
        clock.advance(10);
        assert_eq!(timers.update(kernel.tick_count(), &*kernel), 1);
        timers.restart(periodic).unwrap();
    }

    assert_eq!(waiter.join().unwrap(), vec![EventMask::TIMER_1; 3]);
}

#[test]
fn critical_section_brackets_paired_allocation() {
    let kernel = kernel();
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let k = Arc::clone(&kernel);
            thread::spawn(move || {
                for _ in 0..500 {
                    let cs = k.enter_critical();
                    let a = k.allocate(16).unwrap();
                    let b = k.allocate(16).unwrap();
                    drop(cs);
                    k.release(a);
                    k.release(b);
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    let stats = kernel.pool_stats(PoolId(0)).unwrap();
    assert_eq!(stats.free, stats.total);
    assert_eq!(stats.failed_allocations, 0);
}
