use petek_sync::TwoLockQueue;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

#[test]
fn test_fifo_ordering() {
    let q = TwoLockQueue::new();
    for i in 0..100 {
        q.push(i);
    }
    for i in 0..100 {
        assert_eq!(q.pop(), Some(i));
    }
    assert_eq!(q.pop(), None);
}

#[test]
fn test_random_ops_match_vecdeque() {
    let q = TwoLockQueue::new();
    let mut model = VecDeque::new();
    let mut rng = rand::rng();

    for i in 0..10_000 {
        if rng.random_bool(0.55) {
            q.push(i);
            model.push_back(i);
        } else {
            assert_eq!(q.pop(), model.pop_front());
        }
        assert_eq!(q.is_empty(), model.is_empty());
    }
}

#[test]
fn test_drop_releases_unpopped() {
    static DROPS: AtomicUsize = AtomicUsize::new(0);

    struct Counted;
    impl Drop for Counted {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::Relaxed);
        }
    }

    let q = TwoLockQueue::new();
    for _ in 0..10 {
        q.push(Counted);
    }
    drop(q.pop());
    drop(q.pop());
    assert_eq!(DROPS.load(Ordering::Relaxed), 2);
    drop(q);
    assert_eq!(DROPS.load(Ordering::Relaxed), 10);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_mpmc_sum() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: usize = 10_000;
    const TOTAL: usize = PRODUCERS * PER_PRODUCER;

    let q = Arc::new(TwoLockQueue::new());
    let popped = Arc::new(AtomicUsize::new(0));
    let sum = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let q = q.clone();
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    q.push(p * PER_PRODUCER + i);
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let q = q.clone();
            let popped = popped.clone();
            let sum = sum.clone();
            thread::spawn(move || {
                while popped.load(Ordering::Relaxed) < TOTAL {
                    match q.pop() {
                        Some(v) => {
                            sum.fetch_add(v, Ordering::Relaxed);
                            popped.fetch_add(1, Ordering::Relaxed);
                        }
                        None => thread::yield_now(),
                    }
                }
            })
        })
        .collect();

    for h in producers {
        h.join().unwrap();
    }
    for h in consumers {
        h.join().unwrap();
    }

    assert_eq!(popped.load(Ordering::Relaxed), TOTAL);
    assert_eq!(sum.load(Ordering::Relaxed), (0..TOTAL).sum::<usize>());
    assert!(q.is_empty());
}
