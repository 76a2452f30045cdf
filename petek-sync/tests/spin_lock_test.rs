use petek_sync::SpinLock;
use std::sync::Arc;
use std::thread;

#[test]
fn test_lock_unlock() {
    let lock = SpinLock::new(Vec::new());
    lock.lock().push(1);
    lock.lock().push(2);
    assert_eq!(*lock.lock(), vec![1, 2]);
    assert!(!lock.is_locked());
}

#[test]
fn test_into_inner_and_get_mut() {
    let mut lock = SpinLock::new(String::from("a"));
    lock.get_mut().push('b');
    assert_eq!(lock.into_inner(), "ab");
}

#[test]
fn test_static_lock() {
    static COUNTER: SpinLock<u32> = SpinLock::new(0);
    *COUNTER.lock() += 3;
    assert_eq!(*COUNTER.lock(), 3);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_counter() {
    const THREADS: usize = 8;
    const ITERS: usize = 10_000;

    let lock = Arc::new(SpinLock::new(0usize));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let lock = lock.clone();
            thread::spawn(move || {
                for _ in 0..ITERS {
                    *lock.lock() += 1;
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*lock.lock(), THREADS * ITERS);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_guarded_pair_stays_consistent() {
    // Both halves are always updated together; a reader must never see them
    // disagree.
    let lock = Arc::new(SpinLock::new((0u64, 0u64)));

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let lock = lock.clone();
            thread::spawn(move || {
                for _ in 0..5_000 {
                    let mut g = lock.lock();
                    g.0 += 1;
                    g.1 += 1;
                }
            })
        })
        .collect();

    let reader = {
        let lock = lock.clone();
        thread::spawn(move || {
            for _ in 0..5_000 {
                if let Some(g) = lock.try_lock() {
                    assert_eq!(g.0, g.1);
                }
            }
        })
    };

    for h in writers {
        h.join().unwrap();
    }
    reader.join().unwrap();
    assert_eq!(*lock.lock(), (20_000, 20_000));
}
