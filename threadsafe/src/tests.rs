use crate::{Builder, ThreadSafe};
use anyhow::anyhow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Counters tracking who is inside of an accessor, kept outside of the
/// resource so they can be inspected concurrently.
#[derive(Default)]
struct Occupants {
    readers: AtomicUsize,
    writers: AtomicUsize,
    violations: AtomicUsize,
}

impl Occupants {
    fn enter_read(&self) {
        self.readers.fetch_add(1, Ordering::SeqCst);

        if self.writers.load(Ordering::SeqCst) != 0 {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn exit_read(&self) {
        self.readers.fetch_sub(1, Ordering::SeqCst);
    }

    fn enter_write(&self) {
        if self.writers.fetch_add(1, Ordering::SeqCst) != 0 {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }

        if self.readers.load(Ordering::SeqCst) != 0 {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn exit_write(&self) {
        self.writers.fetch_sub(1, Ordering::SeqCst);
    }
}

#[test]
fn test_mutual_exclusion() -> anyhow::Result<()> {
    for _ in 0..10 {
        let value = Arc::new(Builder::new().worker_threads(4).build(0u64)?);
        let occupants = Arc::new(Occupants::default());

        let mut threads = Vec::new();

        for t in 0..8u64 {
            let value = value.clone();
            let occupants = occupants.clone();

            threads.push(thread::spawn(move || {
                let mut handles = Vec::new();

                for n in 0..50u64 {
                    let o = occupants.clone();

                    if (t + n) % 5 == 0 {
                        handles.push(value.spawn(move |v: &mut u64| {
                            o.enter_write();
                            *v += 1;
                            thread::yield_now();
                            o.exit_write();
                        }));
                    } else if n % 3 == 0 {
                        value.sync(move |v: &mut u64| {
                            o.enter_write();
                            *v += 1;
                            o.exit_write();
                        });
                    } else {
                        let _ = value.sync(move |v: &u64| {
                            o.enter_read();
                            thread::yield_now();
                            o.exit_read();
                            *v
                        });
                    }
                }

                for handle in handles {
                    handle.wait().map_err(|e| anyhow!("{}", e))?;
                }

                Ok::<_, anyhow::Error>(())
            }));
        }

        for t in threads {
            t.join().map_err(|_| anyhow!("thread panicked"))??;
        }

        assert_eq!(occupants.violations.load(Ordering::SeqCst), 0);

        let writes = (0..8u64)
            .flat_map(|t| (0..50u64).map(move |n| (t, n)))
            .filter(|(t, n)| (t + n) % 5 == 0 || n % 3 == 0)
            .count() as u64;

        assert_eq!(value.sync(|v: &u64| *v), writes);

        let value = Arc::try_unwrap(value).map_err(|_| anyhow!("unwrap failed"))?;
        value.join()?;
    }

    Ok(())
}

#[test]
fn test_readers_run_concurrently() -> anyhow::Result<()> {
    const READERS: usize = 4;

    let value = Builder::new().worker_threads(READERS).build(7u32)?;
    let inside = Arc::new(AtomicUsize::new(0));

    let handles = (0..READERS)
        .map(|_| {
            let inside = inside.clone();

            value.spawn(move |v: &u32| {
                inside.fetch_add(1, Ordering::SeqCst);
                let deadline = Instant::now() + Duration::from_secs(10);

                // Only succeeds if every reader is inside at the same time.
                while inside.load(Ordering::SeqCst) < READERS {
                    if Instant::now() > deadline {
                        return None;
                    }

                    thread::yield_now();
                }

                Some(*v)
            })
        })
        .collect::<Vec<_>>();

    for handle in &handles {
        assert_eq!(*handle.wait()?, Some(7));
    }

    value.join()?;
    Ok(())
}

#[test]
fn test_writer_is_not_starved() -> anyhow::Result<()> {
    let value = Builder::new().worker_threads(4).build(0u32)?;
    let release = Arc::new(AtomicBool::new(false));

    // A reader which is admitted before the writer and holds on until told.
    let early = {
        let release = release.clone();

        value.spawn(move |v: &u32| {
            while !release.load(Ordering::SeqCst) {
                thread::yield_now();
            }

            *v
        })
    };

    while early.state() != crate::TaskState::Running {
        thread::yield_now();
    }

    let write = value.spawn(|v: &mut u32| *v = 42);

    // Arrives while the writer is waiting, so it must not overtake it.
    let late = (0..16)
        .map(|_| value.spawn(|v: &u32| *v))
        .collect::<Vec<_>>();

    thread::sleep(Duration::from_millis(20));
    assert!(!write.is_ready());
    assert!(late.iter().all(|h| !h.is_ready()));

    release.store(true, Ordering::SeqCst);

    assert_eq!(*early.wait()?, 0);
    write.wait()?;

    for handle in &late {
        assert_eq!(*handle.wait()?, 42);
    }

    value.join()?;
    Ok(())
}

#[test]
fn test_recover_from_panic() -> anyhow::Result<()> {
    for _ in 0..20 {
        let value = Arc::new(Builder::new().worker_threads(2).build(0u32)?);
        let mut threads = Vec::new();

        for _ in 0..10 {
            let value = value.clone();

            threads.push(thread::spawn(move || {
                value.sync(|_: &mut u32| {
                    thread::sleep(Duration::from_millis(1));
                    panic!("trigger");
                })
            }));
        }

        for t in threads {
            assert!(t.join().is_err());
        }

        // The admission of every panicking accessor has been released.
        value.sync(|v: &mut u32| *v += 1);
        assert_eq!(value.spawn(|v: &u32| *v).cloned()?, 1);

        let value = Arc::try_unwrap(value).map_err(|_| anyhow!("unwrap failed"))?;
        assert!(value.join().is_ok());
    }

    Ok(())
}

#[test]
fn test_join_waits_for_outstanding_tasks() -> anyhow::Result<()> {
    let value = Builder::new().worker_threads(1).build(Vec::new())?;

    let handles = (0..10u32)
        .map(|n| {
            value.spawn(move |v: &mut Vec<u32>| {
                thread::sleep(Duration::from_millis(2));
                v.push(n);
            })
        })
        .collect::<Vec<_>>();

    value.join()?;

    assert!(handles.iter().all(|h| h.is_ready()));
    Ok(())
}

#[test]
fn test_threading() -> anyhow::Result<()> {
    for _ in 0..20 {
        let value = Arc::new(ThreadSafe::new(())?);
        let mut threads = Vec::new();

        for n in 0..10u32 {
            let value = value.clone();

            threads.push(thread::spawn(move || {
                let handle = value.spawn(move |_: &()| {
                    thread::sleep(Duration::from_millis(1));
                    n
                });

                handle.cloned()
            }));
        }

        let mut result = 0;

        for t in threads {
            result += t.join().map_err(|_| anyhow!("thread panicked"))??;
        }

        assert_eq!(result, 45);

        let value = Arc::try_unwrap(value).map_err(|_| anyhow!("unwrap failed"))?;
        value.join()?;
    }

    Ok(())
}
