//! Run with `RUST_LOG=threadsafe=trace` to see tasks being admitted and
//! settled.

use std::cell::Cell;
use std::thread;
use std::time::Duration;

use threadsafe::ThreadSafe;
use tracing_subscriber::EnvFilter;

/// A resource which has no synchronization of its own.
struct Resource {
    value: Cell<u32>,
}

// Safety: every access happens through a `ThreadSafe`, which never hands out
// `&Resource` while a `&mut Resource` is live.
unsafe impl Sync for Resource {}

impl Resource {
    fn read(&self) -> u32 {
        thread::sleep(Duration::from_millis(100));
        self.value.get()
    }

    fn write(&mut self, value: u32) {
        thread::sleep(Duration::from_millis(100));
        self.value.set(value);
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let resource = ThreadSafe::with(|| Resource {
        value: Cell::new(0),
    })?;

    let value = resource.sync(|r: &Resource| r.read());
    println!("sync read: {value}");

    let read1 = resource.spawn(|r: &Resource| r.read());
    let read2 = resource.spawn(|r: &Resource| r.read());
    let write = resource.spawn(|r: &mut Resource| r.write(42));
    let read3 = resource.spawn_after(|r: &Resource| r.read(), &write)?;

    let (a, b, (), c) = threadsafe::get_results((&read1, &read2, &write, &read3))?;
    println!("reads before the write: {a}, {b}");
    println!("read after the write: {c}");

    resource.join()?;
    Ok(())
}
