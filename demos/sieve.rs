//! Sieve of Eratosthenes over a thread pipeline.
//!
//! A source thread feeds the integers 2..=MAXPRIME into a chain of
//! rendezvous channels. The sink pops each surviving number, prints it as
//! prime, and forks a new filter thread that removes multiples of that
//! prime from the rest of the stream. A value of -1 flushes the pipeline.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use minisys::{LoopbackHub, Semaphore, System, SystemConfig};

const MAXPRIME: i64 = 1000;

/// One-slot rendezvous channel
struct Channel {
    value: Mutex<i64>,
    produce: Arc<Semaphore>,
    consume: Arc<Semaphore>,
}

impl Channel {
    fn new(sys: &System) -> Arc<Channel> {
        Arc::new(Channel { value: Mutex::new(0), produce: sys.semaphore(0), consume: sys.semaphore(0) })
    }

    fn put(&self, value: i64) {
        *self.value.lock() = value;
        self.consume.v();
        self.produce.p().unwrap();
    }

    fn take(&self) -> i64 {
        self.consume.p().unwrap();
        let value = *self.value.lock();
        self.produce.v();
        value
    }
}

fn main() -> Result<()> {
    env_logger::init();
    println!("sieve demo begins.");

    let hub = LoopbackHub::new();
    System::run(SystemConfig::default(), hub.endpoint(), sink)?;

    println!("sieve demo done.");
    Ok(())
}

/// Produce all integers from 2 to MAXPRIME, then the flush marker
fn source(_sys: &System, out: Arc<Channel>) {
    for i in 2..=MAXPRIME {
        out.put(i);
    }
    out.put(-1);
    println!("Source exits.");
}

/// Drop multiples of one prime from the stream
fn filter(_sys: &System, prime: i64, left: Arc<Channel>, right: Arc<Channel>) {
    loop {
        let value = left.take();
        if value == -1 || value % prime != 0 {
            right.put(value);
        }
        if value == -1 {
            break;
        }
    }
    println!("Filter {} exits.", prime);
}

fn sink(sys: &System) {
    let mut pipe = Channel::new(sys);
    {
        let out = Arc::clone(&pipe);
        sys.fork(move |sys| source(sys, out));
    }

    let mut count = 0;
    loop {
        let value = pipe.take();
        if value == -1 {
            break;
        }
        println!("{} is prime.", value);
        count += 1;

        let right = Channel::new(sys);
        {
            let left = Arc::clone(&pipe);
            let right = Arc::clone(&right);
            sys.fork(move |sys| filter(sys, value, left, right));
        }
        pipe = right;
    }

    println!("Sink exits ({} primes).", count);
}
