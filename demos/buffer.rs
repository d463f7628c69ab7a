//! Bounded buffer example.
//!
//! Single producer, single consumer sharing a fixed-size buffer guarded by
//! a pair of counting semaphores. Change MAXCOUNT to vary the number of
//! items produced.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use rand::Rng;

use minisys::{LoopbackHub, System, SystemConfig};

const BUFFER_SIZE: usize = 10;
const MAXCOUNT: usize = 100;

fn main() -> Result<()> {
    env_logger::init();
    println!("buffer demo begins.");

    let hub = LoopbackHub::new();
    System::run(SystemConfig::default(), hub.endpoint(), producer)?;

    println!("buffer demo done.");
    Ok(())
}

fn producer(sys: &System) {
    let buffer: Arc<Mutex<VecDeque<usize>>> = Arc::new(Mutex::new(VecDeque::new()));
    let empty = sys.semaphore(0);
    let full = sys.semaphore(BUFFER_SIZE as i64);

    println!("Producer thread started (id: {}).", sys.thread_id().unwrap());

    {
        let buffer = Arc::clone(&buffer);
        let empty = Arc::clone(&empty);
        let full = Arc::clone(&full);
        sys.fork(move |sys| consumer(sys, buffer, empty, full));
    }
    sys.yield_now().unwrap();

    let mut rng = rand::thread_rng();
    let mut count = 0;
    while count < MAXCOUNT {
        let put_num = rng.gen_range(1..=BUFFER_SIZE).min(MAXCOUNT - count);
        println!("Producer wants to put {} items into the buffer ...", put_num);
        for _ in 0..put_num {
            full.p().unwrap();
            count += 1;
            buffer.lock().push_back(count);
            println!("Producer is putting {} into the buffer.", count);
            empty.v();
        }
    }

    println!("{} items produced.", count);
}

fn consumer(
    sys: &System,
    buffer: Arc<Mutex<VecDeque<usize>>>,
    empty: Arc<minisys::Semaphore>,
    full: Arc<minisys::Semaphore>,
) {
    println!("Consumer thread started (id: {}).", sys.thread_id().unwrap());

    let mut rng = rand::thread_rng();
    let mut count = 0;
    while count < MAXCOUNT {
        let get_num = rng.gen_range(1..=BUFFER_SIZE).min(MAXCOUNT - count);
        println!("Consumer wants to get {} items out of the buffer ...", get_num);
        for _ in 0..get_num {
            empty.p().unwrap();
            count = buffer.lock().pop_front().unwrap();
            println!("Consumer is taking {} out of the buffer.", count);
            full.v();
        }
    }

    println!("{} items consumed.", count);
}
