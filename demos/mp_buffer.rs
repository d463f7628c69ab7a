//! Bounded buffer via message passing.
//!
//! Single producer, single consumer where the message layer itself is the
//! buffer: the producer sends numbered items to the consumer's port and
//! drains acknowledgement messages back through its own port whenever
//! BUFFER_SIZE items are outstanding.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use rand::Rng;

use minisys::{LoopbackHub, Port, System, SystemConfig};

const BUFFER_SIZE: usize = 10;
const MAXCOUNT: usize = 100;

fn main() -> Result<()> {
    env_logger::init();
    println!("mp-buffer demo begins.");

    let hub = LoopbackHub::new();
    System::run(SystemConfig::default(), hub.endpoint(), producer)?;

    println!("mp-buffer demo done.");
    Ok(())
}

fn producer(sys: &System) {
    let produce = sys.port_create().unwrap();
    println!("Producer thread started (id: {}).", sys.thread_id().unwrap());

    let consume_slot: Arc<Mutex<Option<Port>>> = Arc::new(Mutex::new(None));
    {
        let consume_slot = Arc::clone(&consume_slot);
        sys.fork(move |sys| consumer(sys, produce, consume_slot));
    }
    // wait for the consumer to publish its port
    let consume = loop {
        if let Some(port) = *consume_slot.lock() {
            break port;
        }
        sys.yield_now().unwrap();
    };

    let mut rng = rand::thread_rng();
    let mut rcv = [0u8; 128];
    let mut count: u32 = 0;
    let mut in_buff = 0;
    while (count as usize) < MAXCOUNT {
        let put_num = rng.gen_range(1..=BUFFER_SIZE).min(MAXCOUNT - count as usize);
        println!("Producer wants to put {} items into the buffer ...", put_num);
        for _ in 0..put_num {
            count += 1;
            sys.send(produce, consume, &count.to_le_bytes()).unwrap();
            println!("Producer is putting {} into the buffer.", count);
            in_buff += 1;
            if in_buff == BUFFER_SIZE {
                while in_buff > 0 {
                    let (len, _, _) = sys.receive(produce, &mut rcv).unwrap();
                    if len == 4 {
                        in_buff -= 1;
                    }
                }
            }
        }
    }
    while in_buff > 0 {
        let (len, _, _) = sys.receive(produce, &mut rcv).unwrap();
        if len == 4 {
            in_buff -= 1;
        }
    }

    println!("{} items produced.", count);
    sys.port_destroy(produce).unwrap();
}

fn consumer(sys: &System, produce: Port, consume_slot: Arc<Mutex<Option<Port>>>) {
    let consume = sys.port_create().unwrap();
    println!("Consumer thread started (id: {}).", sys.thread_id().unwrap());
    *consume_slot.lock() = Some(consume);

    let mut rng = rand::thread_rng();
    let mut rcv = [0u8; 128];
    let mut count = 0;
    while count < MAXCOUNT {
        let get_num = rng.gen_range(1..=BUFFER_SIZE).min(MAXCOUNT - count);
        println!("Consumer wants to get {} items out of the buffer ...", get_num);
        for _ in 0..get_num {
            let (len, _, _) = sys.receive(consume, &mut rcv).unwrap();
            if len == 4 {
                let num = u32::from_le_bytes([rcv[0], rcv[1], rcv[2], rcv[3]]);
                count += 1;
                println!("Consumer is taking {} out of the buffer.", num);
                sys.send(consume, produce, &rcv[..4]).unwrap();
            }
        }
    }
    // an extra message to prove teardown frees queued state
    sys.send(consume, produce, &rcv[..4]).unwrap();

    println!("{} items consumed.", count);
    sys.port_destroy(consume).unwrap();
}
