//! Runmark Example Workloads
//!
//! Run with:
//!   cargo run --example workloads                         # Run every workload
//!   cargo run --example workloads -- list                 # List workloads
//!   cargo run --example workloads -- sort --monitor cpu   # Only `sort*`, CPU only
//!   cargo run --example workloads -- --format json        # JSON on stdout
//!   cargo run --example workloads -- exec sleep 2         # Any external command

use runmark::prelude::*;
use std::hint::black_box;
use std::time::Duration;

/// Sort a few million pseudo-random integers
#[workload(tags = "cpu")]
fn sort_integers() -> usize {
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let mut data: Vec<u64> = (0..4_000_000)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        })
        .collect();
    data.sort_unstable();
    black_box(data.len())
}

/// Grow a buffer in steps so the memory series climbs
#[workload(name = "grow_buffers", tags = "memory")]
fn grow() -> Vec<Vec<u8>> {
    let mut buffers = Vec::new();
    for step in 0..8u8 {
        buffers.push(vec![step.wrapping_add(1); 8 << 20]);
        std::thread::sleep(Duration::from_millis(150));
    }
    buffers
}

/// Mostly idle; CPU should stay near zero
#[workload]
fn idle() {
    std::thread::sleep(Duration::from_secs(1));
}

/// Panics; the record shows the failure instead of aborting the harness
#[workload]
fn crash() -> u32 {
    let input: Option<u32> = black_box(None);
    match input {
        Some(value) => value,
        None => panic!("crash workload received no input"),
    }
}

fn main() -> anyhow::Result<()> {
    runmark::run()
}
