#![no_main]

use libfuzzer_sys::{fuzz_mutator, fuzz_target, fuzzer_mutate};
use rbpool_fuzzing::{encoding, PoolOps};

const ALLOCATION_LIMIT: usize = 1 << 20; // 1MiB

fuzz_mutator!(|data: &mut [u8], size: usize, max_size: usize, seed: u32| {
    let _ = env_logger::try_init();

    // With probability of about 1/8, just use the default mutator.
    if seed.count_ones() % 8 == 0 {
        return fuzzer_mutate(data, size, max_size);
    }

    encoding::mutate_in_place(data, size, max_size, seed, PoolOps::pop)
        .unwrap_or_else(|| fuzzer_mutate(data, size, max_size))
});

fuzz_target!(|data: &[u8]| {
    let _ = env_logger::try_init();
    if let Some(ops) = encoding::decode::<PoolOps>(data) {
        if let Err(e) = ops.run(ALLOCATION_LIMIT) {
            panic!("error: {e}");
        }
    }
});
