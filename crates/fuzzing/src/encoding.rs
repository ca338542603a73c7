//! Moving op sequences in and out of fuzzer inputs.

use bincode::{Decode, Encode};
use mutatis::{DefaultMutate, Session};

const fn bincode_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}

/// Decode an op sequence from raw fuzzer input.
pub fn decode<T>(data: &[u8]) -> Option<T>
where
    T: Decode<()>,
{
    bincode::decode_from_slice::<T, _>(data, bincode_config())
        .ok()
        .map(|(ops, _)| ops)
}

/// Decode the op sequence in `data[..size]` (or start from an empty one),
/// mutate it, and encode it back into `data`.
///
/// Ops are popped off the end with `pop` until the encoding fits within
/// `data`. Returns the new input size, or `None` when the caller should fall
/// back to the fuzzer's own mutation strategies.
pub fn mutate_in_place<T>(
    data: &mut [u8],
    size: usize,
    max_size: usize,
    seed: u32,
    mut pop: impl FnMut(&mut T) -> bool,
) -> Option<usize>
where
    T: Default + Encode + Decode<()> + DefaultMutate,
{
    let mut ops = decode::<T>(&data[..size.min(data.len())]).unwrap_or_default();

    let mut session = Session::new().seed(seed.into()).shrink(max_size < size);
    session.mutate(&mut ops).ok()?;

    loop {
        if let Ok(new_size) = bincode::encode_into_slice(&ops, data, bincode_config()) {
            return Some(new_size);
        }
        if !pop(&mut ops) {
            return None;
        }
    }
}
