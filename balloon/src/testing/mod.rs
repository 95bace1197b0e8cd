//! Utilities for testing.

/// Returns some fake data.
///
/// The data is deterministic for a given length, so two calls with
/// the same length produce identical content.
pub fn get_fake_data(len: usize) -> Vec<u8> {
    let mut state = 42u32;
    let mut data = vec![0u8; len];

    for (i, byte) in data.iter_mut().enumerate() {
        (state, _) = state.overflowing_mul(1664525u32);
        (state, _) = state.overflowing_add(1013904223u32);
        *byte = ((state >> (i % 24)) & 0xff) as u8;
    }

    data
}

/// Returns some fake data that differs from [`get_fake_data`].
pub fn get_other_fake_data(len: usize) -> Vec<u8> {
    let mut data = get_fake_data(len);

    for byte in data.iter_mut() {
        *byte = !*byte;
    }

    data
}
