// small arithmetic helpers shared by the timing model

pub fn ceil_log2(value: u64) -> u32 {
    assert!(value > 0);
    64 - (value - 1).leading_zeros()
}
