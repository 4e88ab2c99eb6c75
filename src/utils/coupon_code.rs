use rand::Rng;

const CODE_LEN: usize = 10;
const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a random coupon code candidate. Uniqueness is enforced by the
/// issuer against the coupons table, not assumed from randomness.
pub fn generate_coupon_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_CHARS[rng.gen_range(0..CODE_CHARS.len())] as char)
        .collect()
}
