//! Arithmetic in GF(2^8) with the Rijndael polynomial x^8 + x^4 + x^3 + x + 1.
//!
//! Multiplication is branchless over its operands; no lookup tables are
//! indexed by secret data.

/// Low byte of the reduction polynomial (0x11B).
const REDUCTION: u8 = 0x1b;

/// Field addition (and subtraction): XOR.
#[inline]
pub fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

/// Field multiplication.
#[inline]
pub fn mul(a: u8, b: u8) -> u8 {
    let mut a = a;
    let mut b = b;
    let mut product = 0u8;
    for _ in 0..8 {
        product ^= a & 0u8.wrapping_sub(b & 1);
        let carry = 0u8.wrapping_sub(a >> 7);
        a = (a << 1) ^ (REDUCTION & carry);
        b >>= 1;
    }
    product
}

/// Multiplicative inverse via a^254. Maps 0 to 0.
pub fn inv(a: u8) -> u8 {
    // 254 = 0b1111_1110
    let a2 = mul(a, a);
    let a4 = mul(a2, a2);
    let a8 = mul(a4, a4);
    let a16 = mul(a8, a8);
    let a32 = mul(a16, a16);
    let a64 = mul(a32, a32);
    let a128 = mul(a64, a64);
    mul(
        mul(mul(a128, a64), mul(a32, a16)),
        mul(mul(a8, a4), a2),
    )
}

/// Field division. `b` must be non-zero.
#[inline]
pub fn div(a: u8, b: u8) -> u8 {
    mul(a, inv(b))
}

/// Evaluate the polynomial with `coefficients` (constant term first) at `x`.
pub fn eval(coefficients: &[u8], x: u8) -> u8 {
    coefficients
        .iter()
        .rev()
        .fold(0u8, |acc, &c| add(mul(acc, x), c))
}

/// Lagrange basis weights for interpolating at zero through `xs`.
///
/// `xs` must be distinct and non-zero.
pub fn lagrange_weights_at_zero(xs: &[u8]) -> Vec<u8> {
    xs.iter()
        .enumerate()
        .map(|(i, &xi)| {
            xs.iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .fold(1u8, |acc, (_, &xj)| mul(acc, div(xj, add(xj, xi))))
        })
        .collect()
}
