//! GF(256) arithmetic backing the threshold splitter.
//!
//! The field is GF(2^8) with the AES reduction polynomial
//! x^8 + x^4 + x^3 + x + 1. Addition is XOR; multiplication is carryless
//! shift-and-add with reduction; inversion uses a^254 = a^-1.

/// Multiply two field elements.
pub(super) fn mul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        let carry = a & 0x80;
        a <<= 1;
        if carry != 0 {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    product
}

/// Multiplicative inverse of a non-zero element, via a^254.
///
/// Callers guarantee `a != 0`; share indices are validated non-zero and
/// distinct before interpolation, so denominators never vanish.
pub(super) fn inv(a: u8) -> u8 {
    debug_assert!(a != 0, "zero has no inverse in GF(256)");
    let mut result = a;
    for _ in 0..253 {
        result = mul(result, a);
    }
    result
}

/// Evaluate a polynomial (coefficients in ascending degree order) at `x`
/// using Horner's method.
pub(super) fn eval_poly(coefficients: &[u8], x: u8) -> u8 {
    let mut acc = 0u8;
    for &c in coefficients.iter().rev() {
        acc = mul(acc, x) ^ c;
    }
    acc
}

/// Lagrange interpolation at zero over `(x, y)` points with distinct,
/// non-zero `x` values. Reconstructs `f(0)` without rebuilding `f`.
pub(super) fn interpolate_at_zero(points: &[(u8, u8)]) -> u8 {
    let mut acc = 0u8;
    for (i, &(xi, yi)) in points.iter().enumerate() {
        let mut numerator = 1u8;
        let mut denominator = 1u8;
        for (j, &(xj, _)) in points.iter().enumerate() {
            if i != j {
                numerator = mul(numerator, xj);
                // Subtraction and addition coincide in GF(2^8).
                denominator = mul(denominator, xj ^ xi);
            }
        }
        acc ^= mul(mul(numerator, inv(denominator)), yi);
    }
    acc
}
