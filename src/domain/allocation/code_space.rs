//! Code space model and the bijective counter ⇄ short code encoding.
//!
//! A code space is an alphabet of `A` symbols and a fixed code length `L`,
//! giving `M = A^L` addressable codes. Counters in `[0, M)` are scrambled with
//! the multiplicative permutation `counter * K mod M` and written in base `A`,
//! least-significant digit first, right-padded with the alphabet's zero symbol.
//!
//! Changing the alphabet, `L` or `K` of a running deployment breaks the
//! bijection for codes that were already issued.

use std::collections::HashSet;

/// RFC 3986 unreserved characters. The first symbol is the zero symbol.
pub const DEFAULT_ALPHABET: &str =
    "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-._~";

pub const DEFAULT_CODE_LENGTH: u32 = 7;

/// Odd multiplier used by the permutation step.
pub const DEFAULT_MULTIPLIER: u64 = 518_973_461_827;

/// Counters are persisted as signed 64-bit integers and the modular routines
/// need `2 * (M - 1)` to fit in a `u64`.
pub const MAX_SPACE_SIZE: u64 = 1 << 63;

const DEFAULT_SPACE_SIZE: u64 = (DEFAULT_ALPHABET.len() as u64).pow(DEFAULT_CODE_LENGTH);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeSpaceError {
    #[error("alphabet must contain at least 2 symbols, got {0}")]
    AlphabetTooSmall(usize),

    #[error("alphabet symbol {0:?} is not printable ASCII")]
    NonPrintableSymbol(char),

    #[error("alphabet symbol {0:?} appears more than once")]
    DuplicateSymbol(char),

    #[error("code length must be at least 1")]
    ZeroLength,

    #[error("code space {alphabet}^{length} exceeds the supported maximum of 2^63")]
    SpaceTooLarge { alphabet: usize, length: u32 },

    #[error("multiplier {multiplier} is not coprime with the code space size {space_size}")]
    MultiplierNotCoprime { multiplier: u64, space_size: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("code must be {expected} characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("character {0:?} is not part of the code alphabet")]
    InvalidSymbol(char),
}

/// A validated code space together with its permutation constants.
#[derive(Debug, Clone)]
pub struct CodeSpace {
    alphabet: String,
    length: u32,
    size: u64,
    multiplier: u64,
    inverse: u64,
}

impl CodeSpace {
    /// Builds a code space, validating every constant up front.
    ///
    /// # Errors
    ///
    /// Returns [`CodeSpaceError`] if the alphabet has fewer than two unique
    /// printable ASCII symbols, the length is zero, `A^L` exceeds
    /// [`MAX_SPACE_SIZE`], or the multiplier shares a factor with `A^L`.
    pub fn new(alphabet: &str, length: u32, multiplier: u64) -> Result<Self, CodeSpaceError> {
        let symbols: Vec<char> = alphabet.chars().collect();
        if symbols.len() < 2 {
            return Err(CodeSpaceError::AlphabetTooSmall(symbols.len()));
        }

        let mut seen = HashSet::with_capacity(symbols.len());
        for &symbol in &symbols {
            if !symbol.is_ascii_graphic() {
                return Err(CodeSpaceError::NonPrintableSymbol(symbol));
            }
            if !seen.insert(symbol) {
                return Err(CodeSpaceError::DuplicateSymbol(symbol));
            }
        }

        if length == 0 {
            return Err(CodeSpaceError::ZeroLength);
        }

        let size = (symbols.len() as u64)
            .checked_pow(length)
            .filter(|size| *size <= MAX_SPACE_SIZE)
            .ok_or(CodeSpaceError::SpaceTooLarge {
                alphabet: symbols.len(),
                length,
            })?;

        let inverse =
            mod_inverse(multiplier, size).ok_or(CodeSpaceError::MultiplierNotCoprime {
                multiplier,
                space_size: size,
            })?;

        Ok(Self {
            alphabet: alphabet.to_string(),
            length,
            size,
            multiplier: multiplier % size,
            inverse,
        })
    }

    /// Total number of addressable codes, `M = A^L`.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Fixed code length `L`.
    pub fn code_length(&self) -> usize {
        self.length as usize
    }

    pub fn alphabet(&self) -> &str {
        &self.alphabet
    }

    pub fn multiplier(&self) -> u64 {
        self.multiplier
    }

    /// Returns true if every character of `code` belongs to the alphabet and
    /// the code has the expected length.
    pub fn is_valid_code(&self, code: &str) -> bool {
        code.len() == self.code_length()
            && code.bytes().all(|b| self.alphabet.as_bytes().contains(&b))
    }

    /// Encodes a counter into a fixed-length short code.
    ///
    /// Counters outside `[0, M)` are reduced modulo `M` first.
    pub fn encode(&self, counter: u64) -> String {
        let symbols = self.alphabet.as_bytes();
        let base = symbols.len() as u64;
        let mut permuted = mul_mod(counter, self.multiplier, self.size);

        let mut code = String::with_capacity(self.code_length());
        while permuted > 0 {
            code.push(symbols[(permuted % base) as usize] as char);
            permuted /= base;
        }
        while code.len() < self.code_length() {
            code.push(symbols[0] as char);
        }
        code
    }

    /// Recovers the counter a code was produced from.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the code has the wrong length or contains a
    /// character outside the alphabet.
    pub fn decode(&self, code: &str) -> Result<u64, DecodeError> {
        let actual = code.chars().count();
        if actual != self.code_length() {
            return Err(DecodeError::InvalidLength {
                expected: self.code_length(),
                actual,
            });
        }

        let base = self.alphabet.len() as u64;
        let mut permuted = 0u64;
        // Least-significant digit comes first, so fold from the end.
        for symbol in code.chars().rev() {
            let digit = self
                .alphabet
                .find(symbol)
                .ok_or(DecodeError::InvalidSymbol(symbol))?;
            permuted = permuted * base + digit as u64;
        }

        Ok(mul_mod(permuted, self.inverse, self.size))
    }
}

impl Default for CodeSpace {
    fn default() -> Self {
        Self {
            alphabet: DEFAULT_ALPHABET.to_string(),
            length: DEFAULT_CODE_LENGTH,
            size: DEFAULT_SPACE_SIZE,
            multiplier: DEFAULT_MULTIPLIER,
            // The default multiplier is odd and coprime with 2, 3 and 11.
            inverse: mod_inverse(DEFAULT_MULTIPLIER, DEFAULT_SPACE_SIZE).unwrap_or(1),
        }
    }
}

/// `(a * b) mod m` by binary double-and-add, never forming the full product.
///
/// Requires `m <= 2^63` so that `2 * (m - 1)` fits in a `u64`.
pub fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    if m <= 1 {
        return 0;
    }

    let mut result = 0u64;
    let mut a = a % m;
    let mut b = b;
    while b > 0 {
        if b & 1 == 1 {
            result = (result + a) % m;
        }
        a = (a << 1) % m;
        b >>= 1;
    }
    result
}

/// Multiplicative inverse of `k` modulo `m`, or `None` when `gcd(k, m) != 1`.
///
/// Extended Euclid with the Bézout coefficient kept reduced mod `m`, so every
/// intermediate value stays below `m`.
pub fn mod_inverse(k: u64, m: u64) -> Option<u64> {
    if m == 0 {
        return None;
    }

    let (mut r0, mut r1) = (m, k % m);
    let (mut t0, mut t1) = (0u64, 1u64 % m);
    while r1 != 0 {
        let q = r0 / r1;
        (r0, r1) = (r1, r0 - q * r1);
        let qt = mul_mod(q, t1, m);
        (t0, t1) = (t1, (t0 + (m - qt)) % m);
    }

    (r0 == 1).then_some(t0)
}
