//! Random password generation for `k2 add`.

use rand::Rng;
use zeroize::Zeroizing;

use crate::errors::{KtwoError, Result};

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!#$%&()*+,-./:;<=>?@[]^_{|}~";

/// Shortest password that still fits one character of every class.
const MIN_LENGTH: usize = 4;

/// Generate a password of `length` characters containing at least one
/// lowercase letter, uppercase letter, digit and symbol.
pub fn generate_password(length: usize) -> Result<Zeroizing<String>> {
    if length < MIN_LENGTH {
        return Err(KtwoError::InvalidParameters(format!(
            "generated passwords must be at least {MIN_LENGTH} characters"
        )));
    }

    let classes = [LOWER, UPPER, DIGITS, SYMBOLS];
    let mut rng = rand::rng();
    let mut bytes: Zeroizing<Vec<u8>> = Zeroizing::new(Vec::with_capacity(length));

    for class in classes {
        bytes.push(class[rng.random_range(0..class.len())]);
    }
    while bytes.len() < length {
        let class = classes[rng.random_range(0..classes.len())];
        bytes.push(class[rng.random_range(0..class.len())]);
    }

    // Fisher-Yates, so the guaranteed characters are not always first.
    for i in (1..bytes.len()).rev() {
        let j = rng.random_range(0..=i);
        bytes.swap(i, j);
    }

    let password: String = bytes.iter().map(|b| char::from(*b)).collect();
    Ok(Zeroizing::new(password))
}
