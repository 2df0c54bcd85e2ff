// src/generator.rs
use rand::seq::SliceRandom;
use rand::thread_rng;

const LOWERCASE_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const NUMBER_CHARS: &[u8] = b"0123456789";
// No comma or double quote, so generated secrets export to CSV untouched.
const SYMBOL_CHARS: &[u8] = b"!@#$%^&*()_+-=[]{}|;:.<>?";

/// Character classes and length for a generated secret.
#[derive(Debug, Clone)]
pub struct SecretCriteria {
    pub length: usize,
    pub use_uppercase: bool,
    pub use_lowercase: bool,
    pub use_numbers: bool,
    pub use_symbols: bool,
}

impl Default for SecretCriteria {
    fn default() -> Self {
        SecretCriteria {
            length: 16,
            use_uppercase: true,
            use_lowercase: true,
            use_numbers: true,
            use_symbols: true,
        }
    }
}

/// Generates a secret containing at least one character from every selected class.
pub fn generate_secret(criteria: &SecretCriteria) -> Result<String, String> {
    let classes: Vec<&[u8]> = [
        (criteria.use_lowercase, LOWERCASE_CHARS),
        (criteria.use_uppercase, UPPERCASE_CHARS),
        (criteria.use_numbers, NUMBER_CHARS),
        (criteria.use_symbols, SYMBOL_CHARS),
    ]
    .into_iter()
    .filter(|(selected, _)| *selected)
    .map(|(_, chars)| chars)
    .collect();

    if classes.is_empty() {
        return Err("At least one character set (lowercase, uppercase, numbers, symbols) must be selected.".to_string());
    }
    if criteria.length < classes.len() {
        return Err(format!(
            "Length {} is too short to include all {} selected character sets.",
            criteria.length,
            classes.len()
        ));
    }

    let charset: Vec<u8> = classes.concat();
    let mut rng = thread_rng();
    let mut bytes: Vec<u8> = classes
        .iter()
        .filter_map(|class| class.choose(&mut rng).copied())
        .collect();
    while bytes.len() < criteria.length {
        if let Some(b) = charset.choose(&mut rng) {
            bytes.push(*b);
        }
    }
    bytes.shuffle(&mut rng);

    String::from_utf8(bytes).map_err(|e| format!("Failed to convert secret bytes to String: {}", e))
}
