use rand::{Rng, distributions::Alphanumeric, rngs::OsRng};

/// Wraps `text` in single quotes for `sh`, so nothing inside is interpreted by the shell.
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// `len` alphanumeric characters drawn from the OS CSPRNG.
pub fn random_suffix(len: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
