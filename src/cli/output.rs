//! Terminal output for fatal startup errors.
//!
//! Respects `NO_COLOR`. Everything goes to stderr; stdout stays clean for
//! orchestrators that capture it.

use console::style;

fn colors_enabled() -> bool {
    std::env::var("NO_COLOR").is_err()
}

/// Print an error message to stderr (red).
///
/// Example: `✗ caller is missing ... permission`
pub fn error(msg: &str) {
    if colors_enabled() {
        eprintln!("{} {}", style("✗").red(), msg);
    } else {
        eprintln!("✗ {}", msg);
    }
}

/// Print a hint message to stderr (cyan).
///
/// Example: `→ grant roles/cloudkms.cryptoKeyEncrypterDecrypter on the key`
pub fn hint(msg: &str) {
    if colors_enabled() {
        eprintln!("{} {}", style("→").cyan(), style(msg).cyan());
    } else {
        eprintln!("→ {}", msg);
    }
}
