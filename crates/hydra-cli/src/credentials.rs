//! Database credential lookup via the OS keyring, with an interactive
//! fallback prompt when `autologin` is set and nothing is stored yet.

use anyhow::{Context, Result};
use dialoguer::Password;
use keyring::Entry;

const SERVICE: &str = "hydra_farm";

/// Look up the stored password for `username`. Returns `Ok(None)` when the
/// keyring has no entry, rather than treating a miss as an error — callers
/// decide whether to fall back to a prompt.
pub fn lookup_password(username: &str) -> Result<Option<String>> {
    let entry = Entry::new(SERVICE, username).context("failed to open keyring entry")?;
    match entry.get_password() {
        Ok(password) => Ok(Some(password)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(e).context("failed to read credential from keyring"),
    }
}

/// Store `password` for `username` in the OS keyring.
pub fn store_password(username: &str, password: &str) -> Result<()> {
    let entry = Entry::new(SERVICE, username).context("failed to open keyring entry")?;
    entry
        .set_password(password)
        .context("failed to write credential to keyring")?;
    Ok(())
}

/// Resolve a password for `username`: keyring lookup first; if absent and
/// `autologin` is true, fall back to an interactive prompt and persist the
/// result so future runs skip the prompt.
pub fn resolve_password(username: &str, autologin: bool) -> Result<String> {
    if let Some(password) = lookup_password(username)? {
        return Ok(password);
    }

    if !autologin {
        anyhow::bail!("no stored credential for {username} and autologin is disabled");
    }

    let password: String = Password::new()
        .with_prompt(format!("database password for {username}"))
        .interact()
        .context("failed to read password")?;
    store_password(username, &password)?;
    Ok(password)
}
