use anyhow::{Result, bail};
use std::io::{self, BufRead, IsTerminal};
use zeroize::Zeroizing;

pub const ENV_PASSPHRASE: &str = "FIELDSEAL_PASSPHRASE";

/// Where a passphrase comes from, in lookup order.
enum Source {
    Env(Zeroizing<String>),
    Pipe,
    Tty,
}

fn source() -> Source {
    match std::env::var(ENV_PASSPHRASE) {
        Ok(pw) if !pw.is_empty() => Source::Env(Zeroizing::new(pw)),
        _ if io::stdin().is_terminal() => Source::Tty,
        _ => Source::Pipe,
    }
}

fn read_line(input: &mut impl BufRead) -> Result<Zeroizing<String>> {
    let mut line = Zeroizing::new(String::new());
    input.read_line(&mut line)?;
    let len = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(len);
    Ok(line)
}

fn non_empty(pw: Zeroizing<String>) -> Result<Zeroizing<String>> {
    if pw.is_empty() {
        bail!("passphrase cannot be empty");
    }
    Ok(pw)
}

/// Reads the passphrase unlocking an existing store.
pub fn read_passphrase() -> Result<Zeroizing<String>> {
    match source() {
        Source::Env(pw) => Ok(pw),
        Source::Pipe => non_empty(read_line(&mut io::stdin().lock())?),
        Source::Tty => non_empty(Zeroizing::new(rpassword::prompt_password("Passphrase: ")?)),
    }
}

/// Reads a new passphrase. Piped input and the prompt both ask twice.
pub fn read_new_passphrase_with_confirmation() -> Result<Zeroizing<String>> {
    let (first, second) = match source() {
        Source::Env(pw) => return Ok(pw),
        Source::Pipe => {
            let mut stdin = io::stdin().lock();
            (read_line(&mut stdin)?, read_line(&mut stdin)?)
        }
        Source::Tty => (
            Zeroizing::new(rpassword::prompt_password("New passphrase: ")?),
            Zeroizing::new(rpassword::prompt_password("Confirm passphrase: ")?),
        ),
    };

    let first = non_empty(first)?;
    if first != second {
        bail!("passphrases do not match");
    }
    Ok(first)
}
