//! Prints an argon2 PHC hash for a password read from stdin, for use as
//! `password_hash` in a `[[users]]` entry.

use std::io::{self, Write};

use shelter_core::password;

fn main() -> anyhow::Result<()> {
    eprint!("Enter password: ");
    io::stderr().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    let hash = password::hash_password(input.trim())?;
    println!("{hash}");
    Ok(())
}
