//! Password hashing utility for Beacon Auth
//!
//! Produces an Argon2id hash that the login endpoint will accept, for seeding
//! operator accounts without a plaintext password touching the database.
//!
//! Usage:
//!   cargo run --bin hash-password
//!   cargo run --bin hash-password "MySecurePassword123"
//!
//! Reading from stdin keeps the password out of the process list.

use std::env;
use std::io::{self, Write};

use beacon_auth_api::auth::{validate_password_strength, CredentialHasher, WorkFactor};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let password = if let Some(pwd) = env::args().nth(1) {
        pwd
    } else {
        print!("Enter password to hash: ");
        io::stdout().flush()?;

        let mut password = String::new();
        io::stdin().read_line(&mut password)?;
        password.trim_end_matches(['\r', '\n']).to_string()
    };

    if password.is_empty() {
        eprintln!("Error: Password cannot be empty");
        std::process::exit(1);
    }

    if let Err(e) = validate_password_strength(&password) {
        eprintln!("Warning: {}. The login endpoint will still accept this hash.", e);
    }

    let hasher = CredentialHasher::new(WorkFactor::default())?;
    let password_hash = hasher.hash_blocking(&password)?;

    println!("\n===========================================");
    println!("Password Hash (Argon2id):");
    println!("===========================================");
    println!("{}", password_hash);
    println!("===========================================\n");

    println!("Example SQL:");
    println!(
        "UPDATE users SET password_hash = '{}' WHERE lower(email) = 'admin@example.com';",
        password_hash
    );

    Ok(())
}
