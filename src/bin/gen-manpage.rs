//! Renders the rdfu(1) man page from the clap command definition.
//!
//! `cargo run --bin gen-manpage [dir]` writes the page under `./man`
//! unless another directory is given.

use clap::CommandFactory;
use std::fs;
use std::path::PathBuf;

#[path = "../cli.rs"]
mod cli;

fn main() -> std::io::Result<()> {
    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("man"));
    fs::create_dir_all(&output_dir)?;

    let man = clap_mangen::Man::new(cli::Cli::command());
    let mut rendered = Vec::new();
    man.render(&mut rendered)?;

    let page = output_dir.join("rdfu.1");
    fs::write(&page, rendered)?;

    println!("Wrote {}", page.display());
    println!();
    println!("Preview it with:");
    println!("  man -l {}", page.display());
    println!();
    println!("Install it with:");
    println!("  sudo cp {} /usr/local/share/man/man1/", page.display());
    println!("  sudo mandb");

    Ok(())
}
