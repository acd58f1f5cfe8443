//! Spicedeck - SPICE deck preprocessor
//!
//! Resolves conditionals, includes, and libraries in one or more circuit
//! decks and prints the result.
//!
//! # Usage
//!
//! ```bash
//! spicedeck amplifier.sp
//! spicedeck --show-blocks testbench.sp corner.sp
//! ```

use std::path::PathBuf;

use clap::Parser;
use spicedeck::{error::Result, source_deck, SourceOptions};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// SPICE deck preprocessor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Deck files to source (split on .newjob boundaries)
    #[arg(value_name = "DECK_FILE", required = true)]
    files: Vec<PathBuf>,

    /// Print extracted exec/control/postrun/verilog blocks as well
    #[arg(short = 'b', long)]
    show_blocks: bool,

    /// Maximum include nesting depth
    #[arg(long, default_value_t = 100)]
    max_include_depth: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    let args = Args::parse();
    let options = SourceOptions {
        max_include_depth: args.max_include_depth,
        ..SourceOptions::default()
    };

    let jobs = source_deck(&args.files, &options)?;
    for (i, job) in jobs.iter().enumerate() {
        if jobs.len() > 1 {
            println!("* job {}", i + 1);
        }
        for line in job.deck.iter() {
            println!("{:>5}  {}", line.line_number, line.text);
            if let Some(diag) = &line.error {
                eprintln!("warning: line {}: {}", line.line_number, diag);
            }
        }
        if args.show_blocks {
            print_block("exec", &job.exec);
            print_block("control", &job.control);
            print_block("postrun", &job.postrun);
            print_block("verilog", &job.verilog);
            for cb in &job.codeblocks {
                println!("* codeblock {:?} '{}'", cb.kind, cb.name);
                for line in &cb.lines {
                    println!("       {}", line);
                }
            }
        }
    }
    Ok(())
}

fn print_block(name: &str, lines: &[String]) {
    if lines.is_empty() {
        return;
    }
    println!("* {} block", name);
    for line in lines {
        println!("       {}", line);
    }
}
