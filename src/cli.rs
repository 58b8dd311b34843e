use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fetch-har")]
#[command(about = "Issue HTTP requests and record them as HAR 1.2 entries.")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch a URL and write the captured HAR log
    Fetch {
        /// URL to request
        url: String,

        /// HTTP method (default: GET, or POST when --data is given)
        #[arg(short = 'X', long)]
        method: Option<String>,

        /// Request header as "Name: value" (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request body
        #[arg(short, long)]
        data: Option<String>,

        /// Write the HAR log to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Append to the HAR file given with --output if it exists
        #[arg(long)]
        append: bool,

        /// Page id stamped on every captured entry
        #[arg(long)]
        page_ref: Option<String>,

        /// Return redirect responses instead of following them
        #[arg(long)]
        no_follow: bool,

        /// Maximum number of redirects to follow
        #[arg(long)]
        max_redirects: Option<usize>,

        /// Do not ask for compressed responses
        #[arg(long)]
        no_compress: bool,

        /// Maximum body size to record (e.g., "100KB", "1.5MB", "unlimited")
        #[arg(long)]
        max_body_size: Option<String>,

        /// Only record text-based bodies (HTML, JSON, JS, CSS, XML)
        #[arg(long)]
        text_only: bool,

        /// Record sizes and timings but no body text
        #[arg(long)]
        no_bodies: bool,
    },

    /// Print the resolved configuration
    Config,
}
