//! Imgloader.
//!
//! Command line host for the image loader. It fetches batches of images through the same
//! caching, retrying loader the dashboard uses, which makes it handy to check CDN health
//! and to warm up caches before a launch.

#![warn(missing_debug_implementations, clippy::all)]

mod cli;
mod logging;
mod output;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
