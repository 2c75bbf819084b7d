//! # ml-sync CLI
//!
//! Command-line interface over a stored ML artifact database.
//!
//! ## Usage
//! ```bash
//! ml-sync status
//! ml-sync cluster --min-input-size 10 --output json
//! ```

mod cli;

use photo_ml_sync::Result;

fn main() -> Result<()> {
    photo_ml_sync::init_tracing();
    cli::run()
}
