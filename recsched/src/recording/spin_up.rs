//! Wake the destination disk before a recording starts.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use log::debug;

const SPIN_UP_FILE: &str = "recsched_spinup.tmp";

/// Write and delete a small file in `dir`.
pub fn touch(dir: &Path) -> io::Result<()> {
    let path = dir.join(SPIN_UP_FILE);
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(b"spin-up")?;
        file.sync_all()?;
    }
    fs::remove_file(&path)?;
    debug!("SpinUp: touched {}", dir.display());
    Ok(())
}
