//! Media engine stand-in that hands offers to a human or an external tool.

use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
};

use groupcall_sfu_client::MediaEngine;
use tracing::{error, info};

/// Writes every offer either to numbered files in a directory or to stdout.
#[derive(Debug)]
pub struct SdpDumpEngine {
    offer_dir: Option<PathBuf>,
    written: AtomicUsize,
}

impl SdpDumpEngine {
    pub fn new(offer_dir: Option<PathBuf>) -> io::Result<Self> {
        if let Some(dir) = &offer_dir {
            fs::create_dir_all(dir)?;
        }
        Ok(Self {
            offer_dir,
            written: AtomicUsize::new(0),
        })
    }

    pub fn offers_written(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }

    fn write_offer(&self, index: usize, sdp: &str) -> io::Result<()> {
        match &self.offer_dir {
            Some(dir) => {
                let path = dir.join(format!("offer-{index:04}.sdp"));
                fs::write(&path, sdp)?;
                info!(path = %path.display(), "offer written");
                Ok(())
            }
            None => {
                let mut stdout = io::stdout().lock();
                writeln!(stdout, "--- offer {index} ---")?;
                stdout.write_all(sdp.as_bytes())?;
                stdout.flush()
            }
        }
    }
}

impl MediaEngine for SdpDumpEngine {
    fn set_offer_sdp(&self, sdp: &str, is_partial: bool) {
        let index = self.written.fetch_add(1, Ordering::Relaxed) + 1;
        if let Err(err) = self.write_offer(index, sdp) {
            error!(error = %err, index, is_partial, "failed to write offer");
        }
    }

    fn set_is_muted(&self, is_muted: bool) {
        info!(is_muted, "local microphone mute changed");
    }
}
