//! Seed readiness.
//!
//! [`SeedState`] is created once at startup and handed to whatever answers
//! readiness probes; the pipeline only ever holds the [`SeedMarker`], whose
//! single operation is to flip the state to ready.

use derive_more::Display;
use tokio::sync::watch;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    #[display("ready")]
    Ready,
    #[display("pending")]
    Pending,
}

/// Read side of the seed state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SeedState {
    seeded: watch::Receiver<bool>,
}

/// Write side of the seed state.
#[derive(Debug)]
pub struct SeedMarker {
    seeded: watch::Sender<bool>,
}

impl SeedState {
    pub fn new() -> (Self, SeedMarker) {
        let (tx, rx) = watch::channel(false);
        (Self { seeded: rx }, SeedMarker { seeded: tx })
    }

    pub fn readiness(&self) -> Readiness {
        if *self.seeded.borrow() { Readiness::Ready } else { Readiness::Pending }
    }

    /// Wait until the data has been seeded.
    ///
    /// Returns [`Readiness::Pending`] if the marker was dropped without ever
    /// marking the state as seeded.
    pub async fn wait(&mut self) -> Readiness {
        match self.seeded.wait_for(|seeded| *seeded).await {
            Ok(_) => Readiness::Ready,
            Err(_) => Readiness::Pending,
        }
    }
}

impl SeedMarker {
    pub fn mark_seeded(&self) {
        self.seeded.send_replace(true);
    }
}
