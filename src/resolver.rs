//! Sink resolution.
//!
//! Maps a Bluetooth device to the audio-server sink that carries its audio,
//! using a scored substring heuristic over sink names.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::device::Address;
use crate::error::{Result, RouterError};
use crate::traits::AudioServer;

/// Scoring thresholds and name markers for sink matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPolicy {
    /// Bumped whenever a threshold or marker changes.
    pub version: u32,
    /// Sink name contains the device address.
    pub address_score: u8,
    /// Sink name contains a spelling of the device name.
    pub name_score: u8,
    /// Sink name only carries the generic Bluetooth output marker.
    pub generic_score: u8,
    /// Lowest score that may be committed.
    pub min_score: u8,
    /// Marker of the Bluetooth audio backend in sink names.
    pub backend_marker: &'static str,
    /// Markers of a Bluetooth output sink.
    pub output_markers: &'static [&'static str],
}

impl MatchPolicy {
    pub const V1: MatchPolicy = MatchPolicy {
        version: 1,
        address_score: 100,
        name_score: 80,
        generic_score: 50,
        min_score: 50,
        backend_marker: "bluez",
        output_markers: &["bluez_sink", "bluez_output"],
    };

    /// Whether a sink is provided by the Bluetooth audio backend.
    pub fn is_bluetooth_sink(&self, sink: &str) -> bool {
        sink.to_lowercase().contains(self.backend_marker)
    }

    /// Score one sink against a device. Non-Bluetooth sinks score 0.
    pub fn score(&self, sink: &str, address: &Address, name: Option<&str>) -> u8 {
        let sink = sink.to_lowercase();
        if !sink.contains(self.backend_marker) {
            return 0;
        }

        if sink.contains(&address.to_sink_fragment().to_lowercase()) {
            return self.address_score;
        }

        // A named device that matches no spelling belongs to some other sink.
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            if name_variants(name).iter().any(|v| sink.contains(&v.to_lowercase())) {
                return self.name_score;
            }
            return 0;
        }

        if self.output_markers.iter().any(|m| sink.contains(m)) {
            return self.generic_score;
        }

        0
    }

    /// Pick the best sink for a device from one enumeration.
    ///
    /// An address match ends the search. Otherwise the first sink with the
    /// highest score wins, provided it reaches `min_score`. A generic-marker
    /// match only counts when it is the sole Bluetooth sink listed.
    pub fn best_candidate(&self, sinks: &[String], address: &Address, name: Option<&str>) -> Option<SinkCandidate> {
        let mut best: Option<SinkCandidate> = None;

        for sink in sinks {
            let score = self.score(sink, address, name);
            if score == 0 {
                continue;
            }
            debug!("Sink {} scored {} for {}", sink, score, address);

            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(SinkCandidate {
                    sink_name: sink.clone(),
                    score,
                });
            }
            if score == self.address_score {
                break;
            }
        }

        let bluetooth_sinks = sinks.iter().filter(|s| self.is_bluetooth_sink(s)).count();
        best.filter(|b| b.score >= self.min_score)
            .filter(|b| b.score > self.generic_score || bluetooth_sinks == 1)
    }
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self::V1
    }
}

/// Spellings of a device name that may appear inside a sink name.
fn name_variants(name: &str) -> [String; 4] {
    [
        name.replace(' ', "_"),
        name.replace(' ', "-"),
        name.replace('-', "_"),
        name.to_string(),
    ]
}

/// A sink matched to a device, with its confidence score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkCandidate {
    pub sink_name: String,
    pub score: u8,
}

/// Resolves device sinks, polling while the audio server catches up with a
/// fresh Bluetooth connection.
pub struct SinkResolver {
    audio: Arc<dyn AudioServer>,
    policy: MatchPolicy,
    attempts: u32,
    interval: Duration,
}

impl SinkResolver {
    pub fn new(audio: Arc<dyn AudioServer>, policy: MatchPolicy, attempts: u32, interval: Duration) -> Self {
        Self {
            audio,
            policy,
            attempts: attempts.max(1),
            interval,
        }
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    /// Resolve the sink for `address`, retrying up to the configured number
    /// of attempts.
    pub async fn resolve(&self, address: &Address, name: Option<&str>) -> Result<SinkCandidate> {
        for attempt in 1..=self.attempts {
            match self.audio.list_sinks().await {
                Ok(sinks) => {
                    if let Some(candidate) = self.policy.best_candidate(&sinks, address, name) {
                        info!(
                            "Resolved {} to sink {} (score {})",
                            address, candidate.sink_name, candidate.score
                        );
                        return Ok(candidate);
                    }
                    info!(
                        "No suitable Bluetooth sink for {} yet ({}/{})",
                        address, attempt, self.attempts
                    );
                }
                Err(e) => warn!("Failed to list sinks ({}/{}): {}", attempt, self.attempts, e),
            }

            if attempt < self.attempts {
                sleep(self.interval).await;
            }
        }

        warn!(
            "Could not find sink for device {} after {} attempts",
            address, self.attempts
        );
        Err(RouterError::SinkNotFound(address.to_string()))
    }
}
