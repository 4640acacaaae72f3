//! Compteur de trafic partagé
//!
//! Les deux transports (canal de données et pipeline de secours) comptent
//! leurs bytes envoyés et reçus dans un `TrafficMeter`. L'échantillonneur
//! de statistiques lit les compteurs à intervalle fixe et en déduit des
//! débits par différence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Compteurs cumulés de bytes envoyés et reçus
///
/// Clonable à bas coût : les clones partagent les mêmes compteurs.
#[derive(Clone, Default)]
pub struct TrafficMeter {
    sent: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
}

impl TrafficMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Comptabilise des bytes sortants
    pub fn add_sent(&self, bytes: u64) {
        self.sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Comptabilise des bytes entrants
    pub fn add_received(&self, bytes: u64) {
        self.received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Totaux cumulés (envoyé, reçu) depuis la création
    pub fn totals(&self) -> (u64, u64) {
        (
            self.sent.load(Ordering::Relaxed),
            self.received.load(Ordering::Relaxed),
        )
    }
}

/// Mesure différentielle entre deux lectures du compteur
///
/// Conserve la lecture précédente pour produire des deltas, la base du
/// calcul de débit affiché à l'utilisateur.
#[derive(Default)]
pub struct TrafficSampler {
    last_sent: u64,
    last_received: u64,
}

impl TrafficSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relève les compteurs d'un `TrafficMeter` et retourne les deltas
    pub fn sample(&mut self, meter: &TrafficMeter) -> (u64, u64) {
        self.delta(meter.totals())
    }

    /// Calcule (delta envoyé, delta reçu) depuis des totaux arbitraires
    ///
    /// Sert aussi pour les compteurs d'un transport externe (session
    /// media native). Un total qui recule donne un delta nul.
    pub fn delta(&mut self, totals: (u64, u64)) -> (u64, u64) {
        let (sent, received) = totals;
        let delta = (
            sent.saturating_sub(self.last_sent),
            received.saturating_sub(self.last_received),
        );
        self.last_sent = sent;
        self.last_received = received;
        delta
    }
}
