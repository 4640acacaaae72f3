//! Traits abstraits pour la couche de signalisation
//!
//! Trois coutures, chacune avec une implémentation réelle et une
//! implémentation déterministe pour les tests :
//! - `ControlChannel` : le fil de signalisation vers le serveur de salon
//! - `PeerSession` : la session media native (définie dans `peer`)
//! - `StatusSink` : le débouché des journaux et de l'état de santé

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{SignalMessage, SignalResult, SimpleStatus};

/// Trait pour le canal de contrôle
///
/// Le canal transporte les `SignalMessage` dans les deux sens. La
/// politique de reconnexion (backoff, reprise) appartient à
/// l'implémentation : le moteur de négociation n'en sait rien, il voit
/// un flux de messages. Implémentations :
/// - `MemoryChannel` : paire duplex en mémoire (tests, démos)
/// - une implémentation WebSocket côté application, hors de ce crate
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Envoie un message au pair distant
    ///
    /// # Erreurs
    /// - `SignalError::ChannelClosed` : l'autre extrémité est partie
    async fn send(&self, message: SignalMessage) -> SignalResult<()>;

    /// S'abonne au flux des messages entrants
    ///
    /// Chaque abonné reçoit sa propre copie de chaque message. Le moteur
    /// ne s'abonne qu'une fois par vie d'instance.
    fn subscribe(&self) -> broadcast::Receiver<SignalMessage>;
}

/// Trait pour le débouché des journaux et de l'état de santé
///
/// Injecté dans le moteur : chaque transition de cycle de vie produit
/// une ligne `on_log`, chaque changement d'état de connexion une
/// classification `on_status`.
pub trait StatusSink: Send + Sync {
    /// Ligne de journal lisible par un humain
    fn on_log(&self, line: &str);

    /// Classification simplifiée de la santé de la connexion
    fn on_status(&self, status: SimpleStatus);
}

/// Débouché qui imprime sur la sortie standard
pub struct PrintSink;

impl StatusSink for PrintSink {
    fn on_log(&self, line: &str) {
        println!("📡 {}", line);
    }

    fn on_status(&self, status: SimpleStatus) {
        let icon = match status {
            SimpleStatus::Ok => "✅",
            SimpleStatus::Warn => "⚠️",
            SimpleStatus::Bad => "❌",
        };
        println!("{} État connexion : {:?}", icon, status);
    }
}

/// Débouché silencieux (tests)
pub struct NullSink;

impl StatusSink for NullSink {
    fn on_log(&self, _line: &str) {}
    fn on_status(&self, _status: SimpleStatus) {}
}

/// Débouché de test : mémorise tout ce qui passe
#[derive(Clone, Default)]
pub struct MemorySink {
    lines: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
    statuses: std::sync::Arc<std::sync::Mutex<Vec<SimpleStatus>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<SimpleStatus> {
        self.statuses.lock().unwrap().clone()
    }

    /// Vrai si une ligne de journal contient la sous-chaîne donnée
    pub fn logged(&self, needle: &str) -> bool {
        self.lines.lock().unwrap().iter().any(|l| l.contains(needle))
    }
}

impl StatusSink for MemorySink {
    fn on_log(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }

    fn on_status(&self, status: SimpleStatus) {
        self.statuses.lock().unwrap().push(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records() {
        let sink = MemorySink::new();
        sink.on_log("négociation démarrée");
        sink.on_status(SimpleStatus::Warn);

        assert!(sink.logged("négociation"));
        assert_eq!(sink.statuses(), vec![SimpleStatus::Warn]);
    }
}
