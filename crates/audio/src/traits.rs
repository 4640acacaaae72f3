//! Traits abstraits pour le pipeline audio
//!
//! Ce module définit les interfaces (traits) que doivent implémenter
//! tous les composants du pipeline de secours. Chaque couture a au moins
//! deux implémentations : une réelle (cpal, canal réseau) et une
//! déterministe pour les tests.
//!
//! `#[async_trait]` permet d'avoir des fonctions async dans les traits.
//! `Send + Sync` indique que les objets peuvent être partagés entre threads.

use std::time::Duration;

use async_trait::async_trait;

use crate::{AudioResult, SampleBlock};

/// Trait pour produire des blocs de capture
///
/// Un bloc est le petit paquet d'échantillons que le périphérique livre
/// au rythme du hardware (128 échantillons par défaut). Implémentations :
/// - `CpalBlockSource` : capture réelle via cpal
/// - `ScriptedBlockSource` : séquence pré-écrite pour les tests
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Démarre la capture
    ///
    /// Doit être appelée avant `next_block()`.
    ///
    /// # Erreurs
    /// - `AudioError::NoDeviceFound` : aucun microphone trouvé
    /// - `AudioError::InitializationError` : échec de l'ouverture du flux
    async fn start(&mut self) -> AudioResult<()>;

    /// Arrête la capture et libère le périphérique
    async fn stop(&mut self) -> AudioResult<()>;

    /// Récupère le prochain bloc d'échantillons
    ///
    /// Bloque jusqu'à ce qu'un bloc soit disponible. Retourne `None` quand
    /// la source est épuisée (fin de script, ou capture arrêtée).
    ///
    /// # Erreurs
    /// - `AudioError::DeviceDisconnected` : microphone débranché
    async fn next_block(&mut self) -> AudioResult<Option<SampleBlock>>;

    /// Retourne des informations sur le périphérique utilisé
    fn device_info(&self) -> String {
        "Source audio inconnue".to_string()
    }
}

/// Trait pour envoyer des frames encodées vers le pair distant
///
/// C'est la sortie du montage amont : une frame PCM16 complète par appel.
/// Le transport réel est un canal de données ; les tests utilisent un
/// collecteur en mémoire.
#[async_trait]
pub trait FrameOutlet: Send + Sync {
    /// Envoie une frame encodée
    ///
    /// # Erreurs
    /// - `AudioError::ChannelClosed` : le transport est fermé
    async fn send_frame(&self, payload: Vec<u8>) -> AudioResult<()>;

    /// Nombre de bytes en attente d'envoi dans le transport
    ///
    /// Sert de signal de contre-pression : au-delà du seuil configuré,
    /// le montage amont jette les frames au lieu de les empiler.
    fn buffered_bytes(&self) -> usize;
}

/// Trait pour planifier des blocs audio à un instant précis
///
/// Le planificateur de lecture ne joue pas les blocs lui-même : il les
/// confie à un puits avec une date de lecture. Implémentations :
/// - `CpalPlaybackSink` : sortie réelle vers les haut-parleurs
/// - `RecordingSink` : enregistre les (bloc, date) pour vérification
pub trait PlaybackSink: Send + Sync {
    /// Planifie un bloc pour lecture à l'instant donné
    ///
    /// `at` est exprimé en secondes sur l'horloge du puits.
    fn schedule(&mut self, block: SampleBlock, at: f64) -> AudioResult<()>;
}

/// Trait pour lire l'heure de lecture courante
///
/// Abstrait l'horloge audio pour rendre le planificateur testable :
/// - `RealClock` : temps écoulé depuis le démarrage du flux
/// - `ManualClock` : avancée à la main dans les tests
pub trait PlaybackClock: Send + Sync {
    /// Heure courante en secondes
    fn now(&self) -> f64;
}

/// Horloge fondée sur le temps réel écoulé
pub struct RealClock {
    origin: std::time::Instant,
}

impl RealClock {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

impl Default for RealClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock for RealClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Horloge pilotée à la main (tests)
///
/// ```rust
/// use audio::{ManualClock, PlaybackClock};
///
/// let clock = ManualClock::new();
/// assert_eq!(clock.now(), 0.0);
/// clock.advance(std::time::Duration::from_millis(20));
/// assert!((clock.now() - 0.020).abs() < 1e-9);
/// ```
pub struct ManualClock {
    now: std::sync::Mutex<f64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: std::sync::Mutex::new(0.0),
        }
    }

    /// Avance l'horloge de la durée donnée
    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by.as_secs_f64();
    }

    /// Positionne l'horloge à une valeur absolue
    pub fn set(&self, to: f64) {
        *self.now.lock().unwrap() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap()
    }
}
