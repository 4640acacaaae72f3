//! Configuration audio pour le client Salon
//!
//! Ce module centralise tous les paramètres du pipeline audio de secours
//! (capture → framing → envoi → lecture). Les constantes historiques du
//! client (taille de frame, seuil de backpressure, fondu) n'ont pas de
//! justification documentée : elles sont exposées ici comme paramètres
//! configurables plutôt que codées en dur.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration principale du pipeline audio de secours
///
/// `#[derive(Serialize, Deserialize)]` permet de charger/sauvegarder la
/// configuration depuis un fichier si besoin.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Fréquence d'échantillonnage en Hz
    ///
    /// 48000 Hz = standard professionnel, c'est aussi la fréquence native
    /// de la plupart des périphériques.
    pub sample_rate: u32,

    /// Nombre de canaux (1 = mono, suffisant pour la voix)
    pub channels: u16,

    /// Taille d'un bloc de capture en échantillons
    ///
    /// Le périphérique livre des petits blocs (128 échantillons typique) ;
    /// l'uplink ne fait aucune hypothèse sur le rapport bloc/frame,
    /// il accumule simplement.
    pub capture_block: usize,

    /// Taille d'une frame uplink en échantillons
    ///
    /// Chaque frame envoyée sur le fil fait exactement cette taille.
    /// 4096 échantillons à 48 kHz ≈ 85 ms d'audio.
    pub frame_samples: usize,

    /// Longueur du fondu appliqué en début et fin de frame (échantillons)
    ///
    /// Une petite rampe linéaire supprime les clics aux frontières de frame.
    pub fade_samples: usize,

    /// Seuil de backpressure en bytes
    ///
    /// Si le transport a déjà plus que ça en attente d'envoi, la frame
    /// courante est jetée : on préfère la fraîcheur à la complétude.
    pub backpressure_limit: usize,

    /// Avance de resynchronisation du curseur de lecture
    ///
    /// Après un underrun, le curseur repart à "maintenant + cette avance"
    /// au lieu de rattraper le retard en rafale.
    pub resync_lead: Duration,

    /// Débit cible de l'encodeur Opus en bits par seconde
    ///
    /// Utilisé par le transport media natif. 32 kbps suffit largement
    /// pour de la voix mono.
    pub opus_bitrate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 1,
            capture_block: 128,
            frame_samples: 4096,
            fade_samples: 4,
            backpressure_limit: 2 * 1024 * 1024, // 2 MiB
            resync_lead: Duration::from_millis(20),
            opus_bitrate: 32_000,
        }
    }
}

impl AudioConfig {
    /// Taille d'une frame Opus en échantillons (20 ms)
    ///
    /// Opus n'accepte que des durées de frame fixes ; 20 ms est le
    /// compromis standard pour la voix.
    pub fn opus_frame_samples(&self) -> usize {
        self.sample_rate as usize / 50
    }

    /// Durée d'une frame Opus
    pub fn opus_frame_duration(&self) -> Duration {
        Self::samples_duration(self.opus_frame_samples(), self.sample_rate)
    }

    /// Taille en bytes d'une frame encodée (PCM16)
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples * 2
    }

    /// Durée d'un bloc de capture
    pub fn block_duration(&self) -> Duration {
        Self::samples_duration(self.capture_block, self.sample_rate)
    }

    /// Durée d'une frame uplink
    pub fn frame_duration(&self) -> Duration {
        Self::samples_duration(self.frame_samples, self.sample_rate)
    }

    /// Durée d'un nombre arbitraire d'échantillons mono
    pub fn samples_duration(count: usize, sample_rate: u32) -> Duration {
        Duration::from_secs_f64(count as f64 / sample_rate as f64)
    }

    /// Valide que la configuration est cohérente
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate < 8_000 || self.sample_rate > 48_000 {
            return Err(format!(
                "Sample rate invalide: {} (doit être entre 8000 et 48000)",
                self.sample_rate
            ));
        }

        if self.channels != 1 {
            return Err(format!(
                "Nombre de canaux invalide: {} (le pipeline de secours est mono)",
                self.channels
            ));
        }

        if self.capture_block == 0 || self.frame_samples == 0 {
            return Err("Tailles de bloc/frame nulles".to_string());
        }

        if self.fade_samples * 2 > self.frame_samples {
            return Err(format!(
                "Fondu trop long: {} échantillons pour des frames de {}",
                self.fade_samples, self.frame_samples
            ));
        }

        if self.opus_bitrate < 6_000 || self.opus_bitrate > 128_000 {
            return Err(format!(
                "Bitrate Opus invalide: {} (doit être entre 6000 et 128000)",
                self.opus_bitrate
            ));
        }

        Ok(())
    }

    /// Configuration optimisée pour faible latence
    pub fn low_latency() -> Self {
        Self {
            frame_samples: 1024,
            resync_lead: Duration::from_millis(10),
            ..Default::default()
        }
    }

    /// Configuration pour tests (petites frames, seuils courts)
    pub fn test_config() -> Self {
        Self {
            capture_block: 4,
            frame_samples: 16,
            fade_samples: 2,
            backpressure_limit: 64,
            resync_lead: Duration::from_millis(20),
            ..Default::default()
        }
    }
}
