//! Types de données pour le pipeline audio
//!
//! Ce module définit les structures qui circulent dans le pipeline :
//! - SampleBlock : petit bloc de capture (échantillons flottants)
//! - UplinkStats / PlaybackStats : compteurs pour le monitoring

use serde::{Deserialize, Serialize};

/// Type pour un échantillon audio
///
/// Valeurs entre -1.0 et +1.0, 0.0 = silence.
pub type Sample = f32;

/// Petit bloc d'échantillons livré par la capture
///
/// C'est l'unité d'entrée de l'uplink : le périphérique livre des blocs de
/// taille fixe (128 échantillons typique) à sa cadence native. L'uplink ne
/// suppose aucun rapport entre la taille d'un bloc et celle d'une frame.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBlock {
    /// Les échantillons mono, dans l'ordre de capture
    pub samples: Vec<Sample>,
}

impl SampleBlock {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Crée un bloc de silence
    pub fn silence(sample_count: usize) -> Self {
        Self::new(vec![0.0; sample_count])
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Niveau maximum (peak) du bloc
    ///
    /// Utile pour l'affichage d'un vumètre ou le debug.
    pub fn peak_level(&self) -> f32 {
        self.samples.iter().map(|&s| s.abs()).fold(0.0, f32::max)
    }
}

/// Statistiques de l'uplink audio
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct UplinkStats {
    /// Blocs de capture reçus (porte ouverte ou non)
    pub blocks_in: u64,

    /// Frames complètes envoyées au transport
    pub frames_sent: u64,

    /// Frames jetées pour cause de backpressure
    ///
    /// Ce n'est pas une erreur : l'uplink privilégie la fraîcheur.
    pub frames_dropped: u64,
}

/// Statistiques du planificateur de lecture
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct PlaybackStats {
    /// Blocs décodés et planifiés
    pub blocks_scheduled: u64,

    /// Resynchronisations du curseur après un underrun
    pub resyncs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_block() {
        let block = SampleBlock::silence(128);
        assert_eq!(block.len(), 128);
        assert_eq!(block.peak_level(), 0.0);
    }

    #[test]
    fn test_peak_level() {
        let block = SampleBlock::new(vec![0.1, -0.7, 0.3]);
        assert!((block.peak_level() - 0.7).abs() < f32::EPSILON);
    }
}
