//! Codec Opus pour le transport media natif
//!
//! La piste media locale transporte des échantillons déjà encodés : la
//! compression Opus se fait donc côté application, avant l'écriture sur
//! la piste, et le décodage après la lecture des paquets distants.
//!
//! Opus est particulièrement adapté pour la voix car il :
//! - Supporte des débits très bas (6-128 kbps)
//! - A une latence très faible (frames de 20 ms ici)
//! - Résiste bien aux pertes de paquets réseau

use opus::{Application, Bitrate, Channels, Decoder, Encoder};

use crate::{AudioConfig, AudioError, AudioResult, Sample};

/// Taille maximale recommandée d'un payload Opus
const MAX_PAYLOAD_BYTES: usize = 4000;

/// Durée maximale d'une frame Opus décodable (ms)
const MAX_DECODE_MS: usize = 60;

/// Encodeur et décodeur Opus configurés pour la voix mono
///
/// Chaque direction du transport natif possède sa propre instance : un
/// codec n'est jamais partagé entre tâches, les méthodes prennent
/// `&mut self`. Les buffers de travail sont alloués une fois à la
/// création.
pub struct OpusCodec {
    encoder: Encoder,
    decoder: Decoder,
    frame_samples: usize,
    encode_buffer: Vec<u8>,
    decode_buffer: Vec<Sample>,
}

impl OpusCodec {
    /// Crée un codec prêt à encoder et décoder
    ///
    /// `Application::Voip` optimise l'encodeur pour la voix ; le débit
    /// est adaptatif (VBR) autour de `config.opus_bitrate`.
    ///
    /// # Erreurs
    /// - `AudioError::ConfigError` si la configuration n'est pas supportée
    /// - `AudioError::OpusError` si l'initialisation Opus échoue
    pub fn new(config: &AudioConfig) -> AudioResult<Self> {
        config.validate().map_err(AudioError::ConfigError)?;

        // Le pipeline est mono, validé juste au-dessus
        let channels = match config.channels {
            1 => Channels::Mono,
            other => {
                return Err(AudioError::ConfigError(format!(
                    "Nombre de canaux non supporté par Opus: {}",
                    other
                )))
            }
        };

        let mut encoder = Encoder::new(config.sample_rate, channels, Application::Voip)?;
        encoder.set_bitrate(Bitrate::Bits(config.opus_bitrate as i32))?;
        encoder.set_vbr(true)?;

        let decoder = Decoder::new(config.sample_rate, channels)?;

        let max_decoded = config.sample_rate as usize * MAX_DECODE_MS / 1000;

        Ok(Self {
            encoder,
            decoder,
            frame_samples: config.opus_frame_samples(),
            encode_buffer: vec![0u8; MAX_PAYLOAD_BYTES],
            decode_buffer: vec![0.0; max_decoded],
        })
    }

    /// Nombre d'échantillons attendu par frame à encoder
    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Encode une frame d'exactement `frame_samples()` échantillons
    ///
    /// # Erreurs
    /// - `AudioError::OpusError` si la taille est incorrecte ou que
    ///   l'encodage échoue
    pub fn encode(&mut self, samples: &[Sample]) -> AudioResult<Vec<u8>> {
        if samples.len() != self.frame_samples {
            return Err(AudioError::OpusError(format!(
                "Taille de frame incorrecte: {} échantillons (attendu: {})",
                samples.len(),
                self.frame_samples
            )));
        }

        let written = self.encoder.encode_float(samples, &mut self.encode_buffer)?;
        Ok(self.encode_buffer[..written].to_vec())
    }

    /// Décode un payload Opus en échantillons
    ///
    /// La taille décodée dépend de la durée de frame choisie par
    /// l'encodeur distant, jusqu'à 60 ms.
    pub fn decode(&mut self, payload: &[u8]) -> AudioResult<Vec<Sample>> {
        let decoded = self
            .decoder
            .decode_float(payload, &mut self.decode_buffer, false)?;
        Ok(self.decode_buffer[..decoded].to_vec())
    }

    /// Réinitialise l'état interne de l'encodeur et du décodeur
    pub fn reset(&mut self) -> AudioResult<()> {
        self.encoder.reset_state()?;
        self.decoder.reset_state()?;
        Ok(())
    }
}
