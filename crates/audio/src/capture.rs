//! Capture audio par blocs via cpal
//!
//! cpal fonctionne avec des callbacks temps réel. Le callback re-bloque
//! les données du périphérique en blocs de taille fixe (`capture_block`
//! échantillons, premier canal seulement) et les pousse dans un canal
//! async vers le montage amont.
//!
//! Le `Stream` cpal n'est pas transférable entre threads : il vit sur un
//! thread de travail dédié qui le garde en vie jusqu'au signal d'arrêt.

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample as _;
use cpal::{FromSample, SampleFormat, SizedSample};
use tokio::sync::mpsc;

use crate::{AudioConfig, AudioError, AudioResult, BlockSource, Sample, SampleBlock};

/// Capture réelle depuis le microphone par défaut
pub struct CpalBlockSource {
    config: AudioConfig,
    block_rx: Option<mpsc::UnboundedReceiver<SampleBlock>>,
    stop_tx: Option<std_mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    device_name: String,
}

impl CpalBlockSource {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            block_rx: None,
            stop_tx: None,
            worker: None,
            device_name: "Périphérique inconnu".to_string(),
        }
    }

    /// Construit le flux d'entrée pour un format d'échantillon donné
    ///
    /// Tout format supporté par cpal est converti en f32 à la volée.
    fn build_stream_for<T>(
        device: &cpal::Device,
        stream_config: &cpal::StreamConfig,
        block_size: usize,
        channels: usize,
        tx: mpsc::UnboundedSender<SampleBlock>,
    ) -> AudioResult<cpal::Stream>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        // Accumulateur local au callback : jamais d'allocation par bloc complet
        let mut pending: Vec<Sample> = Vec::with_capacity(block_size);

        let stream = device.build_input_stream(
            stream_config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Premier canal seulement, comme le client d'origine
                for frame in data.chunks(channels) {
                    pending.push(f32::from_sample(frame[0]));
                    if pending.len() >= block_size {
                        let block = SampleBlock::new(pending.drain(..).collect());
                        // Canal fermé = montage arrêté, on jette sans bruit
                        let _ = tx.send(block);
                    }
                }
            },
            move |err| {
                eprintln!("❌ Erreur stream audio : {}", err);
            },
            None,
        )?;
        Ok(stream)
    }

    /// Corps du thread de travail : ouvre le périphérique et garde le
    /// flux en vie jusqu'au signal d'arrêt
    fn worker_main(
        config: AudioConfig,
        setup_tx: std_mpsc::Sender<Result<String, AudioError>>,
        stop_rx: std_mpsc::Receiver<()>,
        block_tx: mpsc::UnboundedSender<SampleBlock>,
    ) {
        let setup = (|| -> AudioResult<(cpal::Stream, String)> {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or(AudioError::NoDeviceFound)?;

            let device_name = device
                .description()
                .ok()
                .map(|desc| desc.name().to_string())
                .unwrap_or_else(|| "Périphérique inconnu".to_string());

            println!("🎤 Périphérique de capture trouvé : {}", device_name);

            let default_config = device.default_input_config().map_err(|e| {
                AudioError::ConfigError(format!("Impossible d'obtenir config par défaut: {}", e))
            })?;

            println!("📋 Config par défaut du périphérique :");
            println!("   Sample rate: {} Hz", default_config.sample_rate());
            println!("   Channels: {}", default_config.channels());
            println!("   Sample format: {:?}", default_config.sample_format());

            let channels = default_config.channels() as usize;
            let stream_config = default_config.config();

            let stream = match default_config.sample_format() {
                SampleFormat::F32 => Self::build_stream_for::<f32>(
                    &device,
                    &stream_config,
                    config.capture_block,
                    channels,
                    block_tx.clone(),
                )?,
                SampleFormat::I16 => Self::build_stream_for::<i16>(
                    &device,
                    &stream_config,
                    config.capture_block,
                    channels,
                    block_tx.clone(),
                )?,
                SampleFormat::U16 => Self::build_stream_for::<u16>(
                    &device,
                    &stream_config,
                    config.capture_block,
                    channels,
                    block_tx.clone(),
                )?,
                other => {
                    return Err(AudioError::ConfigError(format!(
                        "Format d'échantillon non supporté : {:?}",
                        other
                    )))
                }
            };

            stream.play().map_err(AudioError::CpalError)?;
            Ok((stream, device_name))
        })();

        match setup {
            Ok((stream, device_name)) => {
                let _ = setup_tx.send(Ok(device_name));
                // Le flux joue tant qu'on n'a pas reçu le signal d'arrêt
                let _ = stop_rx.recv();
                drop(stream);
            }
            Err(e) => {
                let _ = setup_tx.send(Err(e));
            }
        }
    }
}

#[async_trait]
impl BlockSource for CpalBlockSource {
    async fn start(&mut self) -> AudioResult<()> {
        if self.worker.is_some() {
            return Ok(()); // Déjà démarré
        }

        println!("🚀 Démarrage de la capture audio...");

        let (block_tx, block_rx) = mpsc::unbounded_channel();
        let (setup_tx, setup_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let config = self.config.clone();

        let worker =
            std::thread::spawn(move || Self::worker_main(config, setup_tx, stop_rx, block_tx));

        // Attend le résultat de l'ouverture du périphérique hors du runtime
        let setup = tokio::task::spawn_blocking(move || setup_rx.recv())
            .await
            .map_err(|e| AudioError::InitializationError(e.to_string()))?
            .map_err(|_| AudioError::InitializationError("thread de capture perdu".to_string()))?;

        match setup {
            Ok(device_name) => {
                self.device_name = device_name;
                self.block_rx = Some(block_rx);
                self.stop_tx = Some(stop_tx);
                self.worker = Some(worker);
                println!("✅ Capture audio démarrée");
                Ok(())
            }
            Err(e) => {
                let _ = worker.join();
                Err(e)
            }
        }
    }

    async fn stop(&mut self) -> AudioResult<()> {
        if self.worker.is_none() {
            return Ok(()); // Déjà arrêté
        }

        println!("🛑 Arrêt de la capture audio...");

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = tokio::task::spawn_blocking(move || worker.join()).await;
        }
        self.block_rx = None;

        println!("✅ Capture audio arrêtée");
        Ok(())
    }

    async fn next_block(&mut self) -> AudioResult<Option<SampleBlock>> {
        let rx = self
            .block_rx
            .as_mut()
            .ok_or_else(|| AudioError::InitializationError("capture non démarrée".to_string()))?;
        Ok(rx.recv().await)
    }

    fn device_info(&self) -> String {
        self.device_name.clone()
    }
}

/// Source scriptée pour les tests
///
/// Rejoue une séquence de blocs pré-écrite, puis s'épuise (`None`).
pub struct ScriptedBlockSource {
    blocks: VecDeque<SampleBlock>,
    started: bool,
}

impl ScriptedBlockSource {
    pub fn new(blocks: Vec<SampleBlock>) -> Self {
        Self {
            blocks: blocks.into(),
            started: false,
        }
    }

    /// Découpe un signal continu en blocs de capture
    pub fn from_signal(samples: Vec<Sample>, block_size: usize) -> Self {
        let blocks = samples
            .chunks(block_size)
            .map(|chunk| SampleBlock::new(chunk.to_vec()))
            .collect();
        Self::new(blocks)
    }

    /// Génère une sinusoïde de test découpée en blocs
    pub fn sine(config: &AudioConfig, frequency: f32, total_samples: usize) -> Self {
        let samples: Vec<Sample> = (0..total_samples)
            .map(|i| {
                let t = i as f32 / config.sample_rate as f32;
                (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.5
            })
            .collect();
        Self::from_signal(samples, config.capture_block)
    }
}

#[async_trait]
impl BlockSource for ScriptedBlockSource {
    async fn start(&mut self) -> AudioResult<()> {
        self.started = true;
        Ok(())
    }

    async fn stop(&mut self) -> AudioResult<()> {
        self.started = false;
        Ok(())
    }

    async fn next_block(&mut self) -> AudioResult<Option<SampleBlock>> {
        if !self.started {
            return Err(AudioError::InitializationError(
                "capture non démarrée".to_string(),
            ));
        }
        Ok(self.blocks.pop_front())
    }

    fn device_info(&self) -> String {
        "Source scriptée".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_source_plays_then_exhausts() {
        let mut source = ScriptedBlockSource::new(vec![
            SampleBlock::silence(4),
            SampleBlock::new(vec![0.5; 4]),
        ]);

        source.start().await.unwrap();
        assert_eq!(source.next_block().await.unwrap().unwrap().len(), 4);
        assert_eq!(source.next_block().await.unwrap().unwrap().samples[0], 0.5);
        assert!(source.next_block().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scripted_source_requires_start() {
        let mut source = ScriptedBlockSource::new(vec![SampleBlock::silence(4)]);
        assert!(source.next_block().await.is_err());
    }

    #[test]
    fn test_from_signal_blocking() {
        let source = ScriptedBlockSource::from_signal(vec![0.0; 10], 4);
        // 10 échantillons en blocs de 4 : 4 + 4 + 2
        assert_eq!(source.blocks.len(), 3);
        assert_eq!(source.blocks[2].len(), 2);
    }

    #[test]
    fn test_sine_amplitude_bounded() {
        let config = AudioConfig::test_config();
        let source = ScriptedBlockSource::sine(&config, 440.0, 64);
        for block in &source.blocks {
            assert!(block.peak_level() <= 0.5 + 1e-6);
        }
    }
}
