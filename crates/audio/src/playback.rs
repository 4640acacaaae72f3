//! Planification de lecture du pipeline de secours
//!
//! Le `PlaybackScheduler` reconstitue un flux continu à partir des frames
//! reçues. Il maintient un curseur de lecture : chaque bloc est planifié
//! exactement à la fin du précédent, sans trou ni chevauchement. Si le
//! curseur est passé derrière l'horloge (réseau en retard), il est resynchronisé
//! un peu en avant du temps courant, jamais en arrière.
//!
//! Le planificateur lui-même est synchrone et déterministe : l'horloge et
//! le puits de sortie sont injectés, ce qui permet de vérifier chaque
//! décision de placement dans les tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use tokio::sync::mpsc;

use crate::{
    pcm, AudioConfig, AudioError, AudioResult, PlaybackClock, PlaybackSink, PlaybackStats,
    Sample, SampleBlock,
};

/// Reconstitue un flux continu à partir des frames reçues
pub struct PlaybackScheduler {
    config: AudioConfig,
    clock: Arc<dyn PlaybackClock>,
    sink: Box<dyn PlaybackSink>,
    queue: VecDeque<SampleBlock>,
    cursor: f64,
    stats: PlaybackStats,
}

impl PlaybackScheduler {
    pub fn new(
        config: AudioConfig,
        clock: Arc<dyn PlaybackClock>,
        sink: Box<dyn PlaybackSink>,
    ) -> Self {
        Self {
            config,
            clock,
            sink,
            queue: VecDeque::new(),
            cursor: 0.0,
            stats: PlaybackStats::default(),
        }
    }

    /// Décode une frame reçue et la met en file
    ///
    /// Un payload vide ou mal formé est ignoré sans erreur : le flux
    /// continue avec la frame suivante.
    pub fn push_frame(&mut self, payload: &[u8]) {
        self.push_block(SampleBlock::new(pcm::decode_frame(payload)));
    }

    /// Met en file un bloc déjà décodé (flux media natif)
    ///
    /// Un bloc vide est ignoré sans erreur.
    pub fn push_block(&mut self, block: SampleBlock) {
        if block.is_empty() {
            return;
        }
        self.queue.push_back(block);
    }

    /// Planifie tous les blocs en attente
    ///
    /// FIFO strict : les blocs partent dans l'ordre d'arrivée. Le curseur
    /// n'avance que vers l'avant ; s'il est en retard sur l'horloge, il
    /// saute à `now + resync_lead` et le saut est compté.
    pub fn pump(&mut self) -> AudioResult<()> {
        while let Some(block) = self.queue.pop_front() {
            let now = self.clock.now();
            if self.cursor < now {
                self.cursor = now + self.config.resync_lead.as_secs_f64();
                self.stats.resyncs += 1;
            }

            let duration = block.samples.len() as f64 / self.config.sample_rate as f64;
            self.sink.schedule(block, self.cursor)?;
            self.cursor += duration;
            self.stats.blocks_scheduled += 1;
        }
        Ok(())
    }

    /// Vide la file et remet le curseur à zéro (changement de salon)
    pub fn reset(&mut self) {
        self.queue.clear();
        self.cursor = 0.0;
    }

    /// Blocs en attente de planification
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Statistiques cumulées de lecture
    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    /// Boucle asynchrone : consomme les frames d'un canal et pompe
    ///
    /// La boucle se gare quand le canal est vide et se réveille à
    /// l'arrivée d'une frame. Retourne les statistiques à la fermeture
    /// de l'émetteur.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) -> AudioResult<PlaybackStats> {
        while let Some(payload) = rx.recv().await {
            self.push_frame(&payload);
            self.pump()?;
        }
        Ok(self.stats)
    }
}

/// Puits de test : enregistre chaque (bloc, date) planifié
///
/// Clonable, les clones partagent le même journal.
#[derive(Clone, Default)]
pub struct RecordingSink {
    entries: Arc<Mutex<Vec<(SampleBlock, f64)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dates de planification enregistrées, dans l'ordre
    pub fn scheduled_times(&self) -> Vec<f64> {
        self.entries.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }

    /// Copie du journal complet
    pub fn entries(&self) -> Vec<(SampleBlock, f64)> {
        self.entries.lock().unwrap().clone()
    }
}

impl PlaybackSink for RecordingSink {
    fn schedule(&mut self, block: SampleBlock, at: f64) -> AudioResult<()> {
        self.entries.lock().unwrap().push((block, at));
        Ok(())
    }
}

/// Puits de sortie réel fondé sur cpal
///
/// Le callback temps réel tire les échantillons d'un tampon partagé et
/// complète avec du silence en cas de manque. La date `at` fournie par le
/// planificateur sert d'ordonnancement logique : le hardware joue le
/// tampon en continu, dans l'ordre de planification.
///
/// Le `Stream` cpal n'est pas transférable entre threads : il vit sur un
/// thread de travail dédié, comme côté capture.
pub struct CpalPlaybackSink {
    sample_buffer: Arc<Mutex<VecDeque<Sample>>>,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    device_name: String,
}

impl CpalPlaybackSink {
    /// Découvre le périphérique de sortie par défaut et démarre le flux
    pub fn new(config: &AudioConfig) -> AudioResult<Self> {
        let sample_buffer: Arc<Mutex<VecDeque<Sample>>> = Arc::new(Mutex::new(
            VecDeque::with_capacity(config.frame_samples * 4),
        ));
        let callback_buffer = Arc::clone(&sample_buffer);

        let (setup_tx, setup_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        std::thread::spawn(move || {
            let setup = (|| -> AudioResult<(Stream, String)> {
                let host = cpal::default_host();
                let device = host
                    .default_output_device()
                    .ok_or(AudioError::NoDeviceFound)?;

                let device_name = device
                    .description()
                    .ok()
                    .map(|desc| desc.name().to_string())
                    .unwrap_or_else(|| "Périphérique inconnu".to_string());

                println!("🔊 Périphérique de lecture trouvé : {}", device_name);

                let default_config = device.default_output_config().map_err(|e| {
                    AudioError::ConfigError(format!(
                        "Impossible d'obtenir config par défaut: {}",
                        e
                    ))
                })?;

                let stream = match default_config.sample_format() {
                    SampleFormat::F32 => device.build_output_stream(
                        &default_config.config(),
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            Self::fill_output(data, &callback_buffer);
                        },
                        move |err| {
                            eprintln!("❌ Erreur stream audio sortie : {}", err);
                        },
                        None,
                    )?,
                    SampleFormat::I16 => device.build_output_stream(
                        &default_config.config(),
                        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                            let mut floats = vec![0.0f32; data.len()];
                            Self::fill_output(&mut floats, &callback_buffer);
                            for (out, s) in data.iter_mut().zip(&floats) {
                                *out = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
                            }
                        },
                        move |err| {
                            eprintln!("❌ Erreur stream audio sortie : {}", err);
                        },
                        None,
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
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = setup_tx.send(Err(e));
                }
            }
        });

        let device_name = setup_rx
            .recv()
            .map_err(|_| AudioError::InitializationError("thread de lecture perdu".to_string()))??;

        Ok(Self {
            sample_buffer,
            stop_tx: Some(stop_tx),
            device_name,
        })
    }

    /// Remplit la sortie depuis le tampon partagé (thread temps réel)
    ///
    /// Ne doit jamais bloquer : en cas de contention ou de tampon vide,
    /// on complète avec du silence.
    fn fill_output(output: &mut [f32], buffer: &Arc<Mutex<VecDeque<Sample>>>) {
        if let Ok(mut guard) = buffer.try_lock() {
            for sample in output.iter_mut() {
                *sample = guard.pop_front().unwrap_or(0.0);
            }
        } else {
            output.fill(0.0);
        }
    }

    pub fn device_info(&self) -> String {
        self.device_name.clone()
    }
}

impl Drop for CpalPlaybackSink {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

impl PlaybackSink for CpalPlaybackSink {
    fn schedule(&mut self, block: SampleBlock, _at: f64) -> AudioResult<()> {
        let mut guard = self
            .sample_buffer
            .lock()
            .map_err(|_| AudioError::InitializationError("tampon de sortie empoisonné".to_string()))?;
        guard.extend(block.samples);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use std::time::Duration;

    fn scheduler_with_recorder() -> (PlaybackScheduler, Arc<ManualClock>, RecordingSink) {
        let clock = Arc::new(ManualClock::new());
        let sink = RecordingSink::new();
        let scheduler = PlaybackScheduler::new(
            AudioConfig::test_config(),
            Arc::clone(&clock) as Arc<dyn PlaybackClock>,
            Box::new(sink.clone()),
        );
        (scheduler, clock, sink)
    }

    fn frame_of(samples: usize) -> Vec<u8> {
        pcm::encode_frame(vec![0.5; samples], 0)
    }

    #[test]
    fn test_gapless_scheduling() {
        let (mut scheduler, _clock, sink) = scheduler_with_recorder();

        // test_config : 48 kHz, frames de 16 échantillons
        scheduler.push_frame(&frame_of(16));
        scheduler.push_frame(&frame_of(16));
        scheduler.push_frame(&frame_of(16));
        scheduler.pump().unwrap();

        let times = sink.scheduled_times();
        assert_eq!(times.len(), 3);
        let block_dur = 16.0 / 48_000.0;
        assert_eq!(times[0], 0.0);
        for pair in times.windows(2) {
            assert!((pair[1] - pair[0] - block_dur).abs() < 1e-9);
        }
    }

    #[test]
    fn test_resync_only_forward() {
        let (mut scheduler, clock, sink) = scheduler_with_recorder();

        scheduler.push_frame(&frame_of(16));
        scheduler.pump().unwrap();

        // L'horloge dépasse largement le curseur : la frame suivante doit
        // être resynchronisée à now + resync_lead, jamais dans le passé
        clock.advance(Duration::from_secs(1));
        scheduler.push_frame(&frame_of(16));
        scheduler.pump().unwrap();

        let times = sink.scheduled_times();
        let lead = AudioConfig::test_config().resync_lead.as_secs_f64();
        assert!((times[1] - (1.0 + lead)).abs() < 1e-9);
        assert!(times[1] > times[0]);
        assert_eq!(scheduler.stats().resyncs, 1);
    }

    #[test]
    fn test_no_resync_when_ahead() {
        let (mut scheduler, clock, sink) = scheduler_with_recorder();

        // Deux frames d'avance, l'horloge reste derrière le curseur
        scheduler.push_frame(&frame_of(16));
        scheduler.push_frame(&frame_of(16));
        scheduler.pump().unwrap();

        clock.advance(Duration::from_nanos(100));
        scheduler.push_frame(&frame_of(16));
        scheduler.pump().unwrap();

        // Le troisième bloc colle au deuxième : aucun saut
        let times = sink.scheduled_times();
        let block_dur = 16.0 / 48_000.0;
        assert!((times[2] - times[1] - block_dur).abs() < 1e-9);
    }

    #[test]
    fn test_fifo_order_preserved() {
        let (mut scheduler, _clock, sink) = scheduler_with_recorder();

        let a = pcm::encode_frame(vec![0.1; 16], 0);
        let b = pcm::encode_frame(vec![0.2; 16], 0);
        scheduler.push_frame(&a);
        scheduler.push_frame(&b);
        scheduler.pump().unwrap();

        let entries = sink.entries();
        assert!((entries[0].0.samples[8] - 0.1).abs() < 1e-3);
        assert!((entries[1].0.samples[8] - 0.2).abs() < 1e-3);
    }

    #[test]
    fn test_push_block_schedules_decoded_blocks() {
        let (mut scheduler, _clock, sink) = scheduler_with_recorder();

        // Les blocs décodés hors PCM16 (flux natif) suivent le même
        // curseur que les frames ; un bloc vide est ignoré
        scheduler.push_block(SampleBlock::new(vec![0.3; 16]));
        scheduler.push_block(SampleBlock::new(Vec::new()));
        scheduler.push_block(SampleBlock::new(vec![0.4; 16]));
        scheduler.pump().unwrap();

        let times = sink.scheduled_times();
        assert_eq!(times.len(), 2);
        let block_dur = 16.0 / 48_000.0;
        assert!((times[1] - times[0] - block_dur).abs() < 1e-9);
    }

    #[test]
    fn test_empty_payload_ignored() {
        let (mut scheduler, _clock, sink) = scheduler_with_recorder();

        scheduler.push_frame(&[]);
        scheduler.push_frame(&[0x42]);
        scheduler.pump().unwrap();

        assert!(sink.scheduled_times().is_empty());
        assert_eq!(scheduler.stats().blocks_scheduled, 0);
    }

    #[test]
    fn test_reset_clears_queue_and_cursor() {
        let (mut scheduler, clock, sink) = scheduler_with_recorder();

        scheduler.push_frame(&frame_of(16));
        scheduler.push_frame(&frame_of(16));
        scheduler.reset();
        assert_eq!(scheduler.queued(), 0);

        // Après reset, le curseur repart de zéro : la prochaine frame se
        // resynchronise sur l'horloge courante
        clock.set(5.0);
        scheduler.push_frame(&frame_of(16));
        scheduler.pump().unwrap();

        let times = sink.scheduled_times();
        let lead = AudioConfig::test_config().resync_lead.as_secs_f64();
        assert!((times[0] - (5.0 + lead)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let clock = Arc::new(ManualClock::new());
        let sink = RecordingSink::new();
        let scheduler = PlaybackScheduler::new(
            AudioConfig::test_config(),
            clock as Arc<dyn PlaybackClock>,
            Box::new(sink.clone()),
        );

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(frame_of(16)).unwrap();
        tx.send(frame_of(16)).unwrap();
        drop(tx);

        let stats = scheduler.run(rx).await.unwrap();
        assert_eq!(stats.blocks_scheduled, 2);
        assert_eq!(sink.scheduled_times().len(), 2);
    }
}
