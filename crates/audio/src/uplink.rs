//! Montage amont du pipeline de secours
//!
//! L'`AudioUplink` reçoit les petits blocs de capture, les accumule, et
//! émet des frames PCM16 de taille fixe vers le transport. Trois règles
//! gouvernent le montage :
//!
//! 1. **Porte** : si l'utilisateur ne parle pas ou est coupé, les blocs
//!    sont jetés sans accumulation (le silence ne traverse jamais le fil).
//! 2. **Re-blocage** : une frame part uniquement quand `frame_samples`
//!    échantillons exacts sont disponibles, le reste attend la suivante.
//! 3. **Contre-pression** : si le transport accumule trop de bytes non
//!    envoyés, la frame est jetée et comptée, jamais mise en file.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    pcm, AudioConfig, AudioError, AudioResult, FrameOutlet, Sample, SampleBlock, TrafficMeter,
    UplinkStats,
};

/// Assemble les blocs de capture en frames encodées
pub struct AudioUplink {
    config: AudioConfig,
    outlet: Arc<dyn FrameOutlet>,
    meter: TrafficMeter,
    pending: Vec<Sample>,
    talking: bool,
    muted: bool,
    stats: UplinkStats,
}

impl AudioUplink {
    pub fn new(config: AudioConfig, outlet: Arc<dyn FrameOutlet>, meter: TrafficMeter) -> Self {
        Self {
            config,
            outlet,
            meter,
            pending: Vec::new(),
            talking: false,
            muted: false,
            stats: UplinkStats::default(),
        }
    }

    /// Active ou désactive la prise de parole
    pub fn set_talking(&mut self, talking: bool) {
        self.talking = talking;
    }

    /// Coupe ou rétablit le micro
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// La porte est ouverte si on parle et que le micro n'est pas coupé
    pub fn gate_open(&self) -> bool {
        self.talking && !self.muted
    }

    /// Échantillons en attente dans l'accumulateur
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Statistiques cumulées du montage
    pub fn stats(&self) -> UplinkStats {
        self.stats
    }

    /// Vide l'accumulateur (arrêt de session)
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Traite un bloc de capture
    ///
    /// Porte fermée : le bloc est jeté. Porte ouverte : accumulation,
    /// puis émission de toutes les frames complètes disponibles.
    pub async fn push_block(&mut self, block: SampleBlock) -> AudioResult<()> {
        self.stats.blocks_in += 1;

        if !self.gate_open() {
            return Ok(());
        }

        self.pending.extend_from_slice(&block.samples);

        while self.pending.len() >= self.config.frame_samples {
            let frame: Vec<Sample> = self.pending.drain(..self.config.frame_samples).collect();

            // L'accumulateur a déjà avancé : une frame jetée l'est pour de bon
            if self.outlet.buffered_bytes() > self.config.backpressure_limit {
                self.stats.frames_dropped += 1;
                continue;
            }

            let payload = pcm::encode_frame(frame, self.config.fade_samples);
            let bytes = payload.len() as u64;
            self.outlet.send_frame(payload).await?;
            self.meter.add_sent(bytes);
            self.stats.frames_sent += 1;
        }

        Ok(())
    }
}

/// Débouché en mémoire fondé sur un canal tokio
///
/// Le compteur de bytes en transit est partagé avec le récepteur : il
/// monte à l'envoi et descend à la réception, ce qui donne au montage
/// amont une mesure honnête de la contre-pression.
pub struct ChannelOutlet {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    in_flight: Arc<AtomicUsize>,
}

/// Côté réception de `ChannelOutlet::pair()`
pub struct FrameReceiver {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    in_flight: Arc<AtomicUsize>,
}

impl ChannelOutlet {
    /// Crée un débouché et son récepteur appariés
    pub fn pair() -> (Self, FrameReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let in_flight = Arc::new(AtomicUsize::new(0));
        (
            Self {
                tx,
                in_flight: Arc::clone(&in_flight),
            },
            FrameReceiver { rx, in_flight },
        )
    }
}

#[async_trait]
impl FrameOutlet for ChannelOutlet {
    async fn send_frame(&self, payload: Vec<u8>) -> AudioResult<()> {
        self.in_flight.fetch_add(payload.len(), Ordering::Relaxed);
        self.tx
            .send(payload)
            .map_err(|_| AudioError::ChannelClosed)?;
        Ok(())
    }

    fn buffered_bytes(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }
}

impl FrameReceiver {
    /// Attend la prochaine frame, `None` quand l'émetteur est fermé
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        let payload = self.rx.recv().await?;
        self.in_flight.fetch_sub(payload.len(), Ordering::Relaxed);
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Débouché de test : frames collectées, contre-pression réglable
    struct StubOutlet {
        frames: Mutex<Vec<Vec<u8>>>,
        buffered: AtomicUsize,
    }

    impl StubOutlet {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                buffered: AtomicUsize::new(0),
            })
        }

        fn set_buffered(&self, bytes: usize) {
            self.buffered.store(bytes, Ordering::Relaxed);
        }

        fn frame_count(&self) -> usize {
            self.frames.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl FrameOutlet for StubOutlet {
        async fn send_frame(&self, payload: Vec<u8>) -> AudioResult<()> {
            self.frames.lock().unwrap().push(payload);
            Ok(())
        }

        fn buffered_bytes(&self) -> usize {
            self.buffered.load(Ordering::Relaxed)
        }
    }

    fn uplink_with_stub() -> (AudioUplink, Arc<StubOutlet>, TrafficMeter) {
        let outlet = StubOutlet::new();
        let meter = TrafficMeter::new();
        let uplink = AudioUplink::new(
            AudioConfig::test_config(),
            Arc::clone(&outlet) as Arc<dyn FrameOutlet>,
            meter.clone(),
        );
        (uplink, outlet, meter)
    }

    #[tokio::test]
    async fn test_gate_closed_discards_blocks() {
        let (mut uplink, outlet, _) = uplink_with_stub();

        // talking=false par défaut : rien ne s'accumule
        uplink.push_block(SampleBlock::silence(16)).await.unwrap();
        assert_eq!(uplink.pending_len(), 0);
        assert_eq!(outlet.frame_count(), 0);

        uplink.set_talking(true);
        uplink.set_muted(true);
        uplink.push_block(SampleBlock::silence(16)).await.unwrap();
        assert_eq!(uplink.pending_len(), 0);

        let stats = uplink.stats();
        assert_eq!(stats.blocks_in, 2);
        assert_eq!(stats.frames_sent, 0);
    }

    #[tokio::test]
    async fn test_exact_frame_size_with_leftover() {
        let (mut uplink, outlet, meter) = uplink_with_stub();
        uplink.set_talking(true);

        // test_config : frame_samples = 16. Trois blocs de 6 = 18 échantillons.
        for _ in 0..3 {
            uplink.push_block(SampleBlock::silence(6)).await.unwrap();
        }

        assert_eq!(outlet.frame_count(), 1);
        assert_eq!(outlet.frames.lock().unwrap()[0].len(), 32); // 16 × 2 bytes
        assert_eq!(uplink.pending_len(), 2);
        assert_eq!(meter.totals().0, 32);
    }

    #[tokio::test]
    async fn test_backpressure_drops_but_advances() {
        let (mut uplink, outlet, _) = uplink_with_stub();
        uplink.set_talking(true);

        // test_config : backpressure_limit = 64
        outlet.set_buffered(100);
        uplink.push_block(SampleBlock::silence(16)).await.unwrap();

        let stats = uplink.stats();
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.frames_sent, 0);
        assert_eq!(outlet.frame_count(), 0);
        // L'accumulateur a quand même consommé la frame
        assert_eq!(uplink.pending_len(), 0);

        // La pression retombe : la frame suivante part normalement
        outlet.set_buffered(0);
        uplink.push_block(SampleBlock::silence(16)).await.unwrap();
        assert_eq!(uplink.stats().frames_sent, 1);
    }

    #[tokio::test]
    async fn test_channel_outlet_in_flight_accounting() {
        let (outlet, mut rx) = ChannelOutlet::pair();

        outlet.send_frame(vec![0; 32]).await.unwrap();
        outlet.send_frame(vec![0; 32]).await.unwrap();
        assert_eq!(outlet.buffered_bytes(), 64);

        assert_eq!(rx.recv().await.unwrap().len(), 32);
        assert_eq!(outlet.buffered_bytes(), 32);

        drop(outlet);
        assert_eq!(rx.recv().await.unwrap().len(), 32);
        assert!(rx.recv().await.is_none());
    }
}
