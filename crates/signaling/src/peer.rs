//! Session media pair et ses implémentations
//!
//! Le trait `PeerSession` abstrait la session media native pour que le
//! moteur de négociation n'en dépende jamais directement :
//! - `NativePeerSession` : session réelle avec la librairie webrtc
//! - `SimulatedPeerSession` : session déterministe qui mémorise chaque
//!   opération appliquée, dans l'ordre, pour les tests
//!
//! Les événements spontanés de la session (candidats locaux, changements
//! d'état) remontent au moteur par un canal de `PeerEvent`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample as MediaSample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use audio::{
    AudioConfig, BlockSource, CpalBlockSource, CpalPlaybackSink, OpusCodec, PlaybackScheduler,
    RealClock, SampleBlock,
};

use crate::{
    EngineConfig, IceCandidate, SessionDescription, SdpKind, SignalError, SignalResult,
};

/// Événement spontané émis par une session
#[derive(Clone, Debug, PartialEq)]
pub enum PeerEvent {
    /// Candidat ICE local découvert (candidat vide = fin des candidats)
    LocalCandidate(IceCandidate),

    /// Changement d'état de la connexion ICE ("checking", "connected"…)
    IceState(String),

    /// Changement d'état de la connexion pair ("connecting", "failed"…)
    ConnectionState(String),
}

/// Trait pour une session media avec le pair distant
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Crée une offre et l'installe comme description locale
    async fn create_offer(&self) -> SignalResult<SessionDescription>;

    /// Crée une réponse et l'installe comme description locale
    ///
    /// Suppose qu'une offre distante a déjà été appliquée.
    async fn create_answer(&self) -> SignalResult<SessionDescription>;

    /// Applique la description du pair distant
    async fn set_remote_description(&self, desc: SessionDescription) -> SignalResult<()>;

    /// Vrai si une description distante est installée
    async fn has_remote_description(&self) -> bool;

    /// Applique un candidat ICE distant
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> SignalResult<()>;

    /// Active ou coupe l'envoi du micro
    fn set_mic_enabled(&self, enabled: bool);

    /// Active ou coupe la lecture du flux distant
    fn set_incoming_enabled(&self, enabled: bool);

    /// Bytes transportés par la session media (envoyés, reçus)
    fn transport_bytes(&self) -> (u64, u64);

    /// Ferme la session et libère les ressources
    async fn close(&self) -> SignalResult<()>;
}

/// Trait fabrique : crée une session prête à négocier
///
/// L'acquisition des ressources locales (microphone) se fait ici : si
/// elle échoue, aucune session n'existe et le moteur peut se replier
/// proprement.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create_session(
        &self,
        config: &EngineConfig,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> SignalResult<Arc<dyn PeerSession>>;
}

// ============================================================
// Implémentation native (librairie webrtc)
// ============================================================

/// Session media réelle fondée sur la librairie webrtc
///
/// La piste locale transporte des frames Opus encodées depuis le micro ;
/// le flux distant est décodé et rendu sur la sortie audio via le
/// planificateur de lecture. `set_mic_enabled` coupe l'encodage montant,
/// `set_incoming_enabled` coupe le rendu (les paquets restent comptés).
pub struct NativePeerSession {
    pc: Arc<RTCPeerConnection>,
    mic_enabled: Arc<AtomicBool>,
    incoming_enabled: Arc<AtomicBool>,
    bytes_sent: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl NativePeerSession {
    async fn connect(
        config: &EngineConfig,
        audio_config: AudioConfig,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> SignalResult<Arc<Self>> {
        // Acquisition des ressources media d'abord : si l'une échoue,
        // rien n'est créé et le moteur se replie proprement
        let mut encoder = OpusCodec::new(&audio_config)
            .map_err(|e| SignalError::PeerError(format!("codec Opus: {}", e)))?;

        let playback_sink = CpalPlaybackSink::new(&audio_config)
            .map_err(|e| SignalError::MediaDenied(format!("sortie audio: {}", e)))?;

        let mut mic = CpalBlockSource::new(audio_config.clone());
        mic.start()
            .await
            .map_err(|e| SignalError::MediaDenied(e.to_string()))?;

        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let registry = Registry::new();
        let registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await?);

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48_000,
                channels: 1,
                ..Default::default()
            },
            "audio".to_owned(),
            "salon-mic".to_owned(),
        ));
        pc.add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        let mic_enabled = Arc::new(AtomicBool::new(true));
        let incoming_enabled = Arc::new(AtomicBool::new(true));
        let bytes_sent = Arc::new(AtomicU64::new(0));
        let bytes_received = Arc::new(AtomicU64::new(0));

        // Candidats locaux : chaque découverte part vers le moteur,
        // None signale la fin (candidat vide sur le fil)
        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let candidate_events = candidate_events.clone();
            Box::pin(async move {
                let event = match candidate {
                    Some(c) => match c.to_json() {
                        Ok(init) => PeerEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        }),
                        Err(_) => return,
                    },
                    None => PeerEvent::LocalCandidate(IceCandidate {
                        candidate: String::new(),
                        sdp_mid: None,
                        sdp_mline_index: None,
                    }),
                };
                let _ = candidate_events.send(event);
            })
        }));

        let ice_events = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |state| {
            let _ = ice_events.send(PeerEvent::IceState(state.to_string()));
            Box::pin(async {})
        }));

        let pc_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let _ = pc_events.send(PeerEvent::ConnectionState(state.to_string()));
            Box::pin(async {})
        }));

        // Rendu du flux distant : les blocs décodés passent par le
        // planificateur, qui les colle bout à bout sur la sortie
        let (decoded_tx, mut decoded_rx) = mpsc::unbounded_channel::<SampleBlock>();
        let playback_config = audio_config.clone();
        let playback_task = tokio::spawn(async move {
            let mut scheduler = PlaybackScheduler::new(
                playback_config,
                Arc::new(RealClock::new()),
                Box::new(playback_sink),
            );
            while let Some(block) = decoded_rx.recv().await {
                scheduler.push_block(block);
                if scheduler.pump().is_err() {
                    break;
                }
            }
        });

        // Flux distant : chaque piste a son propre décodeur. Les paquets
        // sont toujours comptés ; le rendu est coupé si la lecture
        // distante est désactivée.
        let incoming_flag = Arc::clone(&incoming_enabled);
        let received_counter = Arc::clone(&bytes_received);
        let track_config = audio_config.clone();
        pc.on_track(Box::new(move |track, _, _| {
            let incoming_flag = Arc::clone(&incoming_flag);
            let received_counter = Arc::clone(&received_counter);
            let decoded_tx = decoded_tx.clone();
            let track_config = track_config.clone();
            Box::pin(async move {
                let mut decoder = match OpusCodec::new(&track_config) {
                    Ok(decoder) => decoder,
                    Err(e) => {
                        eprintln!("❌ Décodeur Opus indisponible : {}", e);
                        return;
                    }
                };
                while let Ok((packet, _)) = track.read_rtp().await {
                    if packet.payload.is_empty() {
                        continue;
                    }
                    received_counter.fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
                    if !incoming_flag.load(Ordering::Relaxed) {
                        continue;
                    }
                    // Un paquet corrompu est jeté, le flux continue
                    if let Ok(samples) = decoder.decode(&packet.payload) {
                        let _ = decoded_tx.send(SampleBlock::new(samples));
                    }
                }
            })
        }));

        // Montée : les blocs de capture sont accumulés en frames Opus
        // de 20 ms puis écrits sur la piste locale. Micro coupé : on
        // jette les blocs et on repart d'un accumulateur vide.
        let mic_flag = Arc::clone(&mic_enabled);
        let sent_counter = Arc::clone(&bytes_sent);
        let frame_samples = encoder.frame_samples();
        let frame_duration = audio_config.opus_frame_duration();
        let mic_task = tokio::spawn(async move {
            let mut pending: Vec<f32> = Vec::with_capacity(frame_samples * 2);
            while let Ok(Some(block)) = mic.next_block().await {
                if !mic_flag.load(Ordering::Relaxed) {
                    pending.clear();
                    continue;
                }
                pending.extend_from_slice(&block.samples);
                while pending.len() >= frame_samples {
                    let frame: Vec<f32> = pending.drain(..frame_samples).collect();
                    let payload = match encoder.encode(&frame) {
                        Ok(payload) => payload,
                        Err(e) => {
                            eprintln!("❌ Erreur d'encodage Opus : {}", e);
                            continue;
                        }
                    };
                    let payload_len = payload.len() as u64;
                    let sample = MediaSample {
                        data: payload.into(),
                        duration: frame_duration,
                        ..Default::default()
                    };
                    if track.write_sample(&sample).await.is_ok() {
                        sent_counter.fetch_add(payload_len, Ordering::Relaxed);
                    }
                }
            }
            let _ = mic.stop().await;
        });

        Ok(Arc::new(Self {
            pc,
            mic_enabled,
            incoming_enabled,
            bytes_sent,
            bytes_received,
            tasks: Mutex::new(vec![mic_task, playback_task]),
        }))
    }
}

#[async_trait]
impl PeerSession for NativePeerSession {
    async fn create_offer(&self) -> SignalResult<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        let sdp = offer.sdp.clone();
        self.pc.set_local_description(offer).await?;
        Ok(SessionDescription::offer(sdp))
    }

    async fn create_answer(&self) -> SignalResult<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        let sdp = answer.sdp.clone();
        self.pc.set_local_description(answer).await?;
        Ok(SessionDescription::answer(sdp))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> SignalResult<()> {
        let remote = match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp)?,
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp)?,
        };
        self.pc.set_remote_description(remote).await?;
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> SignalResult<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await?;
        Ok(())
    }

    fn set_mic_enabled(&self, enabled: bool) {
        self.mic_enabled.store(enabled, Ordering::Relaxed);
    }

    fn set_incoming_enabled(&self, enabled: bool) {
        self.incoming_enabled.store(enabled, Ordering::Relaxed);
    }

    fn transport_bytes(&self) -> (u64, u64) {
        (
            self.bytes_sent.load(Ordering::Relaxed),
            self.bytes_received.load(Ordering::Relaxed),
        )
    }

    async fn close(&self) -> SignalResult<()> {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        self.pc.close().await?;
        Ok(())
    }
}

/// Fabrique de sessions natives
pub struct NativePeerConnector {
    audio_config: AudioConfig,
}

impl NativePeerConnector {
    pub fn new(audio_config: AudioConfig) -> Self {
        Self { audio_config }
    }
}

#[async_trait]
impl PeerConnector for NativePeerConnector {
    async fn create_session(
        &self,
        config: &EngineConfig,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> SignalResult<Arc<dyn PeerSession>> {
        let session = NativePeerSession::connect(config, self.audio_config.clone(), events).await?;
        Ok(session as Arc<dyn PeerSession>)
    }
}

// ============================================================
// Implémentation simulée (tests)
// ============================================================

/// Opération appliquée à une session simulée, dans l'ordre
#[derive(Clone, Debug, PartialEq)]
pub enum AppliedOp {
    RemoteDescription(SessionDescription),
    Candidate(IceCandidate),
}

/// Session déterministe pour les tests
///
/// Mémorise chaque description et chaque candidat appliqués, dans
/// l'ordre exact, et permet de scripter des échecs d'application.
pub struct SimulatedPeerSession {
    id: u64,
    applied: Mutex<Vec<AppliedOp>>,
    remote_set: AtomicBool,
    mic_enabled: AtomicBool,
    incoming_enabled: AtomicBool,
    closed: AtomicBool,
    failing_candidates: Mutex<HashSet<String>>,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl SimulatedPeerSession {
    pub fn new(events: mpsc::UnboundedSender<PeerEvent>) -> Arc<Self> {
        Arc::new(Self {
            id: fastrand::u64(..),
            applied: Mutex::new(Vec::new()),
            remote_set: AtomicBool::new(false),
            mic_enabled: AtomicBool::new(true),
            incoming_enabled: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            failing_candidates: Mutex::new(HashSet::new()),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            events,
        })
    }

    /// Journal des opérations appliquées, dans l'ordre
    pub fn applied(&self) -> Vec<AppliedOp> {
        self.applied.lock().unwrap().clone()
    }

    /// Candidats appliqués, dans l'ordre
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.applied()
            .into_iter()
            .filter_map(|op| match op {
                AppliedOp::Candidate(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    /// Scripte l'échec d'application d'un candidat donné
    pub fn fail_candidate(&self, candidate: &str) {
        self.failing_candidates
            .lock()
            .unwrap()
            .insert(candidate.to_string());
    }

    /// Émet un changement d'état ICE vers le moteur
    pub fn emit_ice_state(&self, state: &str) {
        let _ = self.events.send(PeerEvent::IceState(state.to_string()));
    }

    /// Émet un candidat local vers le moteur
    pub fn emit_local_candidate(&self, candidate: IceCandidate) {
        let _ = self.events.send(PeerEvent::LocalCandidate(candidate));
    }

    /// Ajoute du trafic simulé aux compteurs
    pub fn add_transport_bytes(&self, sent: u64, received: u64) {
        self.bytes_sent.fetch_add(sent, Ordering::Relaxed);
        self.bytes_received.fetch_add(received, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn mic_enabled(&self) -> bool {
        self.mic_enabled.load(Ordering::Relaxed)
    }

    pub fn incoming_enabled(&self) -> bool {
        self.incoming_enabled.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PeerSession for SimulatedPeerSession {
    async fn create_offer(&self) -> SignalResult<SessionDescription> {
        Ok(SessionDescription::offer(format!("v=0 sim-offer-{}", self.id)))
    }

    async fn create_answer(&self) -> SignalResult<SessionDescription> {
        if !self.remote_set.load(Ordering::Relaxed) {
            return Err(SignalError::InvalidState(
                "réponse sans offre distante".to_string(),
            ));
        }
        Ok(SessionDescription::answer(format!("v=0 sim-answer-{}", self.id)))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> SignalResult<()> {
        self.applied
            .lock()
            .unwrap()
            .push(AppliedOp::RemoteDescription(desc));
        self.remote_set.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.remote_set.load(Ordering::Relaxed)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> SignalResult<()> {
        if !self.remote_set.load(Ordering::Relaxed) {
            return Err(SignalError::InvalidState(
                "candidat sans description distante".to_string(),
            ));
        }
        if self
            .failing_candidates
            .lock()
            .unwrap()
            .contains(&candidate.candidate)
        {
            return Err(SignalError::PeerError(format!(
                "candidat refusé: {}",
                candidate.candidate
            )));
        }
        self.applied
            .lock()
            .unwrap()
            .push(AppliedOp::Candidate(candidate));
        Ok(())
    }

    fn set_mic_enabled(&self, enabled: bool) {
        self.mic_enabled.store(enabled, Ordering::Relaxed);
    }

    fn set_incoming_enabled(&self, enabled: bool) {
        self.incoming_enabled.store(enabled, Ordering::Relaxed);
    }

    fn transport_bytes(&self) -> (u64, u64) {
        (
            self.bytes_sent.load(Ordering::Relaxed),
            self.bytes_received.load(Ordering::Relaxed),
        )
    }

    async fn close(&self) -> SignalResult<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Fabrique de sessions simulées
///
/// Garde une référence sur chaque session créée pour que les tests
/// puissent inspecter leur journal. Peut scripter un refus de micro.
#[derive(Default)]
pub struct SimulatedPeerConnector {
    deny_media: AtomicBool,
    sessions: Mutex<Vec<Arc<SimulatedPeerSession>>>,
}

impl SimulatedPeerConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Scripte un refus d'accès au microphone
    pub fn deny_media(&self) {
        self.deny_media.store(true, Ordering::Relaxed);
    }

    /// Sessions créées, dans l'ordre
    pub fn sessions(&self) -> Vec<Arc<SimulatedPeerSession>> {
        self.sessions.lock().unwrap().clone()
    }

    /// Dernière session créée
    pub fn last_session(&self) -> Option<Arc<SimulatedPeerSession>> {
        self.sessions.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PeerConnector for SimulatedPeerConnector {
    async fn create_session(
        &self,
        _config: &EngineConfig,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> SignalResult<Arc<dyn PeerSession>> {
        if self.deny_media.load(Ordering::Relaxed) {
            return Err(SignalError::MediaDenied(
                "accès refusé par l'utilisateur".to_string(),
            ));
        }
        let session = SimulatedPeerSession::new(events);
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        Ok(session as Arc<dyn PeerSession>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (Arc<SimulatedPeerSession>, mpsc::UnboundedReceiver<PeerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SimulatedPeerSession::new(tx), rx)
    }

    #[tokio::test]
    async fn test_applied_order_preserved() {
        let (s, _rx) = session();

        s.set_remote_description(SessionDescription::answer("v=0"))
            .await
            .unwrap();
        for i in 0..3 {
            s.add_ice_candidate(IceCandidate {
                candidate: format!("candidate-{}", i),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            })
            .await
            .unwrap();
        }

        let candidates = s.applied_candidates();
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[1].candidate, "candidate-1");
    }

    #[tokio::test]
    async fn test_candidate_requires_remote_description() {
        let (s, _rx) = session();
        let result = s
            .add_ice_candidate(IceCandidate {
                candidate: "candidate-0".to_string(),
                sdp_mid: None,
                sdp_mline_index: None,
            })
            .await;
        assert!(matches!(result, Err(SignalError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_scripted_candidate_failure() {
        let (s, _rx) = session();
        s.set_remote_description(SessionDescription::answer("v=0"))
            .await
            .unwrap();
        s.fail_candidate("mauvais");

        let result = s
            .add_ice_candidate(IceCandidate {
                candidate: "mauvais".to_string(),
                sdp_mid: None,
                sdp_mline_index: None,
            })
            .await;
        assert!(matches!(result, Err(SignalError::PeerError(_))));
        assert!(s.applied_candidates().is_empty());
    }

    #[tokio::test]
    async fn test_connector_media_denied() {
        let connector = SimulatedPeerConnector::new();
        connector.deny_media();

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = connector.create_session(&EngineConfig::default(), tx).await;
        assert!(matches!(result, Err(SignalError::MediaDenied(_))));
        assert!(connector.sessions().is_empty());
    }
}
