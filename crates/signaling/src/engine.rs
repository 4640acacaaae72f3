//! Moteur de négociation
//!
//! Le moteur possède au plus une session media à la fois et déroule le
//! protocole offre/réponse/candidats sur le canal de contrôle. Règles :
//!
//! - `start()` démonte toujours la session précédente jusqu'au bout
//!   avant d'acquérir quoi que ce soit ; un échec d'acquisition ne
//!   laisse aucune demi-session derrière lui.
//! - Une seule réponse est honorée par tour de négociation : les
//!   doublons sont journalisés et ignorés.
//! - Les candidats distants arrivés avant la description distante sont
//!   mis en file et rejoués dans l'ordre d'arrivée exact ; un candidat
//!   qui échoue à l'application est signalé puis sauté.
//! - Au plus une renégociation en vol ; une offre qui en chevauche une
//!   autre est jetée avec un avertissement.
//! - Les erreurs de séquencement du protocole distant ne sont jamais
//!   fatales : on journalise et on continue.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use audio::{TrafficMeter, TrafficSampler};

use crate::{
    ControlChannel, EngineConfig, EngineState, IceCandidate, PeerConnector, PeerEvent,
    PeerSession, SessionDescription, SignalError, SignalMessage, SignalResult, SimpleStatus,
    StatusSink,
};

/// Session en cours : le pair et l'état de sa négociation
struct Session {
    peer: Arc<dyn PeerSession>,
    pending_candidates: VecDeque<IceCandidate>,
    awaiting_answer: bool,
    renegotiating: bool,
}

/// Moteur de négociation : une instance possédée, aucun état global
pub struct NegotiationEngine {
    config: EngineConfig,
    channel: Arc<dyn ControlChannel>,
    connector: Arc<dyn PeerConnector>,
    sink: Arc<dyn StatusSink>,
    meter: TrafficMeter,
    state: EngineState,
    session: Option<Session>,
    mic_enabled: bool,
    incoming_enabled: bool,
    generation: u64,
    stats_task: Option<JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<(u64, PeerEvent)>,
    events_rx: Option<mpsc::UnboundedReceiver<(u64, PeerEvent)>>,
}

impl NegotiationEngine {
    pub fn new(
        config: EngineConfig,
        channel: Arc<dyn ControlChannel>,
        connector: Arc<dyn PeerConnector>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            channel,
            connector,
            sink,
            meter: TrafficMeter::new(),
            state: EngineState::Idle,
            session: None,
            mic_enabled: true,
            incoming_enabled: true,
            generation: 0,
            stats_task: None,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// État observable du moteur
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Compteur de trafic alimenté par l'échantillonneur de stats
    pub fn meter(&self) -> TrafficMeter {
        self.meter.clone()
    }

    /// Démarre une nouvelle session et envoie l'offre initiale
    ///
    /// La session précédente, s'il y en a une, est démontée jusqu'au
    /// bout d'abord. En cas d'échec d'acquisition (micro refusé), rien
    /// ne reste en place et l'erreur remonte.
    pub async fn start(&mut self) -> SignalResult<()> {
        self.teardown_session().await;
        self.state = EngineState::Starting;
        self.sink.on_log("démarrage d'une nouvelle session");

        let generation = self.generation + 1;

        // Les événements de chaque session sont étiquetés par génération :
        // ceux d'une session démontée sont ignorés par la boucle
        let (session_tx, mut session_rx) = mpsc::unbounded_channel();
        let engine_tx = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = session_rx.recv().await {
                if engine_tx.send((generation, event)).is_err() {
                    break;
                }
            }
        });

        let peer = match self.connector.create_session(&self.config, session_tx).await {
            Ok(peer) => peer,
            Err(e) => {
                self.state = EngineState::Stopped;
                self.sink
                    .on_log(&format!("échec d'acquisition des ressources: {}", e));
                self.sink.on_status(SimpleStatus::Bad);
                return Err(e);
            }
        };

        // Les réglages utilisateur survivent aux sessions
        peer.set_mic_enabled(self.mic_enabled);
        peer.set_incoming_enabled(self.incoming_enabled);

        let offer = match peer.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                let _ = peer.close().await;
                self.state = EngineState::Stopped;
                self.sink.on_log(&format!("échec de création d'offre: {}", e));
                return Err(e);
            }
        };

        if let Err(e) = self
            .channel
            .send(SignalMessage::Offer { sdp: offer.sdp })
            .await
        {
            let _ = peer.close().await;
            self.state = EngineState::Stopped;
            self.sink.on_log(&format!("échec d'envoi de l'offre: {}", e));
            return Err(e);
        }

        self.stats_task = Some(Self::spawn_stats_sampler(
            Arc::clone(&peer),
            self.meter.clone(),
            self.config.stats_interval,
        ));

        self.session = Some(Session {
            peer,
            pending_candidates: VecDeque::new(),
            awaiting_answer: true,
            renegotiating: false,
        });
        self.generation = generation;
        self.state = EngineState::Negotiating;
        self.sink.on_log("offre envoyée, en attente de réponse");
        Ok(())
    }

    /// Arrête la session courante (sans effet si déjà arrêté)
    pub async fn stop(&mut self) {
        if self.session.is_none() && self.state == EngineState::Stopped {
            return;
        }
        self.teardown_session().await;
        self.state = EngineState::Stopped;
        self.sink.on_log("session arrêtée");
    }

    /// Active ou coupe le micro ; le réglage survit aux sessions
    pub fn set_mic_enabled(&mut self, enabled: bool) {
        self.mic_enabled = enabled;
        if let Some(session) = &self.session {
            session.peer.set_mic_enabled(enabled);
        }
        self.sink.on_log(if enabled {
            "micro activé"
        } else {
            "micro coupé"
        });
    }

    /// Active ou coupe la lecture du flux distant ; survit aux sessions
    pub fn set_incoming_enabled(&mut self, enabled: bool) {
        self.incoming_enabled = enabled;
        if let Some(session) = &self.session {
            session.peer.set_incoming_enabled(enabled);
        }
        self.sink.on_log(if enabled {
            "lecture distante activée"
        } else {
            "lecture distante coupée"
        });
    }

    /// Boucle principale : consomme le canal de contrôle et les
    /// événements de session jusqu'à fermeture du canal
    ///
    /// Un seul abonnement par vie du moteur : rappeler `drive()` est une
    /// erreur.
    pub async fn drive(&mut self) -> SignalResult<()> {
        let mut events = self.events_rx.take().ok_or_else(|| {
            SignalError::InvalidState("drive() ne peut être appelé qu'une fois".to_string())
        })?;
        let mut messages = self.channel.subscribe();

        loop {
            tokio::select! {
                msg = messages.recv() => match msg {
                    Ok(message) => self.handle_message(message).await?,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        self.sink.on_log(&format!("{} messages de contrôle perdus", n));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = events.recv() => match event {
                    Some((generation, event)) if generation == self.generation => {
                        self.handle_peer_event(event).await?;
                    }
                    Some(_) => {} // événement d'une session démontée
                    None => break,
                },
            }
        }
        Ok(())
    }

    /// Traite un message entrant du canal de contrôle
    pub async fn handle_message(&mut self, message: SignalMessage) -> SignalResult<()> {
        match message {
            SignalMessage::Answer { sdp } => self.handle_answer(sdp).await,
            SignalMessage::Offer { sdp } => self.handle_remote_offer(sdp).await,
            SignalMessage::Candidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
            } => {
                self.handle_remote_candidate(IceCandidate {
                    candidate,
                    sdp_mid,
                    sdp_mline_index,
                })
                .await
            }
        }
    }

    async fn handle_answer(&mut self, sdp: String) -> SignalResult<()> {
        let Some(session) = self.session.as_mut() else {
            self.sink.on_log("réponse reçue sans session, ignorée");
            return Ok(());
        };
        if !session.awaiting_answer {
            self.sink.on_log("réponse en double, ignorée");
            return Ok(());
        }

        if let Err(e) = session
            .peer
            .set_remote_description(SessionDescription::answer(sdp))
            .await
        {
            self.sink
                .on_log(&format!("échec d'application de la réponse: {}", e));
            return Ok(());
        }
        session.awaiting_answer = false;

        Self::drain_pending_candidates(session, self.sink.as_ref()).await;
        self.state = EngineState::Active;
        self.sink.on_log("réponse appliquée, session établie");
        Ok(())
    }

    async fn handle_remote_offer(&mut self, sdp: String) -> SignalResult<()> {
        let Some(session) = self.session.as_mut() else {
            self.sink.on_log("offre reçue sans session, ignorée");
            return Ok(());
        };
        if session.awaiting_answer {
            self.sink
                .on_log("offre croisée pendant la négociation initiale, ignorée");
            return Ok(());
        }
        if session.renegotiating {
            self.sink
                .on_log("offre reçue pendant une renégociation, ignorée");
            return Ok(());
        }

        session.renegotiating = true;
        self.sink.on_log("renégociation demandée par le pair");

        if let Err(e) = session
            .peer
            .set_remote_description(SessionDescription::offer(sdp))
            .await
        {
            session.renegotiating = false;
            self.sink
                .on_log(&format!("renégociation échouée (offre): {}", e));
            return Ok(());
        }

        Self::drain_pending_candidates(session, self.sink.as_ref()).await;

        let answer = match session.peer.create_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                session.renegotiating = false;
                self.sink
                    .on_log(&format!("renégociation échouée (réponse): {}", e));
                return Ok(());
            }
        };

        if let Err(e) = self
            .channel
            .send(SignalMessage::Answer { sdp: answer.sdp })
            .await
        {
            self.sink
                .on_log(&format!("échec d'envoi de la réponse: {}", e));
        }
        session.renegotiating = false;
        self.sink.on_log("renégociation terminée");
        Ok(())
    }

    async fn handle_remote_candidate(&mut self, candidate: IceCandidate) -> SignalResult<()> {
        let Some(session) = self.session.as_mut() else {
            self.sink.on_log("candidat reçu sans session, ignoré");
            return Ok(());
        };

        if candidate.is_end_of_candidates() {
            self.sink.on_log("fin des candidats distants");
            return Ok(());
        }

        if !session.peer.has_remote_description().await {
            self.sink.on_log("candidat mis en file (pas encore de description distante)");
            session.pending_candidates.push_back(candidate);
            return Ok(());
        }

        match session.peer.add_ice_candidate(candidate).await {
            Ok(()) => self.sink.on_log("candidat distant appliqué"),
            Err(e) => self
                .sink
                .on_log(&format!("candidat distant rejeté: {}", e)),
        }
        Ok(())
    }

    /// Rejoue la file de candidats dans l'ordre d'arrivée
    ///
    /// Un échec individuel est signalé puis sauté : la session continue
    /// avec les candidats suivants.
    async fn drain_pending_candidates(session: &mut Session, sink: &dyn StatusSink) {
        while let Some(candidate) = session.pending_candidates.pop_front() {
            if candidate.is_end_of_candidates() {
                sink.on_log("fin des candidats distants (rejouée)");
                continue;
            }
            match session.peer.add_ice_candidate(candidate).await {
                Ok(()) => sink.on_log("candidat en file appliqué"),
                Err(e) => sink.on_log(&format!("candidat en file rejeté: {}", e)),
            }
        }
    }

    /// Traite un événement spontané de la session courante
    pub async fn handle_peer_event(&mut self, event: PeerEvent) -> SignalResult<()> {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                if candidate.is_end_of_candidates() {
                    self.sink.on_log("fin des candidats locaux");
                } else {
                    self.sink.on_log("candidat local découvert");
                }
                if let Err(e) = self
                    .channel
                    .send(SignalMessage::Candidate {
                        candidate: candidate.candidate,
                        sdp_mid: candidate.sdp_mid,
                        sdp_mline_index: candidate.sdp_mline_index,
                    })
                    .await
                {
                    self.sink
                        .on_log(&format!("échec d'envoi d'un candidat local: {}", e));
                }
            }
            PeerEvent::IceState(state) => {
                self.sink.on_log(&format!("état ICE: {}", state));
                self.sink.on_status(SimpleStatus::from_ice_state(&state));
            }
            PeerEvent::ConnectionState(state) => {
                self.sink.on_log(&format!("état connexion: {}", state));
            }
        }
        Ok(())
    }

    /// Démonte complètement la session courante
    async fn teardown_session(&mut self) {
        if let Some(task) = self.stats_task.take() {
            task.abort();
        }
        if let Some(session) = self.session.take() {
            if let Err(e) = session.peer.close().await {
                self.sink
                    .on_log(&format!("erreur à la fermeture de la session: {}", e));
            }
            self.sink.on_log("session précédente démontée");
        }
    }

    /// Échantillonne périodiquement les bytes transportés par la session
    fn spawn_stats_sampler(
        peer: Arc<dyn PeerSession>,
        meter: TrafficMeter,
        interval: std::time::Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut sampler = TrafficSampler::new();
            loop {
                ticker.tick().await;
                let (sent, received) = sampler.delta(peer.transport_bytes());
                meter.add_sent(sent);
                meter.add_received(received);
            }
        })
    }

    #[cfg(test)]
    fn force_renegotiating(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.renegotiating = true;
        }
    }
}

impl Drop for NegotiationEngine {
    fn drop(&mut self) {
        if let Some(task) = self.stats_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AppliedOp, MemoryChannel, MemorySink, SimulatedPeerConnector, SimulatedPeerSession,
    };

    struct Harness {
        engine: NegotiationEngine,
        connector: Arc<SimulatedPeerConnector>,
        sink: MemorySink,
        remote: MemoryChannel,
    }

    fn harness() -> Harness {
        let (local, remote) = MemoryChannel::pair();
        let connector = SimulatedPeerConnector::new();
        let sink = MemorySink::new();
        let engine = NegotiationEngine::new(
            EngineConfig::default(),
            Arc::new(local),
            Arc::clone(&connector) as Arc<dyn PeerConnector>,
            Arc::new(sink.clone()),
        );
        Harness {
            engine,
            connector,
            sink,
            remote,
        }
    }

    fn candidate(n: usize) -> SignalMessage {
        SignalMessage::Candidate {
            candidate: format!("candidate-{}", n),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }

    async fn started(h: &mut Harness) -> Arc<SimulatedPeerSession> {
        h.engine.start().await.unwrap();
        h.connector.last_session().unwrap()
    }

    #[tokio::test]
    async fn test_start_sends_offer_and_negotiates() {
        let mut h = harness();
        let mut remote_rx = h.remote.subscribe();

        h.engine.start().await.unwrap();
        assert_eq!(h.engine.state(), EngineState::Negotiating);

        match remote_rx.recv().await.unwrap() {
            SignalMessage::Offer { sdp } => assert!(sdp.contains("sim-offer")),
            other => panic!("attendu une offre, reçu {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_twice_tears_down_previous_session() {
        let mut h = harness();

        let first = started(&mut h).await;
        let second = started(&mut h).await;

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(h.connector.sessions().len(), 2);
        assert_eq!(h.engine.state(), EngineState::Negotiating);
    }

    #[tokio::test]
    async fn test_media_denied_unwinds_completely() {
        let mut h = harness();
        h.connector.deny_media();

        let result = h.engine.start().await;
        assert!(matches!(result, Err(SignalError::MediaDenied(_))));
        assert_eq!(h.engine.state(), EngineState::Stopped);
        assert!(h.connector.sessions().is_empty());
        assert!(h.sink.logged("échec d'acquisition"));
    }

    #[tokio::test]
    async fn test_answer_activates_and_duplicate_ignored() {
        let mut h = harness();
        let session = started(&mut h).await;

        h.engine
            .handle_message(SignalMessage::Answer {
                sdp: "v=0 première".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(h.engine.state(), EngineState::Active);

        h.engine
            .handle_message(SignalMessage::Answer {
                sdp: "v=0 doublon".to_string(),
            })
            .await
            .unwrap();

        // Seule la première réponse est appliquée
        let descriptions: Vec<_> = session
            .applied()
            .into_iter()
            .filter(|op| matches!(op, AppliedOp::RemoteDescription(_)))
            .collect();
        assert_eq!(descriptions.len(), 1);
        assert!(h.sink.logged("réponse en double"));
        assert_eq!(h.engine.state(), EngineState::Active);
    }

    #[tokio::test]
    async fn test_candidate_ordering_across_answer_boundary() {
        let mut h = harness();
        let session = started(&mut h).await;

        // Deux candidats avant la réponse : mis en file
        h.engine.handle_message(candidate(0)).await.unwrap();
        h.engine.handle_message(candidate(1)).await.unwrap();
        assert!(session.applied_candidates().is_empty());

        h.engine
            .handle_message(SignalMessage::Answer {
                sdp: "v=0".to_string(),
            })
            .await
            .unwrap();

        // Deux candidats après : appliqués immédiatement
        h.engine.handle_message(candidate(2)).await.unwrap();
        h.engine.handle_message(candidate(3)).await.unwrap();

        let applied = session.applied_candidates();
        let names: Vec<_> = applied.iter().map(|c| c.candidate.as_str()).collect();
        assert_eq!(
            names,
            vec!["candidate-0", "candidate-1", "candidate-2", "candidate-3"]
        );
        assert_eq!(h.engine.state(), EngineState::Active);
    }

    #[tokio::test]
    async fn test_failed_queued_candidate_skipped_not_fatal() {
        let mut h = harness();
        let session = started(&mut h).await;
        session.fail_candidate("candidate-1");

        for n in 0..3 {
            h.engine.handle_message(candidate(n)).await.unwrap();
        }
        h.engine
            .handle_message(SignalMessage::Answer {
                sdp: "v=0".to_string(),
            })
            .await
            .unwrap();

        let names: Vec<_> = session
            .applied_candidates()
            .iter()
            .map(|c| c.candidate.clone())
            .collect();
        assert_eq!(names, vec!["candidate-0", "candidate-2"]);
        assert!(h.sink.logged("candidat en file rejeté"));
        assert_eq!(h.engine.state(), EngineState::Active);
    }

    #[tokio::test]
    async fn test_empty_candidate_is_noop_marker() {
        let mut h = harness();
        let session = started(&mut h).await;

        h.engine
            .handle_message(SignalMessage::Candidate {
                candidate: String::new(),
                sdp_mid: None,
                sdp_mline_index: None,
            })
            .await
            .unwrap();

        assert!(session.applied_candidates().is_empty());
        assert!(h.sink.logged("fin des candidats distants"));
    }

    #[tokio::test]
    async fn test_peer_renegotiation_answers() {
        let mut h = harness();
        let session = started(&mut h).await;
        let mut remote_rx = h.remote.subscribe();

        h.engine
            .handle_message(SignalMessage::Answer {
                sdp: "v=0".to_string(),
            })
            .await
            .unwrap();

        h.engine
            .handle_message(SignalMessage::Offer {
                sdp: "v=0 renégo".to_string(),
            })
            .await
            .unwrap();

        match remote_rx.recv().await.unwrap() {
            SignalMessage::Answer { sdp } => assert!(sdp.contains("sim-answer")),
            other => panic!("attendu une réponse, reçu {:?}", other),
        }

        // L'offre de renégociation a bien été appliquée
        let descriptions: Vec<_> = session
            .applied()
            .into_iter()
            .filter(|op| matches!(op, AppliedOp::RemoteDescription(_)))
            .collect();
        assert_eq!(descriptions.len(), 2);
        assert_eq!(h.engine.state(), EngineState::Active);
    }

    #[tokio::test]
    async fn test_overlapping_renegotiation_dropped() {
        let mut h = harness();
        let session = started(&mut h).await;

        h.engine
            .handle_message(SignalMessage::Answer {
                sdp: "v=0".to_string(),
            })
            .await
            .unwrap();

        h.engine.force_renegotiating();
        h.engine
            .handle_message(SignalMessage::Offer {
                sdp: "v=0 chevauchement".to_string(),
            })
            .await
            .unwrap();

        assert!(h.sink.logged("pendant une renégociation"));
        let descriptions: Vec<_> = session
            .applied()
            .into_iter()
            .filter(|op| matches!(op, AppliedOp::RemoteDescription(_)))
            .collect();
        assert_eq!(descriptions.len(), 1);
    }

    #[tokio::test]
    async fn test_offer_during_initial_negotiation_dropped() {
        let mut h = harness();
        let session = started(&mut h).await;

        h.engine
            .handle_message(SignalMessage::Offer {
                sdp: "v=0 croisée".to_string(),
            })
            .await
            .unwrap();

        assert!(h.sink.logged("offre croisée"));
        assert!(session.applied().is_empty());
        assert_eq!(h.engine.state(), EngineState::Negotiating);
    }

    #[tokio::test]
    async fn test_stop_idempotent() {
        let mut h = harness();
        let session = started(&mut h).await;

        h.engine.stop().await;
        assert_eq!(h.engine.state(), EngineState::Stopped);
        assert!(session.is_closed());

        // Second arrêt : aucun effet, aucun panique
        h.engine.stop().await;
        assert_eq!(h.engine.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn test_messages_without_session_ignored() {
        let mut h = harness();

        h.engine
            .handle_message(SignalMessage::Answer {
                sdp: "v=0".to_string(),
            })
            .await
            .unwrap();
        h.engine.handle_message(candidate(0)).await.unwrap();

        assert_eq!(h.engine.state(), EngineState::Idle);
        assert!(h.sink.logged("sans session"));
    }

    #[tokio::test]
    async fn test_settings_persist_across_sessions() {
        let mut h = harness();

        h.engine.set_mic_enabled(false);
        h.engine.set_incoming_enabled(false);

        let session = started(&mut h).await;
        assert!(!session.mic_enabled());
        assert!(!session.incoming_enabled());

        // Nouvelle session : les réglages sont réappliqués
        let second = started(&mut h).await;
        assert!(!second.mic_enabled());
        assert!(!second.incoming_enabled());
    }

    #[tokio::test]
    async fn test_local_candidates_forwarded_to_channel() {
        let mut h = harness();
        let _session = started(&mut h).await;
        let mut remote_rx = h.remote.subscribe();

        h.engine
            .handle_peer_event(PeerEvent::LocalCandidate(IceCandidate {
                candidate: "candidate-local".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            }))
            .await
            .unwrap();

        match remote_rx.recv().await.unwrap() {
            SignalMessage::Candidate { candidate, .. } => {
                assert_eq!(candidate, "candidate-local")
            }
            other => panic!("attendu un candidat, reçu {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ice_states_classified() {
        let mut h = harness();
        let _session = started(&mut h).await;

        for state in ["checking", "connected", "failed"] {
            h.engine
                .handle_peer_event(PeerEvent::IceState(state.to_string()))
                .await
                .unwrap();
        }

        assert_eq!(
            h.sink.statuses(),
            vec![SimpleStatus::Warn, SimpleStatus::Ok, SimpleStatus::Bad]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_sampler_feeds_meter() {
        let mut h = harness();
        let session = started(&mut h).await;

        session.add_transport_bytes(1000, 400);
        // Laisse l'échantillonneur passer plusieurs ticks
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;

        let (sent, received) = h.engine.meter().totals();
        assert_eq!(sent, 1000);
        assert_eq!(received, 400);
    }

    #[tokio::test]
    async fn test_end_to_end_out_of_order_arrival() {
        let mut h = harness();
        let session = started(&mut h).await;

        // Les candidats arrivent avant la réponse : tout doit finir
        // appliqué dans l'ordre d'arrivée, et la session établie
        h.engine.handle_message(candidate(0)).await.unwrap();
        h.engine.handle_message(candidate(1)).await.unwrap();
        h.engine
            .handle_message(SignalMessage::Answer {
                sdp: "v=0 tardive".to_string(),
            })
            .await
            .unwrap();

        let applied = session.applied();
        assert_eq!(applied.len(), 3);
        assert!(matches!(applied[0], AppliedOp::RemoteDescription(_)));
        match (&applied[1], &applied[2]) {
            (AppliedOp::Candidate(a), AppliedOp::Candidate(b)) => {
                assert_eq!(a.candidate, "candidate-0");
                assert_eq!(b.candidate, "candidate-1");
            }
            other => panic!("ordre inattendu: {:?}", other),
        }
        assert_eq!(h.engine.state(), EngineState::Active);
    }
}
