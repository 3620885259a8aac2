//! Supervisor de suscripciones verbose por artifact.
//!
//! Cada suscripción es una subtarea con su propia conexión y su propio
//! `CancellationToken` (hijo del token raíz). Todas reportan al mismo
//! `EventProducer`; entre conexiones distintas no hay orden garantizado.
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, warn};
use run_core::{ArtifactId, SetupEventKind};
use run_pipeline::EventProducer;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connector::{BuildLogConnection, Connector};
use crate::message::{BuildLogMessage, SubscribeRequest};

struct SubTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct LogSupervisor<C: Connector> {
    connector: Arc<C>,
    producer: EventProducer,
    root: CancellationToken,
    subs: DashMap<ArtifactId, SubTask>,
}

impl<C: Connector> LogSupervisor<C> {
    pub fn new(connector: Arc<C>, producer: EventProducer, root: CancellationToken) -> Self {
        Self { connector, producer, root, subs: DashMap::new() }
    }

    pub fn active(&self) -> usize { self.subs.len() }

    /// Abre una conexión dedicada al log del artifact. Idempotente.
    pub fn subscribe(&self, artifact_id: ArtifactId) {
        if self.subs.contains_key(&artifact_id) {
            return;
        }
        let token = self.root.child_token();
        let handle = tokio::spawn(artifact_log_loop(self.connector.clone(),
                                                    self.producer.clone(),
                                                    artifact_id,
                                                    token.clone()));
        self.subs.insert(artifact_id, SubTask { token, handle });
    }

    /// Cancela la suscripción y espera a que su read loop termine, de modo
    /// que ningún mensaje se procese después de volver.
    pub async fn unsubscribe(&self, artifact_id: ArtifactId) {
        if let Some((_, sub)) = self.subs.remove(&artifact_id) {
            sub.token.cancel();
            if let Err(e) = sub.handle.await {
                warn!("artifact log task for {artifact_id} ended abnormally: {e}");
            }
        }
    }

    /// Cancela todo; espera hasta `grace` y aborta lo que siga vivo.
    /// Devuelve cuántas subtareas hubo que abortar.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.root.cancel();
        let ids: Vec<ArtifactId> = self.subs.iter().map(|e| *e.key()).collect();
        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = 0;
        for id in ids {
            let Some((_, mut sub)) = self.subs.remove(&id) else { continue };
            sub.token.cancel();
            if tokio::time::timeout_at(deadline, &mut sub.handle).await.is_err() {
                sub.handle.abort();
                aborted += 1;
            }
        }
        if aborted > 0 {
            warn!("forced teardown of {aborted} artifact log subscription(s)");
        }
        aborted
    }
}

async fn artifact_log_loop<C: Connector>(connector: Arc<C>,
                                         producer: EventProducer,
                                         artifact_id: ArtifactId,
                                         token: CancellationToken) {
    let mut conn = tokio::select! {
        _ = token.cancelled() => return,
        c = connector.connect() => match c {
            Ok(c) => c,
            Err(e) => {
                warn!("could not open log subscription for {artifact_id}: {e}");
                return;
            }
        },
    };
    debug!("requesting updates for artifact {artifact_id}");
    if let Err(e) = conn.send_request(&SubscribeRequest::Artifact { artifact_id }).await {
        warn!("could not start artifact log request for {artifact_id}: {e}");
        if let Err(e) = conn.close().await {
            debug!("closing artifact log connection for {artifact_id}: {e}");
        }
        return;
    }
    loop {
        let msg = tokio::select! {
            _ = token.cancelled() => break,
            m = conn.read_message() => m,
        };
        match msg {
            Ok(BuildLogMessage::ArtifactProgress { artifact_id: id, timestamp, source, pipe_name, body })
                if id == artifact_id =>
            {
                let kind = SetupEventKind::ArtifactBuildLog { artifact_id,
                                                              timestamp,
                                                              source,
                                                              pipe_name,
                                                              facility: body.facility,
                                                              message: body.msg };
                if producer.emit(kind).await.is_err() {
                    break;
                }
            }
            Ok(other) => debug!("ignoring {} on log subscription for {artifact_id}", other.type_name()),
            Err(e) => {
                debug!("log subscription for {artifact_id} ended: {e}");
                break;
            }
        }
    }
    if let Err(e) = conn.close().await {
        debug!("closing artifact log connection for {artifact_id}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryConnector, ScriptItem};
    use crate::message::ProgressBody;
    use run_pipeline::event_channel;

    fn line(id: ArtifactId, msg: &str) -> ScriptItem {
        BuildLogMessage::ArtifactProgress { artifact_id: id,
                                            timestamp: "t".into(),
                                            source: "s".into(),
                                            pipe_name: "stderr".into(),
                                            body: ProgressBody { facility: "f".into(), msg: msg.into() } }.into()
    }

    #[tokio::test]
    async fn subscribe_is_idempotent_and_shutdown_closes_everything() {
        let a = ArtifactId::new_v4();
        let other = ArtifactId::new_v4();
        let connector = InMemoryConnector::new(Vec::<ScriptItem>::new()).with_artifact_script(a, vec![line(other, "ajeno"), line(a, "propio")]);
        let (producer, mut stream) = event_channel(16);
        let sup = LogSupervisor::new(Arc::new(connector.clone()), producer, CancellationToken::new());

        sup.subscribe(a);
        sup.subscribe(a);
        assert_eq!(sup.active(), 1);

        let ev = tokio::time::timeout(Duration::from_secs(2), stream.recv()).await.unwrap().unwrap();
        match ev.kind {
            SetupEventKind::ArtifactBuildLog { artifact_id, message, .. } => {
                assert_eq!(artifact_id, a);
                assert_eq!(message, "propio");
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(sup.shutdown(Duration::from_secs(1)).await, 0);
        assert_eq!(sup.active(), 0);
        assert_eq!(connector.connects(), 1);
        assert_eq!(connector.closes(), 1);
    }
}
