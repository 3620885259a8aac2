//! Conexión en memoria guiada por un guion.
//!
//! Cada conexión carga su guion al recibir la solicitud de suscripción: el
//! del build para `recipeID`, o el del artifact para `artifactID`. Al agotar
//! el guion la lectura queda suspendida, como un socket abierto sin tráfico.
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::connector::{BuildLogConnection, Connector};
use crate::error::ConnectionError;
use crate::message::{BuildLogMessage, SubscribeRequest};
use run_core::ArtifactId;

#[derive(Debug, Clone)]
pub enum ScriptItem {
    /// Texto crudo tal como llegaría por el socket.
    Raw(String),
    Message(BuildLogMessage),
    Error(ConnectionError),
    /// Demora la próxima lectura (simula latencia del servicio).
    Pause(Duration),
}

impl From<BuildLogMessage> for ScriptItem {
    fn from(m: BuildLogMessage) -> Self { Self::Message(m) }
}

#[derive(Default)]
struct Shared {
    build: Vec<ScriptItem>,
    artifacts: HashMap<ArtifactId, Vec<ScriptItem>>,
    requests: Vec<SubscribeRequest>,
    connects: usize,
    closes: usize,
}

#[derive(Clone, Default)]
pub struct InMemoryConnector {
    shared: Arc<Mutex<Shared>>,
}

impl InMemoryConnector {
    pub fn new(build: impl IntoIterator<Item = ScriptItem>) -> Self {
        let shared = Shared { build: build.into_iter().collect(), ..Shared::default() };
        Self { shared: Arc::new(Mutex::new(shared)) }
    }

    pub fn with_artifact_script(self, id: ArtifactId, script: impl IntoIterator<Item = ScriptItem>) -> Self {
        if let Ok(mut s) = self.shared.lock() {
            s.artifacts.insert(id, script.into_iter().collect());
        }
        self
    }

    /// Solicitudes enviadas, en orden, por todas las conexiones.
    pub fn requests(&self) -> Vec<SubscribeRequest> { self.shared.lock().map(|s| s.requests.clone()).unwrap_or_default() }
    pub fn connects(&self) -> usize { self.shared.lock().map(|s| s.connects).unwrap_or(0) }
    pub fn closes(&self) -> usize { self.shared.lock().map(|s| s.closes).unwrap_or(0) }
}

#[async_trait]
impl Connector for InMemoryConnector {
    type Conn = InMemoryConnection;

    async fn connect(&self) -> Result<Self::Conn, ConnectionError> {
        if let Ok(mut s) = self.shared.lock() {
            s.connects += 1;
        }
        Ok(InMemoryConnection { shared: self.shared.clone(), script: VecDeque::new(), closed: false })
    }
}

pub struct InMemoryConnection {
    shared: Arc<Mutex<Shared>>,
    script: VecDeque<ScriptItem>,
    closed: bool,
}

#[async_trait]
impl BuildLogConnection for InMemoryConnection {
    async fn read_message(&mut self) -> Result<BuildLogMessage, ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        loop {
            match self.script.pop_front() {
                Some(ScriptItem::Raw(raw)) => return BuildLogMessage::decode(&raw),
                Some(ScriptItem::Message(m)) => return Ok(m),
                Some(ScriptItem::Error(e)) => return Err(e),
                Some(ScriptItem::Pause(d)) => tokio::time::sleep(d).await,
                None => return std::future::pending().await,
            }
        }
    }

    async fn send_request(&mut self, request: &SubscribeRequest) -> Result<(), ConnectionError> {
        let mut s = self.shared.lock().map_err(|_| ConnectionError::Io("poisoned".into()))?;
        s.requests.push(request.clone());
        let script = match request {
            SubscribeRequest::Build { .. } => s.build.clone(),
            SubscribeRequest::Artifact { artifact_id } => s.artifacts.get(artifact_id).cloned().unwrap_or_default(),
        };
        self.script.extend(script);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.closed = true;
        if let Ok(mut s) = self.shared.lock() {
            s.closes += 1;
        }
        Ok(())
    }
}
