//! Handoff ordenado de eventos entre el productor y el consumidor.
//!
//! Existe un único camino de producción: todas las copias de `EventProducer`
//! comparten el mismo estado detrás de un `Mutex`, de modo que la asignación
//! de `seq` y el envío ocurren juntos y el orden observado por el consumidor
//! es exactamente el orden de emisión.
use std::sync::Arc;

use chrono::Utc;
use run_core::{SetupEvent, SetupEventKind};
use tokio::sync::{mpsc, Mutex};

use crate::errors::PipelineError;

pub const DEFAULT_CAPACITY: usize = 64;

struct ProducerState {
    tx: mpsc::Sender<SetupEvent>,
    next_seq: u64,
}

#[derive(Clone)]
pub struct EventProducer {
    inner: Arc<Mutex<ProducerState>>,
}

/// Crea el par productor/consumidor con un buffer acotado.
pub fn event_channel(capacity: usize) -> (EventProducer, EventStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventProducer { inner: Arc::new(Mutex::new(ProducerState { tx, next_seq: 0 })) }, EventStream { rx })
}

impl EventProducer {
    /// Envuelve `kind` en un `SetupEvent` y lo entrega. Suspende mientras el
    /// buffer esté lleno. Devuelve el `seq` asignado.
    pub async fn emit(&self, kind: SetupEventKind) -> Result<u64, PipelineError> {
        let mut st = self.inner.lock().await;
        let seq = st.next_seq;
        let ev = SetupEvent { seq, kind, ts: Utc::now() };
        st.tx.send(ev).await.map_err(|_| PipelineError::Closed)?;
        st.next_seq += 1;
        Ok(seq)
    }

    /// true si el consumidor ya soltó su extremo.
    pub async fn is_closed(&self) -> bool { self.inner.lock().await.tx.is_closed() }
}

pub struct EventStream {
    rx: mpsc::Receiver<SetupEvent>,
}

impl EventStream {
    /// Stream ya cerrado con una secuencia sintética completa (tests,
    /// reproducción de eventos grabados).
    pub fn buffered(kinds: impl IntoIterator<Item = SetupEventKind>) -> Self {
        let events: Vec<SetupEvent> = kinds.into_iter()
                                           .enumerate()
                                           .map(|(i, kind)| SetupEvent { seq: i as u64, kind, ts: Utc::now() })
                                           .collect();
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for ev in events {
            // capacidad == len, nunca falla
            let _ = tx.try_send(ev);
        }
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<SetupEvent> { self.rx.recv().await }

    /// Consume todo lo que quede hasta que el productor cierre; devuelve la
    /// cantidad descartada.
    pub async fn drain(&mut self) -> usize {
        let mut n = 0;
        while self.rx.recv().await.is_some() {
            n += 1;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seq_is_strictly_increasing_across_clones() {
        let (p, mut s) = event_channel(4);
        let p2 = p.clone();
        let a = tokio::spawn(async move {
            for _ in 0..10 {
                p.emit(SetupEventKind::BuildFinished { failed: false }).await.unwrap();
            }
        });
        let b = tokio::spawn(async move {
            for _ in 0..10 {
                p2.emit(SetupEventKind::Unknown).await.unwrap();
            }
        });
        let mut seqs = Vec::new();
        while let Some(ev) = s.recv().await {
            seqs.push(ev.seq);
        }
        a.await.unwrap();
        b.await.unwrap();
        assert_eq!(seqs, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn emit_fails_once_stream_dropped() {
        let (p, s) = event_channel(1);
        drop(s);
        assert!(p.is_closed().await);
        assert_eq!(p.emit(SetupEventKind::Unknown).await, Err(PipelineError::Closed));
    }

    #[tokio::test]
    async fn buffered_stream_replays_then_closes() {
        let mut s = EventStream::buffered(vec![SetupEventKind::ArtifactTotal { total: 1 }, SetupEventKind::Unknown]);
        assert_eq!(s.recv().await.map(|e| e.seq), Some(0));
        assert_eq!(s.drain().await, 1);
        assert!(s.recv().await.is_none());
    }
}
