use std::sync::Arc;

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{nodes::AudioError, AudioSegment};

/// Trait commun à tous les nœuds du pipeline audio.
///
/// Un nœud possède éventuellement un canal d'entrée et une liste d'enfants.
/// Exécuter la racine exécute tout l'arbre : chaque nœud lance ses enfants
/// dans des tâches tokio et leur transmet ses segments.
#[async_trait]
pub trait AudioPipelineNode: Send + 'static {
    /// Émetteur du canal d'entrée, `None` pour une source
    fn get_tx(&self) -> Option<mpsc::Sender<Arc<AudioSegment>>>;

    /// Ajoute un enfant qui recevra les segments produits par ce nœud
    fn register(&mut self, child: Box<dyn AudioPipelineNode>);

    /// Exécute le nœud et ses enfants jusqu'à la fin du flux, une erreur
    /// ou l'annulation de `stop_token`
    async fn run(self: Box<Self>, stop_token: CancellationToken) -> Result<(), AudioError>;
}

/// Partie spécifique d'un nœud : ce qu'il fait de ses segments.
#[async_trait]
pub trait NodeLogic: Send + 'static {
    /// Traite les segments de `input` (absent pour une source) et envoie les
    /// résultats vers `output`.
    ///
    /// Retourner `Ok(())` signifie fin normale ou annulation ; les émetteurs
    /// sont lâchés au retour, ce qui ferme l'entrée des enfants.
    async fn process(
        &mut self,
        input: Option<mpsc::Receiver<Arc<AudioSegment>>>,
        output: Vec<mpsc::Sender<Arc<AudioSegment>>>,
        stop_token: CancellationToken,
    ) -> Result<(), AudioError>;
}

/// Nœud générique : une logique, un canal d'entrée optionnel, des enfants.
pub struct Node<L: NodeLogic> {
    logic: L,
    input_tx: Option<mpsc::Sender<Arc<AudioSegment>>>,
    input_rx: Option<mpsc::Receiver<Arc<AudioSegment>>>,
    children: Vec<Box<dyn AudioPipelineNode>>,
    outputs: Vec<mpsc::Sender<Arc<AudioSegment>>>,
}

impl<L: NodeLogic> Node<L> {
    /// Nœud sans entrée
    pub fn new_source(logic: L) -> Self {
        Self {
            logic,
            input_tx: None,
            input_rx: None,
            children: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Nœud alimenté par un canal borné de `channel_size` segments
    pub fn new_with_input(logic: L, channel_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(channel_size.max(1));
        Self {
            logic,
            input_tx: Some(tx),
            input_rx: Some(rx),
            children: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn logic(&self) -> &L {
        &self.logic
    }

    pub fn get_tx(&self) -> Option<mpsc::Sender<Arc<AudioSegment>>> {
        self.input_tx.clone()
    }

    pub fn register(&mut self, child: Box<dyn AudioPipelineNode>) {
        if let Some(tx) = child.get_tx() {
            self.outputs.push(tx);
        }
        self.children.push(child);
    }

    pub async fn run(self: Box<Self>, stop_token: CancellationToken) -> Result<(), AudioError> {
        let Node {
            mut logic,
            input_tx,
            input_rx,
            children,
            outputs,
        } = *self;
        // Notre propre émetteur garderait l'entrée ouverte pour toujours
        drop(input_tx);

        let child_token = stop_token.child_token();
        let (fail_tx, mut fail_rx) = mpsc::channel::<AudioError>(children.len().max(1));

        let mut handles: Vec<JoinHandle<Result<(), AudioError>>> = Vec::with_capacity(children.len());
        for child in children {
            let token = child_token.clone();
            let fail_tx = fail_tx.clone();
            handles.push(tokio::spawn(async move {
                let result = child.run(token).await;
                if let Err(err) = &result {
                    let _ = fail_tx.send(err.clone()).await;
                }
                result
            }));
        }
        drop(fail_tx);

        let result = {
            let process = logic.process(input_rx, outputs, stop_token.clone());
            tokio::pin!(process);
            tokio::select! {
                res = &mut process => res,
                Some(err) = fail_rx.recv() => {
                    debug!(error = %err, "Child failed, stopping node");
                    Err(err)
                }
            }
        };

        match result {
            Ok(()) => join_children(handles).await,
            Err(err) => {
                child_token.cancel();
                let child_result = join_children(handles).await;
                match (err, child_result) {
                    // L'enfant a fermé son entrée en échouant : son erreur est la vraie cause
                    (AudioError::ChildDied, Err(child_err)) => Err(child_err),
                    (err, _) => Err(err),
                }
            }
        }
    }
}

async fn join_children(handles: Vec<JoinHandle<Result<(), AudioError>>>) -> Result<(), AudioError> {
    let mut first_error = None;
    for handle in handles {
        let outcome = match handle.await {
            Ok(result) => result,
            Err(join_err) => Err(AudioError::ProcessingError(format!(
                "node task failed: {join_err}"
            ))),
        };
        if let Err(err) = outcome {
            warn!(error = %err, "Child node ended with an error");
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Envoie un segment à tous les enfants.
///
/// Un enfant disparu pendant une annulation n'est pas une erreur.
pub(crate) async fn send_to_children(
    output: &[mpsc::Sender<Arc<AudioSegment>>],
    segment: Arc<AudioSegment>,
    stop_token: &CancellationToken,
) -> Result<(), AudioError> {
    for tx in output {
        if tx.send(segment.clone()).await.is_err() {
            if stop_token.is_cancelled() {
                return Ok(());
            }
            return Err(AudioError::ChildDied);
        }
    }
    Ok(())
}
