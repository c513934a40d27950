//! Multi-signal retriever.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use fusion_core::{
    Embedder, FusionError, IndexStore, ObjectKey, Result, Rewrite, SearchScope, Signal, SignalHit,
};

/// Per-request retrieval settings.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalParams {
    /// Candidates kept per signal per rewrite.
    pub cap: u32,

    /// Minimum trigram similarity for the fuzzy signal.
    pub fuzzy_threshold: f32,
}

/// One signal's ranking for one rewrite. Rank is position + 1.
#[derive(Debug, Clone)]
pub struct RankedList {
    pub signal: Signal,
    pub hits: Vec<SignalHit>,
}

/// All rankings computed for one rewrite.
#[derive(Debug, Clone)]
pub struct RewriteSignals {
    pub rewrite_index: usize,
    pub text: String,
    pub lists: Vec<RankedList>,
}

impl RewriteSignals {
    pub fn list(&self, signal: Signal) -> Option<&RankedList> {
        self.lists.iter().find(|l| l.signal == signal)
    }
}

/// Request-scoped retrieval output.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub rewrites: Vec<RewriteSignals>,

    /// Signals that failed for at least one rewrite.
    pub degraded: Vec<Signal>,
}

impl Retrieval {
    /// Every object ranked by any signal of any rewrite, sorted.
    pub fn candidate_keys(&self) -> Vec<ObjectKey> {
        let keys: BTreeSet<&ObjectKey> = self
            .rewrites
            .iter()
            .flat_map(|r| r.lists.iter())
            .flat_map(|l| l.hits.iter().map(|h| &h.key))
            .collect();

        keys.into_iter().cloned().collect()
    }
}

/// Runs fuzzy, lexical and vector retrieval for each rewrite.
pub struct MultiSignalRetriever<S: IndexStore> {
    store: Arc<S>,

    /// Computes query vectors for rewrites that arrive without one.
    embedder: Option<Arc<dyn Embedder>>,

    /// Budget for embedding all rewrites of one request.
    embed_timeout: Duration,
}

impl<S: IndexStore> MultiSignalRetriever<S> {
    pub fn new(store: Arc<S>, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self {
            store,
            embedder,
            embed_timeout: Duration::from_millis(2000),
        }
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    /// Retrieve every signal for every rewrite.
    ///
    /// A failing signal is logged, reported as degraded and contributes
    /// nothing. Only when every attempted signal fails is the store
    /// considered unavailable.
    pub async fn retrieve(
        &self,
        scope: &SearchScope,
        rewrites: &[Rewrite],
        params: RetrievalParams,
    ) -> Result<Retrieval> {
        let mut degraded = BTreeSet::new();
        let mut attempted = 0usize;
        let mut succeeded = 0usize;
        let mut last_error: Option<FusionError> = None;
        let mut out = Vec::with_capacity(rewrites.len());

        let embeddings = self.query_embeddings(rewrites, &mut degraded).await;

        for (index, (rewrite, embedding)) in rewrites.iter().zip(embeddings).enumerate() {

            let (fuzzy, lexical, vector) = tokio::join!(
                self.store
                    .fuzzy_search(scope, &rewrite.text, params.fuzzy_threshold, params.cap),
                self.store.lexical_search(scope, &rewrite.text, params.cap),
                async {
                    match &embedding {
                        Some(e) => Some(self.store.vector_search(scope, e, params.cap).await),
                        None => None,
                    }
                }
            );

            let mut lists = Vec::with_capacity(3);
            for (signal, result) in [
                (Signal::Fuzzy, Some(fuzzy)),
                (Signal::Lexical, Some(lexical)),
                (Signal::Vector, vector),
            ] {
                let Some(result) = result else {
                    continue;
                };

                attempted += 1;
                match result {
                    Ok(hits) => {
                        succeeded += 1;
                        lists.push(RankedList { signal, hits });
                    }
                    Err(e) => {
                        warn!("Signal {} failed for rewrite {}: {}", signal, index, e);
                        degraded.insert(signal);
                        last_error = Some(e);
                    }
                }
            }

            debug!(
                "Rewrite {}: {}",
                index,
                lists
                    .iter()
                    .map(|l| format!("{}={}", l.signal, l.hits.len()))
                    .collect::<Vec<_>>()
                    .join(" ")
            );

            out.push(RewriteSignals {
                rewrite_index: index,
                text: rewrite.text.clone(),
                lists,
            });
        }

        if attempted > 0 && succeeded == 0 {
            let cause = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(FusionError::database(format!(
                "All retrieval signals failed: {}",
                cause
            )));
        }

        Ok(Retrieval {
            rewrites: out,
            degraded: degraded.into_iter().collect(),
        })
    }

    /// Vectors for every rewrite, embedding the missing ones concurrently
    /// within the request budget. `None` leaves the vector signal out.
    async fn query_embeddings(
        &self,
        rewrites: &[Rewrite],
        degraded: &mut BTreeSet<Signal>,
    ) -> Vec<Option<Vec<f32>>> {
        let mut embeddings: Vec<Option<Vec<f32>>> =
            rewrites.iter().map(|r| r.embedding.clone()).collect();

        let Some(embedder) = &self.embedder else {
            return embeddings;
        };

        let mut tasks = JoinSet::new();
        for (index, rewrite) in rewrites.iter().enumerate() {
            if rewrite.embedding.is_some() || rewrite.text.trim().is_empty() {
                continue;
            }
            let embedder = embedder.clone();
            let text = rewrite.text.clone();
            tasks.spawn(async move { (index, embedder.embed_query(&text).await) });
        }

        if tasks.is_empty() {
            return embeddings;
        }

        let collected = tokio::time::timeout(self.embed_timeout, async {
            let mut failed = false;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((index, Ok(embedding))) => embeddings[index] = Some(embedding),
                    Ok((index, Err(e))) => {
                        warn!("Query embedding failed for rewrite {}: {}", index, e);
                        failed = true;
                    }
                    Err(e) => {
                        warn!("Query embedding task failed: {}", e);
                        failed = true;
                    }
                }
            }
            failed
        })
        .await;

        match collected {
            Ok(false) => {}
            Ok(true) => {
                degraded.insert(Signal::Vector);
            }
            Err(_) => {
                warn!(
                    "Query embedding exceeded {:?}, vector signal degraded",
                    self.embed_timeout
                );
                degraded.insert(Signal::Vector);
            }
        }

        embeddings
    }
}
