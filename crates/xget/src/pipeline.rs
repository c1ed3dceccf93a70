//! Per-segment transformation pipeline.
//!
//! Each segment's raw bytes run through an ordered chain of user-supplied
//! transformers before entering its reassembly slot. A transformer is a
//! duplex stage: chunks go in, zero or more chunks come out, and `finish`
//! drains whatever the stage buffered.

use std::sync::Arc;

use bytes::Bytes;

use crate::{
    error::{BoxError, XgetError, XgetResult},
    plan::ByteRange,
    store::Store,
};

/// Per-segment context handed to transformer factories.
#[derive(Debug, Clone)]
pub struct SegmentMeta {
    pub index: usize,
    pub range: ByteRange,
}

/// A duplex byte transformer.
///
/// `update` may buffer internally and emit nothing; `finish` must drain any
/// buffered remainder. Stages are driven strictly in input order.
pub trait Transform: Send {
    fn update(&mut self, chunk: Bytes) -> Result<Vec<Bytes>, BoxError>;

    fn finish(&mut self) -> Result<Vec<Bytes>, BoxError> {
        Ok(Vec::new())
    }
}

/// Factory invoked once per segment at segment start.
pub type TransformFactory =
    Arc<dyn Fn(&SegmentMeta, &Arc<Store>) -> Result<Box<dyn Transform>, BoxError> + Send + Sync>;

/// Stateless chunk-mapping transformer, for stages that never buffer.
pub fn map_transform<F>(f: F) -> Box<dyn Transform>
where
    F: FnMut(Bytes) -> Bytes + Send + 'static,
{
    struct MapTransform<F>(F);
    impl<F: FnMut(Bytes) -> Bytes + Send> Transform for MapTransform<F> {
        fn update(&mut self, chunk: Bytes) -> Result<Vec<Bytes>, BoxError> {
            Ok(vec![(self.0)(chunk)])
        }
    }
    Box::new(MapTransform(f))
}

/// An instantiated per-segment chain.
pub struct Chain {
    stages: Vec<(String, Box<dyn Transform>)>,
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("stages", &self.stages.iter().map(|(name, _)| name).collect::<Vec<_>>())
            .finish()
    }
}

impl Chain {
    /// Instantiate every registered factory for one segment, in
    /// registration order. A failing factory aborts with the offending tag.
    pub fn build(
        registry: &[(String, TransformFactory)],
        meta: &SegmentMeta,
        store: &Arc<Store>,
    ) -> XgetResult<Self> {
        let mut stages = Vec::with_capacity(registry.len());
        for (tag, factory) in registry {
            let stage = factory(meta, store).map_err(|source| XgetError::Transform {
                tag: tag.clone(),
                source,
            })?;
            stages.push((tag.clone(), stage));
        }
        Ok(Self { stages })
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Push one input chunk through the whole chain.
    pub fn update(&mut self, chunk: Bytes) -> XgetResult<Vec<Bytes>> {
        let mut current = vec![chunk];
        for (tag, stage) in &mut self.stages {
            let mut next = Vec::new();
            for piece in current {
                let produced = stage.update(piece).map_err(|source| XgetError::Transform {
                    tag: tag.clone(),
                    source,
                })?;
                next.extend(produced);
            }
            current = next;
        }
        Ok(current)
    }

    /// Drain the chain: each stage is finished in order and its tail fed
    /// through the stages after it.
    pub fn finish(&mut self) -> XgetResult<Vec<Bytes>> {
        let mut out = Vec::new();
        for i in 0..self.stages.len() {
            let tail = {
                let (tag, stage) = &mut self.stages[i];
                stage.finish().map_err(|source| XgetError::Transform {
                    tag: tag.clone(),
                    source,
                })?
            };
            let mut current = tail;
            for (tag, stage) in &mut self.stages[i + 1..] {
                let mut next = Vec::new();
                for piece in current {
                    let produced = stage.update(piece).map_err(|source| XgetError::Transform {
                        tag: tag.clone(),
                        source,
                    })?;
                    next.extend(produced);
                }
                current = next;
            }
            out.extend(current);
        }
        Ok(out)
    }
}
