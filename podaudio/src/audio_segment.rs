use std::sync::Arc;

use poddecode::PCM_FORMAT;

/// Bloc de PCM stéréo entrelacé 16 bits à 44.1 kHz
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmChunk {
    samples: Arc<[i16]>,
}

impl PcmChunk {
    pub fn new(samples: Vec<i16>) -> Self {
        debug_assert_eq!(samples.len() % usize::from(PCM_FORMAT.channels), 0);
        Self {
            samples: samples.into(),
        }
    }

    /// Échantillons entrelacés (gauche, droite, ...)
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Nombre de frames (un échantillon par canal)
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(PCM_FORMAT.channels)
    }

    pub fn duration_sec(&self) -> f64 {
        self.frames() as f64 / f64::from(PCM_FORMAT.sample_rate)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SegmentKind {
    Chunk(PcmChunk),
    /// Fin normale du flux : tout ce qui précède doit être joué
    EndOfStream,
}

/// Unité transmise entre les nœuds du pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    pub order: u64,
    pub timestamp_sec: f64,
    pub segment: SegmentKind,
}

impl AudioSegment {
    pub fn new_chunk(order: u64, timestamp_sec: f64, samples: Vec<i16>) -> Arc<Self> {
        Arc::new(Self {
            order,
            timestamp_sec,
            segment: SegmentKind::Chunk(PcmChunk::new(samples)),
        })
    }

    pub fn new_end_of_stream(order: u64, timestamp_sec: f64) -> Arc<Self> {
        Arc::new(Self {
            order,
            timestamp_sec,
            segment: SegmentKind::EndOfStream,
        })
    }

    pub fn as_chunk(&self) -> Option<&PcmChunk> {
        match &self.segment {
            SegmentKind::Chunk(chunk) => Some(chunk),
            SegmentKind::EndOfStream => None,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self.segment, SegmentKind::EndOfStream)
    }
}
