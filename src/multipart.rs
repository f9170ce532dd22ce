use crate::domain::MediaSegment;
use crate::timezone::TimeNormalizer;

#[derive(Debug, Clone, PartialEq)]
pub struct RunPart {
    pub part: usize,
    pub segment: MediaSegment,
}

/// Consecutive segments sharing one normalized timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartRun {
    pub key: i64,
    pub parts: Vec<RunPart>,
}

impl MultipartRun {
    fn open(key: i64, segment: MediaSegment) -> Self {
        Self {
            key,
            parts: vec![RunPart { part: 1, segment }],
        }
    }

    fn push(&mut self, segment: MediaSegment) {
        let part = self.parts.len() + 1;
        self.parts.push(RunPart { part, segment });
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn needs_merge(&self) -> bool {
        self.parts.len() > 1
    }
}

pub fn group(segments: &[MediaSegment], normalizer: &TimeNormalizer) -> Vec<MultipartRun> {
    let mut runs = Vec::new();
    let mut current: Option<MultipartRun> = None;

    for segment in segments {
        let key = normalizer.normalize(segment.captured_at);
        match current.as_mut() {
            Some(run) if run.key == key => run.push(segment.clone()),
            _ => {
                if let Some(closed) = current.take() {
                    runs.push(closed);
                }
                current = Some(MultipartRun::open(key, segment.clone()));
            }
        }
    }

    if let Some(closed) = current {
        runs.push(closed);
    }
    runs
}
