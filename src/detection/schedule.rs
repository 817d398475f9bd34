/// 检测节拍与结果缓存
use super::types::RoleTensor;

/// Runs detection on frame 0, N, 2N, ... of the stream.
#[derive(Clone, Debug)]
pub struct DetectionSchedule {
    every_n: u64,
    frame_counter: u64,
}

impl DetectionSchedule {
    pub fn new(every_n: u32) -> Self {
        Self {
            every_n: u64::from(every_n.max(1)),
            frame_counter: 0,
        }
    }

    /// Count one produced frame and report whether it is due for inference.
    pub fn advance(&mut self) -> bool {
        let due = self.frame_counter % self.every_n == 0;
        self.frame_counter += 1;
        due
    }

    pub fn frames(&self) -> u64 {
        self.frame_counter
    }
}

/// Last tensors produced, reused between scheduled runs.
#[derive(Clone, Debug, Default)]
pub struct DetectionCache {
    tensors: Option<Vec<RoleTensor>>,
}

impl DetectionCache {
    pub fn replace(&mut self, tensors: Vec<RoleTensor>) {
        self.tensors = Some(tensors);
    }

    /// `None` until the first detection has landed.
    pub fn get(&self) -> Option<&[RoleTensor]> {
        self.tensors.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_nth_frame_is_due() {
        let mut schedule = DetectionSchedule::new(3);
        let due: Vec<bool> = (0..7).map(|_| schedule.advance()).collect();
        assert_eq!(due, vec![true, false, false, true, false, false, true]);
        assert_eq!(schedule.frames(), 7);
    }

    #[test]
    fn cadence_of_one_runs_every_frame() {
        let mut schedule = DetectionSchedule::new(1);
        assert!((0..5).all(|_| schedule.advance()));
    }

    #[test]
    fn cache_starts_empty() {
        let mut cache = DetectionCache::default();
        assert!(cache.get().is_none());
        cache.replace(Vec::new());
        assert_eq!(cache.get().map(|t| t.len()), Some(0));
    }
}
