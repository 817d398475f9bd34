/// 渲染表面: 最新发布的画面
///
/// The tick loop publishes a fresh `DisplayImage` each time; the paint side
/// clones the `Arc`. The lock is held only for the swap or the clone.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use image::RgbImage;

#[derive(Debug)]
pub struct DisplayImage {
    pub sequence: u64,
    pub image: RgbImage,
}

#[derive(Debug, Default)]
pub struct RenderSurface {
    slot: Mutex<Option<Arc<DisplayImage>>>,
    sequence: AtomicU64,
}

impl RenderSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the visible image. Returns the new sequence number.
    pub fn publish(&self, image: RgbImage) -> u64 {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        // numbered under the lock so the slot always holds the highest sequence
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        *slot = Some(Arc::new(DisplayImage { sequence, image }));
        sequence
    }

    pub fn latest(&self) -> Option<Arc<DisplayImage>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sequence of the last published image, 0 before the first.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }
}
