/// 后台推理线程 (Background inference worker)
///
/// Owns the detector outright. Images go in and tensors come out over
/// bounded(1) channels, so the tick never blocks on inference.
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use image::RgbImage;
use tracing::{info, warn};

use super::onnx::Inference;
use super::types::RoleTensor;
use crate::error::DetectError;

type InferResult = Result<Vec<RoleTensor>, DetectError>;

pub struct DetectionWorker {
    image_tx: Option<Sender<RgbImage>>,
    result_rx: Option<Receiver<InferResult>>,
    handle: Option<JoinHandle<()>>,
}

impl DetectionWorker {
    pub fn spawn<D>(mut detector: D) -> Result<Self, DetectError>
    where
        D: Inference + Send + 'static,
    {
        let (image_tx, image_rx) = bounded::<RgbImage>(1);
        let (result_tx, result_rx) = bounded::<InferResult>(1);

        let handle = std::thread::Builder::new()
            .name("detect".to_string())
            .spawn(move || {
                info!("detection worker started");
                for image in image_rx {
                    let result = detector.infer(&image);
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
                info!("detection worker exited");
            })
            .map_err(|e| {
                warn!("failed to spawn detection worker: {}", e);
                DetectError::WorkerGone
            })?;

        Ok(Self {
            image_tx: Some(image_tx),
            result_rx: Some(result_rx),
            handle: Some(handle),
        })
    }

    /// Hand an image to the worker. `Ok(false)` while it is still busy with
    /// the previous one.
    pub fn submit(&self, image: RgbImage) -> Result<bool, DetectError> {
        let tx = self.image_tx.as_ref().ok_or(DetectError::WorkerGone)?;
        match tx.try_send(image) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(_)) => Err(DetectError::WorkerGone),
        }
    }

    /// Finished result, if one is ready.
    pub fn poll(&self) -> Option<InferResult> {
        let rx = self.result_rx.as_ref()?;
        match rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(DetectError::WorkerGone)),
        }
    }
}

impl Drop for DetectionWorker {
    fn drop(&mut self) {
        // closing both ends unblocks the worker whichever side it waits on
        self.image_tx.take();
        self.result_rx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("detection worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::{DetectionTensor, DetectorRole};
    use ndarray::Array3;
    use std::time::{Duration, Instant};

    struct Echo;

    impl Inference for Echo {
        fn infer(&mut self, image: &RgbImage) -> Result<Vec<RoleTensor>, DetectError> {
            Ok(vec![RoleTensor {
                role: DetectorRole::Face,
                tensor: DetectionTensor {
                    data: Array3::zeros((1, 5, 1)),
                    input_width: image.width(),
                    input_height: image.height(),
                },
            }])
        }
    }

    struct Broken;

    impl Inference for Broken {
        fn infer(&mut self, _image: &RgbImage) -> Result<Vec<RoleTensor>, DetectError> {
            Err(DetectError::Resize("boom".to_string()))
        }
    }

    fn wait_for(worker: &DetectionWorker) -> InferResult {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(result) = worker.poll() {
                return result;
            }
            assert!(Instant::now() < deadline, "worker never answered");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn returns_tensors_for_submitted_image() {
        let worker = DetectionWorker::spawn(Echo).unwrap();
        assert!(worker.poll().is_none());
        assert!(worker.submit(RgbImage::new(12, 7)).unwrap());
        let tensors = wait_for(&worker).unwrap();
        assert_eq!(tensors[0].role, DetectorRole::Face);
        assert_eq!(tensors[0].tensor.input_width, 12);
    }

    #[test]
    fn errors_are_forwarded() {
        let worker = DetectionWorker::spawn(Broken).unwrap();
        worker.submit(RgbImage::new(2, 2)).unwrap();
        assert!(matches!(wait_for(&worker), Err(DetectError::Resize(_))));
    }

    #[test]
    fn drop_joins_worker() {
        let worker = DetectionWorker::spawn(Echo).unwrap();
        worker.submit(RgbImage::new(2, 2)).unwrap();
        drop(worker);
    }
}
