/// ONNX推理 (ONNX Runtime inference)
///
/// One session per configured detector role. Every network sees the same
/// stretched NCHW blob, so the frame is resized and normalised once per run.
use std::path::Path;
use std::time::Instant;

use fast_image_resize as fr;
use image::RgbImage;
use ndarray::Array3;
use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info, warn};

use super::types::{DetectionTensor, DetectorRole, RoleTensor};
use crate::config::{AppConfig, ExecutionProvider, NetworkInput};
use crate::error::DetectError;

/// Anything that turns an RGB image into raw per-role tensors.
pub trait Inference {
    fn infer(&mut self, image: &RgbImage) -> Result<Vec<RoleTensor>, DetectError>;
}

/// 单个ONNX网络
pub struct OnnxNetwork {
    role: DetectorRole,
    session: Session,
    input_name: String,
}

impl OnnxNetwork {
    pub fn load(
        role: DetectorRole,
        path: &Path,
        provider: ExecutionProvider,
    ) -> Result<Self, DetectError> {
        let load_err = |reason: String| DetectError::ModelLoad {
            path: path.display().to_string(),
            reason,
        };

        let builder = Session::builder()
            .and_then(|b| b.with_intra_threads(num_threads()))
            .map_err(|e| load_err(e.to_string()))?;
        let builder = with_provider(builder, provider).map_err(load_err)?;
        let session = builder
            .commit_from_file(path)
            .map_err(|e| load_err(e.to_string()))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| load_err("model has no inputs".to_string()))?;

        info!(
            "loaded {} model {} (input '{}')",
            role.name(),
            path.display(),
            input_name
        );
        Ok(Self {
            role,
            session,
            input_name,
        })
    }

    pub fn role(&self) -> DetectorRole {
        self.role
    }

    fn run(&mut self, blob: &[f32], input: NetworkInput) -> Result<DetectionTensor, DetectError> {
        let role = self.role.name();
        let infer_err = |reason: String| DetectError::Inference { role, reason };

        let shape = [1usize, 3, input.height as usize, input.width as usize];
        let tensor = Tensor::from_array((shape, blob.to_vec().into_boxed_slice()))
            .map_err(|e| infer_err(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| infer_err(e.to_string()))?;

        let (_, value) = outputs
            .iter()
            .next()
            .ok_or_else(|| infer_err("model produced no outputs".to_string()))?;
        let (shape, data) = value
            .try_extract_tensor::<f32>()
            .map_err(|e| infer_err(e.to_string()))?;
        let dims: Vec<i64> = shape.iter().copied().collect();

        let data = to_channels_first(&dims, data).ok_or(DetectError::OutputShape {
            role,
            shape: dims.clone(),
        })?;
        Ok(DetectionTensor {
            data,
            input_width: input.width,
            input_height: input.height,
        })
    }
}

fn num_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(feature = "cuda")]
fn with_provider(
    builder: ort::session::builder::SessionBuilder,
    provider: ExecutionProvider,
) -> Result<ort::session::builder::SessionBuilder, String> {
    match provider {
        ExecutionProvider::Cuda => builder
            .with_execution_providers([
                ort::execution_providers::CUDAExecutionProvider::default().build()
            ])
            .map_err(|e| e.to_string()),
        ExecutionProvider::Cpu => Ok(builder),
    }
}

#[cfg(not(feature = "cuda"))]
fn with_provider(
    builder: ort::session::builder::SessionBuilder,
    provider: ExecutionProvider,
) -> Result<ort::session::builder::SessionBuilder, String> {
    if provider == ExecutionProvider::Cuda {
        warn!("built without the `cuda` feature, running on CPU");
    }
    Ok(builder)
}

/// (1, C, P) as-is; (1, P, C) exports are transposed. The proposal axis is
/// the longer one.
fn to_channels_first(dims: &[i64], data: &[f32]) -> Option<Array3<f32>> {
    if dims.len() != 3 || dims[0] != 1 || dims[1] <= 0 || dims[2] <= 0 {
        return None;
    }
    let (a, b) = (dims[1] as usize, dims[2] as usize);
    let array = Array3::from_shape_vec((1, a, b), data.to_vec()).ok()?;
    let array = if a > b {
        array.permuted_axes([0, 2, 1]).as_standard_layout().into_owned()
    } else {
        array
    };
    if array.shape()[1] < 5 {
        return None;
    }
    Some(array)
}

/// Resize `image` to the network input (stretch, no letterbox) and lay it out
/// as planar RGB scaled to [0, 1].
pub struct BlobBuilder {
    input: NetworkInput,
    resizer: fr::Resizer,
    resize_buf: Vec<u8>,
    blob: Vec<f32>,
}

impl BlobBuilder {
    pub fn new(input: NetworkInput) -> Self {
        let area = input.width as usize * input.height as usize;
        Self {
            input,
            resizer: fr::Resizer::new(),
            resize_buf: vec![0u8; area * 3],
            blob: vec![0f32; area * 3],
        }
    }

    pub fn build(&mut self, image: &RgbImage) -> Result<&[f32], DetectError> {
        let (w, h) = image.dimensions();
        let src = fr::images::ImageRef::new(w, h, image.as_raw(), fr::PixelType::U8x3)
            .map_err(|e| DetectError::Resize(e.to_string()))?;
        let mut dst = fr::images::Image::from_vec_u8(
            self.input.width,
            self.input.height,
            std::mem::take(&mut self.resize_buf),
            fr::PixelType::U8x3,
        )
        .map_err(|e| DetectError::Resize(e.to_string()))?;

        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
        self.resizer
            .resize(&src, &mut dst, Some(&options))
            .map_err(|e| DetectError::Resize(e.to_string()))?;
        self.resize_buf = dst.into_vec();

        let size = self.input.width as usize * self.input.height as usize;
        let (r_plane, gb) = self.blob.split_at_mut(size);
        let (g_plane, b_plane) = gb.split_at_mut(size);
        for (idx, px) in self.resize_buf.chunks_exact(3).enumerate() {
            r_plane[idx] = px[0] as f32 / 255.0;
            g_plane[idx] = px[1] as f32 / 255.0;
            b_plane[idx] = px[2] as f32 / 255.0;
        }
        Ok(&self.blob)
    }
}

/// 多模型推理
pub struct OnnxEnsemble {
    networks: Vec<OnnxNetwork>,
    blob: BlobBuilder,
    input: NetworkInput,
    runs: usize,
    last_report: Instant,
    total_ms: f64,
}

impl OnnxEnsemble {
    /// Load every role that has a model path. A role that fails to load is an
    /// error; an empty role list is `NoModels`.
    pub fn load(config: &AppConfig) -> Result<Self, DetectError> {
        let mut networks = Vec::new();
        for role in config.configured_roles() {
            let Some(path) = config.model_path(role) else {
                continue;
            };
            networks.push(OnnxNetwork::load(
                role,
                Path::new(path),
                config.execution_provider,
            )?);
        }
        if networks.is_empty() {
            return Err(DetectError::NoModels);
        }
        Ok(Self {
            networks,
            blob: BlobBuilder::new(config.network_input),
            input: config.network_input,
            runs: 0,
            last_report: Instant::now(),
            total_ms: 0.0,
        })
    }

    pub fn roles(&self) -> Vec<DetectorRole> {
        self.networks.iter().map(OnnxNetwork::role).collect()
    }

    fn report(&mut self) {
        let elapsed = self.last_report.elapsed().as_secs_f64();
        if elapsed < 1.0 || self.runs == 0 {
            return;
        }
        debug!(
            "inference: {} runs | avg {:.1}ms",
            self.runs,
            self.total_ms / self.runs as f64
        );
        self.runs = 0;
        self.total_ms = 0.0;
        self.last_report = Instant::now();
    }
}

impl Inference for OnnxEnsemble {
    fn infer(&mut self, image: &RgbImage) -> Result<Vec<RoleTensor>, DetectError> {
        let start = Instant::now();
        let blob = self.blob.build(image)?;

        let mut tensors = Vec::with_capacity(self.networks.len());
        for network in &mut self.networks {
            let tensor = network.run(blob, self.input)?;
            tensors.push(RoleTensor {
                role: network.role(),
                tensor,
            });
        }

        self.runs += 1;
        self.total_ms += start.elapsed().as_secs_f64() * 1000.0;
        self.report();
        Ok(tensors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn channels_first_passes_through() {
        let data: Vec<f32> = (0..5 * 3).map(|v| v as f32).collect();
        let array = to_channels_first(&[1, 5, 3], &data).unwrap();
        assert_eq!(array.shape(), &[1, 5, 3]);
        assert_eq!(array[[0, 1, 2]], 5.0);
    }

    #[test]
    fn channels_last_is_transposed() {
        // 8 proposals x 6 channels
        let data: Vec<f32> = (0..8 * 6).map(|v| v as f32).collect();
        let array = to_channels_first(&[1, 8, 6], &data).unwrap();
        assert_eq!(array.shape(), &[1, 6, 8]);
        // proposal 2, channel 4 was at 2 * 6 + 4
        assert_eq!(array[[0, 4, 2]], 16.0);
    }

    #[test]
    fn rejects_unexpected_shapes() {
        assert!(to_channels_first(&[1, 84], &[0.0; 84]).is_none());
        assert!(to_channels_first(&[2, 5, 3], &[0.0; 30]).is_none());
        assert!(to_channels_first(&[1, 4, 10], &[0.0; 40]).is_none());
        assert!(to_channels_first(&[1, 5, 3], &[0.0; 4]).is_none());
    }

    #[test]
    fn blob_is_planar_and_normalised() {
        let image = RgbImage::from_pixel(32, 24, Rgb([255, 0, 51]));
        let mut builder = BlobBuilder::new(NetworkInput {
            width: 16,
            height: 16,
        });
        let blob = builder.build(&image).unwrap();
        let size = 16 * 16;
        assert_eq!(blob.len(), size * 3);
        assert!(blob[..size].iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(blob[size..2 * size].iter().all(|&v| v.abs() < 1e-6));
        assert!(blob[2 * size..].iter().all(|&v| (v - 0.2).abs() < 1e-6));
    }
}
