/// 像素格式转换 (Pixel-format conversion)
///
/// Decoded `Frame` → interleaved RGB display image. YUV uses BT.601
/// coefficients in 7-bit fixed point (1.402, 0.344, 0.714, 1.772 × 128).
use image::RgbImage;

use super::frame::{chroma_size, Frame, PixelFormat};
use crate::error::ConvertError;

pub fn to_rgb(frame: &Frame) -> Result<RgbImage, ConvertError> {
    if frame.is_empty() {
        return Err(ConvertError::EmptyFrame {
            width: frame.width,
            height: frame.height,
        });
    }
    let expected = frame.format.plane_count();
    if frame.planes.len() != expected {
        return Err(ConvertError::PlaneCount {
            expected,
            actual: frame.planes.len(),
        });
    }

    match frame.format {
        PixelFormat::Yuv420p => yuv420p_to_rgb(frame),
        PixelFormat::Rgb24 => packed_to_rgb(frame, false),
        PixelFormat::Bgr24 => packed_to_rgb(frame, true),
    }
}

/// Bytes needed for `rows` rows of `row` bytes at `stride`.
fn check_plane(
    index: usize,
    len: usize,
    stride: usize,
    row: usize,
    rows: usize,
) -> Result<(), ConvertError> {
    if stride < row {
        return Err(ConvertError::StrideTooShort {
            plane: index,
            stride,
            row,
        });
    }
    let needed = stride * (rows - 1) + row;
    if len < needed {
        return Err(ConvertError::PlaneTooSmall {
            plane: index,
            needed,
            actual: len,
        });
    }
    Ok(())
}

fn packed_to_rgb(frame: &Frame, swap: bool) -> Result<RgbImage, ConvertError> {
    let w = frame.width as usize;
    let h = frame.height as usize;
    let plane = &frame.planes[0];
    check_plane(0, plane.data.len(), plane.stride, w * 3, h)?;

    let mut out = Vec::with_capacity(w * h * 3);
    for row in plane.data.chunks(plane.stride).take(h) {
        let row = &row[..w * 3];
        if swap {
            for px in row.chunks_exact(3) {
                out.extend_from_slice(&[px[2], px[1], px[0]]);
            }
        } else {
            out.extend_from_slice(row);
        }
    }

    // sizes checked above
    RgbImage::from_raw(frame.width, frame.height, out).ok_or(ConvertError::PlaneTooSmall {
        plane: 0,
        needed: w * h * 3,
        actual: plane.data.len(),
    })
}

fn yuv420p_to_rgb(frame: &Frame) -> Result<RgbImage, ConvertError> {
    let w = frame.width as usize;
    let h = frame.height as usize;
    let (cw, ch) = chroma_size(frame.width, frame.height);

    let (y_plane, u_plane, v_plane) = (&frame.planes[0], &frame.planes[1], &frame.planes[2]);
    check_plane(0, y_plane.data.len(), y_plane.stride, w, h)?;
    check_plane(1, u_plane.data.len(), u_plane.stride, cw, ch)?;
    check_plane(2, v_plane.data.len(), v_plane.stride, cw, ch)?;

    let mut out = vec![0u8; w * h * 3];
    let mut out_idx = 0;
    for y in 0..h {
        let y_row = y * y_plane.stride;
        let u_row = (y >> 1) * u_plane.stride;
        let v_row = (y >> 1) * v_plane.stride;

        for x in 0..w {
            let [r, g, b] = yuv_to_rgb(
                y_plane.data[y_row + x],
                u_plane.data[u_row + (x >> 1)],
                v_plane.data[v_row + (x >> 1)],
            );
            out[out_idx] = r;
            out[out_idx + 1] = g;
            out[out_idx + 2] = b;
            out_idx += 3;
        }
    }

    RgbImage::from_raw(frame.width, frame.height, out).ok_or(ConvertError::EmptyFrame {
        width: frame.width,
        height: frame.height,
    })
}

#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as i32;
    let u = u as i32 - 128;
    let v = v as i32 - 128;
    [
        (y + ((v * 179) >> 7)).clamp(0, 255) as u8,
        (y - ((u * 44) >> 7) - ((v * 91) >> 7)).clamp(0, 255) as u8,
        (y + ((u * 227) >> 7)).clamp(0, 255) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::frame::Plane;

    fn assert_uniform(image: &RgbImage, expected: [u8; 3]) {
        for (x, y, px) in image.enumerate_pixels() {
            assert_eq!(px.0, expected, "pixel ({x}, {y})");
        }
    }

    #[test]
    fn neutral_yuv_is_grey() {
        let frame = Frame::solid_yuv420p(6, 4, 128, 128, 128);
        let image = to_rgb(&frame).unwrap();
        assert_eq!(image.dimensions(), (6, 4));
        assert_uniform(&image, [128, 128, 128]);
    }

    #[test]
    fn solid_yuv_stays_uniform() {
        // roughly pure red in BT.601
        let frame = Frame::solid_yuv420p(7, 5, 81, 90, 240);
        let image = to_rgb(&frame).unwrap();
        let expected = yuv_to_rgb(81, 90, 240);
        assert!(expected[0] > 200 && expected[1] < 40 && expected[2] < 40);
        assert_uniform(&image, expected);
    }

    #[test]
    fn bgr_is_swapped_to_rgb() {
        let data = [10u8, 20, 30].repeat(4 * 3);
        let frame = Frame::packed(4, 3, PixelFormat::Bgr24, data);
        let image = to_rgb(&frame).unwrap();
        assert_uniform(&image, [30, 20, 10]);
    }

    #[test]
    fn rgb_with_padded_stride() {
        let (w, h, stride) = (3usize, 2usize, 16usize);
        let mut data = vec![0xEE; stride * h];
        for row in 0..h {
            for x in 0..w {
                data[row * stride + x * 3..row * stride + x * 3 + 3].copy_from_slice(&[1, 2, 3]);
            }
        }
        let frame = Frame::new(
            w as u32,
            h as u32,
            PixelFormat::Rgb24,
            vec![Plane { data, stride }],
        );
        let image = to_rgb(&frame).unwrap();
        assert_uniform(&image, [1, 2, 3]);
    }

    #[test]
    fn short_plane_is_rejected() {
        let mut frame = Frame::solid_yuv420p(8, 8, 16, 128, 128);
        frame.planes[2].data.truncate(3);
        assert!(matches!(
            to_rgb(&frame),
            Err(ConvertError::PlaneTooSmall { plane: 2, .. })
        ));
    }

    #[test]
    fn empty_frame_is_rejected() {
        let frame = Frame::packed(0, 4, PixelFormat::Rgb24, Vec::new());
        assert_eq!(
            to_rgb(&frame),
            Err(ConvertError::EmptyFrame {
                width: 0,
                height: 4
            })
        );
    }
}
