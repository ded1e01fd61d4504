use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detection::preprocessing;
use crate::models::Detection;

const BOX_COLOR: Rgb<u8> = Rgb([0, 122, 255]);
const BOX_THICKNESS: i32 = 3;

/// Letterbox `image` to `size` and outline each detection on it.
///
/// Detections are drawn from their model-frame boxes, which share the
/// letterboxed square's coordinates.
pub fn draw_detections(image: &DynamicImage, detections: &[Detection], size: u32) -> RgbImage {
    let mut canvas = preprocessing::letterbox(image, size).to_rgb8();
    let side = size as f32;

    for detection in detections {
        let Some(rect) = detection.model_box().intersection(&detection.valid_region()) else {
            continue;
        };

        let x = (rect.x * side).round() as i32;
        let y = (rect.y * side).round() as i32;
        let w = (rect.width * side).round() as u32;
        let h = (rect.height * side).round() as u32;

        for inset in 0..BOX_THICKNESS {
            let inner_w = w.saturating_sub(2 * inset as u32);
            let inner_h = h.saturating_sub(2 * inset as u32);
            if inner_w == 0 || inner_h == 0 {
                break;
            }
            draw_hollow_rect_mut(
                &mut canvas,
                Rect::at(x + inset, y + inset).of_size(inner_w, inner_h),
                BOX_COLOR,
            );
        }
    }

    canvas
}
