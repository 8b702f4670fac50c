use crate::{
    error::{ClipreelError, ClipreelResult},
    model::ImageAsset,
};

/// An opaque RGBA8 render target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl Surface {
    /// Fresh surface filled with opaque black.
    pub fn new(width: u32, height: u32) -> ClipreelResult<Self> {
        if width == 0 || height == 0 {
            return Err(ClipreelError::validation(
                "surface width/height must be non-zero",
            ));
        }
        let mut rgba = vec![0u8; width as usize * height as usize * 4];
        for px in rgba.chunks_exact_mut(4) {
            px[3] = 255;
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }
}

/// Placement of a scaled image inside a surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FitRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Uniform scale-to-fit placement.
///
/// A source wider than the target (by aspect) is clamped to the target width
/// and centered vertically (bars top/bottom); otherwise it is clamped to the
/// target height and centered horizontally (bars left/right). Geometry is
/// exact: the same inputs always place the image identically.
pub fn fit_rect(
    img_w: u32,
    img_h: u32,
    target_w: u32,
    target_h: u32,
) -> ClipreelResult<FitRect> {
    if img_w == 0 || img_h == 0 || target_w == 0 || target_h == 0 {
        return Err(ClipreelError::validation(
            "fit_rect expects non-zero dimensions",
        ));
    }

    let img_aspect = f64::from(img_w) / f64::from(img_h);
    let target_aspect = f64::from(target_w) / f64::from(target_h);

    let (width, height) = if img_aspect > target_aspect {
        let h = (f64::from(target_w) / img_aspect).round() as u32;
        (target_w, h.clamp(1, target_h))
    } else {
        let w = (f64::from(target_h) * img_aspect).round() as u32;
        (w.clamp(1, target_w), target_h)
    };

    Ok(FitRect {
        x: (target_w - width) / 2,
        y: (target_h - height) / 2,
        width,
        height,
    })
}

/// Composite one scene image onto a black surface of the target size.
pub fn render(image: &ImageAsset, target_w: u32, target_h: u32) -> ClipreelResult<Surface> {
    let rect = fit_rect(image.width, image.height, target_w, target_h)?;
    let mut surface = Surface::new(target_w, target_h)?;

    let src = image::RgbaImage::from_raw(image.width, image.height, image.rgba.clone())
        .ok_or_else(|| {
            ClipreelError::validation("image asset buffer does not match its dimensions")
        })?;

    let scaled = if (rect.width, rect.height) == (image.width, image.height) {
        src
    } else {
        image::imageops::resize(
            &src,
            rect.width,
            rect.height,
            image::imageops::FilterType::Triangle,
        )
    };

    let stride = target_w as usize * 4;
    let row_bytes = rect.width as usize * 4;
    for row in 0..rect.height as usize {
        let src_start = row * row_bytes;
        let dst_start = (rect.y as usize + row) * stride + rect.x as usize * 4;
        surface.rgba[dst_start..dst_start + row_bytes]
            .copy_from_slice(&scaled.as_raw()[src_start..src_start + row_bytes]);
    }

    // The source may carry alpha; exports are opaque.
    for px in surface.rgba.chunks_exact_mut(4) {
        px[3] = 255;
    }

    Ok(surface)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, color: [u8; 4]) -> ImageAsset {
        let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..width * height {
            rgba.extend_from_slice(&color);
        }
        ImageAsset {
            width,
            height,
            rgba,
        }
    }

    #[test]
    fn wide_image_into_tall_target_is_clamped_to_width() {
        // 16:9 source into the 9:16 shape: full width, bars above and below.
        let rect = fit_rect(1920, 1080, 720, 1280).unwrap();
        assert_eq!(rect.width, 720);
        assert!(rect.height < 1280);
        assert_eq!(rect.x, 0);
        assert!(rect.y > 0);
        assert_eq!(rect.height, 405);
        assert_eq!(rect.y, (1280 - 405) / 2);
    }

    #[test]
    fn tall_image_into_wide_target_is_clamped_to_height() {
        // 9:16 source into the 16:9 shape: full height, bars left and right.
        let rect = fit_rect(1080, 1920, 1280, 720).unwrap();
        assert_eq!(rect.height, 720);
        assert!(rect.width < 1280);
        assert_eq!(rect.y, 0);
        assert!(rect.x > 0);
        assert_eq!(rect.width, 405);
        assert_eq!(rect.x, (1280 - 405) / 2);
    }

    #[test]
    fn matching_aspect_fills_the_surface() {
        let rect = fit_rect(640, 360, 1280, 720).unwrap();
        assert_eq!(
            rect,
            FitRect {
                x: 0,
                y: 0,
                width: 1280,
                height: 720
            }
        );
    }

    #[test]
    fn placement_is_deterministic() {
        let image = solid(300, 100, [10, 200, 30, 255]);
        let a = render(&image, 720, 1280).unwrap();
        let b = render(&image, 720, 1280).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn bars_are_opaque_black_and_content_is_centered() {
        let image = solid(200, 100, [255, 0, 0, 255]);
        let surface = render(&image, 100, 200).unwrap();

        // Top-left corner sits in the letterbox bar.
        assert_eq!(&surface.rgba[0..4], &[0, 0, 0, 255]);

        // Center of the surface sits inside the scaled image.
        let center = ((100 * 100 + 50) * 4) as usize;
        assert_eq!(&surface.rgba[center..center + 4], &[255, 0, 0, 255]);
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(fit_rect(0, 10, 10, 10).is_err());
        assert!(fit_rect(10, 10, 0, 10).is_err());
        assert!(Surface::new(0, 10).is_err());
    }
}
