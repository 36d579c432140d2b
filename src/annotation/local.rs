use super::{Annotation, AnnotationError, AnnotationProvider};
use crate::constants::GENERIC_SCENE_LABEL;
use async_trait::async_trait;
use image::{DynamicImage, GenericImageView};
use tracing::debug;

const SAMPLE_SIZE: u32 = 64;

/// Coarse scene categories the on-device fallback can tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scene {
    Night,
    Snow,
    Beach,
    Forest,
    Sky,
    Generic,
}

impl Scene {
    pub fn label(self) -> &'static str {
        match self {
            Scene::Night => "Night Scene",
            Scene::Snow => "Snowy Landscape",
            Scene::Beach => "Beach",
            Scene::Forest => "Forest",
            Scene::Sky => "Open Sky",
            Scene::Generic => GENERIC_SCENE_LABEL,
        }
    }

    fn caption(self) -> &'static str {
        match self {
            Scene::Night => "Lights after dark",
            Scene::Snow => "Fresh snow underfoot",
            Scene::Beach => "Sand, sea and sky",
            Scene::Forest => "Deep among the trees",
            Scene::Sky => "Wide open skies",
            Scene::Generic => "A moment on the road",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Scene::Night => "A scene captured after nightfall.",
            Scene::Snow => "A landscape covered in snow.",
            Scene::Beach => "A stretch of coastline where the sand meets the water.",
            Scene::Forest => "A green, wooded landscape.",
            Scene::Sky => "A view dominated by open sky.",
            Scene::Generic => "A photo taken during the trip.",
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ColorStats {
    mean_luma: f64,
    snow: f64,
    green: f64,
    blue_top: f64,
    sand_bottom: f64,
    blue: f64,
}

fn color_stats(img: &DynamicImage) -> ColorStats {
    let sample = img.thumbnail_exact(SAMPLE_SIZE, SAMPLE_SIZE).to_rgb8();
    let (width, height) = sample.dimensions();
    let half = height / 2;
    let total = f64::from(width * height);
    let half_total = f64::from(width * half.max(1));

    let mut stats = ColorStats::default();
    for (_, y, pixel) in sample.enumerate_pixels() {
        let [r, g, b] = pixel.0.map(i32::from);
        let luma = 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
        stats.mean_luma += luma / total;

        let is_blue = b > r + 20 && b >= g;
        if r > 200 && g > 200 && b > 200 && (r - b).abs() < 25 {
            stats.snow += 1.0 / total;
        }
        if g > r + 15 && g > b + 10 {
            stats.green += 1.0 / total;
        }
        if is_blue {
            stats.blue += 1.0 / total;
            if y < half {
                stats.blue_top += 1.0 / half_total;
            }
        }
        if y >= half && r > 150 && r >= g && g > b && r - b > 30 {
            stats.sand_bottom += 1.0 / half_total;
        }
    }
    stats
}

/// Picks the dominant scene from color statistics of a downsampled copy.
pub fn classify(img: &DynamicImage) -> Scene {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Scene::Generic;
    }
    let stats = color_stats(img);
    debug!(?stats, "Local scene statistics");

    if stats.mean_luma < 45.0 {
        Scene::Night
    } else if stats.snow > 0.4 {
        Scene::Snow
    } else if stats.blue_top > 0.35 && stats.sand_bottom > 0.25 {
        Scene::Beach
    } else if stats.green > 0.35 {
        Scene::Forest
    } else if stats.blue > 0.45 {
        Scene::Sky
    } else {
        Scene::Generic
    }
}

/// Degraded on-device annotation used when the remote provider is unavailable.
/// Produces only a generic label, caption and description; never facts.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSceneClassifier;

impl LocalSceneClassifier {
    pub fn annotate_sync(&self, image: &[u8], place_hint: Option<&str>) -> Annotation {
        let scene = match image::load_from_memory(image) {
            Ok(img) => classify(&img),
            Err(e) => {
                debug!(error = %e, "Local classifier could not decode image");
                Scene::Generic
            }
        };
        Annotation {
            landmark_name: scene.label().to_string(),
            place_label: place_hint.map(str::to_string),
            caption: scene.caption().to_string(),
            description: scene.description().to_string(),
            facts: Vec::new(),
        }
    }
}

#[async_trait]
impl AnnotationProvider for LocalSceneClassifier {
    fn name(&self) -> &str {
        "local-scene-classifier"
    }

    async fn annotate(
        &self,
        image: &[u8],
        place_hint: Option<&str>,
    ) -> Result<Annotation, AnnotationError> {
        let owned = image.to_vec();
        let hint = place_hint.map(str::to_string);
        let classifier = *self;
        tokio::task::spawn_blocking(move || classifier.annotate_sync(&owned, hint.as_deref()))
            .await
            .map_err(|e| AnnotationError::Encoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn split_image(top: [u8; 3], bottom: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(80, 80, |_, y| {
            if y < 40 {
                Rgb(top)
            } else {
                Rgb(bottom)
            }
        }))
    }

    fn solid(color: [u8; 3]) -> DynamicImage {
        split_image(color, color)
    }

    #[test]
    fn test_classifies_basic_scenes() {
        assert_eq!(classify(&solid([10, 10, 20])), Scene::Night);
        assert_eq!(classify(&solid([240, 245, 250])), Scene::Snow);
        assert_eq!(classify(&split_image([70, 140, 230], [220, 190, 140])), Scene::Beach);
        assert_eq!(classify(&solid([40, 120, 50])), Scene::Forest);
        assert_eq!(classify(&solid([90, 150, 235])), Scene::Sky);
        assert_eq!(classify(&solid([128, 128, 128])), Scene::Generic);
    }

    #[tokio::test]
    async fn test_fallback_annotation_has_no_facts() {
        let mut bytes = std::io::Cursor::new(Vec::new());
        solid([40, 120, 50])
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();

        let annotation = LocalSceneClassifier
            .annotate(&bytes.into_inner(), Some("Black Forest, Germany"))
            .await
            .unwrap();

        assert_eq!(annotation.landmark_name, "Forest");
        assert_eq!(annotation.place_label.as_deref(), Some("Black Forest, Germany"));
        assert!(annotation.facts.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_bytes_give_generic_scene() {
        let annotation = LocalSceneClassifier.annotate(b"garbage", None).await.unwrap();
        assert_eq!(annotation.landmark_name, GENERIC_SCENE_LABEL);
        assert_eq!(annotation.place_label, None);
    }
}
