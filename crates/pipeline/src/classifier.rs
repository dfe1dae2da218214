use docsift_common::{ContentClass, LaneKind, LanesConfig};
use std::collections::HashSet;

/// Lowercased extension of the last path segment, without the dot
pub fn extension_of(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Maps remote paths to content classes and classes to lanes.
///
/// Images are recognized by extension, every other file with an extension
/// is a document. Files without one are `Unrecognized` and go to
/// `unrecognized_lane`, the document lane unless configured otherwise.
#[derive(Debug, Clone)]
pub struct Classifier {
    image_extensions: HashSet<String>,
    unrecognized_lane: LaneKind,
}

impl Classifier {
    pub fn new<I, S>(image_extensions: I, unrecognized_lane: LaneKind) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            image_extensions: image_extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
            unrecognized_lane,
        }
    }

    pub fn from_config(config: &LanesConfig) -> Self {
        Self::new(
            &config.image_extensions,
            config.route_unrecognized_to.unwrap_or(LaneKind::Document),
        )
    }

    pub fn classify(&self, path: &str) -> ContentClass {
        match extension_of(path) {
            Some(ext) if self.image_extensions.contains(&ext) => ContentClass::Image,
            Some(_) => ContentClass::Document,
            None => ContentClass::Unrecognized,
        }
    }

    pub fn route(&self, class: ContentClass) -> LaneKind {
        match class {
            ContentClass::Image => LaneKind::Image,
            ContentClass::Document => LaneKind::Document,
            ContentClass::Unrecognized => self.unrecognized_lane,
        }
    }

    pub fn lane_for(&self, path: &str) -> LaneKind {
        self.route(self.classify(path))
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::from_config(&LanesConfig::default())
    }
}
