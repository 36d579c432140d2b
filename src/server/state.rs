use crate::database::EntryStore;
use crate::map_index::MapIndexProjector;
use crate::pipeline::AnnotationPipeline;
use std::sync::{Arc, Mutex};

// Shared by every handler; the store handle is the same one the pipeline saves into
#[derive(Clone)]
pub struct AppState {
    pub store: EntryStore,
    pub pipeline: Arc<AnnotationPipeline>,
    pub projector: Arc<Mutex<MapIndexProjector>>,
}

impl AppState {
    pub fn new(pipeline: Arc<AnnotationPipeline>, projector: Arc<Mutex<MapIndexProjector>>) -> Self {
        Self {
            store: pipeline.store().clone(),
            pipeline,
            projector,
        }
    }
}
