use std::{collections::BTreeMap, sync::Arc};

use tube_core::{
    catalog::Catalog, ingest::Ingester, processing::encoder::MediaEncoder, store::ViewStore,
    streaming::TranscodeLimiter,
};

pub struct AppState {
    pub catalog: Catalog,
    pub views: ViewStore,
    pub ingester: Ingester,
    pub encoder: Arc<dyn MediaEncoder>,
    pub limiter: TranscodeLimiter,
    /// ffmpeg frame size -> derivative suffix, used to pick on the fly sizes
    pub sizes: BTreeMap<String, String>,
}

pub type SharedState = Arc<AppState>;
