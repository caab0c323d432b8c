//! InMemoryLayerStore - 開発用のレイヤー保管
//!
//! # 実装詳細
//! - DashMap<LayerId, LayerRecord> でシャード単位のロック
//! - delete_layer はレイヤーのファイルも best-effort で削除

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::ids::LayerId;
use crate::domain::layer::LayerRecord;
use crate::ports::{LayerStore, StoreError};

#[derive(Debug, Default)]
pub struct InMemoryLayerStore {
    layers: DashMap<LayerId, LayerRecord>,
}

impl InMemoryLayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a layer.
    pub fn insert(&self, layer: LayerRecord) {
        self.layers.insert(layer.id, layer);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

#[async_trait]
impl LayerStore for InMemoryLayerStore {
    async fn get_layer(&self, id: &LayerId) -> Result<Option<LayerRecord>, StoreError> {
        Ok(self.layers.get(id).map(|entry| entry.value().clone()))
    }

    async fn list_layers(&self) -> Result<Vec<LayerRecord>, StoreError> {
        let mut layers: Vec<LayerRecord> =
            self.layers.iter().map(|entry| entry.value().clone()).collect();
        // ULID 順 = 登録順
        layers.sort_by_key(|layer| layer.id);
        Ok(layers)
    }

    async fn retitle_layer(&self, id: &LayerId, title: &str) -> Result<(), StoreError> {
        let mut entry = self
            .layers
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.title = title.to_string();
        Ok(())
    }

    async fn delete_layer(&self, id: &LayerId) -> Result<(), StoreError> {
        let (_, layer) = self
            .layers
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        for file in &layer.files {
            if let Err(e) = tokio::fs::remove_file(file).await {
                tracing::debug!(layer_id = %id, file = %file.display(), error = %e, "layer file already gone");
            }
        }
        Ok(())
    }
}
