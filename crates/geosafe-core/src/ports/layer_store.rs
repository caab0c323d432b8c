//! LayerStore port - 外部のレイヤー保管システム
//!
//! 入力レイヤーは読み取り専用。書き込みは analysis が生成した impact layer の
//! タイトル変更と削除のみ。

use async_trait::async_trait;

use crate::domain::ids::LayerId;
use crate::domain::layer::{LayerPurpose, LayerRecord};
use crate::ports::StoreError;

#[async_trait]
pub trait LayerStore: Send + Sync {
    async fn get_layer(&self, id: &LayerId) -> Result<Option<LayerRecord>, StoreError>;

    async fn list_layers(&self) -> Result<Vec<LayerRecord>, StoreError>;

    async fn retitle_layer(&self, id: &LayerId, title: &str) -> Result<(), StoreError>;

    /// Remove the layer and its raw files.
    async fn delete_layer(&self, id: &LayerId) -> Result<(), StoreError>;

    /// Layers whose metadata is exactly `(purpose, category)`.
    async fn layers_matching(
        &self,
        purpose: LayerPurpose,
        category: Option<&str>,
    ) -> Result<Vec<LayerRecord>, StoreError> {
        let layers = self.list_layers().await?;
        Ok(layers
            .into_iter()
            .filter(|layer| layer.metadata.matches(purpose, category))
            .collect())
    }
}
