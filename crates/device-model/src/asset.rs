//! Asset commands: the subset of asset storage operations this core names
//! but does not implement (the asset store itself is an out-of-scope
//! collaborator, per the ingestion pipeline's `deliverAssetCommand`).

#[derive(Debug, Clone, PartialEq)]
pub enum AssetCommand {
    Asset { asset_id: String, asset_type: String, device_uuid: Option<String>, body: String },
    UpdateAsset { asset_id: String, body: String },
    RemoveAsset { asset_id: Option<String> },
    RemoveAllAssets { asset_type: Option<String> },
}

/// An `AssetChanged`/`AssetRemoved` notification surfaced while parsing an
/// upstream agent's stream (§4.12), distinct from a locally-issued
/// [`AssetCommand`].
#[derive(Debug, Clone, PartialEq)]
pub struct AssetEvent {
    pub asset_id: String,
    pub asset_type: Option<String>,
    pub device_uuid: Option<String>,
}
