// src/remote/types.rs
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetDataRequest {
    pub key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetDataResponse {
    pub value: Vec<u8>,
    #[serde(default)]
    pub error: Option<BackendError>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SetDataRequest {
    pub key: String,
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SetDataResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<BackendError>,
}
