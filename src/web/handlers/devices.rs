use axum::{
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, error};

use crate::cache;
use crate::models::{DeviceKey, DeviceMetadata};
use crate::web::AppState;

const XML_CONTENT_TYPE: &str = "application/xml";

/// `GET /devices/{vid}/{pid}/` with decimal ids
///
/// 200 with the metadata document when any field is known, otherwise 404 with
/// an empty `DeviceMetadata` element. Ids that are not decimal numbers in the
/// 0..=65535 range get the empty document too.
pub async fn get_device_metadata(
    Path((vid, pid)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    let (Ok(vendor_id), Ok(product_id)) = (vid.parse::<u16>(), pid.parse::<u16>()) else {
        debug!("Rejecting device ids {}:{}", vid, pid);
        return xml_response(StatusCode::NOT_FOUND, &DeviceMetadata::default());
    };

    let resolution = state
        .resolver
        .resolve(DeviceKey::new(vendor_id, product_id))
        .await;
    let status = if resolution.found {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    xml_response(status, &resolution.metadata)
}

fn xml_response(status: StatusCode, metadata: &DeviceMetadata) -> Response {
    match cache::encode(metadata) {
        Ok(document) => (status, [(header::CONTENT_TYPE, XML_CONTENT_TYPE)], document).into_response(),
        Err(e) => {
            error!("Failed to encode device metadata: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
