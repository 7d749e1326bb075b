//! SeldonDeployment Validation Webhook
//!
//! Handles AdmissionReview requests for SeldonDeployment resources, rejecting
//! graphs that could not be synthesized.

use axum::Json;
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
    DynamicObject,
};
use tracing::{debug, error, info, warn};

use crate::crd::SeldonDeployment;
use crate::{Error, Result};

/// Status code for a payload that is not a SeldonDeployment
const BAD_REQUEST: u16 = 400;

/// Status code for a rejected SeldonDeployment
const FORBIDDEN: u16 = 403;

/// Status code for an unexpected failure
const INTERNAL_SERVER_ERROR: u16 = 500;

/// Handle validating admission review for SeldonDeployments
pub async fn validate_handler(
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(review_seldon_deployment(&req).into_review())
}

/// Decode the admitted object into a SeldonDeployment
pub fn decode_seldon_deployment(obj: &DynamicObject) -> Result<SeldonDeployment> {
    let value = serde_json::to_value(obj).map_err(|e| Error::decode(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::decode(e.to_string()))
}

/// Decide a single admission request
fn review_seldon_deployment(request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let uid = request.uid.clone();
    let allowed = AdmissionResponse::from(request);

    if !matches!(request.operation, Operation::Create | Operation::Update) {
        debug!(uid = %uid, operation = ?request.operation, "Not a create or update, allowing");
        return allowed;
    }

    let obj = match &request.object {
        Some(obj) => obj,
        None => {
            debug!(uid = %uid, "No object in request, allowing unchanged");
            return allowed;
        }
    };

    let result = decode_seldon_deployment(obj).and_then(|sdep| {
        sdep.spec.validate()?;
        Ok(sdep)
    });

    match result {
        Ok(sdep) => {
            info!(uid = %uid, seldon_deployment = ?sdep.metadata.name, "SeldonDeployment accepted");
            allowed
        }
        Err(e) => {
            let code = status_code(&e);
            let reason = match e {
                Error::Validation(reason) => reason,
                other => other.to_string(),
            };
            warn!(uid = %uid, code, reason = %reason, "SeldonDeployment denied");
            let mut response = allowed.deny(reason);
            response.result.code = code;
            response
        }
    }
}

fn status_code(err: &Error) -> u16 {
    match err {
        Error::Decode(_) => BAD_REQUEST,
        e if e.is_rejection() => FORBIDDEN,
        _ => INTERNAL_SERVER_ERROR,
    }
}
