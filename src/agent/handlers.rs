//! Route handlers.

use super::dto::{
    decode_base64, encode_base64, request_pin, selector, ApiError, CertificatesQuery, PdfSignRequest,
    PdfSignResponse, PinAnswer, SignRequest, SignResponse, StatusResponse,
};
use super::AgentContext;
use crate::certificates::Certificate;
use crate::error::Error;
use crate::pin::{PendingChallenge, Pin, PinReply};
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use log::{debug, info};
use std::sync::Arc;
use uuid::Uuid;

type ApiResult<T> = Result<T, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError(Error::InvalidRequest(rejection.body_text())))
}

pub async fn handle_status(State(ctx): State<Arc<AgentContext>>) -> Json<StatusResponse> {
    let state = ctx.state();
    Json(StatusResponse {
        state: state.name().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        address: state.address().map(|a| a.to_string()),
        supports_hardware_pin_entry: ctx.service.capabilities().supports_hardware_pin_entry,
        pending_pin_challenges: ctx.registry.len(),
    })
}

pub async fn handle_certificates(
    State(ctx): State<Arc<AgentContext>>,
    query: Result<Query<CertificatesQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Certificate>>> {
    let Query(query) = query.map_err(|rejection| ApiError(Error::InvalidRequest(rejection.body_text())))?;
    let listing = ctx.service.certificates(query.all)?;
    debug!("listed {} certificates (all={})", listing.len(), query.all);
    Ok(Json(listing))
}

pub async fn handle_sign(
    State(ctx): State<Arc<AgentContext>>,
    payload: Result<Json<SignRequest>, JsonRejection>,
) -> ApiResult<Json<SignResponse>> {
    let request = body(payload)?;
    if !request.detached {
        return Err(Error::InvalidRequest("only detached signatures are supported".to_string()).into());
    }
    let selector = selector(request.cert_index, request.thumbprint.as_deref())?;
    let data = decode_base64("payload", &request.payload)?;
    let prompter = ctx.prompter();
    let signed = ctx
        .service
        .sign(&data, selector.as_ref(), request_pin(request.pin), prompter.as_ref())
        .await?;
    Ok(Json(SignResponse {
        signature: encode_base64(&signed.signature.der),
        certificate_subject: signed.signature.subject,
        certificate_serial: signed.signature.serial_number,
        certificate_issuer: signed.signature.issuer,
        signed_at: signed.signature.signed_at,
    }))
}

pub async fn handle_sign_pdf(
    State(ctx): State<Arc<AgentContext>>,
    payload: Result<Json<PdfSignRequest>, JsonRejection>,
) -> ApiResult<Json<PdfSignResponse>> {
    let request = body(payload)?;
    let selector = selector(request.cert_index, request.thumbprint.as_deref())?;
    let pdf = decode_base64("payload", &request.payload)?;
    let prompter = ctx.prompter();
    let output = ctx
        .service
        .sign_pdf(
            pdf,
            selector.as_ref(),
            request.stamp,
            request_pin(request.pin),
            prompter.as_ref(),
            request.include_p7s,
        )
        .await?;
    Ok(Json(PdfSignResponse {
        pdf: encode_base64(&output.pdf),
        protocol: output.protocol,
        signature_type: output.signature_type,
        authentication: output.authentication,
        p7s: output.p7s.as_deref().map(encode_base64),
    }))
}

pub async fn handle_pin_pending(State(ctx): State<Arc<AgentContext>>) -> Json<Vec<PendingChallenge>> {
    Json(ctx.registry.pending())
}

pub async fn handle_pin_answer(
    State(ctx): State<Arc<AgentContext>>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<PinAnswer>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Path(id) = id.map_err(|rejection| ApiError(Error::InvalidRequest(rejection.body_text())))?;
    let answer = body(payload)?;
    let reply = if answer.pin.is_empty() {
        PinReply::Cancelled
    } else {
        PinReply::Pin(Pin::new(answer.pin))
    };
    ctx.registry.resolve(id, reply)?;
    info!("PIN challenge {} answered", id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn handle_pin_cancel(
    State(ctx): State<Arc<AgentContext>>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path(id) = id.map_err(|rejection| ApiError(Error::InvalidRequest(rejection.body_text())))?;
    ctx.registry.cancel(id)?;
    info!("PIN challenge {} cancelled", id);
    Ok(StatusCode::NO_CONTENT)
}
